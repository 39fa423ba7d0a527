use gtfs_rt_inspector::feed::{
    FeedEntity, FeedHeader, FeedMessage, StopScheduleRelationship, StopTimeEvent, StopTimeUpdate,
    TripDescriptor, TripScheduleRelationship, TripUpdate,
};
use gtfs_rt_inspector::parser::parse_feed;
use gtfs_rt_inspector::rules::{RuleCode, RuleRegistry, count_by_code};
use gtfs_rt_inspector::schedule::{ScheduleMetadata, TripPatterns};
use prost::Message;

fn stop_time_update(sequence: u32, stop_id: &str) -> StopTimeUpdate {
    StopTimeUpdate {
        stop_sequence: Some(sequence),
        stop_id: Some(stop_id.to_string()),
        schedule_relationship: Some(StopScheduleRelationship::Scheduled as i32),
        arrival: Some(StopTimeEvent {
            delay: Some(60),
            ..Default::default()
        }),
        departure: None,
    }
}

fn snapshot(updates: Vec<StopTimeUpdate>) -> FeedMessage {
    FeedMessage {
        header: FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            timestamp: Some(1104537600),
            incrementality: None,
        },
        entity: vec![FeedEntity {
            id: "1".to_string(),
            trip_update: Some(TripUpdate {
                trip: TripDescriptor {
                    trip_id: Some("1".to_string()),
                    schedule_relationship: Some(TripScheduleRelationship::Scheduled as i32),
                    ..Default::default()
                },
                stop_time_update: updates,
                ..Default::default()
            }),
            ..Default::default()
        }],
    }
}

#[test]
fn test_full_pipeline_clean_feed() {
    let mut patterns = TripPatterns::default();
    patterns.insert("1", 1, "222");
    patterns.insert("1", 2, "230");
    patterns.insert("1", 3, "214");

    let encoded = snapshot(vec![
        stop_time_update(1, "222"),
        stop_time_update(2, "230"),
        stop_time_update(3, "214"),
    ])
    .encode_to_vec();

    let feed = parse_feed(&encoded).expect("Failed to parse feed");
    let violations = RuleRegistry::default().evaluate(
        1104537600,
        &patterns,
        &ScheduleMetadata::default(),
        &feed,
        None,
    );

    assert!(violations.is_empty(), "unexpected: {violations:#?}");
}

#[test]
fn test_full_pipeline_reports_mismatch_and_ordering() {
    let mut patterns = TripPatterns::default();
    patterns.insert("1", 1, "222");
    patterns.insert("1", 2, "230");
    patterns.insert("1", 3, "214");

    // Wrong stop at sequence 1, then a sequence running backwards.
    let encoded = snapshot(vec![
        stop_time_update(1, "204"),
        stop_time_update(3, "214"),
        stop_time_update(2, "230"),
    ])
    .encode_to_vec();

    let feed = parse_feed(&encoded).expect("Failed to parse feed");
    let violations = RuleRegistry::default().evaluate(
        1104537600,
        &patterns,
        &ScheduleMetadata::default(),
        &feed,
        None,
    );

    let counts = count_by_code(&violations);
    assert_eq!(counts.get(&RuleCode::E045), Some(&1));
    assert_eq!(counts.get(&RuleCode::E002), Some(&1));
    assert_eq!(violations.len(), 2);
}

#[test]
fn test_decoded_feed_preserves_raw_fields() {
    let encoded = snapshot(vec![stop_time_update(5, "102")]).encode_to_vec();
    let feed = parse_feed(&encoded).unwrap();

    let trip = feed.entity[0].trip_update.as_ref().unwrap();
    assert_eq!(trip.trip.trip_id.as_deref(), Some("1"));
    let stu = &trip.stop_time_update[0];
    assert_eq!(stu.stop_sequence, Some(5));
    assert_eq!(stu.stop_id.as_deref(), Some("102"));
    assert_eq!(stu.arrival.as_ref().unwrap().delay, Some(60));
}
