//! Validator for the `stop_time_update` sequence of each trip update.
//!
//! Covers rules E002, E036, E037, E040, E041, E042, E043, E044 and E045.
//! Violations are reported, never repaired; the snapshot passes through
//! unmodified.

use crate::feed::{
    FeedMessage, StopScheduleRelationship, StopTimeEvent, StopTimeUpdate,
    TripScheduleRelationship, TripUpdate,
};
use crate::rules::{Rule, RuleCode, RuleViolation};
use crate::schedule::{ScheduleIndex, ScheduleMetadata};

/// Walks each trip's ordered stop-time updates, applying sequencing,
/// duplication, field-presence and time-field checks, and cross-referencing
/// declared `(stop_sequence, stop_id)` pairs against the static schedule.
pub struct StopTimeUpdateValidator;

impl Rule for StopTimeUpdateValidator {
    fn evaluate(
        &self,
        _as_of: u64,
        schedule: &dyn ScheduleIndex,
        _metadata: &ScheduleMetadata,
        feed: &FeedMessage,
        _previous: Option<&FeedMessage>,
    ) -> Vec<RuleViolation> {
        let mut violations = Vec::new();
        for trip_update in feed.trip_updates() {
            check_trip(trip_update, schedule, &mut violations);
        }
        violations
    }
}

fn check_trip(
    trip_update: &TripUpdate,
    schedule: &dyn ScheduleIndex,
    out: &mut Vec<RuleViolation>,
) {
    let trip_id = trip_update.trip.trip_id.as_deref();

    if trip_update.stop_time_update.is_empty() {
        // A canceled trip legitimately carries no stop-time updates.
        if trip_update.trip.schedule_relationship() != TripScheduleRelationship::Canceled {
            out.push(
                RuleViolation::new(RuleCode::E041, "trip has no stop_time_updates")
                    .for_trip(trip_id),
            );
        }
        return;
    }

    // The realtime trip may reference a pattern the loaded schedule does not
    // know; in that case every cross-reference is skipped.
    let cross_reference = trip_id.filter(|id| schedule.has_trip(id));

    let mut prev_sequence: Option<u32> = None;
    let mut prev_stop_id: Option<&str> = None;

    for stu in &trip_update.stop_time_update {
        let sequence = stu.stop_sequence;
        let stop_id = stu.stop_id.as_deref();

        // Equality is checked before strict decrease, so a duplicated
        // sequence fires E036 and never also E002.
        if let (Some(prev), Some(current)) = (prev_sequence, sequence) {
            if current == prev {
                out.push(
                    RuleViolation::new(
                        RuleCode::E036,
                        format!("stop_sequence {current} repeats the previous update"),
                    )
                    .for_trip(trip_id)
                    .at_stop(sequence, stop_id),
                );
            } else if current < prev {
                out.push(
                    RuleViolation::new(
                        RuleCode::E002,
                        format!("stop_sequence {current} follows {prev}"),
                    )
                    .for_trip(trip_id)
                    .at_stop(sequence, stop_id),
                );
            }
        }

        // Orthogonal to the sequence family: either, both or neither may
        // fire for the same adjacent pair.
        if let (Some(prev), Some(current)) = (prev_stop_id, stop_id) {
            if current == prev {
                out.push(
                    RuleViolation::new(
                        RuleCode::E037,
                        format!("stop_id {current} repeats the previous update"),
                    )
                    .for_trip(trip_id)
                    .at_stop(sequence, stop_id),
                );
            }
        }

        check_fields(stu, trip_id, out);

        if let (Some(trip), Some(seq), Some(id)) = (cross_reference, sequence, stop_id) {
            check_against_schedule(schedule, trip, seq, id, out);
        }

        prev_sequence = sequence;
        prev_stop_id = stop_id;
    }
}

/// Per-entry field checks, independent of neighboring entries.
fn check_fields(stu: &StopTimeUpdate, trip_id: Option<&str>, out: &mut Vec<RuleViolation>) {
    let sequence = stu.stop_sequence;
    let stop_id = stu.stop_id.as_deref();

    if sequence.is_none() && stop_id.is_none() {
        out.push(
            RuleViolation::new(
                RuleCode::E040,
                "stop_time_update declares neither stop_sequence nor stop_id",
            )
            .for_trip(trip_id),
        );
    }

    let relationship = stu.schedule_relationship();

    if relationship == StopScheduleRelationship::NoData {
        // One violation per offending event, so up to two per entry.
        for (event, field) in [(&stu.arrival, "arrival"), (&stu.departure, "departure")] {
            if event.is_some() {
                out.push(
                    RuleViolation::new(
                        RuleCode::E042,
                        format!("{field} provided for NO_DATA stop_time_update"),
                    )
                    .for_trip(trip_id)
                    .at_stop(sequence, stop_id),
                );
            }
        }
    }

    let exempt = matches!(
        relationship,
        StopScheduleRelationship::Skipped | StopScheduleRelationship::NoData
    );
    if !exempt && stu.arrival.is_none() && stu.departure.is_none() {
        out.push(
            RuleViolation::new(
                RuleCode::E043,
                "stop_time_update has neither arrival nor departure",
            )
            .for_trip(trip_id)
            .at_stop(sequence, stop_id),
        );
    }

    for (event, field) in [(&stu.arrival, "arrival"), (&stu.departure, "departure")] {
        if let Some(event) = event {
            if is_empty_event(event) {
                out.push(
                    RuleViolation::new(
                        RuleCode::E044,
                        format!("{field} has neither delay nor time"),
                    )
                    .for_trip(trip_id)
                    .at_stop(sequence, stop_id),
                );
            }
        }
    }
}

fn is_empty_event(event: &StopTimeEvent) -> bool {
    event.delay.is_none() && event.time.is_none()
}

/// Direct, independent lookup per entry: no positional re-alignment, no
/// fuzzy matching. A sequence the static pattern does not know is skipped
/// silently, so mid-route starts, skipped stops and out-of-order entries
/// are each still checked against their own static position.
fn check_against_schedule(
    schedule: &dyn ScheduleIndex,
    trip_id: &str,
    stop_sequence: u32,
    stop_id: &str,
    out: &mut Vec<RuleViolation>,
) {
    if let Some(expected) = schedule.lookup(trip_id, stop_sequence) {
        if expected != stop_id {
            out.push(
                RuleViolation::new(
                    RuleCode::E045,
                    format!("GTFS has stop_id {expected} at stop_sequence {stop_sequence}"),
                )
                .for_trip(Some(trip_id))
                .at_stop(Some(stop_sequence), Some(stop_id)),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedEntity, FeedHeader, TripDescriptor};
    use crate::rules::count_by_code;
    use crate::schedule::TripPatterns;
    use std::collections::HashMap;

    fn delay_event() -> StopTimeEvent {
        StopTimeEvent {
            delay: Some(60),
            ..Default::default()
        }
    }

    fn stu(sequence: Option<u32>, stop_id: Option<&str>) -> StopTimeUpdate {
        StopTimeUpdate {
            stop_sequence: sequence,
            stop_id: stop_id.map(str::to_string),
            schedule_relationship: Some(StopScheduleRelationship::Scheduled as i32),
            arrival: Some(delay_event()),
            departure: None,
        }
    }

    fn trip_update(
        relationship: TripScheduleRelationship,
        updates: Vec<StopTimeUpdate>,
    ) -> TripUpdate {
        TripUpdate {
            trip: TripDescriptor {
                trip_id: Some("1".to_string()),
                schedule_relationship: Some(relationship as i32),
                ..Default::default()
            },
            stop_time_update: updates,
            ..Default::default()
        }
    }

    fn feed_with(trip: TripUpdate) -> FeedMessage {
        FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                timestamp: Some(1104537600),
                incrementality: None,
            },
            entity: vec![FeedEntity {
                id: "1".to_string(),
                trip_update: Some(trip),
                ..Default::default()
            }],
        }
    }

    /// `stop_times.txt` ordering of the fixture schedule used by the
    /// cross-reference tests, trip "1": (sequence, stop_id) pairs.
    const PATTERN: &[(u32, &str)] = &[
        (1, "222"),
        (2, "230"),
        (3, "214"),
        (4, "204"),
        (5, "102"),
        (6, "101"),
        (10, "162"),
        (12, "154"),
        (25, "222"),
    ];

    fn fixture_schedule() -> TripPatterns {
        let mut patterns = TripPatterns::default();
        for (sequence, stop_id) in PATTERN {
            patterns.insert("1", *sequence, stop_id);
        }
        patterns
    }

    fn validate(feed: &FeedMessage, schedule: &TripPatterns) -> Vec<RuleViolation> {
        StopTimeUpdateValidator.evaluate(
            1104537600,
            schedule,
            &ScheduleMetadata::default(),
            feed,
            None,
        )
    }

    fn assert_counts(violations: &[RuleViolation], expected: &[(RuleCode, usize)]) {
        let counts = count_by_code(violations);
        let expected: HashMap<RuleCode, usize> = expected.iter().copied().collect();
        assert_eq!(counts, expected, "violations: {violations:#?}");
    }

    #[test]
    fn test_increasing_sequences_are_clean() {
        let feed = feed_with(trip_update(
            TripScheduleRelationship::Scheduled,
            vec![stu(Some(1), None), stu(Some(5), None)],
        ));
        assert_counts(&validate(&feed, &TripPatterns::default()), &[]);
    }

    #[test]
    fn test_out_of_order_sequence_fires_e002() {
        // 1, 5, 3: the 3 after the 5 is the single offending pair.
        let feed = feed_with(trip_update(
            TripScheduleRelationship::Scheduled,
            vec![stu(Some(1), None), stu(Some(5), None), stu(Some(3), None)],
        ));
        assert_counts(
            &validate(&feed, &TripPatterns::default()),
            &[(RuleCode::E002, 1)],
        );
    }

    #[test]
    fn test_duplicate_sequence_fires_e036_not_e002() {
        // 1, 5, 5 with the last update lacking a stop_id.
        let feed = feed_with(trip_update(
            TripScheduleRelationship::Scheduled,
            vec![
                stu(Some(1), Some("1000")),
                stu(Some(5), Some("2000")),
                stu(Some(5), None),
            ],
        ));
        assert_counts(
            &validate(&feed, &TripPatterns::default()),
            &[(RuleCode::E036, 1)],
        );
    }

    #[test]
    fn test_duplicate_sequence_with_distinct_stop_ids() {
        let feed = feed_with(trip_update(
            TripScheduleRelationship::Scheduled,
            vec![
                stu(Some(1), Some("1000")),
                stu(Some(5), Some("2000")),
                stu(Some(5), Some("3000")),
            ],
        ));
        assert_counts(
            &validate(&feed, &TripPatterns::default()),
            &[(RuleCode::E036, 1)],
        );
    }

    #[test]
    fn test_duplicate_stop_id_fires_e037() {
        // Repeated stop_id without stop_sequence on the repeat.
        let feed = feed_with(trip_update(
            TripScheduleRelationship::Scheduled,
            vec![
                stu(Some(1), Some("1000")),
                stu(Some(5), Some("2000")),
                stu(None, Some("2000")),
            ],
        ));
        assert_counts(
            &validate(&feed, &TripPatterns::default()),
            &[(RuleCode::E037, 1)],
        );
    }

    #[test]
    fn test_duplicate_stop_id_with_increasing_sequences() {
        // The sequence family stays quiet while the stop_id family fires.
        let feed = feed_with(trip_update(
            TripScheduleRelationship::Scheduled,
            vec![
                stu(Some(1), Some("1000")),
                stu(Some(5), Some("2000")),
                stu(Some(10), Some("2000")),
            ],
        ));
        assert_counts(
            &validate(&feed, &TripPatterns::default()),
            &[(RuleCode::E037, 1)],
        );
    }

    #[test]
    fn test_duplicate_pair_fires_both_families() {
        let feed = feed_with(trip_update(
            TripScheduleRelationship::Scheduled,
            vec![stu(Some(5), Some("2000")), stu(Some(5), Some("2000"))],
        ));
        assert_counts(
            &validate(&feed, &TripPatterns::default()),
            &[(RuleCode::E036, 1), (RuleCode::E037, 1)],
        );
    }

    #[test]
    fn test_missing_stop_reference_fires_e040() {
        let feed = feed_with(trip_update(
            TripScheduleRelationship::Scheduled,
            vec![stu(None, None)],
        ));
        assert_counts(
            &validate(&feed, &TripPatterns::default()),
            &[(RuleCode::E040, 1)],
        );
    }

    #[test]
    fn test_stop_id_alone_satisfies_e040() {
        let feed = feed_with(trip_update(
            TripScheduleRelationship::Scheduled,
            vec![stu(None, Some("1.1"))],
        ));
        assert_counts(&validate(&feed, &TripPatterns::default()), &[]);
    }

    #[test]
    fn test_no_updates_fires_e041() {
        let feed = feed_with(trip_update(TripScheduleRelationship::Scheduled, vec![]));
        assert_counts(
            &validate(&feed, &TripPatterns::default()),
            &[(RuleCode::E041, 1)],
        );
    }

    #[test]
    fn test_canceled_trip_without_updates_is_clean() {
        let feed = feed_with(trip_update(TripScheduleRelationship::Canceled, vec![]));
        assert_counts(&validate(&feed, &TripPatterns::default()), &[]);
    }

    #[test]
    fn test_no_data_with_departure_fires_e042() {
        let mut update = stu(None, Some("1.1"));
        update.schedule_relationship = Some(StopScheduleRelationship::NoData as i32);
        update.arrival = None;
        update.departure = Some(delay_event());
        let feed = feed_with(trip_update(TripScheduleRelationship::Scheduled, vec![update]));
        assert_counts(
            &validate(&feed, &TripPatterns::default()),
            &[(RuleCode::E042, 1)],
        );
    }

    #[test]
    fn test_no_data_with_both_events_fires_e042_twice() {
        let mut update = stu(None, Some("1.1"));
        update.schedule_relationship = Some(StopScheduleRelationship::NoData as i32);
        update.departure = Some(delay_event());
        let feed = feed_with(trip_update(TripScheduleRelationship::Scheduled, vec![update]));
        assert_counts(
            &validate(&feed, &TripPatterns::default()),
            &[(RuleCode::E042, 2)],
        );
    }

    #[test]
    fn test_no_data_without_events_is_clean() {
        let mut update = stu(None, Some("1.1"));
        update.schedule_relationship = Some(StopScheduleRelationship::NoData as i32);
        update.arrival = None;
        let feed = feed_with(trip_update(TripScheduleRelationship::Scheduled, vec![update]));
        assert_counts(&validate(&feed, &TripPatterns::default()), &[]);
    }

    #[test]
    fn test_missing_events_fires_e043() {
        let mut update = stu(None, Some("1.1"));
        update.arrival = None;
        let feed = feed_with(trip_update(TripScheduleRelationship::Scheduled, vec![update]));
        assert_counts(
            &validate(&feed, &TripPatterns::default()),
            &[(RuleCode::E043, 1)],
        );
    }

    #[test]
    fn test_skipped_without_events_is_clean() {
        let mut update = stu(None, Some("1.1"));
        update.schedule_relationship = Some(StopScheduleRelationship::Skipped as i32);
        update.arrival = None;
        let feed = feed_with(trip_update(TripScheduleRelationship::Scheduled, vec![update]));
        assert_counts(&validate(&feed, &TripPatterns::default()), &[]);
    }

    #[test]
    fn test_empty_arrival_fires_e044() {
        let mut update = stu(None, Some("1.1"));
        update.arrival = Some(StopTimeEvent::default());
        let feed = feed_with(trip_update(TripScheduleRelationship::Scheduled, vec![update]));
        assert_counts(
            &validate(&feed, &TripPatterns::default()),
            &[(RuleCode::E044, 1)],
        );
    }

    #[test]
    fn test_empty_departure_fires_e044() {
        let mut update = stu(None, Some("1.1"));
        update.arrival = None;
        update.departure = Some(StopTimeEvent::default());
        let feed = feed_with(trip_update(TripScheduleRelationship::Scheduled, vec![update]));
        assert_counts(
            &validate(&feed, &TripPatterns::default()),
            &[(RuleCode::E044, 1)],
        );
    }

    #[test]
    fn test_event_with_time_only_is_clean() {
        let mut update = stu(None, Some("1.1"));
        update.arrival = Some(StopTimeEvent {
            time: Some(1104537600),
            ..Default::default()
        });
        let feed = feed_with(trip_update(TripScheduleRelationship::Scheduled, vec![update]));
        assert_counts(&validate(&feed, &TripPatterns::default()), &[]);
    }

    fn realtime_trip(pairs: &[(u32, &str)]) -> TripUpdate {
        trip_update(
            TripScheduleRelationship::Scheduled,
            pairs
                .iter()
                .map(|(sequence, stop_id)| stu(Some(*sequence), Some(stop_id)))
                .collect(),
        )
    }

    #[test]
    fn test_matching_pairs_produce_no_e045() {
        let feed = feed_with(realtime_trip(PATTERN));
        assert_counts(&validate(&feed, &fixture_schedule()), &[]);
    }

    #[test]
    fn test_first_pair_wrong_fires_one_e045() {
        let mut pairs = PATTERN.to_vec();
        pairs[0] = (1, "204");
        let feed = feed_with(realtime_trip(&pairs));
        assert_counts(&validate(&feed, &fixture_schedule()), &[(RuleCode::E045, 1)]);
    }

    #[test]
    fn test_two_wrong_pairs_fire_two_e045() {
        let mut pairs = PATTERN.to_vec();
        pairs[0] = (1, "204");
        pairs[1] = (2, "222");
        let feed = feed_with(realtime_trip(&pairs));
        assert_counts(&validate(&feed, &fixture_schedule()), &[(RuleCode::E045, 2)]);
    }

    #[test]
    fn test_mid_route_start_is_checked_per_entry() {
        // The realtime trip starts at sequence 2; every declared pair is
        // still checked against its own static position.
        let feed = feed_with(realtime_trip(&PATTERN[1..]));
        assert_counts(&validate(&feed, &fixture_schedule()), &[]);

        let mut pairs = PATTERN[1..].to_vec();
        pairs[5] = (10, "160");
        let feed = feed_with(realtime_trip(&pairs));
        assert_counts(&validate(&feed, &fixture_schedule()), &[(RuleCode::E045, 1)]);
    }

    #[test]
    fn test_unknown_sequence_skips_cross_reference() {
        // Sequence 99 has no static entry; the mismatch at sequence 1 is
        // still found regardless of the unresolvable neighbor.
        let feed = feed_with(realtime_trip(&[(1, "204"), (99, "999")]));
        assert_counts(&validate(&feed, &fixture_schedule()), &[(RuleCode::E045, 1)]);
    }

    #[test]
    fn test_unknown_trip_skips_cross_reference() {
        let mut trip = realtime_trip(&[(1, "204")]);
        trip.trip.trip_id = Some("ghost".to_string());
        let feed = feed_with(trip);
        assert_counts(&validate(&feed, &fixture_schedule()), &[]);
    }

    #[test]
    fn test_validator_is_idempotent() {
        let feed = feed_with(trip_update(
            TripScheduleRelationship::Scheduled,
            vec![stu(Some(1), None), stu(Some(5), None), stu(Some(3), None)],
        ));
        let schedule = fixture_schedule();
        let first = validate(&feed, &schedule);
        let second = validate(&feed, &schedule);
        assert_eq!(first, second);
    }

    #[test]
    fn test_strictly_increasing_full_declaration_is_clean() {
        let feed = feed_with(trip_update(
            TripScheduleRelationship::Scheduled,
            (1..=20).map(|n| stu(Some(n), None)).collect(),
        ));
        assert_counts(&validate(&feed, &TripPatterns::default()), &[]);
    }
}
