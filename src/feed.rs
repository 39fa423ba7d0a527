//! Hand-maintained prost definitions for the subset of the GTFS Realtime
//! wire format this tool inspects.
//!
//! Field tags match the official `gtfs-realtime.proto` so feeds published by
//! any standard producer decode directly into these types. Fields the rules
//! never look at are omitted; unknown fields are skipped by prost during
//! decoding, so omitting them is safe.

/// One decoded poll of a feed source.
#[derive(Clone, PartialEq, prost::Message)]
pub struct FeedMessage {
    #[prost(message, required, tag = "1")]
    pub header: FeedHeader,
    #[prost(message, repeated, tag = "2")]
    pub entity: Vec<FeedEntity>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FeedHeader {
    #[prost(string, required, tag = "1")]
    pub gtfs_realtime_version: String,
    #[prost(enumeration = "Incrementality", optional, tag = "2")]
    pub incrementality: Option<i32>,
    #[prost(uint64, optional, tag = "3")]
    pub timestamp: Option<u64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FeedEntity {
    #[prost(string, required, tag = "1")]
    pub id: String,
    #[prost(message, optional, tag = "3")]
    pub trip_update: Option<TripUpdate>,
    #[prost(message, optional, tag = "4")]
    pub vehicle: Option<VehiclePosition>,
    #[prost(message, optional, tag = "5")]
    pub alert: Option<Alert>,
}

/// Real-time progress report for one scheduled trip.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TripUpdate {
    #[prost(message, required, tag = "1")]
    pub trip: TripDescriptor,
    #[prost(message, repeated, tag = "2")]
    pub stop_time_update: Vec<StopTimeUpdate>,
    #[prost(uint64, optional, tag = "4")]
    pub timestamp: Option<u64>,
    #[prost(int32, optional, tag = "5")]
    pub delay: Option<i32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TripDescriptor {
    #[prost(string, optional, tag = "1")]
    pub trip_id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub start_time: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub start_date: Option<String>,
    #[prost(enumeration = "TripScheduleRelationship", optional, tag = "4")]
    pub schedule_relationship: Option<i32>,
    #[prost(string, optional, tag = "5")]
    pub route_id: Option<String>,
    #[prost(uint32, optional, tag = "6")]
    pub direction_id: Option<u32>,
}

/// Real-time arrival/departure report for one stop on a trip.
///
/// At least one of `stop_sequence` or `stop_id` must be provided by the
/// producer; the rules report a violation otherwise, but the decoded value
/// carries whatever the wire carried.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StopTimeUpdate {
    #[prost(uint32, optional, tag = "1")]
    pub stop_sequence: Option<u32>,
    #[prost(message, optional, tag = "2")]
    pub arrival: Option<StopTimeEvent>,
    #[prost(message, optional, tag = "3")]
    pub departure: Option<StopTimeEvent>,
    #[prost(string, optional, tag = "4")]
    pub stop_id: Option<String>,
    #[prost(enumeration = "StopScheduleRelationship", optional, tag = "5")]
    pub schedule_relationship: Option<i32>,
}

/// A single time signal: a delay relative to the static schedule, an
/// absolute POSIX time, or both.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StopTimeEvent {
    #[prost(int32, optional, tag = "1")]
    pub delay: Option<i32>,
    #[prost(int64, optional, tag = "2")]
    pub time: Option<i64>,
    #[prost(int32, optional, tag = "3")]
    pub uncertainty: Option<i32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct VehiclePosition {
    #[prost(message, optional, tag = "1")]
    pub trip: Option<TripDescriptor>,
    #[prost(message, optional, tag = "2")]
    pub position: Option<Position>,
    #[prost(uint32, optional, tag = "3")]
    pub current_stop_sequence: Option<u32>,
    #[prost(uint64, optional, tag = "5")]
    pub timestamp: Option<u64>,
    #[prost(string, optional, tag = "7")]
    pub stop_id: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Position {
    #[prost(float, required, tag = "1")]
    pub latitude: f32,
    #[prost(float, required, tag = "2")]
    pub longitude: f32,
    #[prost(float, optional, tag = "3")]
    pub bearing: Option<f32>,
    #[prost(float, optional, tag = "5")]
    pub speed: Option<f32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Alert {
    #[prost(message, repeated, tag = "5")]
    pub informed_entity: Vec<EntitySelector>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EntitySelector {
    #[prost(string, optional, tag = "1")]
    pub agency_id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub route_id: Option<String>,
    #[prost(message, optional, tag = "4")]
    pub trip: Option<TripDescriptor>,
    #[prost(string, optional, tag = "5")]
    pub stop_id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Incrementality {
    FullDataset = 0,
    Differential = 1,
}

/// How a trip update relates to the static plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum TripScheduleRelationship {
    Scheduled = 0,
    Added = 1,
    Unscheduled = 2,
    Canceled = 3,
}

/// How a stop-time update relates to the static plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum StopScheduleRelationship {
    Scheduled = 0,
    Skipped = 1,
    NoData = 2,
    Unscheduled = 3,
}

impl FeedMessage {
    /// Iterates over every trip update in the snapshot, in entity order.
    pub fn trip_updates(&self) -> impl Iterator<Item = &TripUpdate> {
        self.entity.iter().filter_map(|e| e.trip_update.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_round_trip_minimal_feed() {
        let feed = FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                incrementality: Some(Incrementality::FullDataset as i32),
                timestamp: Some(1234567890),
            },
            entity: vec![],
        };
        let decoded = FeedMessage::decode(feed.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, feed);
    }

    #[test]
    fn test_schedule_relationship_accessor_defaults_to_scheduled() {
        let stu = StopTimeUpdate::default();
        assert_eq!(
            stu.schedule_relationship(),
            StopScheduleRelationship::Scheduled
        );
    }

    #[test]
    fn test_enumeration_defaults_are_variant_zero() {
        // The Enumeration derive supplies Default; the zero variant is the
        // wire default for an absent field.
        assert_eq!(Incrementality::default(), Incrementality::FullDataset);
        assert_eq!(
            TripScheduleRelationship::default(),
            TripScheduleRelationship::Scheduled
        );
        assert_eq!(
            StopScheduleRelationship::default(),
            StopScheduleRelationship::Scheduled
        );
    }

    #[test]
    fn test_trip_updates_iterator_skips_other_entities() {
        let feed = FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                ..Default::default()
            },
            entity: vec![
                FeedEntity {
                    id: "v1".to_string(),
                    vehicle: Some(VehiclePosition::default()),
                    ..Default::default()
                },
                FeedEntity {
                    id: "t1".to_string(),
                    trip_update: Some(TripUpdate::default()),
                    ..Default::default()
                },
            ],
        };
        assert_eq!(feed.trip_updates().count(), 1);
    }
}
