//! Protobuf decoder for GTFS Realtime snapshots.
//!
//! Decode failures are operational errors handled by the poll scheduler;
//! they are never turned into rule violations.

use anyhow::Result;
use prost::Message;

use crate::feed::FeedMessage;

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a
/// `FeedMessage`, or if the decoded header carries no
/// `gtfs_realtime_version`. prost fills absent fields with defaults rather
/// than rejecting them, so the header check is made explicitly here.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage> {
    let feed = FeedMessage::decode(bytes)?;
    anyhow::ensure!(
        !feed.header.gtfs_realtime_version.is_empty(),
        "feed header carries no gtfs_realtime_version"
    );
    Ok(feed)
}
