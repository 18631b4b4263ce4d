pub mod client;
pub mod destination;
pub mod queue;

use thiserror::Error;

// CloudWatch Logs service limits.
// See http://docs.aws.amazon.com/AmazonCloudWatch/latest/logs/cloudwatch_limits_cwl.html

/// Maximum number of log events in a batch.
pub const MAX_BATCH_EVENTS: usize = 10_000;
/// Maximum batch size in bytes.
pub const MAX_BATCH_SIZE: usize = 1_048_576;
/// Maximum event size in bytes.
pub const MAX_EVENT_SIZE: usize = 262_144;
/// A batch cannot span more than 24 hours.
pub const MAX_BATCH_TIME_SPAN_MS: i64 = 24 * 60 * 60 * 1000;
/// Bytes added to each event when the service accounts batch size.
pub const EVENT_SIZE_OVERHEAD: usize = 26;
/// Events may not be more than 2 hours in the future.
pub const EVENT_FUTURE_WINDOW_MS: i64 = 2 * 60 * 60 * 1000;
/// Events may not be older than 14 days.
pub const EVENT_PAST_WINDOW_MS: i64 = 14 * 24 * 60 * 60 * 1000;
/// PutLogEvents allows 5 requests/second/stream, so uploads may not run
/// more often than every 200ms.
pub const MIN_UPLOAD_DELAY_MS: u64 = 200;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("message is too big")]
    MessageTooBig,
}

/// A rendered log line ready for upload, timestamped in milliseconds since
/// the epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub message: String,
    pub timestamp: i64,
}

impl LogEvent {
    /// Size as accounted by the service.
    pub fn size(&self) -> usize {
        self.message.len() + EVENT_SIZE_OVERHEAD
    }

    pub fn validate(&self) -> Result<(), EventError> {
        if self.size() > MAX_EVENT_SIZE {
            return Err(EventError::MessageTooBig);
        }
        Ok(())
    }

    /// Whether the service would accept this event's timestamp at `now_ms`.
    pub fn within_ingest_window(&self, now_ms: i64) -> bool {
        self.timestamp <= now_ms + EVENT_FUTURE_WINDOW_MS
            && self.timestamp >= now_ms - EVENT_PAST_WINDOW_MS
    }
}
