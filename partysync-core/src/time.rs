//! Wall-clock helpers.

use chrono::Utc;

/// Current wall-clock time as epoch milliseconds.
///
/// All persisted and wire-visible timestamps in the system use this
/// representation.
#[must_use]
pub fn epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}
