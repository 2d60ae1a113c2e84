//! Small shared helpers

/// Current time as unix milliseconds — the timestamp representation used
/// across all persisted rows.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
