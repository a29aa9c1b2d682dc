//! Wall-clock helper shared by the transport and coordinator.

/// Current time in milliseconds since the Unix epoch, saturating to `0` if
/// the clock is somehow set before it.
pub fn now_millis() -> i64 {
    i64::try_from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(0)
}
