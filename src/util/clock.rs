use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch, from the server clock
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
