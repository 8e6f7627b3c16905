//! Timestamp utilities

use chrono::Utc;

/// Current Unix time in milliseconds
///
/// Cache expiry is stored in this unit.
pub fn unix_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_millis_is_after_2020() {
        // 2020-01-01 00:00:00 UTC
        assert!(unix_millis() > 1_577_836_800_000);
    }

    #[tokio::test]
    async fn test_unix_millis_advances() {
        let before = unix_millis();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(unix_millis() > before);
    }
}
