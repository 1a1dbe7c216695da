//! Small helpers shared across the relay

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, as reported by the wall clock.
///
/// A clock set before the epoch reads as zero.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Debugging macro that logs the wall-clock time and current thread name
/// alongside the message.
#[macro_export]
macro_rules! tdbg {
    ($($arg:tt)*) => {{
        tracing::debug!(
            "[{:>13} ms][{:?}] {}",
            $crate::util::unix_millis(),
            std::thread::current().name().unwrap_or("unnamed"),
            format_args!($($arg)*)
        );
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_millis_is_monotone_enough() {
        let a = unix_millis();
        let b = unix_millis();
        assert!(a > 1_600_000_000_000);
        assert!(b >= a);
    }
}
