use chrono::{DateTime, SubsecRound, Utc};

/// Current wall-clock time truncated to microseconds.
///
/// Every record timestamp is created through this function so that storage
/// backends with microsecond resolution (PostgreSQL `timestamptz`) persist
/// exactly the value that pagination cursors encode.
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn now_has_no_sub_microsecond_component() {
        let ts = now_micros();
        assert_eq!(ts.nanosecond() % 1_000, 0);
    }
}
