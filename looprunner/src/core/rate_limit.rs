//! Rate-limit reset hint parsing and retry scheduling.
//!
//! Pure: the caller supplies `now` and performs the sleep.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime, TimeDelta};
use regex::Regex;

static RESET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"resets\s+(\d{1,2})(?::(\d{2}))?\s*([aApP][mM])").expect("reset regex")
});

/// Parse `resets <h>[:<mm>]am|pm` into the next local occurrence of that time.
///
/// Returns `None` when the message has no hint or the hint is out of range.
/// A time not strictly after `now` rolls forward one day.
pub fn parse_reset_time(message: &str, now: DateTime<Local>) -> Option<DateTime<Local>> {
    let caps = RESET_RE.captures(message)?;
    let hour12: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    if !(1..=12).contains(&hour12) || minute > 59 {
        return None;
    }
    let pm = caps.get(3)?.as_str().eq_ignore_ascii_case("pm");
    let hour = match (hour12, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, false) => h,
        (h, true) => h + 12,
    };

    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let mut reset = now
        .date_naive()
        .and_time(time)
        .and_local_timezone(Local)
        .earliest()?;
    if reset <= now {
        reset += TimeDelta::days(1);
    }
    Some(reset)
}

/// How long to sleep before retrying after a rate-limit message.
///
/// Parsed reset: `max(reset - now, 0) + buffer`. Otherwise `fallback`.
pub fn schedule_retry(
    message: &str,
    now: DateTime<Local>,
    buffer: Duration,
    fallback: Duration,
) -> Duration {
    match parse_reset_time(message, now) {
        Some(reset) => (reset - now).to_std().unwrap_or(Duration::ZERO) + buffer,
        None => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn at(hour: u32, minute: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 6, 10, hour, minute, 0)
            .single()
            .expect("unambiguous local time")
    }

    #[test]
    fn reset_later_today() {
        let now = at(1, 0);
        let reset = parse_reset_time("resets 2am (America/Chicago)", now).expect("parsed");
        assert_eq!(reset.date_naive(), now.date_naive());
        assert_eq!((reset.hour(), reset.minute()), (2, 0));
    }

    #[test]
    fn reset_already_passed_rolls_to_tomorrow() {
        let now = at(3, 0);
        let reset = parse_reset_time("resets 2am (America/Chicago)", now).expect("parsed");
        assert_eq!(reset.date_naive(), now.date_naive().succ_opt().expect("next day"));
        assert_eq!(reset.hour(), 2);
    }

    #[test]
    fn reset_equal_to_now_rolls_forward() {
        let now = at(2, 0);
        let reset = parse_reset_time("resets 2am", now).expect("parsed");
        assert!(reset > now);
    }

    #[test]
    fn minutes_and_uppercase_meridiem() {
        let now = at(9, 0);
        let reset = parse_reset_time("limit reached, resets 4:30 PM", now).expect("parsed");
        assert_eq!((reset.hour(), reset.minute()), (16, 30));
    }

    #[test]
    fn twelve_am_is_midnight() {
        let now = at(23, 0);
        let reset = parse_reset_time("resets 12am", now).expect("parsed");
        assert_eq!(reset.hour(), 0);
        assert!(reset > now);
    }

    #[test]
    fn out_of_range_is_rejected() {
        assert_eq!(parse_reset_time("resets 13pm", at(1, 0)), None);
        assert_eq!(parse_reset_time("resets 0am", at(1, 0)), None);
        assert_eq!(parse_reset_time("resets 3:75pm", at(1, 0)), None);
    }

    #[test]
    fn no_hint_is_none() {
        assert_eq!(parse_reset_time("limit reached", at(1, 0)), None);
    }

    #[test]
    fn schedule_adds_buffer_to_remaining_time() {
        let wait = schedule_retry(
            "resets 2am",
            at(1, 0),
            Duration::from_secs(60),
            Duration::from_secs(999),
        );
        assert_eq!(wait, Duration::from_secs(3600 + 60));
    }

    #[test]
    fn schedule_falls_back_without_hint() {
        let wait = schedule_retry(
            "rate_limit_error",
            at(1, 0),
            Duration::from_secs(60),
            Duration::from_secs(300),
        );
        assert_eq!(wait, Duration::from_secs(300));
    }
}
