//! Parsing of ISO-8601 durations (`PT30M`, `P1DT12H`, `PT0.5S`).
//!
//! Only exact units are accepted: weeks, days, hours, minutes and seconds.
//! Years and months have no fixed length and are rejected.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

static ISO_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^P(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d{1,9})?)S)?)?$",
    )
    .expect("ISO-8601 duration pattern is valid")
});

/// Parses an ISO-8601 duration. Returns `None` for malformed or empty input.
pub fn parse_iso_duration(text: &str) -> Option<Duration> {
    let text = text.trim().to_ascii_uppercase();
    let caps = ISO_DURATION.captures(&text)?;

    // "P" and "PT" match the pattern but carry no component.
    if caps.iter().skip(1).all(|c| c.is_none()) {
        return None;
    }

    let unit = |index: usize, seconds: u64| -> Option<u64> {
        match caps.get(index) {
            Some(m) => m.as_str().parse::<u64>().ok()?.checked_mul(seconds),
            None => Some(0),
        }
    };

    let whole = unit(1, 7 * 86_400)?
        .checked_add(unit(2, 86_400)?)?
        .checked_add(unit(3, 3_600)?)?
        .checked_add(unit(4, 60)?)?;

    let seconds = match caps.get(5) {
        Some(m) => parse_seconds(m.as_str())?,
        None => Duration::ZERO,
    };

    Duration::from_secs(whole).checked_add(seconds)
}

fn parse_seconds(text: &str) -> Option<Duration> {
    let (secs, fraction) = match text.split_once('.') {
        Some((secs, fraction)) => (secs, fraction),
        None => (text, ""),
    };
    let secs = secs.parse::<u64>().ok()?;
    let nanos = if fraction.is_empty() {
        0
    } else {
        // Right-pad to nanosecond precision: "5" -> 500_000_000.
        format!("{fraction:0<9}").parse::<u32>().ok()?
    };
    Some(Duration::new(secs, nanos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_common_forms() {
        assert_eq!(parse_iso_duration("PT30M"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_iso_duration("PT5S"), Some(Duration::from_secs(5)));
        assert_eq!(
            parse_iso_duration("P1DT12H"),
            Some(Duration::from_secs(36 * 3600))
        );
        assert_eq!(parse_iso_duration("P2W"), Some(Duration::from_secs(14 * 86_400)));
        assert_eq!(parse_iso_duration("pt1h"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn parses_fractional_seconds() {
        assert_eq!(parse_iso_duration("PT0.5S"), Some(Duration::from_millis(500)));
        assert_eq!(
            parse_iso_duration("PT1M1.25S"),
            Some(Duration::from_millis(61_250))
        );
    }

    #[test]
    fn rejects_malformed_and_calendar_units() {
        for text in ["", "P", "PT", "30M", "P1Y", "P1M", "PT-5S", "PT5", "P1H", "bogus"] {
            assert_eq!(parse_iso_duration(text), None, "{text:?} should be rejected");
        }
    }

    proptest! {
        /// Components add up independently of how they are spelled.
        #[test]
        fn components_sum(d in 0u64..400, h in 0u64..100, m in 0u64..100, s in 0u64..100) {
            let text = format!("P{d}DT{h}H{m}M{s}S");
            let expected = Duration::from_secs(d * 86_400 + h * 3_600 + m * 60 + s);
            prop_assert_eq!(parse_iso_duration(&text), Some(expected));
        }
    }
}
