//! Parsing of the short duration strings used by rules (`30s`, `5m`, `1h`, `2d`).

/// Fallback evaluation window for rules without a usable duration.
pub const DEFAULT_DURATION_SECS: i64 = 5 * 60;

/// Fallback silence period once a rule has notified `times` times.
pub const DEFAULT_SILENCE_SECS: i64 = 60 * 60;

/// Parses `<digits><unit>` where unit is one of `s`, `m`, `h`, `d`.
///
/// Returns `None` for empty, zero-length or malformed input.
///
/// # Examples
///
/// ```
/// use pulsewatch_common::duration::parse_duration;
///
/// assert_eq!(parse_duration("5m"), Some(300));
/// assert_eq!(parse_duration("2d"), Some(172_800));
/// assert_eq!(parse_duration("5"), None);
/// assert_eq!(parse_duration("m"), None);
/// ```
pub fn parse_duration(s: &str) -> Option<i64> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return None;
    }
    let n: i64 = digits.parse().ok()?;
    let mult = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return None,
    };
    n.checked_mul(mult)
}

/// Like [`parse_duration`] but falls back to `default` on bad input.
pub fn parse_duration_or(s: &str, default: i64) -> i64 {
    parse_duration(s).unwrap_or(default)
}
