use std::time::Duration;

/// Parses a human-readable duration string into a [`Duration`].
///
/// Accepts any sequence of `<digits><unit>` groups where the unit is one
/// of `ms`, `s`, `m`, `h` or `d`, e.g. `"30s"`, `"1h30m"`, `"250ms"`.
/// Configuration values such as the transaction timeout use this format.
///
/// Returns `None` for empty input, unknown units, missing digits or
/// arithmetic overflow.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use depot_utils::time::parse_duration;
///
/// assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
/// ```
pub fn parse_duration(input: &str) -> Option<Duration> {
    if input.is_empty() {
        return None;
    }

    let mut total_ms: u64 = 0;
    let mut rest = input;

    while !rest.is_empty() {
        let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
        if digits_end == 0 {
            return None;
        }
        let number: u64 = rest[..digits_end].parse().ok()?;
        rest = &rest[digits_end..];

        // checked before the bare units so "m" cannot swallow "ms"
        let (multiplier, len) = if rest.starts_with("ms") {
            (1, 2)
        } else {
            match rest.as_bytes()[0] {
                b's' => (1_000, 1),
                b'm' => (60 * 1_000, 1),
                b'h' => (60 * 60 * 1_000, 1),
                b'd' => (24 * 60 * 60 * 1_000, 1),
                _ => return None,
            }
        };
        rest = &rest[len..];

        total_ms = total_ms.checked_add(number.checked_mul(multiplier)?)?;
    }

    Some(Duration::from_millis(total_ms))
}
