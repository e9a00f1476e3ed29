//! Display helpers shared by the runner footer and the log-file stats scanner.
//!
//! The footer's `执行时长` field is written by [`format_duration_ms`] and read
//! back by [`parse_duration_ms`]; both sides must stay in sync.

/// Render a millisecond duration in a compact humanized form.
///
/// `850` → `"850ms"`, `2345` → `"2.345s"`, `245678` → `"4m05.678s"`,
/// `3_725_000` → `"1h02m05.000s"`.
pub fn format_duration_ms(ms: i64) -> String {
    if ms < 0 {
        return format!("-{}", format_duration_ms(-ms));
    }
    if ms < 1_000 {
        return format!("{}ms", ms);
    }
    if ms < 60_000 {
        return format!("{:.3}s", ms as f64 / 1000.0);
    }
    if ms < 3_600_000 {
        let minutes = ms / 60_000;
        let rem = ms % 60_000;
        return format!("{}m{:06.3}s", minutes, rem as f64 / 1000.0);
    }
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let rem = ms % 60_000;
    format!("{}h{:02}m{:06.3}s", hours, minutes, rem as f64 / 1000.0)
}

/// Parse a duration written by [`format_duration_ms`] back into milliseconds.
///
/// Accepts `"850ms"`, `"2.345s"`, `"4m05.678s"`, `"1h02m05.000s"` and any
/// whitespace-free combination of `h`/`m`/`s` segments.
pub fn parse_duration_ms(input: &str) -> Option<i64> {
    let s: String = input.trim().chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return None;
    }
    if let Some(stripped) = s.strip_prefix('-') {
        return parse_duration_ms(stripped).map(|v| -v);
    }
    if let Some(num) = s.strip_suffix("ms") {
        return num.parse::<f64>().ok().map(|v| v.round() as i64);
    }

    let mut rest = s.as_str();
    let mut total = 0f64;

    if let Some(idx) = rest.find('h') {
        total += rest[..idx].parse::<f64>().ok()? * 3_600_000.0;
        rest = &rest[idx + 1..];
    }
    if let Some(idx) = rest.find('m') {
        total += rest[..idx].parse::<f64>().ok()? * 60_000.0;
        rest = &rest[idx + 1..];
    }
    if let Some(num) = rest.strip_suffix('s') {
        if !num.is_empty() {
            total += num.parse::<f64>().ok()? * 1000.0;
        }
    } else if !rest.is_empty() {
        return None;
    }

    Some(total.round() as i64)
}

/// Render an argument vector the way the log header and footer expect it:
/// a space-joined list in brackets, e.g. `[build --release]`.
pub fn format_args_list(args: &[String]) -> String {
    format!("[{}]", args.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_small_durations() {
        assert_eq!(format_duration_ms(0), "0ms");
        assert_eq!(format_duration_ms(850), "850ms");
        assert_eq!(format_duration_ms(2345), "2.345s");
    }

    #[test]
    fn test_format_minutes_and_hours() {
        assert_eq!(format_duration_ms(245_678), "4m05.678s");
        assert_eq!(format_duration_ms(3_725_000), "1h02m05.000s");
    }

    #[test]
    fn test_parse_roundtrip() {
        for ms in [0, 1, 850, 1000, 2345, 59_999, 60_000, 245_678, 3_725_000] {
            let rendered = format_duration_ms(ms);
            assert_eq!(parse_duration_ms(&rendered), Some(ms), "failed for {rendered}");
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_duration_ms(""), None);
        assert_eq!(parse_duration_ms("fast"), None);
        assert_eq!(parse_duration_ms("12x"), None);
    }

    #[test]
    fn test_parse_tolerates_spaces() {
        assert_eq!(parse_duration_ms(" 2.345s "), Some(2345));
        assert_eq!(parse_duration_ms("4m 05.678s"), Some(245_678));
    }

    #[test]
    fn test_args_list() {
        assert_eq!(format_args_list(&[]), "[]");
        assert_eq!(
            format_args_list(&["a".to_string(), "b c".to_string()]),
            "[a b c]"
        );
    }
}
