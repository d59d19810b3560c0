use std::ops::RangeBounds;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub trait WithinExt {
    fn within(&self, range: impl RangeBounds<Self>) -> bool;
}

impl<T: PartialOrd<T>> WithinExt for T {
    fn within(&self, range: impl RangeBounds<Self>) -> bool {
        range.contains(self)
    }
}

/// Parses a list of pin numbers separated by `,`, `;` or spaces.
pub fn parse_pin_list(pin_str: &str) -> eyre::Result<Vec<usize>> {
    Ok(pin_str
        .split([',', ' ', ';'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse())
        .collect::<Result<Vec<_>, _>>()?)
}

/// Current local time as RFC 3339, falling back to UTC when the offset is unknown.
pub fn timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(&Rfc3339).unwrap_or_else(|_| now.unix_timestamp().to_string())
}

/// Undoes the `\n` and `\\` escapes of the control socket's line protocol.
pub fn unescape(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_ranges() {
        assert!(3.within(1..=4));
        assert!(!5.within(1..=4));
        assert!(!0.within(1..5));
    }

    #[test]
    fn pin_lists() {
        assert_eq!(parse_pin_list("5, 6;13 19").unwrap(), vec![5, 6, 13, 19]);
        assert_eq!(parse_pin_list("  ").unwrap(), Vec::<usize>::new());
        assert!(parse_pin_list("5,x").is_err());
    }

    #[test]
    fn timestamps_are_rfc3339() {
        let stamp = timestamp();
        // 2024-05-01T12:00:00Z at the shortest
        assert!(stamp.len() >= 20, "{stamp}");
        assert_eq!(&stamp[4..5], "-");
        assert_eq!(&stamp[10..11], "T");
    }

    #[test]
    fn unescapes_line_breaks() {
        assert_eq!(unescape(r"Hello\nWorld"), "Hello\nWorld");
        assert_eq!(unescape(r"a\\nb"), "a\\nb");
        assert_eq!(unescape(r"tab\t"), "tab\\t");
        assert_eq!(unescape("end\\"), "end\\");
    }
}
