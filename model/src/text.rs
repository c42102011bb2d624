//! Text helpers shared by the bot, its prompts and its keyboards.
//!
//! All lengths in this module are measured in characters, not bytes: user input is mostly
//! Cyrillic, and Telegram limits are expressed in characters.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// The number of characters in `text`.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// The first `n` characters of `text`.
pub fn prefix(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

/// The first `n` characters of `text`, followed by `...` if anything was cut.
pub fn ellipsize(text: &str, n: usize) -> String {
    let head = prefix(text, n);
    if head.len() < text.len() {
        format!("{head}...")
    } else {
        head.into()
    }
}

/// Shorten `text` to at most `max` characters, including a trailing `...` if it was cut.
pub fn truncate(text: &str, max: usize) -> String {
    if char_len(text) <= max {
        text.into()
    } else {
        format!("{}...", prefix(text, max.saturating_sub(3)))
    }
}

/// Normalize user text before interpolating it into an LLM prompt.
///
/// Quotes and backticks become `'` so they cannot close a quoted section of the prompt, and all
/// whitespace runs (including newlines) collapse to a single space.
pub fn sanitize_prompt(text: &str, max: usize) -> String {
    let text = text.trim().replace(['"', '`'], "'");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    ellipsize(&text, max)
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Split a long text into chunks of at most `size` characters.
///
/// Chunks break between paragraphs where possible. A single paragraph longer than `size` is split
/// at arbitrary character boundaries.
pub fn split_into_chunks(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    if char_len(text) <= size {
        return vec![text.into()];
    }

    fn flush(current: &mut String, chunks: &mut Vec<String>) {
        let chunk = current.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.into());
        }
        current.clear();
    }

    let mut chunks = vec![];
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        if char_len(&current) + char_len(paragraph) + 2 <= size {
            current.push_str(paragraph);
            current.push_str("\n\n");
            continue;
        }
        flush(&mut current, &mut chunks);

        let mut rest = paragraph;
        while char_len(rest) > size {
            let head = prefix(rest, size);
            current.push_str(head);
            flush(&mut current, &mut chunks);
            rest = &rest[head.len()..];
        }
        current.push_str(rest);
        current.push_str("\n\n");
    }
    flush(&mut current, &mut chunks);

    chunks
}

/// Render a number of minutes as `"X мин"`, `"X ч"` or `"X ч Y мин"`.
pub fn format_duration(minutes: u32) -> String {
    if minutes < 60 {
        return format!("{minutes} мин");
    }
    let hours = minutes / 60;
    match minutes % 60 {
        0 => format!("{hours} ч"),
        rem => format!("{hours} ч {rem} мин"),
    }
}

/// Parse a Russian duration like `"1.5 часа"` or `"2 ч 30 мин"` into minutes.
///
/// Returns [`None`] if no positive duration is found.
pub fn parse_duration(text: &str) -> Option<u32> {
    static DURATION: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(\d+(?:[.,]\d+)?)\s*(ч(?:ас(?:а|ов)?)?|мин(?:ут[аы]?)?)\b").unwrap()
    });

    let text = text.to_lowercase();
    let minutes: f64 = DURATION
        .captures_iter(&text)
        .filter_map(|cap| {
            let value: f64 = cap[1].replace(',', ".").parse().ok()?;
            Some(if cap[2].starts_with('ч') { value * 60. } else { value })
        })
        .sum();
    if minutes >= 1. {
        Some(minutes as u32)
    } else {
        None
    }
}

/// Render a byte count with a binary unit and one decimal place, e.g. `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024. && unit < UNITS.len() - 1 {
        value /= 1024.;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Describe how long ago `then` was, in Russian.
pub fn format_time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now - then;
    let days = diff.num_days();
    let seconds = diff.num_seconds() - days * 86400;

    if days > 365 {
        let years = days / 365;
        return if years == 1 {
            "1 год назад".into()
        } else {
            format!("{years} лет назад")
        };
    }
    if days > 30 {
        let months = days / 30;
        return if months == 1 {
            "1 месяц назад".into()
        } else {
            format!("{months} месяцев назад")
        };
    }
    if days > 0 {
        return if days == 1 {
            "вчера".into()
        } else if days < 7 {
            format!("{days} дня назад")
        } else {
            match days / 7 {
                1 => "1 неделю назад".into(),
                weeks => format!("{weeks} недель назад"),
            }
        };
    }
    if seconds > 3600 {
        return match seconds / 3600 {
            1 => "1 час назад".into(),
            hours => format!("{hours} часов назад"),
        };
    }
    if seconds > 60 {
        return match seconds / 60 {
            1 => "1 минуту назад".into(),
            minutes => format!("{minutes} минут назад"),
        };
    }
    "только что".into()
}

/// A window into a paginated list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    /// The current page, starting from 1.
    pub page: usize,
    pub total_pages: usize,
    /// Index of the first item on this page.
    pub start: usize,
    /// Index one past the last item on this page.
    pub end: usize,
    pub has_prev: bool,
    pub has_next: bool,
}

impl Pagination {
    /// Compute page `page` (1-based, clamped into range) of a list of `total` items.
    pub fn new(total: usize, page: usize, per_page: usize) -> Self {
        let per_page = per_page.max(1);
        let total_pages = total.div_ceil(per_page).max(1);
        let page = page.clamp(1, total_pages);
        let start = (page - 1) * per_page;
        Self {
            page,
            total_pages,
            start,
            end: (start + per_page).min(total),
            has_prev: page > 1,
            has_next: page < total_pages,
        }
    }

    /// A `"page/total"` label.
    pub fn label(&self) -> String {
        format!("{}/{}", self.page, self.total_pages)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_sanitize_prompt() {
        assert_eq!(
            sanitize_prompt("  курица,\n\t\"лук\"   `рис`  ", 100),
            "курица, 'лук' 'рис'"
        );
        assert_eq!(sanitize_prompt("абвгдеж", 3), "абв...");
        assert_eq!(sanitize_prompt("", 10), "");
    }

    #[test]
    fn test_truncation() {
        assert_eq!(prefix("привет", 3), "при");
        assert_eq!(prefix("hi", 3), "hi");
        assert_eq!(ellipsize("привет", 3), "при...");
        assert_eq!(ellipsize("при", 3), "при");
        assert_eq!(truncate("привет мир", 6), "при...");
        assert_eq!(truncate("привет", 6), "привет");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a < b && c > d"), "a &lt; b &amp;&amp; c &gt; d");
    }

    #[test]
    fn test_split_into_chunks() {
        assert_eq!(split_into_chunks("short", 10), vec!["short"]);

        let text = "aaaa\n\nbbbb\n\ncccc";
        assert_eq!(split_into_chunks(text, 12), vec!["aaaa\n\nbbbb", "cccc"]);
        assert_eq!(split_into_chunks(text, 10), vec!["aaaa", "bbbb", "cccc"]);

        let long = "x".repeat(25);
        let chunks = split_into_chunks(&long, 10);
        assert!(chunks.iter().all(|chunk| char_len(chunk) <= 10));
        assert_eq!(chunks.concat(), long);

        assert_eq!(split_into_chunks("ab\n\ncd", 1), vec!["a", "b", "c", "d"]);
        assert_eq!(split_into_chunks("abc", 0), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_durations() {
        assert_eq!(format_duration(45), "45 мин");
        assert_eq!(format_duration(120), "2 ч");
        assert_eq!(format_duration(150), "2 ч 30 мин");

        assert_eq!(parse_duration("30 минут"), Some(30));
        assert_eq!(parse_duration("1.5 часа"), Some(90));
        assert_eq!(parse_duration("2 ч 30 мин"), Some(150));
        assert_eq!(parse_duration("недолго"), None);
        assert_eq!(parse_duration("⏱ Время: 40 минут | 👥 Порции: 4 человека"), Some(40));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512.0 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_time_ago() {
        let now = Utc::now();
        assert_eq!(format_time_ago(now, now), "только что");
        assert_eq!(format_time_ago(now - Duration::minutes(5), now), "5 минут назад");
        assert_eq!(format_time_ago(now - Duration::hours(2), now), "2 часов назад");
        assert_eq!(format_time_ago(now - Duration::days(1), now), "вчера");
        assert_eq!(format_time_ago(now - Duration::days(3), now), "3 дня назад");
        assert_eq!(format_time_ago(now - Duration::days(14), now), "2 недель назад");
        assert_eq!(format_time_ago(now - Duration::days(40), now), "1 месяц назад");
        assert_eq!(format_time_ago(now - Duration::days(800), now), "2 лет назад");
    }

    #[test]
    fn test_pagination() {
        let page = Pagination::new(12, 3, 5);
        assert_eq!((page.start, page.end), (10, 12));
        assert!(page.has_prev && !page.has_next);
        assert_eq!(page.label(), "3/3");

        let empty = Pagination::new(0, 7, 5);
        assert_eq!((empty.page, empty.total_pages, empty.start, empty.end), (1, 1, 0, 0));
    }
}
