//! Opening-time text resolution.
//!
//! Listing sites write opening times in several notations: a promotional sentinel,
//! a "today" shorthand, month/day with optional hour and minute (Arabic digits or
//! Chinese numeral words), a few absolute layouts used by the JSON feed, and raw
//! Unix timestamps. Everything that fails to resolve is handed back unchanged.

use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use regex::Regex;

/// Markers that denote an always-open promotional slot instead of a schedule.
pub const SENTINEL_MARKERS: &[&str] = &["精品全天推荐"];

const TODAY_MARKER: &str = "今日";
const TODAY_MARKER_ASCII: &str = "today";

const NUMERAL_WORDS: &[(&str, u32)] = &[
    ("零", 0),
    ("一", 1),
    ("二", 2),
    ("三", 3),
    ("四", 4),
    ("五", 5),
    ("六", 6),
    ("七", 7),
    ("八", 8),
    ("九", 9),
    ("十", 10),
    ("十一", 11),
    ("十二", 12),
    ("十三", 13),
    ("十四", 14),
    ("十五", 15),
    ("十六", 16),
    ("十七", 17),
    ("十八", 18),
    ("十九", 19),
    ("二十", 20),
];

const FEED_DATETIME_LAYOUTS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];
const FEED_DATE_LAYOUT: &str = "%Y-%m-%d";
const FEED_YEARLESS_LAYOUTS: &[&str] = &["%m-%d %H:%M"];

/// Which notations a caller is willing to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeProfile {
    /// Markup and script-call listings.
    Listing,
    /// JSON feed entries; additionally accepts the fixed absolute layouts.
    Feed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeResolution {
    Timestamp(i64),
    Sentinel(String),
    Unparsed(String),
}

/// Resolves opening-time text against a clock captured once per run.
#[derive(Debug, Clone, Copy)]
pub struct TimeNormalizer {
    now: DateTime<Local>,
}

impl TimeNormalizer {
    pub fn new(now: DateTime<Local>) -> Self {
        Self { now }
    }

    pub fn now(&self) -> DateTime<Local> {
        self.now
    }

    pub fn resolve(&self, text: &str, profile: TimeProfile) -> TimeResolution {
        let trimmed = text.trim();

        if is_sentinel(trimmed) {
            return TimeResolution::Sentinel(text.to_string());
        }

        let resolved = self
            .resolve_today(trimmed)
            .or_else(|| self.resolve_month_day(trimmed))
            .or_else(|| match profile {
                TimeProfile::Feed => self.resolve_feed_layout(trimmed),
                TimeProfile::Listing => None,
            })
            .or_else(|| resolve_digits(trimmed));

        match resolved {
            Some(ts) => TimeResolution::Timestamp(ts),
            None => TimeResolution::Unparsed(text.to_string()),
        }
    }

    fn resolve_today(&self, text: &str) -> Option<i64> {
        let rest = if text.contains(TODAY_MARKER) {
            text.replacen(TODAY_MARKER, "", 1)
        } else {
            let prefix = text.get(..TODAY_MARKER_ASCII.len())?;
            if !prefix.eq_ignore_ascii_case(TODAY_MARKER_ASCII) {
                return None;
            }
            text[TODAY_MARKER_ASCII.len()..].to_string()
        };
        let time = NaiveTime::parse_from_str(rest.trim(), "%H:%M").ok()?;
        local_timestamp(self.now.date_naive().and_time(time))
    }

    fn resolve_month_day(&self, text: &str) -> Option<i64> {
        let caps = month_day_re().captures(text)?;
        let month = numeral_value(caps.get(1)?.as_str())?;
        let day = numeral_value(caps.get(2)?.as_str())?;
        let hour = match caps.get(3) {
            Some(m) => numeral_value(m.as_str())?,
            None => 0,
        };
        let minute = match caps.get(4).map(|m| m.as_str()).filter(|s| !s.is_empty()) {
            Some(m) => numeral_value(m)?,
            None => 0,
        };
        let naive =
            NaiveDate::from_ymd_opt(self.now.year(), month, day)?.and_hms_opt(hour, minute, 0)?;
        local_timestamp(naive)
    }

    fn resolve_feed_layout(&self, text: &str) -> Option<i64> {
        if let Some(ts) = FEED_DATETIME_LAYOUTS
            .iter()
            .find_map(|layout| NaiveDateTime::parse_from_str(text, layout).ok())
            .and_then(local_timestamp)
        {
            return Some(ts);
        }
        if let Ok(date) = NaiveDate::parse_from_str(text, FEED_DATE_LAYOUT) {
            return local_timestamp(date.and_time(NaiveTime::MIN));
        }
        let with_year = format!("{}-{}", self.now.year(), text);
        FEED_YEARLESS_LAYOUTS
            .iter()
            .find_map(|layout| {
                NaiveDateTime::parse_from_str(&with_year, &format!("%Y-{layout}")).ok()
            })
            .and_then(local_timestamp)
    }
}

pub fn is_sentinel(text: &str) -> bool {
    SENTINEL_MARKERS.iter().any(|marker| text.contains(marker))
}

fn month_day_re() -> &'static Regex {
    static MONTH_DAY_RE: OnceLock<Regex> = OnceLock::new();
    MONTH_DAY_RE.get_or_init(|| {
        Regex::new(
            r"^([0-9零一二三四五六七八九十]+)\s*月\s*([0-9零一二三四五六七八九十]+)\s*[日号]?(?:[/／\s]*([0-9零一二三四五六七八九十]+)\s*(?:[:：点时]\s*([0-9零一二三四五六七八九十]*))?)?",
        )
        .expect("valid month/day regex")
    })
}

/// Arabic digits, or an exact entry of the numeral-word table.
fn numeral_value(token: &str) -> Option<u32> {
    if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
        return token.parse().ok();
    }
    NUMERAL_WORDS
        .iter()
        .find(|(word, _)| *word == token)
        .map(|(_, value)| *value)
}

/// Optionally signed ASCII digits; a sign lets non-positive values reach admission.
fn resolve_digits(text: &str) -> Option<i64> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn local_timestamp(naive: NaiveDateTime) -> Option<i64> {
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.timestamp()),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.timestamp()),
        LocalResult::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> TimeNormalizer {
        TimeNormalizer::new(Local.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).single().unwrap())
    }

    fn local_ts(y: i32, m: u32, d: u32, h: u32, min: u32) -> i64 {
        Local
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .unwrap()
            .timestamp()
    }

    #[test]
    fn sentinel_text_is_returned_verbatim() {
        let n = normalizer();
        assert_eq!(
            n.resolve("精品全天推荐", TimeProfile::Listing),
            TimeResolution::Sentinel("精品全天推荐".to_string())
        );
        // a sentinel wins even when the text also looks like a date
        assert_eq!(
            n.resolve("10月10日精品全天推荐", TimeProfile::Feed),
            TimeResolution::Sentinel("10月10日精品全天推荐".to_string())
        );
    }

    #[test]
    fn today_shorthand_uses_current_date() {
        let n = normalizer();
        let expected = TimeResolution::Timestamp(local_ts(2026, 10, 19, 14, 0));
        assert_eq!(n.resolve("今日14:00", TimeProfile::Listing), expected);
        assert_eq!(n.resolve("今日 14:00", TimeProfile::Listing), expected);
        assert_eq!(n.resolve("Today 14:00", TimeProfile::Listing), expected);
    }

    #[test]
    fn today_shorthand_without_clock_time_is_unparsed() {
        let n = normalizer();
        assert_eq!(
            n.resolve("今日开放", TimeProfile::Listing),
            TimeResolution::Unparsed("今日开放".to_string())
        );
    }

    #[test]
    fn arabic_and_numeral_word_month_day_resolve_identically() {
        let n = normalizer();
        let expected = TimeResolution::Timestamp(local_ts(2026, 10, 10, 13, 0));
        assert_eq!(n.resolve("10月10日/13:00", TimeProfile::Listing), expected);
        assert_eq!(n.resolve("十月十日/十三:00", TimeProfile::Listing), expected);
        assert_eq!(n.resolve("10月10日 13：00", TimeProfile::Listing), expected);
    }

    #[test]
    fn hour_marker_with_trailing_text() {
        let n = normalizer();
        assert_eq!(
            n.resolve("10月9日/9点开放", TimeProfile::Listing),
            TimeResolution::Timestamp(local_ts(2026, 10, 9, 9, 0))
        );
        assert_eq!(
            n.resolve("10月9日/十九点30分", TimeProfile::Listing),
            TimeResolution::Timestamp(local_ts(2026, 10, 9, 19, 30))
        );
    }

    #[test]
    fn missing_hour_and_minute_default_to_midnight() {
        let n = normalizer();
        assert_eq!(
            n.resolve("10月20日", TimeProfile::Listing),
            TimeResolution::Timestamp(local_ts(2026, 10, 20, 0, 0))
        );
    }

    #[test]
    fn impossible_dates_fall_back_to_original_text() {
        let n = normalizer();
        for text in ["13月10日/13:00", "2月30日", "10月10日/25:00"] {
            assert_eq!(
                n.resolve(text, TimeProfile::Listing),
                TimeResolution::Unparsed(text.to_string()),
                "{text}"
            );
        }
    }

    #[test]
    fn numeral_words_outside_the_table_are_unparsed() {
        let n = normalizer();
        assert_eq!(
            n.resolve("十月二十五日", TimeProfile::Listing),
            TimeResolution::Unparsed("十月二十五日".to_string())
        );
    }

    #[test]
    fn absolute_layouts_only_apply_to_feed_profile() {
        let n = normalizer();
        assert_eq!(
            n.resolve("2026-10-10 13:00:00", TimeProfile::Listing),
            TimeResolution::Unparsed("2026-10-10 13:00:00".to_string())
        );
        assert_eq!(
            n.resolve("2026-10-10 13:00:00", TimeProfile::Feed),
            TimeResolution::Timestamp(local_ts(2026, 10, 10, 13, 0))
        );
        assert_eq!(
            n.resolve("2026-10-10 13:05", TimeProfile::Feed),
            TimeResolution::Timestamp(local_ts(2026, 10, 10, 13, 5))
        );
        assert_eq!(
            n.resolve("2026-10-10", TimeProfile::Feed),
            TimeResolution::Timestamp(local_ts(2026, 10, 10, 0, 0))
        );
        assert_eq!(
            n.resolve("10-11 08:30", TimeProfile::Feed),
            TimeResolution::Timestamp(local_ts(2026, 10, 11, 8, 30))
        );
    }

    #[test]
    fn digit_strings_are_taken_as_timestamps() {
        let n = normalizer();
        assert_eq!(
            n.resolve("1760000000", TimeProfile::Listing),
            TimeResolution::Timestamp(1_760_000_000)
        );
        assert_eq!(n.resolve("0", TimeProfile::Feed), TimeResolution::Timestamp(0));
        assert_eq!(n.resolve("-5", TimeProfile::Feed), TimeResolution::Timestamp(-5));
        assert_eq!(
            n.resolve("-", TimeProfile::Feed),
            TimeResolution::Unparsed("-".to_string())
        );
    }

    #[test]
    fn unrecognized_text_is_unparsed() {
        let n = normalizer();
        assert_eq!(
            n.resolve("敬请期待", TimeProfile::Feed),
            TimeResolution::Unparsed("敬请期待".to_string())
        );
        assert_eq!(n.resolve("", TimeProfile::Feed), TimeResolution::Unparsed(String::new()));
    }
}
