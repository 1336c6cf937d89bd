use async_trait::async_trait;
use kaiqu_core::{AdmissionPolicy, RawListing};
use regex::Regex;
use tracing::debug;

use crate::{AdapterError, FetchedPage, PayloadShape, SourceAdapter};

pub const DEFAULT_CALL_NAME: &str = "o4";
const ARG_COUNT: usize = 7;

pub(crate) fn default_call_name() -> String {
    DEFAULT_CALL_NAME.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Outside,
    InSingle,
    InDouble,
}

/// Splits a JavaScript argument list on commas that sit outside quotes.
///
/// Quote characters are kept while scanning and stripped from both ends of each
/// finished argument, so `"a,b", 'c'` yields `a,b` and `c`.
#[derive(Debug, Clone)]
pub struct QuoteScanner {
    state: ScanState,
    current: String,
    args: Vec<String>,
}

impl Default for QuoteScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteScanner {
    pub fn new() -> Self {
        Self {
            state: ScanState::Outside,
            current: String::new(),
            args: Vec::new(),
        }
    }

    pub fn split(input: &str) -> Vec<String> {
        let mut scanner = Self::new();
        for ch in input.chars() {
            scanner.feed(ch);
        }
        scanner.finish()
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn feed(&mut self, ch: char) {
        match (self.state, ch) {
            (ScanState::Outside, ',') => {
                self.finish_arg();
                return;
            }
            (ScanState::Outside, '\'') => self.state = ScanState::InSingle,
            (ScanState::Outside, '"') => self.state = ScanState::InDouble,
            (ScanState::InSingle, '\'') | (ScanState::InDouble, '"') => {
                self.state = ScanState::Outside
            }
            _ => {}
        }
        self.current.push(ch);
    }

    /// An unterminated quote still yields its text as the last argument.
    pub fn finish(mut self) -> Vec<String> {
        if !self.current.is_empty() {
            self.finish_arg();
        }
        self.args
    }

    fn finish_arg(&mut self) {
        let raw = std::mem::take(&mut self.current);
        self.args
            .push(raw.trim().trim_matches(|c| c == '"' || c == '\'').to_string());
    }
}

/// Listings embedded as `o4("name","url","type","time","spend","desc","features");`
/// calls in page script.
#[derive(Debug, Clone)]
pub struct ScriptCallAdapter {
    source_id: String,
    call_pattern: Regex,
    policy: AdmissionPolicy,
}

impl ScriptCallAdapter {
    pub fn new(source_id: impl Into<String>, call_name: &str) -> Result<Self, AdapterError> {
        let call_pattern = Regex::new(&format!(r"\b{}\s*\(([^)]*)\)", regex::escape(call_name)))?;
        Ok(Self {
            source_id: source_id.into(),
            call_pattern,
            policy: AdmissionPolicy::script_call(),
        })
    }
}

#[async_trait]
impl SourceAdapter for ScriptCallAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn shape(&self) -> PayloadShape {
        PayloadShape::ScriptCall
    }

    fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    fn extract(&self, page: &FetchedPage) -> Result<Vec<RawListing>, AdapterError> {
        let mut out = Vec::new();
        for caps in self.call_pattern.captures_iter(&page.body) {
            let args = QuoteScanner::split(&caps[1]);
            let count = args.len();
            let Ok([name, url, category, time_text, min_spend, description, features]) =
                <[String; ARG_COUNT]>::try_from(args)
            else {
                debug!(
                    source_id = %self.source_id,
                    count,
                    "skipping call with wrong argument count"
                );
                continue;
            };
            out.push(RawListing {
                name,
                url,
                category,
                time_text,
                min_spend,
                description,
                features,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commas_inside_quotes_are_literal() {
        assert_eq!(
            QuoteScanner::split(r#""a,b", 'c,d' ,"e""#),
            vec!["a,b".to_string(), "c,d".to_string(), "e".to_string()]
        );
    }

    #[test]
    fn other_quote_kind_does_not_close_a_quote() {
        assert_eq!(
            QuoteScanner::split(r#""it's, fine",'say "hi", ok'"#),
            vec!["it's, fine".to_string(), r#"say "hi", ok"#.to_string()]
        );
    }

    #[test]
    fn scanner_tracks_state_per_character() {
        let mut scanner = QuoteScanner::new();
        assert_eq!(scanner.state(), ScanState::Outside);
        scanner.feed('\'');
        assert_eq!(scanner.state(), ScanState::InSingle);
        scanner.feed('"');
        assert_eq!(scanner.state(), ScanState::InSingle);
        scanner.feed('\'');
        assert_eq!(scanner.state(), ScanState::Outside);
        scanner.feed('"');
        assert_eq!(scanner.state(), ScanState::InDouble);
        assert_eq!(scanner.finish(), vec!["".to_string()]);
    }

    #[test]
    fn trailing_comma_does_not_add_an_empty_argument() {
        assert_eq!(QuoteScanner::split("\"a\",\"b\","), vec!["a".to_string(), "b".to_string()]);
        assert!(QuoteScanner::split("").is_empty());
    }

    #[test]
    fn extracts_only_calls_with_seven_arguments() {
        let adapter = ScriptCallAdapter::new("jjj", DEFAULT_CALL_NAME).unwrap();
        let page = FetchedPage::new(
            "https://jjj.example/",
            r#"<script>
                o4("龙城霸业","http://lcby.example/?ad=1","1.76复古","10月21日/19:00","30元","散人, 打金","高爆率");
                o4("残缺","http://short.example","类型","10月21日/19:00","1","2");
                foo4("不是","http://no.example","a","b","c","d","e");
                o4 ('单引号','http://single.example','合击','今日20:00','无','描述','特色');
            </script>"#,
        );
        let rows = adapter.extract(&page).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "龙城霸业");
        assert_eq!(rows[0].url, "http://lcby.example/?ad=1");
        assert_eq!(rows[0].description, "散人, 打金");
        assert_eq!(rows[1].url, "http://single.example");
        assert_eq!(rows[1].time_text, "今日20:00");
    }
}
