//! Subscription rules over method, path and status
//!
//! Patterns are written as `"<METHOD> <path>"`, e.g. `"POST /rooms/*"`. The
//! method may be `*` or left out entirely to match any verb.
//!
//! Path syntax:
//!
//! - `/rooms/abc123` matches exactly that path
//! - `/rooms/*` matches one segment in the wildcard position
//! - `/rooms/**` matches `/rooms` and everything below it
//! - `/**` matches every path
//!
//! Trailing slashes are ignored on both sides.

use crate::{Result, WebhookError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodRule {
    Any,
    /// Uppercase verb
    Exact(String),
}

impl MethodRule {
    pub fn matches(&self, method: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(m) => m.eq_ignore_ascii_case(method),
        }
    }
}

impl FromStr for MethodRule {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "*" {
            return Ok(Self::Any);
        }
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(WebhookError::InvalidPattern(format!("invalid method: {s:?}")));
        }
        Ok(Self::Exact(s.to_ascii_uppercase()))
    }
}

impl fmt::Display for MethodRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Exact(m) => f.write_str(m),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
}

/// Parsed path rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    segments: Vec<Segment>,
    prefix: bool,
}

impl PathPattern {
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the rule matches everything under its segments
    pub fn is_prefix(&self) -> bool {
        self.prefix
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = match path.split_once('?') {
            Some((p, _)) => p,
            None => path,
        };
        let parts = split_segments(path);

        if self.prefix {
            if parts.len() < self.segments.len() {
                return false;
            }
        } else if parts.len() != self.segments.len() {
            return false;
        }

        self.segments
            .iter()
            .zip(&parts)
            .all(|(segment, part)| match segment {
                Segment::Literal(lit) => lit == part,
                Segment::Wildcard => !part.is_empty(),
            })
    }
}

fn split_segments(path: &str) -> Vec<&str> {
    let trimmed = path.trim_end_matches('/');
    let trimmed = trimmed.strip_prefix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

impl FromStr for PathPattern {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self> {
        let source = s.trim();
        if !source.starts_with('/') {
            return Err(WebhookError::InvalidPattern(format!(
                "path must start with '/': {source:?}"
            )));
        }
        if source.contains(['?', '#']) {
            return Err(WebhookError::InvalidPattern(format!(
                "path must not carry a query or fragment: {source:?}"
            )));
        }

        let mut body = source.trim_end_matches('/');
        let prefix = if body == "/**" || body.ends_with("/**") {
            body = &body[..body.len() - 3];
            true
        } else {
            false
        };

        let mut segments = Vec::new();
        for part in split_segments(body) {
            let segment = match part {
                "" => {
                    return Err(WebhookError::InvalidPattern(format!(
                        "empty segment in {source:?}"
                    )));
                }
                "*" => Segment::Wildcard,
                "**" => {
                    return Err(WebhookError::InvalidPattern(format!(
                        "'**' is only allowed as the last segment: {source:?}"
                    )));
                }
                lit if lit.contains('*') => {
                    return Err(WebhookError::InvalidPattern(format!(
                        "'*' must be a whole segment: {source:?}"
                    )));
                }
                lit => Segment::Literal(lit.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            source: source.to_string(),
            segments,
            prefix,
        })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Method plus path rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pattern {
    method: MethodRule,
    path: PathPattern,
}

impl Pattern {
    pub fn new(method: MethodRule, path: PathPattern) -> Self {
        Self { method, path }
    }

    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }

    pub fn method(&self) -> &MethodRule {
        &self.method
    }

    pub fn path(&self) -> &PathPattern {
        &self.path
    }

    pub fn matches(&self, method: &str, path: &str) -> bool {
        self.method.matches(method) && self.path.matches(path)
    }
}

impl FromStr for Pattern {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(path), None, None) => Ok(Self::new(MethodRule::Any, path.parse()?)),
            (Some(method), Some(path), None) => Ok(Self::new(method.parse()?, path.parse()?)),
            _ => Err(WebhookError::InvalidPattern(format!(
                "expected \"<METHOD> <path>\", got {s:?}"
            ))),
        }
    }
}

impl TryFrom<String> for Pattern {
    type Error = WebhookError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Pattern> for String {
    fn from(p: Pattern) -> Self {
        p.to_string()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Inclusive range of status codes. A single code is a range of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRange {
    start: u16,
    end: u16,
}

impl StatusRange {
    pub fn new(start: u16, end: u16) -> Result<Self> {
        for code in [start, end] {
            if !(100..=599).contains(&code) {
                return Err(WebhookError::InvalidStatusFilter(format!(
                    "status code out of range: {code}"
                )));
            }
        }
        if start > end {
            return Err(WebhookError::InvalidStatusFilter(format!(
                "range start exceeds end: {start}-{end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn single(code: u16) -> Result<Self> {
        Self::new(code, code)
    }

    pub fn contains(&self, status: u16) -> bool {
        (self.start..=self.end).contains(&status)
    }
}

impl FromStr for StatusRange {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |v: &str| {
            v.trim().parse::<u16>().map_err(|_| {
                WebhookError::InvalidStatusFilter(format!("not a status code: {v:?}"))
            })
        };
        match s.split_once('-') {
            Some((start, end)) => Self::new(parse(start)?, parse(end)?),
            None => Self::single(parse(s)?),
        }
    }
}

impl fmt::Display for StatusRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Non-empty set of status codes and ranges.
///
/// A subscription without a filter matches every status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct StatusFilter(Vec<StatusRange>);

impl StatusFilter {
    pub fn new(ranges: Vec<StatusRange>) -> Result<Self> {
        if ranges.is_empty() {
            return Err(WebhookError::InvalidStatusFilter(
                "filter must list at least one code or range".to_string(),
            ));
        }
        Ok(Self(ranges))
    }

    /// Parse entries such as `["404", "500-599"]`
    pub fn parse<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ranges = entries
            .into_iter()
            .map(|e| e.as_ref().parse())
            .collect::<Result<Vec<StatusRange>>>()?;
        Self::new(ranges)
    }

    pub fn matches(&self, status: u16) -> bool {
        self.0.iter().any(|r| r.contains(status))
    }

    pub fn ranges(&self) -> &[StatusRange] {
        &self.0
    }
}

impl TryFrom<Vec<String>> for StatusFilter {
    type Error = WebhookError;

    fn try_from(entries: Vec<String>) -> Result<Self> {
        Self::parse(entries)
    }
}

impl From<StatusFilter> for Vec<String> {
    fn from(filter: StatusFilter) -> Self {
        filter.0.iter().map(ToString::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> PathPattern {
        s.parse().unwrap()
    }

    #[test]
    fn test_exact_path() {
        let p = path("/rooms/abc123");
        assert!(p.matches("/rooms/abc123"));
        assert!(p.matches("/rooms/abc123/"));
        assert!(!p.matches("/rooms/abc1234"));
        assert!(!p.matches("/rooms"));
    }

    #[test]
    fn test_wildcard_matches_one_segment() {
        let p = path("/rooms/*");
        assert!(p.matches("/rooms/123"));
        assert!(!p.matches("/rooms/123/keys"));
        assert!(!p.matches("/rooms"));
        assert!(!p.matches("/rooms/"));

        let p = path("/rooms/*/keys");
        assert!(p.matches("/rooms/7/keys"));
        assert!(!p.matches("/rooms/7/locks"));
    }

    #[test]
    fn test_prefix_stops_at_segment_boundary() {
        let p = path("/rooms/**");
        assert!(p.is_prefix());
        assert!(p.matches("/rooms"));
        assert!(p.matches("/rooms/1"));
        assert!(p.matches("/rooms/1/keys"));
        assert!(!p.matches("/roomsX"));
        assert!(!p.matches("/keys"));
    }

    #[test]
    fn test_match_all() {
        let p = path("/**");
        assert!(p.matches("/"));
        assert!(p.matches("/anything/at/all"));
    }

    #[test]
    fn test_root_pattern() {
        let p = path("/");
        assert!(p.matches("/"));
        assert!(!p.matches("/rooms"));
    }

    #[test]
    fn test_query_is_ignored() {
        assert!(path("/rooms/*").matches("/rooms/1?expand=keys"));
    }

    #[test]
    fn test_invalid_paths() {
        for bad in ["rooms", "/rooms//keys", "/rooms/ab*", "/**/keys", "/rooms?x=1", ""] {
            assert!(bad.parse::<PathPattern>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_method_rule() {
        let rule: MethodRule = "post".parse().unwrap();
        assert_eq!(rule, MethodRule::Exact("POST".to_string()));
        assert!(rule.matches("POST"));
        assert!(rule.matches("post"));
        assert!(!rule.matches("GET"));

        assert!("*".parse::<MethodRule>().unwrap().matches("DELETE"));
        assert!("P0ST".parse::<MethodRule>().is_err());
    }

    #[test]
    fn test_pattern_parse_and_display() {
        let p = Pattern::parse("post /rooms/*").unwrap();
        assert_eq!(p.to_string(), "POST /rooms/*");
        assert!(p.matches("POST", "/rooms/abc123"));
        assert!(!p.matches("GET", "/rooms/abc123"));

        let any = Pattern::parse("/keys/**").unwrap();
        assert_eq!(any.method(), &MethodRule::Any);
        assert!(any.matches("DELETE", "/keys/1"));

        assert!(Pattern::parse("POST /a extra").is_err());
        assert!(Pattern::parse("").is_err());
    }

    #[test]
    fn test_pattern_serde() {
        let p: Pattern = serde_json::from_str(r#""GET /rooms/**""#).unwrap();
        assert_eq!(serde_json::to_string(&p).unwrap(), r#""GET /rooms/**""#);

        assert!(serde_json::from_str::<Pattern>(r#""GET rooms""#).is_err());
    }

    #[test]
    fn test_status_filter() {
        let filter = StatusFilter::parse(["500-599"]).unwrap();
        assert!(!filter.matches(404));
        assert!(filter.matches(503));
        assert!(filter.matches(500));
        assert!(filter.matches(599));

        let filter = StatusFilter::parse(["404", "410"]).unwrap();
        assert!(filter.matches(404));
        assert!(!filter.matches(405));
    }

    #[test]
    fn test_invalid_status_filters() {
        assert!(StatusFilter::parse(Vec::<String>::new()).is_err());
        assert!(StatusFilter::parse(["599-500"]).is_err());
        assert!(StatusFilter::parse(["99"]).is_err());
        assert!(StatusFilter::parse(["600"]).is_err());
        assert!(StatusFilter::parse(["abc"]).is_err());
    }

    #[test]
    fn test_status_filter_serde() {
        let filter: StatusFilter = serde_json::from_str(r#"["404","500-599"]"#).unwrap();
        assert_eq!(
            serde_json::to_string(&filter).unwrap(),
            r#"["404","500-599"]"#
        );
        assert!(serde_json::from_str::<StatusFilter>("[]").is_err());
    }
}
