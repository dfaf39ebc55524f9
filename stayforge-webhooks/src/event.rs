//! Captured request/response events

use crate::CaptureError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::time::Duration;
use uuid::Uuid;

/// Ordered header list.
///
/// Names keep their original casing; lookups ignore case. A name may
/// appear more than once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList(Vec<(String, String)>);

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy without the entries for which `drop` returns true
    pub fn without(&self, drop: impl Fn(&str) -> bool) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(n, _)| !drop(n))
                .cloned()
                .collect(),
        )
    }

    /// Capture an `http::HeaderMap`. Values that aren't visible ASCII are
    /// decoded lossily.
    pub fn from_http(map: &http::HeaderMap) -> Self {
        Self(
            map.iter()
                .map(|(name, value)| {
                    let value = match value.to_str() {
                        Ok(v) => v.to_string(),
                        Err(_) => String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    };
                    (name.as_str().to_string(), value)
                })
                .collect(),
        )
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderList {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        )
    }
}

/// Serializes as an object keyed by the first-seen casing of each name.
/// Repeated names become arrays.
impl Serialize for HeaderList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
        for (name, value) in &self.0 {
            match groups
                .iter_mut()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
            {
                Some((_, values)) => values.push(value),
                None => groups.push((name, vec![value])),
            }
        }

        let mut map = serializer.serialize_map(Some(groups.len()))?;
        for (name, values) in groups {
            if let [single] = values.as_slice() {
                map.serialize_entry(name, single)?;
            } else {
                map.serialize_entry(name, &values)?;
            }
        }
        map.end()
    }
}

/// One intercepted request/response pair.
///
/// Built once by the interceptor and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct Event {
    id: Uuid,
    method: String,
    path: String,
    status: u16,
    request_headers: HeaderList,
    response_headers: HeaderList,
    response_body: Bytes,
    observed_at: DateTime<Utc>,
    elapsed: Duration,
}

impl Event {
    pub fn builder(method: impl Into<String>, path: impl Into<String>) -> EventBuilder {
        EventBuilder::new(method, path)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Uppercase HTTP verb
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path without the query string
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn request_headers(&self) -> &HeaderList {
        &self.request_headers
    }

    pub fn response_headers(&self) -> &HeaderList {
        &self.response_headers
    }

    pub fn response_body(&self) -> &Bytes {
        &self.response_body
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// Handler duration. Diagnostic only.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Builder for [`Event`]
#[derive(Debug, Clone)]
pub struct EventBuilder {
    method: String,
    path: String,
    status: u16,
    request_headers: HeaderList,
    response_headers: HeaderList,
    response_body: Bytes,
    observed_at: Option<DateTime<Utc>>,
    elapsed: Duration,
}

impl EventBuilder {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            status: 200,
            request_headers: HeaderList::new(),
            response_headers: HeaderList::new(),
            response_body: Bytes::new(),
            observed_at: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn request_headers(mut self, headers: HeaderList) -> Self {
        self.request_headers = headers;
        self
    }

    pub fn response_headers(mut self, headers: HeaderList) -> Self {
        self.response_headers = headers;
        self
    }

    pub fn response_body(mut self, body: impl Into<Bytes>) -> Self {
        self.response_body = body.into();
        self
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = Some(at);
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Normalize and validate.
    ///
    /// The method is uppercased and the query string dropped from the path.
    /// Any method token and status code that `http` accepts is kept,
    /// extension methods and non-standard statuses included.
    pub fn build(self) -> Result<Event, CaptureError> {
        let method = self.method.trim().to_ascii_uppercase();
        if http::Method::from_bytes(method.as_bytes()).is_err() {
            return Err(CaptureError::InvalidEvent(format!(
                "invalid method: {:?}",
                self.method
            )));
        }

        let path = match self.path.split_once(['?', '#']) {
            Some((path, _)) => path,
            None => self.path.as_str(),
        };
        let path = if path.is_empty() {
            "/".to_string()
        } else if path.starts_with('/') {
            path.to_string()
        } else {
            return Err(CaptureError::InvalidEvent(format!(
                "path must start with '/': {:?}",
                self.path
            )));
        };

        if http::StatusCode::from_u16(self.status).is_err() {
            return Err(CaptureError::InvalidEvent(format!(
                "status out of range: {}",
                self.status
            )));
        }

        Ok(Event {
            id: Uuid::new_v4(),
            method,
            path,
            status: self.status,
            request_headers: self.request_headers,
            response_headers: self.response_headers,
            response_body: self.response_body,
            observed_at: self.observed_at.unwrap_or_else(Utc::now),
            elapsed: self.elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_normalizes() {
        let event = Event::builder("post", "/rooms/abc123?expand=keys")
            .status(201)
            .response_body("{}")
            .build()
            .unwrap();

        assert_eq!(event.method(), "POST");
        assert_eq!(event.path(), "/rooms/abc123");
        assert_eq!(event.status(), 201);
        assert_eq!(event.response_body().as_ref(), b"{}");
    }

    #[test]
    fn test_empty_path_is_root() {
        let event = Event::builder("GET", "?q=1").build().unwrap();
        assert_eq!(event.path(), "/");
    }

    #[test]
    fn test_build_rejects_bad_input() {
        assert!(Event::builder("", "/").build().is_err());
        assert!(Event::builder("GET", "rooms").build().is_err());
        assert!(Event::builder("GET /x", "/").build().is_err());
        assert!(Event::builder("GET", "/").status(42).build().is_err());
        assert!(Event::builder("GET", "/").status(1000).build().is_err());
    }

    #[test]
    fn test_extension_method_and_status_are_kept() {
        let event = Event::builder("m-search", "/rooms/1")
            .status(799)
            .build()
            .unwrap();
        assert_eq!(event.method(), "M-SEARCH");
        assert_eq!(event.status(), 799);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Event::builder("GET", "/").build().unwrap();
        let b = Event::builder("GET", "/").build().unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let headers: HeaderList = [("Content-Type", "application/json"), ("X-Trace", "a")]
            .into_iter()
            .collect();

        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert!(headers.contains("x-trace"));
        assert_eq!(headers.get("missing"), None);
    }

    #[test]
    fn test_header_without() {
        let headers: HeaderList = [("Authorization", "Bearer x"), ("Accept", "*/*")]
            .into_iter()
            .collect();

        let kept = headers.without(|n| n.eq_ignore_ascii_case("authorization"));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept.get("accept"), Some("*/*"));
    }

    #[test]
    fn test_header_serialization_groups_repeats() {
        let headers: HeaderList = [
            ("Set-Cookie", "a=1"),
            ("Content-Type", "text/plain"),
            ("set-cookie", "b=2"),
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_value(&headers).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "Set-Cookie": ["a=1", "b=2"],
                "Content-Type": "text/plain",
            })
        );
    }

    #[test]
    fn test_from_http_keeps_repeats() {
        let mut map = http::HeaderMap::new();
        map.append("x-tag", "one".parse().unwrap());
        map.append("x-tag", "two".parse().unwrap());

        let headers = HeaderList::from_http(&map);
        assert_eq!(headers.get_all("X-Tag").collect::<Vec<_>>(), ["one", "two"]);
    }
}
