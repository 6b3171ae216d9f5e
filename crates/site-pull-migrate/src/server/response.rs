//! Response metadata headers.
//!
//! The puller reads every protocol outcome from these headers, so they
//! must all be present before the first body byte. Values are sanitized
//! because error messages can contain arbitrary file paths.

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};

pub const HEADER_STATUS: &str = "x-migrate-status";
pub const HEADER_MESSAGE: &str = "x-migrate-message";
pub const HEADER_PROGRESS: &str = "x-migrate-progress";
pub const HEADER_TRANSFER_COMPLETE: &str = "x-migrate-transfer-complete";
pub const HEADER_FILENAME: &str = "x-migrate-filename";
pub const HEADER_CHECKSUM: &str = "x-migrate-checksum";
pub const HEADER_CONTENT_KIND: &str = "x-migrate-content-kind";
/// Repeatable; one entry per unit that failed inside a batch.
pub const HEADER_UNIT_ERROR: &str = "x-migrate-error";

/// Builder for the metadata header set.
#[derive(Debug, Default)]
pub struct MetaHeaders {
    map: HeaderMap,
}

impl MetaHeaders {
    /// A successful outcome.
    pub fn ok() -> Self {
        let mut headers = Self::default();
        headers.set(HEADER_STATUS, "true");
        headers
    }

    /// A protocol-level failure; HTTP status remains 200.
    pub fn failed(message: &str) -> Self {
        let mut headers = Self::default();
        headers.set(HEADER_STATUS, "false");
        headers.set(HEADER_MESSAGE, message);
        headers
    }

    pub fn message(mut self, message: &str) -> Self {
        self.set(HEADER_MESSAGE, message);
        self
    }

    pub fn progress(mut self, progress: f64) -> Self {
        self.set(HEADER_PROGRESS, &format!("{progress:.2}"));
        self
    }

    pub fn transfer_complete(mut self, complete: bool) -> Self {
        self.set(
            HEADER_TRANSFER_COMPLETE,
            if complete { "true" } else { "false" },
        );
        self
    }

    pub fn filename(mut self, name: &str) -> Self {
        self.set(HEADER_FILENAME, name);
        self
    }

    pub fn checksum(mut self, checksum: &str) -> Self {
        self.set(HEADER_CHECKSUM, checksum);
        self
    }

    pub fn content_kind(mut self, kind: &str) -> Self {
        self.set(HEADER_CONTENT_KIND, kind);
        self
    }

    /// Append one per-unit error; earlier entries are kept.
    pub fn unit_error(mut self, error: &str) -> Self {
        if let Ok(name) = HeaderName::from_bytes(HEADER_UNIT_ERROR.as_bytes()) {
            self.map.append(name, sanitize(error));
        }
        self
    }

    pub fn into_map(self) -> HeaderMap {
        self.map
    }

    fn set(&mut self, name: &'static str, value: &str) {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            self.map.insert(name, sanitize(value));
        }
    }
}

/// Make an arbitrary string safe as a header value.
fn sanitize(value: &str) -> HeaderValue {
    match HeaderValue::from_str(value) {
        Ok(v) => v,
        Err(_) => {
            let cleaned: String = value
                .chars()
                .map(|c| if c.is_control() || !c.is_ascii() { ' ' } else { c })
                .collect();
            HeaderValue::from_str(&cleaned)
                .unwrap_or_else(|_| HeaderValue::from_static("unrepresentable"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_success_header_set() {
        let map = MetaHeaders::ok()
            .progress(42.5)
            .filename("batch-1.zip")
            .checksum("aabbccdd")
            .content_kind("zip")
            .transfer_complete(false)
            .into_map();
        assert_eq!(map.get(HEADER_STATUS).unwrap(), "true");
        assert_eq!(map.get(HEADER_PROGRESS).unwrap(), "42.50");
        assert_eq!(map.get(HEADER_TRANSFER_COMPLETE).unwrap(), "false");
    }

    #[test]
    fn unit_errors_accumulate() {
        let map = MetaHeaders::ok()
            .unit_error("a.txt: unreadable")
            .unit_error("b.txt: unreadable")
            .into_map();
        assert_eq!(map.get_all(HEADER_UNIT_ERROR).iter().count(), 2);
    }

    #[test]
    fn control_characters_are_sanitized() {
        let map = MetaHeaders::failed("bad\r\npath").into_map();
        let value = map.get(HEADER_MESSAGE).unwrap().to_str().unwrap();
        assert!(!value.contains('\n'));
    }
}
