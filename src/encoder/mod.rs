//! Message encoder: renders records into radio-sized payloads
//!
//! Channel text on the mesh is capped at [`MAX_MESSAGE_BYTES`] of UTF-8.
//! Templates offer one or more renderings from richest to most compact; the
//! encoder picks the first that fits and otherwise truncates the most
//! compact one on a code-point boundary, appending [`TRUNCATION_MARKER`] when
//! there is room.

pub mod templates;

use crate::types::Record;
use thiserror::Error;

/// Hard payload ceiling for a channel text message (bytes).
pub const MAX_MESSAGE_BYTES: usize = 135;

/// Appended to truncated payloads (3 bytes).
pub const TRUNCATION_MARKER: &str = "…";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("message rendered empty for record '{0}'")]
    EmptyMessage(String),
}

/// Renders a record into candidate message bodies.
///
/// Candidates are ordered from most to least detailed. Lines are joined by
/// `\n` by the template itself.
pub trait Template: Send + Sync {
    fn render(&self, record: &Record) -> Vec<String>;

    /// Short label for logs and dry-run previews.
    fn label(&self, record: &Record) -> String {
        format!("{} {}", record.source, record.identity)
    }
}

/// Cut `s` to at most `max_bytes` of UTF-8 without splitting a code point.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Size-bounded encoder.
#[derive(Debug, Clone)]
pub struct MessageEncoder {
    max_bytes: usize,
    marker: String,
}

impl Default for MessageEncoder {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_BYTES)
    }
}

impl MessageEncoder {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            marker: TRUNCATION_MARKER.to_string(),
        }
    }

    /// Use a different truncation marker (empty string disables it).
    #[must_use]
    pub fn with_marker(mut self, marker: &str) -> Self {
        self.marker = marker.to_string();
        self
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Render `record` through `template` and bound the result.
    pub fn encode(&self, record: &Record, template: &dyn Template) -> Result<String, EncodeError> {
        let candidates: Vec<String> = template
            .render(record)
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        if let Some(fit) = candidates.iter().find(|c| c.len() <= self.max_bytes) {
            return Ok(fit.clone());
        }

        match candidates.last() {
            Some(compact) => self.bound(compact, &record.identity),
            None => Err(EncodeError::EmptyMessage(record.identity.clone())),
        }
    }

    /// Bound free text (used by the one-off `send` command).
    pub fn encode_text(&self, text: &str) -> Result<String, EncodeError> {
        self.bound(text.trim(), "<text>")
    }

    fn bound(&self, text: &str, identity: &str) -> Result<String, EncodeError> {
        if text.len() <= self.max_bytes {
            return if text.is_empty() {
                Err(EncodeError::EmptyMessage(identity.to_string()))
            } else {
                Ok(text.to_string())
            };
        }

        let with_marker = !self.marker.is_empty() && self.marker.len() < self.max_bytes;
        let budget = if with_marker {
            self.max_bytes - self.marker.len()
        } else {
            self.max_bytes
        };

        let mut out = truncate_utf8(text, budget).trim_end().to_string();
        if out.is_empty() {
            return Err(EncodeError::EmptyMessage(identity.to_string()));
        }
        if with_marker {
            out.push_str(&self.marker);
        }
        tracing::debug!(identity, original = text.len(), bounded = out.len(), "Truncated message");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Source};
    use chrono::Utc;

    struct Fixed(Vec<String>);

    impl Template for Fixed {
        fn render(&self, _record: &Record) -> Vec<String> {
            self.0.clone()
        }
    }

    fn record() -> Record {
        Record::new("X1", Source::Usgs, Category::Quake, Utc::now())
    }

    #[test]
    fn short_message_unchanged() {
        let enc = MessageEncoder::default();
        let out = enc.encode(&record(), &Fixed(vec!["EARTHQUAKE\nM3.1".into()])).unwrap();
        assert_eq!(out, "EARTHQUAKE\nM3.1");
    }

    #[test]
    fn first_fitting_candidate_wins() {
        let enc = MessageEncoder::new(10);
        let t = Fixed(vec!["a".repeat(20), "b".repeat(8), "c".repeat(4)]);
        assert_eq!(enc.encode(&record(), &t).unwrap(), "b".repeat(8));
    }

    #[test]
    fn truncates_200_bytes_of_multibyte_text() {
        // 'é' is 2 bytes, '🟠' is 4: 25 × (1 + 2 + 4 + 1) = 200 bytes raw
        let raw: String = "aé🟠\n".repeat(25);
        assert_eq!(raw.len(), 200);
        let enc = MessageEncoder::default();
        let out = enc.encode(&record(), &Fixed(vec![raw])).unwrap();
        assert!(out.len() <= MAX_MESSAGE_BYTES, "len {}", out.len());
        assert!(std::str::from_utf8(out.as_bytes()).is_ok());
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn truncate_utf8_never_splits_code_points() {
        let s = "🟠🟠🟠";
        assert_eq!(truncate_utf8(s, 5), "🟠");
        assert_eq!(truncate_utf8(s, 3), "");
        assert_eq!(truncate_utf8(s, 12), s);
        for n in 0..=s.len() {
            let cut = truncate_utf8(s, n);
            assert!(cut.len() <= n);
            assert!(s.starts_with(cut));
        }
    }

    #[test]
    fn marker_disabled() {
        let enc = MessageEncoder::new(5).with_marker("");
        assert_eq!(enc.encode_text("abcdefgh").unwrap(), "abcde");
    }

    #[test]
    fn empty_render_is_an_error() {
        let enc = MessageEncoder::default();
        let err = enc.encode(&record(), &Fixed(vec!["   ".into(), String::new()])).unwrap_err();
        assert_eq!(err, EncodeError::EmptyMessage("X1".into()));
        assert!(enc.encode(&record(), &Fixed(Vec::new())).is_err());
        assert!(enc.encode_text("  \n ").is_err());
    }

    #[test]
    fn degenerate_limit_fails_instead_of_emitting_nothing() {
        let enc = MessageEncoder::new(2);
        assert!(matches!(enc.encode_text("🟠🟠"), Err(EncodeError::EmptyMessage(_))));
    }

    #[test]
    fn exact_limit_fits() {
        let enc = MessageEncoder::default();
        let body = "x".repeat(MAX_MESSAGE_BYTES);
        assert_eq!(enc.encode_text(&body).unwrap(), body);
    }
}
