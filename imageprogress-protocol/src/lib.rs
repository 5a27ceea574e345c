//! Wire-format types for container image pull/push progress streams.
//!
//! A container runtime reports pull and push progress as a stream of
//! concatenated JSON objects (the Docker `jsonmessage` format), one object per
//! status update:
//!
//! ```text
//! {"status":"Pulling fs layer","progressDetail":{},"id":"8a1e25ce7c4f"}
//! {"status":"Downloading","progressDetail":{"current":1024,"total":4096},"id":"8a1e25ce7c4f"}
//! {"status":"Digest: sha256:..."}
//! ```
//!
//! Objects are not line-delimited: they may be separated by any JSON
//! whitespace or by nothing at all. [`StatusDecoder`] reads one object at a
//! time from any [`std::io::Read`].

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Errors that can occur while decoding a progress stream.
#[derive(Debug)]
pub enum ProtocolError {
    /// An I/O error occurred while reading.
    Io(std::io::Error),
    /// A value in the stream is not valid JSON or is not a status object.
    Json(serde_json::Error),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Io(e) => write!(f, "IO error: {}", e),
            ProtocolError::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::Io(e) => Some(e),
            ProtocolError::Json(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::Io(e)
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        // serde_json wraps reader failures in its own error type.
        if e.is_io() {
            return ProtocolError::Io(e.into());
        }
        ProtocolError::Json(e)
    }
}

// ---------------------------------------------------------------------------
// LayerStatusEvent
// ---------------------------------------------------------------------------

/// One decoded status object from a pull or push stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerStatusEvent {
    /// Layer identifier, normally a short hex digest. Empty for
    /// stream-level messages such as `Digest: ...` or `Status: ...`.
    #[serde(default)]
    pub id: String,

    /// Free-form status text (`Downloading`, `Pull complete`, ...).
    #[serde(default)]
    pub status: String,

    /// Byte-level progress, if the runtime attached any.
    #[serde(rename = "progressDetail", default)]
    pub progress_detail: Option<ProgressDetail>,

    /// Error text reported by the runtime, if the operation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(rename = "errorDetail", default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
}

impl LayerStatusEvent {
    /// Build a status event for layer `id` without byte detail.
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
            ..Self::default()
        }
    }

    /// Attach byte-level progress.
    pub fn with_progress(mut self, current: i64, total: i64) -> Self {
        self.progress_detail = Some(ProgressDetail { current, total });
        self
    }

    /// Whether this event describes a single layer.
    ///
    /// Only events whose `id` is a non-empty lowercase hex string qualify;
    /// banners, digests and retry notices do not.
    pub fn is_layer_status(&self) -> bool {
        is_layer_id(&self.id)
    }

    /// The runtime's error message, if this event reports a failure.
    pub fn error_message(&self) -> Option<&str> {
        if let Some(msg) = self.error.as_deref().filter(|m| !m.is_empty()) {
            return Some(msg);
        }
        self.error_detail
            .as_ref()
            .map(|d| d.message.as_str())
            .filter(|m| !m.is_empty())
    }
}

/// Returns true if `id` matches `^[a-f0-9]+$`.
pub fn is_layer_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| matches!(b, b'a'..=b'f' | b'0'..=b'9'))
}

// ---------------------------------------------------------------------------
// ProgressDetail / ErrorDetail
// ---------------------------------------------------------------------------

/// Byte progress of a single layer transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressDetail {
    #[serde(default)]
    pub current: i64,
    #[serde(default)]
    pub total: i64,
}

/// Structured error attached to a failed operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

// ---------------------------------------------------------------------------
// StatusDecoder
// ---------------------------------------------------------------------------

/// Streaming decoder over a byte stream of concatenated status objects.
///
/// Each call to [`StatusDecoder::next_event`] blocks until one complete JSON
/// value has been read. A malformed or truncated value is an error; the
/// stream cannot be resynchronized afterwards.
pub struct StatusDecoder<R: std::io::Read> {
    inner: serde_json::StreamDeserializer<'static, serde_json::de::IoRead<R>, LayerStatusEvent>,
}

impl<R: std::io::Read> StatusDecoder<R> {
    /// Wrap `reader`. The decoder reads byte-at-a-time, so callers reading
    /// from files or sockets should pass a [`std::io::BufReader`].
    pub fn new(reader: R) -> Self {
        Self {
            inner: serde_json::Deserializer::from_reader(reader).into_iter(),
        }
    }

    /// Read the next event. Returns `Ok(None)` at a clean end of stream.
    pub fn next_event(&mut self) -> Result<Option<LayerStatusEvent>, ProtocolError> {
        match self.inner.next() {
            None => Ok(None),
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(e)) => Err(e.into()),
        }
    }

    /// Number of bytes consumed so far.
    pub fn byte_offset(&self) -> usize {
        self.inner.byte_offset()
    }
}

impl<R: std::io::Read> Iterator for StatusDecoder<R> {
    type Item = Result<LayerStatusEvent, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_full_event() {
        let json = r#"{"status":"Downloading","progressDetail":{"current":1024,"total":4096},"progress":"[==>   ]","id":"8a1e25ce7c4f"}"#;
        let event: LayerStatusEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.id, "8a1e25ce7c4f");
        assert_eq!(event.status, "Downloading");
        assert_eq!(
            event.progress_detail,
            Some(ProgressDetail {
                current: 1024,
                total: 4096
            })
        );
        assert!(event.error_message().is_none());
    }

    #[test]
    fn empty_progress_detail_is_present_but_zero() {
        let event: LayerStatusEvent =
            serde_json::from_str(r#"{"status":"Waiting","progressDetail":{},"id":"ab"}"#).unwrap();
        assert_eq!(event.progress_detail, Some(ProgressDetail::default()));
    }

    #[test]
    fn missing_or_null_progress_detail_is_none() {
        let event: LayerStatusEvent = serde_json::from_str(r#"{"status":"Waiting"}"#).unwrap();
        assert!(event.progress_detail.is_none());
        assert!(event.id.is_empty());

        let event: LayerStatusEvent =
            serde_json::from_str(r#"{"id":"ab","progressDetail":null}"#).unwrap();
        assert!(event.progress_detail.is_none());
    }

    #[test]
    fn layer_id_filter() {
        assert!(is_layer_id("1a2b"));
        assert!(is_layer_id("0123456789abcdef"));
        assert!(!is_layer_id(""));
        assert!(!is_layer_id("hello"));
        assert!(!is_layer_id("1A2B"));
        assert!(!is_layer_id("latest"));
        assert!(!is_layer_id("1a,2b"));
        assert!(!LayerStatusEvent::new("", "Pull complete").is_layer_status());
        assert!(LayerStatusEvent::new("cafe", "Pull complete").is_layer_status());
    }

    #[test]
    fn error_message_from_either_field() {
        let event: LayerStatusEvent =
            serde_json::from_str(r#"{"error":"manifest unknown"}"#).unwrap();
        assert_eq!(event.error_message(), Some("manifest unknown"));

        let event: LayerStatusEvent =
            serde_json::from_str(r#"{"errorDetail":{"code":401,"message":"unauthorized"}}"#)
                .unwrap();
        assert_eq!(event.error_message(), Some("unauthorized"));
        assert_eq!(event.error_detail.unwrap().code, Some(401));

        let event: LayerStatusEvent = serde_json::from_str(r#"{"error":""}"#).unwrap();
        assert!(event.error_message().is_none());
    }

    #[test]
    fn decoder_reads_concatenated_values() {
        let stream = br#"{"id":"a","status":"Waiting"}{"id":"b","status":"Downloading"}
            {"id":"c","status":"Pull complete"}"#;
        let mut decoder = StatusDecoder::new(&stream[..]);
        let ids: Vec<String> = std::iter::from_fn(|| decoder.next_event().unwrap())
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn decoder_empty_stream_is_clean_eof() {
        let mut decoder = StatusDecoder::new(&b"  \n"[..]);
        assert!(decoder.next_event().unwrap().is_none());
    }

    #[test]
    fn decoder_malformed_value_is_error() {
        let stream = br#"{"id":"a","status":"Waiting"} {"id": nope}"#;
        let mut decoder = StatusDecoder::new(&stream[..]);
        assert!(decoder.next_event().unwrap().is_some());
        assert!(matches!(decoder.next_event(), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn decoder_truncated_value_is_error() {
        let stream = br#"{"id":"a","status":"Wai"#;
        let mut decoder = StatusDecoder::new(&stream[..]);
        assert!(decoder.next_event().is_err());
    }

    #[test]
    fn decoder_as_iterator() {
        let stream = br#"{"id":"a"} {"id":"b"}"#;
        let events: Result<Vec<_>, _> = StatusDecoder::new(&stream[..]).collect();
        assert_eq!(events.unwrap().len(), 2);
    }
}
