//! Inbound message validation
//!
//! Stateless shape checks applied to every payload before it enters the
//! relay. Transport adapters hand over raw JSON values; these functions
//! reject anything malformed with an error naming the offending field and
//! never mutate the payload. Media payloads stay opaque beyond the fields
//! checked here.

use bytes::Bytes;
use serde_json::Value;

use crate::error::RelayError;

/// Control event types originating from the viewer's keyboard
const KEYBOARD_TYPES: &[&str] = &["keydown", "keyup"];

/// Control event types originating from the viewer's pointer
const MOUSE_TYPES: &[&str] = &["click", "mousedown", "mouseup", "mousemove"];

/// Validation failure naming the offending field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for RelayError {
    fn from(err: ValidationError) -> Self {
        RelayError::InvalidMessage(err.0)
    }
}

/// Classification of a validated control event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Keyboard,
    Mouse,
}

/// Media frame type tag
///
/// An IDR (key) frame anchors decodability of the downstream video and is
/// never dropped; a P-frame is individually expendable. Absent or unknown
/// casing resolves through [`FrameKind::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameKind {
    Idr,
    #[default]
    P,
}

impl FrameKind {
    /// Parse a `frame_type` string, case-insensitively
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("idr") {
            Some(FrameKind::Idr)
        } else if s.eq_ignore_ascii_case("p") {
            Some(FrameKind::P)
        } else {
            None
        }
    }

    /// Whether this frame may bypass the media queue capacity check
    pub fn is_keyframe(self) -> bool {
        self == FrameKind::Idr
    }
}

/// Typed view of a validated media frame
///
/// `data` is reference-counted so queued and forwarded copies share one
/// allocation.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub data: Bytes,
    pub frame_type: FrameKind,
    pub timestamp: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sequence: Option<u64>,
}

impl MediaFrame {
    /// Extract a typed frame from a validated payload
    pub fn from_value(payload: &Value) -> Result<Self, ValidationError> {
        validate_media_frame(payload)?;

        let obj = require_map(payload)?;
        let data = obj
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| ValidationError("missing required field: data".into()))?;

        let frame_type = obj
            .get("frame_type")
            .and_then(Value::as_str)
            .and_then(FrameKind::parse)
            .unwrap_or_default();

        Ok(Self {
            data: Bytes::copy_from_slice(data.as_bytes()),
            frame_type,
            timestamp: obj.get("timestamp").and_then(Value::as_u64),
            width: obj.get("width").and_then(Value::as_u64).map(|w| w as u32),
            height: obj.get("height").and_then(Value::as_u64).map(|h| h as u32),
            sequence: obj.get("sequence").and_then(Value::as_u64),
        })
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Validate an inbound control event
///
/// Keyboard events require `key`; mouse events require numeric `x` and `y`.
/// Modifier flags and `button` are optional and unchecked beyond shape.
pub fn validate_control_event(payload: &Value) -> Result<ControlKind, ValidationError> {
    let obj = require_map(payload)?;

    let event_type = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError("missing required field: type".into()))?;

    if KEYBOARD_TYPES.contains(&event_type) {
        if obj.get("key").and_then(Value::as_str).is_none() {
            return Err(ValidationError("missing required field: key".into()));
        }
        Ok(ControlKind::Keyboard)
    } else if MOUSE_TYPES.contains(&event_type) {
        if !obj.get("x").map(is_number).unwrap_or(false) {
            return Err(ValidationError("missing or non-numeric field: x".into()));
        }
        if !obj.get("y").map(is_number).unwrap_or(false) {
            return Err(ValidationError("missing or non-numeric field: y".into()));
        }
        Ok(ControlKind::Mouse)
    } else {
        Err(ValidationError(format!(
            "unknown control event type: {}",
            event_type
        )))
    }
}

/// Validate an inbound media frame
///
/// Requires `data`; `frame_type` is optional but must be `idr` or `p`
/// (case-insensitive) when present. An absent `frame_type` is accepted and
/// later treated as `p`.
pub fn validate_media_frame(payload: &Value) -> Result<(), ValidationError> {
    let obj = require_map(payload)?;

    if obj.get("data").and_then(Value::as_str).is_none() {
        return Err(ValidationError("missing required field: data".into()));
    }

    if let Some(frame_type) = obj.get("frame_type") {
        let tag = frame_type
            .as_str()
            .ok_or_else(|| ValidationError("non-string field: frame_type".into()))?;
        if FrameKind::parse(tag).is_none() {
            return Err(ValidationError(format!(
                "invalid frame_type: {} (expected idr or p)",
                tag
            )));
        }
    }

    Ok(())
}

/// Validate media stream metadata
///
/// Requires numeric `width` and `height`; everything else passes through
/// unchecked.
pub fn validate_media_metadata(payload: &Value) -> Result<(), ValidationError> {
    let obj = require_map(payload)?;

    if !obj.get("width").map(is_number).unwrap_or(false) {
        return Err(ValidationError("missing or non-numeric field: width".into()));
    }
    if !obj.get("height").map(is_number).unwrap_or(false) {
        return Err(ValidationError(
            "missing or non-numeric field: height".into(),
        ));
    }

    Ok(())
}

/// Validate a device event
///
/// Requires `type`; all other fields pass through unchecked.
pub fn validate_device_event(payload: &Value) -> Result<(), ValidationError> {
    let obj = require_map(payload)?;

    if obj.get("type").and_then(Value::as_str).is_none() {
        return Err(ValidationError("missing required field: type".into()));
    }

    Ok(())
}

fn require_map(payload: &Value) -> Result<&serde_json::Map<String, Value>, ValidationError> {
    payload
        .as_object()
        .ok_or_else(|| ValidationError("payload must be a map".into()))
}

fn is_number(value: &Value) -> bool {
    value.is_number()
}
