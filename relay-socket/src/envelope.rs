//! Envelope codec.
//!
//! Every frame carries one JSON envelope `{"type": ..., "data": ...}`. An
//! envelope of type `bundle` carries an ordered array of items instead,
//! each of which may be dispatched as an envelope of its own:
//!
//! ```text
//! {"type": "bundle", "data": [
//!     {"type": "chat", "data": {...}},
//!     {"callback_id": 12, "data": {...}}
//! ]}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use relay_core::constants::BUNDLE_TYPE;
use relay_core::error::{DecodeError, RelayError, RelayResult};

/// A typed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name the message is dispatched under.
    #[serde(rename = "type")]
    pub kind: String,
    /// Message payload. `null` when the sender omitted it.
    #[serde(default)]
    pub data: Value,
}

/// One entry of a bundle.
///
/// Items carry a `type`, a `callback_id`, or both. Only typed items are
/// dispatched as events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleItem {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default = "empty_object")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<Value>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    pub fn is_bundle(&self) -> bool {
        self.kind == BUNDLE_TYPE
    }

    /// The items of a bundle envelope, or `None` for a plain envelope.
    ///
    /// Entries that are not JSON objects yield an item with neither `type`
    /// nor `callback_id`; a missing `data` becomes `{}`.
    pub fn bundle_items(&self) -> Option<Vec<BundleItem>> {
        if !self.is_bundle() {
            return None;
        }
        let items = self.data.as_array()?;
        Some(items.iter().map(BundleItem::from_value).collect())
    }

    /// Flatten into the envelopes that should be dispatched, in order.
    ///
    /// A plain envelope yields itself. A bundle yields one envelope per
    /// typed item and silently skips the rest; a bundle whose `data` is not
    /// an array yields nothing.
    pub fn expand(self) -> Vec<Envelope> {
        if !self.is_bundle() {
            return vec![self];
        }
        self.bundle_items()
            .unwrap_or_default()
            .into_iter()
            .filter_map(BundleItem::into_envelope)
            .collect()
    }
}

impl BundleItem {
    /// A dispatchable item.
    pub fn typed(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: Some(kind.into()),
            data,
            callback_id: None,
        }
    }

    /// An item addressed to a pending callback rather than an event.
    pub fn callback(callback_id: impl Into<Value>, data: Value) -> Self {
        Self {
            kind: None,
            data,
            callback_id: Some(callback_id.into()),
        }
    }

    /// Attach a callback id to this item.
    pub fn with_callback_id(mut self, callback_id: impl Into<Value>) -> Self {
        self.callback_id = Some(callback_id.into());
        self
    }

    fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self {
                kind: None,
                data: empty_object(),
                callback_id: None,
            };
        };
        Self {
            kind: obj
                .get("type")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            data: obj.get("data").cloned().unwrap_or_else(empty_object),
            callback_id: obj.get("callback_id").filter(|v| !v.is_null()).cloned(),
        }
    }

    /// The envelope this item dispatches as, if it has a type.
    pub fn into_envelope(self) -> Option<Envelope> {
        let kind = self.kind?;
        Some(Envelope::new(kind, self.data))
    }
}

/// Serialize `{type, data}` to a text frame.
pub fn encode(kind: &str, data: &Value) -> RelayResult<String> {
    if kind.is_empty() {
        return Err(RelayError::EmptyType);
    }

    #[derive(Serialize)]
    struct Outgoing<'a> {
        #[serde(rename = "type")]
        kind: &'a str,
        data: &'a Value,
    }

    Ok(serde_json::to_string(&Outgoing { kind, data })?)
}

/// Serialize a bundle of items to a text frame.
pub fn encode_bundle(items: &[BundleItem]) -> RelayResult<String> {
    let data = serde_json::to_value(items)?;
    encode(BUNDLE_TYPE, &data)
}

/// Parse a text frame into an envelope.
///
/// Fails with `MalformedPayload` when the frame is not JSON and with
/// `MissingType` when the document has no non-empty string `type`. A
/// missing `data` decodes as `null`. Bundle contents are not checked here.
pub fn decode(frame: &str) -> Result<Envelope, DecodeError> {
    let value: Value =
        serde_json::from_str(frame).map_err(|e| DecodeError::MalformedPayload(e.to_string()))?;
    from_value(value)
}

/// Parse a raw byte frame into an envelope. See [`decode`].
pub fn decode_bytes(frame: &[u8]) -> Result<Envelope, DecodeError> {
    let value: Value =
        serde_json::from_slice(frame).map_err(|e| DecodeError::MalformedPayload(e.to_string()))?;
    from_value(value)
}

fn from_value(value: Value) -> Result<Envelope, DecodeError> {
    let Value::Object(mut obj) = value else {
        return Err(DecodeError::MissingType);
    };

    let kind = match obj.remove("type") {
        Some(Value::String(kind)) if !kind.is_empty() => kind,
        _ => return Err(DecodeError::MissingType),
    };
    let data = obj.remove("data").unwrap_or(Value::Null);

    Ok(Envelope { kind, data })
}
