use serde::Deserialize;
use serde_json::Value;

/// Inbound WebSocket frame. One JSON object per frame; unknown fields are
/// ignored, and every field is optional at the decode layer so that
/// validation can produce precise failure reasons instead of decode errors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncMsg {
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    /// Some older clients send this as `action`.
    #[serde(alias = "action")]
    pub sub_type: Option<String>,
    pub room_id: Option<String>,
    pub sender_id: Option<String>,
    pub correlation_id: Option<String>,
    pub timestamp: Option<i64>,
    pub data: Option<Value>,
}

impl SyncMsg {
    /// Decode a frame from raw text.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    fn data_field(&self, key: &str) -> Option<&Value> {
        self.data.as_ref()?.as_object()?.get(key)
    }

    #[must_use]
    pub fn str_data(&self, key: &str) -> Option<&str> {
        self.data_field(key)?.as_str()
    }

    #[must_use]
    pub fn int_data(&self, key: &str) -> Option<i64> {
        self.data_field(key)?.as_i64()
    }

    #[must_use]
    pub fn bool_data(&self, key: &str, default: bool) -> bool {
        self.data_field(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    /// `null` and absent both mean "no change" for settings-style fields.
    #[must_use]
    pub fn opt_bool_data(&self, key: &str) -> Option<bool> {
        self.data_field(key)?.as_bool()
    }

    #[must_use]
    pub fn array_data(&self, key: &str) -> Option<&Vec<Value>> {
        self.data_field(key)?.as_array()
    }
}
