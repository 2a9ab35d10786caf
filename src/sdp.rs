//! Session descriptions and their JSON interchange format.
//!
//! Wire form: `{"type":"offer"|"pranswer"|"answer"|"rollback","sdp":"<text>"}`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Pranswer => "pranswer",
            SdpType::Answer => "answer",
            SdpType::Rollback => "rollback",
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SdpType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offer" => Ok(SdpType::Offer),
            "pranswer" => Ok(SdpType::Pranswer),
            "answer" => Ok(SdpType::Answer),
            "rollback" => Ok(SdpType::Rollback),
            other => Err(BridgeError::Validation(format!("unknown SDP type '{}'", other))),
        }
    }
}

/// Immutable (type, SDP text) pair. SDP text is opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    sdp_type: SdpType,
    sdp: String,
}

impl SessionDescription {
    pub fn new(sdp_type: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            sdp_type,
            sdp: sdp.into(),
        }
    }

    pub fn offer(sdp: impl Into<String>) -> Self {
        Self::new(SdpType::Offer, sdp)
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self::new(SdpType::Answer, sdp)
    }

    pub fn pranswer(sdp: impl Into<String>) -> Self {
        Self::new(SdpType::Pranswer, sdp)
    }

    pub fn rollback() -> Self {
        Self::new(SdpType::Rollback, "")
    }

    pub fn sdp_type(&self) -> SdpType {
        self.sdp_type
    }

    pub fn sdp(&self) -> &str {
        &self.sdp
    }

    /// Same type, different SDP text.
    pub(crate) fn with_sdp(&self, sdp: String) -> Self {
        Self::new(self.sdp_type, sdp)
    }

    pub fn serialize(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("Failed to serialize SessionDescription: {}", e);
                String::new()
            }
        }
    }

    /// Parse the JSON wire form. Malformed JSON or a missing field yields `None`.
    pub fn deserialize(msg: &str) -> Option<Self> {
        match serde_json::from_str(msg) {
            Ok(desc) => Some(desc),
            Err(e) => {
                log::warn!("Invalid SessionDescription JSON: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let desc = SessionDescription::offer("v=0\r\n");
        assert_eq!(desc.serialize(), r#"{"type":"offer","sdp":"v=0\r\n"}"#);
    }

    #[test]
    fn test_json_round_trip_all_types() {
        for t in [SdpType::Offer, SdpType::Pranswer, SdpType::Answer, SdpType::Rollback] {
            let desc = SessionDescription::new(t, format!("v=0 {}", t));
            assert_eq!(SessionDescription::deserialize(&desc.serialize()), Some(desc));
        }
    }

    #[test]
    fn test_deserialize_rejects_missing_fields() {
        assert_eq!(SessionDescription::deserialize(r#"{"sdp":"v=0"}"#), None);
        assert_eq!(SessionDescription::deserialize(r#"{"type":"offer"}"#), None);
        assert_eq!(SessionDescription::deserialize(r#"{"type":"bogus","sdp":""}"#), None);
        assert_eq!(SessionDescription::deserialize("not json"), None);
    }

    #[test]
    fn test_sdp_type_from_str() {
        assert_eq!("pranswer".parse::<SdpType>(), Ok(SdpType::Pranswer));
        assert!("Offer".parse::<SdpType>().is_err());
    }
}
