//! ICE candidate triples and their JSON interchange format.

use serde::{Deserialize, Serialize};

/// `{"candidate":"<text>","sdpMid":"<text>","sdpMLineIndex":<int>}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: i32,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>, sdp_mid: impl Into<String>, sdp_mline_index: i32) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: sdp_mid.into(),
            sdp_mline_index,
        }
    }

    pub fn serialize(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("Failed to serialize IceCandidate: {}", e);
                String::new()
            }
        }
    }

    /// Parse the JSON wire form. Malformed JSON or a missing field yields `None`.
    pub fn deserialize(msg: &str) -> Option<Self> {
        match serde_json::from_str(msg) {
            Ok(candidate) => Some(candidate),
            Err(e) => {
                log::warn!("Invalid IceCandidate JSON: {}", e);
                None
            }
        }
    }
}
