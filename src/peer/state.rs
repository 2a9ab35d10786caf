//! Session state enums and the signaling transition table.
//!
//! Raw values follow the engine's ordering and are what crosses the C
//! boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sdp::SdpType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum SignalingState {
    Stable = 0,
    HaveLocalOffer = 1,
    HaveLocalPrAnswer = 2,
    HaveRemoteOffer = 3,
    HaveRemotePrAnswer = 4,
    Closed = 5,
}

impl SignalingState {
    pub fn from_raw(raw: i32) -> Option<Self> {
        use SignalingState::*;
        [Stable, HaveLocalOffer, HaveLocalPrAnswer, HaveRemoteOffer, HaveRemotePrAnswer, Closed]
            .into_iter()
            .find(|s| *s as i32 == raw)
    }

    /// State reached by applying a local description of `sdp_type`, if legal.
    pub fn after_local(self, sdp_type: SdpType) -> Option<Self> {
        use SdpType::*;
        use SignalingState::*;
        match (self, sdp_type) {
            (Stable, Offer) | (HaveLocalOffer, Offer) => Some(HaveLocalOffer),
            (HaveRemoteOffer, Pranswer) | (HaveLocalPrAnswer, Pranswer) => Some(HaveLocalPrAnswer),
            (HaveRemoteOffer, Answer) | (HaveLocalPrAnswer, Answer) => Some(Stable),
            (HaveLocalOffer, Rollback) => Some(Stable),
            _ => None,
        }
    }

    /// State reached by applying a remote description of `sdp_type`, if legal.
    pub fn after_remote(self, sdp_type: SdpType) -> Option<Self> {
        use SdpType::*;
        use SignalingState::*;
        match (self, sdp_type) {
            (Stable, Offer) | (HaveRemoteOffer, Offer) => Some(HaveRemoteOffer),
            (HaveLocalOffer, Pranswer) | (HaveRemotePrAnswer, Pranswer) => Some(HaveRemotePrAnswer),
            (HaveLocalOffer, Answer) | (HaveRemotePrAnswer, Answer) => Some(Stable),
            (HaveRemoteOffer, Rollback) => Some(Stable),
            _ => None,
        }
    }

    pub fn can_create_offer(self) -> bool {
        matches!(self, SignalingState::Stable | SignalingState::HaveLocalOffer)
    }

    pub fn can_create_answer(self) -> bool {
        matches!(self, SignalingState::HaveRemoteOffer | SignalingState::HaveLocalPrAnswer)
    }
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalingState::Stable => "Stable",
            SignalingState::HaveLocalOffer => "HaveLocalOffer",
            SignalingState::HaveLocalPrAnswer => "HaveLocalPrAnswer",
            SignalingState::HaveRemoteOffer => "HaveRemoteOffer",
            SignalingState::HaveRemotePrAnswer => "HaveRemotePrAnswer",
            SignalingState::Closed => "Closed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum IceGatheringState {
    New = 0,
    Gathering = 1,
    Complete = 2,
}

impl IceGatheringState {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(IceGatheringState::New),
            1 => Some(IceGatheringState::Gathering),
            2 => Some(IceGatheringState::Complete),
            _ => None,
        }
    }
}

impl fmt::Display for IceGatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IceGatheringState::New => "New",
            IceGatheringState::Gathering => "Gathering",
            IceGatheringState::Complete => "Complete",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum IceConnectionState {
    New = 0,
    Checking = 1,
    Connected = 2,
    Completed = 3,
    Failed = 4,
    Disconnected = 5,
    Closed = 6,
}

impl IceConnectionState {
    pub fn from_raw(raw: i32) -> Option<Self> {
        use IceConnectionState::*;
        [New, Checking, Connected, Completed, Failed, Disconnected, Closed]
            .into_iter()
            .find(|s| *s as i32 == raw)
    }
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IceConnectionState::New => "New",
            IceConnectionState::Checking => "Checking",
            IceConnectionState::Connected => "Connected",
            IceConnectionState::Completed => "Completed",
            IceConnectionState::Failed => "Failed",
            IceConnectionState::Disconnected => "Disconnected",
            IceConnectionState::Closed => "Closed",
        })
    }
}

/// Aggregate connection state, derived from the ICE connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum PeerConnectionState {
    New = 0,
    Connecting = 1,
    Connected = 2,
    Disconnected = 3,
    Failed = 4,
}

impl PeerConnectionState {
    /// Fixed mapping from the ICE connection state.
    ///
    /// `Completed` and `Closed` have no confirmed aggregate counterpart and
    /// map to `None`; no ConnectionStateChange is raised for them.
    pub fn from_ice(state: IceConnectionState) -> Option<Self> {
        match state {
            IceConnectionState::New => Some(PeerConnectionState::New),
            IceConnectionState::Checking => Some(PeerConnectionState::Connecting),
            IceConnectionState::Connected => Some(PeerConnectionState::Connected),
            IceConnectionState::Failed => Some(PeerConnectionState::Failed),
            IceConnectionState::Disconnected => Some(PeerConnectionState::Disconnected),
            IceConnectionState::Completed | IceConnectionState::Closed => None,
        }
    }
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PeerConnectionState::New => "New",
            PeerConnectionState::Connecting => "Connecting",
            PeerConnectionState::Connected => "Connected",
            PeerConnectionState::Disconnected => "Disconnected",
            PeerConnectionState::Failed => "Failed",
        })
    }
}
