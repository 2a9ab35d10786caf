//! Offer/answer negotiation between two in-process sessions
//!
//! Covers:
//! - Full offer/answer exchange and signaling transitions
//! - Local candidate gathering and IceComplete
//! - Candidate exchange after the remote description is applied
//! - Rejected descriptions leaving the session untouched

use std::sync::Arc;

use parking_lot::Mutex;
use webrtc_bridge::engine::loopback::LoopbackEngine;
use webrtc_bridge::{
    BridgeError, Configuration, IceCandidate, IceGatheringState, IceServer, PeerConnection, SdpType,
    SessionDescription, SignalingState,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn shared_config() -> Configuration {
    Configuration::new()
        .with_ice_servers(webrtc_bridge::ice::google_stun_servers())
        .with_ice_server(IceServer::turn("turn:relay.example.org:3478", "user", "secret"))
}

fn record_signaling(pc: &PeerConnection) -> Arc<Mutex<Vec<SignalingState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let s = states.clone();
    pc.on_signaling_state_change(move |state| s.lock().push(state));
    states
}

fn record_candidates(pc: &PeerConnection) -> Arc<Mutex<Vec<IceCandidate>>> {
    let candidates = Arc::new(Mutex::new(Vec::new()));
    let c = candidates.clone();
    pc.on_ice_candidate(move |candidate| c.lock().push(candidate));
    candidates
}

#[test]
fn test_offer_answer_round_trip() {
    init_logging();
    let engine = LoopbackEngine::new();
    let offerer = PeerConnection::new(&engine, shared_config()).expect("offerer");
    let answerer = PeerConnection::new(&engine, shared_config()).expect("answerer");
    let offerer_states = record_signaling(&offerer);
    let answerer_states = record_signaling(&answerer);

    let offer = offerer.create_offer().expect("create offer");
    assert_eq!(offer.sdp_type(), SdpType::Offer);
    assert!(offer.sdp().starts_with("v=0"));

    offerer.set_local_description(&offer).expect("local offer");
    assert_eq!(offerer.signaling_state(), SignalingState::HaveLocalOffer);

    // Descriptions travel over the signaling channel as JSON
    let wire = offer.serialize();
    let received = SessionDescription::deserialize(&wire).expect("offer on the wire");
    answerer.set_remote_description(&received).expect("remote offer");
    assert_eq!(answerer.signaling_state(), SignalingState::HaveRemoteOffer);

    let answer = answerer.create_answer().expect("create answer");
    assert_eq!(answer.sdp_type(), SdpType::Answer);
    answerer.set_local_description(&answer).expect("local answer");
    offerer.set_remote_description(&answer).expect("remote answer");

    assert_eq!(offerer.signaling_state(), SignalingState::Stable);
    assert_eq!(answerer.signaling_state(), SignalingState::Stable);
    assert_eq!(
        offerer_states.lock().as_slice(),
        &[SignalingState::HaveLocalOffer, SignalingState::Stable]
    );
    assert_eq!(
        answerer_states.lock().as_slice(),
        &[SignalingState::HaveRemoteOffer, SignalingState::Stable]
    );

    assert_eq!(offerer.local_description(), Some(offer.clone()));
    assert_eq!(offerer.remote_description(), Some(answer.clone()));
    assert_eq!(answerer.remote_description(), Some(offer));
    assert_eq!(offerer.get_configuration(), shared_config());
}

#[test]
fn test_gathering_reports_candidates_then_complete() {
    init_logging();
    let engine = LoopbackEngine::new();
    let pc = PeerConnection::new(&engine, shared_config()).unwrap();
    let candidates = record_candidates(&pc);
    let gathering = Arc::new(Mutex::new(Vec::new()));
    let g = gathering.clone();
    pc.on_ice_gathering_state_change(move |state| g.lock().push(state));
    let complete = Arc::new(Mutex::new(0usize));
    let c = complete.clone();
    pc.on_ice_complete(move || *c.lock() += 1);

    assert_eq!(pc.ice_gathering_state(), IceGatheringState::New);
    let offer = pc.create_offer().unwrap();
    pc.set_local_description(&offer).unwrap();

    assert_eq!(
        gathering.lock().as_slice(),
        &[IceGatheringState::Gathering, IceGatheringState::Complete]
    );
    assert_eq!(*complete.lock(), 1);
    assert_eq!(pc.ice_gathering_state(), IceGatheringState::Complete);

    let candidates = candidates.lock();
    assert_eq!(candidates.len(), 1);
    assert!(candidates[0].candidate.starts_with("candidate:"));
    assert_eq!(candidates[0].sdp_mid, "0");
    assert_eq!(candidates[0].sdp_mline_index, 0);
}

#[test]
fn test_candidates_exchanged_after_remote_description() {
    init_logging();
    let engine = LoopbackEngine::new();
    let offerer = PeerConnection::new(&engine, shared_config()).unwrap();
    let answerer = PeerConnection::new(&engine, shared_config()).unwrap();
    let offerer_candidates = record_candidates(&offerer);
    let answerer_candidates = record_candidates(&answerer);

    let offer = offerer.create_offer().unwrap();
    offerer.set_local_description(&offer).unwrap();

    // Too early: the answerer has no remote description yet
    let early = offerer_candidates.lock()[0].clone();
    assert!(matches!(
        answerer.add_ice_candidate(&early),
        Err(BridgeError::CandidateRejected(_))
    ));

    answerer.set_remote_description(&offer).unwrap();
    let answer = answerer.create_answer().unwrap();
    answerer.set_local_description(&answer).unwrap();
    offerer.set_remote_description(&answer).unwrap();

    for candidate in offerer_candidates.lock().iter() {
        let wire = candidate.serialize();
        let parsed = IceCandidate::deserialize(&wire).expect("candidate on the wire");
        answerer.add_ice_candidate(&parsed).expect("answerer accepts candidate");
    }
    for candidate in answerer_candidates.lock().iter() {
        offerer.add_ice_candidate(candidate).expect("offerer accepts candidate");
    }

    let native = engine.peer(answerer.handle()).expect("native answerer");
    assert_eq!(native.remote_candidates(), offerer_candidates.lock().clone());
}

#[test]
fn test_relay_only_policy_gathers_no_host_candidates() {
    init_logging();
    let engine = LoopbackEngine::new();
    let config = shared_config().with_ice_transport_policy(webrtc_bridge::IceTransportPolicy::Relay);
    let pc = PeerConnection::new(&engine, config).unwrap();
    let candidates = record_candidates(&pc);

    let offer = pc.create_offer().unwrap();
    pc.set_local_description(&offer).unwrap();

    assert!(candidates.lock().is_empty());
    assert_eq!(pc.ice_gathering_state(), IceGatheringState::Complete);
}

#[test]
fn test_answer_before_offer_is_rejected() {
    init_logging();
    let engine = LoopbackEngine::new();
    let pc = PeerConnection::new(&engine, shared_config()).unwrap();

    assert!(matches!(pc.create_answer(), Err(BridgeError::Negotiation(_))));

    let stray = SessionDescription::answer("v=0\r\n");
    let err = pc.set_remote_description(&stray).unwrap_err();
    assert!(matches!(err, BridgeError::DescriptionRejected(_)));
    assert_eq!(pc.signaling_state(), SignalingState::Stable);
    assert_eq!(pc.remote_description(), None);
}

#[test]
fn test_glare_resolved_by_rollback() {
    init_logging();
    let engine = LoopbackEngine::new();
    let a = PeerConnection::new(&engine, shared_config()).unwrap();
    let b = PeerConnection::new(&engine, shared_config()).unwrap();

    let offer_a = a.create_offer().unwrap();
    let offer_b = b.create_offer().unwrap();
    a.set_local_description(&offer_a).unwrap();
    b.set_local_description(&offer_b).unwrap();

    // b is polite: drop its own offer and take a's
    assert!(b.set_remote_description(&offer_a).is_err());
    b.set_local_description(&SessionDescription::rollback()).unwrap();
    assert_eq!(b.signaling_state(), SignalingState::Stable);
    assert_eq!(b.local_description(), None);

    b.set_remote_description(&offer_a).unwrap();
    let answer = b.create_answer().unwrap();
    b.set_local_description(&answer).unwrap();
    a.set_remote_description(&answer).unwrap();

    assert_eq!(a.signaling_state(), SignalingState::Stable);
    assert_eq!(b.signaling_state(), SignalingState::Stable);
}

#[test]
fn test_failed_engine_creation_reports_error() {
    init_logging();
    let engine = LoopbackEngine::new();
    engine.refuse_new_peers(true);
    assert!(matches!(
        PeerConnection::new(&engine, shared_config()),
        Err(BridgeError::Engine(_))
    ));

    engine.refuse_new_peers(false);
    assert!(PeerConnection::new(&engine, shared_config()).is_ok());
}

#[test]
fn test_invalid_ice_server_is_rejected_before_engine() {
    init_logging();
    let engine = LoopbackEngine::new();
    let config = Configuration::new().with_ice_server(IceServer::stun("badurl"));
    assert!(matches!(
        PeerConnection::new(&engine, config),
        Err(BridgeError::Validation(_))
    ));
}
