//! End-to-end call flows: real server, real signaling channel, fake peer
//! connections

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{expect, peer_config, start_server, FakeNetwork};
use futures::{SinkExt, StreamExt};
use tandem_core::protocol::{self, ClientMessage, IceCandidate, ServerMessage};
use tandem_core::service::SignalingService;
use tandem_core::{ConnectionId, ErrorCode, SessionId};
use tandem_peer::{
    CallEvent, CallHandle, CallSession, Error, LocalMedia, LocalTrack, MediaConstraints,
    MediaDevices, MediaError, NegotiationState, SampleTrackDevices, TrackKind,
};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

struct Call {
    network: FakeNetwork,
    signaling: SignalingService,
    url: String,
    session_id: SessionId,
    x: CallHandle,
    x_events: mpsc::UnboundedReceiver<CallEvent>,
    x_id: ConnectionId,
    y: CallHandle,
    y_events: mpsc::UnboundedReceiver<CallEvent>,
    y_id: ConnectionId,
}

fn spawn_client(url: &str, network: &FakeNetwork) -> (CallHandle, mpsc::UnboundedReceiver<CallEvent>) {
    CallSession::spawn(
        peer_config(url),
        Arc::new(network.clone()),
        Arc::new(SampleTrackDevices::default()),
    )
    .unwrap()
}

fn stable_with(
    remote: &ConnectionId,
) -> impl FnMut(&CallEvent) -> Option<()> + '_ {
    move |event| match event {
        CallEvent::NegotiationStateChanged {
            participant_id,
            state: NegotiationState::Stable,
        } if participant_id == remote => Some(()),
        _ => None,
    }
}

/// X creates a session, Y joins as "Bob", both negotiate to `Stable`
async fn establish() -> Call {
    let (url, signaling) = start_server("abc123xy").await;
    let network = FakeNetwork::default();

    let (x, mut x_events) = spawn_client(&url, &network);
    let (y, mut y_events) = spawn_client(&url, &network);

    x.create_session(Some("Alice".to_string())).await.unwrap();
    let session_id = expect(&mut x_events, |e| match e {
        CallEvent::SessionCreated { session_id } => Some(session_id.clone()),
        _ => None,
    })
    .await;
    assert_eq!(session_id.as_str(), "abc123xy");

    let (x_id, x_initiator) = expect(&mut x_events, |e| match e {
        CallEvent::SessionJoined {
            participant_id,
            is_initiator,
            ..
        } => Some((participant_id.clone(), *is_initiator)),
        _ => None,
    })
    .await;
    assert!(x_initiator);

    y.join_session(session_id.clone(), Some("Bob".to_string()))
        .await
        .unwrap();
    let (y_id, y_initiator, member_count) = expect(&mut y_events, |e| match e {
        CallEvent::SessionJoined {
            participant_id,
            is_initiator,
            members,
            ..
        } => Some((participant_id.clone(), *is_initiator, members.len())),
        _ => None,
    })
    .await;
    assert!(!y_initiator);
    assert_eq!(member_count, 2);

    let (joined_id, name, count) = expect(&mut x_events, |e| match e {
        CallEvent::MemberJoined {
            participant_id,
            name,
            member_count,
        } => Some((participant_id.clone(), name.clone(), *member_count)),
        _ => None,
    })
    .await;
    assert_eq!(joined_id, y_id);
    assert_eq!(name, "Bob");
    assert_eq!(count, 2);

    expect(&mut x_events, stable_with(&y_id)).await;
    expect(&mut y_events, stable_with(&x_id)).await;

    Call {
        network,
        signaling,
        url,
        session_id,
        x,
        x_events,
        x_id,
        y,
        y_events,
        y_id,
    }
}

#[tokio::test]
async fn scenario_a_initiator_offers_and_both_sides_stabilize() {
    let call = establish().await;

    let x_engine = call.network.engine(&call.x_id, &call.y_id).unwrap();
    let y_engine = call.network.engine(&call.y_id, &call.x_id).unwrap();
    assert_eq!(x_engine.offers_created(), 1);
    assert_eq!(y_engine.offers_created(), 0);
    assert_eq!(
        x_engine.calls()[..5],
        ["add_track", "add_track", "create_offer", "set_local", "set_remote"]
    );
}

#[tokio::test]
async fn answer_is_built_only_after_remote_offer_applied() {
    let call = establish().await;
    let calls = call.network.engine(&call.y_id, &call.x_id).unwrap().calls();

    let remote = calls.iter().position(|c| *c == "set_remote").unwrap();
    let answer = calls.iter().position(|c| *c == "create_answer").unwrap();
    let local = calls.iter().position(|c| *c == "set_local").unwrap();
    assert!(remote < answer);
    assert!(answer < local);
}

#[tokio::test]
async fn remote_media_is_reported_on_both_sides() {
    let mut call = establish().await;
    let y_id = call.y_id.clone();
    let x_id = call.x_id.clone();

    let kind = expect(&mut call.x_events, |e| match e {
        CallEvent::RemoteTrack { participant_id, track } if *participant_id == y_id => {
            Some(track.kind)
        }
        _ => None,
    })
    .await;
    assert!(matches!(kind, TrackKind::Audio | TrackKind::Video));

    expect(&mut call.y_events, |e| match e {
        CallEvent::RemoteTrack { participant_id, .. } if *participant_id == x_id => Some(()),
        _ => None,
    })
    .await;
}

#[tokio::test]
async fn scenario_b_abrupt_disconnect_closes_peer_and_keeps_session() {
    let mut call = establish().await;
    let y_id = call.y_id.clone();

    // Dropping the handle ends Y's call without an explicit leave
    drop(call.y);
    drop(call.y_events);

    let count = expect(&mut call.x_events, |e| match e {
        CallEvent::MemberLeft {
            participant_id,
            member_count,
            ..
        } if *participant_id == y_id => Some(*member_count),
        _ => None,
    })
    .await;
    assert_eq!(count, 1);

    expect(&mut call.x_events, |e| match e {
        CallEvent::RemoteMediaRemoved { participant_id } if *participant_id == y_id => Some(()),
        _ => None,
    })
    .await;
    expect(&mut call.x_events, |e| match e {
        CallEvent::NegotiationStateChanged {
            participant_id,
            state: NegotiationState::Closed,
        } if *participant_id == y_id => Some(()),
        _ => None,
    })
    .await;

    assert!(call.network.engine(&call.x_id, &y_id).unwrap().is_closed());
    let snapshot = call
        .signaling
        .registry()
        .get_session(&call.session_id)
        .unwrap();
    assert_eq!(snapshot.member_count, 1);
}

#[tokio::test]
async fn explicit_leave_of_last_member_destroys_session() {
    let mut call = establish().await;
    let x_id = call.x_id.clone();

    call.x.leave().await.unwrap();
    expect(&mut call.y_events, |e| match e {
        CallEvent::MemberLeft { participant_id, .. } if *participant_id == x_id => Some(()),
        _ => None,
    })
    .await;

    call.y.leave().await.unwrap();
    let registry = call.signaling.registry().clone();
    let session_id = call.session_id.clone();
    tokio::time::timeout(std::time::Duration::from_secs(5), async move {
        while registry.session_exists(&session_id) {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // A late joiner finds nothing
    let (z, mut z_events) = spawn_client(&call.url, &call.network);
    z.join_session(call.session_id.clone(), None).await.unwrap();
    let err = expect(&mut z_events, |e| match e {
        CallEvent::Error(err) => Some(err.clone()),
        _ => None,
    })
    .await;
    assert!(matches!(
        err,
        Error::Session {
            code: ErrorCode::SessionNotFound,
            ..
        }
    ));
}

#[tokio::test]
async fn scenario_c_screen_share_swaps_track_without_renegotiation() {
    let mut call = establish().await;
    let x_id = call.x_id.clone();
    let x_engine = call.network.engine(&call.x_id, &call.y_id).unwrap();
    let y_engine = call.network.engine(&call.y_id, &call.x_id).unwrap();
    let camera = x_engine.video_track().unwrap();

    let screen = call.x.start_screen_share().await.unwrap();
    let seen = expect(&mut call.y_events, |e| match e {
        CallEvent::RemoteTrack { participant_id, track }
            if *participant_id == x_id && track.track_id == screen.id() =>
        {
            Some(track.kind)
        }
        _ => None,
    })
    .await;
    assert_eq!(seen, TrackKind::Video);
    assert_eq!(x_engine.video_track().as_deref(), Some(screen.id()));

    // Ending the capture from outside the call reverts to the camera
    screen.stop();
    expect(&mut call.y_events, |e| match e {
        CallEvent::RemoteTrack { participant_id, track }
            if *participant_id == x_id && track.track_id == camera =>
        {
            Some(())
        }
        _ => None,
    })
    .await;
    assert_eq!(x_engine.video_track(), Some(camera));

    assert_eq!(x_engine.offers_created(), 1);
    assert_eq!(y_engine.offers_created(), 0);
    assert_eq!(
        y_engine.calls().iter().filter(|c| **c == "set_remote").count(),
        1
    );
}

#[tokio::test]
async fn stopping_screen_share_reverts_to_camera() {
    let call = establish().await;
    let x_engine = call.network.engine(&call.x_id, &call.y_id).unwrap();
    let camera = x_engine.video_track().unwrap();

    let screen = call.x.start_screen_share().await.unwrap();
    assert_ne!(screen.id(), camera);
    assert!(call.x.stop_screen_share().await.unwrap());
    assert!(screen.is_ended());
    assert_eq!(x_engine.video_track(), Some(camera));
    assert!(!call.x.stop_screen_share().await.unwrap());
    assert_eq!(x_engine.offers_created(), 1);
}

#[tokio::test]
async fn toggles_and_status_updates() {
    let mut call = establish().await;
    let x_id = call.x_id.clone();

    assert_eq!(call.x.toggle_audio().await.unwrap(), Some(false));
    assert_eq!(call.x.toggle_video().await.unwrap(), Some(false));
    assert_eq!(call.x.toggle_audio().await.unwrap(), Some(true));

    call.x.send_status("muted").await.unwrap();
    let (sender, status) = expect(&mut call.y_events, |e| match e {
        CallEvent::StatusUpdate { sender_id, status } => Some((sender_id.clone(), status.clone())),
        _ => None,
    })
    .await;
    assert_eq!(sender, x_id);
    assert_eq!(status, "muted");
}

#[tokio::test]
async fn third_participant_is_rejected_when_full() {
    let call = establish().await;

    let (z, mut z_events) = spawn_client(&call.url, &call.network);
    z.join_session(call.session_id.clone(), Some("Carol".to_string()))
        .await
        .unwrap();
    let err = expect(&mut z_events, |e| match e {
        CallEvent::Error(err) => Some(err.clone()),
        _ => None,
    })
    .await;
    assert!(matches!(
        err,
        Error::Session {
            code: ErrorCode::SessionFull,
            ..
        }
    ));
    assert!(err.is_terminal());
    assert_eq!(
        call.signaling
            .registry()
            .get_session(&call.session_id)
            .unwrap()
            .member_count,
        2
    );

    // The rejected attempt is over; a new one may start
    z.join_session(call.session_id.clone(), None).await.unwrap();
}

struct DeniedDevices;

#[async_trait]
impl MediaDevices for DeniedDevices {
    async fn user_media(&self, _: &MediaConstraints) -> Result<LocalMedia, MediaError> {
        Err(MediaError::PermissionDenied)
    }

    async fn display_media(&self) -> Result<LocalTrack, MediaError> {
        Err(MediaError::DeviceNotFound)
    }
}

#[tokio::test]
async fn media_failure_aborts_session_entry() {
    let (url, signaling) = start_server("deniedxy").await;
    let (x, mut x_events) = CallSession::spawn(
        peer_config(&url),
        Arc::new(FakeNetwork::default()),
        Arc::new(DeniedDevices),
    )
    .unwrap();

    let err = x.create_session(None).await.unwrap_err();
    assert!(matches!(err, Error::MediaAcquisition(MediaError::PermissionDenied)));
    assert!(err.to_string().contains("permission"));

    let reported = expect(&mut x_events, |e| match e {
        CallEvent::Error(err) => Some(err.clone()),
        _ => None,
    })
    .await;
    assert!(matches!(reported, Error::MediaAcquisition(MediaError::PermissionDenied)));
    assert_eq!(signaling.registry().stats().live_sessions, 0);
}

#[tokio::test]
async fn dropped_signaling_rejoins_and_renegotiates() {
    let mut call = establish().await;
    let x_id = call.x_id.clone();
    let old_y = call.y_id.clone();

    // The server forgets Y's connection; Y's socket is closed under it
    call.signaling.disconnect(&old_y);

    expect(&mut call.y_events, |e| match e {
        CallEvent::SignalingDisconnected { .. } => Some(()),
        _ => None,
    })
    .await;
    expect(&mut call.y_events, |e| match e {
        CallEvent::SignalingReconnected => Some(()),
        _ => None,
    })
    .await;
    expect(&mut call.y_events, |e| match e {
        CallEvent::RemoteMediaRemoved { participant_id } if *participant_id == x_id => Some(()),
        _ => None,
    })
    .await;
    expect(&mut call.y_events, |e| match e {
        CallEvent::NegotiationStateChanged {
            participant_id,
            state: NegotiationState::Closed,
        } if *participant_id == x_id => Some(()),
        _ => None,
    })
    .await;
    assert!(call.network.engine(&old_y, &x_id).unwrap().is_closed());

    let (new_y, is_initiator, session_id) = expect(&mut call.y_events, |e| match e {
        CallEvent::SessionJoined {
            participant_id,
            is_initiator,
            session_id,
            ..
        } => Some((participant_id.clone(), *is_initiator, session_id.clone())),
        _ => None,
    })
    .await;
    assert_ne!(new_y, old_y);
    assert!(!is_initiator);
    assert_eq!(session_id, call.session_id);

    expect(&mut call.x_events, |e| match e {
        CallEvent::MemberLeft { participant_id, .. } if *participant_id == old_y => Some(()),
        _ => None,
    })
    .await;
    expect(&mut call.x_events, |e| match e {
        CallEvent::MemberJoined { participant_id, .. } if *participant_id == new_y => Some(()),
        _ => None,
    })
    .await;

    expect(&mut call.x_events, stable_with(&new_y)).await;
    expect(&mut call.y_events, stable_with(&x_id)).await;

    assert!(call.network.engine(&x_id, &old_y).unwrap().is_closed());
    assert_eq!(call.network.engine(&x_id, &new_y).unwrap().offers_created(), 1);
    assert_eq!(
        call.signaling
            .registry()
            .get_session(&call.session_id)
            .unwrap()
            .member_count,
        2
    );
}

#[tokio::test]
async fn rejoin_after_session_emptied_reports_not_found_once() {
    let mut call = establish().await;
    let x_id = call.x_id.clone();

    call.x.leave().await.unwrap();
    expect(&mut call.y_events, |e| match e {
        CallEvent::MemberLeft { participant_id, .. } if *participant_id == x_id => Some(()),
        _ => None,
    })
    .await;

    // Y was the last member, so dropping it destroys the session
    call.signaling.disconnect(&call.y_id);
    assert!(!call.signaling.registry().session_exists(&call.session_id));

    expect(&mut call.y_events, |e| match e {
        CallEvent::SignalingReconnected => Some(()),
        _ => None,
    })
    .await;
    let err = expect(&mut call.y_events, |e| match e {
        CallEvent::Error(err) => Some(err.clone()),
        _ => None,
    })
    .await;
    assert!(matches!(
        err,
        Error::Session {
            code: ErrorCode::SessionNotFound,
            ..
        }
    ));

    // Nothing further is attempted
    let quiet = tokio::time::timeout(Duration::from_millis(300), async {
        loop {
            match call.y_events.recv().await {
                Some(CallEvent::SessionJoined { .. } | CallEvent::Error(_)) => return,
                Some(_) => continue,
                None => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(quiet.is_err());
    assert_eq!(call.signaling.registry().stats().live_sessions, 0);
}

#[tokio::test]
async fn candidate_from_unknown_sender_creates_no_connection() {
    let (url, signaling) = start_server("trickle1").await;
    let network = FakeNetwork::default();
    let session_id = signaling.registry().create_session(None).unwrap();

    let (mut raw, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let text_frame =
        |message: ClientMessage| Message::Text(protocol::encode(&message).unwrap().into());
    raw.send(text_frame(ClientMessage::JoinSession {
        session_id: session_id.clone(),
        display_name: Some("Raw".to_string()),
    }))
    .await
    .unwrap();
    let raw_id = loop {
        let frame = raw.next().await.unwrap().unwrap();
        if let Message::Text(text) = frame {
            if let ServerMessage::SessionJoined { participant_id, .. } =
                protocol::decode_server(text.as_str()).unwrap()
            {
                break participant_id;
            }
        }
    };

    // X joins second, so it waits for an offer and owns no connection yet
    let (x, mut x_events) = spawn_client(&url, &network);
    x.join_session(session_id, Some("Alice".to_string()))
        .await
        .unwrap();
    let x_id = expect(&mut x_events, |e| match e {
        CallEvent::SessionJoined { participant_id, .. } => Some(participant_id.clone()),
        _ => None,
    })
    .await;

    raw.send(text_frame(ClientMessage::IceCandidate {
        candidate_payload: IceCandidate {
            candidate: "candidate:9 1 UDP 2130706431 10.0.0.9 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        },
        target_id: Some(x_id.clone()),
    }))
    .await
    .unwrap();
    raw.send(text_frame(ClientMessage::StatusUpdate {
        status: "after-candidate".to_string(),
    }))
    .await
    .unwrap();

    let sender = expect(&mut x_events, |e| match e {
        CallEvent::StatusUpdate { sender_id, status } if status == "after-candidate" => {
            Some(sender_id.clone())
        }
        _ => None,
    })
    .await;
    assert_eq!(sender, raw_id);
    assert!(network.engine(&x_id, &raw_id).is_none());
}
