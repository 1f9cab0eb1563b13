mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use common::{CountingChannel, GatedDevices, INTERVAL, config, eventually, init_tracing, party, party_with};
use pollcall::media::SyntheticDevices;
use pollcall::model::SessionDescription;
use pollcall::peer::NativeEvent;
use pollcall::signaling::{MemoryRelay, SlotFetch};
use pollcall::{
    CallError, CallRole, CallStatus, CallType, ConnectionState, MediaAcquisitionError, PartyId,
};

#[test_timeout::tokio_timeout_test(secs = 30, paused)]
async fn close_is_idempotent_and_releases_everything() {
    init_tracing();
    let relay = MemoryRelay::new();
    let alice = party(&relay, "alice");
    assert!(alice.controller.close().await.is_none());
    assert_eq!(alice.controller.snapshot().status, CallStatus::Idle);

    alice
        .controller
        .open(CallRole::Initiator, CallType::Video, "bob".into(), None)
        .await
        .expect("open");
    let local = alice.controller.snapshot().local_stream.expect("local stream");
    alice.controller.toggle_mute();

    let clearing = alice.controller.close().await.expect("relay cleanup task");
    clearing.await.expect("cleanup task");
    assert!(alice.controller.close().await.is_none());
    assert!(alice.controller.close().await.is_none());

    let snapshot = alice.controller.snapshot();
    assert_eq!(snapshot.status, CallStatus::Closed);
    assert_eq!(snapshot.status_text(), "Call ended");
    assert!(!snapshot.is_muted);
    assert!(snapshot.local_stream.is_none());
    assert!(local.tracks().iter().all(|track| track.is_stopped()));
    assert_eq!(alice.pc().close_count(), 1);
    assert_eq!(relay.offer(&alice.id, &"bob".into()), SlotFetch::empty());

    assert_eq!(alice.controller.toggle_mute(), None);
    assert!(matches!(
        alice.controller.manual_refresh().await,
        Err(CallError::NotOpen)
    ));
}

#[test_timeout::tokio_timeout_test(secs = 30, paused)]
async fn second_open_is_rejected_until_closed() {
    init_tracing();
    let relay = MemoryRelay::new();
    let alice = party(&relay, "alice");
    let bob: PartyId = "bob".into();

    alice
        .controller
        .open(CallRole::Initiator, CallType::Audio, bob.clone(), None)
        .await
        .expect("open");
    let err = alice
        .controller
        .open(CallRole::Initiator, CallType::Audio, bob.clone(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::AlreadyOpen));
    assert_eq!(alice.connector.connection_count(), 1);

    alice.controller.close().await;
    alice
        .controller
        .open(CallRole::Initiator, CallType::Audio, bob, None)
        .await
        .expect("reopen");

    // A fresh attempt gets a fresh connection and its own single offer.
    assert_eq!(alice.connector.connection_count(), 2);
    assert_eq!(alice.pc().offers_created(), 1);
    assert_eq!(CountingChannel::count(&alice.channel.offers_sent), 2);
    assert_eq!(alice.controller.snapshot().status, CallStatus::Connecting);
    alice.controller.close().await;
}

#[test_timeout::tokio_timeout_test(secs = 30, paused)]
async fn media_failure_is_fatal_and_reported() {
    init_tracing();
    let relay = MemoryRelay::new();
    let alice = party_with(
        &relay,
        "alice",
        Arc::new(SyntheticDevices::denied()),
        config(),
    );

    let err = alice
        .controller
        .open(CallRole::Initiator, CallType::Video, "bob".into(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CallError::Media(MediaAcquisitionError::PermissionDenied)
    ));

    let snapshot = alice.controller.snapshot();
    assert_eq!(snapshot.status, CallStatus::Failed);
    assert_eq!(snapshot.status_text(), "Call failed");
    assert_eq!(
        snapshot.error.as_deref(),
        Some("Permission denied. Please allow access to your camera and microphone.")
    );
    assert!(!alice.controller.is_polling());
    assert_eq!(alice.connector.connection_count(), 0);
    assert_eq!(relay.offer(&alice.id, &"bob".into()), SlotFetch::empty());

    alice.controller.close().await;
    let snapshot = alice.controller.snapshot();
    assert_eq!(snapshot.status, CallStatus::Closed);
    assert!(snapshot.error.is_none());
}

#[test_timeout::tokio_timeout_test(secs = 30, paused)]
async fn native_failure_is_terminal() {
    init_tracing();
    let relay = MemoryRelay::new();
    let alice = party(&relay, "alice");
    alice
        .controller
        .open(CallRole::Initiator, CallType::Audio, "bob".into(), None)
        .await
        .expect("open");

    alice
        .pc()
        .emit(NativeEvent::ConnectionState(ConnectionState::Failed));
    eventually("failed", || {
        alice.controller.snapshot().status == CallStatus::Failed
    })
    .await;
    eventually("session released", || alice.pc().close_count() == 1).await;
    assert!(!alice.controller.is_polling());
    assert_eq!(alice.controller.snapshot().status_text(), "Connection failed");

    alice.controller.close().await;
    assert_eq!(alice.controller.snapshot().status, CallStatus::Closed);
    assert_eq!(alice.pc().close_count(), 1);
}

#[test_timeout::tokio_timeout_test(secs = 30, paused)]
async fn disconnect_marks_failed_but_keeps_polling() {
    init_tracing();
    let relay = MemoryRelay::new();
    let alice = party(&relay, "alice");
    alice
        .controller
        .open(CallRole::Initiator, CallType::Audio, "bob".into(), None)
        .await
        .expect("open");

    alice
        .pc()
        .emit(NativeEvent::ConnectionState(ConnectionState::Connected));
    eventually("connected", || {
        alice.controller.snapshot().status == CallStatus::Connected
    })
    .await;

    alice
        .pc()
        .emit(NativeEvent::ConnectionState(ConnectionState::Disconnected));
    eventually("failed", || {
        alice.controller.snapshot().status == CallStatus::Failed
    })
    .await;
    assert!(alice.controller.is_polling());
    assert_eq!(alice.pc().close_count(), 0);

    alice
        .pc()
        .emit(NativeEvent::ConnectionState(ConnectionState::Connected));
    eventually("reconnected", || {
        alice.controller.snapshot().status == CallStatus::Connected
    })
    .await;
    alice.controller.close().await;
}

#[test_timeout::tokio_timeout_test(secs = 30, paused)]
async fn receiver_answers_inbound_offer_without_polling() {
    init_tracing();
    let relay = MemoryRelay::new();
    let bob = party(&relay, "bob");
    let offer = SessionDescription::offer("v=0\r\no1").to_blob();

    bob.controller
        .open(CallRole::Receiver, CallType::Audio, "alice".into(), Some(offer))
        .await
        .expect("open");

    assert_eq!(bob.pc().answers_created(), 1);
    assert_eq!(CountingChannel::count(&bob.channel.answers_sent), 1);
    assert_eq!(CountingChannel::count(&bob.channel.offer_fetches), 0);
    assert!(
        relay
            .answer(&"alice".into(), &bob.id)
            .usable_payload()
            .is_some()
    );

    // A later poll finds the offer slot but must not answer again.
    relay.put_offer(&"alice".into(), &bob.id, SessionDescription::offer("v=0\r\no1").to_blob());
    sleep(INTERVAL * 3).await;
    assert_eq!(bob.pc().answers_created(), 1);
    assert_eq!(CountingChannel::count(&bob.channel.answers_sent), 1);
    bob.controller.close().await;
}

#[test_timeout::tokio_timeout_test(secs = 30, paused)]
async fn malformed_inbound_offer_fails_the_call() {
    init_tracing();
    let relay = MemoryRelay::new();
    let bob = party(&relay, "bob");

    let err = bob
        .controller
        .open(
            CallRole::Receiver,
            CallType::Audio,
            "alice".into(),
            Some("{not json".into()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::Negotiation(_)));
    let snapshot = bob.controller.snapshot();
    assert_eq!(snapshot.status, CallStatus::Failed);
    assert_eq!(snapshot.error.as_deref(), Some("Failed to answer call"));
    assert!(!bob.controller.is_polling());
    assert_eq!(bob.pc().answers_created(), 0);
}

#[test_timeout::tokio_timeout_test(secs = 30, paused)]
async fn close_during_media_acquisition_wins() {
    init_tracing();
    let relay = MemoryRelay::new();
    let devices = GatedDevices::default();
    let alice = party_with(&relay, "alice", Arc::new(devices.clone()), config());

    let controller = alice.controller.clone();
    let opening = tokio::spawn(async move {
        controller
            .open(CallRole::Initiator, CallType::Audio, "bob".into(), None)
            .await
    });
    eventually("initializing", || {
        alice.controller.snapshot().status == CallStatus::Initializing
    })
    .await;

    alice.controller.close().await;
    devices.release();
    opening.await.expect("join").expect("cancelled open is not an error");

    assert_eq!(alice.controller.snapshot().status, CallStatus::Closed);
    assert_eq!(alice.connector.connection_count(), 0);
    assert!(!alice.controller.is_polling());
    assert_eq!(CountingChannel::count(&alice.channel.offers_sent), 0);
}

#[test_timeout::tokio_timeout_test(secs = 30, paused)]
async fn hidden_surface_pauses_polling_and_manual_refresh_bypasses_it() {
    init_tracing();
    let relay = MemoryRelay::new();
    let alice = party(&relay, "alice");
    let visibility = alice.controller.visibility();

    alice
        .controller
        .open(CallRole::Initiator, CallType::Audio, "bob".into(), None)
        .await
        .expect("open");
    visibility.set_visible(false);
    relay.put_answer(
        &alice.id,
        &"bob".into(),
        SessionDescription::answer("v=0\r\nr1").to_blob(),
    );

    sleep(INTERVAL * 4).await;
    assert_eq!(CountingChannel::count(&alice.channel.answer_fetches), 0);
    assert!(alice.pc().remote_descriptions().is_empty());

    alice.controller.manual_refresh().await.expect("refresh");
    assert_eq!(alice.pc().remote_descriptions().len(), 1);

    visibility.set_visible(true);
    sleep(INTERVAL + Duration::from_millis(100)).await;
    assert!(CountingChannel::count(&alice.channel.candidate_fetches) >= 2);
    alice.controller.close().await;
}

#[test_timeout::tokio_timeout_test(secs = 30, paused)]
async fn camera_toggle_needs_a_video_call() {
    init_tracing();
    let relay = MemoryRelay::new();
    let alice = party(&relay, "alice");
    alice
        .controller
        .open(CallRole::Initiator, CallType::Audio, "bob".into(), None)
        .await
        .expect("open");

    assert_eq!(alice.controller.toggle_camera(), None);
    assert!(!alice.controller.snapshot().is_camera_off);
    alice.controller.close().await;
}

#[test_timeout::tokio_timeout_test(secs = 30, paused)]
async fn answer_failure_on_polled_offer_fails_the_call() {
    init_tracing();
    let relay = MemoryRelay::new();
    let bob = party(&relay, "bob");
    bob.controller
        .open(CallRole::Receiver, CallType::Audio, "alice".into(), None)
        .await
        .expect("open");
    bob.pc().fail_next_answer("codec mismatch");
    relay.put_offer(&"alice".into(), &bob.id, SessionDescription::offer("v=0\r\no1").to_blob());

    eventually("failed", || {
        bob.controller.snapshot().status == CallStatus::Failed
    })
    .await;
    let snapshot = bob.controller.snapshot();
    assert_eq!(snapshot.error.as_deref(), Some("Failed to answer call"));
    assert_eq!(snapshot.status_text(), "Call failed");
    assert!(!bob.controller.is_polling());
    assert_eq!(bob.pc().close_count(), 1);
    assert_eq!(CountingChannel::count(&bob.channel.answers_sent), 0);

    let fetches = CountingChannel::count(&bob.channel.offer_fetches);
    sleep(INTERVAL * 3).await;
    assert_eq!(CountingChannel::count(&bob.channel.offer_fetches), fetches);

    bob.controller.close().await;
    assert_eq!(bob.controller.snapshot().status, CallStatus::Closed);
}

#[test_timeout::tokio_timeout_test(secs = 30, paused)]
async fn failure_of_a_closed_attempt_leaves_the_reopened_one_alone() {
    init_tracing();
    let relay = MemoryRelay::new();
    let bob = party(&relay, "bob");
    bob.controller
        .open(CallRole::Receiver, CallType::Audio, "alice".into(), None)
        .await
        .expect("open");
    let first = bob.pc();
    first.fail_next_answer("codec mismatch");
    first.delay_remote_description(INTERVAL);
    relay.put_offer(&"alice".into(), &bob.id, SessionDescription::offer("v=0\r\no1").to_blob());
    // Let the first attempt start answering.
    sleep(Duration::from_millis(100)).await;

    let clearing = bob.controller.close().await.expect("relay cleanup task");
    clearing.await.expect("cleanup task");
    bob.controller
        .open(CallRole::Receiver, CallType::Audio, "alice".into(), None)
        .await
        .expect("reopen");
    assert_eq!(bob.connector.connection_count(), 2);

    // The first attempt's answer fails after it was closed.
    sleep(INTERVAL * 2).await;
    let snapshot = bob.controller.snapshot();
    assert_eq!(snapshot.status, CallStatus::Connecting);
    assert!(snapshot.error.is_none());
    assert!(bob.controller.is_polling());
    assert_eq!(bob.pc().close_count(), 0);
    bob.controller.close().await;
}
