//! Top-level state machine for a call: one live attempt at a time.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CallConfig;
use crate::error::CallError;
use crate::media::{MediaDevices, MediaStream};
use crate::model::{CallRole, CallStatus, CallType, ConnectionState, PartyId, SessionDescription};
use crate::negotiation::{NegotiationOrchestrator, StartOutcome};
use crate::peer::{PeerConnector, PeerEvents, PeerSession, SessionEvent};
use crate::scheduler::{PollingScheduler, Visibility};
use crate::signaling::SignalingChannel;

/// Collaborators a controller needs to run calls.
#[derive(Clone)]
pub struct CallDeps {
    pub config: CallConfig,
    pub devices: Arc<dyn MediaDevices>,
    pub connector: Arc<dyn PeerConnector>,
    pub signaling: Arc<dyn SignalingChannel>,
}

/// Observable state of the controller.
#[derive(Debug, Clone, Default)]
pub struct CallSnapshot {
    pub local_stream: Option<MediaStream>,
    pub remote_stream: Option<MediaStream>,
    pub status: CallStatus,
    pub error: Option<String>,
    pub is_muted: bool,
    pub is_camera_off: bool,
    pub role: Option<CallRole>,
    pub call_type: Option<CallType>,
    pub counterparty: Option<PartyId>,
}

impl CallSnapshot {
    pub fn status_text(&self) -> &'static str {
        if self.error.is_some() {
            return "Call failed";
        }
        match self.status {
            CallStatus::Idle | CallStatus::Initializing => "Initializing...",
            CallStatus::Connecting => match self.role {
                Some(CallRole::Initiator) => "Calling...",
                _ => "Connecting...",
            },
            CallStatus::Connected => "Connected",
            CallStatus::Failed => "Connection failed",
            CallStatus::Closed => "Call ended",
        }
    }
}

// Per-attempt state; dropping it discards the guard flags and dedup set and
// cancels the attempt's timer.
struct CallSession {
    generation: u64,
    role: CallRole,
    session: Arc<PeerSession>,
    orchestrator: Arc<NegotiationOrchestrator>,
    scheduler: PollingScheduler,
    pump: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct ControllerState {
    generation: u64,
    current: Option<CallSession>,
}

struct Inner {
    deps: CallDeps,
    visibility: Visibility,
    state: Mutex<ControllerState>,
    snapshot: watch::Sender<CallSnapshot>,
}

/// Opens and closes call attempts and exposes their status.
#[derive(Clone)]
pub struct CallController {
    inner: Arc<Inner>,
}

impl CallController {
    pub fn new(deps: CallDeps) -> Self {
        let (snapshot, _) = watch::channel(CallSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                deps,
                visibility: Visibility::default(),
                state: Mutex::new(ControllerState::default()),
                snapshot,
            }),
        }
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Shared by every attempt this controller opens.
    pub fn visibility(&self) -> Visibility {
        self.inner.visibility.clone()
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .state
            .lock()
            .current
            .as_ref()
            .is_some_and(|call| call.scheduler.is_running())
    }

    /// Start a call attempt. `inbound_offer` is the offer blob a receiver
    /// already holds; without one the receiver polls the relay for it.
    pub async fn open(
        &self,
        role: CallRole,
        call_type: CallType,
        counterparty: PartyId,
        inbound_offer: Option<String>,
    ) -> Result<(), CallError> {
        let inner = &self.inner;
        let (generation, session, orchestrator) = {
            let mut state = inner.state.lock();
            if state.current.is_some() {
                return Err(CallError::AlreadyOpen);
            }
            state.generation += 1;
            let session = PeerSession::new(call_type);
            let orchestrator = Arc::new(NegotiationOrchestrator::new(
                role,
                counterparty.clone(),
                Arc::clone(&inner.deps.signaling),
                Arc::clone(&session),
            ));
            state.current = Some(CallSession {
                generation: state.generation,
                role,
                session: Arc::clone(&session),
                orchestrator: Arc::clone(&orchestrator),
                scheduler: PollingScheduler::with_visibility(
                    inner.deps.config.poll_interval,
                    inner.visibility.clone(),
                ),
                pump: None,
            });
            inner.snapshot.send_replace(CallSnapshot {
                status: CallStatus::Initializing,
                role: Some(role),
                call_type: Some(call_type),
                counterparty: Some(counterparty.clone()),
                ..CallSnapshot::default()
            });
            (state.generation, session, orchestrator)
        };
        info!(
            role = role.as_str(),
            %call_type,
            counterparty = %counterparty,
            generation,
            "opening call"
        );

        let events = match session
            .acquire_media(
                inner.deps.devices.as_ref(),
                inner.deps.connector.as_ref(),
                &inner.deps.config,
            )
            .await
        {
            Ok(events) => events,
            Err(err) => {
                if !inner.is_current(generation) {
                    debug!(error = %err, "call closed while acquiring media");
                    return Ok(());
                }
                warn!(error = %err, "local media unavailable");
                let message = err.user_message().to_string();
                inner.fail(generation, Some(message)).await;
                return Err(CallError::Media(err));
            }
        };

        if !self.enter_connecting(generation, &session, events, &orchestrator) {
            debug!("call closed before negotiation started");
            return Ok(());
        }

        let inbound = match inbound_offer.as_deref().map(SessionDescription::from_blob) {
            Some(Ok(offer)) => Some(offer),
            Some(Err(err)) => {
                warn!(error = %err, "inbound offer could not be parsed");
                inner
                    .fail(generation, Some(failure_message(role).to_string()))
                    .await;
                return Err(CallError::Negotiation(err));
            }
            None => None,
        };

        match orchestrator.start(inbound).await {
            Ok(StartOutcome::AwaitingOffer) => {
                tokio::spawn(refresh_attempt(
                    Arc::downgrade(inner),
                    generation,
                    role,
                    Arc::clone(&orchestrator),
                ));
                Ok(())
            }
            Ok(outcome) => {
                debug!(?outcome, "negotiation started");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "negotiation could not start");
                inner
                    .fail(generation, Some(failure_message(role).to_string()))
                    .await;
                Err(CallError::Negotiation(err))
            }
        }
    }

    /// Tear down the live attempt. Repeated calls are no-ops.
    ///
    /// Returns the relay cleanup task when one was started.
    pub async fn close(&self) -> Option<JoinHandle<()>> {
        let inner = &self.inner;
        let mut call = {
            let mut state = inner.state.lock();
            let call = state.current.take()?;
            inner.snapshot.send_modify(|snapshot| {
                snapshot.status = CallStatus::Closed;
                snapshot.error = None;
                snapshot.is_muted = false;
                snapshot.is_camera_off = false;
                snapshot.local_stream = None;
                snapshot.remote_stream = None;
            });
            call
        };

        call.scheduler.stop();
        call.session.cleanup().await;
        if let Some(pump) = call.pump.take() {
            pump.abort();
        }
        info!(generation = call.generation, "call closed");

        if !inner.deps.config.clear_relay_on_close {
            return None;
        }
        let signaling = Arc::clone(&inner.deps.signaling);
        let counterparty = call.orchestrator.counterparty().clone();
        Some(tokio::spawn(async move {
            let local = signaling.local_party().clone();
            if let Err(err) = signaling.clear_call_state(&local, &counterparty).await {
                warn!(error = %err, "failed to clear relay call state");
            }
        }))
    }

    /// Returns the new muted state, or `None` when there is nothing to mute.
    pub fn toggle_mute(&self) -> Option<bool> {
        let session = self.live_session()?;
        let muted = session.toggle_mute()?;
        self.inner
            .snapshot
            .send_modify(|snapshot| snapshot.is_muted = muted);
        Some(muted)
    }

    /// Returns the new camera-off state, or `None` for audio calls and
    /// before media is ready.
    pub fn toggle_camera(&self) -> Option<bool> {
        let session = self.live_session()?;
        let off = session.toggle_camera()?;
        self.inner
            .snapshot
            .send_modify(|snapshot| snapshot.is_camera_off = off);
        Some(off)
    }

    /// Re-fetch relay state now instead of waiting for the next tick.
    ///
    /// A fatal negotiation error fails the call and is returned.
    pub async fn manual_refresh(&self) -> Result<(), CallError> {
        let (generation, role, orchestrator) = {
            let state = self.inner.state.lock();
            state
                .current
                .as_ref()
                .map(|call| (call.generation, call.role, Arc::clone(&call.orchestrator)))
                .ok_or(CallError::NotOpen)?
        };
        info!("manual refresh");
        if let Err(err) = orchestrator.refresh().await {
            warn!(error = %err, "negotiation failed during refresh");
            self.inner
                .fail(generation, Some(failure_message(role).to_string()))
                .await;
            return Err(CallError::Negotiation(err));
        }
        Ok(())
    }

    fn live_session(&self) -> Option<Arc<PeerSession>> {
        let state = self.inner.state.lock();
        state.current.as_ref().map(|call| Arc::clone(&call.session))
    }

    fn enter_connecting(
        &self,
        generation: u64,
        session: &Arc<PeerSession>,
        events: PeerEvents,
        orchestrator: &Arc<NegotiationOrchestrator>,
    ) -> bool {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        let Some(call) = state
            .current
            .as_mut()
            .filter(|call| call.generation == generation)
        else {
            return false;
        };
        if self.inner.snapshot.borrow().status != CallStatus::Initializing {
            return false;
        }

        let local_stream = session.local_stream();
        inner.snapshot.send_modify(|snapshot| {
            snapshot.status = CallStatus::Connecting;
            snapshot.local_stream = local_stream;
        });

        call.pump = Some(tokio::spawn(pump_events(
            Arc::downgrade(inner),
            generation,
            events,
            Arc::clone(orchestrator),
        )));

        let refresher = Arc::clone(orchestrator);
        let owner = Arc::downgrade(inner);
        let role = call.role;
        call.scheduler.start(move || {
            refresh_attempt(owner.clone(), generation, role, Arc::clone(&refresher))
        });
        info!(generation, "call connecting");
        true
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.state
            .lock()
            .current
            .as_ref()
            .is_some_and(|call| call.generation == generation)
    }

    /// Terminal failure of the current attempt: stop polling and release the
    /// session, but keep the attempt until `close()`.
    async fn fail(&self, generation: u64, error: Option<String>) {
        let session = {
            let state = self.state.lock();
            let Some(call) = state
                .current
                .as_ref()
                .filter(|call| call.generation == generation)
            else {
                return;
            };
            call.scheduler.stop();
            self.snapshot.send_modify(|snapshot| {
                snapshot.status = CallStatus::Failed;
                if error.is_some() {
                    snapshot.error = error;
                }
            });
            Arc::clone(&call.session)
        };
        session.cleanup().await;
    }

    fn update(&self, generation: u64, apply: impl FnOnce(&mut CallSnapshot)) -> bool {
        let state = self.state.lock();
        let current = state
            .current
            .as_ref()
            .is_some_and(|call| call.generation == generation);
        if current {
            self.snapshot.send_modify(apply);
        }
        current
    }
}

fn failure_message(role: CallRole) -> &'static str {
    match role {
        CallRole::Initiator => "Failed to create call offer",
        CallRole::Receiver => "Failed to answer call",
    }
}

/// One refresh of the attempt tagged `generation`; a fatal error fails it.
async fn refresh_attempt(
    inner: Weak<Inner>,
    generation: u64,
    role: CallRole,
    orchestrator: Arc<NegotiationOrchestrator>,
) {
    let Err(err) = orchestrator.refresh().await else {
        return;
    };
    warn!(generation, error = %err, "negotiation failed during refresh");
    if let Some(inner) = inner.upgrade() {
        inner
            .fail(generation, Some(failure_message(role).to_string()))
            .await;
    }
}

async fn pump_events(
    inner: Weak<Inner>,
    generation: u64,
    mut events: PeerEvents,
    orchestrator: Arc<NegotiationOrchestrator>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            SessionEvent::StateChanged(ConnectionState::Connected) => {
                if inner.update(generation, |s| s.status = CallStatus::Connected) {
                    info!(generation, "call connected");
                }
            }
            SessionEvent::StateChanged(ConnectionState::Disconnected) => {
                if inner.update(generation, |s| s.status = CallStatus::Failed) {
                    warn!(generation, "peer connection disconnected");
                }
            }
            SessionEvent::StateChanged(ConnectionState::Failed) => {
                warn!(generation, "peer connection failed");
                inner.fail(generation, None).await;
                return;
            }
            SessionEvent::StateChanged(other) => {
                debug!(state = ?other, "peer connection state");
            }
            SessionEvent::RemoteStream(stream) => {
                inner.update(generation, |s| s.remote_stream = Some(stream));
            }
            SessionEvent::LocalCandidate(candidate) => {
                orchestrator.publish_local_candidate(&candidate).await;
            }
        }
    }
}

