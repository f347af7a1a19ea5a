//! Host-side state owner and widget broadcaster.
//!
//! The messenger is the only writer of [`SystemState`]. Every bus event and
//! every inbound widget message is applied on one task, one at a time: update
//! state, then broadcast to the frames that need it. A broadcast therefore
//! never starts while another is in progress.
//!
//! Delivery is best-effort. A send failure is logged and the broadcast moves on
//! to the next frame, and there are no acknowledgements. This is safe because
//! the protocol is level-triggered: every update carries the full snapshot, so
//! the next successful send to a frame repairs whatever it missed, and a frame
//! that reloads re-handshakes with `widget-ready` and receives full state
//! immediately.

mod protocol;
mod state;
mod transport;

pub use protocol::{InboundMessage, OutboundMessage, StatePayload, UpdateAction};
pub use state::{DedupBaseline, RegisteredWidget, SystemState, WidgetSessionId};
pub use transport::{
    ChannelTransport, FrameEndpoint, FrameId, InboundHandler, TransportError, WidgetFrame,
    WidgetTransport,
};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::bus::{AppEvent, EventBus};
use state::WidgetSession;

/// Outcome counts of one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

struct MessengerInner {
    state: SystemState,
    sessions: HashMap<FrameId, WidgetSession>,
    focused: Option<String>,
}

type Inbound = (FrameId, Value);

pub struct WidgetMessenger {
    bus: Arc<EventBus>,
    transport: Arc<dyn WidgetTransport>,
    inner: Mutex<MessengerInner>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
}

impl WidgetMessenger {
    /// Create the messenger and route the transport's inbound traffic into
    /// its queue. Nothing is processed until [`WidgetMessenger::start`].
    pub fn new(
        bus: Arc<EventBus>,
        transport: Arc<dyn WidgetTransport>,
        theme: impl Into<String>,
    ) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Inbound>();
        transport.on_message(Arc::new(move |frame, message| {
            if inbound_tx.send((frame, message)).is_err() {
                tracing::debug!("messenger stopped, inbound widget message dropped");
            }
        }));

        Arc::new(Self {
            bus,
            transport,
            inner: Mutex::new(MessengerInner {
                state: SystemState::new(theme),
                sessions: HashMap::new(),
                focused: None,
            }),
            inbound_rx: Mutex::new(Some(inbound_rx)),
        })
    }

    /// Spawn the messenger loop. The bus subscription is taken before this
    /// returns, so events emitted afterwards are never missed.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let messenger = Arc::clone(self);
        let mut events = self.bus.subscribe();
        let inbound = self
            .inbound_rx
            .lock()
            .expect("messenger inbound mutex poisoned")
            .take();

        tokio::spawn(async move {
            let Some(mut inbound) = inbound else {
                tracing::warn!("widget messenger already started");
                return;
            };
            tracing::info!("widget messenger started");

            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(envelope) => messenger.handle_event(&envelope.event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "messenger lagged behind the event bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    message = inbound.recv() => match message {
                        Some((frame, raw)) => messenger.handle_inbound(frame, raw),
                        None => break,
                    },
                }
            }
            tracing::info!("widget messenger stopped");
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MessengerInner> {
        self.inner.lock().expect("messenger state mutex poisoned")
    }

    /// Apply one bus event to the state and broadcast if it changed anything
    /// widgets care about.
    pub fn handle_event(&self, event: &AppEvent) {
        let mut inner = self.lock();
        match event {
            AppEvent::DataLoaded { snapshot } => {
                if !inner.state.auth.ready {
                    tracing::debug!(
                        data_type = %snapshot.data_type(),
                        "signed out, dropping data snapshot"
                    );
                    return;
                }
                tracing::debug!(
                    data_type = %snapshot.data_type(),
                    last_updated = snapshot.last_updated(),
                    "applying data snapshot"
                );
                inner.state.apply_snapshot(snapshot.clone());
                self.broadcast_locked(&mut inner, false);
            }
            AppEvent::AuthSuccess { user } => {
                tracing::info!(user = %user.id, "auth ready");
                inner.state.sign_in(user.clone());
                if inner.sessions.values().any(WidgetSession::is_registered) {
                    self.broadcast_locked(&mut inner, false);
                } else {
                    tracing::debug!("no widgets registered yet, auth state held for handshake");
                }
            }
            AppEvent::AuthSignout => {
                tracing::info!("signed out, resetting widget state");
                inner.state.sign_out();
                // Handshakes survive; only what each frame was last sent is
                // forgotten.
                for session in inner.sessions.values_mut() {
                    session.last_sent = None;
                }
                self.broadcast_locked(&mut inner, true);
            }
            AppEvent::ThemeChanged { theme } => {
                if inner.state.theme == *theme {
                    tracing::debug!(theme = %theme, "theme unchanged, not broadcasting");
                    return;
                }
                inner.state.theme = theme.clone();
                self.broadcast_locked(&mut inner, false);
            }
            _ => {}
        }
    }

    /// Handle one message posted by a widget frame.
    pub fn handle_inbound(&self, frame: FrameId, raw: Value) {
        match InboundMessage::parse(&raw) {
            InboundMessage::WidgetReady { widget } => self.register(frame, widget),
            InboundMessage::WidgetError {
                widget,
                error,
                details,
            } => {
                tracing::warn!(
                    frame = %frame,
                    widget = ?widget,
                    error = %error,
                    details = ?details,
                    "widget reported an error"
                );
                self.bus.emit(AppEvent::WidgetError {
                    widget,
                    error,
                    details,
                });
            }
            InboundMessage::RequestUploadModal { widget } => {
                tracing::debug!(frame = %frame, widget = ?widget, "upload modal requested");
                self.bus.emit(AppEvent::UploadRequested { widget });
            }
            InboundMessage::RequestRefresh { widget, data_type } => {
                tracing::debug!(
                    frame = %frame,
                    widget = ?widget,
                    data_type = ?data_type,
                    "refresh requested"
                );
                self.bus.emit(AppEvent::RefreshRequested { data_type, widget });
            }
            InboundMessage::Navigation { action } => {
                self.bus.emit(AppEvent::Navigation { action });
                self.forward_to_focused(&OutboundMessage::WidgetCommand { action });
            }
            InboundMessage::Unknown { kind } => {
                tracing::debug!(
                    frame = %frame,
                    kind = ?kind,
                    "ignoring unrecognized widget message"
                );
            }
        }
    }

    fn register(&self, frame: FrameId, widget: String) {
        let session_id = {
            let mut inner = self.lock();
            let mut session = WidgetSession::registered(widget.clone());
            let session_id = session.session_id.clone().unwrap_or_default();

            let baseline = inner.state.baseline();
            let message = OutboundMessage::state_update(inner.state.to_payload());
            match self.transport.send(&frame, &message) {
                Ok(()) => session.last_sent = Some(baseline),
                Err(error) => {
                    tracing::warn!(
                        frame = %frame,
                        widget = %widget,
                        %error,
                        "initial state send failed"
                    )
                }
            }
            if let Some(previous) = inner.sessions.insert(frame.clone(), session) {
                if previous.is_registered() {
                    tracing::debug!(
                        frame = %frame,
                        widget = %widget,
                        "frame re-handshaked, new session"
                    );
                }
            }
            session_id
        };

        tracing::info!(frame = %frame, widget = %widget, session = %session_id, "widget ready");
        self.bus.emit(AppEvent::WidgetReady {
            widget,
            session_id: session_id.to_string(),
        });
    }

    fn forward_to_focused(&self, message: &OutboundMessage) {
        let inner = self.lock();
        let Some(focused) = inner.focused.as_deref() else {
            tracing::debug!("navigation with no focused widget");
            return;
        };
        let targets: Vec<FrameId> = inner
            .sessions
            .iter()
            .filter(|(_, session)| session.name.as_deref() == Some(focused))
            .map(|(frame, _)| frame.clone())
            .collect();
        if targets.is_empty() {
            tracing::debug!(widget = focused, "focused widget has no live frame");
        }
        for frame in targets {
            if let Err(error) = self.transport.send(&frame, message) {
                tracing::warn!(frame = %frame, %error, "navigation forward failed");
            }
        }
    }

    /// Route subsequent navigation input to widget `name`.
    pub fn set_focus(&self, name: Option<&str>) {
        self.lock().focused = name.map(str::to_string);
    }

    pub fn state(&self) -> SystemState {
        self.lock().state.clone()
    }

    pub fn registered_widgets(&self) -> Vec<RegisteredWidget> {
        let inner = self.lock();
        let mut widgets: Vec<RegisteredWidget> = inner
            .sessions
            .values()
            .filter_map(|session| {
                Some(RegisteredWidget {
                    name: session.name.clone()?,
                    session_id: session.session_id.clone()?,
                    ready_at: session.ready_at?,
                })
            })
            .collect();
        widgets.sort_by(|a, b| a.ready_at.cmp(&b.ready_at).then_with(|| a.name.cmp(&b.name)));
        widgets
    }

    /// Push current state to every frame that does not already have it.
    pub fn broadcast(&self) -> BroadcastReport {
        let mut inner = self.lock();
        self.broadcast_locked(&mut inner, false)
    }

    fn broadcast_locked(&self, inner: &mut MessengerInner, force: bool) -> BroadcastReport {
        let frames = self.transport.frames();

        let live: HashSet<&FrameId> = frames.iter().map(|frame| &frame.id).collect();
        inner.sessions.retain(|id, session| {
            let keep = live.contains(id);
            if !keep {
                tracing::debug!(
                    frame = %id,
                    widget = ?session.name,
                    "frame gone, dropping session"
                );
            }
            keep
        });

        let baseline = inner.state.baseline();
        let mut message: Option<OutboundMessage> = None;
        let mut report = BroadcastReport::default();

        for frame in &frames {
            let session = inner.sessions.entry(frame.id.clone()).or_default();
            if !force && !session.needs(&baseline) {
                report.skipped += 1;
                continue;
            }

            let message = message
                .get_or_insert_with(|| OutboundMessage::state_update(inner.state.to_payload()));
            match self.transport.send(&frame.id, message) {
                Ok(()) => {
                    session.last_sent = Some(baseline.clone());
                    report.sent += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        frame = %frame.id,
                        widget = ?frame.widget,
                        %error,
                        "state send failed"
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::debug!(
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            "broadcast complete"
        );
        report
    }
}

#[cfg(test)]
mod tests;
