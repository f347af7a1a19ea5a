//! Cross-frame transport abstraction.
//!
//! The host talks to widget frames only through this trait: enumerate the
//! frames that exist right now, post a message to one of them, and receive
//! whatever the frames post back. There is no delivery acknowledgement.

use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::protocol::OutboundMessage;

/// Transport-assigned handle for a frame. Only valid while the frame exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(String);

impl FrameId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A frame as seen by the host at enumeration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetFrame {
    pub id: FrameId,
    /// Widget name inferred from the frame's source, if known.
    pub widget: Option<String>,
    /// The frame finished loading its document.
    pub loaded: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("frame {0} is gone")]
    FrameGone(FrameId),
    #[error("send failed: {0}")]
    Send(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type InboundHandler = Arc<dyn Fn(FrameId, serde_json::Value) + Send + Sync>;

pub trait WidgetTransport: Send + Sync {
    /// Frames currently attached. Queried live on every broadcast.
    fn frames(&self) -> Vec<WidgetFrame>;

    /// Fire-and-forget post to one frame.
    fn send(&self, frame: &FrameId, message: &OutboundMessage) -> Result<(), TransportError>;

    /// Register a handler for every message any frame posts to the host.
    fn on_message(&self, handler: InboundHandler);
}

struct ChannelFrame {
    info: WidgetFrame,
    outbox: mpsc::UnboundedSender<serde_json::Value>,
}

/// In-process transport: each attached frame is an unbounded channel pair.
///
/// Used by embedding hosts that run widgets in the same process, and by the
/// headless simulator.
#[derive(Default)]
pub struct ChannelTransport {
    frames: Mutex<Vec<ChannelFrame>>,
    handlers: Mutex<Vec<InboundHandler>>,
}

impl ChannelTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a new frame and return the widget-side endpoint.
    pub fn attach(self: &Arc<Self>, id: impl Into<String>, widget: Option<&str>) -> FrameEndpoint {
        let id = FrameId::new(id);
        let (outbox, inbox) = mpsc::unbounded_channel();
        let mut frames = self.frames.lock().expect("channel transport mutex poisoned");
        frames.retain(|frame| frame.info.id != id);
        frames.push(ChannelFrame {
            info: WidgetFrame {
                id: id.clone(),
                widget: widget.map(str::to_string),
                loaded: false,
            },
            outbox,
        });

        FrameEndpoint {
            id,
            inbox,
            transport: Arc::downgrade(self),
        }
    }

    pub fn detach(&self, id: &FrameId) -> bool {
        let mut frames = self.frames.lock().expect("channel transport mutex poisoned");
        let before = frames.len();
        frames.retain(|frame| &frame.info.id != id);
        frames.len() != before
    }

    pub fn mark_loaded(&self, id: &FrameId) {
        let mut frames = self.frames.lock().expect("channel transport mutex poisoned");
        if let Some(frame) = frames.iter_mut().find(|frame| &frame.info.id == id) {
            frame.info.loaded = true;
        }
    }

    fn deliver_inbound(&self, from: &FrameId, message: serde_json::Value) {
        let handlers: Vec<InboundHandler> = self
            .handlers
            .lock()
            .expect("channel transport mutex poisoned")
            .clone();
        for handler in handlers {
            handler(from.clone(), message.clone());
        }
    }
}

impl WidgetTransport for ChannelTransport {
    fn frames(&self) -> Vec<WidgetFrame> {
        self.frames
            .lock()
            .expect("channel transport mutex poisoned")
            .iter()
            .map(|frame| frame.info.clone())
            .collect()
    }

    fn send(&self, frame: &FrameId, message: &OutboundMessage) -> Result<(), TransportError> {
        let value = serde_json::to_value(message)
            .map_err(|error| TransportError::Serialization(error.to_string()))?;
        let frames = self.frames.lock().expect("channel transport mutex poisoned");
        let target = frames
            .iter()
            .find(|candidate| &candidate.info.id == frame)
            .ok_or_else(|| TransportError::FrameGone(frame.clone()))?;
        target
            .outbox
            .send(value)
            .map_err(|_| TransportError::FrameGone(frame.clone()))
    }

    fn on_message(&self, handler: InboundHandler) {
        self.handlers
            .lock()
            .expect("channel transport mutex poisoned")
            .push(handler);
    }
}

/// Widget side of a [`ChannelTransport`] frame.
pub struct FrameEndpoint {
    id: FrameId,
    inbox: mpsc::UnboundedReceiver<serde_json::Value>,
    transport: Weak<ChannelTransport>,
}

impl FrameEndpoint {
    pub fn id(&self) -> &FrameId {
        &self.id
    }

    /// Post a message to the host.
    pub fn post(&self, message: serde_json::Value) {
        match self.transport.upgrade() {
            Some(transport) => transport.deliver_inbound(&self.id, message),
            None => tracing::debug!(frame = %self.id, "host transport dropped, message discarded"),
        }
    }

    pub fn mark_loaded(&self) {
        if let Some(transport) = self.transport.upgrade() {
            transport.mark_loaded(&self.id);
        }
    }

    pub async fn recv(&mut self) -> Option<serde_json::Value> {
        self.inbox.recv().await
    }

    pub fn try_recv(&mut self) -> Option<serde_json::Value> {
        self.inbox.try_recv().ok()
    }

    /// Drain everything the host has sent so far.
    pub fn drain(&mut self) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();
        while let Ok(message) = self.inbox.try_recv() {
            messages.push(message);
        }
        messages
    }
}
