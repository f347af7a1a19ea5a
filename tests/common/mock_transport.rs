//! Mock widget transport for host integration testing.

use std::collections::HashSet;
use std::sync::Mutex;

use serde_json::Value;

use hearth_lib::messenger::{
    FrameId, InboundHandler, OutboundMessage, StatePayload, TransportError, WidgetFrame,
    WidgetTransport,
};

/// A transport whose frames are plain records. Every successful send is kept
/// so tests can inspect exactly what each frame received.
#[derive(Default)]
pub struct MockTransport {
    frames: Mutex<Vec<WidgetFrame>>,
    sent: Mutex<Vec<(FrameId, OutboundMessage)>>,
    broken: Mutex<HashSet<FrameId>>,
    handlers: Mutex<Vec<InboundHandler>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a loaded frame for `widget`.
    pub fn open_frame(&self, id: &str, widget: &str) -> FrameId {
        let frame = FrameId::new(id);
        self.frames.lock().unwrap().push(WidgetFrame {
            id: frame.clone(),
            widget: Some(widget.to_string()),
            loaded: true,
        });
        frame
    }

    pub fn close_frame(&self, id: &FrameId) {
        self.frames.lock().unwrap().retain(|frame| &frame.id != id);
    }

    /// Make every send to `id` fail until [`MockTransport::repair`].
    pub fn break_frame(&self, id: &FrameId) {
        self.broken.lock().unwrap().insert(id.clone());
    }

    pub fn repair(&self, id: &FrameId) {
        self.broken.lock().unwrap().remove(id);
    }

    /// Post a message to the host as `from`.
    pub fn post(&self, from: &FrameId, message: Value) {
        let handlers = self.handlers.lock().unwrap().clone();
        for handler in handlers {
            handler(from.clone(), message.clone());
        }
    }

    /// Post the `widget-ready` handshake as `from`.
    pub fn handshake(&self, from: &FrameId, widget: &str) {
        self.post(from, serde_json::json!({ "type": "widget-ready", "widget": widget }));
    }

    pub fn updates_for(&self, id: &FrameId) -> Vec<StatePayload> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(frame, _)| frame == id)
            .filter_map(|(_, message)| match message {
                OutboundMessage::WidgetUpdate { payload, .. } => Some(payload.clone()),
                OutboundMessage::WidgetCommand { .. } => None,
            })
            .collect()
    }

    pub fn commands_for(&self, id: &FrameId) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(frame, message)| {
                frame == id && matches!(message, OutboundMessage::WidgetCommand { .. })
            })
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn latest_for(&self, id: &FrameId) -> Option<StatePayload> {
        self.updates_for(id).pop()
    }
}

impl WidgetTransport for MockTransport {
    fn frames(&self) -> Vec<WidgetFrame> {
        self.frames.lock().unwrap().clone()
    }

    fn send(&self, frame: &FrameId, message: &OutboundMessage) -> Result<(), TransportError> {
        if !self.frames.lock().unwrap().iter().any(|f| &f.id == frame) {
            return Err(TransportError::FrameGone(frame.clone()));
        }
        if self.broken.lock().unwrap().contains(frame) {
            return Err(TransportError::Send(format!("{frame} is not accepting messages")));
        }
        self.sent
            .lock()
            .unwrap()
            .push((frame.clone(), message.clone()));
        Ok(())
    }

    fn on_message(&self, handler: InboundHandler) {
        self.handlers.lock().unwrap().push(handler);
    }
}
