//! Test doubles shared by the unit tests.
//!
//! `FakeBackend` wraps a [`MemoryBackend`] and adds call counting, failure
//! injection and gates that hold a call open until the test releases it.
//! `FakeTransport` records every message sent to a frame and can be told to
//! fail sends to specific frames.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::core::{CalendarEvent, CalendarMeta};
use crate::messenger::{
    FrameId, InboundHandler, OutboundMessage, StatePayload, TransportError, WidgetFrame,
    WidgetTransport,
};
use crate::services::backend::{
    BackendError, DataBackend, NewPhotoRecord, PhotoFolder, PhotoRecord, StorageQuota, TimeRange,
};
use crate::services::MemoryBackend;

pub struct FakeBackend {
    pub memory: MemoryBackend,
    calls: Mutex<HashMap<&'static str, usize>>,
    failing: Mutex<HashSet<&'static str>>,
    gates: Mutex<HashMap<&'static str, Arc<Semaphore>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            memory: MemoryBackend::new("test-bucket"),
            calls: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub fn fail_on(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn clear_failure(&self, op: &'static str) {
        self.failing.lock().unwrap().remove(op);
    }

    /// Block every subsequent `op` call until [`FakeBackend::release`].
    pub fn hold(&self, op: &'static str) {
        self.gates
            .lock()
            .unwrap()
            .insert(op, Arc::new(Semaphore::new(0)));
    }

    /// Let held `op` calls proceed and stop holding new ones.
    pub fn release(&self, op: &'static str) {
        if let Some(gate) = self.gates.lock().unwrap().remove(op) {
            // Waiters wake with an error from `acquire`, which `enter` ignores.
            gate.close();
        }
    }

    async fn enter(&self, op: &'static str) -> Result<(), BackendError> {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;

        let gate = self.gates.lock().unwrap().get(op).cloned();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }

        if self.failing.lock().unwrap().contains(op) {
            return Err(BackendError::Request(format!("injected failure in {op}")));
        }
        Ok(())
    }
}

#[async_trait]
impl DataBackend for FakeBackend {
    async fn get_storage_quota(&self) -> Result<Option<StorageQuota>, BackendError> {
        self.enter("get_storage_quota").await?;
        self.memory.get_storage_quota().await
    }

    async fn init_storage_quota(&self) -> Result<StorageQuota, BackendError> {
        self.enter("init_storage_quota").await?;
        self.memory.init_storage_quota().await
    }

    async fn update_storage_quota(&self, bytes_delta: i64) -> Result<StorageQuota, BackendError> {
        self.enter("update_storage_quota").await?;
        self.memory.update_storage_quota(bytes_delta).await
    }

    async fn list_folders(&self) -> Result<Vec<PhotoFolder>, BackendError> {
        self.enter("list_folders").await?;
        self.memory.list_folders().await
    }

    async fn list_photos(
        &self,
        folder: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PhotoRecord>, BackendError> {
        self.enter("list_photos").await?;
        self.memory.list_photos(folder, limit).await
    }

    async fn create_photo_record(&self, meta: NewPhotoRecord) -> Result<PhotoRecord, BackendError> {
        self.enter("create_photo_record").await?;
        self.memory.create_photo_record(meta).await
    }

    async fn delete_photo(&self, id: &str) -> Result<(), BackendError> {
        self.enter("delete_photo").await?;
        self.memory.delete_photo(id).await
    }

    async fn delete_all_photos(&self) -> Result<usize, BackendError> {
        self.enter("delete_all_photos").await?;
        self.memory.delete_all_photos().await
    }

    async fn list_calendars(&self) -> Result<Vec<CalendarMeta>, BackendError> {
        self.enter("list_calendars").await?;
        self.memory.list_calendars().await
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        range: TimeRange,
    ) -> Result<Vec<CalendarEvent>, BackendError> {
        self.enter("list_events").await?;
        self.memory.list_events(calendar_id, range).await
    }
}

#[derive(Default)]
pub struct FakeTransport {
    frames: Mutex<Vec<WidgetFrame>>,
    sent: Mutex<Vec<(FrameId, OutboundMessage)>>,
    failing: Mutex<HashSet<FrameId>>,
    handlers: Mutex<Vec<InboundHandler>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_frame(&self, id: &str, widget: Option<&str>, loaded: bool) -> FrameId {
        let frame = FrameId::new(id);
        self.frames.lock().unwrap().push(WidgetFrame {
            id: frame.clone(),
            widget: widget.map(str::to_string),
            loaded,
        });
        frame
    }

    pub fn remove_frame(&self, id: &FrameId) {
        self.frames.lock().unwrap().retain(|frame| &frame.id != id);
    }

    pub fn fail_sends_to(&self, id: &FrameId) {
        self.failing.lock().unwrap().insert(id.clone());
    }

    pub fn heal(&self, id: &FrameId) {
        self.failing.lock().unwrap().remove(id);
    }

    /// Deliver `message` to the host as if `from` had posted it.
    pub fn post(&self, from: &FrameId, message: serde_json::Value) {
        let handlers = self.handlers.lock().unwrap().clone();
        for handler in handlers {
            handler(from.clone(), message.clone());
        }
    }

    pub fn sent_to(&self, id: &FrameId) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(frame, _)| frame == id)
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// State payloads sent to `id`, in order.
    pub fn payloads_to(&self, id: &FrameId) -> Vec<StatePayload> {
        self.sent_to(id)
            .into_iter()
            .filter_map(|message| match message {
                OutboundMessage::WidgetUpdate { payload, .. } => Some(payload),
                OutboundMessage::WidgetCommand { .. } => None,
            })
            .collect()
    }

    pub fn total_sent(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl WidgetTransport for FakeTransport {
    fn frames(&self) -> Vec<WidgetFrame> {
        self.frames.lock().unwrap().clone()
    }

    fn send(&self, frame: &FrameId, message: &OutboundMessage) -> Result<(), TransportError> {
        if self.failing.lock().unwrap().contains(frame) {
            return Err(TransportError::Send(format!("injected failure for {frame}")));
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
