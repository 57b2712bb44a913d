//! Fake collaborators shared by the unit and integration tests
//!
//! Not part of the public API; hidden from documentation.

use crate::collaborators::{
    AdaptiveSelector, AdaptiveSelectorFactory, EndpointResolver, NotificationSink,
    SpeechActivityProvider,
};
use crate::controller::ForwardingController;
use crate::types::{ChannelId, Endpoint, EndpointId, SourceId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Speech-activity provider serving a preset order and counting pulls
#[derive(Default)]
pub struct FakeActivity {
    pub order: Mutex<Vec<Endpoint>>,
    pub pulls: AtomicUsize,
}

impl FakeActivity {
    pub fn set_order(&self, endpoints: Vec<Endpoint>) {
        *self.order.lock() = endpoints;
    }
}

impl SpeechActivityProvider for FakeActivity {
    fn current_order(&self) -> Vec<Endpoint> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        self.order.lock().clone()
    }
}

/// Notification sink recording every call; can be switched to failing
#[derive(Default)]
pub struct RecordingSink {
    pub notifications: Mutex<Vec<(Vec<EndpointId>, Vec<EndpointId>)>>,
    pub keyframe_requests: Mutex<Vec<Vec<EndpointId>>>,
    pub fail: AtomicBool,
}

impl NotificationSink for RecordingSink {
    fn forwarded_endpoints_changed(
        &self,
        forwarded: &[EndpointId],
        entering: &[EndpointId],
    ) -> anyhow::Result<()> {
        self.notifications
            .lock()
            .push((forwarded.to_vec(), entering.to_vec()));
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("data channel closed");
        }
        Ok(())
    }

    fn request_keyframes(&self, endpoints: &[EndpointId]) -> anyhow::Result<()> {
        self.keyframe_requests.lock().push(endpoints.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("rtcp transport closed");
        }
        Ok(())
    }
}

/// Resolver backed by a source map and an optional self id
#[derive(Default)]
pub struct FakeResolver {
    pub self_id: Mutex<Option<EndpointId>>,
    pub sources: Mutex<HashMap<SourceId, EndpointId>>,
}

impl FakeResolver {
    #[must_use]
    pub fn with_self(id: &str) -> Self {
        let resolver = Self::default();
        resolver.set_self(id);
        resolver
    }

    pub fn set_self(&self, id: &str) {
        *self.self_id.lock() = Some(EndpointId::from(id));
    }

    pub fn map_source(&self, source: &str, endpoint: &str) {
        self.sources
            .lock()
            .insert(SourceId::from(source), EndpointId::from(endpoint));
    }
}

impl EndpointResolver for FakeResolver {
    fn self_endpoint_id(&self) -> Option<EndpointId> {
        self.self_id.lock().clone()
    }

    fn source_endpoint_id(&self, source: &SourceId) -> Option<EndpointId> {
        self.sources.lock().get(source).cloned()
    }
}

pub struct NoopSelector;
impl AdaptiveSelector for NoopSelector {}

/// Factory producing no-op selectors and counting constructions
#[derive(Default)]
pub struct CountingFactory {
    pub created: AtomicUsize,
}

impl AdaptiveSelectorFactory for CountingFactory {
    fn create(
        &self,
        _controller: Arc<ForwardingController>,
        _channel: ChannelId,
    ) -> Arc<dyn AdaptiveSelector> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Arc::new(NoopSelector)
    }
}

#[must_use]
pub fn ids(raw: &[&str]) -> Vec<EndpointId> {
    raw.iter().map(|id| EndpointId::from(*id)).collect()
}

#[must_use]
pub fn endpoints(raw: &[&str]) -> Vec<Endpoint> {
    raw.iter().map(|id| Endpoint::new(*id)).collect()
}
