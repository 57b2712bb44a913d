//! Collaborator contracts consumed by the forwarding engine
//!
//! The controller is an in-process decision component; everything it needs
//! from the surrounding conference (speaker ordering, signaling transport,
//! identity resolution, bandwidth adaptation) comes in through these traits.

use crate::controller::ForwardingController;
use crate::types::{ChannelId, Endpoint, EndpointId, SourceId};
use anyhow::Result;
use std::sync::Arc;

/// Source of the conference-wide, recency-ordered endpoint list.
///
/// The returned order places the most recently dominant speaker first. The
/// call must be fast and non-blocking: it is invoked synchronously, in one
/// case while the controller's internal lock is held (first-time lazy
/// initialization).
pub trait SpeechActivityProvider: Send + Sync {
    /// All endpoints currently in the conference, most recently dominant
    /// speaker first.
    fn current_order(&self) -> Vec<Endpoint>;
}

/// Best-effort outbound signaling for forwarding decisions.
///
/// Both methods are fire-and-forget from the controller's point of view:
/// failures are logged and never affect the decision state, and no retries
/// are performed here.
pub trait NotificationSink: Send + Sync {
    /// Announce a change of the forwarded set to the receiver, e.g. over an
    /// out-of-band data channel. `forwarded` is the full new set,
    /// `entering` the endpoints that were just added to it.
    fn forwarded_endpoints_changed(
        &self,
        forwarded: &[EndpointId],
        entering: &[EndpointId],
    ) -> Result<()>;

    /// Ask the named endpoints' encoders to produce a keyframe so the
    /// receiver's decoders can resume after the streams were filtered.
    /// Callers skip the call entirely for an empty list.
    fn request_keyframes(&self, endpoints: &[EndpointId]) -> Result<()>;
}

/// Resolves channel identities for the controller.
pub trait EndpointResolver: Send + Sync {
    /// The endpoint that owns the receiver channel, or `None` if it is not
    /// known yet. The controller retries on every recomputation until a
    /// value appears; a `None` is never cached.
    fn self_endpoint_id(&self) -> Option<EndpointId>;

    /// The endpoint behind an inbound media source, or `None` if the source
    /// cannot be mapped. Called on the per-packet hot path, so it must be
    /// cheap.
    fn source_endpoint_id(&self, source: &SourceId) -> Option<EndpointId>;
}

/// Bandwidth-adaptive selection collaborator.
///
/// Opaque to this crate: once constructed it drives future limit and
/// selection changes by calling back into the controller's public mutation
/// entry points on its own schedule.
pub trait AdaptiveSelector: Send + Sync {}

/// Builds the adaptive-selection collaborator on first demand.
///
/// At most one instance is ever created per controller; it is shared by the
/// adaptive last-N and adaptive simulcast modes. `create` runs under the
/// controller's internal lock, so it must not call back into the controller
/// synchronously.
pub trait AdaptiveSelectorFactory: Send + Sync {
    fn create(
        &self,
        controller: Arc<ForwardingController>,
        channel: ChannelId,
    ) -> Arc<dyn AdaptiveSelector>;
}
