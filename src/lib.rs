//! Last-N forwarding selection engine
//!
//! This crate implements the per-receiver stream-selection core of a
//! selective forwarding unit: given a capacity limit ("last-N"), a set of
//! pinned participants and the conference's recency-ordered active-speaker
//! list, it decides which participants' video is currently forwarded to one
//! receiver, recomputes that decision on every input change, and triggers
//! keyframe requests and change notifications exactly when needed.
//!
//! ## Architecture
//!
//! - **`ForwardingController`**: decision state and all mutation entry
//!   points, plus the per-packet membership query
//! - **`SpeechActivityProvider`**: supplies the recency-ordered conference
//!   membership
//! - **`NotificationSink`**: best-effort change announcements and keyframe
//!   requests
//! - **`EndpointResolver`**: maps the owning channel and inbound media
//!   sources to endpoint identifiers
//! - **`AdaptiveSelectorFactory`**: lazily builds the bandwidth-adaptive
//!   selection collaborator shared by the adaptive last-N and adaptive
//!   simulcast modes
//!
//! ## Concurrency
//!
//! Mutations from independent control paths serialize on one internal
//! mutex; collaborator side effects run after it is released. The hot-path
//! query reads an atomically published copy-on-write snapshot of the
//! forwarded set and never blocks writers.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sfu_lastn::{ChannelId, ForwardingConfig, ForwardingController};
//!
//! let controller = ForwardingController::new(
//!     ChannelId::from("receiver-1"),
//!     &ForwardingConfig { initial_last_n: 3, ..Default::default() },
//!     speech_activity,
//!     notification_sink,
//!     endpoint_resolver,
//!     adaptive_factory,
//! );
//!
//! controller.set_pinned_endpoints(vec!["presenter".into()]);
//! let forward = controller.is_forwarded(&source_id);
//! ```

mod collaborators;
mod config;
mod controller;
#[doc(hidden)]
pub mod test_support;
mod types;

pub use collaborators::{
    AdaptiveSelector, AdaptiveSelectorFactory, EndpointResolver, NotificationSink,
    SpeechActivityProvider,
};
pub use config::ForwardingConfig;
pub use controller::ForwardingController;
pub use types::{ChannelId, Endpoint, EndpointId, SourceId};
