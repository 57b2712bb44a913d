//! Per-receiver forwarding controller
//!
//! This module holds the decision state for one receiver's view into the
//! conference (last-N limit, pinned set, cached speaker order, forwarded
//! set) and recomputes the forwarded set whenever any input changes.
//!
//! Locking discipline: every read-modify-write of the decision state runs
//! under one `parking_lot::Mutex`. Collaborator side effects (change
//! notifications, keyframe requests) are computed inside the lock but
//! dispatched strictly after it is released. The per-packet membership
//! query never takes the mutex on the steady-state path: the forwarded set
//! is published as an immutable snapshot behind an atomic reference and the
//! limit is mirrored in an atomic integer.

use crate::collaborators::{
    AdaptiveSelector, AdaptiveSelectorFactory, EndpointResolver, NotificationSink,
    SpeechActivityProvider,
};
use crate::config::ForwardingConfig;
use crate::types::{ChannelId, Endpoint, EndpointId, SourceId};
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Decision state guarded by the controller's single critical section
struct State {
    /// Endpoints whose video is always forwarded, in client-given order
    pinned: Vec<EndpointId>,

    /// Cached conference membership, most recently dominant speaker first.
    /// `None` until the first speaker-order event or lazy initialization;
    /// distinct from an explicitly empty conference.
    speaker_order: Option<Vec<EndpointId>>,

    /// The receiver's own endpoint id, resolved lazily and retried while
    /// unknown. Never cached negatively.
    self_id: Option<EndpointId>,

    adaptive_last_n: bool,
    adaptive_simulcast: bool,

    /// Shared adaptive-selection collaborator, constructed at most once on
    /// the first enable of either adaptive mode
    adaptive: Option<Arc<dyn AdaptiveSelector>>,
}

/// Side effects computed under the lock and dispatched after release
#[derive(Default)]
struct Effects {
    /// Full new forwarded set plus the entering endpoints, when the set
    /// changed and the receiver must be told
    notify: Option<(Arc<Vec<EndpointId>>, Vec<EndpointId>)>,

    /// Endpoints that re-entered the forwarded set after having been
    /// filtered and whose encoders need a keyframe
    keyframes: Vec<EndpointId>,
}

/// Decides which participants' video is forwarded to one receiver.
///
/// Mutation entry points ([`set_last_n`](Self::set_last_n),
/// [`set_pinned_endpoints`](Self::set_pinned_endpoints),
/// [`speaker_order_changed`](Self::speaker_order_changed)) may be called
/// concurrently from independent control paths; the per-packet
/// [`is_forwarded`](Self::is_forwarded) query is safe to call concurrently
/// with all of them.
pub struct ForwardingController {
    channel: ChannelId,

    state: Mutex<State>,

    /// Published forwarded-set snapshot. `None` until first computed;
    /// writers build the complete new set and swap the reference.
    forwarded: ArcSwapOption<Vec<EndpointId>>,

    /// Mirror of the limit for the lock-free hot path. Written only while
    /// `state` is locked.
    last_n: AtomicI32,

    activity: Arc<dyn SpeechActivityProvider>,
    sink: Arc<dyn NotificationSink>,
    resolver: Arc<dyn EndpointResolver>,
    adaptive_factory: Arc<dyn AdaptiveSelectorFactory>,
}

impl ForwardingController {
    /// Create a controller for one receiver channel.
    ///
    /// Adaptive modes preset in `config` construct the adaptive-selection
    /// collaborator immediately, through the same path as the runtime
    /// toggles.
    pub fn new(
        channel: ChannelId,
        config: &ForwardingConfig,
        activity: Arc<dyn SpeechActivityProvider>,
        sink: Arc<dyn NotificationSink>,
        resolver: Arc<dyn EndpointResolver>,
        adaptive_factory: Arc<dyn AdaptiveSelectorFactory>,
    ) -> Arc<Self> {
        let controller = Arc::new(Self {
            channel,
            state: Mutex::new(State {
                pinned: Vec::new(),
                speaker_order: None,
                self_id: None,
                adaptive_last_n: false,
                adaptive_simulcast: false,
                adaptive: None,
            }),
            forwarded: ArcSwapOption::const_empty(),
            last_n: AtomicI32::new(config.initial_last_n),
            activity,
            sink,
            resolver,
            adaptive_factory,
        });

        if config.adaptive_last_n {
            controller.set_adaptive_last_n(true);
        }
        if config.adaptive_simulcast {
            controller.set_adaptive_simulcast(true);
        }

        controller
    }

    /// The current limit; `-1` means no limit
    #[must_use]
    pub fn last_n(&self) -> i32 {
        self.last_n.load(Ordering::Acquire)
    }

    /// The current forwarded set (empty until first computed)
    #[must_use]
    pub fn forwarded_endpoints(&self) -> Vec<EndpointId> {
        self.forwarded
            .load_full()
            .map(|snapshot| (*snapshot).clone())
            .unwrap_or_default()
    }

    /// Number of streams currently being forwarded
    #[must_use]
    pub fn forwarded_count(&self) -> usize {
        self.forwarded.load_full().map_or(0, |snapshot| snapshot.len())
    }

    /// The current pinned endpoints
    #[must_use]
    pub fn pinned_endpoints(&self) -> Vec<EndpointId> {
        self.state.lock().pinned.clone()
    }

    #[must_use]
    pub fn adaptive_last_n(&self) -> bool {
        self.state.lock().adaptive_last_n
    }

    #[must_use]
    pub fn adaptive_simulcast(&self) -> bool {
        self.state.lock().adaptive_simulcast
    }

    /// Set the maximum number of forwarded endpoints; `-1` disables the
    /// limit.
    ///
    /// Endpoints that enter the forwarded set because of the new limit are
    /// asked for a keyframe. Coming from `-1` every stream was already
    /// being forwarded, so shrinking only excludes endpoints and no
    /// recomputation is needed until the next input change.
    pub fn set_last_n(&self, last_n: i32) {
        debug!(channel = %self.channel, last_n, "setting last-n");

        let effects = {
            let mut state = self.state.lock();
            let current = self.last_n.load(Ordering::Acquire);
            if current == last_n {
                None
            } else {
                let was_bounded = current != -1;
                self.last_n.store(last_n, Ordering::Release);
                was_bounded.then(|| self.recompute(&mut state, None))
            }
        };

        self.dispatch(effects);
    }

    /// Replace the pinned set (endpoints whose video is always forwarded,
    /// regardless of the limit). No-op if the new set equals the current
    /// one. Entering endpoints are asked for a keyframe.
    pub fn set_pinned_endpoints(&self, pinned: Vec<EndpointId>) {
        debug!(channel = %self.channel, pinned = ?pinned, "setting pinned endpoints");

        let effects = {
            let mut state = self.state.lock();
            if state.pinned == pinned {
                None
            } else {
                state.pinned = pinned;
                Some(self.recompute(&mut state, None))
            }
        };

        self.dispatch(effects);
    }

    /// Notify the controller that the conference's recency-ordered endpoint
    /// list changed.
    ///
    /// Returns the subset of `endpoints` that just entered the forwarded
    /// set and were previously filtered, for the caller to run per-endpoint
    /// setup (e.g. keyframe requests). Endpoints that are entering because
    /// they just joined the conference are excluded: they were never
    /// filtered, so their decoders have nothing to repair.
    pub fn speaker_order_changed(&self, endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
        let ids: Vec<EndpointId> = endpoints.iter().map(|e| e.id.clone()).collect();

        let (effects, entering_ids) = {
            let mut state = self.state.lock();
            if state.speaker_order.as_deref() == Some(ids.as_slice()) {
                debug!(channel = %self.channel, "conference endpoints unchanged");
                (None, Vec::new())
            } else {
                // Endpoints newly present in the conference, by set
                // difference; position changes don't count.
                let fresh: Vec<EndpointId> = match &state.speaker_order {
                    Some(old) => ids.iter().filter(|id| !old.contains(id)).cloned().collect(),
                    None => ids.clone(),
                };

                debug!(
                    channel = %self.channel,
                    endpoints = ?ids,
                    fresh = ?fresh,
                    "conference endpoints changed"
                );

                state.speaker_order = Some(ids);

                let mut effects = self.recompute(&mut state, Some(fresh));
                // The keyframe-eligible entering endpoints are handed back
                // to the caller instead of being dispatched here.
                let entering = std::mem::take(&mut effects.keyframes);
                (Some(effects), entering)
            }
        };

        self.dispatch(effects);

        endpoints
            .into_iter()
            .filter(|e| entering_ids.contains(&e.id))
            .collect()
    }

    /// Pull the current conference snapshot from the speech-activity
    /// collaborator and populate the local state.
    ///
    /// Normally this happens lazily on the first hot-path query; callers
    /// can invoke it eagerly once the collaborator is ready.
    pub fn initialize_conference_endpoints(&self) {
        let entering = self.speaker_order_changed(self.activity.current_order());

        debug!(
            channel = %self.channel,
            entering = entering.len(),
            "initialized conference endpoints"
        );
    }

    /// Whether media from `source` should currently be forwarded to the
    /// receiver.
    ///
    /// Called once per received packet. An unresolvable source is never
    /// forwarded (fail closed). The only call that can block is the lazy
    /// first-time initialization pull from the speech-activity
    /// collaborator.
    #[must_use]
    pub fn is_forwarded(&self, source: &SourceId) -> bool {
        if self.last_n.load(Ordering::Acquire) < 0 {
            // No limit, everything is forwarded.
            return true;
        }

        let Some(source_endpoint) = self.resolver.source_endpoint_id(source) else {
            warn!(
                channel = %self.channel,
                source = %source,
                "source has no endpoint, not forwarding"
            );
            return false;
        };

        let mut forwarded = self.forwarded.load_full();
        if forwarded.is_none() {
            // Limit is enabled but the conference list was never pulled.
            self.ensure_initialized();
            forwarded = self.forwarded.load_full();
        }

        // The snapshot is bounded by last_n, small enough that a linear
        // scan beats any index.
        forwarded.is_some_and(|snapshot| snapshot.contains(&source_endpoint))
    }

    /// Publish the first forwarded-set snapshot if none exists yet.
    ///
    /// Re-checks under the state lock, so concurrent first queries pull
    /// the speech-activity collaborator exactly once: the losers of the
    /// race find the snapshot already published and return without a pull.
    fn ensure_initialized(&self) {
        let effects = {
            let mut state = self.state.lock();
            if self.forwarded.load().is_some() {
                None
            } else {
                Some(self.recompute(&mut state, None))
            }
        };

        self.dispatch(effects);
    }

    /// Enable or disable bandwidth-adaptive last-N
    pub fn set_adaptive_last_n(self: &Arc<Self>, enabled: bool) {
        let mut state = self.state.lock();
        if state.adaptive_last_n == enabled {
            return;
        }
        if enabled && state.adaptive.is_none() {
            state.adaptive = Some(
                self.adaptive_factory
                    .create(Arc::clone(self), self.channel.clone()),
            );
        }
        state.adaptive_last_n = enabled;
        debug!(channel = %self.channel, enabled, "adaptive last-n toggled");
    }

    /// Enable or disable bandwidth-adaptive simulcast
    pub fn set_adaptive_simulcast(self: &Arc<Self>, enabled: bool) {
        let mut state = self.state.lock();
        if state.adaptive_simulcast == enabled {
            return;
        }
        if enabled && state.adaptive.is_none() {
            state.adaptive = Some(
                self.adaptive_factory
                    .create(Arc::clone(self), self.channel.clone()),
            );
        }
        state.adaptive_simulcast = enabled;
        debug!(channel = %self.channel, enabled, "adaptive simulcast toggled");
    }

    /// Recompute the forwarded set from the current inputs and publish it.
    ///
    /// `freshly_joined` names endpoints that just entered the conference;
    /// they are exempt from keyframe requests because this controller never
    /// filtered them. Runs under the state lock; the returned [`Effects`]
    /// must be dispatched after the lock is released.
    fn recompute(&self, state: &mut State, freshly_joined: Option<Vec<EndpointId>>) -> Effects {
        let mut fresh = freshly_joined;

        if state.speaker_order.is_none() {
            // First-ever computation: pull the conference list now. The
            // whole list counts as freshly joined, so the first computation
            // never triggers keyframe requests.
            let order: Vec<EndpointId> = self
                .activity
                .current_order()
                .into_iter()
                .map(|e| e.id)
                .collect();
            fresh = Some(order.clone());
            state.speaker_order = Some(order);
        }

        if state.self_id.is_none() {
            state.self_id = self.resolver.self_endpoint_id();
        }
        let self_id = state.self_id.clone();

        let Some(order) = state.speaker_order.as_deref() else {
            return Effects::default();
        };

        let last_n = self.last_n.load(Ordering::Acquire);
        let mut candidate: Vec<EndpointId> = Vec::new();

        if last_n < 0 {
            candidate.extend(
                order
                    .iter()
                    .filter(|id| Some(*id) != self_id.as_ref())
                    .cloned(),
            );
        } else {
            // Pinned endpoints are always forwarded, as long as they are
            // still in the conference. Pinning is allowed to override the
            // limit; excess pinned members are never trimmed, but a
            // repeated pinned id takes only one slot.
            for id in &state.pinned {
                if order.contains(id) && Some(id) != self_id.as_ref() && !candidate.contains(id) {
                    candidate.push(id.clone());
                }
            }

            let limit = last_n as usize;
            if candidate.len() < limit {
                for id in order {
                    if candidate.len() >= limit {
                        break;
                    }
                    if Some(id) != self_id.as_ref() && !candidate.contains(id) {
                        candidate.push(id.clone());
                    }
                }
            }
        }

        let previous = self.forwarded.load_full();
        let previous_set: &[EndpointId] = previous.as_deref().map_or(&[], Vec::as_slice);
        let changed = !sets_equal(previous_set, &candidate);

        let snapshot = Arc::new(candidate);
        let mut effects = Effects::default();

        if changed {
            let entering: Vec<EndpointId> = snapshot
                .iter()
                .filter(|id| !previous_set.contains(id))
                .cloned()
                .collect();

            debug!(
                channel = %self.channel,
                previous = ?previous_set,
                forwarded = ?snapshot,
                entering = ?entering,
                "forwarded endpoints changed"
            );

            // With no limit nothing was ever filtered; with a limit,
            // endpoints that just joined the conference have no stale
            // decoder state to repair. Everything else entering needs a
            // keyframe.
            effects.keyframes = if last_n < 0 {
                Vec::new()
            } else if let Some(fresh) = &fresh {
                entering
                    .iter()
                    .filter(|id| !fresh.contains(id))
                    .cloned()
                    .collect()
            } else {
                entering.clone()
            };

            effects.notify = Some((Arc::clone(&snapshot), entering));
        }

        // Publish even when unchanged: the first computation replaces the
        // "uninitialized" sentinel with a real (possibly empty) snapshot.
        self.forwarded.store(Some(snapshot));

        effects
    }

    /// Run collaborator side effects outside the critical section. Failures
    /// are logged and swallowed; the decision state is already published.
    fn dispatch(&self, effects: Option<Effects>) {
        let Some(effects) = effects else { return };

        if let Some((forwarded, entering)) = effects.notify {
            if let Err(error) = self.sink.forwarded_endpoints_changed(&forwarded, &entering) {
                warn!(
                    channel = %self.channel,
                    error = %error,
                    "failed to announce forwarded-set change"
                );
            }
        }

        if !effects.keyframes.is_empty() {
            if let Err(error) = self.sink.request_keyframes(&effects.keyframes) {
                warn!(
                    channel = %self.channel,
                    error = %error,
                    "keyframe request failed"
                );
            }
        }
    }
}

/// Unordered comparison; endpoint ids are unique within a conference
fn sets_equal(a: &[EndpointId], b: &[EndpointId]) -> bool {
    a.len() == b.len() && a.iter().all(|id| b.contains(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        endpoints, ids, CountingFactory, FakeActivity, FakeResolver, RecordingSink,
    };

    struct Harness {
        activity: Arc<FakeActivity>,
        sink: Arc<RecordingSink>,
        resolver: Arc<FakeResolver>,
        factory: Arc<CountingFactory>,
        controller: Arc<ForwardingController>,
    }

    fn harness(initial_last_n: i32, self_id: Option<&str>) -> Harness {
        let activity = Arc::new(FakeActivity::default());
        let sink = Arc::new(RecordingSink::default());
        let resolver = Arc::new(FakeResolver::default());
        if let Some(id) = self_id {
            resolver.set_self(id);
        }
        let factory = Arc::new(CountingFactory::default());
        let controller = ForwardingController::new(
            ChannelId::from("ch-1"),
            &ForwardingConfig {
                initial_last_n,
                ..ForwardingConfig::default()
            },
            activity.clone(),
            sink.clone(),
            resolver.clone(),
            factory.clone(),
        );
        Harness {
            activity,
            sink,
            resolver,
            factory,
            controller,
        }
    }

    #[test]
    fn test_unbounded_forwards_all_but_self() {
        let h = harness(-1, Some("A"));
        h.controller
            .speaker_order_changed(endpoints(&["A", "B", "C"]));

        assert_eq!(h.controller.forwarded_endpoints(), ids(&["B", "C"]));

        h.resolver.map_source("src-b", "B");
        assert!(h.controller.is_forwarded(&SourceId::from("src-b")));
    }

    #[test]
    fn test_fill_by_recency() {
        let h = harness(2, Some("A"));
        h.controller
            .speaker_order_changed(endpoints(&["B", "C", "D"]));

        assert_eq!(h.controller.forwarded_endpoints(), ids(&["B", "C"]));
        assert_eq!(h.controller.forwarded_count(), 2);
    }

    #[test]
    fn test_pinned_first_then_fill() {
        let h = harness(2, Some("A"));
        h.controller
            .speaker_order_changed(endpoints(&["B", "C", "D"]));
        h.controller.set_pinned_endpoints(ids(&["D"]));

        assert_eq!(h.controller.forwarded_endpoints(), ids(&["D", "B"]));
    }

    #[test]
    fn test_pinned_overrides_limit_without_trimming() {
        let h = harness(1, Some("A"));
        h.controller
            .speaker_order_changed(endpoints(&["B", "C", "D"]));
        h.controller.set_pinned_endpoints(ids(&["C", "D"]));

        // Both pinned endpoints stay forwarded even though last_n is 1.
        assert_eq!(h.controller.forwarded_endpoints(), ids(&["C", "D"]));
    }

    #[test]
    fn test_duplicate_pinned_ids_take_one_slot() {
        let h = harness(2, Some("A"));
        h.controller.speaker_order_changed(endpoints(&["B", "C"]));
        assert_eq!(h.controller.forwarded_endpoints(), ids(&["B", "C"]));

        // A repeated pinned id must not occupy two slots or put a
        // duplicate into the published snapshot.
        h.controller.set_pinned_endpoints(ids(&["B", "B"]));
        assert_eq!(h.controller.forwarded_endpoints(), ids(&["B", "C"]));
        let notifications = h.sink.notifications.lock().len();

        // Collapsing the duplicate is not a membership change either: C
        // stays forwarded throughout, so nothing is announced and no
        // keyframe is requested.
        h.controller.set_pinned_endpoints(ids(&["B"]));
        assert_eq!(h.controller.forwarded_endpoints(), ids(&["B", "C"]));
        assert_eq!(h.sink.notifications.lock().len(), notifications);
        assert!(h.sink.keyframe_requests.lock().is_empty());
    }

    #[test]
    fn test_pinned_absent_from_conference_not_forwarded() {
        let h = harness(2, Some("A"));
        h.controller.speaker_order_changed(endpoints(&["B", "C"]));
        h.controller.set_pinned_endpoints(ids(&["X"]));

        assert_eq!(h.controller.forwarded_endpoints(), ids(&["B", "C"]));
    }

    #[test]
    fn test_pinned_self_still_excluded() {
        let h = harness(2, Some("A"));
        h.controller
            .speaker_order_changed(endpoints(&["A", "B", "C"]));
        h.controller.set_pinned_endpoints(ids(&["A"]));

        assert_eq!(h.controller.forwarded_endpoints(), ids(&["B", "C"]));
    }

    #[test]
    fn test_disable_limit_forwards_everything_without_keyframes() {
        let h = harness(2, Some("A"));
        h.controller
            .speaker_order_changed(endpoints(&["B", "C", "D"]));
        assert_eq!(h.controller.forwarded_endpoints(), ids(&["B", "C"]));

        h.controller.set_last_n(-1);

        assert_eq!(h.controller.forwarded_endpoints(), ids(&["B", "C", "D"]));
        // D was newly forwarded but never needs a keyframe when the limit
        // is disabled.
        assert!(h.sink.keyframe_requests.lock().is_empty());
        assert_eq!(h.sink.notifications.lock().len(), 2);
    }

    #[test]
    fn test_enable_limit_from_unbounded_skips_recompute() {
        let h = harness(-1, Some("A"));
        h.controller
            .speaker_order_changed(endpoints(&["B", "C", "D"]));
        let notifications_before = h.sink.notifications.lock().len();

        h.controller.set_last_n(2);

        // Every endpoint being newly excluded was already forwarded;
        // nothing to notify or repair until the next input change.
        assert_eq!(h.controller.last_n(), 2);
        assert_eq!(h.sink.notifications.lock().len(), notifications_before);
        assert!(h.sink.keyframe_requests.lock().is_empty());
    }

    #[test]
    fn test_limit_increase_requests_keyframe_for_reentering() {
        let h = harness(1, Some("A"));
        h.controller
            .speaker_order_changed(endpoints(&["B", "C", "D"]));
        assert_eq!(h.controller.forwarded_endpoints(), ids(&["B"]));

        h.controller.set_last_n(2);

        assert_eq!(h.controller.forwarded_endpoints(), ids(&["B", "C"]));
        assert_eq!(h.sink.keyframe_requests.lock().as_slice(), &[ids(&["C"])]);
    }

    #[test]
    fn test_fresh_joiner_exempt_from_keyframes() {
        let h = harness(2, Some("A"));
        h.controller
            .speaker_order_changed(endpoints(&["B", "C", "D"]));
        assert_eq!(h.controller.forwarded_endpoints(), ids(&["B", "C"]));

        // E is brand new; D re-enters after having been filtered.
        let entering = h
            .controller
            .speaker_order_changed(endpoints(&["E", "D", "C", "B"]));

        assert_eq!(h.controller.forwarded_endpoints(), ids(&["E", "D"]));
        assert_eq!(entering, endpoints(&["D"]));

        // The change itself is announced with both entering endpoints.
        let notifications = h.sink.notifications.lock();
        let (full, announced) = notifications.last().expect("notification");
        assert_eq!(full, &ids(&["E", "D"]));
        assert_eq!(announced, &ids(&["E", "D"]));
    }

    #[test]
    fn test_first_snapshot_never_needs_keyframes() {
        let h = harness(2, Some("A"));
        let entering = h
            .controller
            .speaker_order_changed(endpoints(&["B", "C", "D"]));

        // Everyone is freshly joined on the first snapshot.
        assert!(entering.is_empty());
        assert!(h.sink.keyframe_requests.lock().is_empty());
        assert_eq!(h.controller.forwarded_endpoints(), ids(&["B", "C"]));
    }

    #[test]
    fn test_idempotent_mutations_are_silent() {
        let h = harness(2, Some("A"));
        h.controller
            .speaker_order_changed(endpoints(&["B", "C", "D"]));
        h.controller.set_pinned_endpoints(ids(&["D"]));

        let notifications = h.sink.notifications.lock().len();
        let keyframes = h.sink.keyframe_requests.lock().len();

        h.controller.set_last_n(2);
        h.controller.set_pinned_endpoints(ids(&["D"]));
        h.controller
            .speaker_order_changed(endpoints(&["B", "C", "D"]));

        assert_eq!(h.sink.notifications.lock().len(), notifications);
        assert_eq!(h.sink.keyframe_requests.lock().len(), keyframes);
    }

    #[test]
    fn test_reorder_without_membership_change_is_not_announced() {
        let h = harness(-1, Some("A"));
        h.controller
            .speaker_order_changed(endpoints(&["B", "C", "D"]));
        let notifications = h.sink.notifications.lock().len();

        // Same membership, different recency order: the unlimited set is
        // identical as a set, so nothing is announced.
        h.controller
            .speaker_order_changed(endpoints(&["D", "B", "C"]));

        assert_eq!(h.sink.notifications.lock().len(), notifications);
    }

    #[test]
    fn test_unresolvable_source_fails_closed() {
        let h = harness(2, Some("A"));
        h.activity.set_order(endpoints(&["B", "C"]));

        assert!(!h.controller.is_forwarded(&SourceId::from("unknown")));
    }

    #[test]
    fn test_unbounded_query_skips_resolution() {
        let h = harness(-1, Some("A"));

        // No source mapping and no conference list needed: everything is
        // forwarded while the limit is disabled.
        assert!(h.controller.is_forwarded(&SourceId::from("unknown")));
        assert_eq!(h.activity.pulls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_query_lazily_initializes_once() {
        let h = harness(2, Some("A"));
        h.activity.set_order(endpoints(&["B", "C", "D"]));
        h.resolver.map_source("src-b", "B");
        h.resolver.map_source("src-d", "D");

        assert!(h.controller.is_forwarded(&SourceId::from("src-b")));
        assert!(!h.controller.is_forwarded(&SourceId::from("src-d")));
        assert_eq!(h.activity.pulls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_first_snapshot_is_safe() {
        let h = harness(2, Some("A"));
        h.resolver.map_source("src-b", "B");

        assert!(!h.controller.is_forwarded(&SourceId::from("src-b")));
        assert_eq!(h.controller.forwarded_count(), 0);

        // The sentinel is cleared; later queries don't pull again.
        assert!(!h.controller.is_forwarded(&SourceId::from("src-b")));
        assert_eq!(h.activity.pulls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_self_id_resolution_retried_until_known() {
        let h = harness(2, None);
        h.controller
            .speaker_order_changed(endpoints(&["A", "B", "C"]));

        // Self unknown: A is treated like any other endpoint.
        assert_eq!(h.controller.forwarded_endpoints(), ids(&["A", "B"]));

        h.resolver.set_self("A");
        h.controller
            .speaker_order_changed(endpoints(&["B", "A", "C"]));

        assert_eq!(h.controller.forwarded_endpoints(), ids(&["B", "C"]));
    }

    #[test]
    fn test_mutation_before_any_speaker_event_pulls_provider() {
        let h = harness(2, Some("A"));
        h.activity.set_order(endpoints(&["B", "C", "D"]));

        h.controller.set_pinned_endpoints(ids(&["D"]));

        assert_eq!(h.controller.forwarded_endpoints(), ids(&["D", "B"]));
        // The in-lock pull counted everyone as freshly joined.
        assert!(h.sink.keyframe_requests.lock().is_empty());
    }

    #[test]
    fn test_sink_failure_does_not_affect_decision() {
        let h = harness(2, Some("A"));
        h.controller
            .speaker_order_changed(endpoints(&["B", "C", "D"]));
        h.sink.fail.store(true, Ordering::SeqCst);

        h.controller.set_last_n(3);

        // Both side effects failed, but the published decision stands.
        assert_eq!(h.controller.forwarded_endpoints(), ids(&["B", "C", "D"]));
    }

    #[test]
    fn test_adaptive_collaborator_constructed_once() {
        let h = harness(2, Some("A"));

        h.controller.set_adaptive_last_n(true);
        h.controller.set_adaptive_simulcast(true);
        h.controller.set_adaptive_last_n(false);
        h.controller.set_adaptive_last_n(true);

        assert_eq!(h.factory.created.load(Ordering::SeqCst), 1);
        assert!(h.controller.adaptive_last_n());
        assert!(h.controller.adaptive_simulcast());
    }

    #[test]
    fn test_adaptive_preset_in_config() {
        let activity = Arc::new(FakeActivity::default());
        let sink = Arc::new(RecordingSink::default());
        let resolver = Arc::new(FakeResolver::default());
        let factory = Arc::new(CountingFactory::default());
        let controller = ForwardingController::new(
            ChannelId::from("ch-2"),
            &ForwardingConfig {
                initial_last_n: -1,
                adaptive_last_n: true,
                adaptive_simulcast: true,
            },
            activity,
            sink,
            resolver,
            factory.clone(),
        );

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert!(controller.adaptive_last_n());
        assert!(controller.adaptive_simulcast());
    }

    #[test]
    fn test_getters_reflect_state() {
        let h = harness(3, Some("A"));
        h.controller
            .speaker_order_changed(endpoints(&["B", "C", "D", "E"]));
        h.controller.set_pinned_endpoints(ids(&["E"]));

        assert_eq!(h.controller.last_n(), 3);
        assert_eq!(h.controller.pinned_endpoints(), ids(&["E"]));
        assert_eq!(h.controller.forwarded_count(), 3);
    }
}
