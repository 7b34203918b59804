//! Resource lifecycle controller.
//!
//! Turns a session's intent to use a remote sandbox into a managed
//! allocation: bounded polling against the allocation service, status
//! exposure to consumers, and explicit release. One controller instance
//! owns one session's allocation attempt; a failed attempt is terminal
//! until a new session (and controller) is created.
//!
//! # Status machine
//!
//! ```text
//! Init -> Unavailable                      (history + free, no network)
//! Init -> Connecting -> {Queuing -> Connecting}* -> Connected
//!                    \-> Error             (any poll failure, no retry)
//! Connected -> Expired                     (release)
//! ```
//!
//! Poll results are tagged with an epoch; `release` bumps the epoch so a
//! poll response still in flight cannot revive the status afterwards.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};
use visor_protocol::{
    AllocateResponse, AllocationState, BrowserGrant, ComputeGrant, QueueInfo, ResourceType,
};

use crate::error::{Error, Result};

/// Fixed interval between allocation poll attempts.
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Which kind of remote operator the session wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    Compute,
    Browser,
}

impl OperatorKind {
    /// The allocation pool backing this operator.
    pub fn resource_type(self) -> ResourceType {
        match self {
            OperatorKind::Compute => ResourceType::Computer,
            OperatorKind::Browser => ResourceType::HdfBrowser,
        }
    }
}

/// How the session came into being.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    /// Freshly created session.
    New,
    /// Loaded from session history.
    History,
}

/// Immutable description of a session's resource intent.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub session_id: String,
    pub kind: OperatorKind,
    /// Free-tier session; not resumable once loaded from history.
    pub is_free: bool,
    pub origin: SessionOrigin,
}

/// Connection status of the session's resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    Init,
    /// Stale historical session; no allocation will be attempted.
    Unavailable,
    /// Waiting in the allocation queue.
    Queuing,
    /// Allocation requested, awaiting grant.
    Connecting,
    /// Granted; an endpoint url is available.
    Connected,
    /// Released or timed out.
    Expired,
    /// Allocation or release failed; requires a fresh session to retry.
    Error,
}

impl ResourceStatus {
    /// True while the poll loop should keep issuing allocation requests.
    pub fn is_polling(self) -> bool {
        matches!(self, ResourceStatus::Queuing | ResourceStatus::Connecting)
    }

    /// Terminal until a new session is created.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ResourceStatus::Unavailable | ResourceStatus::Expired | ResourceStatus::Error
        )
    }
}

/// Endpoint granted by the allocation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantedEndpoint {
    pub url: String,
    pub queue_position: Option<u32>,
}

/// Seam to the allocation service, mockable for tests.
#[async_trait]
pub trait AllocationApi: Send + Sync {
    async fn allocate(&self, resource: ResourceType) -> Result<AllocateResponse>;
    async fn release(&self, resource: ResourceType) -> Result<()>;
    /// Remaining allotted time in milliseconds.
    async fn time_balance(&self, resource: ResourceType) -> Result<u64>;
}

struct LifecycleState {
    status: ResourceStatus,
    endpoint_url: Option<String>,
    queue_position: Option<u32>,
    last_error: Option<String>,
}

struct Inner {
    state: Mutex<LifecycleState>,
    /// Allocation attempt generation. Bumped by `activate` and `release`;
    /// poll results from an older epoch are discarded.
    epoch: AtomicU64,
    status_tx: watch::Sender<ResourceStatus>,
}

impl Inner {
    fn set_status(&self, status: ResourceStatus) {
        self.state.lock().status = status;
        let _ = self.status_tx.send(status);
    }
}

/// Manages one session's remote resource allocation.
pub struct ResourceController {
    api: Arc<dyn AllocationApi>,
    request: ResourceRequest,
    poll_interval: Duration,
    inner: Arc<Inner>,
}

impl ResourceController {
    pub fn new(api: Arc<dyn AllocationApi>, request: ResourceRequest) -> Self {
        Self::with_poll_interval(api, request, POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        api: Arc<dyn AllocationApi>,
        request: ResourceRequest,
        poll_interval: Duration,
    ) -> Self {
        let (status_tx, _) = watch::channel(ResourceStatus::Init);
        Self {
            api,
            request,
            poll_interval,
            inner: Arc::new(Inner {
                state: Mutex::new(LifecycleState {
                    status: ResourceStatus::Init,
                    endpoint_url: None,
                    queue_position: None,
                    last_error: None,
                }),
                epoch: AtomicU64::new(0),
                status_tx,
            }),
        }
    }

    /// Begin the allocation attempt.
    ///
    /// Sessions loaded from history with a free-tier resource are not
    /// resumable; they go straight to [`ResourceStatus::Unavailable`]
    /// without touching the network. Everything else transitions to
    /// `Connecting` and starts the poll loop.
    pub fn activate(&self) {
        if self.request.origin == SessionOrigin::History && self.request.is_free {
            debug!(
                target = "visor.lifecycle",
                session = %self.request.session_id,
                "historical free session, not reallocating"
            );
            self.inner.set_status(ResourceStatus::Unavailable);
            return;
        }

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.set_status(ResourceStatus::Connecting);

        let api = Arc::clone(&self.api);
        let inner = Arc::clone(&self.inner);
        let kind = self.request.kind;
        let interval = self.poll_interval;
        tokio::spawn(async move {
            poll_loop(api, inner, kind, interval, epoch).await;
        });
    }

    /// Release the session's resource.
    ///
    /// With `set_expired`, the status flips to `Expired` and the endpoint
    /// clears before the release call resolves, so consumers reflect
    /// unavailability immediately. Release failures surface as
    /// [`ResourceStatus::Error`], never as a returned error.
    pub async fn release(&self, set_expired: bool) {
        // Invalidate any poll result still in flight.
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);

        if set_expired {
            {
                let mut state = self.inner.state.lock();
                state.status = ResourceStatus::Expired;
                state.endpoint_url = None;
                state.queue_position = None;
            }
            let _ = self.inner.status_tx.send(ResourceStatus::Expired);
        }

        if let Err(e) = self.api.release(self.request.kind.resource_type()).await {
            warn!(
                target = "visor.lifecycle",
                session = %self.request.session_id,
                error = %e,
                "release failed"
            );
            let mut state = self.inner.state.lock();
            state.status = ResourceStatus::Error;
            state.last_error = Some(e.to_string());
            state.endpoint_url = None;
            state.queue_position = None;
            drop(state);
            let _ = self.inner.status_tx.send(ResourceStatus::Error);
        }
    }

    /// Remaining allotted time for this resource, in milliseconds.
    ///
    /// Read-only: the caller decides what to do when the budget runs out
    /// (typically `release(true)`).
    pub async fn time_balance(&self) -> Result<u64> {
        self.api
            .time_balance(self.request.kind.resource_type())
            .await
    }

    pub fn status(&self) -> ResourceStatus {
        self.inner.state.lock().status
    }

    /// The granted endpoint, only while `Connected`.
    ///
    /// Any status other than `Connected` exposes no url, which keeps the
    /// renderer from connecting to a stale endpoint.
    pub fn endpoint(&self) -> Option<GrantedEndpoint> {
        let state = self.inner.state.lock();
        if state.status != ResourceStatus::Connected {
            return None;
        }
        state.endpoint_url.as_ref().map(|url| GrantedEndpoint {
            url: url.clone(),
            queue_position: state.queue_position,
        })
    }

    /// Current position in the allocation queue, while `Queuing`.
    pub fn queue_position(&self) -> Option<u32> {
        self.inner.state.lock().queue_position
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().last_error.clone()
    }

    pub fn request(&self) -> &ResourceRequest {
        &self.request
    }

    /// Watch status transitions.
    pub fn subscribe(&self) -> watch::Receiver<ResourceStatus> {
        self.inner.status_tx.subscribe()
    }
}

async fn poll_loop(
    api: Arc<dyn AllocationApi>,
    inner: Arc<Inner>,
    kind: OperatorKind,
    interval: Duration,
    epoch: u64,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tick.tick().await;

        // Stop the instant the status leaves the polling set or the
        // attempt is superseded.
        {
            let state = inner.state.lock();
            if inner.epoch.load(Ordering::SeqCst) != epoch || !state.status.is_polling() {
                return;
            }
        }

        let outcome = api.allocate(kind.resource_type()).await;
        if !apply_poll(&inner, kind, epoch, outcome) {
            return;
        }
    }
}

/// Apply one poll result. Returns whether polling should continue.
fn apply_poll(
    inner: &Inner,
    kind: OperatorKind,
    epoch: u64,
    outcome: Result<AllocateResponse>,
) -> bool {
    let mut state = inner.state.lock();

    // A release (or fresh activation) happened while the request was in
    // flight; this result no longer speaks for the session.
    if inner.epoch.load(Ordering::SeqCst) != epoch || !state.status.is_polling() {
        return false;
    }

    let status = match outcome {
        Ok(response) => match response.state {
            AllocationState::Queued | AllocationState::Waiting => {
                let info: QueueInfo =
                    serde_json::from_value(response.data).unwrap_or_default();
                state.queue_position = info.queue_position;
                state.status = ResourceStatus::Queuing;
                debug!(
                    target = "visor.lifecycle",
                    position = ?info.queue_position,
                    "still queued for resource"
                );
                ResourceStatus::Queuing
            }
            AllocationState::Granted => match extract_endpoint_url(kind, response.data) {
                Ok(url) => {
                    state.endpoint_url = Some(url);
                    state.queue_position = None;
                    state.status = ResourceStatus::Connected;
                    debug!(target = "visor.lifecycle", "resource granted");
                    ResourceStatus::Connected
                }
                Err(e) => {
                    state.last_error = Some(e.to_string());
                    state.status = ResourceStatus::Error;
                    warn!(target = "visor.lifecycle", error = %e, "granted payload unusable");
                    ResourceStatus::Error
                }
            },
        },
        Err(e) => {
            state.last_error = Some(e.to_string());
            state.status = ResourceStatus::Error;
            warn!(target = "visor.lifecycle", error = %e, "allocation poll failed");
            ResourceStatus::Error
        }
    };

    drop(state);
    let _ = inner.status_tx.send(status);
    status.is_polling()
}

/// Pull the endpoint url out of a granted payload; the field name depends
/// on the operator kind.
fn extract_endpoint_url(kind: OperatorKind, data: serde_json::Value) -> Result<String> {
    let url = match kind {
        OperatorKind::Compute => {
            let grant: ComputeGrant = serde_json::from_value(data)
                .map_err(|e| Error::Allocation(format!("malformed compute grant: {e}")))?;
            grant.rdp_url
        }
        OperatorKind::Browser => {
            let grant: BrowserGrant = serde_json::from_value(data)
                .map_err(|e| Error::Allocation(format!("malformed browser grant: {e}")))?;
            grant.vnc_url
        }
    };
    if url.is_empty() {
        return Err(Error::Allocation("granted payload carried empty url".into()));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Scripted allocation API: each `allocate` call pops the next entry;
    /// an exhausted script leaves the call pending forever. Optional gates
    /// hold `allocate`/`release` until the test says go.
    struct ScriptedApi {
        allocate_calls: AtomicUsize,
        release_calls: AtomicUsize,
        script: Mutex<VecDeque<std::result::Result<AllocateResponse, String>>>,
        allocate_gate: Option<Arc<Notify>>,
        release_gate: Option<Arc<Notify>>,
        release_error: Option<String>,
    }

    impl ScriptedApi {
        fn new(script: Vec<std::result::Result<AllocateResponse, String>>) -> Self {
            Self {
                allocate_calls: AtomicUsize::new(0),
                release_calls: AtomicUsize::new(0),
                script: Mutex::new(script.into()),
                allocate_gate: None,
                release_gate: None,
                release_error: None,
            }
        }

        fn gate_allocate(mut self, gate: Arc<Notify>) -> Self {
            self.allocate_gate = Some(gate);
            self
        }

        fn gate_release(mut self, gate: Arc<Notify>) -> Self {
            self.release_gate = Some(gate);
            self
        }

        fn fail_release(mut self, message: &str) -> Self {
            self.release_error = Some(message.to_string());
            self
        }

        fn granted(data: serde_json::Value) -> AllocateResponse {
            AllocateResponse {
                state: AllocationState::Granted,
                data,
            }
        }

        fn queued(position: Option<u32>) -> AllocateResponse {
            AllocateResponse {
                state: AllocationState::Queued,
                data: match position {
                    Some(p) => json!({"queuePosition": p}),
                    None => json!({}),
                },
            }
        }
    }

    #[async_trait]
    impl AllocationApi for ScriptedApi {
        async fn allocate(&self, _resource: ResourceType) -> Result<AllocateResponse> {
            self.allocate_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.allocate_gate {
                gate.notified().await;
            }
            let next = self.script.lock().pop_front();
            match next {
                Some(Ok(resp)) => Ok(resp),
                Some(Err(msg)) => Err(Error::Allocation(msg)),
                None => std::future::pending().await,
            }
        }

        async fn release(&self, _resource: ResourceType) -> Result<()> {
            self.release_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.release_gate {
                gate.notified().await;
            }
            match &self.release_error {
                Some(msg) => Err(Error::Allocation(msg.clone())),
                None => Ok(()),
            }
        }

        async fn time_balance(&self, _resource: ResourceType) -> Result<u64> {
            Ok(120_000)
        }
    }

    fn request(kind: OperatorKind, is_free: bool, origin: SessionOrigin) -> ResourceRequest {
        ResourceRequest {
            session_id: "sess-1".into(),
            kind,
            is_free,
            origin,
        }
    }

    fn controller(api: Arc<ScriptedApi>, req: ResourceRequest) -> ResourceController {
        ResourceController::with_poll_interval(api, req, Duration::from_secs(10))
    }

    async fn wait_for(controller: &ResourceController, status: ResourceStatus) {
        let mut rx = controller.subscribe();
        loop {
            if *rx.borrow_and_update() == status {
                return;
            }
            rx.changed().await.expect("controller dropped");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn historical_free_session_is_unavailable_without_network() {
        let api = Arc::new(ScriptedApi::new(vec![]));
        let ctrl = controller(
            Arc::clone(&api),
            request(OperatorKind::Browser, true, SessionOrigin::History),
        );

        ctrl.activate();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(ctrl.status(), ResourceStatus::Unavailable);
        assert_eq!(api.allocate_calls.load(Ordering::SeqCst), 0);
        assert!(ctrl.endpoint().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn historical_paid_session_still_polls() {
        let api = Arc::new(ScriptedApi::new(vec![Ok(ScriptedApi::granted(
            json!({"rdpUrl": "rdp://host"}),
        ))]));
        let ctrl = controller(
            Arc::clone(&api),
            request(OperatorKind::Compute, false, SessionOrigin::History),
        );

        ctrl.activate();
        wait_for(&ctrl, ResourceStatus::Connected).await;
        assert!(api.allocate_calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_then_granted_transitions() {
        let api = Arc::new(ScriptedApi::new(vec![
            Ok(ScriptedApi::queued(Some(3))),
            Ok(ScriptedApi::queued(Some(1))),
            Ok(ScriptedApi::granted(json!({"vncUrl": "wss://sandbox/vnc"}))),
        ]));
        let ctrl = controller(
            Arc::clone(&api),
            request(OperatorKind::Browser, false, SessionOrigin::New),
        );

        ctrl.activate();
        wait_for(&ctrl, ResourceStatus::Queuing).await;
        assert_eq!(ctrl.queue_position(), Some(3));
        assert!(ctrl.endpoint().is_none());

        wait_for(&ctrl, ResourceStatus::Connected).await;
        let endpoint = ctrl.endpoint().expect("connected must expose endpoint");
        assert_eq!(endpoint.url, "wss://sandbox/vnc");
        assert_eq!(ctrl.queue_position(), None);
        assert_eq!(api.allocate_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn compute_grant_uses_rdp_url() {
        let api = Arc::new(ScriptedApi::new(vec![Ok(ScriptedApi::granted(
            json!({"rdpUrl": "rdp://10.0.0.5"}),
        ))]));
        let ctrl = controller(
            Arc::clone(&api),
            request(OperatorKind::Compute, false, SessionOrigin::New),
        );

        ctrl.activate();
        wait_for(&ctrl, ResourceStatus::Connected).await;
        assert_eq!(ctrl.endpoint().unwrap().url, "rdp://10.0.0.5");
    }

    #[tokio::test(start_paused = true)]
    async fn poll_error_is_terminal() {
        let api = Arc::new(ScriptedApi::new(vec![
            Ok(ScriptedApi::queued(None)),
            Err("allocation service unreachable".into()),
        ]));
        let ctrl = controller(
            Arc::clone(&api),
            request(OperatorKind::Browser, false, SessionOrigin::New),
        );

        ctrl.activate();
        wait_for(&ctrl, ResourceStatus::Error).await;
        assert!(ctrl.last_error().unwrap().contains("unreachable"));
        assert!(ctrl.endpoint().is_none());

        // Polling has stopped: no further calls however long we wait.
        let calls = api.allocate_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(api.allocate_calls.load(Ordering::SeqCst), calls);
        assert_eq!(ctrl.status(), ResourceStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn granted_payload_without_url_is_an_error() {
        let api = Arc::new(ScriptedApi::new(vec![Ok(ScriptedApi::granted(json!({})))]));
        let ctrl = controller(
            Arc::clone(&api),
            request(OperatorKind::Browser, false, SessionOrigin::New),
        );

        ctrl.activate();
        wait_for(&ctrl, ResourceStatus::Error).await;
        assert!(ctrl.endpoint().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn release_expires_before_api_call_resolves() {
        let gate = Arc::new(Notify::new());
        let api = Arc::new(
            ScriptedApi::new(vec![Ok(ScriptedApi::granted(json!({"vncUrl": "wss://s/vnc"})))])
                .gate_release(Arc::clone(&gate)),
        );
        let ctrl = Arc::new(controller(
            Arc::clone(&api),
            request(OperatorKind::Browser, false, SessionOrigin::New),
        ));

        ctrl.activate();
        wait_for(&ctrl, ResourceStatus::Connected).await;
        assert!(ctrl.endpoint().is_some());

        let release = tokio::spawn({
            let ctrl = Arc::clone(&ctrl);
            async move { ctrl.release(true).await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        // The release call is still gated, yet the status already reflects
        // expiry and the endpoint is gone.
        assert_eq!(ctrl.status(), ResourceStatus::Expired);
        assert!(ctrl.endpoint().is_none());
        assert_eq!(ctrl.queue_position(), None);

        gate.notify_one();
        release.await.unwrap();
        assert_eq!(ctrl.status(), ResourceStatus::Expired);
        assert_eq!(api.release_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn release_failure_surfaces_as_error_status() {
        let api = Arc::new(
            ScriptedApi::new(vec![Ok(ScriptedApi::granted(json!({"vncUrl": "wss://s/vnc"})))])
                .fail_release("pool gone"),
        );
        let ctrl = controller(
            Arc::clone(&api),
            request(OperatorKind::Browser, false, SessionOrigin::New),
        );

        ctrl.activate();
        wait_for(&ctrl, ResourceStatus::Connected).await;

        // Does not throw; converts to Error status.
        ctrl.release(true).await;
        assert_eq!(ctrl.status(), ResourceStatus::Error);
        assert!(ctrl.last_error().unwrap().contains("pool gone"));
        assert!(ctrl.endpoint().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_poll_cannot_revive_released_session() {
        let gate = Arc::new(Notify::new());
        let api = Arc::new(
            ScriptedApi::new(vec![Ok(ScriptedApi::granted(json!({"vncUrl": "wss://s/vnc"})))])
                .gate_allocate(Arc::clone(&gate)),
        );
        let ctrl = controller(
            Arc::clone(&api),
            request(OperatorKind::Browser, false, SessionOrigin::New),
        );

        ctrl.activate();
        tokio::time::sleep(Duration::from_millis(5)).await;
        // The first allocate call is parked on the gate.
        assert_eq!(api.allocate_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctrl.status(), ResourceStatus::Connecting);

        ctrl.release(true).await;
        assert_eq!(ctrl.status(), ResourceStatus::Expired);

        // The poll result lands after the release and must be discarded.
        gate.notify_one();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(ctrl.status(), ResourceStatus::Expired);
        assert!(ctrl.endpoint().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn time_balance_does_not_mutate_status() {
        let api = Arc::new(ScriptedApi::new(vec![]));
        let ctrl = controller(
            Arc::clone(&api),
            request(OperatorKind::Compute, false, SessionOrigin::New),
        );

        let balance = ctrl.time_balance().await.unwrap();
        assert_eq!(balance, 120_000);
        assert_eq!(ctrl.status(), ResourceStatus::Init);
    }

    #[test]
    fn status_predicates() {
        assert!(ResourceStatus::Queuing.is_polling());
        assert!(ResourceStatus::Connecting.is_polling());
        assert!(!ResourceStatus::Connected.is_polling());
        assert!(ResourceStatus::Expired.is_terminal());
        assert!(ResourceStatus::Error.is_terminal());
        assert!(ResourceStatus::Unavailable.is_terminal());
        assert!(!ResourceStatus::Connected.is_terminal());
    }
}
