//! Bucket State & Worker
//!
//! Each rate-limit bucket is owned by a single worker task. Admission
//! decisions, the exchange itself, and header-driven state updates are all
//! serialized through that task, so a response-driven update can never race
//! an admission decision for the same bucket. Queued requests drain in FIFO
//! submission order, and one exchange is in flight per bucket at a time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::DispatchError;
use crate::limiter::registry::Promotion;
use crate::route::RouteDescriptor;
use crate::transport::{Outcome, Payload, RateLimitInfo, Response, TransportRequest};
use crate::Core;

/// Semaphore-plus-reset-window state for one bucket.
///
/// `remaining` is only ever *set* from response headers; admission merely
/// gates on it.
#[derive(Debug, Clone)]
pub(crate) struct RateWindow {
    remaining: u32,
    limit: u32,
    reset_at: Option<Instant>,
}

impl RateWindow {
    /// One in-flight probe until the first response teaches us the real
    /// window.
    pub(crate) fn new() -> Self {
        Self {
            remaining: 1,
            limit: 1,
            reset_at: None,
        }
    }

    /// Admission rule: unknown windows admit optimistically; a live window
    /// admits while `remaining` lasts; an exhausted one returns the wait
    /// until its reset.
    pub(crate) fn admit(&mut self, now: Instant) -> Option<Duration> {
        match self.reset_at {
            Some(reset) if now < reset => {
                if self.remaining > 0 {
                    self.remaining -= 1;
                    None
                } else {
                    Some(reset - now)
                }
            }
            Some(_) => {
                // Window elapsed with no response seen since. Assume a
                // fresh budget; the next response corrects us.
                self.remaining = self.limit.saturating_sub(1);
                self.reset_at = None;
                None
            }
            None => {
                self.remaining = self.remaining.saturating_sub(1);
                None
            }
        }
    }

    /// Authoritative header-driven update.
    pub(crate) fn absorb(&mut self, rate: &RateLimitInfo, now: Instant) {
        if let Some(limit) = rate.limit {
            self.limit = limit.max(1);
        }
        if let Some(remaining) = rate.remaining {
            self.remaining = remaining;
        }
        if let Some(reset_after) = rate.reset_after {
            self.reset_at = Some(now + reset_after);
        }
    }

    /// Exhaust the window until at least `now + delay` (429 retry-after).
    /// Never shortens an existing window.
    pub(crate) fn block_for(&mut self, delay: Duration, now: Instant) {
        let until = now + delay;
        self.remaining = 0;
        if self.reset_at.map_or(true, |reset| reset < until) {
            self.reset_at = Some(until);
        }
    }

    /// Keep the more restrictive of two states (bucket merge).
    pub(crate) fn merge_restrictive(&mut self, other: &RateWindow) {
        self.remaining = self.remaining.min(other.remaining);
        self.limit = self.limit.min(other.limit);
        if let Some(reset) = other.reset_at {
            if self.reset_at.map_or(true, |own| own < reset) {
                self.reset_at = Some(reset);
            }
        }
    }

    fn reset_at(&self) -> Option<Instant> {
        self.reset_at
    }
}

/// A request waiting in or moving through a bucket queue.
pub(crate) struct PendingRequest {
    pub(crate) route: RouteDescriptor,
    pub(crate) payload: Payload,
    pub(crate) attempts: u32,
    pub(crate) tx: oneshot::Sender<crate::error::Result<Response>>,
}

impl PendingRequest {
    fn transport_request(&self) -> TransportRequest {
        TransportRequest {
            verb: self.route.verb(),
            path: self.route.path().to_string(),
            payload: self.payload.clone(),
        }
    }

    fn resolve(self, result: crate::error::Result<Response>) {
        // The caller may have gone away; bucket accounting already happened
        // off the transport outcome either way.
        let _ = self.tx.send(result);
    }
}

pub(crate) enum BucketMsg {
    Request(PendingRequest),

    /// Restrictive state handoff from a provisional bucket merging in.
    Sync(RateWindow),
}

#[derive(Clone)]
pub(crate) struct BucketHandle {
    tx: mpsc::UnboundedSender<BucketMsg>,
}

impl BucketHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<BucketMsg>) -> Self {
        Self { tx }
    }

    /// Hands the message back if the worker already retired.
    pub(crate) fn send(&self, msg: BucketMsg) -> Result<(), BucketMsg> {
        self.tx.send(msg).map_err(|err| err.0)
    }
}

/// The single owner of one bucket's queue and window.
pub(crate) struct BucketWorker {
    key: String,
    core: Arc<Core>,
    rx: mpsc::UnboundedReceiver<BucketMsg>,
    queue: VecDeque<PendingRequest>,
    window: RateWindow,
    backoff: ExponentialBackoff,
}

impl BucketWorker {
    pub(crate) fn spawn(key: String, core: Arc<Core>) -> BucketHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let backoff = ExponentialBackoff {
            initial_interval: core.config.backoff_initial,
            max_interval: core.config.backoff_cap,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        let worker = Self {
            key,
            core,
            rx,
            queue: VecDeque::new(),
            window: RateWindow::new(),
            backoff,
        };
        tokio::spawn(worker.run());
        BucketHandle::new(tx)
    }

    async fn run(mut self) {
        loop {
            while let Ok(msg) = self.rx.try_recv() {
                self.accept(msg);
            }

            let Some(request) = self.queue.pop_front() else {
                match tokio::time::timeout_at(self.idle_deadline(), self.rx.recv()).await {
                    Ok(Some(msg)) => self.accept(msg),
                    // Registry dropped the handle; nothing can reach us.
                    Ok(None) => return,
                    Err(_) => match self.core.registry.try_retire(&self.key, &mut self.rx) {
                        Ok(()) => {
                            trace!(bucket = %self.key, "evicting idle bucket");
                            return;
                        }
                        Err(msg) => self.accept(msg),
                    },
                }
                continue;
            };

            if let Some(canonical) = self.drive(request).await {
                self.merge_into(canonical);
                return;
            }
        }
    }

    fn accept(&mut self, msg: BucketMsg) {
        match msg {
            BucketMsg::Request(request) => self.queue.push_back(request),
            BucketMsg::Sync(window) => {
                trace!(bucket = %self.key, "absorbing merged bucket state");
                self.window.merge_restrictive(&window);
            }
        }
    }

    fn idle_deadline(&self) -> Instant {
        let now = Instant::now();
        let grace = self.core.config.eviction_grace;
        match self.window.reset_at() {
            Some(reset) if reset > now => reset + grace,
            _ => now + grace,
        }
    }

    /// Drive one request to terminal resolution. Returns the canonical
    /// handle when this bucket merged away mid-flight and the worker must
    /// hand over its queue.
    async fn drive(&mut self, mut request: PendingRequest) -> Option<BucketHandle> {
        loop {
            while let Some(wait) = self.window.admit(Instant::now()) {
                debug!(bucket = %self.key, ?wait, "bucket exhausted, waiting for reset");
                tokio::time::sleep(wait).await;
            }
            self.core.global.acquire().await;

            let outcome = self.core.transport.execute(request.transport_request()).await;
            let now = Instant::now();

            match outcome {
                Outcome::Success { response, rate } => {
                    self.window.absorb(&rate, now);
                    let canonical = self.promote(&rate);
                    request.resolve(Ok(response));
                    return canonical;
                }

                Outcome::RateLimited {
                    retry_after,
                    global,
                    rate,
                } => {
                    self.window.absorb(&rate, now);
                    if global {
                        self.core.global.pause(retry_after);
                    } else {
                        self.window.block_for(retry_after, now);
                    }
                    let canonical = self.promote(&rate);
                    request.attempts += 1;
                    warn!(
                        bucket = %self.key,
                        ?retry_after,
                        global,
                        attempt = request.attempts,
                        "rate limited"
                    );
                    if request.attempts > self.core.config.max_rate_limit_retries {
                        let err = DispatchError::RateLimitExhausted {
                            verb: request.route.verb(),
                            route: request.route.path().to_string(),
                            attempts: request.attempts,
                        };
                        request.resolve(Err(err));
                        return canonical;
                    }
                    if canonical.is_some() {
                        // The bucket just merged away; the canonical queue
                        // re-admits this request under the synced window.
                        self.core.enqueue(request);
                        return canonical;
                    }
                    // The worker still holds this request, so after the
                    // window wait it is first through admission - a front
                    // requeue by construction.
                }

                Outcome::ServerError { status } => {
                    request.attempts += 1;
                    if request.attempts > self.core.config.max_server_retries {
                        let err = DispatchError::ServerUnavailable {
                            verb: request.route.verb(),
                            route: request.route.path().to_string(),
                            status,
                            attempts: request.attempts,
                        };
                        request.resolve(Err(err));
                        return None;
                    }
                    let delay = self.retry_delay(request.attempts);
                    debug!(
                        bucket = %self.key,
                        status,
                        attempt = request.attempts,
                        ?delay,
                        "server error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }

                Outcome::Network(cause) => {
                    request.attempts += 1;
                    if request.attempts > self.core.config.max_server_retries {
                        let err = DispatchError::TransportFailure {
                            verb: request.route.verb(),
                            route: request.route.path().to_string(),
                            attempts: request.attempts,
                            source: cause,
                        };
                        request.resolve(Err(err));
                        return None;
                    }
                    let delay = self.retry_delay(request.attempts);
                    debug!(
                        bucket = %self.key,
                        error = %cause,
                        attempt = request.attempts,
                        ?delay,
                        "network failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }

                Outcome::ClientError { status, body } => {
                    let err = DispatchError::ClientRejected {
                        verb: request.route.verb(),
                        route: request.route.path().to_string(),
                        status,
                        body,
                    };
                    request.resolve(Err(err));
                    return None;
                }
            }
        }
    }

    /// Doubling delay from the backoff parameters, capped.
    fn retry_delay(&self, attempt: u32) -> Duration {
        let doubled = self.backoff.initial_interval * 2u32.saturating_pow(attempt.saturating_sub(1));
        doubled.min(self.backoff.max_interval)
    }

    /// Record a canonical hash disclosure with the registry.
    fn promote(&mut self, rate: &RateLimitInfo) -> Option<BucketHandle> {
        let hash = rate.bucket.as_deref()?;
        if hash == self.key {
            return None;
        }
        match self.core.registry.promote(&self.key, hash) {
            Promotion::Rekeyed => {
                debug!(provisional = %self.key, canonical = hash, "bucket re-keyed to canonical hash");
                self.key = hash.to_string();
                None
            }
            Promotion::MergeInto(handle) => {
                debug!(provisional = %self.key, canonical = hash, "merging into existing canonical bucket");
                Some(handle)
            }
        }
    }

    /// Hand everything over to the canonical bucket and exit: restrictive
    /// state first, then queued requests in their original order.
    fn merge_into(mut self, canonical: BucketHandle) {
        let _ = canonical.send(BucketMsg::Sync(self.window.clone()));
        while let Some(request) = self.queue.pop_front() {
            self.core.enqueue(request);
        }
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                BucketMsg::Request(request) => self.core.enqueue(request),
                BucketMsg::Sync(window) => {
                    let _ = canonical.send(BucketMsg::Sync(window));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(remaining: u32, limit: u32, reset_after: Duration) -> RateLimitInfo {
        RateLimitInfo {
            remaining: Some(remaining),
            limit: Some(limit),
            reset_after: Some(reset_after),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn admission_gates_on_remaining() {
        let mut window = RateWindow::new();
        let now = Instant::now();
        window.absorb(&info(2, 5, Duration::from_secs(10)), now);

        assert_eq!(window.admit(now), None);
        assert_eq!(window.admit(now), None);
        assert_eq!(window.admit(now), Some(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_window_admits_optimistically() {
        let mut window = RateWindow::new();
        let now = Instant::now();
        window.absorb(&info(0, 5, Duration::from_secs(1)), now);

        assert!(window.admit(now).is_some());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(window.admit(Instant::now()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn block_for_never_shortens_the_window() {
        let mut window = RateWindow::new();
        let now = Instant::now();
        window.absorb(&info(3, 5, Duration::from_secs(10)), now);
        window.block_for(Duration::from_secs(1), now);

        // Still exhausted until the original, later reset.
        assert_eq!(window.admit(now), Some(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn merge_keeps_the_restrictive_state() {
        let now = Instant::now();
        let mut a = RateWindow::new();
        a.absorb(&info(4, 5, Duration::from_secs(2)), now);
        let mut b = RateWindow::new();
        b.absorb(&info(1, 3, Duration::from_secs(8)), now);

        a.merge_restrictive(&b);

        assert_eq!(a.remaining, 1);
        assert_eq!(a.limit, 3);
        assert_eq!(a.reset_at(), Some(now + Duration::from_secs(8)));
    }
}
