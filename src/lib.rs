//! Brigade - Bucketed Rate-Limit Dispatcher
//!
//! A request dispatcher enforcing a remote JSON/multipart API's
//! rate-limiting contract: per-route-bucket concurrency limits, a separate
//! global quota, 429 retry-after handling, and FIFO ordering for concurrent
//! calls sharing a bucket.
//!
//! Resource modules build a [`RouteDescriptor`] and a [`Payload`]; the
//! dispatcher owns everything between there and the decoded [`Response`].
//!
//! ```no_run
//! use brigade::{Dispatcher, DispatcherConfig, Payload, RouteDescriptor, Verb};
//!
//! # async fn demo() -> Result<(), brigade::DispatchError> {
//! let dispatcher = Dispatcher::new(
//!     DispatcherConfig::new("https://api.example.com").token("Bot abc"),
//! )?;
//!
//! let route = RouteDescriptor::new(
//!     Verb::Post,
//!     "/channels/{channel_id}/messages",
//!     &[("channel_id", "1017")],
//! );
//! let response = dispatcher
//!     .dispatch(route, Payload::json(serde_json::json!({ "content": "hi" })))
//!     .await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::trace;

pub mod config;
pub mod error;
pub mod route;
pub mod transport;

mod limiter;

pub use config::DispatcherConfig;
pub use error::{DispatchError, Result, TransportError};
pub use route::{RouteDescriptor, Verb};
pub use transport::{
    FilePart, HttpTransport, MultipartPayload, Outcome, Payload, RateLimitInfo, Response,
    ResponseBody, Transport, TransportRequest,
};

use limiter::{BucketMsg, BucketRegistry, GlobalLimiter, PendingRequest};

/// Shared innards of one dispatcher instance.
pub(crate) struct Core {
    pub(crate) config: DispatcherConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) global: GlobalLimiter,
    pub(crate) registry: BucketRegistry,
}

impl Core {
    /// Queue a request on its bucket, re-resolving if the worker retired
    /// between lookup and send.
    pub(crate) fn enqueue(self: &Arc<Self>, mut request: PendingRequest) {
        loop {
            let handle = self.registry.obtain(self, &request.route.bucket_key());
            match handle.send(BucketMsg::Request(request)) {
                Ok(()) => return,
                Err(BucketMsg::Request(returned)) => request = returned,
                Err(BucketMsg::Sync(_)) => return,
            }
        }
    }
}

/// The request dispatcher.
///
/// Owns its bucket registry and global limiter outright, so independent
/// instances (per credential, per test) never share state. Cloning is
/// cheap and shares the instance.
#[derive(Clone)]
pub struct Dispatcher {
    core: Arc<Core>,
}

impl Dispatcher {
    /// Dispatcher with the reqwest-backed transport.
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        Ok(Self::with_transport(config, transport))
    }

    /// Dispatcher over a custom transport.
    pub fn with_transport(config: DispatcherConfig, transport: Arc<dyn Transport>) -> Self {
        let global = GlobalLimiter::new(config.global_limit, config.global_window);
        Self {
            core: Arc::new(Core {
                global,
                transport,
                registry: BucketRegistry::new(),
                config,
            }),
        }
    }

    /// Send one request through bucketed admission and resolve its
    /// terminal outcome.
    ///
    /// Retries are invisible here except as latency; the returned future
    /// completes exactly once.
    pub async fn dispatch(&self, route: RouteDescriptor, payload: Payload) -> Result<Response> {
        let (tx, rx) = oneshot::channel();
        trace!(
            verb = %route.verb(),
            path = route.path(),
            bucket = %route.bucket_key(),
            "dispatching"
        );
        self.core.enqueue(PendingRequest {
            route,
            payload,
            attempts: 0,
            tx,
        });
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Internal(
                "bucket worker dropped the request".to_string(),
            )),
        }
    }
}
