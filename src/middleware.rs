//! Tower middleware adapter.
//!
//! The thin interception seam: extract a caller identity from the request,
//! ask the [`AdmissionEngine`], translate the decision. No algorithmic
//! logic lives here. On an engine failure severe enough to abort evaluation
//! the request is passed through with a loud error log: availability
//! outranks strict limiting, and that choice is made here, deliberately,
//! not silently inside the engine.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower_layer::Layer;
use tower_service::Service;

use crate::engine::{AdmissionEngine, RateLimitResult};
use crate::policy::LimitKind;

/// Caller identity extracted from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionKey {
    pub identifier: String,
    pub kind: LimitKind,
    /// When set, endpoint-override limits are enforced as well.
    pub endpoint: Option<String>,
}

/// Error surfaced by [`AdmissionService`].
#[derive(Debug)]
pub enum GateError<E> {
    /// The request was denied by rate limiting. The full result is carried
    /// so adapters can emit `X-RateLimit-*` and `Retry-After` headers
    /// without recomputing anything.
    Limited {
        result: RateLimitResult,
    },
    /// The inner service failed.
    Inner(E),
}

impl<E> GateError<E> {
    /// Check if this error is a rate-limit rejection.
    pub fn is_limited(&self) -> bool {
        matches!(self, Self::Limited { .. })
    }

    /// Borrow the rejection result if present.
    pub fn result(&self) -> Option<&RateLimitResult> {
        match self {
            Self::Limited { result } => Some(result),
            Self::Inner(_) => None,
        }
    }

    /// Get the inner error if this wraps one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Limited { .. } => None,
        }
    }
}

impl<E: std::fmt::Display> std::fmt::Display for GateError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limited { result } => write!(
                f,
                "rate limited ({}): retry after {:?}",
                result.kind, result.retry_after
            ),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for GateError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Limited { .. } => None,
        }
    }
}

/// A layer that gates requests through an [`AdmissionEngine`].
pub struct AdmissionLayer<F> {
    engine: AdmissionEngine,
    extract: Arc<F>,
}

impl<F> AdmissionLayer<F> {
    /// Create a layer with an identity extractor.
    pub fn new(engine: AdmissionEngine, extract: F) -> Self {
        Self { engine, extract: Arc::new(extract) }
    }
}

impl<F> Clone for AdmissionLayer<F> {
    fn clone(&self) -> Self {
        Self { engine: self.engine.clone(), extract: self.extract.clone() }
    }
}

impl<S, F> Layer<S> for AdmissionLayer<F> {
    type Service = AdmissionService<S, F>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService {
            inner: service,
            engine: self.engine.clone(),
            extract: self.extract.clone(),
        }
    }
}

/// Middleware service that enforces admission control.
pub struct AdmissionService<S, F> {
    inner: S,
    engine: AdmissionEngine,
    extract: Arc<F>,
}

impl<S: Clone, F> Clone for AdmissionService<S, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            engine: self.engine.clone(),
            extract: self.extract.clone(),
        }
    }
}

impl<S, F, Req> Service<Req> for AdmissionService<S, F>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    F: Fn(&Req) -> AdmissionKey + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = GateError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(GateError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let engine = self.engine.clone();
        let extract = self.extract.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let key = extract(&req);
            let decision = match key.endpoint.as_deref() {
                Some(endpoint) => {
                    engine.allow_endpoint(endpoint, &key.identifier, key.kind).await
                }
                None => engine.allow(&key.identifier, key.kind).await,
            };
            match decision {
                Ok(result) if result.allowed => inner.call(req).await.map_err(GateError::Inner),
                Ok(result) => Err(GateError::Limited { result }),
                Err(err) => {
                    tracing::error!(
                        identifier = %key.identifier,
                        error = %err,
                        "admission engine failure, passing request through"
                    );
                    inner.call(req).await.map_err(GateError::Inner)
                }
            }
        })
    }
}
