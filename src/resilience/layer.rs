//! Tower middleware running requests through the [`Resilience`] pipeline.
//!
//! ```rust,no_run
//! use lighter_resilience::resilience::{
//!     DependencyRegistry, Resilience, ResilienceLayer, RetryPolicy,
//! };
//! use lighter_resilience::config::ResilienceConfig;
//! use tower::{service_fn, ServiceBuilder};
//!
//! let resilience = Resilience::new(DependencyRegistry::new(ResilienceConfig::default()));
//! let client = ServiceBuilder::new()
//!     .layer(ResilienceLayer::new(
//!         resilience,
//!         "geo-api",
//!         RetryPolicy::default(),
//!         |e: &std::io::Error| e.kind() == std::io::ErrorKind::TimedOut,
//!     ))
//!     .service(service_fn(|path: String| async move {
//!         Ok::<_, std::io::Error>(path.len())
//!     }));
//! ```

use futures_util::future::BoxFuture;
use std::task::{Context, Poll};
use tower::{Layer, Service, ServiceExt};

use super::facade::Resilience;
use super::retry::RetryPolicy;
use super::ResilienceError;

/// Wraps a service so every request goes through the limiter, breaker and
/// retry loop of one dependency
#[derive(Debug, Clone)]
pub struct ResilienceLayer<P> {
    resilience: Resilience,
    dependency: String,
    policy: RetryPolicy,
    is_retryable: P,
}

impl<P> ResilienceLayer<P> {
    pub fn new(
        resilience: Resilience,
        dependency: impl Into<String>,
        policy: RetryPolicy,
        is_retryable: P,
    ) -> Self {
        Self {
            resilience,
            dependency: dependency.into(),
            policy,
            is_retryable,
        }
    }
}

impl<S, P> Layer<S> for ResilienceLayer<P>
where
    P: Clone,
{
    type Service = ResilienceService<S, P>;

    fn layer(&self, inner: S) -> Self::Service {
        ResilienceService {
            inner,
            resilience: self.resilience.clone(),
            dependency: self.dependency.clone(),
            policy: self.policy,
            is_retryable: self.is_retryable.clone(),
        }
    }
}

/// Service produced by [`ResilienceLayer`]
///
/// Each attempt drives its own clone of the inner service to readiness, so
/// the wrapper itself is always ready.
#[derive(Debug, Clone)]
pub struct ResilienceService<S, P> {
    inner: S,
    resilience: Resilience,
    dependency: String,
    policy: RetryPolicy,
    is_retryable: P,
}

impl<S, P, Req> Service<Req> for ResilienceService<S, P>
where
    Req: Clone + Send + 'static,
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    P: Fn(&S::Error) -> bool + Clone + Send + Sync + 'static,
{
    type Response = S::Response;
    type Error = ResilienceError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let resilience = self.resilience.clone();
        let name = self.dependency.clone();
        let policy = self.policy;
        let is_retryable = self.is_retryable.clone();
        let inner = self.inner.clone();

        Box::pin(async move {
            let dependency = resilience.registry().get_or_create(&name);
            resilience
                .protect(
                    &dependency,
                    &policy,
                    move |_attempt| {
                        let mut service = inner.clone();
                        let req = req.clone();
                        async move { service.ready().await?.call(req).await }
                    },
                    is_retryable,
                )
                .await
        })
    }
}
