//! Per-request governance orchestration.
//!
//! # Data Flow
//! ```text
//! request
//!     → abuse tracker      (blocked origin → 403, stop)
//!     → rate limiter       (endpoint override, else role quota; exceeded → 429, stop)
//!     → cache lookup       (GET on a cache route; hit → cached payload, stop)
//!     → downstream handler (miss or uncacheable)
//!     → cache store        (2xx GET on a cache route)
//!     → write invalidation (2xx write on a cache route)
//!     → performance record (every path, including rejections)
//! ```
//!
//! # Design Decisions
//! - The pipeline owns no HTTP types beyond method/status; hosts adapt it
//! - Cache failures degrade to a bypass and are only logged
//! - No cross-store atomicity: each store is consistent on its own
//! - An admitted request is recorded even if its future is dropped (499)

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::http::{Method, StatusCode};

use crate::config::GovernorConfig;
use crate::error::{CacheError, GovernanceError};
use crate::governance::abuse::AbuseVerdict;
use crate::governance::cache::CacheLookup;
use crate::governance::invalidation::CacheInvalidator;
use crate::governance::keys::{cache_key, rate_limit_key};
use crate::governance::rate_limit::{LimitPolicy, QuotaSnapshot, RateDecision};
use crate::governance::routes::{CacheRoute, CacheRouteTable};
use crate::governance::store::{CachedResponse, GovernanceStore};
use crate::observability::metrics;
use crate::security::identity::CallerIdentity;

/// The parts of an inbound request governance looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    /// Route pattern from the host router, when it has a meaningful one.
    pub route: Option<String>,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>, query: Option<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query,
            route: None,
        }
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Key for the performance records.
    pub fn endpoint_key(&self) -> String {
        format!("{} {}", self.method, self.route.as_deref().unwrap_or(&self.path))
    }
}

/// Whether a response came from, went to, or skipped the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

/// What the governance layer decided, for response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernanceMeta {
    pub quota: Option<QuotaSnapshot>,
    pub cache: CacheStatus,
}

/// Asks the downstream host to hand back a buffered copy of the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub max_body_bytes: usize,
}

/// What the downstream handler produced.
#[derive(Debug)]
pub struct DownstreamResponse<R> {
    pub response: R,
    pub status: StatusCode,
    /// Buffered copy when capture was requested and the response succeeded.
    pub payload: Option<Result<CachedResponse, CacheError>>,
}

impl<R> DownstreamResponse<R> {
    pub fn uncaptured(response: R, status: StatusCode) -> Self {
        Self {
            response,
            status,
            payload: None,
        }
    }
}

/// Where the final response body comes from.
#[derive(Debug)]
pub enum Served<R> {
    Cached(CachedResponse),
    Fresh(R),
}

/// A request that passed governance.
#[derive(Debug)]
pub struct Governed<R> {
    pub served: Served<R>,
    pub meta: GovernanceMeta,
}

struct CachePlan<'a> {
    route: &'a CacheRoute,
    key: Option<String>,
}

/// Status recorded for a request whose future was dropped before the
/// downstream handler finished (client gone, or an outer timeout fired).
fn cancelled_status() -> StatusCode {
    StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
}

/// Records step 6 exactly once for an admitted request, including when the
/// surrounding future is dropped mid-handler.
struct Completion<'a> {
    pipeline: &'a GovernancePipeline,
    request: &'a RequestDescriptor,
    started: Instant,
    finished: bool,
}

impl<'a> Completion<'a> {
    fn arm(pipeline: &'a GovernancePipeline, request: &'a RequestDescriptor, started: Instant) -> Self {
        Self {
            pipeline,
            request,
            started,
            finished: false,
        }
    }

    fn finish(mut self, status: StatusCode) {
        self.finished = true;
        self.pipeline.record_completion(self.request, status, self.started);
    }
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::debug!(path = %self.request.path, "Request cancelled before downstream finished");
        self.pipeline
            .record_completion(self.request, cancelled_status(), self.started);
    }
}

/// Runs every governance step in order for each request.
#[derive(Debug, Clone)]
pub struct GovernancePipeline {
    store: Arc<GovernanceStore>,
    policy: Arc<LimitPolicy>,
    routes: Arc<CacheRouteTable>,
    invalidator: CacheInvalidator<CachedResponse>,
    rate_limit_enabled: bool,
    abuse_enabled: bool,
    cache_enabled: bool,
    max_body_bytes: usize,
}

impl GovernancePipeline {
    pub fn new(config: &GovernorConfig, store: Arc<GovernanceStore>) -> Self {
        let routes = Arc::new(CacheRouteTable::from_config(&config.cache));
        Self {
            policy: Arc::new(LimitPolicy::from_config(&config.rate_limit)),
            invalidator: store.invalidator(),
            store,
            rate_limit_enabled: config.rate_limit.enabled,
            abuse_enabled: config.abuse.enabled,
            cache_enabled: config.cache.enabled && !routes.is_empty(),
            max_body_bytes: config.cache.max_body_bytes,
            routes,
        }
    }

    /// Role and endpoint limits in force.
    pub fn policy(&self) -> &Arc<LimitPolicy> {
        &self.policy
    }

    pub fn store(&self) -> &Arc<GovernanceStore> {
        &self.store
    }

    pub fn invalidator(&self) -> &CacheInvalidator<CachedResponse> {
        &self.invalidator
    }

    /// Steps 1 and 2: abuse check, then rate limit.
    pub fn admit(
        &self,
        caller: &CallerIdentity,
        request: &RequestDescriptor,
    ) -> Result<Option<QuotaSnapshot>, GovernanceError> {
        if self.abuse_enabled && self.store.abuse().record(&caller.origin) == AbuseVerdict::Blocked {
            tracing::debug!(origin = %caller.origin, path = %request.path, "Blocked origin refused");
            metrics::record_blocked_request();
            return Err(GovernanceError::OriginBlocked {
                origin: caller.origin.clone(),
            });
        }

        if !self.rate_limit_enabled {
            return Ok(None);
        }

        let resolved = self.policy.resolve(caller.role.as_deref(), &request.path);
        let key = rate_limit_key(caller.subject(), &resolved.scope);
        match self.store.rate_limiter().check(&key, resolved.rule) {
            RateDecision::Allowed(quota) => Ok(Some(quota)),
            RateDecision::Rejected {
                quota,
                retry_after_secs,
            } => {
                tracing::warn!(
                    subject = %caller.subject(),
                    scope = %resolved.scope,
                    limit = quota.limit,
                    retry_after_secs,
                    "Rate limit exceeded"
                );
                metrics::record_rate_limited(resolved.scope.kind());
                Err(GovernanceError::QuotaExceeded {
                    limit: quota.limit,
                    retry_after_secs,
                    reset_at_ms: quota.reset_at_ms,
                })
            }
        }
    }

    fn cache_plan(&self, caller: &CallerIdentity, request: &RequestDescriptor) -> Option<CachePlan<'_>> {
        if !self.cache_enabled {
            return None;
        }
        let route = self.routes.match_path(&request.path)?;
        let key = (request.method == Method::GET).then(|| {
            let vary_by = route.vary_by_identity.then(|| caller.subject());
            cache_key(&route.namespace, &request.path, request.query.as_deref(), vary_by)
        });
        Some(CachePlan { route, key })
    }

    /// Run the full pipeline around `handler`.
    ///
    /// `handler` is only invoked when the request is admitted and not served
    /// from cache. It receives a [`CaptureRequest`] when its response would be
    /// cached.
    pub async fn execute<R, F, Fut>(
        &self,
        caller: &CallerIdentity,
        request: &RequestDescriptor,
        handler: F,
    ) -> Result<Governed<R>, GovernanceError>
    where
        F: FnOnce(Option<CaptureRequest>) -> Fut,
        Fut: Future<Output = DownstreamResponse<R>>,
    {
        let started = Instant::now();

        let quota = match self.admit(caller, request) {
            Ok(quota) => quota,
            Err(err) => {
                self.record_completion(request, err.status(), started);
                return Err(err);
            }
        };

        let completion = Completion::arm(self, request, started);
        let plan = self.cache_plan(caller, request);
        let cache_key = plan.as_ref().and_then(|p| p.key.as_deref());

        if let Some(key) = cache_key {
            if let CacheLookup::Hit(payload) = self.store.cache().get(key) {
                tracing::debug!(key = %key, "Served from cache");
                completion.finish(payload.status);
                return Ok(Governed {
                    served: Served::Cached(payload),
                    meta: GovernanceMeta {
                        quota,
                        cache: CacheStatus::Hit,
                    },
                });
            }
        }

        let capture = cache_key.map(|_| CaptureRequest {
            max_body_bytes: self.max_body_bytes,
        });
        let downstream = handler(capture).await;
        let succeeded = downstream.status.is_success();

        if let (Some(plan), Some(key)) = (plan.as_ref(), cache_key) {
            match downstream.payload {
                Some(Ok(payload)) if succeeded => {
                    self.store.cache().set(key, payload, plan.route.ttl_secs);
                }
                Some(Err(err)) => {
                    tracing::warn!(key = %key, error = %err, "Response not cached");
                }
                _ => {}
            }
        }

        if let Some(plan) = plan.as_ref() {
            if succeeded && !is_read(&request.method) {
                let removed = self.invalidator.invalidate_namespaces(plan.route.write_invalidations());
                tracing::debug!(
                    path = %request.path,
                    namespace = %plan.route.namespace,
                    removed,
                    "Write invalidated cached reads"
                );
            }
        }

        completion.finish(downstream.status);
        Ok(Governed {
            served: Served::Fresh(downstream.response),
            meta: GovernanceMeta {
                quota,
                cache: if cache_key.is_some() {
                    CacheStatus::Miss
                } else {
                    CacheStatus::Bypass
                },
            },
        })
    }

    /// Step 6: latency and error status, whatever path the request took.
    pub fn record_completion(&self, request: &RequestDescriptor, status: StatusCode, started: Instant) {
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let endpoint = request.endpoint_key();
        let is_error = status.is_client_error() || status.is_server_error();

        self.store.performance().record(&endpoint, duration_ms, is_error);
        metrics::record_request(&endpoint, status.as_u16(), duration_ms);
    }
}

fn is_read(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}
