//! Client facade
//!
//! [`SkywatchClient`] is the single data-access entry point. A request flows
//! through the endpoint registry, the response cache, the circuit breaker, the
//! request queue (which applies the rate limiter), and finally the retry
//! executor wrapped around the transport. Successful responses are cached.

use crate::cache::{CacheStats, CacheStore, PersistentCache};
use crate::config::{ConfigValidator, CredentialConfig, CredentialPlacement, SkywatchConfig};
use crate::error::{ClientError, ClientResult};
use crate::http::{HttpTransport, OutboundRequest, Payload, RequestOptions, Transport};
use crate::queue::{DispatchSlots, QueueStats, QueuedRequest, RequestQueue};
use crate::registry::{EndpointDescriptor, EndpointRegistry};
use crate::resilience::{
    Admission, BudgetRemaining, CircuitBreaker, CircuitState, RateLimiter, RetryExecutor,
};
use crate::Params;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Snapshot of client activity
#[derive(Debug, Clone, Serialize)]
pub struct ClientStats {
    /// Calls to [`SkywatchClient::request`], including cache hits
    pub total_requests: u64,
    /// Network attempts issued, retries included
    pub network_calls: u64,
    pub cache: CacheStats,
    pub cache_size: usize,
    /// Providers whose circuit is open or half-open
    pub open_circuits: Vec<String>,
    /// Remaining hourly/daily budget per provider
    pub rate_budget_remaining: HashMap<String, BudgetRemaining>,
    pub queue: QueueStats,
}

/// Health and budget of one provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub provider: String,
    pub circuit: CircuitState,
    pub consecutive_failures: u32,
    pub budget_key: String,
    pub budget: BudgetRemaining,
    pub operations: Vec<String>,
}

/// One entry of [`SkywatchClient::request_batch`]
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub provider: String,
    pub operation: String,
    pub params: Params,
    pub options: RequestOptions,
}

impl BatchRequest {
    pub fn new(provider: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            operation: operation.into(),
            params: Params::new(),
            options: RequestOptions::default(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

/// Per-provider pieces derived from configuration
#[derive(Debug)]
struct ProviderRuntime {
    budget_key: String,
    credential: Option<CredentialConfig>,
    retry: RetryExecutor,
}

/// Everything an admitted job needs to run
struct PreparedCall {
    descriptor: Arc<EndpointDescriptor>,
    request: OutboundRequest,
    cache_key: String,
    ttl: Duration,
}

struct ClientInner {
    registry: EndpointRegistry,
    providers: HashMap<String, ProviderRuntime>,
    cache: Arc<CacheStore<Arc<Payload>>>,
    persistence: Option<PersistentCache>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    queue: RequestQueue,
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
    total_requests: AtomicU64,
    network_calls: AtomicU64,
    sweeper: Option<JoinHandle<()>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

/// Resilient multi-provider data client
#[derive(Clone)]
pub struct SkywatchClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for SkywatchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkywatchClient")
            .field("providers", &self.inner.registry.providers())
            .field("endpoints", &self.inner.registry.len())
            .finish()
    }
}

/// Builder for [`SkywatchClient`]
pub struct SkywatchClientBuilder {
    config: SkywatchConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl SkywatchClientBuilder {
    /// Use a custom transport instead of the reqwest one
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Use a shared transport instance
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> ClientResult<SkywatchClient> {
        let config = self.config;
        ConfigValidator::new()
            .validate(&config)
            .map_err(|e| ClientError::configuration(e.to_string()))?;

        let registry = EndpointRegistry::from_config(&config)?;

        let mut limiter = RateLimiter::default();
        let mut breaker = CircuitBreaker::default();
        let mut providers = HashMap::new();
        for provider in &config.providers {
            let budget_key = provider.budget_key();
            limiter = limiter.with_provider(budget_key.clone(), provider.rate_limit.settings());
            breaker = breaker.with_provider(provider.name.clone(), provider.circuit_breaker.settings());
            providers.insert(
                provider.name.clone(),
                ProviderRuntime {
                    budget_key,
                    credential: provider.credential.clone(),
                    retry: RetryExecutor::new(provider.retry_policy.policy()),
                },
            );
        }
        let limiter = Arc::new(limiter);
        let breaker = Arc::new(breaker);

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::with_config(&config.connection)?),
        };

        let cache = Arc::new(CacheStore::new(config.cache.capacity));
        let persistence = config
            .cache
            .persist_path
            .as_ref()
            .map(|path| PersistentCache::new(path.clone()));
        if let Some(store) = &persistence {
            match store.load() {
                Ok(entries) => {
                    for (key, payload, remaining) in entries {
                        cache.put(key, Arc::new(payload), remaining);
                    }
                }
                Err(e) => warn!("Ignoring unreadable cache snapshot: {}", e),
            }
        }

        let sweeper = match (config.cache.sweep_interval(), tokio::runtime::Handle::try_current()) {
            (Some(interval), Ok(_)) => Some(cache.spawn_sweeper(interval)),
            (Some(_), Err(_)) => {
                debug!("No tokio runtime at construction; cache sweeper disabled");
                None
            }
            (None, _) => None,
        };

        info!(
            "Skywatch client ready: {} providers, {} endpoints",
            providers.len(),
            registry.len()
        );

        Ok(SkywatchClient {
            inner: Arc::new(ClientInner {
                registry,
                providers,
                cache,
                persistence,
                queue: RequestQueue::new(
                    config.queue.max_concurrency,
                    Arc::clone(&limiter),
                    Arc::clone(&breaker),
                ),
                limiter,
                breaker,
                transport,
                request_timeout: config.connection.request_timeout(),
                total_requests: AtomicU64::new(0),
                network_calls: AtomicU64::new(0),
                sweeper,
            }),
        })
    }
}

impl SkywatchClient {
    /// Create a client that talks HTTP using the given configuration
    pub fn new(config: SkywatchConfig) -> ClientResult<Self> {
        Self::builder(config).build()
    }

    /// Create a client for the built-in provider catalogue
    pub fn with_builtin_providers() -> ClientResult<Self> {
        Self::new(SkywatchConfig::builtin()?)
    }

    pub fn builder(config: SkywatchConfig) -> SkywatchClientBuilder {
        SkywatchClientBuilder {
            config,
            transport: None,
        }
    }

    /// Fetch one provider operation, from cache when possible
    pub async fn request<I, K, V>(
        &self,
        provider: &str,
        operation: &str,
        params: I,
        options: RequestOptions,
    ) -> ClientResult<Arc<Payload>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let inner = &self.inner;
        inner.total_requests.fetch_add(1, Ordering::Relaxed);
        let request_id = options.request_id;

        let descriptor = inner.registry.resolve(provider, operation)?;
        let runtime = inner.runtime(provider)?;
        let prepared = descriptor.prepare(params)?;

        if !options.force_refresh {
            if let Some(hit) = inner.cache.get(&prepared.cache_key) {
                debug!(
                    "Cache hit for {}/{} [request_id: {}]",
                    provider, operation, request_id
                );
                return Ok(hit);
            }
        }

        inner.breaker.check(provider)?;

        let mut url = prepared.url()?;
        let mut headers = Vec::new();
        let mut secret_param = None;
        if descriptor.requires_credential {
            let credential = runtime.credential.as_ref().ok_or_else(|| {
                ClientError::configuration(format!("Provider '{}' has no credential", provider))
            })?;
            match credential.placement {
                CredentialPlacement::Query => {
                    if prepared.query.contains_key(&credential.param) {
                        return Err(ClientError::validation(format!(
                            "Parameter '{}' is reserved for the provider credential",
                            credential.param
                        )));
                    }
                    url.query_pairs_mut()
                        .append_pair(&credential.param, credential.value.expose_secret());
                    secret_param = Some(credential.param.clone());
                }
                CredentialPlacement::Header => {
                    headers.push((credential.param.clone(), credential.value.clone()));
                }
            }
        }

        let call = PreparedCall {
            request: OutboundRequest {
                request_id,
                provider: provider.to_string(),
                url,
                headers,
                timeout: options.timeout.unwrap_or(inner.request_timeout),
                secret_param,
            },
            ttl: options.ttl.unwrap_or(descriptor.default_ttl),
            cache_key: prepared.cache_key.clone(),
            descriptor,
        };

        let job_inner = Arc::clone(&self.inner);
        let queued = QueuedRequest::new(provider, runtime.budget_key.clone(), move |slots| {
            job_inner.execute(call, slots)
        })
        .with_id(request_id)
        .with_cache_key(prepared.cache_key);

        inner.queue.enqueue(queued).await
    }

    /// Run several requests concurrently, returning results in input order
    pub async fn request_batch(&self, requests: Vec<BatchRequest>) -> Vec<ClientResult<Arc<Payload>>> {
        let handles: Vec<(String, JoinHandle<ClientResult<Arc<Payload>>>)> = requests
            .into_iter()
            .map(|batch| {
                let client = self.clone();
                let provider = batch.provider.clone();
                let handle = tokio::spawn(async move {
                    client
                        .request(&batch.provider, &batch.operation, batch.params, batch.options)
                        .await
                });
                (provider, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (provider, handle) in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => Err(ClientError::transient(provider, format!("Batch task failed: {}", e))),
            });
        }
        results
    }

    pub fn stats(&self) -> ClientStats {
        let inner = &self.inner;
        let cache = inner.cache.stats();
        let rate_budget_remaining = inner
            .providers
            .iter()
            .map(|(name, runtime)| (name.clone(), inner.limiter.remaining(&runtime.budget_key)))
            .collect();

        ClientStats {
            total_requests: inner.total_requests.load(Ordering::Relaxed),
            network_calls: inner.network_calls.load(Ordering::Relaxed),
            cache_size: cache.size,
            cache,
            open_circuits: inner.breaker.open_circuits(),
            rate_budget_remaining,
            queue: inner.queue.stats(),
        }
    }

    /// Drop every cached response
    pub fn clear_cache(&self) {
        info!("Clearing response cache");
        self.inner.cache.clear();
    }

    /// Close one provider's circuit, or every circuit when `provider` is `None`
    pub fn reset_circuit_breaker(&self, provider: Option<&str>) {
        self.inner.breaker.reset(provider);
    }

    /// Write live cache entries to the configured snapshot file
    pub fn persist_cache(&self) -> ClientResult<usize> {
        let store = self.inner.persistence.as_ref().ok_or_else(|| {
            ClientError::configuration("No cache.persist_path configured")
        })?;
        store
            .save(&self.inner.cache.snapshot())
            .map_err(|e| ClientError::configuration(e.to_string()))
    }

    /// Circuit state and remaining budget for every provider, sorted by name
    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        let inner = &self.inner;
        let mut statuses: Vec<ProviderStatus> = inner
            .providers
            .iter()
            .map(|(name, runtime)| {
                let health = inner.breaker.health(name);
                ProviderStatus {
                    provider: name.clone(),
                    circuit: health.state,
                    consecutive_failures: health.consecutive_failures,
                    budget_key: runtime.budget_key.clone(),
                    budget: inner.limiter.remaining(&runtime.budget_key),
                    operations: inner
                        .registry
                        .operations(name)
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.provider.cmp(&b.provider));
        statuses
    }
}

impl ClientInner {
    fn runtime(&self, provider: &str) -> ClientResult<&ProviderRuntime> {
        self.providers
            .get(provider)
            .ok_or_else(|| ClientError::configuration(format!("Unknown provider '{}'", provider)))
    }

    /// Run an admitted call with retries and cache the result
    async fn execute(
        self: Arc<Self>,
        call: PreparedCall,
        slots: DispatchSlots,
    ) -> ClientResult<Arc<Payload>> {
        let inner: &ClientInner = &self;
        let call = &call;
        let slots = &slots;
        let runtime = inner.runtime(&call.descriptor.provider)?;

        // The first attempt was charged when the queue admitted it
        let charge_next = AtomicBool::new(false);
        let charge_next = &charge_next;

        let outcome = runtime
            .retry
            .execute(move |attempt| {
                inner.dispatch_attempt(runtime, call, slots, attempt, charge_next)
            })
            .await;

        let retries = outcome.retries;
        let payload = Arc::new(outcome.into_result()?);
        inner
            .cache
            .put(call.cache_key.clone(), Arc::clone(&payload), call.ttl);

        info!(
            "Fetched {}/{} after {} retries [request_id: {}]",
            call.descriptor.provider, call.descriptor.operation, retries, call.request.request_id
        );
        Ok(payload)
    }

    /// One network attempt, reported to the breaker.
    ///
    /// A concurrency slot is held only around the transport call itself.
    async fn dispatch_attempt(
        &self,
        runtime: &ProviderRuntime,
        call: &PreparedCall,
        slots: &DispatchSlots,
        attempt: u32,
        charge_next: &AtomicBool,
    ) -> ClientResult<Payload> {
        let provider = &call.descriptor.provider;
        let permit = match self.breaker.acquire(provider) {
            Ok(permit) => permit,
            Err(err) => {
                // The queue charged the first attempt, but nothing was sent
                if attempt == 0 {
                    self.limiter.refund(&runtime.budget_key);
                }
                return Err(err);
            }
        };

        if attempt > 0 {
            self.pace(provider, &runtime.budget_key, charge_next.load(Ordering::Relaxed))
                .await?;
        }

        let _slot = slots.acquire().await?;
        self.network_calls.fetch_add(1, Ordering::Relaxed);
        let request = call.request.clone();
        let timeout = request.timeout;
        let result = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Attempt {} to {} timed out after {:?} [request_id: {}]",
                    attempt, provider, timeout, call.request.request_id
                );
                Err(ClientError::transient(
                    provider.as_str(),
                    format!(
                        "Attempt timed out after {:?} [request_id: {}]",
                        timeout, call.request.request_id
                    ),
                ))
            }
        };

        // A retry is charged only if this attempt actually reached the provider
        charge_next.store(
            result.as_ref().err().is_some_and(ClientError::reached_provider),
            Ordering::Relaxed,
        );

        match &result {
            Err(err) if err.is_provider_failure() => {
                debug!("Attempt {} to {} failed: {}", attempt, provider, err);
                permit.failure();
            }
            _ => permit.success(),
        }
        result
    }

    /// Wait for pacing before a retry, charging the budget when asked
    async fn pace(&self, provider: &str, budget_key: &str, charge: bool) -> ClientResult<()> {
        loop {
            match self.limiter.try_acquire(budget_key, charge) {
                Admission::Allow => return Ok(()),
                Admission::Wait(wait) => tokio::time::sleep(wait).await,
                Admission::Exhausted { retry_after, .. } => {
                    return Err(ClientError::local_rate_limit(provider, retry_after));
                }
            }
        }
    }
}
