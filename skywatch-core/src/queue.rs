//! Bounded request queue
//!
//! Requests for the same budget key are admitted strictly in arrival order;
//! different keys never wait on each other except for the shared concurrency
//! slots, which are also handed out first come, first served.
//!
//! Admission of a request:
//! 1. take the budget key's lane (FIFO)
//! 2. fail fast if the provider's circuit is open
//! 3. sleep out any pacing wait, fail fast if an hourly/daily ceiling is spent
//! 4. take a concurrency slot and stamp the dispatch with the rate limiter
//!
//! The admitted job then runs on its own task so that a caller giving up
//! after dispatch does not cancel the network call. The slot taken at
//! admission covers the job's first network attempt only: the job receives
//! [`DispatchSlots`] and takes a fresh slot for every later attempt, so
//! backoff sleeps of one provider never hold a slot another could use.

use crate::error::ClientError;
use crate::resilience::{Admission, CircuitBreaker, RateLimiter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// A unit of work waiting for admission
pub struct QueuedRequest<F> {
    pub id: Uuid,
    pub provider: String,
    /// Rate budget the request is charged against
    pub budget_key: String,
    pub cache_key: Option<String>,
    pub enqueued_at: Instant,
    pub execute: F,
}

impl<F> QueuedRequest<F> {
    pub fn new(provider: impl Into<String>, budget_key: impl Into<String>, execute: F) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider: provider.into(),
            budget_key: budget_key.into(),
            cache_key: None,
            enqueued_at: Instant::now(),
            execute,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_cache_key(mut self, cache_key: impl Into<String>) -> Self {
        self.cache_key = Some(cache_key.into());
        self
    }
}

/// Queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Requests not yet admitted
    pub waiting: usize,
    /// Admitted requests still running
    pub in_flight: usize,
    pub admitted: u64,
    /// Requests failed at admission (open circuit or spent budget)
    pub rejected: u64,
    pub max_concurrency: usize,
}

/// Concurrency slots handed to an admitted job, one per network attempt
#[derive(Debug)]
pub struct DispatchSlots {
    slots: Arc<Semaphore>,
    granted: Mutex<Option<OwnedSemaphorePermit>>,
}

impl DispatchSlots {
    /// Take a slot for one network attempt.
    ///
    /// The first call returns the slot granted at admission; later calls wait
    /// in line with every other request.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, ClientError> {
        let granted = self
            .granted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match granted {
            Some(slot) => Ok(slot),
            None => Arc::clone(&self.slots)
                .acquire_owned()
                .await
                .map_err(|_| ClientError::configuration("Request queue is closed")),
        }
    }
}

/// Decrements a gauge when dropped
struct GaugeGuard(Arc<AtomicUsize>);

impl GaugeGuard {
    fn enter(gauge: &Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(gauge))
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// FIFO admission in front of the provider calls
#[derive(Debug)]
pub struct RequestQueue {
    max_concurrency: usize,
    slots: Arc<Semaphore>,
    lanes: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    waiting: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    admitted: AtomicU64,
    rejected: AtomicU64,
}

impl RequestQueue {
    pub fn new(max_concurrency: usize, limiter: Arc<RateLimiter>, breaker: Arc<CircuitBreaker>) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            max_concurrency,
            slots: Arc::new(Semaphore::new(max_concurrency)),
            lanes: Mutex::new(HashMap::new()),
            limiter,
            breaker,
            waiting: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            waiting: self.waiting.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            max_concurrency: self.max_concurrency,
        }
    }

    fn lane(&self, budget_key: &str) -> Arc<AsyncMutex<()>> {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(lanes.entry(budget_key.to_string()).or_default())
    }

    /// Wait for admission, then run the request to completion.
    ///
    /// Dropping the returned future before admission removes the request from
    /// the queue; after admission the job keeps running and only its result
    /// is lost.
    pub async fn enqueue<F, Fut, T>(&self, request: QueuedRequest<F>) -> Result<T, ClientError>
    where
        F: FnOnce(DispatchSlots) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
        T: Send + 'static,
    {
        let QueuedRequest {
            id,
            provider,
            budget_key,
            cache_key,
            enqueued_at,
            execute,
        } = request;

        let waiting = GaugeGuard::enter(&self.waiting);
        let slot = match self.admit(&provider, &budget_key).await {
            Ok(slot) => slot,
            Err(err) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!("Rejected {} for {} at admission: {}", id, provider, err);
                return Err(err);
            }
        };
        drop(waiting);

        self.admitted.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Admitted {} for {} after {:?} (cache key: {:?})",
            id,
            provider,
            enqueued_at.elapsed(),
            cache_key
        );

        let slots = DispatchSlots {
            slots: Arc::clone(&self.slots),
            granted: Mutex::new(Some(slot)),
        };
        let running = GaugeGuard::enter(&self.in_flight);
        let handle = tokio::spawn(async move {
            let _running = running;
            execute(slots).await
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!("Request task {} for {} failed: {}", id, provider, e);
                Err(ClientError::transient(provider, format!("Request task failed: {}", e)))
            }
        }
    }

    async fn admit(&self, provider: &str, budget_key: &str) -> Result<OwnedSemaphorePermit, ClientError> {
        let lane = self.lane(budget_key);
        let _turn = lane.lock().await;

        loop {
            self.breaker.check(provider)?;

            match self.limiter.admit(budget_key) {
                Admission::Allow => {}
                Admission::Wait(wait) => {
                    debug!("Pacing {} for {:?}", budget_key, wait);
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Admission::Exhausted { window, retry_after } => {
                    warn!("{:?} budget spent for {}, resets in {:?}", window, budget_key, retry_after);
                    return Err(ClientError::local_rate_limit(provider, retry_after));
                }
            }

            let slot = Arc::clone(&self.slots)
                .acquire_owned()
                .await
                .map_err(|_| ClientError::configuration("Request queue is closed"))?;

            // Another dispatch on this key may have landed while we waited for a slot
            match self.limiter.try_acquire(budget_key, true) {
                Admission::Allow => return Ok(slot),
                Admission::Wait(wait) => {
                    drop(slot);
                    tokio::time::sleep(wait).await;
                }
                Admission::Exhausted { retry_after, .. } => {
                    return Err(ClientError::local_rate_limit(provider, retry_after));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, LimitOrigin};
    use crate::resilience::{BreakerSettings, RateLimitSettings};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn queue(max: usize, limits: RateLimitSettings) -> RequestQueue {
        let limiter = RateLimiter::default().with_provider("quake", limits);
        let breaker = CircuitBreaker::new(BreakerSettings {
            failure_threshold: 1,
            cooldown: Duration::from_secs(60),
        });
        RequestQueue::new(max, Arc::new(limiter), Arc::new(breaker))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound() {
        let queue = Arc::new(queue(2, RateLimitSettings::default()));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..5 {
            let queue = Arc::clone(&queue);
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let job = move |slots: DispatchSlots| async move {
                    let _slot = slots.acquire().await?;
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ClientError>(i)
                };
                queue.enqueue(QueuedRequest::new("quake", format!("key{}", i), job)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        let stats = queue.stats();
        assert_eq!(stats.admitted, 5);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.waiting, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_with_pacing() {
        let queue = queue(
            5,
            RateLimitSettings {
                min_interval: Duration::from_secs(1),
                ..Default::default()
            },
        );
        let start = Instant::now();
        let job = |n: u32| {
            move |_: DispatchSlots| async move { Ok::<_, ClientError>((n, start.elapsed())) }
        };

        let (a, b, c) = tokio::join!(
            queue.enqueue(QueuedRequest::new("quake", "quake", job(1))),
            queue.enqueue(QueuedRequest::new("quake", "quake", job(2))),
            queue.enqueue(QueuedRequest::new("quake", "quake", job(3))),
        );
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

        assert_eq!((a.0, b.0, c.0), (1, 2, 3));
        assert!(b.1 - a.1 >= Duration::from_secs(1));
        assert!(c.1 - b.1 >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spent_budget_fails_without_running() {
        let queue = queue(
            5,
            RateLimitSettings {
                hourly_limit: Some(1),
                ..Default::default()
            },
        );
        queue
            .enqueue(QueuedRequest::new("quake", "quake", |_| async { Ok::<_, ClientError>(()) }))
            .await
            .unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let err = queue
            .enqueue(QueuedRequest::new("quake", "quake", move |_| async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, ClientError>(())
            }))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ClientError::RateLimitExceeded {
                origin: LimitOrigin::Local,
                ..
            }
        ));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(queue.stats().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_fails_fast() {
        let queue = queue(5, RateLimitSettings::default());
        queue.breaker.record_failure("quake");

        let err = queue
            .enqueue(QueuedRequest::new("quake", "quake", |_| async { Ok::<_, ClientError>(()) }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_admission() {
        let queue = queue(
            5,
            RateLimitSettings {
                min_interval: Duration::from_secs(10),
                ..Default::default()
            },
        );
        queue
            .enqueue(QueuedRequest::new("quake", "quake", |_| async { Ok::<_, ClientError>(()) }))
            .await
            .unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let pending = queue.enqueue(QueuedRequest::new("quake", "quake", move |_| async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<_, ClientError>(())
        }));
        assert!(tokio::time::timeout(Duration::from_secs(1), pending).await.is_err());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(queue.stats().waiting, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admitted_job_survives_caller_drop() {
        let queue = queue(1, RateLimitSettings::default());
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let pending = queue.enqueue(QueuedRequest::new("quake", "quake", move |_| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            flag.store(true, Ordering::SeqCst);
            Ok::<_, ClientError>(())
        }));
        assert!(tokio::time::timeout(Duration::from_secs(1), pending).await.is_err());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(queue.stats().in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_released_between_attempts() {
        let queue = Arc::new(queue(1, RateLimitSettings::default()));
        let start = Instant::now();

        let slow = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let job = |slots: DispatchSlots| async move {
                    drop(slots.acquire().await?);
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    let _retry = slots.acquire().await?;
                    Ok::<_, ClientError>(())
                };
                queue.enqueue(QueuedRequest::new("flares", "flares", job)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let fast = move |slots: DispatchSlots| async move {
            let _slot = slots.acquire().await?;
            Ok::<_, ClientError>(start.elapsed())
        };
        let elapsed = queue
            .enqueue(QueuedRequest::new("quake", "quake", fast))
            .await
            .unwrap();
        assert!(elapsed < Duration::from_secs(1));

        slow.await.unwrap().unwrap();
        assert_eq!(queue.stats().in_flight, 0);
    }
}
