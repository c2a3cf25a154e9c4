//! Service Manager
//!
//! Owns every spawned service task. Each task is driven by a [`Supervisor`]
//! that waits out the service's period, runs its tick, and turns tick faults
//! into backoff-and-retry.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::handle::{Control, StatusCell};
use super::restart::Backoff;
use super::{
    Service, ServiceContext, ServiceError, ServiceHandle, ServiceResult, ServiceSpec,
    ServiceState,
};

/// How long `shutdown_all` and `stop` wait for a task to finish
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

struct Registered {
    handle: ServiceHandle,
    task: JoinHandle<ServiceResult<()>>,
}

/// Registry of running services, keyed by service id
pub struct ServiceManager {
    services: DashMap<String, Registered>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            services: DashMap::new(),
            shutdown_tx,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Bound on waiting for each task in `stop` and `shutdown_all`
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Start `service` on its own task.
    ///
    /// Fails with `AlreadyRunning` if a service with the same id is
    /// registered, even one that has since stopped on its own.
    pub async fn spawn<S: Service>(&self, service: S) -> ServiceResult<ServiceHandle> {
        let spec = service.spec();
        let service_id = spec.id.clone();

        // Holding the vacant slot keeps a concurrent spawn of the same id out
        let slot = match self.services.entry(service_id.clone()) {
            Entry::Occupied(_) => return Err(ServiceError::AlreadyRunning(service_id)),
            Entry::Vacant(slot) => slot,
        };

        let (control_tx, control_rx) = mpsc::channel(16);
        let status = Arc::new(StatusCell::default());
        let handle = ServiceHandle::new(service_id.clone(), control_tx, Arc::clone(&status));

        let supervisor = Supervisor {
            ctx: ServiceContext::for_spec(&spec),
            service,
            spec,
            status,
            control: control_rx,
            shutdown: self.shutdown_tx.subscribe(),
        };
        let task = tokio::spawn(supervisor.run());

        tracing::debug!(service_id = %service_id, "Service spawned");
        slot.insert(Registered {
            handle: handle.clone(),
            task,
        });
        Ok(handle)
    }

    pub fn get(&self, service_id: &str) -> Option<ServiceHandle> {
        self.services.get(service_id).map(|e| e.handle.clone())
    }

    pub fn is_running(&self, service_id: &str) -> bool {
        self.services
            .get(service_id)
            .is_some_and(|e| e.handle.is_running())
    }

    /// Stop one service and wait for its task. Returns the task's own result,
    /// so a service that already gave up reports its `TickFault`.
    pub async fn stop(&self, service_id: &str) -> ServiceResult<()> {
        let (_, entry) = self
            .services
            .remove(service_id)
            .ok_or_else(|| ServiceError::NotRunning(service_id.to_string()))?;

        // The task may already have ended on its own
        let _ = entry.handle.shutdown().await;
        join_within(service_id, entry.task, self.shutdown_timeout).await
    }

    /// Signal every service to stop and wait for all of them concurrently.
    ///
    /// Only timeouts are reported as errors; services that failed earlier
    /// are logged.
    pub async fn shutdown_all(&self) -> ServiceResult<()> {
        tracing::info!(count = self.services.len(), "Stopping all services");
        let _ = self.shutdown_tx.send(());

        let ids: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        let joins = ids
            .into_iter()
            .filter_map(|id| self.services.remove(&id))
            .map(|(id, entry)| {
                let timeout = self.shutdown_timeout;
                async move { (join_within(&id, entry.task, timeout).await, id) }
            });

        let mut timed_out = false;
        for (result, id) in futures::future::join_all(joins).await {
            match result {
                Ok(()) => {}
                Err(ServiceError::ShutdownTimeout) => timed_out = true,
                Err(e) => tracing::warn!(service_id = %id, error = %e, "Service ended with error"),
            }
        }

        if timed_out {
            tracing::warn!("Some services did not stop within timeout");
            return Err(ServiceError::ShutdownTimeout);
        }
        Ok(())
    }

    /// `(service_id, state)` for every registered service
    pub fn list(&self) -> Vec<(String, ServiceState)> {
        self.services
            .iter()
            .map(|e| (e.key().clone(), e.handle.state()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

async fn join_within(
    service_id: &str,
    task: JoinHandle<ServiceResult<()>>,
    timeout: Duration,
) -> ServiceResult<()> {
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::error!(service_id, error = %e, "Service task aborted");
            Err(ServiceError::Internal(format!("service task aborted: {}", e)))
        }
        Err(_) => {
            tracing::warn!(service_id, "Service shutdown timed out");
            Err(ServiceError::ShutdownTimeout)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor
// ─────────────────────────────────────────────────────────────────────────────

enum Exit {
    Shutdown,
    Exhausted(String),
}

/// Per-service task state
struct Supervisor<S> {
    service: S,
    ctx: ServiceContext,
    spec: ServiceSpec,
    status: Arc<StatusCell>,
    control: mpsc::Receiver<Control>,
    shutdown: broadcast::Receiver<()>,
}

impl<S: Service> Supervisor<S> {
    async fn run(mut self) -> ServiceResult<()> {
        self.status.set(ServiceState::Starting);

        if let Err(e) = self.service.on_start(&self.ctx).await {
            tracing::error!(service_id = %self.ctx.service_id, error = %e, "Service failed to start");
            self.status.set(ServiceState::Failed);
            return Err(e);
        }

        self.status.set(ServiceState::Running);
        tracing::info!(service_id = %self.ctx.service_id, "Service started");

        let exit = self.tick_loop().await;
        self.finish(exit).await
    }

    /// Wait for `until` while answering state queries. Returns false if a
    /// stop was requested first.
    ///
    /// Stop requests are polled ahead of `until`, so a stop that arrives
    /// together with a due tick wins.
    async fn wait_for(&mut self, until: impl Future<Output = ()>) -> bool {
        tokio::pin!(until);
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.recv() => {
                    tracing::debug!(service_id = %self.ctx.service_id, "Shutdown broadcast received");
                    return false;
                }

                Some(control) = self.control.recv() => match control {
                    Control::Stop => {
                        tracing::debug!(service_id = %self.ctx.service_id, "Stop requested");
                        return false;
                    }
                    Control::Query(reply) => {
                        let _ = reply.send(self.status.state());
                    }
                },

                _ = &mut until => return true,
            }
        }
    }

    async fn tick_loop(&mut self) -> Exit {
        let Some(period) = self.spec.period else {
            self.wait_for(std::future::pending()).await;
            return Exit::Shutdown;
        };

        // First tick one full period after start
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut backoff = Backoff::new(&self.spec.restart);

        loop {
            let due = async {
                timer.tick().await;
            };
            if !self.wait_for(due).await {
                return Exit::Shutdown;
            }

            let outcome = AssertUnwindSafe(self.service.on_tick(&self.ctx))
                .catch_unwind()
                .await;
            let fault = match outcome {
                Ok(Ok(())) => {
                    self.status.tick_done();
                    backoff.reset();
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("tick panicked: {}", panic_message(panic.as_ref())),
            };

            let restarts = self.status.fault();
            if !self.spec.restart.allows(restarts) {
                tracing::error!(
                    service_id = %self.ctx.service_id,
                    error = %fault,
                    restarts,
                    "Tick fault limit reached, giving up"
                );
                return Exit::Exhausted(fault);
            }

            let delay = backoff.next_delay();
            tracing::warn!(
                service_id = %self.ctx.service_id,
                error = %fault,
                restarts,
                delay_ms = delay.as_millis() as u64,
                "Tick fault, restarting after backoff"
            );

            self.status.set(ServiceState::Restarting);
            if !self.wait_for(tokio::time::sleep(delay)).await {
                return Exit::Shutdown;
            }
            self.status.set(ServiceState::Running);
            timer.reset();
        }
    }

    async fn finish(mut self, exit: Exit) -> ServiceResult<()> {
        self.status.set(ServiceState::Stopping);

        let stopped = tokio::time::timeout(self.spec.stop_timeout, self.service.on_stop(&self.ctx))
            .await
            .unwrap_or(Err(ServiceError::ShutdownTimeout));
        if let Err(e) = &stopped {
            tracing::error!(service_id = %self.ctx.service_id, error = %e, "Service stop failed");
        }

        match (exit, stopped) {
            (Exit::Shutdown, Ok(())) => {
                self.status.set(ServiceState::Stopped);
                tracing::info!(service_id = %self.ctx.service_id, "Service stopped");
                Ok(())
            }
            (Exit::Exhausted(fault), _) => {
                self.status.set(ServiceState::Failed);
                Err(ServiceError::TickFault(fault))
            }
            (Exit::Shutdown, Err(e)) => {
                self.status.set(ServiceState::Failed);
                Err(e)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::RestartPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    /// Fails or panics on the listed tick numbers (1-based), succeeds otherwise
    struct CountingService {
        id: String,
        interval: Option<Duration>,
        restart: RestartPolicy,
        fail_on: Vec<usize>,
        panic_on: Vec<usize>,
        attempts: usize,
        start_count: Arc<AtomicUsize>,
        stop_count: Arc<AtomicUsize>,
        tick_count: Arc<AtomicUsize>,
    }

    impl CountingService {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                interval: None,
                restart: RestartPolicy::new(Duration::from_millis(5), Duration::from_millis(20)),
                fail_on: Vec::new(),
                panic_on: Vec::new(),
                attempts: 0,
                start_count: Arc::new(AtomicUsize::new(0)),
                stop_count: Arc::new(AtomicUsize::new(0)),
                tick_count: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn ticking(mut self, every: Duration) -> Self {
            self.interval = Some(every);
            self
        }
    }

    #[async_trait::async_trait]
    impl Service for CountingService {
        fn spec(&self) -> ServiceSpec {
            let mut spec = ServiceSpec::new(&self.id, "Counting Service")
                .restart_with(self.restart.clone())
                .stop_within(Duration::from_secs(1));
            spec.period = self.interval;
            spec
        }

        async fn on_start(&mut self, _ctx: &ServiceContext) -> ServiceResult<()> {
            self.start_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_stop(&mut self, _ctx: &ServiceContext) -> ServiceResult<()> {
            self.stop_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_tick(&mut self, _ctx: &ServiceContext) -> ServiceResult<()> {
            self.attempts += 1;
            if self.panic_on.contains(&self.attempts) {
                panic!("sensor exploded on tick {}", self.attempts);
            }
            if self.fail_on.contains(&self.attempts) {
                return Err(ServiceError::TickFault("simulated".to_string()));
            }
            self.tick_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_spawn_and_stop_service() {
        let manager = ServiceManager::new();
        let service = CountingService::new("test-service");
        let start_count = Arc::clone(&service.start_count);
        let stop_count = Arc::clone(&service.stop_count);

        let handle = manager.spawn(service).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(start_count.load(Ordering::SeqCst), 1);
        assert!(handle.is_running());
        assert_eq!(handle.request_state().await.unwrap(), ServiceState::Running);

        manager.stop("test-service").await.unwrap();

        assert_eq!(stop_count.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), ServiceState::Stopped);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_first_tick_waits_full_interval() {
        let manager = ServiceManager::new();
        let service = CountingService::new("slow-start").ticking(Duration::from_millis(200));
        let tick_count = Arc::clone(&service.tick_count);

        manager.spawn(service).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tick_count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(tick_count.load(Ordering::SeqCst) >= 1);

        manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_faulted_ticks_are_restarted() {
        let manager = ServiceManager::new();
        let mut service = CountingService::new("flaky").ticking(Duration::from_millis(10));
        service.fail_on = vec![2];
        service.panic_on = vec![3];
        let tick_count = Arc::clone(&service.tick_count);

        let handle = manager.spawn(service).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(handle.restarts(), 2);
        assert!(tick_count.load(Ordering::SeqCst) >= 3);
        assert!(handle.ticks() >= 3);
        assert!(!handle.is_terminal());

        manager.shutdown_all().await.unwrap();
        assert_eq!(handle.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_limit_marks_failed() {
        let manager = ServiceManager::new();
        let mut service = CountingService::new("doomed").ticking(Duration::from_millis(5));
        service.restart = service.restart.clone().with_max_restarts(1);
        service.fail_on = (1..100).collect();
        let stop_count = Arc::clone(&service.stop_count);

        let handle = manager.spawn(service).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(handle.state(), ServiceState::Failed);
        assert_eq!(handle.restarts(), 2);
        assert_eq!(stop_count.load(Ordering::SeqCst), 1);

        let err = assert_err!(manager.stop("doomed").await);
        assert!(matches!(err, ServiceError::TickFault(_)));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_backoff() {
        let manager = ServiceManager::new();
        let mut service = CountingService::new("backing-off").ticking(Duration::from_millis(5));
        service.restart = RestartPolicy::new(Duration::from_secs(60), Duration::from_secs(60));
        service.fail_on = vec![1];

        let handle = manager.spawn(service).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.state(), ServiceState::Restarting);

        let started = std::time::Instant::now();
        assert_ok!(manager.shutdown_all().await);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(handle.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_duplicate_service_id() {
        let manager = ServiceManager::new();

        manager.spawn(CountingService::new("poller")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = assert_err!(manager.spawn(CountingService::new("poller")).await);
        assert!(matches!(err, ServiceError::AlreadyRunning(_)));
        assert_eq!(manager.list(), vec![("poller".to_string(), ServiceState::Running)]);

        manager.shutdown_all().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_spawns_of_same_id_register_once() {
        let manager = ServiceManager::new_shared();

        let attempts = (0..16).map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .spawn(CountingService::new("poller").ticking(Duration::from_millis(10)))
                    .await
            })
        });
        let results = futures::future::join_all(attempts).await;

        let mut started = 0;
        for result in results {
            match assert_ok!(result) {
                Ok(_) => started += 1,
                Err(err) => assert!(matches!(err, ServiceError::AlreadyRunning(_))),
            }
        }
        assert_eq!(started, 1);
        assert_eq!(manager.len(), 1);

        // The one registered task is the one shutdown joins
        let handle = manager.get("poller").unwrap();
        assert_ok!(manager.shutdown_all().await);
        assert_eq!(handle.state(), ServiceState::Stopped);
        assert!(manager.is_empty());
    }
}
