//! Build scheduler - polls queue sources and dispatches builds to a pool.

use shipyard_core::{Build, BuildId, BuilderPool, QueueMessage, QueueSource, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

/// What a single poll cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No message was available.
    Empty,
    /// Fetching from the source failed.
    FetchFailed,
    /// The message payload could not be decoded; left unacknowledged.
    InvalidPayload,
    /// The pool was full; the message was left unacknowledged.
    AtCapacity,
    /// The build failed to start; the message was left unacknowledged.
    DispatchFailed,
    /// The build started and the message was acknowledged.
    Dispatched { build_id: BuildId },
    /// The build started but acknowledging the message failed.
    AckFailed { build_id: BuildId },
}

enum Lifecycle {
    Idle,
    Running {
        cancel: CancellationToken,
        tasks: Vec<JoinHandle<()>>,
    },
    Stopped {
        tasks: Vec<JoinHandle<()>>,
    },
}

/// Runs one independent poll loop per queue source.
pub struct BuildScheduler {
    pool: Arc<dyn BuilderPool>,
    sources: Vec<Arc<dyn QueueSource>>,
    poll_interval: Duration,
    lifecycle: Mutex<Lifecycle>,
}

impl BuildScheduler {
    pub fn new(
        pool: Arc<dyn BuilderPool>,
        sources: Vec<Arc<dyn QueueSource>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pool,
            sources,
            poll_interval,
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    pub async fn state(&self) -> SchedulerState {
        match &*self.lifecycle.lock().await {
            Lifecycle::Idle => SchedulerState::Idle,
            Lifecycle::Running { .. } => SchedulerState::Running,
            Lifecycle::Stopped { .. } => SchedulerState::Stopped,
        }
    }

    /// Start polling every source.
    ///
    /// Only an idle scheduler can start; returns false otherwise.
    pub async fn start(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        if !matches!(*lifecycle, Lifecycle::Idle) {
            warn!("Scheduler already started");
            return false;
        }

        let cancel = CancellationToken::new();
        let tasks = self
            .sources
            .iter()
            .map(|source| {
                tokio::spawn(Self::poll_loop(
                    source.clone(),
                    self.pool.clone(),
                    self.poll_interval,
                    cancel.clone(),
                ))
            })
            .collect();

        info!(sources = self.sources.len(), "Scheduler started");
        *lifecycle = Lifecycle::Running { cancel, tasks };
        true
    }

    /// Stop issuing new polls. A pending fetch is dropped; a cycle that already
    /// has its message runs to completion.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped { tasks: Vec::new() });

        match previous {
            Lifecycle::Running { cancel, tasks } => {
                cancel.cancel();
                info!("Scheduler stopped");
                *lifecycle = Lifecycle::Stopped { tasks };
            }
            Lifecycle::Stopped { tasks } => {
                *lifecycle = Lifecycle::Stopped { tasks };
            }
            Lifecycle::Idle => {}
        }
    }

    /// Wait for the poll loops to finish after [`stop`](Self::stop).
    pub async fn wait(&self) {
        let tasks = match &mut *self.lifecycle.lock().await {
            Lifecycle::Stopped { tasks } => std::mem::take(tasks),
            _ => return,
        };

        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Poll loop panicked");
            }
        }
    }

    async fn poll_loop(
        source: Arc<dyn QueueSource>,
        pool: Arc<dyn BuilderPool>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        debug!(source = %source.name(), "Starting poll loop");

        loop {
            // A cancelled loop never starts another fetch.
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                fetched = source.poll_for_message() => fetched,
            };
            Self::handle_fetched(source.as_ref(), pool.as_ref(), fetched).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        debug!(source = %source.name(), "Poll loop exited");
    }

    /// Run one poll cycle against `source`.
    ///
    /// The message is acknowledged only after the pool accepted the build.
    pub async fn poll_once(source: &dyn QueueSource, pool: &dyn BuilderPool) -> CycleOutcome {
        let fetched = source.poll_for_message().await;
        Self::handle_fetched(source, pool, fetched).await
    }

    async fn handle_fetched(
        source: &dyn QueueSource,
        pool: &dyn BuilderPool,
        fetched: Result<Option<QueueMessage>>,
    ) -> CycleOutcome {
        let message = match fetched {
            Ok(message) => message,
            Err(e) => {
                warn!(source = %source.name(), error = %e, "Failed to fetch message");
                return CycleOutcome::FetchFailed;
            }
        };

        let dispatch = match message {
            Some(message) => match source.extract_payload(&message) {
                Ok(payload) => Some((message, Build::from_payload(payload))),
                Err(e) => {
                    warn!(source = %source.name(), message_id = %message.id, error = %e, "Skipping message");
                    return CycleOutcome::InvalidPayload;
                }
            },
            None => None,
        };

        // Capacity is checked on every cycle, message or not.
        let can_start = pool.can_start_build().await;

        let Some((message, build)) = dispatch else {
            return CycleOutcome::Empty;
        };

        if !can_start {
            debug!(source = %source.name(), message_id = %message.id, "Pool at capacity");
            return CycleOutcome::AtCapacity;
        }

        let build_id = build.build_id;
        if let Err(e) = pool.start_build(build).await {
            warn!(source = %source.name(), build_id = %build_id, error = %e, "Failed to start build");
            return CycleOutcome::DispatchFailed;
        }

        match source.acknowledge(&message).await {
            Ok(()) => {
                info!(source = %source.name(), build_id = %build_id, message_id = %message.id, "Dispatched build");
                CycleOutcome::Dispatched { build_id }
            }
            Err(e) => {
                error!(source = %source.name(), build_id = %build_id, error = %e, "Failed to acknowledge message");
                CycleOutcome::AckFailed { build_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ContainerBuilderPool;
    use crate::pool::tests::MockPlatform;
    use async_trait::async_trait;
    use shipyard_core::Error;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const POLL_INTERVAL: Duration = Duration::from_millis(5);

    fn message(id: &str) -> QueueMessage {
        QueueMessage {
            id: id.to_string(),
            payload: serde_json::json!({
                "environment": [
                    { "name": "OVERRIDE_A", "value": "Value A" },
                ],
            }),
        }
    }

    #[derive(Default)]
    struct MockSource {
        pending: StdMutex<VecDeque<QueueMessage>>,
        endless: bool,
        fail_fetch: bool,
        fetch_delay: Duration,
        polls: AtomicUsize,
        delivered: StdMutex<Vec<String>>,
        acked: StdMutex<Vec<String>>,
    }

    impl MockSource {
        fn with_messages(messages: Vec<QueueMessage>) -> Self {
            Self {
                pending: StdMutex::new(messages.into()),
                ..Default::default()
            }
        }

        fn endless() -> Self {
            Self {
                endless: true,
                ..Default::default()
            }
        }

        fn polls(&self) -> usize {
            self.polls.load(Ordering::SeqCst)
        }

        fn acked(&self) -> Vec<String> {
            self.acked.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QueueSource for MockSource {
        fn name(&self) -> &str {
            "mock"
        }

        async fn poll_for_message(&self) -> Result<Option<QueueMessage>> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            if !self.fetch_delay.is_zero() {
                tokio::time::sleep(self.fetch_delay).await;
            }
            if self.fail_fetch {
                return Err(Error::Queue("connection refused".to_string()));
            }

            let next = if self.endless {
                Some(message(&format!("job-{}", n)))
            } else {
                self.pending.lock().unwrap().pop_front()
            };
            if let Some(m) = &next {
                self.delivered.lock().unwrap().push(m.id.clone());
            }
            Ok(next)
        }

        async fn acknowledge(&self, message: &QueueMessage) -> Result<()> {
            self.acked.lock().unwrap().push(message.id.clone());
            Ok(())
        }
    }

    /// Pool that counts builds without provisioning anything.
    struct MockPool {
        ceiling: usize,
        fail: bool,
        capacity_checks: AtomicUsize,
        started: StdMutex<Vec<Build>>,
    }

    impl MockPool {
        fn new(ceiling: usize) -> Self {
            Self {
                ceiling,
                fail: false,
                capacity_checks: AtomicUsize::new(0),
                started: StdMutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(10)
            }
        }

        fn running(&self) -> usize {
            self.started.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl BuilderPool for MockPool {
        async fn can_start_build(&self) -> bool {
            self.capacity_checks.fetch_add(1, Ordering::SeqCst);
            self.running() < self.ceiling
        }

        async fn start_build(&self, build: Build) -> Result<()> {
            if self.fail {
                return Err(Error::Provisioning {
                    container: "builder-0".to_string(),
                    source: Box::new(Error::Transport("Test error".to_string())),
                });
            }
            self.started.lock().unwrap().push(build);
            Ok(())
        }

        async fn release_build(&self, build_id: &BuildId) -> Option<Build> {
            let mut started = self.started.lock().unwrap();
            let index = started.iter().position(|b| &b.build_id == build_id)?;
            Some(started.remove(index))
        }
    }

    #[tokio::test]
    async fn test_starts_build_and_acknowledges_message() {
        let source = Arc::new(MockSource::with_messages(vec![message("bull-job-1")]));
        let pool = Arc::new(MockPool::new(10));
        let scheduler = BuildScheduler::new(pool.clone(), vec![source.clone()], POLL_INTERVAL);

        assert!(scheduler.start().await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;

        let started = pool.started.lock().unwrap().clone();
        assert_eq!(started.len(), 1);
        assert_eq!(
            started[0].container_environment.get("OVERRIDE_A"),
            Some(&"Value A".to_string())
        );
        assert!(!started[0].build_id.to_string().is_empty());

        assert_eq!(source.acked(), vec!["bull-job-1"]);
        assert_eq!(*source.delivered.lock().unwrap(), vec!["bull-job-1"]);
        assert!(source.polls() > 1);
    }

    #[tokio::test]
    async fn test_does_not_run_more_builds_than_the_pool_allows() {
        let source = Arc::new(MockSource::endless());
        let pool = Arc::new(MockPool::new(10));
        let scheduler = BuildScheduler::new(pool.clone(), vec![source.clone()], POLL_INTERVAL);

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.stop().await;

        assert_eq!(pool.running(), 10);
        assert!(source.polls() > 10);
        assert_eq!(source.acked().len(), 10);
    }

    #[tokio::test]
    async fn test_does_not_acknowledge_when_build_fails_to_start() {
        let source = Arc::new(MockSource::with_messages(vec![message("bull-job-1")]));
        let pool = Arc::new(MockPool::failing());
        let scheduler = BuildScheduler::new(pool.clone(), vec![source.clone()], POLL_INTERVAL);

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;

        assert_eq!(*source.delivered.lock().unwrap(), vec!["bull-job-1"]);
        assert!(source.acked().is_empty());
    }

    #[tokio::test]
    async fn test_keeps_polling_while_at_capacity() {
        let source = Arc::new(MockSource::endless());
        let pool = Arc::new(MockPool::new(0));
        let scheduler = BuildScheduler::new(pool.clone(), vec![source.clone()], POLL_INTERVAL);

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;

        assert!(source.polls() > 3);
        assert_eq!(pool.running(), 0);
        assert!(source.acked().is_empty());
    }

    #[tokio::test]
    async fn test_capacity_checked_without_message() {
        let source = MockSource::default();
        let pool = MockPool::new(1);

        let outcome = BuildScheduler::poll_once(&source, &pool).await;

        assert_eq!(outcome, CycleOutcome::Empty);
        assert_eq!(pool.capacity_checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_poll_once_outcomes() {
        let pool = MockPool::new(1);

        let failing = MockSource {
            fail_fetch: true,
            ..Default::default()
        };
        assert_eq!(
            BuildScheduler::poll_once(&failing, &pool).await,
            CycleOutcome::FetchFailed
        );

        let bad_payload = MockSource::with_messages(vec![QueueMessage {
            id: "bad".to_string(),
            payload: serde_json::json!({ "environment": "nope" }),
        }]);
        assert_eq!(
            BuildScheduler::poll_once(&bad_payload, &pool).await,
            CycleOutcome::InvalidPayload
        );
        assert!(bad_payload.acked().is_empty());

        let source = MockSource::with_messages(vec![message("a"), message("b")]);
        assert!(matches!(
            BuildScheduler::poll_once(&source, &pool).await,
            CycleOutcome::Dispatched { .. }
        ));
        assert_eq!(
            BuildScheduler::poll_once(&source, &pool).await,
            CycleOutcome::AtCapacity
        );
        assert_eq!(source.acked(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_sources_share_the_pool_ceiling() {
        let mut platform = MockPlatform::with_containers(10);
        platform.update_delay = Duration::from_millis(10);
        let platform = Arc::new(platform);
        let pool = Arc::new(ContainerBuilderPool::new(platform.clone(), 3));

        let sources: Vec<Arc<MockSource>> = (0..3).map(|_| Arc::new(MockSource::endless())).collect();
        let scheduler = BuildScheduler::new(
            pool.clone(),
            sources
                .iter()
                .map(|s| s.clone() as Arc<dyn QueueSource>)
                .collect(),
            POLL_INTERVAL,
        );

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.stop().await;
        scheduler.wait().await;

        assert_eq!(pool.running_builds().await, 3);
        assert_eq!(platform.provisioned().len(), 3);
        let acked: usize = sources.iter().map(|s| s.acked().len()).sum();
        assert_eq!(acked, 3);
        assert!(sources.iter().all(|s| s.polls() > 1));
    }

    #[tokio::test]
    async fn test_release_lets_new_builds_start() {
        let source = Arc::new(MockSource::endless());
        let pool = Arc::new(MockPool::new(1));
        let scheduler = BuildScheduler::new(pool.clone(), vec![source.clone()], POLL_INTERVAL);

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.running(), 1);

        let first = pool.started.lock().unwrap()[0].build_id;
        pool.release_build(&first).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;

        assert_eq!(pool.running(), 1);
        assert_eq!(source.acked().len(), 2);
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let source = Arc::new(MockSource::endless());
        let pool = Arc::new(MockPool::new(0));
        let scheduler = BuildScheduler::new(pool, vec![source.clone()], POLL_INTERVAL);

        assert_eq!(scheduler.state().await, SchedulerState::Idle);
        assert!(scheduler.start().await);
        assert!(!scheduler.start().await);
        assert_eq!(scheduler.state().await, SchedulerState::Running);

        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.stop().await;
        scheduler.stop().await;
        assert_eq!(scheduler.state().await, SchedulerState::Stopped);
        scheduler.wait().await;

        let polls = source.polls();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(source.polls(), polls);
        assert!(!scheduler.start().await);
    }

    #[tokio::test]
    async fn test_failing_source_does_not_stall_healthy_source() {
        let failing = Arc::new(MockSource {
            fail_fetch: true,
            ..Default::default()
        });
        let healthy = Arc::new(MockSource::with_messages(vec![message("a"), message("b")]));
        let pool = Arc::new(MockPool::new(10));
        let scheduler = BuildScheduler::new(
            pool.clone(),
            vec![failing.clone(), healthy.clone()],
            POLL_INTERVAL,
        );

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;
        scheduler.wait().await;

        assert_eq!(healthy.acked(), vec!["a", "b"]);
        assert_eq!(pool.running(), 2);
        assert!(failing.polls() > 3);
        assert!(failing.acked().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_loop_never_fetches() {
        let source = Arc::new(MockSource::endless());
        let pool = Arc::new(MockPool::new(10));
        let cancel = CancellationToken::new();
        cancel.cancel();

        BuildScheduler::poll_loop(source.clone(), pool.clone(), POLL_INTERVAL, cancel).await;

        assert_eq!(source.polls(), 0);
        assert_eq!(pool.running(), 0);
    }

    #[tokio::test]
    async fn test_stop_abandons_pending_fetch() {
        let source = Arc::new(MockSource {
            endless: true,
            fetch_delay: Duration::from_secs(5),
            ..Default::default()
        });
        let pool = Arc::new(MockPool::new(10));
        let scheduler = BuildScheduler::new(pool.clone(), vec![source.clone()], POLL_INTERVAL);

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(source.polls(), 1);

        scheduler.stop().await;
        tokio::time::timeout(Duration::from_secs(1), scheduler.wait())
            .await
            .unwrap();

        assert_eq!(pool.running(), 0);
        assert!(source.acked().is_empty());
    }
}
