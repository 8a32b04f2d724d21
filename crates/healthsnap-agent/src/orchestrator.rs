use healthsnap_cloud::collector::ProviderCollector;
use healthsnap_cloud::error::CollectError;
use healthsnap_common::csv;
use healthsnap_common::types::{ProviderKind, PublishTarget};
use healthsnap_storage::error::StorageError;
use healthsnap_storage::ObjectStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::task::AbortOnDropHandle;

/// Stage of a lane a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanePhase {
    Collect,
    Publish,
}

impl std::fmt::Display for LanePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LanePhase::Collect => write!(f, "collect"),
            LanePhase::Publish => write!(f, "publish"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaneError {
    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error(transparent)]
    Publish(#[from] StorageError),

    /// The lane task panicked; treated like a failed publish.
    #[error("lane task panicked: {0}")]
    Panicked(String),
}

impl LaneError {
    pub fn phase(&self) -> LanePhase {
        match self {
            LaneError::Collect(_) => LanePhase::Collect,
            LaneError::Publish(_) | LaneError::Panicked(_) => LanePhase::Publish,
        }
    }
}

/// Result of one lane within one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaneOutcome {
    Published {
        provider: ProviderKind,
        records: usize,
        bytes: usize,
    },
    Failed {
        provider: ProviderKind,
        phase: LanePhase,
        error: String,
    },
}

impl LaneOutcome {
    pub fn provider(&self) -> ProviderKind {
        match self {
            LaneOutcome::Published { provider, .. } | LaneOutcome::Failed { provider, .. } => {
                *provider
            }
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, LaneOutcome::Published { .. })
    }
}

#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick: u64,
    pub outcomes: Vec<LaneOutcome>,
}

impl TickReport {
    pub fn outcome(&self, provider: ProviderKind) -> Option<&LaneOutcome> {
        self.outcomes.iter().find(|o| o.provider() == provider)
    }
}

/// One provider pipeline: collect, encode, publish.
pub struct Lane {
    collector: ProviderCollector,
    header: String,
    store: Arc<dyn ObjectStore>,
    target: PublishTarget,
}

impl Lane {
    /// `identity_columns` precede `metric_columns` in the CSV header;
    /// `metric_columns` must follow the collector's metric order.
    pub fn new(
        collector: ProviderCollector,
        identity_columns: &[&str],
        metric_columns: &[String],
        store: Arc<dyn ObjectStore>,
        target: PublishTarget,
    ) -> Self {
        let header = csv::header(identity_columns, metric_columns.iter().map(String::as_str));
        Self {
            collector,
            header,
            store,
            target,
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.collector.kind()
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    async fn run(&self) -> Result<LaneOutcome, LaneError> {
        let snapshot = self.collector.collect().await?;
        let content = csv::encode(&snapshot, &self.header);
        self.store.publish(&self.target, &content).await?;

        Ok(LaneOutcome::Published {
            provider: snapshot.provider,
            records: snapshot.records.len(),
            bytes: content.len(),
        })
    }
}

/// Runs every lane once per tick, in order, containing each lane's failures.
pub struct Orchestrator {
    lanes: Vec<Arc<Lane>>,
    tick_counter: AtomicU64,
}

impl Orchestrator {
    pub fn new(lanes: Vec<Lane>) -> Self {
        Self {
            lanes: lanes.into_iter().map(Arc::new).collect(),
            tick_counter: AtomicU64::new(0),
        }
    }

    /// Ticks started so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_counter.load(Ordering::SeqCst)
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub async fn run_tick(&self) -> TickReport {
        let tick = self.tick_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();
        tracing::info!(tick, lanes = self.lanes.len(), "Tick started");

        let mut outcomes = Vec::with_capacity(self.lanes.len());
        for lane in &self.lanes {
            let provider = lane.provider();
            let task_lane = lane.clone();
            // A panic inside the lane surfaces as a JoinError instead of
            // unwinding through the tick. Dropping the tick aborts the lane.
            let handle = AbortOnDropHandle::new(tokio::spawn(async move { task_lane.run().await }));
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(LaneError::Panicked(e.to_string())),
            };

            let outcome = match result {
                Ok(outcome) => {
                    tracing::info!(
                        tick,
                        provider = %provider,
                        store = lane.store.name(),
                        target = %lane.target,
                        "Lane published"
                    );
                    outcome
                }
                Err(e) => {
                    let phase = e.phase();
                    tracing::error!(
                        tick,
                        provider = %provider,
                        phase = %phase,
                        error = %e,
                        "Lane failed"
                    );
                    LaneOutcome::Failed {
                        provider,
                        phase,
                        error: e.to_string(),
                    }
                }
            };
            outcomes.push(outcome);
        }

        tracing::info!(
            tick,
            elapsed_ms = started.elapsed().as_millis() as u64,
            published = outcomes.iter().filter(|o| o.is_published()).count(),
            "Tick finished"
        );

        TickReport { tick, outcomes }
    }
}
