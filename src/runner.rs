//! The local runner: drives a dynamic schedule to completion.
//!
//! The runner optimizes the plan, builds the schedule, and executes each
//! [`Construction`] by running its instruction pipeline over the input
//! tables. Two modes:
//!
//! - [`ExecMode::Sequential`] — constructions execute inline, one at a
//!   time. The schedule can never stall, so a `Pending` poll is a fatal
//!   invariant violation.
//! - [`ExecMode::Parallel`] — constructions are dispatched onto a rayon
//!   pool, gated by each task's CPU request against the pool's free
//!   capacity. All schedule mutation (polling, `report_completed`) stays
//!   on the coordinator thread; workers only ship results back over a
//!   channel.
//!
//! Finished plans land in a process-level [`PartitionSetCache`]; `run`
//! returns the cache entry handle.

use crate::instruction::run_pipeline;
use crate::optimizer::optimize;
use crate::partition::{
    LocalPartition, PartitionCacheEntry, PartitionMetadata, PartitionRef, PartitionSetCache,
};
use crate::plan::LogicalPlan;
use crate::schedule::{Construction, Materialize, MaterializePoll};
use crate::table::Table;
use crate::task::{MaterializedResult, MaterializedResultBox};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::mpsc;

#[cfg(feature = "metrics")]
use crate::metrics::MetricsCollector;
#[cfg(feature = "metrics")]
use std::sync::Mutex;

/// How the runner executes constructions.
#[derive(Clone, Copy, Debug)]
pub enum ExecMode {
    /// Single-threaded, inline execution.
    Sequential,
    /// Execute on a rayon pool; `threads` defaults to the CPU count.
    Parallel { threads: Option<usize> },
}

/// A materialized result living in this process.
pub struct LocalMaterializedResult<P: PartitionRef> {
    partition: P,
}

impl<P: PartitionRef> LocalMaterializedResult<P> {
    pub fn new(partition: P) -> Self {
        Self { partition }
    }
}

impl<P: PartitionRef> MaterializedResult<P> for LocalMaterializedResult<P> {
    fn partition(&self) -> P {
        self.partition.clone()
    }

    fn vpartition(&self) -> Arc<Table> {
        self.partition.table()
    }

    fn metadata(&self) -> PartitionMetadata {
        self.partition.metadata()
    }

    // In-process execution has nothing to cancel.
    fn cancel(&self) {}
}

/// Run one construction's pipeline over its input tables and wrap the
/// outputs as local results.
fn execute<P: PartitionRef>(construction: &Construction<P>) -> Result<Vec<MaterializedResultBox<P>>> {
    let tables: Vec<Table> = construction
        .inputs()
        .iter()
        .map(|p| (*p.table()).clone())
        .collect();
    let instructions = construction.instructions();
    let outputs = run_pipeline(&instructions, tables)?;
    assert_eq!(
        outputs.len(),
        construction.num_results(),
        "task {} produced {} partitions, expected {}",
        construction.task_id(),
        outputs.len(),
        construction.num_results()
    );
    Ok(outputs
        .into_iter()
        .map(|t| {
            Box::new(LocalMaterializedResult::new(P::from_table(Arc::new(t))))
                as MaterializedResultBox<P>
        })
        .collect())
}

/// Executes logical plans over in-process partitions.
pub struct Runner {
    pub mode: ExecMode,
    cache: PartitionSetCache<LocalPartition>,
    #[cfg(feature = "metrics")]
    metrics: Mutex<Option<MetricsCollector>>,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(ExecMode::Parallel { threads: None })
    }
}

impl Runner {
    pub fn new(mode: ExecMode) -> Self {
        Self {
            mode,
            cache: PartitionSetCache::default(),
            #[cfg(feature = "metrics")]
            metrics: Mutex::new(None),
        }
    }

    /// The cache holding completed plans' partitions.
    pub fn cache(&self) -> &PartitionSetCache<LocalPartition> {
        &self.cache
    }

    /// Enable metrics collection for subsequent runs.
    #[cfg(feature = "metrics")]
    pub fn set_metrics(&self, collector: MetricsCollector) {
        *self.metrics.lock().unwrap() = Some(collector);
    }

    /// Detach the collector, e.g. to print or save it.
    #[cfg(feature = "metrics")]
    pub fn take_metrics(&self) -> Option<MetricsCollector> {
        self.metrics.lock().unwrap().take()
    }

    #[cfg(feature = "metrics")]
    fn record(&self, counter: &str, n: u64) {
        if let Some(m) = self.metrics.lock().unwrap().as_mut() {
            m.counter(counter).add(n);
        }
    }

    #[cfg(not(feature = "metrics"))]
    fn record(&self, _counter: &str, _n: u64) {}

    /// Optimize `plan`, drive its schedule to completion, and cache the
    /// result partitions.
    ///
    /// # Errors
    /// Propagates executor failures (I/O, malformed expressions); on the
    /// first failure the run is abandoned and nothing is cached.
    pub fn run(&self, plan: &LogicalPlan) -> Result<PartitionCacheEntry> {
        let optimized = optimize(plan);
        let mut schedule = Materialize::from_plan(&optimized.plan);
        match self.mode {
            ExecMode::Sequential => self.run_sequential(&mut schedule)?,
            ExecMode::Parallel { threads } => self.run_parallel(&mut schedule, threads)?,
        }
        let set = schedule.result_partition_set();
        self.record("partitions_cached", set.num_partitions() as u64);
        Ok(self.cache.put(set))
    }

    fn run_sequential(&self, schedule: &mut Materialize<LocalPartition>) -> Result<()> {
        loop {
            match schedule.next_construction()? {
                MaterializePoll::Ready(construction) => {
                    self.record("tasks_dispatched", 1);
                    let results = execute(&construction)?;
                    self.record("partitions_materialized", results.len() as u64);
                    self.record(
                        "rows_materialized",
                        results.iter().map(|r| r.metadata().num_rows as u64).sum(),
                    );
                    construction.report_completed(results);
                }
                MaterializePoll::Pending => {
                    panic!("dynamic schedule yielded no construction in sequential mode")
                }
                MaterializePoll::Exhausted => return Ok(()),
            }
        }
    }

    fn run_parallel(
        &self,
        schedule: &mut Materialize<LocalPartition>,
        threads: Option<usize>,
    ) -> Result<()> {
        let threads = threads.unwrap_or_else(num_cpus::get).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .context("build worker pool")?;

        type Completion = (
            Construction<LocalPartition>,
            f32,
            Result<Vec<MaterializedResultBox<LocalPartition>>>,
        );
        let (tx, rx) = mpsc::channel::<Completion>();

        let mut in_flight = 0usize;
        let mut free_cpus = threads as f32;
        let mut admitted: Option<Construction<LocalPartition>> = None;

        loop {
            if admitted.is_none() {
                match schedule.next_construction()? {
                    MaterializePoll::Ready(c) => admitted = Some(c),
                    MaterializePoll::Pending => {
                        assert!(
                            in_flight > 0,
                            "dynamic schedule stalled with no work in flight"
                        );
                    }
                    MaterializePoll::Exhausted => {
                        if in_flight == 0 {
                            return Ok(());
                        }
                    }
                }
            }

            // Dispatch when the CPU request fits; an idle pool always
            // admits so oversized requests cannot wedge the run.
            let admissible = admitted.as_ref().is_some_and(|c| {
                let cpus = c.resource_request().num_cpus.unwrap_or(1.0);
                cpus <= free_cpus || in_flight == 0
            });
            if admissible {
                let construction = admitted.take().unwrap();
                let cpus = construction.resource_request().num_cpus.unwrap_or(1.0);
                free_cpus -= cpus;
                in_flight += 1;
                self.record("tasks_dispatched", 1);
                let tx = tx.clone();
                pool.spawn(move || {
                    let result = execute(&construction);
                    // The coordinator may already have bailed; nothing to
                    // do with the result then.
                    let _ = tx.send((construction, cpus, result));
                });
                continue;
            }

            let (construction, cpus, result) = rx
                .recv()
                .expect("worker completion channel closed unexpectedly");
            in_flight -= 1;
            free_cpus += cpus;
            let results = result?;
            self.record("partitions_materialized", results.len() as u64);
            self.record(
                "rows_materialized",
                results.iter().map(|r| r.metadata().num_rows as u64).sum(),
            );
            construction.report_completed(results);
        }
    }
}
