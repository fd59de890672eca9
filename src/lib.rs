//! # Riptide
//!
//! The **partition-parallel execution core** of the Riptide dataframe
//! engine. Riptide takes an optimized logical plan of relational
//! operations — projection, filter, limit, aggregation, join, sort,
//! repartition, read, write — and materializes it into a stream of
//! concretely schedulable partition-level tasks.
//!
//! ## Key pieces
//!
//! - **Instruction algebra** — a closed set of partition-to-partitions
//!   transformations. Every [`Instruction`] has a runtime behavior
//!   (`run`) and a compile-time metadata rule (`propagate`), so the
//!   schedule can plan limits and reducer sizing without materializing
//!   anything.
//! - **Partition tasks** — a [`PartitionTaskBuilder`] accumulates a
//!   pipeline of instructions with an aggregated resource request, then
//!   freezes into a single- or multi-output task. Results install
//!   exactly once; task ids are process-unique.
//! - **Dynamic schedule** — per-operator state machines walked lazily
//!   from the plan, emitting [`Construction`]s on demand and
//!   coordinating fan-out/reduce shuffles and the quantile-based sort
//!   protocol.
//! - **Runner** — sequential or rayon-parallel execution of
//!   constructions, with results landing in a process-level partition
//!   cache.
//!
//! ## Quick start
//!
//! ```
//! use riptide::testing::TableBuilder;
//! use riptide::{ExecMode, ExprList, LogicalPlan, Runner, col, lit};
//!
//! # fn main() -> anyhow::Result<()> {
//! let part = TableBuilder::new().with_i64("x", 0..100).build();
//!
//! let plan = LogicalPlan::in_memory(vec![part])?
//!     .filter(ExprList::new(vec![col("x").gt(lit(50))]))
//!     .limit(10);
//!
//! let runner = Runner::new(ExecMode::Sequential);
//! let entry = runner.run(&plan)?;
//! let result = runner.cache().get(entry).unwrap();
//! assert_eq!(result.len(), 10);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Execution is deferred and pull-based:
//! 1. [`optimizer::optimize`] rewrites the [`LogicalPlan`] (limit
//!    pushdown, filter fusion, no-op repartition removal).
//! 2. [`schedule_logical_node`] lowers the plan into schedule state
//!    machines; the [`Materialize`] adapter enumerates the root's
//!    partitions.
//! 3. The [`Runner`] polls the schedule, executes each construction's
//!    instruction pipeline, and reports completions back.
//! 4. The finished [`PartitionSet`] lands in the [`PartitionSetCache`]
//!    and a [`PartitionCacheEntry`] handle is returned.
//!
//! The task and schedule types are generic over [`PartitionRef`], an
//! opaque partition handle — the bundled [`Runner`] instantiates them
//! with in-memory [`LocalPartition`]s, and a distributed runner would
//! substitute worker-side handles without touching the core.
//!
//! ## Module overview
//!
//! - [`series`] / [`table`] — the minimal columnar layer ([`Datum`],
//!   [`Series`], [`Table`]) with the operations the instructions need
//! - [`expr`] — column expressions, predicates, sort/partition keys
//! - [`plan`] — logical operator tree, scan and write plans
//! - [`optimizer`] — tracked plan rewrites
//! - [`instruction`] — the closed instruction algebra
//! - [`task`] — builders, frozen tasks, materialized results
//! - [`partition`] — partition handles, metadata, the set cache
//! - [`schedule`] — the dynamic schedule state machines
//! - [`runner`] — sequential and parallel drivers
//! - [`io`] — CSV scan/write and glob expansion (feature `io-csv`)
//! - [`metrics`] — execution counters (feature `metrics`)
//! - [`testing`] — table builders and assertions for tests

pub mod expr;
pub mod instruction;
pub mod io;
pub mod optimizer;
pub mod partition;
pub mod plan;
pub mod resources;
pub mod runner;
pub mod schedule;
pub mod series;
pub mod table;
pub mod task;
pub mod testing;

#[cfg(feature = "metrics")]
pub mod metrics;

// General re-exports
pub use expr::{AggOp, BinaryOp, Expr, ExprList, col, lit};
pub use instruction::{Instruction, PartitionMapper, run_pipeline};
pub use optimizer::{OptimizationDecision, OptimizedPlan, optimize};
pub use partition::{
    LocalPartition, PartialPartitionMetadata, PartitionCacheEntry, PartitionMetadata,
    PartitionRef, PartitionSet, PartitionSetCache,
};
pub use plan::{LogicalPlan, RepartitionScheme, ScanPlan, WritePlan};
pub use resources::ResourceRequest;
pub use runner::{ExecMode, LocalMaterializedResult, Runner};
pub use schedule::{Construction, Materialize, MaterializePoll, Schedule, Tick, schedule_logical_node};
pub use series::{DataType, Datum, Series};
pub use table::{Field, JoinHow, Schema, Table};
pub use task::{
    MaterializedResult, MaterializedResultBox, MultiOutputPartitionTask, PartitionTask,
    PartitionTaskBuilder, SingleOutputPartitionTask,
};
