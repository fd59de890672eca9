//! Logical plans: the relational operator tree the schedule walks.
//!
//! A [`LogicalPlan`] is a description, not work — the dynamic schedule
//! lowers it into partition tasks lazily. Children are `Arc`-shared so
//! plans clone cheaply and the optimizer can rebuild trees without copying
//! payloads.
//!
//! Every node knows its output partition count ahead of execution
//! ([`LogicalPlan::num_partitions`]); the schedule sizes shuffles, sort
//! fan-outs, and result sets from it.

use crate::expr::{AggOp, Expr, ExprList};
use crate::instruction::PartitionMapper;
use crate::table::{JoinHow, Table};
use anyhow::{Result, ensure};
use std::path::PathBuf;
use std::sync::Arc;

/// A file scan: per-partition path chunks plus the clauses pushed into the
/// scan (column selection and a row limit).
#[derive(Clone, Debug)]
pub struct ScanPlan {
    /// One entry per scan partition; each entry lists the files that
    /// partition reads, in order.
    pub partition_paths: Vec<Vec<String>>,
    /// Columns to keep, in order; `None` keeps everything.
    pub columns: Option<Vec<String>>,
    /// Row limit applied per partition after reading.
    pub limit: Option<usize>,
}

impl ScanPlan {
    /// Expand a glob pattern into a sorted file list split across
    /// `num_partitions` round-robin chunks.
    ///
    /// # Errors
    /// Errors on an invalid pattern or when nothing matches.
    pub fn from_glob(pattern: &str, num_partitions: usize) -> Result<Self> {
        let paths = crate::io::expand_paths(pattern)?;
        Ok(Self::from_paths(paths, num_partitions))
    }

    /// Split an explicit file list across `num_partitions` chunks.
    pub fn from_paths(paths: Vec<String>, num_partitions: usize) -> Self {
        let num_partitions = num_partitions.clamp(1, paths.len().max(1));
        let chunk = paths.len().div_ceil(num_partitions).max(1);
        let partition_paths = paths
            .chunks(chunk)
            .map(<[String]>::to_vec)
            .collect::<Vec<_>>();
        Self {
            partition_paths,
            columns: None,
            limit: None,
        }
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A file write: one output file per input partition under `root_dir`.
#[derive(Clone, Debug)]
pub struct WritePlan {
    pub root_dir: PathBuf,
}

impl WritePlan {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }
}

/// How a repartition spreads rows across its output partitions.
#[derive(Clone, Debug)]
pub enum RepartitionScheme {
    /// Uniform pseudo-random spread, seeded for determinism.
    Random { seed: u64 },
    /// Rows with equal key tuples land in the same output partition.
    Hash { partition_by: ExprList },
}

/// A node in the logical operator tree.
#[derive(Clone, Debug)]
pub enum LogicalPlan {
    /// Pre-materialized source partitions.
    InMemoryScan { partitions: Vec<Arc<Table>> },
    /// File source.
    TabularScan { scan: Arc<ScanPlan> },
    Project {
        input: Arc<LogicalPlan>,
        projection: ExprList,
    },
    Filter {
        input: Arc<LogicalPlan>,
        predicate: ExprList,
    },
    /// Limit across all partitions; partition count is preserved.
    GlobalLimit {
        input: Arc<LogicalPlan>,
        limit: usize,
    },
    /// Range-partitioned global sort.
    Sort {
        input: Arc<LogicalPlan>,
        sort_by: ExprList,
        descending: Vec<bool>,
    },
    Repartition {
        input: Arc<LogicalPlan>,
        num_partitions: usize,
        scheme: RepartitionScheme,
    },
    Aggregate {
        input: Arc<LogicalPlan>,
        to_agg: Vec<(Expr, AggOp)>,
        group_by: Option<ExprList>,
    },
    Join {
        left: Arc<LogicalPlan>,
        right: Arc<LogicalPlan>,
        left_on: ExprList,
        right_on: ExprList,
        output_projection: Option<ExprList>,
        how: JoinHow,
    },
    /// Global row count; produces one single-row partition.
    Count { input: Arc<LogicalPlan> },
    /// Arbitrary per-partition transform.
    MapPartition {
        input: Arc<LogicalPlan>,
        mapper: Arc<dyn PartitionMapper>,
    },
    Write {
        input: Arc<LogicalPlan>,
        write: Arc<WritePlan>,
    },
}

impl LogicalPlan {
    /// Build an in-memory source, one partition per table.
    ///
    /// # Errors
    /// Errors when `partitions` is empty (a plan must produce at least one
    /// partition).
    pub fn in_memory(partitions: Vec<Table>) -> Result<Self> {
        ensure!(
            !partitions.is_empty(),
            "in-memory scan needs at least one partition"
        );
        Ok(Self::InMemoryScan {
            partitions: partitions.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn tabular_scan(scan: ScanPlan) -> Self {
        Self::TabularScan {
            scan: Arc::new(scan),
        }
    }

    pub fn project(self, projection: ExprList) -> Self {
        Self::Project {
            input: Arc::new(self),
            projection,
        }
    }

    pub fn filter(self, predicate: ExprList) -> Self {
        Self::Filter {
            input: Arc::new(self),
            predicate,
        }
    }

    pub fn limit(self, limit: usize) -> Self {
        Self::GlobalLimit {
            input: Arc::new(self),
            limit,
        }
    }

    pub fn sort(self, sort_by: ExprList, descending: Vec<bool>) -> Self {
        Self::Sort {
            input: Arc::new(self),
            sort_by,
            descending,
        }
    }

    pub fn repartition(self, num_partitions: usize, scheme: RepartitionScheme) -> Self {
        Self::Repartition {
            input: Arc::new(self),
            num_partitions,
            scheme,
        }
    }

    pub fn aggregate(self, to_agg: Vec<(Expr, AggOp)>, group_by: Option<ExprList>) -> Self {
        Self::Aggregate {
            input: Arc::new(self),
            to_agg,
            group_by,
        }
    }

    pub fn join(
        self,
        right: Self,
        left_on: ExprList,
        right_on: ExprList,
        output_projection: Option<ExprList>,
        how: JoinHow,
    ) -> Self {
        Self::Join {
            left: Arc::new(self),
            right: Arc::new(right),
            left_on,
            right_on,
            output_projection,
            how,
        }
    }

    pub fn count(self) -> Self {
        Self::Count {
            input: Arc::new(self),
        }
    }

    pub fn map_partition(self, mapper: Arc<dyn PartitionMapper>) -> Self {
        Self::MapPartition {
            input: Arc::new(self),
            mapper,
        }
    }

    pub fn write(self, write: WritePlan) -> Self {
        Self::Write {
            input: Arc::new(self),
            write: Arc::new(write),
        }
    }

    /// The number of partitions this node produces.
    pub fn num_partitions(&self) -> usize {
        match self {
            Self::InMemoryScan { partitions } => partitions.len(),
            Self::TabularScan { scan } => scan.partition_paths.len(),
            Self::Project { input, .. }
            | Self::Filter { input, .. }
            | Self::GlobalLimit { input, .. }
            | Self::Sort { input, .. }
            | Self::MapPartition { input, .. }
            | Self::Write { input, .. } => input.num_partitions(),
            Self::Repartition { num_partitions, .. } => *num_partitions,
            Self::Aggregate {
                input, group_by, ..
            } => {
                if group_by.is_some() {
                    input.num_partitions()
                } else {
                    1
                }
            }
            Self::Join { left, right, .. } => left.num_partitions().max(right.num_partitions()),
            Self::Count { .. } => 1,
        }
    }

    /// Short operator name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InMemoryScan { .. } => "InMemoryScan",
            Self::TabularScan { .. } => "TabularScan",
            Self::Project { .. } => "Project",
            Self::Filter { .. } => "Filter",
            Self::GlobalLimit { .. } => "GlobalLimit",
            Self::Sort { .. } => "Sort",
            Self::Repartition { .. } => "Repartition",
            Self::Aggregate { .. } => "Aggregate",
            Self::Join { .. } => "Join",
            Self::Count { .. } => "Count",
            Self::MapPartition { .. } => "MapPartition",
            Self::Write { .. } => "Write",
        }
    }

}
