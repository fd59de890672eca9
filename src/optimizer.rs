//! Logical plan rewrites applied before scheduling.
//!
//! The optimizer is a fixed list of lightweight, semantics-preserving
//! rewrites run once, bottom-up. Each applied rewrite is recorded as an
//! [`OptimizationDecision`] so callers can inspect what the pass did.
//!
//! 1. **Fold adjacent limits** — `Limit(a)` over `Limit(b)` keeps the
//!    smaller budget.
//! 2. **Push limits into scans** — a limit over a file scan also clips
//!    each scan partition at read time (the global limit node stays for
//!    cross-partition exactness).
//! 3. **Fuse adjacent filters** — stacked filters become one predicate
//!    list.
//! 4. **Drop no-op repartitions** — repartitioning a single partition
//!    into one partition does nothing.

use crate::plan::{LogicalPlan, ScanPlan};
use std::sync::Arc;

/// A rewrite the optimizer applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizationDecision {
    /// `Limit(outer)` over `Limit(inner)` was folded to the minimum.
    FoldedAdjacentLimits { outer: usize, inner: usize },
    /// A limit was copied into the file scan beneath it.
    PushedLimitIntoScan { limit: usize },
    /// Stacked filters were merged into one predicate list.
    FusedAdjacentFilters { predicates: usize },
    /// A repartition with nothing to move was removed.
    DroppedNoopRepartition,
}

/// An optimized plan plus the decisions that produced it.
#[derive(Debug, Clone)]
pub struct OptimizedPlan {
    pub plan: LogicalPlan,
    pub decisions: Vec<OptimizationDecision>,
}

/// Rewrite `plan` with the fixed rule list.
pub fn optimize(plan: &LogicalPlan) -> OptimizedPlan {
    let mut decisions = Vec::new();
    let plan = rewrite(plan, &mut decisions);
    OptimizedPlan { plan, decisions }
}

fn rewrite(plan: &LogicalPlan, decisions: &mut Vec<OptimizationDecision>) -> LogicalPlan {
    let plan = rewrite_children(plan, decisions);

    match plan {
        LogicalPlan::GlobalLimit { input, limit } => match input.as_ref() {
            LogicalPlan::GlobalLimit {
                input: inner_input,
                limit: inner,
            } => {
                decisions.push(OptimizationDecision::FoldedAdjacentLimits {
                    outer: limit,
                    inner: *inner,
                });
                LogicalPlan::GlobalLimit {
                    input: Arc::clone(inner_input),
                    limit: limit.min(*inner),
                }
            }
            LogicalPlan::TabularScan { scan } => {
                let pushed = scan.limit.map_or(limit, |l| l.min(limit));
                decisions.push(OptimizationDecision::PushedLimitIntoScan { limit: pushed });
                let scan = ScanPlan {
                    partition_paths: scan.partition_paths.clone(),
                    columns: scan.columns.clone(),
                    limit: Some(pushed),
                };
                LogicalPlan::GlobalLimit {
                    input: Arc::new(LogicalPlan::TabularScan {
                        scan: Arc::new(scan),
                    }),
                    limit,
                }
            }
            _ => LogicalPlan::GlobalLimit { input, limit },
        },
        LogicalPlan::Filter { input, predicate } => match input.as_ref() {
            LogicalPlan::Filter {
                input: inner_input,
                predicate: inner,
            } => {
                // Outer predicates run after (and so, here, alongside)
                // the inner ones; conjunction order is irrelevant.
                let merged: Vec<_> = inner
                    .iter()
                    .chain(predicate.iter())
                    .cloned()
                    .collect();
                decisions.push(OptimizationDecision::FusedAdjacentFilters {
                    predicates: merged.len(),
                });
                LogicalPlan::Filter {
                    input: Arc::clone(inner_input),
                    predicate: merged.into(),
                }
            }
            _ => LogicalPlan::Filter { input, predicate },
        },
        LogicalPlan::Repartition {
            input,
            num_partitions,
            scheme,
        } => {
            if num_partitions == 1 && input.num_partitions() == 1 {
                decisions.push(OptimizationDecision::DroppedNoopRepartition);
                (*input).clone()
            } else {
                LogicalPlan::Repartition {
                    input,
                    num_partitions,
                    scheme,
                }
            }
        }
        other => other,
    }
}

fn rewrite_children(plan: &LogicalPlan, decisions: &mut Vec<OptimizationDecision>) -> LogicalPlan {
    let child = |input: &Arc<LogicalPlan>, decisions: &mut Vec<OptimizationDecision>| {
        Arc::new(rewrite(input, decisions))
    };

    match plan {
        LogicalPlan::InMemoryScan { .. } | LogicalPlan::TabularScan { .. } => plan.clone(),
        LogicalPlan::Project { input, projection } => LogicalPlan::Project {
            input: child(input, decisions),
            projection: projection.clone(),
        },
        LogicalPlan::Filter { input, predicate } => LogicalPlan::Filter {
            input: child(input, decisions),
            predicate: predicate.clone(),
        },
        LogicalPlan::GlobalLimit { input, limit } => LogicalPlan::GlobalLimit {
            input: child(input, decisions),
            limit: *limit,
        },
        LogicalPlan::Sort {
            input,
            sort_by,
            descending,
        } => LogicalPlan::Sort {
            input: child(input, decisions),
            sort_by: sort_by.clone(),
            descending: descending.clone(),
        },
        LogicalPlan::Repartition {
            input,
            num_partitions,
            scheme,
        } => LogicalPlan::Repartition {
            input: child(input, decisions),
            num_partitions: *num_partitions,
            scheme: scheme.clone(),
        },
        LogicalPlan::Aggregate {
            input,
            to_agg,
            group_by,
        } => LogicalPlan::Aggregate {
            input: child(input, decisions),
            to_agg: to_agg.clone(),
            group_by: group_by.clone(),
        },
        LogicalPlan::Join {
            left,
            right,
            left_on,
            right_on,
            output_projection,
            how,
        } => LogicalPlan::Join {
            left: child(left, decisions),
            right: child(right, decisions),
            left_on: left_on.clone(),
            right_on: right_on.clone(),
            output_projection: output_projection.clone(),
            how: *how,
        },
        LogicalPlan::Count { input } => LogicalPlan::Count {
            input: child(input, decisions),
        },
        LogicalPlan::MapPartition { input, mapper } => LogicalPlan::MapPartition {
            input: child(input, decisions),
            mapper: Arc::clone(mapper),
        },
        LogicalPlan::Write { input, write } => LogicalPlan::Write {
            input: child(input, decisions),
            write: Arc::clone(write),
        },
    }
}
