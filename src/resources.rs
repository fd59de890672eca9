//! Per-task resource requests.
//!
//! A [`ResourceRequest`] describes what a pipelined task needs from the
//! executor. Absent fields mean "no opinion"; combining requests takes the
//! element-wise maximum where absent is the identity, so a pipeline's
//! aggregate request is the max over its instructions.

use serde::{Deserialize, Serialize};

/// Resources a task asks the executor for. All fields optional.
///
/// Serializable so remote executors can receive it alongside dispatched
/// work.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub num_cpus: Option<f32>,
    pub num_gpus: Option<f32>,
    pub memory_bytes: Option<usize>,
}

impl ResourceRequest {
    pub const fn new(
        num_cpus: Option<f32>,
        num_gpus: Option<f32>,
        memory_bytes: Option<usize>,
    ) -> Self {
        Self {
            num_cpus,
            num_gpus,
            memory_bytes,
        }
    }

    pub const fn with_num_cpus(num_cpus: f32) -> Self {
        Self::new(Some(num_cpus), None, None)
    }

    pub const fn with_num_gpus(num_gpus: f32) -> Self {
        Self::new(None, Some(num_gpus), None)
    }

    pub const fn with_memory_bytes(memory_bytes: usize) -> Self {
        Self::new(None, None, Some(memory_bytes))
    }

    /// Element-wise maximum; an absent field is the identity.
    pub fn max_of(a: Self, b: Self) -> Self {
        Self {
            num_cpus: max_opt_f32(a.num_cpus, b.num_cpus),
            num_gpus: max_opt_f32(a.num_gpus, b.num_gpus),
            memory_bytes: max_opt(a.memory_bytes, b.memory_bytes),
        }
    }

    /// Fold [`ResourceRequest::max_of`] over any number of requests.
    pub fn max_all(requests: impl IntoIterator<Item = Self>) -> Self {
        requests
            .into_iter()
            .fold(Self::default(), |acc, r| Self::max_of(acc, r))
    }
}

fn max_opt_f32(a: Option<f32>, b: Option<f32>) -> Option<f32> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

fn max_opt(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}
