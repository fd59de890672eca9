//! Execution counters for the runner.
//!
//! The metrics module tracks what a plan actually did: how many tasks were
//! dispatched, how many partitions came back, how many rows moved. A
//! [`MetricsCollector`] owns built-in counters plus any custom [`Metric`]s
//! the caller registers, and can print the snapshot or save it as JSON.
//!
//! # Example
//!
//! ```no_run
//! use riptide::metrics::MetricsCollector;
//! use riptide::{ExecMode, Runner};
//!
//! # fn main() -> anyhow::Result<()> {
//! let runner = Runner::new(ExecMode::Sequential);
//! runner.set_metrics(MetricsCollector::new());
//!
//! // ... run some plans ...
//!
//! if let Some(metrics) = runner.take_metrics() {
//!     metrics.print();
//!     metrics.save_to_file("run_metrics.json")?;
//! }
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A named value reported at the end of a run.
pub trait Metric: Send + Sync {
    /// The metric's name (e.g. `tasks_dispatched`).
    fn name(&self) -> &str;

    /// The current value as JSON.
    fn value(&self) -> Value;
}

/// Monotonically increasing counter.
pub struct CounterMetric {
    name: String,
    value: AtomicU64,
}

impl CounterMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_value(name, 0)
    }

    pub fn with_value(name: impl Into<String>, value: u64) -> Self {
        Self {
            name: name.into(),
            value: AtomicU64::new(value),
        }
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Metric for CounterMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.get())
    }
}

/// Collects built-in counters and user-registered metrics for one or more
/// runs.
pub struct MetricsCollector {
    started: Instant,
    counters: HashMap<String, Arc<CounterMetric>>,
    custom: Vec<Arc<dyn Metric>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            counters: HashMap::new(),
            custom: Vec::new(),
        }
    }

    /// Register a custom metric to include in every snapshot.
    pub fn register(&mut self, metric: Arc<dyn Metric>) {
        self.custom.push(metric);
    }

    /// Find or create a counter by name.
    pub fn counter(&mut self, name: &str) -> Arc<CounterMetric> {
        Arc::clone(
            self.counters
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CounterMetric::new(name))),
        )
    }

    /// Snapshot every metric, plus `elapsed_ms` since the collector was
    /// created.
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert(
            "elapsed_ms".to_string(),
            json!(self.started.elapsed().as_millis() as u64),
        );
        let mut names: Vec<&String> = self.counters.keys().collect();
        names.sort();
        for name in names {
            map.insert(name.clone(), self.counters[name].value());
        }
        for metric in &self.custom {
            map.insert(metric.name().to_string(), metric.value());
        }
        Value::Object(map)
    }

    /// Print the snapshot to stdout, one metric per line.
    pub fn print(&self) {
        let Value::Object(map) = self.to_json() else {
            unreachable!("to_json always builds an object");
        };
        println!("=== riptide metrics ===");
        for (name, value) in map {
            println!("{name}: {value}");
        }
    }

    /// Save the snapshot as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut f = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let body = serde_json::to_string_pretty(&self.to_json())?;
        f.write_all(body.as_bytes())
            .with_context(|| format!("write metrics to {}", path.display()))?;
        Ok(())
    }
}
