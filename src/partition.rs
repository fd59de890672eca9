//! Partition handles, partition metadata, and the partition-set cache.
//!
//! A *partition* is an opaque handle to a shard of tabular data — not a
//! [`Table`] itself. The task and schedule types are generic over
//! [`PartitionRef`] so the same machinery can target in-memory tables (the
//! [`LocalPartition`] handle) or, in a distributed deployment, worker-side
//! futures.
//!
//! Metadata comes in two flavors: [`PartialPartitionMetadata`], compile-time
//! knowledge about a not-yet-materialized partition where any field may be
//! unknown, and [`PartitionMetadata`], the concrete counterpart produced
//! after materialization. Unknown is represented as `None` — propagation
//! never invents a value.

use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// What is known ahead of time about a partition that does not exist yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialPartitionMetadata {
    pub num_rows: Option<usize>,
    pub size_bytes: Option<usize>,
}

impl PartialPartitionMetadata {
    /// Nothing known.
    pub const fn unknown() -> Self {
        Self {
            num_rows: None,
            size_bytes: None,
        }
    }

    pub const fn with_rows(num_rows: usize) -> Self {
        Self {
            num_rows: Some(num_rows),
            size_bytes: None,
        }
    }
}

/// Concrete metadata of a materialized partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMetadata {
    pub num_rows: usize,
    pub size_bytes: Option<usize>,
}

impl PartitionMetadata {
    pub fn from_table(table: &Table) -> Self {
        Self {
            num_rows: table.len(),
            size_bytes: Some(table.size_bytes()),
        }
    }
}

impl From<PartitionMetadata> for PartialPartitionMetadata {
    fn from(meta: PartitionMetadata) -> Self {
        Self {
            num_rows: Some(meta.num_rows),
            size_bytes: meta.size_bytes,
        }
    }
}

/// Opaque handle to a partition residing somewhere.
///
/// `from_table` installs a freshly materialized table behind a handle;
/// `table` retrieves it (for a remote handle this is where the fetch would
/// happen). Handles are cheap to clone.
pub trait PartitionRef: Clone + Send + Sync + 'static {
    fn from_table(table: Arc<Table>) -> Self;

    fn table(&self) -> Arc<Table>;

    fn metadata(&self) -> PartitionMetadata;
}

/// In-process partition handle: the table itself, shared.
#[derive(Clone, Debug)]
pub struct LocalPartition(Arc<Table>);

impl PartitionRef for LocalPartition {
    fn from_table(table: Arc<Table>) -> Self {
        Self(table)
    }

    fn table(&self) -> Arc<Table> {
        Arc::clone(&self.0)
    }

    fn metadata(&self) -> PartitionMetadata {
        PartitionMetadata::from_table(&self.0)
    }
}

/// The ordered partitions produced by a completed plan.
#[derive(Clone, Debug)]
pub struct PartitionSet<P: PartitionRef> {
    partitions: Vec<P>,
}

impl<P: PartitionRef> PartitionSet<P> {
    pub fn new(partitions: Vec<P>) -> Self {
        Self { partitions }
    }

    pub fn partitions(&self) -> &[P] {
        &self.partitions
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Total row count across all partitions.
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.metadata().num_rows).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize every partition's table, in partition order.
    pub fn tables(&self) -> Vec<Arc<Table>> {
        self.partitions.iter().map(PartitionRef::table).collect()
    }

    /// Concatenate all partitions into one table, mainly for inspection
    /// and tests.
    pub fn concat(&self) -> anyhow::Result<Table> {
        let tables: Vec<Table> = self.tables().iter().map(|t| (**t).clone()).collect();
        Table::concat(&tables)
    }
}

/// Handle to an entry in a [`PartitionSetCache`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PartitionCacheEntry(u64);

impl PartitionCacheEntry {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Process-level registry of result partition sets.
///
/// Cheaply cloneable; all clones share the same underlying map. The runner
/// inserts a finished plan's partitions here and hands back the entry.
pub struct PartitionSetCache<P: PartitionRef> {
    inner: Arc<Mutex<CacheInner<P>>>,
}

struct CacheInner<P: PartitionRef> {
    next_id: u64,
    sets: HashMap<u64, PartitionSet<P>>,
}

impl<P: PartitionRef> Default for PartitionSetCache<P> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                next_id: 0,
                sets: HashMap::new(),
            })),
        }
    }
}

impl<P: PartitionRef> Clone for PartitionSetCache<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: PartitionRef> PartitionSetCache<P> {
    /// Insert a partition set and return its entry handle.
    pub fn put(&self, set: PartitionSet<P>) -> PartitionCacheEntry {
        let mut g = self.inner.lock().unwrap();
        let id = g.next_id;
        g.next_id += 1;
        g.sets.insert(id, set);
        PartitionCacheEntry(id)
    }

    pub fn get(&self, entry: PartitionCacheEntry) -> Option<PartitionSet<P>> {
        self.inner.lock().unwrap().sets.get(&entry.0).cloned()
    }

    /// Drop an entry, releasing its partitions.
    pub fn evict(&self, entry: PartitionCacheEntry) {
        self.inner.lock().unwrap().sets.remove(&entry.0);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
