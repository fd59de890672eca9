//! The in-memory columnar table the instruction algebra runs over.
//!
//! A [`Table`] is an ordered set of equal-length [`Series`] with unique
//! names. The operation set is exactly what the instructions need: length
//! and schema inspection, concatenation, predicate filtering, expression
//! evaluation, head/take, stable multi-key sort, deterministic sampling,
//! quantile boundaries, grouped and global aggregation, hash join, and the
//! three partitioners (hash, random, range).
//!
//! # Determinism
//! Sampling and random partitioning use an inline SplitMix64 generator with
//! an explicit seed, and hash partitioning uses the std `DefaultHasher`
//! (fixed keys), so repeated runs of the same plan split rows identically.

use crate::expr::{AggOp, Expr, ExprList};
pub use crate::series::DataType;
use crate::series::{Datum, Series};
use anyhow::{Context, Result, bail, ensure};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A named, typed column slot in a [`Schema`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub dtype: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }
}

/// Ordered column names and types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|fld| format!("{}: {}", fld.name, fld.dtype))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// SplitMix64; small, seedable, and good enough for row shuffling.
#[derive(Clone, Copy, Debug)]
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    const fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    #[inline]
    const fn next_u64(&mut self) -> u64 {
        let mut z = {
            self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
            self.state
        };
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

/// Join variants supported by [`Table::join`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinHow {
    Inner,
    Left,
    Right,
    Outer,
}

impl fmt::Display for JoinHow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Inner => "inner",
            Self::Left => "left",
            Self::Right => "right",
            Self::Outer => "outer",
        };
        f.write_str(s)
    }
}

/// An immutable columnar table.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    columns: Vec<Series>,
    num_rows: usize,
}

impl Table {
    /// Build a table from columns.
    ///
    /// # Errors
    /// Errors on duplicate column names or mismatched column lengths.
    pub fn from_columns(columns: Vec<Series>) -> Result<Self> {
        let num_rows = columns.first().map_or(0, Series::len);
        let mut seen = HashMap::new();
        for c in &columns {
            ensure!(
                c.len() == num_rows,
                "column {} has {} rows, expected {num_rows}",
                c.name(),
                c.len()
            );
            ensure!(
                seen.insert(c.name().to_string(), ()).is_none(),
                "duplicate column name {}",
                c.name()
            );
        }
        Ok(Self { columns, num_rows })
    }

    /// An empty table carrying `schema`.
    pub fn empty(schema: &Schema) -> Self {
        let columns = schema
            .fields()
            .iter()
            .map(|f| Series::new(f.name.clone(), vec![]))
            .collect();
        Self {
            columns,
            num_rows: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn schema(&self) -> Schema {
        Schema::new(
            self.columns
                .iter()
                .map(|c| Field::new(c.name(), c.dtype()))
                .collect(),
        )
    }

    pub fn columns(&self) -> &[Series] {
        &self.columns
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Result<&Series> {
        self.columns
            .iter()
            .find(|c| c.name() == name)
            .with_context(|| format!("no column named {name} in {}", self.schema()))
    }

    /// Estimated heap size of all cells, for partition metadata.
    pub fn size_bytes(&self) -> usize {
        self.columns.iter().map(Series::size_bytes).sum()
    }

    /// Concatenate tables with compatible schemas (same names in the same
    /// order; an all-null column unifies with a typed one).
    pub fn concat(tables: &[Self]) -> Result<Self> {
        let Some(first) = tables.first() else {
            bail!("cannot concat zero tables");
        };
        let names: Vec<&str> = first.columns.iter().map(Series::name).collect();
        for t in &tables[1..] {
            let other: Vec<&str> = t.columns.iter().map(Series::name).collect();
            ensure!(
                names == other,
                "concat schema mismatch: {} vs {}",
                first.schema(),
                t.schema()
            );
        }

        let mut columns: Vec<Series> = first.columns.clone();
        let mut num_rows = first.num_rows;
        for t in &tables[1..] {
            for (dst, src) in columns.iter_mut().zip(&t.columns) {
                ensure!(
                    dst.dtype() == src.dtype()
                        || dst.dtype() == DataType::Null
                        || src.dtype() == DataType::Null,
                    "concat dtype mismatch for column {}: {} vs {}",
                    dst.name(),
                    dst.dtype(),
                    src.dtype()
                );
                dst.extend_from(src);
            }
            num_rows += t.num_rows;
        }
        Ok(Self { columns, num_rows })
    }

    /// Keep rows where every predicate evaluates to true (nulls drop the
    /// row).
    pub fn filter(&self, predicates: &ExprList) -> Result<Self> {
        let mut keep = vec![true; self.num_rows];
        for pred in predicates.iter() {
            let mask = pred.eval(self)?;
            for (row, k) in keep.iter_mut().enumerate() {
                match mask.get(row) {
                    Datum::Bool(true) => {}
                    Datum::Bool(false) | Datum::Null => *k = false,
                    other => bail!("filter predicate produced non-boolean value {other:?}"),
                }
            }
        }
        let indices: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter_map(|(i, k)| k.then_some(i))
            .collect();
        Ok(self.take_rows(&indices))
    }

    /// Evaluate a projection, producing one output column per expression.
    pub fn eval_expression_list(&self, projection: &ExprList) -> Result<Self> {
        let mut columns = Vec::with_capacity(projection.len());
        for expr in projection.iter() {
            columns.push(expr.eval(self)?);
        }
        Self::from_columns(columns)
    }

    /// First `n` rows.
    pub fn head(&self, n: usize) -> Self {
        let end = n.min(self.num_rows);
        self.take_rows(&(0..end).collect::<Vec<_>>())
    }

    /// Gather rows by an Int64 index series.
    ///
    /// # Errors
    /// Errors on null, negative, or out-of-range indices.
    pub fn take(&self, indices: &Series) -> Result<Self> {
        let mut rows = Vec::with_capacity(indices.len());
        for v in indices.values() {
            let Datum::Int(i) = v else {
                bail!("take index must be int64, got {v:?}");
            };
            ensure!(
                *i >= 0 && (*i as usize) < self.num_rows,
                "take index {i} out of range for {} rows",
                self.num_rows
            );
            rows.push(*i as usize);
        }
        Ok(self.take_rows(&rows))
    }

    fn take_rows(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.iter().map(|c| c.take(indices)).collect(),
            num_rows: indices.len(),
        }
    }

    /// Evaluate `sort_by` and return the row order that sorts the table.
    /// The sort is stable: ties keep input order.
    fn argsort(&self, sort_by: &ExprList, descending: &[bool]) -> Result<Vec<usize>> {
        ensure!(
            sort_by.len() == descending.len(),
            "sort got {} keys but {} descending flags",
            sort_by.len(),
            descending.len()
        );
        let keys: Vec<Series> = sort_by
            .iter()
            .map(|e| e.eval(self))
            .collect::<Result<_>>()?;

        let mut indices: Vec<usize> = (0..self.num_rows).collect();
        indices.sort_by(|&a, &b| {
            for (key, desc) in keys.iter().zip(descending) {
                let ord = key.get(a).cmp(key.get(b));
                let ord = if *desc { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(indices)
    }

    /// Stable multi-key sort. Nulls order first ascending (last when the
    /// key is descending).
    pub fn sort(&self, sort_by: &ExprList, descending: &[bool]) -> Result<Self> {
        let order = self.argsort(sort_by, descending)?;
        Ok(self.take_rows(&order))
    }

    /// Deterministically sample up to `n` rows without replacement.
    ///
    /// Returns the whole table when `n >= len`. Uses a partial
    /// Fisher-Yates driven by SplitMix64 seeded from the row count, so the
    /// same partition always yields the same sample.
    pub fn sample(&self, n: usize) -> Self {
        if n >= self.num_rows {
            return self.clone();
        }
        let mut rng = SplitMix64::new(0xA076_1D64_78BD_642F ^ self.num_rows as u64);
        let mut indices: Vec<usize> = (0..self.num_rows).collect();
        for i in 0..n {
            let j = i + (rng.next_u64() as usize) % (self.num_rows - i);
            indices.swap(i, j);
        }
        indices.truncate(n);
        self.take_rows(&indices)
    }

    /// Boundary rows splitting an already-sorted table into `num_quantiles`
    /// roughly equal ranges: the `num_quantiles - 1` rows at positions
    /// `len * i / num_quantiles`.
    pub fn quantiles(&self, num_quantiles: usize) -> Result<Self> {
        ensure!(num_quantiles > 0, "num_quantiles must be positive");
        let indices: Vec<usize> = (1..num_quantiles)
            .map(|i| self.num_rows * i / num_quantiles)
            .filter(|&i| i < self.num_rows)
            .collect();
        Ok(self.take_rows(&indices))
    }

    /// Aggregate, optionally per group.
    ///
    /// Output columns are the group keys (in `group_by` order) followed by
    /// one column per `(expr, op)` pair, named by the expression. Groups
    /// appear in first-seen row order. Without `group_by` the result is a
    /// single row, even for an empty input.
    pub fn agg(&self, to_agg: &[(Expr, AggOp)], group_by: Option<&ExprList>) -> Result<Self> {
        let agg_inputs: Vec<Series> = to_agg
            .iter()
            .map(|(e, _)| e.eval(self))
            .collect::<Result<_>>()?;

        // group id -> member row indices, in first-seen order
        let groups: Vec<Vec<usize>> = match group_by {
            None => vec![(0..self.num_rows).collect()],
            Some(keys) => {
                let key_cols: Vec<Series> =
                    keys.iter().map(|e| e.eval(self)).collect::<Result<_>>()?;
                let mut index: HashMap<Vec<Datum>, usize> = HashMap::new();
                let mut groups: Vec<Vec<usize>> = Vec::new();
                for row in 0..self.num_rows {
                    let key: Vec<Datum> = key_cols.iter().map(|c| c.get(row).clone()).collect();
                    let gid = *index.entry(key).or_insert_with(|| {
                        groups.push(Vec::new());
                        groups.len() - 1
                    });
                    groups[gid].push(row);
                }
                groups
            }
        };

        let mut columns: Vec<Series> = Vec::new();
        if let Some(keys) = group_by {
            let key_cols: Vec<Series> = keys.iter().map(|e| e.eval(self)).collect::<Result<_>>()?;
            for key_col in &key_cols {
                let reps: Vec<usize> = groups.iter().map(|g| g[0]).collect();
                columns.push(key_col.take(&reps));
            }
        }
        for ((expr, op), input) in to_agg.iter().zip(&agg_inputs) {
            let values: Vec<Datum> = groups
                .iter()
                .map(|rows| aggregate_rows(input, rows, *op))
                .collect();
            columns.push(Series::new(expr.name(), values));
        }
        Self::from_columns(columns)
    }

    /// Hash join.
    ///
    /// Null join keys never match. Output rows are the left rows in input
    /// order (with their matches in right input order), followed by
    /// unmatched right rows for `Right`/`Outer`. Right columns whose names
    /// collide with a left column are suffixed `_right`; when
    /// `output_projection` is present it is evaluated over the joined
    /// columns.
    pub fn join(
        &self,
        right: &Self,
        left_on: &ExprList,
        right_on: &ExprList,
        output_projection: Option<&ExprList>,
        how: JoinHow,
    ) -> Result<Self> {
        ensure!(
            left_on.len() == right_on.len(),
            "join got {} left keys but {} right keys",
            left_on.len(),
            right_on.len()
        );
        let left_keys = row_keys(self, left_on)?;
        let right_keys = row_keys(right, right_on)?;

        let mut right_index: HashMap<&[Datum], Vec<usize>> = HashMap::new();
        for (row, key) in right_keys.iter().enumerate() {
            if key.iter().any(Datum::is_null) {
                continue;
            }
            right_index.entry(key.as_slice()).or_default().push(row);
        }

        // (left row, right row) pairs; None marks the null-filled side.
        let mut pairs: Vec<(Option<usize>, Option<usize>)> = Vec::new();
        let mut right_matched = vec![false; right.num_rows];
        for (lrow, key) in left_keys.iter().enumerate() {
            let matches = if key.iter().any(Datum::is_null) {
                None
            } else {
                right_index.get(key.as_slice())
            };
            match matches {
                Some(rrows) => {
                    for &rrow in rrows {
                        right_matched[rrow] = true;
                        pairs.push((Some(lrow), Some(rrow)));
                    }
                }
                None => {
                    if matches!(how, JoinHow::Left | JoinHow::Outer) {
                        pairs.push((Some(lrow), None));
                    }
                }
            }
        }
        if matches!(how, JoinHow::Right | JoinHow::Outer) {
            for (rrow, matched) in right_matched.iter().enumerate() {
                if !matched {
                    pairs.push((None, Some(rrow)));
                }
            }
        }

        let left_names: Vec<&str> = self.columns.iter().map(Series::name).collect();
        let mut columns: Vec<Series> = Vec::new();
        for col in &self.columns {
            let values = pairs
                .iter()
                .map(|(l, _)| l.map_or(Datum::Null, |row| col.get(row).clone()))
                .collect();
            columns.push(Series::new(col.name(), values));
        }
        for col in &right.columns {
            let name = if left_names.contains(&col.name()) {
                format!("{}_right", col.name())
            } else {
                col.name().to_string()
            };
            let values = pairs
                .iter()
                .map(|(_, r)| r.map_or(Datum::Null, |row| col.get(row).clone()))
                .collect();
            columns.push(Series::new(name, values));
        }

        let joined = Self::from_columns(columns)?;
        match output_projection {
            Some(projection) => joined.eval_expression_list(projection),
            None => Ok(joined),
        }
    }

    /// Split rows into `num_partitions` by hashing the key columns.
    pub fn partition_by_hash(&self, keys: &ExprList, num_partitions: usize) -> Result<Vec<Self>> {
        ensure!(num_partitions > 0, "num_partitions must be positive");
        let key_rows = row_keys(self, keys)?;
        let assignment = key_rows.iter().map(|key| {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            (hasher.finish() % num_partitions as u64) as usize
        });
        Ok(self.scatter(assignment, num_partitions))
    }

    /// Split rows into `num_partitions` uniformly at random (seeded).
    pub fn partition_by_random(&self, num_partitions: usize, seed: u64) -> Vec<Self> {
        let mut rng = SplitMix64::new(seed);
        let assignment: Vec<usize> = (0..self.num_rows)
            .map(|_| (rng.next_u64() % num_partitions.max(1) as u64) as usize)
            .collect();
        self.scatter(assignment.into_iter(), num_partitions.max(1))
    }

    /// Split rows by range against `boundaries` (the `k-1` quantile rows of
    /// the global key distribution, carrying the same column names as the
    /// evaluated keys). Row `r` lands in the count of boundary rows that
    /// order at-or-before `r` under the flagged key ordering.
    pub fn partition_by_range(
        &self,
        keys: &ExprList,
        boundaries: &Self,
        descending: &[bool],
    ) -> Result<Vec<Self>> {
        ensure!(
            keys.len() == descending.len(),
            "range partition got {} keys but {} descending flags",
            keys.len(),
            descending.len()
        );
        let key_rows = row_keys(self, keys)?;
        let boundary_cols: Vec<&Series> = keys
            .names()
            .into_iter()
            .map(|n| boundaries.column(n))
            .collect::<Result<_>>()?;
        let num_partitions = boundaries.len() + 1;

        let assignment = key_rows.iter().map(|key| {
            // boundaries are few; a linear scan is fine
            let mut idx = 0;
            for brow in 0..boundaries.len() {
                let mut ord = Ordering::Equal;
                for ((cell, col), desc) in key.iter().zip(&boundary_cols).zip(descending) {
                    let o = cell.cmp(col.get(brow));
                    let o = if *desc { o.reverse() } else { o };
                    if o != Ordering::Equal {
                        ord = o;
                        break;
                    }
                }
                if ord == Ordering::Less {
                    break;
                }
                idx += 1;
            }
            idx
        });
        Ok(self.scatter(assignment, num_partitions))
    }

    /// Distribute rows into `num_partitions` buckets by a per-row index.
    fn scatter(&self, assignment: impl Iterator<Item = usize>, num_partitions: usize) -> Vec<Self> {
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); num_partitions];
        for (row, p) in assignment.enumerate() {
            buckets[p].push(row);
        }
        buckets.iter().map(|rows| self.take_rows(rows)).collect()
    }
}

/// Evaluate a key list into per-row key tuples.
fn row_keys(table: &Table, keys: &ExprList) -> Result<Vec<Vec<Datum>>> {
    let cols: Vec<Series> = keys.iter().map(|e| e.eval(table)).collect::<Result<_>>()?;
    Ok((0..table.len())
        .map(|row| cols.iter().map(|c| c.get(row).clone()).collect())
        .collect())
}

fn aggregate_rows(input: &Series, rows: &[usize], op: AggOp) -> Datum {
    let non_null = || rows.iter().map(|&r| input.get(r)).filter(|v| !v.is_null());
    match op {
        AggOp::Count => Datum::Int(non_null().count() as i64),
        AggOp::Min => non_null().min().cloned().unwrap_or(Datum::Null),
        AggOp::Max => non_null().max().cloned().unwrap_or(Datum::Null),
        AggOp::Sum => {
            if input.dtype() == DataType::Int64 {
                let mut any = false;
                let mut acc = 0i64;
                for v in non_null() {
                    if let Datum::Int(i) = v {
                        acc = acc.wrapping_add(*i);
                        any = true;
                    }
                }
                if any { Datum::Int(acc) } else { Datum::Null }
            } else {
                let vals: Vec<f64> = non_null().filter_map(Datum::as_f64).collect();
                if vals.is_empty() {
                    Datum::Null
                } else {
                    Datum::float(vals.iter().sum())
                }
            }
        }
        AggOp::Mean => {
            let vals: Vec<f64> = non_null().filter_map(Datum::as_f64).collect();
            if vals.is_empty() {
                Datum::Null
            } else {
                Datum::float(vals.iter().sum::<f64>() / vals.len() as f64)
            }
        }
    }
}
