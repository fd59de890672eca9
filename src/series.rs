//! Dynamically typed column values and the `Series` column vector.
//!
//! Riptide keeps the columnar layer deliberately small: a cell is a
//! [`Datum`], a column is a [`Series`] (a name, a [`DataType`], and a vector
//! of cells). Floats are stored as [`OrderedFloat`] so every cell value has
//! a total order and a hash, which the sort, range-partition, hash-partition,
//! and group-by paths all rely on.
//!
//! `Datum` ordering places `Null` before every non-null value; mixed-type
//! columns (which only arise from untyped literals) order by type first.

use ordered_float::OrderedFloat;
use std::fmt;

/// Runtime type of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    /// All-null column with no concrete type yet.
    Null,
    Bool,
    Int64,
    Float64,
    Utf8,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Utf8 => "utf8",
        };
        f.write_str(s)
    }
}

/// A single cell value.
///
/// Variant order defines the cross-type ordering (`Null` least), so derived
/// `Ord` gives sorting and range partitioning a total order for free.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Utf8(String),
}

impl Datum {
    /// Construct a float cell.
    pub fn float(v: f64) -> Self {
        Self::Float(OrderedFloat(v))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The concrete type of this cell (`DataType::Null` for nulls).
    pub fn dtype(&self) -> DataType {
        match self {
            Self::Null => DataType::Null,
            Self::Bool(_) => DataType::Bool,
            Self::Int(_) => DataType::Int64,
            Self::Float(_) => DataType::Float64,
            Self::Utf8(_) => DataType::Utf8,
        }
    }

    /// Numeric view used by arithmetic and the numeric aggregations.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(v.0),
            _ => None,
        }
    }

    /// Rough heap footprint in bytes, used for partition size estimates.
    pub fn size_bytes(&self) -> usize {
        match self {
            Self::Utf8(s) => std::mem::size_of::<Self>() + s.len(),
            _ => std::mem::size_of::<Self>(),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str(""),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{}", v.0),
            Self::Utf8(v) => f.write_str(v),
        }
    }
}

/// A named column: a name, a declared [`DataType`], and one cell per row.
///
/// The declared dtype is the type non-null cells must carry; an all-null
/// series has dtype [`DataType::Null`] until unified with a typed one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Series {
    name: String,
    dtype: DataType,
    values: Vec<Datum>,
}

impl Series {
    /// Build a series from cells, inferring the dtype from the first
    /// non-null cell. Mixed non-null types keep the first cell's dtype;
    /// callers that care validate via [`Series::check_dtype`].
    pub fn new(name: impl Into<String>, values: Vec<Datum>) -> Self {
        let dtype = values
            .iter()
            .find(|v| !v.is_null())
            .map_or(DataType::Null, Datum::dtype);
        Self {
            name: name.into(),
            dtype,
            values,
        }
    }

    pub fn from_i64(name: impl Into<String>, values: impl IntoIterator<Item = i64>) -> Self {
        Self::new(name, values.into_iter().map(Datum::Int).collect())
    }

    pub fn from_f64(name: impl Into<String>, values: impl IntoIterator<Item = f64>) -> Self {
        Self::new(name, values.into_iter().map(Datum::float).collect())
    }

    pub fn from_bool(name: impl Into<String>, values: impl IntoIterator<Item = bool>) -> Self {
        Self::new(name, values.into_iter().map(Datum::Bool).collect())
    }

    pub fn from_utf8<S: Into<String>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(
            name,
            values.into_iter().map(|s| Datum::Utf8(s.into())).collect(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Datum] {
        &self.values
    }

    pub fn get(&self, row: usize) -> &Datum {
        &self.values[row]
    }

    /// Rename in place, returning the series for chaining.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// True when every non-null cell matches the declared dtype.
    pub fn check_dtype(&self) -> bool {
        self.values
            .iter()
            .all(|v| v.is_null() || v.dtype() == self.dtype)
    }

    /// Gather cells at `indices` into a new series with the same name/dtype.
    pub fn take(&self, indices: &[usize]) -> Self {
        Self {
            name: self.name.clone(),
            dtype: self.dtype,
            values: indices.iter().map(|&i| self.values[i].clone()).collect(),
        }
    }

    /// Append another series' cells (caller has already unified names/dtypes).
    pub(crate) fn extend_from(&mut self, other: &Self) {
        if self.dtype == DataType::Null {
            self.dtype = other.dtype;
        }
        self.values.extend(other.values.iter().cloned());
    }

    /// Estimated heap size of all cells.
    pub fn size_bytes(&self) -> usize {
        self.values.iter().map(Datum::size_bytes).sum()
    }
}
