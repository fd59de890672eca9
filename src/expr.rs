//! Column expressions evaluated against a [`Table`].
//!
//! The instruction algebra consumes expressions as opaque values: a
//! [`Filter`](crate::instruction::Instruction::Filter) holds predicates, a
//! projection holds one expression per output column, sort and partition
//! keys are expressions, and aggregations pair an expression with an
//! [`AggOp`]. The algebra here is intentionally small — column references,
//! literals, aliasing, null tests, boolean/comparison/arithmetic operators —
//! just enough to express those payloads.
//!
//! Evaluation is row-at-a-time over [`Datum`]s. Any null operand makes a
//! comparison or arithmetic result null; `and`/`or` use Kleene logic only as
//! far as the engine needs (null short-circuits to null).

use crate::series::{Datum, Series};
use crate::table::Table;
use anyhow::{Result, bail};
use ordered_float::OrderedFloat;
use std::fmt;

/// Binary operators usable in expressions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "&",
            Self::Or => "|",
        };
        f.write_str(s)
    }
}

/// A column expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Reference to an input column by name.
    Col(String),
    /// A constant.
    Lit(Datum),
    /// Rename the result of the inner expression.
    Alias(Box<Expr>, String),
    /// True where the inner expression is null (never null itself).
    IsNull(Box<Expr>),
    /// Boolean negation; null stays null.
    Not(Box<Expr>),
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Shorthand for [`Expr::Col`].
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Col(name.into())
}

/// Shorthand for [`Expr::Lit`].
pub fn lit(value: impl Into<Datum>) -> Expr {
    Expr::Lit(value.into())
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Self::Float(OrderedFloat(v))
    }
}

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Self::Utf8(v.to_string())
    }
}

impl Expr {
    /// The name the evaluated column carries: the alias if present,
    /// otherwise the leftmost column reference, otherwise `"literal"`.
    pub fn name(&self) -> &str {
        match self {
            Self::Col(n) => n,
            Self::Lit(_) => "literal",
            Self::Alias(_, n) => n,
            Self::IsNull(inner) | Self::Not(inner) => inner.name(),
            Self::BinaryOp { left, .. } => left.name(),
        }
    }

    pub fn alias(self, name: impl Into<String>) -> Self {
        Self::Alias(Box::new(self), name.into())
    }

    pub fn is_null(self) -> Self {
        Self::IsNull(Box::new(self))
    }

    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    fn binary(self, op: BinaryOp, right: Self) -> Self {
        Self::BinaryOp {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn add(self, right: Self) -> Self {
        self.binary(BinaryOp::Add, right)
    }

    pub fn sub(self, right: Self) -> Self {
        self.binary(BinaryOp::Sub, right)
    }

    pub fn mul(self, right: Self) -> Self {
        self.binary(BinaryOp::Mul, right)
    }

    pub fn div(self, right: Self) -> Self {
        self.binary(BinaryOp::Div, right)
    }

    pub fn eq(self, right: Self) -> Self {
        self.binary(BinaryOp::Eq, right)
    }

    pub fn not_eq(self, right: Self) -> Self {
        self.binary(BinaryOp::NotEq, right)
    }

    pub fn lt(self, right: Self) -> Self {
        self.binary(BinaryOp::Lt, right)
    }

    pub fn lt_eq(self, right: Self) -> Self {
        self.binary(BinaryOp::LtEq, right)
    }

    pub fn gt(self, right: Self) -> Self {
        self.binary(BinaryOp::Gt, right)
    }

    pub fn gt_eq(self, right: Self) -> Self {
        self.binary(BinaryOp::GtEq, right)
    }

    pub fn and(self, right: Self) -> Self {
        self.binary(BinaryOp::And, right)
    }

    pub fn or(self, right: Self) -> Self {
        self.binary(BinaryOp::Or, right)
    }

    /// Evaluate against every row of `table`, producing a column named
    /// [`Expr::name`].
    ///
    /// # Errors
    /// Unknown column references and type-incompatible operands error.
    pub fn eval(&self, table: &Table) -> Result<Series> {
        let values = (0..table.len())
            .map(|row| self.eval_row(table, row))
            .collect::<Result<Vec<_>>>()?;
        Ok(Series::new(self.name(), values))
    }

    fn eval_row(&self, table: &Table, row: usize) -> Result<Datum> {
        match self {
            Self::Col(name) => {
                let series = table.column(name)?;
                Ok(series.get(row).clone())
            }
            Self::Lit(v) => Ok(v.clone()),
            Self::Alias(inner, _) => inner.eval_row(table, row),
            Self::IsNull(inner) => Ok(Datum::Bool(inner.eval_row(table, row)?.is_null())),
            Self::Not(inner) => match inner.eval_row(table, row)? {
                Datum::Null => Ok(Datum::Null),
                Datum::Bool(b) => Ok(Datum::Bool(!b)),
                other => bail!("cannot negate non-boolean value {other:?}"),
            },
            Self::BinaryOp { op, left, right } => {
                let l = left.eval_row(table, row)?;
                let r = right.eval_row(table, row)?;
                eval_binary(*op, l, r)
            }
        }
    }
}

fn eval_binary(op: BinaryOp, l: Datum, r: Datum) -> Result<Datum> {
    use BinaryOp::*;

    if l.is_null() || r.is_null() {
        return Ok(Datum::Null);
    }

    match op {
        Add | Sub | Mul | Div => eval_arithmetic(op, &l, &r),
        Eq => Ok(Datum::Bool(cmp_eq(&l, &r)?)),
        NotEq => Ok(Datum::Bool(!cmp_eq(&l, &r)?)),
        Lt | LtEq | Gt | GtEq => {
            let ord = cmp_order(&l, &r)?;
            let b = match op {
                Lt => ord.is_lt(),
                LtEq => ord.is_le(),
                Gt => ord.is_gt(),
                GtEq => ord.is_ge(),
                _ => unreachable!(),
            };
            Ok(Datum::Bool(b))
        }
        And | Or => match (l, r) {
            (Datum::Bool(a), Datum::Bool(b)) => Ok(Datum::Bool(if op == And {
                a && b
            } else {
                a || b
            })),
            (a, b) => bail!("boolean operator {op} on non-boolean values {a:?}, {b:?}"),
        },
    }
}

fn eval_arithmetic(op: BinaryOp, l: &Datum, r: &Datum) -> Result<Datum> {
    use BinaryOp::*;

    // Int op Int stays Int (except division); anything else numeric goes
    // through f64.
    if let (Datum::Int(a), Datum::Int(b)) = (l, r) {
        return Ok(match op {
            Add => Datum::Int(a.wrapping_add(*b)),
            Sub => Datum::Int(a.wrapping_sub(*b)),
            Mul => Datum::Int(a.wrapping_mul(*b)),
            Div => {
                if *b == 0 {
                    Datum::Null
                } else {
                    Datum::float(*a as f64 / *b as f64)
                }
            }
            _ => unreachable!(),
        });
    }

    let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
        bail!("arithmetic {op} on non-numeric values {l:?}, {r:?}");
    };
    let v = match op {
        Add => a + b,
        Sub => a - b,
        Mul => a * b,
        Div => a / b,
        _ => unreachable!(),
    };
    Ok(Datum::float(v))
}

fn cmp_eq(l: &Datum, r: &Datum) -> Result<bool> {
    // Numeric cross-type equality goes through f64.
    if let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) {
        return Ok(a == b);
    }
    if l.dtype() != r.dtype() {
        bail!("cannot compare {l:?} with {r:?}");
    }
    Ok(l == r)
}

fn cmp_order(l: &Datum, r: &Datum) -> Result<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) {
        return Ok(a.total_cmp(&b));
    }
    if l.dtype() != r.dtype() {
        bail!("cannot compare {l:?} with {r:?}");
    }
    Ok(l.cmp(r))
}

/// An ordered list of expressions: a projection, a predicate set, or a key
/// list depending on where it is used.
#[derive(Clone, Debug, PartialEq)]
pub struct ExprList {
    exprs: Vec<Expr>,
}

impl ExprList {
    pub fn new(exprs: Vec<Expr>) -> Self {
        Self { exprs }
    }

    /// A key list of plain column references.
    pub fn columns<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self::new(names.into_iter().map(|n| col(n.into())).collect())
    }

    pub fn exprs(&self) -> &[Expr] {
        &self.exprs
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Expr> {
        self.exprs.iter()
    }

    /// Output column names, in order.
    pub fn names(&self) -> Vec<&str> {
        self.exprs.iter().map(Expr::name).collect()
    }

    /// Replace every expression with a reference to its output column.
    ///
    /// Used when the expressions were already evaluated upstream and only
    /// the resulting columns should be consulted again.
    pub fn to_column_refs(&self) -> Self {
        Self::new(self.exprs.iter().map(|e| col(e.name())).collect())
    }
}

impl From<Vec<Expr>> for ExprList {
    fn from(exprs: Vec<Expr>) -> Self {
        Self::new(exprs)
    }
}

impl FromIterator<Expr> for ExprList {
    fn from_iter<I: IntoIterator<Item = Expr>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Aggregation functions accepted by `Table::agg` and the `Aggregate`
/// instruction. Nulls are ignored by every op; `Count` counts non-null
/// values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggOp {
    Sum,
    Count,
    Min,
    Max,
    Mean,
}

impl fmt::Display for AggOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
            Self::Mean => "mean",
        };
        f.write_str(s)
    }
}
