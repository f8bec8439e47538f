//! Symbolic dimension sizes.
//!
//! Shapes are sequences of [`Expr`] values so that symbolic (not yet known)
//! sizes can flow through the shape algebra unchanged while concrete sizes
//! fold to integers. Two dimensions are compared with [`dim_eq`], never with
//! raw `==` on unsimplified expressions.

use std::fmt::Display;
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};

use crate::dtype::DType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Int(isize),
    Var(String),

    Add(Box<Self>, Box<Self>),
    Sub(Box<Self>, Box<Self>),
    Mul(Box<Self>, Box<Self>),
    Div(Box<Self>, Box<Self>),
    Rem(Box<Self>, Box<Self>),
    Max(Box<Self>, Box<Self>),
    Neg(Box<Self>),
}

/// A tensor shape: one size expression per axis.
pub type Shape = Vec<Expr>;

impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Int(i) => write!(f, "{}", i),
            Expr::Var(s) => write!(f, "{}", s),
            Expr::Add(a, b) => write!(f, "({} + {})", a, b),
            Expr::Sub(a, b) => write!(f, "({} - {})", a, b),
            Expr::Mul(a, b) => write!(f, "({} * {})", a, b),
            Expr::Div(a, b) => write!(f, "({} / {})", a, b),
            Expr::Rem(a, b) => write!(f, "({} % {})", a, b),
            Expr::Max(a, b) => write!(f, "max({}, {})", a, b),
            Expr::Neg(a) => write!(f, "(-{})", a),
        }
    }
}

impl Expr {
    pub fn zero() -> Self {
        Expr::Int(0)
    }

    /// `max(self, other)` as an expression node.
    pub fn max(self, other: Self) -> Self {
        Expr::Max(Box::new(self), Box::new(other))
    }

    /// The constant value of this expression, if it folds to one.
    pub fn as_const(&self) -> Option<isize> {
        match self.clone().simplify() {
            Expr::Int(i) => Some(i),
            _ => None,
        }
    }

    /// Constant-folds and applies the usual identities.
    ///
    /// Division and remainder fold with euclidean semantics (floor for the
    /// positive divisors used throughout the shape algebra); the output-size
    /// formula depends on floor, not truncation.
    pub fn simplify(self) -> Self {
        match self {
            Expr::Int(_) | Expr::Var(_) => self,
            Expr::Add(a, b) => {
                let a = a.simplify();
                let b = b.simplify();
                match (a, b) {
                    (a, Expr::Int(b)) => {
                        let (base, c) = split_const(a);
                        join_const(base, c + b)
                    }
                    (Expr::Int(a), b) => {
                        let (base, c) = split_const(b);
                        join_const(base, c + a)
                    }
                    (a, b) => Expr::Add(Box::new(a), Box::new(b)),
                }
            }
            Expr::Sub(a, b) => {
                let a = a.simplify();
                let b = b.simplify();
                match (a, b) {
                    (a, b) if a == b => Expr::Int(0),
                    (a, Expr::Int(b)) => {
                        let (base, c) = split_const(a);
                        join_const(base, c - b)
                    }
                    (a, b) => Expr::Sub(Box::new(a), Box::new(b)),
                }
            }
            Expr::Mul(a, b) => {
                let a = a.simplify();
                let b = b.simplify();
                match (a, b) {
                    (Expr::Int(a), Expr::Int(b)) => Expr::Int(a * b),
                    (_, Expr::Int(0)) | (Expr::Int(0), _) => Expr::Int(0),
                    (expr, Expr::Int(1)) | (Expr::Int(1), expr) => expr,
                    (a, b) => Expr::Mul(Box::new(a), Box::new(b)),
                }
            }
            Expr::Div(a, b) => {
                let a = a.simplify();
                let b = b.simplify();
                match (a, b) {
                    (Expr::Int(a), Expr::Int(b)) if b != 0 => Expr::Int(a.div_euclid(b)),
                    (Expr::Int(0), _) => Expr::Int(0),
                    (expr, Expr::Int(1)) => expr,
                    (a, b) if a == b => Expr::Int(1),
                    (a, b) => Expr::Div(Box::new(a), Box::new(b)),
                }
            }
            Expr::Rem(a, b) => {
                let a = a.simplify();
                let b = b.simplify();
                match (a, b) {
                    (Expr::Int(a), Expr::Int(b)) if b != 0 => Expr::Int(a.rem_euclid(b)),
                    (Expr::Int(0), _) => Expr::Int(0),
                    (_, Expr::Int(1)) => Expr::Int(0),
                    (a, b) => Expr::Rem(Box::new(a), Box::new(b)),
                }
            }
            Expr::Max(a, b) => {
                let a = a.simplify();
                let b = b.simplify();
                match (a, b) {
                    (Expr::Int(a), Expr::Int(b)) => Expr::Int(a.max(b)),
                    (a, b) if a == b => a,
                    (a, b) => Expr::Max(Box::new(a), Box::new(b)),
                }
            }
            Expr::Neg(expr) => match expr.simplify() {
                Expr::Int(val) => Expr::Int(-val),
                Expr::Neg(inner) => *inner,
                e => Expr::Neg(Box::new(e)),
            },
        }
    }
}

/// Splits a simplified expression into a base term and a trailing integer
/// offset, so that constant chains like `(x - 1) + 1` fold across node
/// boundaries instead of accumulating.
fn split_const(e: Expr) -> (Option<Expr>, isize) {
    match e {
        Expr::Int(c) => (None, c),
        Expr::Add(base, off) => match (*base, *off) {
            (base, Expr::Int(c)) => (Some(base), c),
            (base, off) => (Some(Expr::Add(Box::new(base), Box::new(off))), 0),
        },
        Expr::Sub(base, off) => match (*base, *off) {
            (base, Expr::Int(c)) => (Some(base), -c),
            (base, off) => (Some(Expr::Sub(Box::new(base), Box::new(off))), 0),
        },
        e => (Some(e), 0),
    }
}

/// Inverse of [`split_const`]: `base + c`, normalized so the constant sits on
/// the right of a single `Add` or `Sub` node.
fn join_const(base: Option<Expr>, c: isize) -> Expr {
    match base {
        None => Expr::Int(c),
        Some(base) if c == 0 => base,
        Some(base) if c > 0 => Expr::Add(Box::new(base), Box::new(Expr::Int(c))),
        Some(base) => Expr::Sub(Box::new(base), Box::new(Expr::Int(-c))),
    }
}

/// Shape-equality predicate for possibly-symbolic dimensions: equal iff the
/// simplified forms coincide. Undecidable symbolic pairs compare unequal.
pub fn dim_eq(a: &Expr, b: &Expr) -> bool {
    a.clone().simplify() == b.clone().simplify()
}

/// Builds a shape from concrete sizes.
pub fn shape_of(dims: &[isize]) -> Shape {
    dims.iter().map(|&d| Expr::Int(d)).collect()
}

impl Add for Expr {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::Add(Box::new(self), Box::new(rhs))
    }
}

impl Sub for Expr {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::Sub(Box::new(self), Box::new(rhs))
    }
}

impl Mul for Expr {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Self::Mul(Box::new(self), Box::new(rhs))
    }
}

impl Div for Expr {
    type Output = Self;

    fn div(self, rhs: Self) -> Self::Output {
        Self::Div(Box::new(self), Box::new(rhs))
    }
}

impl Rem for Expr {
    type Output = Self;

    fn rem(self, rhs: Self) -> Self::Output {
        Self::Rem(Box::new(self), Box::new(rhs))
    }
}

impl Neg for Expr {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::Neg(Box::new(self))
    }
}

impl From<isize> for Expr {
    fn from(i: isize) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Expr {
    fn from(i: i32) -> Self {
        Self::Int(i as isize)
    }
}

impl From<usize> for Expr {
    fn from(i: usize) -> Self {
        Self::Int(i as isize)
    }
}

/// The abstract value of an operand or result: element type plus shape,
/// with no backing data.
#[derive(Debug, Clone, PartialEq)]
pub struct AbstractValue {
    pub dtype: DType,
    pub shape: Shape,
}

impl AbstractValue {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        AbstractValue { dtype, shape }
    }

    /// Abstract value with concrete sizes.
    pub fn concrete(dtype: DType, dims: &[isize]) -> Self {
        AbstractValue {
            dtype,
            shape: shape_of(dims),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}
