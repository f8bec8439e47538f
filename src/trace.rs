//! The host-system seam.
//!
//! Rewrite rules never build arrays themselves; they emit operations through a
//! [`Trace`], and the host decides whether those operations are evaluated
//! eagerly, staged into a graph, or compiled. The rules only need shapes,
//! types, and the four primitive array movements below.

use crate::descriptor::ConvDescriptor;
use crate::dtype::DType;
use crate::error::{ConvError, Result};

/// Operations the differentiation and batching rules are allowed to emit.
///
/// `Value` is whatever the host uses to name an intermediate: a tensor, a
/// graph node id, an abstract value. Shapes observed through a trace are
/// always concrete; symbolic sizes exist only on the inference path.
pub trait Trace {
    type Value: Clone;

    fn shape(&self, value: &Self::Value) -> Vec<isize>;
    fn dtype(&self, value: &Self::Value) -> DType;

    /// Emits a general dilated convolution of `lhs` against `rhs`.
    fn conv(
        &mut self,
        lhs: &Self::Value,
        rhs: &Self::Value,
        desc: &ConvDescriptor,
    ) -> Result<Self::Value>;

    /// Reinterprets `value` with a new shape of the same element count.
    fn reshape(&mut self, value: &Self::Value, shape: &[isize]) -> Self::Value;

    /// Permutes axes: output axis `i` is input axis `perm[i]`.
    fn transpose(&mut self, value: &Self::Value, perm: &[usize]) -> Self::Value;

    /// Reverses the listed axes.
    fn rev(&mut self, value: &Self::Value, axes: &[usize]) -> Self::Value;
}

/// Merges axis `src` into axis `dst`, with `src` becoming the major part of
/// the merged axis. `dst` indexes the shape after `src` is removed.
pub fn reshape_axis_into<T: Trace>(
    tr: &mut T,
    src: usize,
    dst: usize,
    x: &T::Value,
) -> T::Value {
    let shape = tr.shape(x);
    let mut perm: Vec<usize> = (0..shape.len()).filter(|&i| i != src).collect();
    perm.insert(dst, src);
    let mut new_shape: Vec<isize> = shape
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != src)
        .map(|(_, &s)| s)
        .collect();
    new_shape[dst] *= shape[src];
    let moved = tr.transpose(x, &perm);
    tr.reshape(&moved, &new_shape)
}

/// Splits axis `src` into `(size1, rest)` with `size1` outermost.
pub fn reshape_axis_out_of<T: Trace>(
    tr: &mut T,
    src: usize,
    size1: isize,
    x: &T::Value,
) -> Result<T::Value> {
    let mut shape = tr.shape(x);
    let size = shape[src];
    if size1 <= 0 || size % size1 != 0 {
        return Err(ConvError::ShapeMismatch(format!(
            "cannot split axis of size {size} into a major factor of {size1}",
        )));
    }
    shape.splice(src..src + 1, [size1, size / size1]);
    Ok(tr.reshape(x, &shape))
}

/// An axis position that survives axis insertions and splits.
///
/// The rewrite rules talk about canonical axis roles (batch, feature) while
/// operating on arrays that have picked up an extra batching axis or had a
/// group axis split out. A `TrackedAxis` carries the physical index through
/// those edits instead of scattering ad-hoc offset arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedAxis(pub usize);

impl TrackedAxis {
    pub fn index(self) -> usize {
        self.0
    }

    /// Position after a new axis is inserted at `at`. Insertion at the
    /// tracked position pushes it right.
    pub fn after_insertion(self, at: usize) -> Self {
        if at <= self.0 {
            TrackedAxis(self.0 + 1)
        } else {
            self
        }
    }

    /// Position after the axis at `at` is split in two; the tracked axis
    /// stays on the major half if it is the one split.
    pub fn after_split(self, at: usize) -> Self {
        if at < self.0 {
            TrackedAxis(self.0 + 1)
        } else {
            self
        }
    }
}
