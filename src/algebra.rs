//! Shape and padding algebra.
//!
//! Pure, stateless functions shared by the inference, differentiation, and
//! transposed-convolution paths. [`conv_shape_tuple`] is the single
//! authoritative output-size formula; every other shape computation in the
//! crate stays consistent with it.

use std::str::FromStr;

use crate::error::{ConvError, Result};
use crate::shape::Expr;

/// Symbolic padding mode. Resolved to explicit pairs by
/// [`resolve_padding`] before any descriptor is built; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingMode {
    /// Output spatial size `ceil(input / stride)`.
    Same,
    /// No padding; the window must fit entirely inside the input.
    Valid,
}

impl FromStr for PaddingMode {
    type Err = ConvError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SAME" => Ok(PaddingMode::Same),
            "VALID" => Ok(PaddingMode::Valid),
            other => Err(ConvError::ConfigurationError(format!(
                "padding mode must be \"SAME\" or \"VALID\", got {other:?}",
            ))),
        }
    }
}

/// Size of one axis after dilation: `(size - 1) * dilation + 1` for positive
/// sizes, 0 for an empty axis.
pub fn dilate_dim(size: isize, dilation: isize) -> isize {
    if size > 0 { (size - 1) * dilation + 1 } else { 0 }
}

/// Per-axis dilation of a (possibly symbolic) spatial shape.
///
/// `max(0, (size - 1) * dilation + 1)` agrees with [`dilate_dim`] on every
/// non-negative size and stays well-formed for symbolic sizes. Dilation 1 is
/// the identity, so that axis passes through without the clamp and a symbolic
/// size stays a plain variable.
pub fn dilate_shape(shape: &[Expr], dilation: &[usize]) -> Vec<Expr> {
    shape
        .iter()
        .zip(dilation)
        .map(|(s, &d)| {
            if d == 1 {
                return s.clone().simplify();
            }
            ((s.clone() - Expr::Int(1)) * Expr::from(d) + Expr::Int(1))
                .max(Expr::zero())
                .simplify()
        })
        .collect()
}

fn dilate_all(spatial: &[isize], dilation: &[usize]) -> Vec<isize> {
    spatial
        .iter()
        .zip(dilation)
        .map(|(&s, &d)| dilate_dim(s, d as isize))
        .collect()
}

/// Resolves a symbolic padding mode to explicit `(low, high)` pairs.
///
/// `window_spatial` is the effective (already dilated) kernel size. For
/// `Same`, the total padding per axis is whatever makes the output size
/// `ceil(input / stride)`, with the odd unit going to the high side.
pub fn resolve_padding(
    in_spatial: &[isize],
    window_spatial: &[isize],
    strides: &[usize],
    mode: PaddingMode,
) -> Vec<(isize, isize)> {
    match mode {
        PaddingMode::Valid => vec![(0, 0); in_spatial.len()],
        PaddingMode::Same => in_spatial
            .iter()
            .zip(window_spatial)
            .zip(strides)
            .map(|((&i, &k), &s)| {
                let s = s as isize;
                let out = (i + s - 1).div_euclid(s);
                let total = ((out - 1) * s + k - i).max(0);
                let lo = total / 2;
                (lo, total - lo)
            })
            .collect(),
    }
}

/// Output shape of a convolution with operands in canonical order
/// `(batch, feature, spatial...)`, already dilated.
///
/// Spatial axis `i` has size `floor((padded_i - window_i) / stride_i) + 1`,
/// clamped to zero; the batch axis shrinks by `batch_group_count`; the
/// feature axis is the kernel's output-feature size.
pub fn conv_shape_tuple(
    lhs: &[Expr],
    rhs: &[Expr],
    strides: &[usize],
    padding: &[(isize, isize)],
    batch_group_count: usize,
) -> Result<Vec<Expr>> {
    if padding.len() != lhs.len() - 2 {
        return Err(ConvError::ShapeMismatch(format!(
            "wrong number of explicit pads for convolution: expected {}, got {}",
            lhs.len() - 2,
            padding.len(),
        )));
    }
    let mut out = Vec::with_capacity(lhs.len());
    out.push((lhs[0].clone() / Expr::from(batch_group_count)).simplify());
    out.push(rhs[0].clone());
    for (i, (&(lo, hi), &stride)) in padding.iter().zip(strides).enumerate() {
        let padded = lhs[2 + i].clone() + Expr::Int(lo + hi);
        let space = (padded - rhs[2 + i].clone()) / Expr::from(stride) + Expr::Int(1);
        out.push(space.max(Expr::zero()).simplify());
    }
    Ok(out)
}

/// Per-axis padding that makes a fractionally-strided convolution the exact
/// shape-inverse of a forward convolution with the given kernel size, stride,
/// and symbolic padding mode.
pub fn transpose_conv_padding(kernel: isize, stride: isize, mode: PaddingMode) -> (isize, isize) {
    let (pad_len, pad_a) = match mode {
        PaddingMode::Same => {
            let pad_len = kernel + stride - 2;
            let pad_a = if stride > kernel - 1 {
                kernel - 1
            } else {
                // ceil(pad_len / 2)
                (pad_len + 1).div_euclid(2)
            };
            (pad_len, pad_a)
        }
        PaddingMode::Valid => {
            let pad_len = kernel + stride - 2 + (kernel - stride).max(0);
            (pad_len, kernel - 1)
        }
    };
    (pad_a, pad_len - pad_a)
}

/// Canonical-order output shape of a fractionally-strided convolution given
/// forward-style parameters and explicit padding pairs.
pub fn transpose_shape_tuple(
    lhs: &[isize],
    rhs: &[isize],
    strides: &[usize],
    padding: &[(isize, isize)],
) -> Vec<isize> {
    let mut out = vec![lhs[0], rhs[0]];
    for (i, (&(lo, hi), &s)) in padding.iter().zip(strides).enumerate() {
        out.push((lhs[2 + i] - 1) * s as isize - rhs[2 + i] + 2 + lo + hi);
    }
    out
}

/// Padding of the convolution that computes the gradient with respect to the
/// input. Entries may be negative, which crops instead of padding.
pub fn vjp_lhs_padding(
    in_spatial: &[isize],
    window_spatial: &[isize],
    window_strides: &[usize],
    out_spatial: &[isize],
    padding: &[(isize, isize)],
    lhs_dilation: &[usize],
    rhs_dilation: &[usize],
) -> Vec<(isize, isize)> {
    let lhs_dilated = dilate_all(in_spatial, lhs_dilation);
    let rhs_dilated = dilate_all(window_spatial, rhs_dilation);
    let out_dilated = dilate_all(out_spatial, window_strides);
    padding
        .iter()
        .enumerate()
        .map(|(i, &(lo, _))| {
            let pad_before = rhs_dilated[i] - lo - 1;
            let pad_after = lhs_dilated[i] + rhs_dilated[i] - 1 - out_dilated[i] - pad_before;
            (pad_before, pad_after)
        })
        .collect()
}

/// Padding of the convolution that computes the gradient with respect to the
/// kernel. The low side is the original low padding; the high side absorbs
/// the difference between the dilated output and input extents.
pub fn vjp_rhs_padding(
    in_spatial: &[isize],
    window_spatial: &[isize],
    window_strides: &[usize],
    out_spatial: &[isize],
    padding: &[(isize, isize)],
    lhs_dilation: &[usize],
    rhs_dilation: &[usize],
) -> Vec<(isize, isize)> {
    if in_spatial.is_empty() {
        // 0-D convolution
        return vec![];
    }
    let lhs_dilated = dilate_all(in_spatial, lhs_dilation);
    let rhs_dilated = dilate_all(window_spatial, rhs_dilation);
    let out_dilated = dilate_all(out_spatial, window_strides);
    padding
        .iter()
        .enumerate()
        .map(|(i, &(lo, _))| {
            let hi = (out_dilated[i] - lhs_dilated[i]) + (rhs_dilated[i] - lo - 1);
            (lo, hi)
        })
        .collect()
}
