//! User-facing convolution entry points.
//!
//! These functions resolve the convenience surface (symbolic padding modes,
//! label-string layouts, defaulted dilations) down to a [`ConvDescriptor`],
//! validate it through the inference rule, and emit a single convolution on
//! the caller's trace.

use log::debug;
use typed_builder::TypedBuilder;

use crate::algebra::{
    PaddingMode, dilate_dim, resolve_padding, transpose_conv_padding, transpose_shape_tuple,
};
use crate::descriptor::{ConvDescriptor, Precision};
use crate::dnums::{ConvDimensionNumbers, DimensionNumbers, conv_dimension_numbers, permute};
use crate::dtype::DType;
use crate::error::{ConvError, Result};
use crate::infer::infer;
use crate::shape::AbstractValue;
use crate::trace::Trace;

/// Padding argument of the call surface: a symbolic mode or explicit
/// `(low, high)` pairs per spatial axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Padding {
    Same,
    Valid,
    Explicit(Vec<(isize, isize)>),
}

/// Parameters of [`general_convolution`]. Only the strides and padding are
/// required; everything else defaults to the plain dense convolution.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ConvParams {
    pub window_strides: Vec<usize>,
    pub padding: Padding,
    #[builder(default)]
    pub lhs_dilation: Option<Vec<usize>>,
    #[builder(default)]
    pub rhs_dilation: Option<Vec<usize>>,
    #[builder(default)]
    pub dimension_numbers: Option<DimensionNumbers>,
    #[builder(default = 1)]
    pub feature_group_count: usize,
    #[builder(default = 1)]
    pub batch_group_count: usize,
    #[builder(default)]
    pub precision: Precision,
    #[builder(default)]
    pub preferred_element_type: Option<DType>,
}

fn take(shape: &[isize], axes: &[usize]) -> Vec<isize> {
    axes.iter().map(|&i| shape[i]).collect()
}

fn resolve(
    params: &ConvParams,
    lhs_shape: &[isize],
    rhs_shape: &[isize],
) -> Result<ConvDescriptor> {
    let rank = lhs_shape.len();
    if rank < 2 || rhs_shape.len() < 2 {
        return Err(ConvError::ShapeMismatch(format!(
            "convolution operands must have at least rank 2, got {rank} and {}",
            rhs_shape.len(),
        )));
    }
    let dn = conv_dimension_numbers(rank, rhs_shape.len(), params.dimension_numbers.as_ref())?;
    let spatial_rank = dn.spatial_rank();
    let lhs_dilation = params
        .lhs_dilation
        .clone()
        .unwrap_or_else(|| vec![1; spatial_rank]);
    let rhs_dilation = params
        .rhs_dilation
        .clone()
        .unwrap_or_else(|| vec![1; spatial_rank]);

    let padding = match &params.padding {
        Padding::Explicit(pairs) => pairs.clone(),
        mode => {
            if lhs_dilation.iter().any(|&d| d != 1) {
                return Err(ConvError::ConfigurationError(
                    "symbolic padding modes are ambiguous for input-dilated \
                     convolutions; pass explicit padding pairs or use \
                     transposed_convolution"
                        .to_string(),
                ));
            }
            let in_spatial = take(lhs_shape, dn.lhs_spatial());
            let effective_window: Vec<isize> = take(rhs_shape, dn.rhs_spatial())
                .iter()
                .zip(&rhs_dilation)
                .map(|(&k, &r)| dilate_dim(k, r as isize))
                .collect();
            let mode = match mode {
                Padding::Same => PaddingMode::Same,
                _ => PaddingMode::Valid,
            };
            resolve_padding(&in_spatial, &effective_window, &params.window_strides, mode)
        }
    };

    Ok(ConvDescriptor {
        window_strides: params.window_strides.clone(),
        padding,
        lhs_dilation,
        rhs_dilation,
        dimension_numbers: dn,
        feature_group_count: params.feature_group_count,
        batch_group_count: params.batch_group_count,
        precision: params.precision,
        preferred_element_type: params.preferred_element_type,
    })
}

/// General N-dimensional convolution with strides, padding, input and kernel
/// dilation, arbitrary layouts, and grouping.
pub fn general_convolution<T: Trace>(
    tr: &mut T,
    lhs: &T::Value,
    rhs: &T::Value,
    params: &ConvParams,
) -> Result<T::Value> {
    let lhs_shape = tr.shape(lhs);
    let rhs_shape = tr.shape(rhs);
    let desc = resolve(params, &lhs_shape, &rhs_shape)?;
    // Full validation happens here, before anything reaches the trace.
    let out = infer(
        &AbstractValue::concrete(tr.dtype(lhs), &lhs_shape),
        &AbstractValue::concrete(tr.dtype(rhs), &rhs_shape),
        &desc,
    )?;
    debug!(
        "general_convolution: {lhs_shape:?} * {rhs_shape:?} -> {:?}",
        out.shape
    );
    tr.conv(lhs, rhs, &desc)
}

/// Dense convolution over the identity layout (batch, feature, spatial...).
pub fn simple_convolution<T: Trace>(
    tr: &mut T,
    lhs: &T::Value,
    rhs: &T::Value,
    window_strides: &[usize],
    padding: Padding,
) -> Result<T::Value> {
    let params = ConvParams::builder()
        .window_strides(window_strides.to_vec())
        .padding(padding)
        .build();
    general_convolution(tr, lhs, rhs, &params)
}

/// Parameters of [`transposed_convolution`]. `strides` are the forward
/// strides being undone, not the strides of the emitted convolution.
#[derive(Debug, Clone, TypedBuilder)]
pub struct TransposeConvParams {
    pub strides: Vec<usize>,
    pub padding: Padding,
    #[builder(default)]
    pub rhs_dilation: Option<Vec<usize>>,
    #[builder(default)]
    pub dimension_numbers: Option<DimensionNumbers>,
    /// Flip spatial axes and swap the kernel's feature axes, making the
    /// result the exact gradient of the matching forward convolution.
    #[builder(default = false)]
    pub transpose_kernel: bool,
    #[builder(default)]
    pub precision: Precision,
}

/// Feature-last default layouts for [`transposed_convolution`]; the kernel
/// keeps its input-feature axis before its output-feature axis so that an
/// untransposed kernel composes with gradients.
fn transpose_default_layout(rank: usize) -> Result<DimensionNumbers> {
    let (lhs, rhs, out) = match rank {
        2 => ("NC", "IO", "NC"),
        3 => ("NHC", "HIO", "NHC"),
        4 => ("NHWC", "HWIO", "NHWC"),
        5 => ("NHWDC", "HWDIO", "NHWDC"),
        _ => {
            return Err(ConvError::ConfigurationError(format!(
                "no default transposed-convolution layout for rank {rank}; \
                 pass dimension_numbers explicitly",
            )));
        }
    };
    Ok(DimensionNumbers::labels(lhs, rhs, out))
}

/// Reverses the kernel's spatial axes and swaps its feature axes.
fn flip_kernel<T: Trace>(tr: &mut T, rhs: &T::Value, dn: &ConvDimensionNumbers) -> T::Value {
    let flipped = tr.rev(rhs, dn.rhs_spatial());
    let mut perm: Vec<usize> = (0..dn.rank()).collect();
    perm.swap(dn.rhs_out_feature(), dn.rhs_in_feature());
    tr.transpose(&flipped, &perm)
}

/// Fractionally-strided convolution: the shape-inverse of a forward
/// convolution with the same strides and padding mode.
///
/// With `transpose_kernel` set it is also the value-level transpose, i.e.
/// the forward convolution's input gradient.
pub fn transposed_convolution<T: Trace>(
    tr: &mut T,
    lhs: &T::Value,
    rhs: &T::Value,
    params: &TransposeConvParams,
) -> Result<T::Value> {
    let lhs_shape = tr.shape(lhs);
    let rhs_shape = tr.shape(rhs);
    let rank = lhs_shape.len();
    let dims = match &params.dimension_numbers {
        Some(dims) => dims.clone(),
        None => transpose_default_layout(rank)?,
    };
    let dn = conv_dimension_numbers(rank, rhs_shape.len(), Some(&dims))?;
    let spatial_rank = dn.spatial_rank();
    if params.strides.len() != spatial_rank {
        return Err(ConvError::ShapeMismatch(format!(
            "transposed convolution needs one stride per spatial dimension, \
             got {} strides for {spatial_rank} spatial dimensions",
            params.strides.len(),
        )));
    }
    let rhs_dilation = params
        .rhs_dilation
        .clone()
        .unwrap_or_else(|| vec![1; spatial_rank]);

    let padding = match &params.padding {
        Padding::Explicit(pairs) => pairs.clone(),
        mode => {
            let mode = match mode {
                Padding::Same => PaddingMode::Same,
                _ => PaddingMode::Valid,
            };
            take(&rhs_shape, dn.rhs_spatial())
                .iter()
                .zip(&rhs_dilation)
                .zip(&params.strides)
                .map(|((&k, &r), &s)| {
                    transpose_conv_padding(dilate_dim(k, r as isize), s as isize, mode)
                })
                .collect()
        }
    };

    let kernel = if params.transpose_kernel {
        flip_kernel(tr, rhs, &dn)
    } else {
        rhs.clone()
    };

    // Closed-form output shape for the emitted fractionally-strided conv,
    // in canonical order with the kernel dilation applied.
    let lhs_canon = permute(&lhs_shape, &dn.lhs_spec);
    let mut rhs_canon = permute(&tr.shape(&kernel), &dn.rhs_spec);
    for (i, &r) in rhs_dilation.iter().enumerate() {
        rhs_canon[2 + i] = dilate_dim(rhs_canon[2 + i], r as isize);
    }
    let expected: Vec<isize> =
        transpose_shape_tuple(&lhs_canon, &rhs_canon, &params.strides, &padding)
            .iter()
            .map(|&d| d.max(0))
            .collect();
    let out_spec = dn.out_spec.clone();

    let conv_params = ConvParams::builder()
        .window_strides(vec![1; spatial_rank])
        .padding(Padding::Explicit(padding))
        .lhs_dilation(Some(params.strides.clone()))
        .rhs_dilation(Some(rhs_dilation))
        .dimension_numbers(Some(DimensionNumbers::Canonical(dn)))
        .precision(params.precision)
        .build();
    let out = general_convolution(tr, lhs, &kernel, &conv_params)?;
    debug_assert_eq!(permute(&tr.shape(&out), &out_spec), expected);
    Ok(out)
}
