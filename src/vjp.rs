//! Differentiation rules.
//!
//! The convolution is bilinear, so each cotangent is itself a convolution:
//! the input gradient is a fractionally-strided convolution of the cotangent
//! against the spatially-reversed kernel, and the kernel gradient is a
//! convolution of the input against the cotangent with the batch and feature
//! roles exchanged.

use log::debug;

use crate::algebra::{vjp_lhs_padding, vjp_rhs_padding};
use crate::descriptor::ConvDescriptor;
use crate::dnums::ConvDimensionNumbers;
use crate::error::Result;
use crate::trace::{Trace, reshape_axis_into, reshape_axis_out_of};

/// Swaps the two feature-like entries of a spec, leaving spatial order alone.
fn spec_transpose(spec: &[usize]) -> Vec<usize> {
    let mut out = spec.to_vec();
    out.swap(0, 1);
    out
}

fn take(shape: &[isize], axes: &[usize]) -> Vec<isize> {
    axes.iter().map(|&i| shape[i]).collect()
}

/// Gradient with respect to the input.
///
/// `g` is the output cotangent and `lhs_shape` the shape of the original
/// input. The result always has exactly that shape.
pub fn vjp_lhs<T: Trace>(
    tr: &mut T,
    g: &T::Value,
    rhs: &T::Value,
    desc: &ConvDescriptor,
    lhs_shape: &[isize],
) -> Result<T::Value> {
    let dn = &desc.dimension_numbers;
    let rhs_shape = tr.shape(rhs);
    let g_shape = tr.shape(g);
    debug!(
        "conv vjp_lhs: cotangent {g_shape:?}, kernel {rhs_shape:?} -> {lhs_shape:?}"
    );

    let fgc = desc.feature_group_count;
    let bgc = desc.batch_group_count;

    // Grouping moves the group axis from the kernel's output-feature side to
    // its input-feature side, because the transposed convolution reads the
    // kernel the other way around.
    let mut kernel = rhs.clone();
    let mut trans_fgc = fgc;
    if fgc > 1 {
        kernel = reshape_axis_out_of(tr, dn.rhs_out_feature(), fgc as isize, &kernel)?;
        kernel = reshape_axis_into(tr, dn.rhs_out_feature(), dn.rhs_in_feature(), &kernel);
    } else if bgc > 1 {
        kernel = reshape_axis_out_of(tr, dn.rhs_out_feature(), bgc as isize, &kernel)?;
        kernel = reshape_axis_into(tr, dn.rhs_out_feature(), dn.rhs_in_feature(), &kernel);
        trans_fgc = bgc;
    }

    let padding = vjp_lhs_padding(
        &take(lhs_shape, dn.lhs_spatial()),
        &take(&rhs_shape, dn.rhs_spatial()),
        &desc.window_strides,
        &take(&g_shape, dn.out_spatial()),
        &desc.padding,
        &desc.lhs_dilation,
        &desc.rhs_dilation,
    );
    let trans_dn = ConvDimensionNumbers {
        lhs_spec: dn.out_spec.clone(),
        rhs_spec: spec_transpose(&dn.rhs_spec),
        out_spec: dn.lhs_spec.clone(),
    };
    let trans_desc = ConvDescriptor {
        window_strides: desc.lhs_dilation.clone(),
        padding,
        lhs_dilation: desc.window_strides.clone(),
        rhs_dilation: desc.rhs_dilation.clone(),
        dimension_numbers: trans_dn,
        feature_group_count: trans_fgc,
        batch_group_count: 1,
        precision: desc.precision,
        preferred_element_type: desc.preferred_element_type,
    };

    let reversed = tr.rev(&kernel, dn.rhs_spatial());
    let mut out = tr.conv(g, &reversed, &trans_desc)?;
    if bgc > 1 {
        // The grouped batch came out interleaved into the feature axis.
        out = reshape_axis_out_of(tr, dn.lhs_feature(), bgc as isize, &out)?;
        out = reshape_axis_into(tr, dn.lhs_feature(), dn.lhs_batch(), &out);
    }
    debug_assert_eq!(tr.shape(&out), lhs_shape);
    Ok(out)
}

/// Gradient with respect to the kernel.
///
/// Returns `None` when the cotangent has no elements; a degenerate
/// convolution with a zero-size kernel spatial axis would otherwise be
/// formed. `rhs_shape` is the shape of the original kernel.
pub fn vjp_rhs<T: Trace>(
    tr: &mut T,
    g: &T::Value,
    lhs: &T::Value,
    desc: &ConvDescriptor,
    rhs_shape: &[isize],
) -> Result<Option<T::Value>> {
    let g_shape = tr.shape(g);
    if g_shape.iter().product::<isize>() == 0 {
        return Ok(None);
    }
    let dn = &desc.dimension_numbers;
    let lhs_shape = tr.shape(lhs);
    debug!(
        "conv vjp_rhs: cotangent {g_shape:?}, input {lhs_shape:?} -> {rhs_shape:?}"
    );

    // The group kinds trade places: summing a feature-grouped convolution's
    // kernel gradient partitions the batch, and vice versa.
    let (trans_fgc, trans_bgc) = if desc.batch_group_count > 1 {
        (desc.batch_group_count, 1)
    } else if desc.feature_group_count > 1 {
        (1, desc.feature_group_count)
    } else {
        (1, 1)
    };

    let padding = vjp_rhs_padding(
        &take(&lhs_shape, dn.lhs_spatial()),
        &take(rhs_shape, dn.rhs_spatial()),
        &desc.window_strides,
        &take(&g_shape, dn.out_spatial()),
        &desc.padding,
        &desc.lhs_dilation,
        &desc.rhs_dilation,
    );
    let trans_dn = ConvDimensionNumbers {
        lhs_spec: spec_transpose(&dn.lhs_spec),
        rhs_spec: spec_transpose(&dn.out_spec),
        out_spec: spec_transpose(&dn.rhs_spec),
    };
    let trans_desc = ConvDescriptor {
        window_strides: desc.rhs_dilation.clone(),
        padding,
        lhs_dilation: desc.lhs_dilation.clone(),
        rhs_dilation: desc.window_strides.clone(),
        dimension_numbers: trans_dn,
        feature_group_count: trans_fgc,
        batch_group_count: trans_bgc,
        precision: desc.precision,
        preferred_element_type: desc.preferred_element_type,
    };

    let out = tr.conv(lhs, g, &trans_desc)?;
    debug_assert_eq!(tr.shape(&out), rhs_shape);
    Ok(Some(out))
}
