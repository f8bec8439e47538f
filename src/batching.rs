//! Vectorization rule.
//!
//! A convolution under `vmap` never loops: the mapped axis is folded into an
//! existing role axis, one larger convolution runs, and the result axis is
//! split back out. Which role absorbs the mapped axis depends on which
//! operands carry it and on the group configuration.

use log::debug;

use crate::descriptor::ConvDescriptor;
use crate::error::{ConvError, Result};
use crate::trace::{Trace, TrackedAxis, reshape_axis_into, reshape_axis_out_of};

/// Rewrites a convolution whose operands carry an extra mapped axis.
///
/// `lhs_bdim` / `rhs_bdim` give the position of the mapped axis in each
/// operand, `None` for an unmapped operand. Returns the result value and the
/// position of the mapped axis in it.
pub fn batch_rule<T: Trace>(
    tr: &mut T,
    lhs: &T::Value,
    rhs: &T::Value,
    lhs_bdim: Option<usize>,
    rhs_bdim: Option<usize>,
    desc: &ConvDescriptor,
) -> Result<(T::Value, usize)> {
    let dn = &desc.dimension_numbers;
    debug!(
        "conv batch rule: lhs_bdim={lhs_bdim:?} rhs_bdim={rhs_bdim:?} \
         fgc={} bgc={}",
        desc.feature_group_count, desc.batch_group_count
    );
    match (lhs_bdim, rhs_bdim) {
        (Some(lhs_bdim), Some(rhs_bdim)) => {
            let b = tr.shape(lhs)[lhs_bdim];
            if b != tr.shape(rhs)[rhs_bdim] {
                return Err(ConvError::ShapeMismatch(format!(
                    "mapped axis sizes disagree: {b} in the input, {} in the kernel",
                    tr.shape(rhs)[rhs_bdim],
                )));
            }
            // Folding the mapped axis into both operands turns the map into
            // groups; which kind of group depends on the existing ones.
            let mut inner = desc.clone();
            let new_lhs = if desc.batch_group_count > 1 {
                inner.batch_group_count *= b as usize;
                reshape_axis_into(tr, lhs_bdim, dn.lhs_batch(), lhs)
            } else {
                inner.feature_group_count *= b as usize;
                reshape_axis_into(tr, lhs_bdim, dn.lhs_feature(), lhs)
            };
            let new_rhs = reshape_axis_into(tr, rhs_bdim, dn.rhs_out_feature(), rhs);
            let out = tr.conv(&new_lhs, &new_rhs, &inner)?;
            let out = reshape_axis_out_of(tr, dn.out_feature(), b, &out)?;
            Ok((out, dn.out_feature()))
        }

        (Some(lhs_bdim), None) => {
            let b = tr.shape(lhs)[lhs_bdim];
            if desc.batch_group_count == 1 {
                let new_lhs = reshape_axis_into(tr, lhs_bdim, dn.lhs_batch(), lhs);
                let out = tr.conv(&new_lhs, rhs, desc)?;
                let out = reshape_axis_out_of(tr, dn.out_batch(), b, &out)?;
                Ok((out, dn.out_batch()))
            } else {
                // The batch axis is already group-major. Split the groups
                // out, tuck the mapped axis under them, and merge back so
                // the layout stays (group, mapped, batch).
                let split_at = TrackedAxis(dn.lhs_batch())
                    .after_insertion(lhs_bdim)
                    .index();
                let new_lhs = reshape_axis_out_of(
                    tr,
                    split_at,
                    desc.batch_group_count as isize,
                    lhs,
                )?;
                let bdim_now = TrackedAxis(lhs_bdim).after_split(split_at).index();
                let new_lhs =
                    reshape_axis_into(tr, bdim_now, dn.lhs_batch() + 1, &new_lhs);
                let new_lhs =
                    reshape_axis_into(tr, dn.lhs_batch(), dn.lhs_batch(), &new_lhs);
                let out = tr.conv(&new_lhs, rhs, desc)?;
                let out = reshape_axis_out_of(tr, dn.out_batch(), b, &out)?;
                Ok((out, dn.out_batch()))
            }
        }

        (None, Some(rhs_bdim)) => {
            let b = tr.shape(rhs)[rhs_bdim];
            if desc.feature_group_count == 1 && desc.batch_group_count == 1 {
                let new_rhs = reshape_axis_into(tr, rhs_bdim, dn.rhs_out_feature(), rhs);
                let out = tr.conv(lhs, &new_rhs, desc)?;
                let out = reshape_axis_out_of(tr, dn.out_feature(), b, &out)?;
                Ok((out, dn.out_feature()))
            } else {
                // Groups must stay outermost in the kernel's output-feature
                // axis, so factor them out, fold the mapped axis into what
                // remains, and put the groups back. The output needs the
                // mirror image: its feature axis comes out as
                // (group, mapped, feature) and must end up with the mapped
                // axis on its own.
                let group_count = if desc.feature_group_count > 1 {
                    desc.feature_group_count
                } else {
                    desc.batch_group_count
                };
                let split_at = TrackedAxis(dn.rhs_out_feature())
                    .after_insertion(rhs_bdim)
                    .index();
                let new_rhs =
                    reshape_axis_out_of(tr, split_at, group_count as isize, rhs)?;
                let bdim_now = TrackedAxis(rhs_bdim).after_split(split_at).index();
                let new_rhs =
                    reshape_axis_into(tr, bdim_now, dn.rhs_out_feature() + 1, &new_rhs);
                let new_rhs = reshape_axis_into(
                    tr,
                    dn.rhs_out_feature(),
                    dn.rhs_out_feature(),
                    &new_rhs,
                );
                let out = tr.conv(lhs, &new_rhs, desc)?;
                let out =
                    reshape_axis_out_of(tr, dn.out_feature(), group_count as isize, &out)?;
                let out = reshape_axis_out_of(tr, dn.out_feature() + 1, b, &out)?;
                let out =
                    reshape_axis_into(tr, dn.out_feature(), dn.out_feature() + 1, &out);
                Ok((out, dn.out_feature()))
            }
        }

        (None, None) => Err(ConvError::ConfigurationError(
            "batch rule invoked with no mapped operand".to_string(),
        )),
    }
}
