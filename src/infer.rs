//! Shape and type inference for the convolution primitive.
//!
//! Called by the host system before a node is bound; nothing executes until
//! this rule has accepted the operand pair.

use log::debug;

use crate::algebra::{conv_shape_tuple, dilate_shape};
use crate::descriptor::ConvDescriptor;
use crate::dnums::{permute, unpermute};
use crate::dtype::{DType, validate_preferred_element_type};
use crate::error::{ConvError, Result};
use crate::shape::{AbstractValue, Expr, dim_eq};

/// Whether `dim` is divisible by `by`, as far as can be decided. A symbolic
/// residue that does not fold to a constant is accepted.
fn divisible(dim: &Expr, by: usize) -> bool {
    match (dim.clone() % Expr::from(by)).simplify() {
        Expr::Int(r) => r == 0,
        _ => true,
    }
}

/// Validates operand compatibility and computes the result abstract value.
///
/// The result shape comes from the authoritative output-size formula
/// ([`conv_shape_tuple`]) applied to the dilated canonical-order operand
/// shapes, then scattered back into the output layout. The result type is
/// the natural promotion of the operand types unless a validated
/// `preferred_element_type` overrides it.
pub fn infer(
    lhs: &AbstractValue,
    rhs: &AbstractValue,
    desc: &ConvDescriptor,
) -> Result<AbstractValue> {
    let dn = &desc.dimension_numbers;
    if lhs.rank() != rhs.rank() || lhs.rank() != dn.rank() {
        return Err(ConvError::ShapeMismatch(format!(
            "convolution operands must have the same rank, got {:?} and {:?} \
             for dimension numbers of rank {}",
            lhs.shape,
            rhs.shape,
            dn.rank(),
        )));
    }

    let fgc = desc.feature_group_count;
    let bgc = desc.batch_group_count;
    if fgc == 0 || bgc == 0 {
        return Err(ConvError::ConfigurationError(format!(
            "group counts must be positive, got feature_group_count={fgc} and \
             batch_group_count={bgc}",
        )));
    }
    if fgc > 1 && bgc > 1 {
        return Err(ConvError::ConfigurationError(format!(
            "at most one of feature_group_count and batch_group_count may be \
             greater than 1, got {fgc} and {bgc}",
        )));
    }

    let lhs_feature = &lhs.shape[dn.lhs_feature()];
    if !divisible(lhs_feature, fgc) {
        return Err(ConvError::ShapeMismatch(format!(
            "feature_group_count {fgc} must divide the lhs feature dimension \
             size {lhs_feature}",
        )));
    }
    let quotient = (lhs_feature.clone() / Expr::from(fgc)).simplify();
    let rhs_in_feature = &rhs.shape[dn.rhs_in_feature()];
    if !dim_eq(&quotient, rhs_in_feature) {
        return Err(ConvError::ShapeMismatch(format!(
            "lhs feature dimension size {lhs_feature} divided by \
             feature_group_count {fgc} must equal the rhs input feature \
             dimension size {rhs_in_feature}",
        )));
    }

    let rhs_out_feature = &rhs.shape[dn.rhs_out_feature()];
    if !divisible(rhs_out_feature, fgc) {
        return Err(ConvError::ShapeMismatch(format!(
            "rhs output feature dimension size {rhs_out_feature} must be a \
             multiple of feature_group_count {fgc}",
        )));
    }
    if !divisible(rhs_out_feature, bgc) {
        return Err(ConvError::ShapeMismatch(format!(
            "rhs output feature dimension size {rhs_out_feature} must be a \
             multiple of batch_group_count {bgc}",
        )));
    }

    let lhs_batch = &lhs.shape[dn.lhs_batch()];
    if !divisible(lhs_batch, bgc) {
        return Err(ConvError::ShapeMismatch(format!(
            "batch_group_count {bgc} must divide the lhs batch dimension \
             size {lhs_batch}",
        )));
    }

    if dn.spatial_rank() != desc.window_strides.len() {
        return Err(ConvError::ShapeMismatch(format!(
            "convolution window and window_strides must agree on the number \
             of spatial dimensions, got {} and {}",
            dn.spatial_rank(),
            desc.window_strides.len(),
        )));
    }
    if desc.lhs_dilation.len() != dn.spatial_rank() || desc.rhs_dilation.len() != dn.spatial_rank()
    {
        return Err(ConvError::ShapeMismatch(format!(
            "dilation factors must cover every spatial dimension, got {} and \
             {} for {} spatial dimensions",
            desc.lhs_dilation.len(),
            desc.rhs_dilation.len(),
            dn.spatial_rank(),
        )));
    }
    if desc.window_strides.iter().any(|&s| s == 0)
        || desc.lhs_dilation.iter().any(|&d| d == 0)
        || desc.rhs_dilation.iter().any(|&d| d == 0)
    {
        return Err(ConvError::ConfigurationError(format!(
            "window strides and dilation factors must be positive, got \
             strides {:?}, lhs_dilation {:?}, rhs_dilation {:?}",
            desc.window_strides, desc.lhs_dilation, desc.rhs_dilation,
        )));
    }

    let lhs_canon = permute(&lhs.shape, &dn.lhs_spec);
    let rhs_canon = permute(&rhs.shape, &dn.rhs_spec);
    let mut lhs_dilated = lhs_canon[..2].to_vec();
    lhs_dilated.extend(dilate_shape(&lhs_canon[2..], &desc.lhs_dilation));
    let mut rhs_dilated = rhs_canon[..2].to_vec();
    rhs_dilated.extend(dilate_shape(&rhs_canon[2..], &desc.rhs_dilation));

    let out_canon = conv_shape_tuple(
        &lhs_dilated,
        &rhs_dilated,
        &desc.window_strides,
        &desc.padding,
        bgc,
    )?;
    let out_shape = unpermute(&out_canon, &dn.out_spec);

    let natural = DType::promote(lhs.dtype, rhs.dtype);
    let dtype = match desc.preferred_element_type {
        Some(preferred) => {
            validate_preferred_element_type(natural, preferred)?;
            preferred
        }
        None => natural,
    };

    debug!(
        "conv infer: {:?} * {:?} -> {:?} ({dtype:?})",
        lhs.shape, rhs.shape, out_shape
    );
    Ok(AbstractValue::new(dtype, out_shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnums::conv_dimension_numbers;
    use crate::descriptor::Precision;
    use crate::shape::shape_of;

    fn descriptor(
        spatial_rank: usize,
        padding: Vec<(isize, isize)>,
        feature_group_count: usize,
        batch_group_count: usize,
    ) -> ConvDescriptor {
        ConvDescriptor {
            window_strides: vec![1; spatial_rank],
            padding,
            lhs_dilation: vec![1; spatial_rank],
            rhs_dilation: vec![1; spatial_rank],
            dimension_numbers: conv_dimension_numbers(spatial_rank + 2, spatial_rank + 2, None)
                .unwrap(),
            feature_group_count,
            batch_group_count,
            precision: Precision::Default,
            preferred_element_type: None,
        }
    }

    #[test]
    fn test_same_padding_preserves_spatial_size() {
        // lhs (1,3,8,8) * rhs (4,3,3,3), SAME padding, stride 1 -> (1,4,8,8)
        let lhs = AbstractValue::concrete(DType::F32, &[1, 3, 8, 8]);
        let rhs = AbstractValue::concrete(DType::F32, &[4, 3, 3, 3]);
        let desc = descriptor(2, vec![(1, 1), (1, 1)], 1, 1);
        let out = infer(&lhs, &rhs, &desc).unwrap();
        assert_eq!(out.shape, shape_of(&[1, 4, 8, 8]));
        assert_eq!(out.dtype, DType::F32);
    }

    #[test]
    fn test_feature_group_divisibility() {
        let lhs = AbstractValue::concrete(DType::F32, &[2, 4, 5, 5]);
        let good = AbstractValue::concrete(DType::F32, &[6, 2, 3, 3]);
        let desc = descriptor(2, vec![(0, 0), (0, 0)], 2, 1);
        assert!(infer(&lhs, &good, &desc).is_ok());

        // Input-feature axis must be 4 / 2 = 2, not 4.
        let bad = AbstractValue::concrete(DType::F32, &[6, 4, 3, 3]);
        assert!(matches!(
            infer(&lhs, &bad, &desc),
            Err(ConvError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_batch_group_shrinks_batch() {
        let lhs = AbstractValue::concrete(DType::F32, &[6, 2, 8]);
        let rhs = AbstractValue::concrete(DType::F32, &[9, 2, 3]);
        let desc = descriptor(1, vec![(0, 0)], 1, 3);
        let out = infer(&lhs, &rhs, &desc).unwrap();
        assert_eq!(out.shape, shape_of(&[2, 9, 6]));
    }

    #[test]
    fn test_both_group_counts_rejected() {
        let lhs = AbstractValue::concrete(DType::F32, &[4, 4, 8]);
        let rhs = AbstractValue::concrete(DType::F32, &[4, 2, 3]);
        let desc = descriptor(1, vec![(0, 0)], 2, 2);
        assert!(matches!(
            infer(&lhs, &rhs, &desc),
            Err(ConvError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_rank_mismatch_rejected() {
        let lhs = AbstractValue::concrete(DType::F32, &[1, 3, 8]);
        let rhs = AbstractValue::concrete(DType::F32, &[4, 3, 3, 3]);
        let desc = descriptor(2, vec![(0, 0), (0, 0)], 1, 1);
        assert!(matches!(
            infer(&lhs, &rhs, &desc),
            Err(ConvError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_zero_stride_rejected() {
        let lhs = AbstractValue::concrete(DType::F32, &[1, 3, 8]);
        let rhs = AbstractValue::concrete(DType::F32, &[4, 3, 3]);
        let mut desc = descriptor(1, vec![(0, 0)], 1, 1);
        desc.window_strides = vec![0];
        assert!(matches!(
            infer(&lhs, &rhs, &desc),
            Err(ConvError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_preferred_element_type_override() {
        let lhs = AbstractValue::concrete(DType::F32, &[1, 3, 8]);
        let rhs = AbstractValue::concrete(DType::F32, &[4, 3, 3]);
        let mut desc = descriptor(1, vec![(0, 0)], 1, 1);
        desc.preferred_element_type = Some(DType::F64);
        let out = infer(&lhs, &rhs, &desc).unwrap();
        assert_eq!(out.dtype, DType::F64);

        desc.preferred_element_type = Some(DType::I32);
        assert!(infer(&lhs, &rhs, &desc).is_err());
    }

    #[test]
    fn test_symbolic_batch_flows_through() {
        use crate::shape::Expr;
        let lhs = AbstractValue::new(
            DType::F32,
            vec![
                Expr::Var("n".to_string()),
                Expr::Int(3),
                Expr::Int(8),
            ],
        );
        let rhs = AbstractValue::concrete(DType::F32, &[4, 3, 3]);
        let desc = descriptor(1, vec![(0, 0)], 1, 1);
        let out = infer(&lhs, &rhs, &desc).unwrap();
        assert_eq!(out.shape[0], Expr::Var("n".to_string()));
        assert_eq!(out.shape[1], Expr::Int(4));
        assert_eq!(out.shape[2], Expr::Int(6));
    }

    #[test]
    fn test_dilated_kernel_shrinks_output() {
        // Effective kernel (3-1)*2 + 1 = 5.
        let lhs = AbstractValue::concrete(DType::F32, &[1, 1, 10]);
        let rhs = AbstractValue::concrete(DType::F32, &[1, 1, 3]);
        let mut desc = descriptor(1, vec![(0, 0)], 1, 1);
        desc.rhs_dilation = vec![2];
        let out = infer(&lhs, &rhs, &desc).unwrap();
        assert_eq!(out.shape, shape_of(&[1, 1, 6]));
    }
}
