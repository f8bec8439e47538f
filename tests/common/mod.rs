//! A reference interpreter over `ndarray`, used to check the rewrite rules
//! numerically. The convolution here is the direct nested-loop definition;
//! slow, but independent of every rewrite under test.

use gconv::prelude::*;
use ndarray::{ArrayD, Axis, Dimension, IxDyn, indices};

#[derive(Debug, Clone)]
pub struct Value(pub ArrayD<f64>);

pub struct Interp;

impl Trace for Interp {
    type Value = Value;

    fn shape(&self, value: &Value) -> Vec<isize> {
        value.0.shape().iter().map(|&s| s as isize).collect()
    }

    fn dtype(&self, _value: &Value) -> DType {
        DType::F64
    }

    fn conv(&mut self, lhs: &Value, rhs: &Value, desc: &ConvDescriptor) -> Result<Value> {
        let lhs_shape = self.shape(lhs);
        let rhs_shape = self.shape(rhs);
        let out_aval = infer(
            &AbstractValue::concrete(DType::F64, &lhs_shape),
            &AbstractValue::concrete(DType::F64, &rhs_shape),
            desc,
        )?;
        let out_dims: Vec<usize> = out_aval
            .shape
            .iter()
            .map(|d| d.as_const().unwrap().max(0) as usize)
            .collect();

        let dn = &desc.dimension_numbers;
        let spatial_rank = dn.spatial_rank();
        let rhs_in_feat = rhs_shape[dn.rhs_in_feature()] as usize;
        let out_feat_total = rhs_shape[dn.rhs_out_feature()] as usize;
        let lhs_batch_total = lhs_shape[dn.lhs_batch()] as usize;
        let fgc = desc.feature_group_count;
        let bgc = desc.batch_group_count;

        let mut kernel_dims = vec![rhs_in_feat];
        kernel_dims.extend(dn.rhs_spatial().iter().map(|&a| rhs_shape[a] as usize));

        let mut out = ArrayD::<f64>::zeros(IxDyn(&out_dims));
        for out_idx in indices(IxDyn(&out_dims)) {
            let out_idx = out_idx.slice().to_vec();
            let n = out_idx[dn.out_batch()];
            let f = out_idx[dn.out_feature()];

            // Group-major feature layout decides which input slice feeds
            // output feature f.
            let lhs_feat_offset = (f / (out_feat_total / fgc)) * rhs_in_feat;
            let lhs_batch = if bgc > 1 {
                (f / (out_feat_total / bgc)) * (lhs_batch_total / bgc) + n
            } else {
                n
            };

            let mut acc = 0.0;
            'window: for k_idx in indices(IxDyn(&kernel_dims)) {
                let k_idx = k_idx.slice().to_vec();
                let c = k_idx[0];

                let mut lhs_idx = vec![0usize; lhs_shape.len()];
                lhs_idx[dn.lhs_batch()] = lhs_batch;
                lhs_idx[dn.lhs_feature()] = lhs_feat_offset + c;
                for s in 0..spatial_rank {
                    let o = out_idx[dn.out_spatial()[s]] as isize;
                    let k = k_idx[1 + s] as isize;
                    let in_size = lhs_shape[dn.lhs_spatial()[s]];
                    let ld = desc.lhs_dilation[s] as isize;
                    let dilated = if in_size > 0 { (in_size - 1) * ld + 1 } else { 0 };
                    let pos = o * desc.window_strides[s] as isize
                        + k * desc.rhs_dilation[s] as isize
                        - desc.padding[s].0;
                    if pos < 0 || pos >= dilated || pos % ld != 0 {
                        continue 'window;
                    }
                    lhs_idx[dn.lhs_spatial()[s]] = (pos / ld) as usize;
                }

                let mut rhs_idx = vec![0usize; rhs_shape.len()];
                rhs_idx[dn.rhs_out_feature()] = f;
                rhs_idx[dn.rhs_in_feature()] = c;
                for s in 0..spatial_rank {
                    rhs_idx[dn.rhs_spatial()[s]] = k_idx[1 + s];
                }

                acc += lhs.0[IxDyn(&lhs_idx)] * rhs.0[IxDyn(&rhs_idx)];
            }
            out[IxDyn(&out_idx)] = acc;
        }
        Ok(Value(out))
    }

    fn reshape(&mut self, value: &Value, shape: &[isize]) -> Value {
        let dims: Vec<usize> = shape.iter().map(|&s| s as usize).collect();
        let contiguous = value.0.as_standard_layout().to_owned();
        Value(contiguous.into_shape_with_order(IxDyn(&dims)).unwrap())
    }

    fn transpose(&mut self, value: &Value, perm: &[usize]) -> Value {
        Value(value.0.clone().permuted_axes(perm.to_vec()))
    }

    fn rev(&mut self, value: &Value, axes: &[usize]) -> Value {
        let mut out = value.0.clone();
        for &axis in axes {
            out.invert_axis(Axis(axis));
        }
        Value(out)
    }
}

/// Deterministic pseudo-random fill in [-0.5, 0.5).
pub fn fill(dims: &[usize]) -> Value {
    let count: usize = dims.iter().product();
    let data: Vec<f64> = (0..count)
        .map(|i| (i.wrapping_mul(2_654_435_761) % 1000) as f64 / 1000.0 - 0.5)
        .collect();
    Value(ArrayD::from_shape_vec(IxDyn(dims), data).unwrap())
}

/// A descriptor over the identity layout with explicit padding.
pub fn descriptor(
    window_strides: Vec<usize>,
    padding: Vec<(isize, isize)>,
    lhs_dilation: Vec<usize>,
    rhs_dilation: Vec<usize>,
    feature_group_count: usize,
    batch_group_count: usize,
) -> ConvDescriptor {
    let rank = window_strides.len() + 2;
    ConvDescriptor {
        window_strides,
        padding,
        lhs_dilation,
        rhs_dilation,
        dimension_numbers: conv_dimension_numbers(rank, rank, None).unwrap(),
        feature_group_count,
        batch_group_count,
        precision: Precision::Default,
        preferred_element_type: None,
    }
}

pub fn assert_all_close(a: &Value, b: &Value, tolerance: f64) {
    assert_eq!(a.0.shape(), b.0.shape(), "shapes differ");
    for (x, y) in a.0.iter().zip(b.0.iter()) {
        assert!(
            (x - y).abs() <= tolerance,
            "values differ: {x} vs {y} (tolerance {tolerance})"
        );
    }
}
