//! The vectorization rewrite computes exactly what a loop over the mapped
//! axis would.

mod common;

use common::{Interp, Value, assert_all_close, descriptor, fill};
use gconv::ConvDescriptor;
use gconv::batching::batch_rule;
use gconv::prelude::*;
use ndarray::Axis;

const TOLERANCE: f64 = 1e-12;

fn slice(value: &Value, axis: usize, index: usize) -> Value {
    Value(value.0.index_axis(Axis(axis), index).to_owned())
}

/// Runs the rewrite and checks each slice of the result against an unmapped
/// convolution of the corresponding operand slices.
fn check_against_loop(
    lhs: &Value,
    rhs: &Value,
    lhs_bdim: Option<usize>,
    rhs_bdim: Option<usize>,
    desc: &ConvDescriptor,
) {
    let mut tr = Interp;
    let b = lhs_bdim
        .map(|d| tr.shape(lhs)[d])
        .or_else(|| rhs_bdim.map(|d| tr.shape(rhs)[d]))
        .unwrap() as usize;

    let (out, out_bdim) = batch_rule(&mut tr, lhs, rhs, lhs_bdim, rhs_bdim, desc).unwrap();
    assert_eq!(tr.shape(&out)[out_bdim] as usize, b);

    for i in 0..b {
        let lhs_i = match lhs_bdim {
            Some(d) => slice(lhs, d, i),
            None => lhs.clone(),
        };
        let rhs_i = match rhs_bdim {
            Some(d) => slice(rhs, d, i),
            None => rhs.clone(),
        };
        let expected = tr.conv(&lhs_i, &rhs_i, desc).unwrap();
        let actual = slice(&out, out_bdim, i);
        assert_all_close(&actual, &expected, TOLERANCE);
    }
}

#[test]
fn test_lhs_mapped() {
    let desc = descriptor(vec![1, 1], vec![(0, 0), (0, 0)], vec![1, 1], vec![1, 1], 1, 1);
    let lhs = fill(&[5, 1, 3, 6, 6]);
    let rhs = fill(&[4, 3, 3, 3]);
    check_against_loop(&lhs, &rhs, Some(0), None, &desc);
}

#[test]
fn test_lhs_mapped_inner_axis() {
    let desc = descriptor(vec![2], vec![(1, 1)], vec![1], vec![1], 1, 1);
    let lhs = fill(&[2, 3, 5, 8]);
    let rhs = fill(&[4, 3, 3]);
    check_against_loop(&lhs, &rhs, Some(2), None, &desc);
}

#[test]
fn test_lhs_mapped_batch_grouped() {
    let desc = descriptor(vec![1], vec![(0, 0)], vec![1], vec![1], 1, 2);
    let lhs = fill(&[6, 5, 2, 8]);
    let rhs = fill(&[4, 2, 3]);
    check_against_loop(&lhs, &rhs, Some(1), None, &desc);
}

#[test]
fn test_rhs_mapped() {
    let desc = descriptor(vec![1, 1], vec![(0, 0), (0, 0)], vec![1, 1], vec![1, 1], 1, 1);
    let lhs = fill(&[1, 3, 6, 6]);
    let rhs = fill(&[4, 3, 5, 3, 3]);
    check_against_loop(&lhs, &rhs, None, Some(2), &desc);
}

#[test]
fn test_rhs_mapped_feature_grouped() {
    let desc = descriptor(vec![1], vec![(0, 0)], vec![1], vec![1], 2, 1);
    let lhs = fill(&[2, 4, 8]);
    let rhs = fill(&[5, 6, 2, 3]);
    check_against_loop(&lhs, &rhs, None, Some(0), &desc);
}

#[test]
fn test_rhs_mapped_batch_grouped() {
    let desc = descriptor(vec![1], vec![(0, 0)], vec![1], vec![1], 1, 2);
    let lhs = fill(&[6, 2, 8]);
    let rhs = fill(&[4, 2, 5, 3]);
    check_against_loop(&lhs, &rhs, None, Some(2), &desc);
}

#[test]
fn test_both_mapped() {
    let desc = descriptor(vec![1], vec![(1, 0)], vec![1], vec![1], 1, 1);
    let lhs = fill(&[5, 2, 3, 7]);
    let rhs = fill(&[5, 4, 3, 3]);
    check_against_loop(&lhs, &rhs, Some(0), Some(0), &desc);
}

#[test]
fn test_both_mapped_different_positions() {
    let desc = descriptor(vec![1], vec![(0, 0)], vec![1], vec![1], 1, 1);
    let lhs = fill(&[2, 3, 5, 7]);
    let rhs = fill(&[4, 3, 5, 3]);
    check_against_loop(&lhs, &rhs, Some(2), Some(2), &desc);
}

#[test]
fn test_both_mapped_batch_grouped() {
    let desc = descriptor(vec![1], vec![(0, 0)], vec![1], vec![1], 1, 2);
    let lhs = fill(&[5, 6, 2, 8]);
    let rhs = fill(&[5, 4, 2, 3]);
    check_against_loop(&lhs, &rhs, Some(0), Some(0), &desc);
}

#[test]
fn test_both_mapped_feature_grouped() {
    let desc = descriptor(vec![1], vec![(0, 0)], vec![1], vec![1], 2, 1);
    let lhs = fill(&[5, 2, 4, 8]);
    let rhs = fill(&[5, 6, 2, 3]);
    check_against_loop(&lhs, &rhs, Some(0), Some(0), &desc);
}
