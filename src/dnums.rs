//! Dimension-number model and canonicalizer.
//!
//! A convolution names the role of every operand axis: one batch-like axis,
//! one feature-like axis, and spatial axes. The canonical form is a triple of
//! axis-index permutations; user code may instead spell the roles with label
//! strings such as `("NCHW", "OIHW", "NCHW")` or omit them entirely.

use log::trace;

use crate::error::{ConvError, Result};

/// Canonical dimension numbers of one convolution.
///
/// Each spec is a permutation of axis indices of length `rank`:
/// * `lhs_spec`: `(batch, feature, spatial...)` axes of the input,
/// * `rhs_spec`: `(output feature, input feature, spatial...)` axes of the
///   kernel,
/// * `out_spec`: `(batch, feature, spatial...)` axes of the output.
///
/// The spatial positions `2..` are ordered consistently across all three
/// specs; the order is the one induced by the kernel's spatial axes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvDimensionNumbers {
    pub lhs_spec: Vec<usize>,
    pub rhs_spec: Vec<usize>,
    pub out_spec: Vec<usize>,
}

impl ConvDimensionNumbers {
    pub fn rank(&self) -> usize {
        self.lhs_spec.len()
    }

    /// Number of spatial axes.
    pub fn spatial_rank(&self) -> usize {
        self.rank() - 2
    }

    pub fn lhs_batch(&self) -> usize {
        self.lhs_spec[0]
    }

    pub fn lhs_feature(&self) -> usize {
        self.lhs_spec[1]
    }

    pub fn lhs_spatial(&self) -> &[usize] {
        &self.lhs_spec[2..]
    }

    pub fn rhs_out_feature(&self) -> usize {
        self.rhs_spec[0]
    }

    pub fn rhs_in_feature(&self) -> usize {
        self.rhs_spec[1]
    }

    pub fn rhs_spatial(&self) -> &[usize] {
        &self.rhs_spec[2..]
    }

    pub fn out_batch(&self) -> usize {
        self.out_spec[0]
    }

    pub fn out_feature(&self) -> usize {
        self.out_spec[1]
    }

    pub fn out_spatial(&self) -> &[usize] {
        &self.out_spec[2..]
    }
}

/// A dimension-number argument as accepted by the call surface; `None` at the
/// call site selects the identity layout (batch, feature, spatial...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimensionNumbers {
    /// Already canonical; passed through unchanged.
    Canonical(ConvDimensionNumbers),
    /// Per-operand label strings `(lhs, rhs, out)`, one character per axis.
    Labels(String, String, String),
}

impl DimensionNumbers {
    /// Convenience constructor for the label form.
    pub fn labels(lhs: &str, rhs: &str, out: &str) -> Self {
        DimensionNumbers::Labels(lhs.to_string(), rhs.to_string(), out.to_string())
    }
}

/// Reserved label pairs: `(batch-like, feature-like)` per operand. The kernel
/// uses `O`/`I` for its output/input feature axes.
const CHAR_PAIRS: [(char, char); 3] = [('N', 'C'), ('O', 'I'), ('N', 'C')];

/// Canonicalizes a `dimension_numbers` argument against the operand ranks.
///
/// `None` defaults to the identity permutation for all three operands. The
/// label form is validated: each string must use its reserved pair exactly
/// once, repeat no label, and all three must agree on the set of spatial
/// labels. Spatial order follows the kernel (`rhs`) string.
pub fn conv_dimension_numbers(
    lhs_rank: usize,
    rhs_rank: usize,
    dimension_numbers: Option<&DimensionNumbers>,
) -> Result<ConvDimensionNumbers> {
    if lhs_rank != rhs_rank {
        return Err(ConvError::InvalidSpecification(format!(
            "convolution requires lhs and rhs rank to be equal, got {lhs_rank} and {rhs_rank}",
        )));
    }
    match dimension_numbers {
        None => {
            let iota: Vec<usize> = (0..lhs_rank).collect();
            Ok(ConvDimensionNumbers {
                lhs_spec: iota.clone(),
                rhs_spec: iota.clone(),
                out_spec: iota,
            })
        }
        Some(DimensionNumbers::Canonical(dn)) => {
            if dn.rank() != lhs_rank || dn.rhs_spec.len() != lhs_rank || dn.out_spec.len() != lhs_rank
            {
                return Err(ConvError::InvalidSpecification(format!(
                    "canonical dimension numbers have rank {} but operands have rank {lhs_rank}",
                    dn.rank(),
                )));
            }
            Ok(dn.clone())
        }
        Some(DimensionNumbers::Labels(lhs, rhs, out)) => {
            let specs = [lhs.as_str(), rhs.as_str(), out.as_str()];
            for (i, spec) in specs.iter().enumerate() {
                if spec.chars().count() != lhs_rank {
                    return Err(ConvError::InvalidSpecification(format!(
                        "dimension_numbers[{i}] must have length equal to the operand rank, \
                         got {:?} for rank {lhs_rank}",
                        spec,
                    )));
                }
            }
            let perms = conv_general_permutations(&specs)?;
            trace!(
                "canonicalized dimension numbers {:?} -> {:?}",
                specs, perms
            );
            let [lhs_spec, rhs_spec, out_spec] = perms;
            Ok(ConvDimensionNumbers {
                lhs_spec,
                rhs_spec,
                out_spec,
            })
        }
    }
}

/// Computes the three axis permutations from label strings.
fn conv_general_permutations(specs: &[&str; 3]) -> Result<[Vec<usize>; 3]> {
    for (i, (spec, (a, b))) in specs.iter().zip(CHAR_PAIRS).enumerate() {
        let count_a = spec.chars().filter(|&c| c == a).count();
        let count_b = spec.chars().filter(|&c| c == b).count();
        if count_a != 1 || count_b != 1 {
            return Err(ConvError::InvalidSpecification(format!(
                "dimension_numbers[{i}] must contain the characters '{a}' and '{b}' \
                 exactly once, got {:?}",
                spec,
            )));
        }
        let mut seen: Vec<char> = spec.chars().collect();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != spec.chars().count() {
            return Err(ConvError::InvalidSpecification(format!(
                "dimension_numbers[{i}] cannot have duplicate characters, got {:?}",
                spec,
            )));
        }
    }

    let spatial_set = |spec: &str, pair: (char, char)| {
        let mut set: Vec<char> = spec
            .chars()
            .filter(|&c| c != pair.0 && c != pair.1)
            .collect();
        set.sort_unstable();
        set
    };
    let sets: Vec<Vec<char>> = specs
        .iter()
        .zip(CHAR_PAIRS)
        .map(|(spec, pair)| spatial_set(spec, pair))
        .collect();
    if sets[0] != sets[1] || sets[1] != sets[2] {
        return Err(ConvError::InvalidSpecification(format!(
            "dimension_numbers elements must each have the same set of spatial \
             characters, got {:?}",
            specs,
        )));
    }

    let rhs_spec = specs[1];
    let rhs_index = |c: char| rhs_spec.chars().position(|x| x == c).unwrap();
    let getperm = |spec: &str, pair: (char, char), is_rhs: bool| -> Vec<usize> {
        let chars: Vec<char> = spec.chars().collect();
        let mut spatial: Vec<usize> = chars
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c != pair.0 && c != pair.1)
            .map(|(i, _)| i)
            .collect();
        if !is_rhs {
            // Spatial order is induced by where each label sits in the kernel
            // string, so input/kernel/output may use different physical orders.
            spatial.sort_by_key(|&i| rhs_index(chars[i]));
        }
        let mut perm = vec![
            chars.iter().position(|&c| c == pair.0).unwrap(),
            chars.iter().position(|&c| c == pair.1).unwrap(),
        ];
        perm.extend(spatial);
        perm
    };

    Ok([
        getperm(specs[0], CHAR_PAIRS[0], false),
        getperm(specs[1], CHAR_PAIRS[1], true),
        getperm(specs[2], CHAR_PAIRS[2], false),
    ])
}

/// `out[i] = xs[perm[i]]`: gathers axes into canonical order.
pub(crate) fn permute<T: Clone>(xs: &[T], perm: &[usize]) -> Vec<T> {
    perm.iter().map(|&i| xs[i].clone()).collect()
}

/// `out[perm[i]] = xs[i]`: scatters a canonical-order sequence back into the
/// physical axis order described by `perm`.
pub(crate) fn unpermute<T: Clone>(xs: &[T], perm: &[usize]) -> Vec<T> {
    let mut out = xs.to_vec();
    for (i, &p) in perm.iter().enumerate() {
        out[p] = xs[i].clone();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_identity() {
        let dn = conv_dimension_numbers(4, 4, None).unwrap();
        assert_eq!(dn.lhs_spec, vec![0, 1, 2, 3]);
        assert_eq!(dn.rhs_spec, vec![0, 1, 2, 3]);
        assert_eq!(dn.out_spec, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_nchw_matches_default() {
        let labels = DimensionNumbers::labels("NCHW", "OIHW", "NCHW");
        let dn = conv_dimension_numbers(4, 4, Some(&labels)).unwrap();
        assert_eq!(dn, conv_dimension_numbers(4, 4, None).unwrap());
    }

    #[test]
    fn test_canonical_round_trip() {
        let labels = DimensionNumbers::labels("NHWC", "HWIO", "NHWC");
        let dn = conv_dimension_numbers(4, 4, Some(&labels)).unwrap();
        let again =
            conv_dimension_numbers(4, 4, Some(&DimensionNumbers::Canonical(dn.clone()))).unwrap();
        assert_eq!(dn, again);
    }

    #[test]
    fn test_nhwc_layout() {
        let labels = DimensionNumbers::labels("NHWC", "HWIO", "NHWC");
        let dn = conv_dimension_numbers(4, 4, Some(&labels)).unwrap();
        assert_eq!(dn.lhs_spec, vec![0, 3, 1, 2]);
        assert_eq!(dn.rhs_spec, vec![3, 2, 0, 1]);
        assert_eq!(dn.out_spec, vec![0, 3, 1, 2]);
    }

    #[test]
    fn test_spatial_order_follows_rhs() {
        // Kernel lists W before H, so the canonical spatial order is (W, H).
        let labels = DimensionNumbers::labels("NCHW", "OIWH", "NCHW");
        let dn = conv_dimension_numbers(4, 4, Some(&labels)).unwrap();
        assert_eq!(dn.rhs_spec, vec![0, 1, 2, 3]);
        assert_eq!(dn.lhs_spec, vec![0, 1, 3, 2]);
        assert_eq!(dn.out_spec, vec![0, 1, 3, 2]);
    }

    #[test]
    fn test_rank_mismatch_rejected() {
        assert!(matches!(
            conv_dimension_numbers(4, 3, None),
            Err(ConvError::InvalidSpecification(_))
        ));
    }

    #[test]
    fn test_bad_labels_rejected() {
        for (lhs, rhs, out) in [
            ("NCH", "OIHW", "NCHW"),  // wrong length
            ("NNHW", "OIHW", "NCHW"), // missing C, duplicate N
            ("NCHW", "OOHW", "NCHW"), // missing I
            ("NCHW", "OIHW", "NCHD"), // spatial sets differ
        ] {
            let labels = DimensionNumbers::labels(lhs, rhs, out);
            assert!(
                matches!(
                    conv_dimension_numbers(4, 4, Some(&labels)),
                    Err(ConvError::InvalidSpecification(_))
                ),
                "expected rejection for {lhs}/{rhs}/{out}",
            );
        }
    }

    #[test]
    fn test_permute_round_trip() {
        let perm = vec![0, 3, 1, 2];
        let xs = vec!["n", "h", "w", "c"];
        let canonical = permute(&xs, &perm);
        assert_eq!(canonical, vec!["n", "c", "h", "w"]);
        assert_eq!(unpermute(&canonical, &perm), xs);
    }
}
