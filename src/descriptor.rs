//! The resolved parameter set of one convolution instance.

use crate::dnums::ConvDimensionNumbers;
use crate::dtype::DType;

/// Requested numeric precision for the backend contraction. Carried inertly
/// through every rewrite and consumed only at lowering time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    #[default]
    Default,
    High,
    Highest,
}

/// Fully resolved parameters of a general dilated convolution.
///
/// A descriptor is built once per call and never mutated; rewrite rules
/// construct fresh descriptors for the sub-convolutions they emit. Padding is
/// always explicit `(low, high)` pairs; symbolic modes are resolved before a
/// descriptor exists. Negative padding crops. At most one of the two group
/// counts may exceed 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvDescriptor {
    /// Inter-window stride per spatial axis; always positive.
    pub window_strides: Vec<usize>,
    /// Explicit `(low, high)` padding per spatial axis.
    pub padding: Vec<(isize, isize)>,
    /// Input dilation per spatial axis; 1 means none. Values above 1 make
    /// the operation fractionally strided.
    pub lhs_dilation: Vec<usize>,
    /// Kernel (atrous) dilation per spatial axis; 1 means none.
    pub rhs_dilation: Vec<usize>,
    pub dimension_numbers: ConvDimensionNumbers,
    pub feature_group_count: usize,
    pub batch_group_count: usize,
    pub precision: Precision,
    /// Overrides the naturally promoted result type when present.
    pub preferred_element_type: Option<DType>,
}

impl ConvDescriptor {
    /// Number of spatial axes.
    pub fn spatial_rank(&self) -> usize {
        self.window_strides.len()
    }
}
