//! The convolution as a registered operation.
//!
//! A host system binds rules to operation names through an explicit
//! [`Registry`] value it owns and passes around; there is no global mutable
//! table. The registry maps names to [`Operation`] implementations carrying
//! the inference, differentiation, vectorization, and lowering rules.

use log::info;
use rustc_hash::FxHashMap;

use crate::batching::batch_rule;
use crate::descriptor::{ConvDescriptor, Precision};
use crate::dnums::ConvDimensionNumbers;
use crate::dtype::DType;
use crate::error::{ConvError, Result};
use crate::infer::infer;
use crate::shape::AbstractValue;
use crate::trace::Trace;
use crate::vjp::{vjp_lhs, vjp_rhs};

/// Name under which the convolution is registered.
pub const CONV_GENERAL_DILATED: &str = "conv_general_dilated";

/// Backend-facing instruction emitted by lowering: every rewrite-level
/// convenience already resolved, nothing left to interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvInstruction {
    pub window_strides: Vec<usize>,
    pub padding: Vec<(isize, isize)>,
    pub lhs_dilation: Vec<usize>,
    pub rhs_dilation: Vec<usize>,
    pub dimension_numbers: ConvDimensionNumbers,
    pub feature_group_count: usize,
    pub batch_group_count: usize,
    /// Per-spatial-axis kernel reversal flags. Always all false; reversal is
    /// expressed upstream by rewriting the kernel.
    pub window_reversal: Vec<bool>,
    pub precision: Precision,
    /// Element type the backend must accumulate and produce in.
    pub accumulation_type: DType,
}

/// Host choices that affect lowering.
#[derive(Debug, Clone, Default)]
pub struct LoweringOptions {
    /// Decompose complex-valued convolutions into real ones on backends
    /// without native complex support.
    pub expand_complex_convolutions: bool,
}

/// Outcome of lowering one convolution node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoweringDecision {
    /// Emit the instruction as-is.
    Direct(ConvInstruction),
    /// The host must expand into three real convolutions of the given
    /// element type combining real and imaginary parts, then reassemble the
    /// complex result.
    ExpandComplex {
        real_type: DType,
        instruction: ConvInstruction,
    },
}

/// The rule set of one operation, generic over the host's trace.
pub trait Operation<T: Trace> {
    fn name(&self) -> &'static str;

    /// Shape and type inference.
    fn infer(
        &self,
        lhs: &AbstractValue,
        rhs: &AbstractValue,
        desc: &ConvDescriptor,
    ) -> Result<AbstractValue>;

    /// Cotangent with respect to the first operand.
    fn vjp_lhs(
        &self,
        tr: &mut T,
        g: &T::Value,
        rhs: &T::Value,
        desc: &ConvDescriptor,
        lhs_shape: &[isize],
    ) -> Result<T::Value>;

    /// Cotangent with respect to the second operand; `None` when there is
    /// no meaningful cotangent.
    fn vjp_rhs(
        &self,
        tr: &mut T,
        g: &T::Value,
        lhs: &T::Value,
        desc: &ConvDescriptor,
        rhs_shape: &[isize],
    ) -> Result<Option<T::Value>>;

    /// Vectorization over a mapped axis.
    fn batch(
        &self,
        tr: &mut T,
        lhs: &T::Value,
        rhs: &T::Value,
        lhs_bdim: Option<usize>,
        rhs_bdim: Option<usize>,
        desc: &ConvDescriptor,
    ) -> Result<(T::Value, usize)>;

    /// Translates a validated node into a backend instruction.
    fn lower(
        &self,
        lhs: &AbstractValue,
        rhs: &AbstractValue,
        desc: &ConvDescriptor,
        options: &LoweringOptions,
    ) -> Result<LoweringDecision>;
}

/// The general dilated convolution operation.
pub struct ConvGeneralDilated;

impl<T: Trace> Operation<T> for ConvGeneralDilated {
    fn name(&self) -> &'static str {
        CONV_GENERAL_DILATED
    }

    fn infer(
        &self,
        lhs: &AbstractValue,
        rhs: &AbstractValue,
        desc: &ConvDescriptor,
    ) -> Result<AbstractValue> {
        infer(lhs, rhs, desc)
    }

    fn vjp_lhs(
        &self,
        tr: &mut T,
        g: &T::Value,
        rhs: &T::Value,
        desc: &ConvDescriptor,
        lhs_shape: &[isize],
    ) -> Result<T::Value> {
        vjp_lhs(tr, g, rhs, desc, lhs_shape)
    }

    fn vjp_rhs(
        &self,
        tr: &mut T,
        g: &T::Value,
        lhs: &T::Value,
        desc: &ConvDescriptor,
        rhs_shape: &[isize],
    ) -> Result<Option<T::Value>> {
        vjp_rhs(tr, g, lhs, desc, rhs_shape)
    }

    fn batch(
        &self,
        tr: &mut T,
        lhs: &T::Value,
        rhs: &T::Value,
        lhs_bdim: Option<usize>,
        rhs_bdim: Option<usize>,
        desc: &ConvDescriptor,
    ) -> Result<(T::Value, usize)> {
        batch_rule(tr, lhs, rhs, lhs_bdim, rhs_bdim, desc)
    }

    fn lower(
        &self,
        lhs: &AbstractValue,
        rhs: &AbstractValue,
        desc: &ConvDescriptor,
        options: &LoweringOptions,
    ) -> Result<LoweringDecision> {
        let out = infer(lhs, rhs, desc)?;
        let instruction = ConvInstruction {
            window_strides: desc.window_strides.clone(),
            padding: desc.padding.clone(),
            lhs_dilation: desc.lhs_dilation.clone(),
            rhs_dilation: desc.rhs_dilation.clone(),
            dimension_numbers: desc.dimension_numbers.clone(),
            feature_group_count: desc.feature_group_count,
            batch_group_count: desc.batch_group_count,
            window_reversal: vec![false; desc.spatial_rank()],
            precision: desc.precision,
            accumulation_type: out.dtype,
        };
        if options.expand_complex_convolutions && out.dtype.is_complex() {
            Ok(LoweringDecision::ExpandComplex {
                real_type: out.dtype.real_part(),
                instruction,
            })
        } else {
            Ok(LoweringDecision::Direct(instruction))
        }
    }
}

/// An operation table owned and threaded by the host; no global state.
pub struct Registry<T: Trace> {
    ops: FxHashMap<&'static str, Box<dyn Operation<T>>>,
}

impl<T: Trace> Registry<T> {
    pub fn new() -> Self {
        Registry {
            ops: FxHashMap::default(),
        }
    }

    /// A registry with the built-in convolution registered.
    pub fn with_builtin_ops() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ConvGeneralDilated));
        registry
    }

    pub fn register(&mut self, op: Box<dyn Operation<T>>) {
        info!("registering operation {:?}", op.name());
        self.ops.insert(op.name(), op);
    }

    pub fn get(&self, name: &str) -> Result<&dyn Operation<T>> {
        self.ops
            .get(name)
            .map(|op| op.as_ref())
            .ok_or_else(|| {
                ConvError::ConfigurationError(format!("no operation registered as {name:?}"))
            })
    }
}

impl<T: Trace> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
