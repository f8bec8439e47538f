//! Gconv: General dilated convolution primitive
//!
//! Gconv implements the shape and rewrite algebra of the general
//! N-dimensional dilated convolution for graph-transformation engines:
//! layout canonicalization, shape and type inference, differentiation,
//! vectorization, and the lowering contract. It never touches array data;
//! numeric work is delegated to a host through the [`trace::Trace`] seam.
//!
//! # Architecture
//!
//! - **dnums**: axis-role model and canonicalizer for operand layouts
//! - **algebra**: padding and output-size arithmetic shared by every rule
//! - **shape** / **dtype**: symbolic dimensions and element types
//! - **descriptor**: the resolved parameter set of one convolution
//! - **infer**: shape and type inference
//! - **vjp** / **batching**: differentiation and vectorization rewrites
//! - **api**: user-facing entry points, including transposed convolution
//! - **primitive**: operation registry and lowering

// ============================================================================
// Core Modules
// ============================================================================

pub mod algebra;
pub mod api;
pub mod batching;
pub mod descriptor;
pub mod dnums;
pub mod dtype;
pub mod error;
pub mod infer;
pub mod primitive;
pub mod shape;
pub mod trace;
pub mod vjp;

// ============================================================================
// Re-exports
// ============================================================================

pub use descriptor::{ConvDescriptor, Precision};
pub use dnums::{ConvDimensionNumbers, DimensionNumbers};
pub use error::{ConvError, Result};

// ============================================================================
// Prelude
// ============================================================================

/// Prelude module with commonly used types and functions
pub mod prelude {
    pub use crate::api::{
        ConvParams, Padding, TransposeConvParams, general_convolution, simple_convolution,
        transposed_convolution,
    };
    pub use crate::descriptor::{ConvDescriptor, Precision};
    pub use crate::dnums::{ConvDimensionNumbers, DimensionNumbers, conv_dimension_numbers};
    pub use crate::dtype::DType;
    pub use crate::error::{ConvError, Result};
    pub use crate::infer::infer;
    pub use crate::primitive::{CONV_GENERAL_DILATED, Operation, Registry};
    pub use crate::shape::{AbstractValue, Expr, Shape};
    pub use crate::trace::Trace;
}

// ============================================================================
// Tests
// ============================================================================
