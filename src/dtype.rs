//! Element types and the accumulation-type promotion rule.

use crate::error::{ConvError, Result};

/// Numeric element type of an operand or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    I32,
    I64,
    F32,
    F64,
    Complex64,
    Complex128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Bool,
    Int,
    Float,
    Complex,
}

impl DType {
    pub fn is_complex(self) -> bool {
        matches!(self, DType::Complex64 | DType::Complex128)
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// The real type underlying a complex type (identity for real types).
    pub fn real_part(self) -> DType {
        match self {
            DType::Complex64 => DType::F32,
            DType::Complex128 => DType::F64,
            other => other,
        }
    }

    fn category(self) -> Category {
        match self {
            DType::Bool => Category::Bool,
            DType::I32 | DType::I64 => Category::Int,
            DType::F32 | DType::F64 => Category::Float,
            DType::Complex64 | DType::Complex128 => Category::Complex,
        }
    }

    /// Bit width of the underlying real representation.
    fn real_bits(self) -> u32 {
        match self {
            DType::Bool => 1,
            DType::I32 | DType::F32 | DType::Complex64 => 32,
            DType::I64 | DType::F64 | DType::Complex128 => 64,
        }
    }

    /// Natural accumulation promotion of two operand types: the wider type
    /// wins within a category, and any complex operand makes the result
    /// complex wide enough to hold both operands exactly.
    pub fn promote(a: DType, b: DType) -> DType {
        if a == b {
            return a;
        }
        let bits = a.real_bits().max(b.real_bits());
        if a.is_complex() || b.is_complex() {
            if bits > 32 {
                DType::Complex128
            } else {
                DType::Complex64
            }
        } else if a.is_float() || b.is_float() {
            if bits > 32 { DType::F64 } else { DType::F32 }
        } else if a == DType::Bool {
            b
        } else if b == DType::Bool {
            a
        } else if bits > 32 {
            DType::I64
        } else {
            DType::I32
        }
    }
}

/// Checks that `preferred` is a legal accumulation-type override for
/// operands of type `input`: same category, no narrowing, and a complex
/// input may only be overridden by another complex type.
pub fn validate_preferred_element_type(input: DType, preferred: DType) -> Result<()> {
    if input.category() != preferred.category() {
        return Err(ConvError::ConfigurationError(format!(
            "preferred_element_type {preferred:?} is not in the same type category as operand type {input:?}",
        )));
    }
    if preferred.real_bits() < input.real_bits() {
        return Err(ConvError::ConfigurationError(format!(
            "preferred_element_type {preferred:?} is narrower than operand type {input:?}",
        )));
    }
    Ok(())
}
