//! Primitive Kernels - The Stitchable Per-Element Algebra
//!
//! A stitchable primitive is a pure element-wise function: `preallocate`
//! derives the output descriptor from the input descriptor (shape copied,
//! element type possibly changed) and `emit` transforms one already-loaded
//! element value into one output value, emitting no loads, stores, or header
//! branches of its own. Because every primitive preserves the element count,
//! an ordered list composes into a single loop: one load, the chained value
//! transforms, one store. That composition is the `Stitch` variant, which is
//! itself a stitchable primitive and may nest.
//!
//! @version 0.1.0
//! @author Veris Development Team

use cranelift::prelude::*;

use veris_core::element::ElementType;
use veris_core::error::Result;
use veris_matrix::header::MatrixHeader;

use crate::builder::{
    auto_constant, emit_add, emit_cast, emit_compare_gt, emit_compare_lt, emit_multiply, Emitter,
};

// =============================================================================
// PrimitiveKernel
// =============================================================================

/// A stitchable per-element operation.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveKernel {
    /// `v * v` in the output type; integer overflow wraps.
    Square,
    /// `v * a` in the output type.
    Scale(f64),
    /// `v + b` in the output type.
    Add(f64),
    /// Absolute value: identity for unsigned, `fabs` for floating, branchless
    /// select for signed integers.
    Abs,
    /// Element type change with standard value conversion.
    Cast(ElementType),
    /// `v` raised to a fixed exponent; promotes to at least 32-bit float.
    Pow(f64),
    /// Clamp into `[min, max]`; a bound at the `f64` extreme is not emitted.
    Clamp {
        /// Lower bound, or `f64::MIN` for unbounded.
        min: f64,
        /// Upper bound, or `f64::MAX` for unbounded.
        max: f64,
    },
    /// An ordered list of stitchable primitives fused into one pass.
    Stitch(Vec<PrimitiveKernel>),
}

impl PrimitiveKernel {
    /// The kernel family name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Square => "square",
            Self::Scale(_) => "scale",
            Self::Add(_) => "add",
            Self::Abs => "abs",
            Self::Cast(_) => "cast",
            Self::Pow(_) => "pow",
            Self::Clamp { .. } => "clamp",
            Self::Stitch(_) => "stitch",
        }
    }

    /// The configuration argument string, used for cache identity.
    #[must_use]
    pub fn arguments(&self) -> String {
        match self {
            Self::Square | Self::Abs => String::new(),
            Self::Scale(a) => format_number(*a),
            Self::Add(b) => format_number(*b),
            Self::Cast(ty) => ty.name().to_string(),
            Self::Pow(e) => format_number(*e),
            Self::Clamp { min, max } => format!("{},{}", format_number(*min), format_number(*max)),
            Self::Stitch(steps) => {
                let inner: Vec<String> = steps.iter().map(PrimitiveKernel::descriptor).collect();
                format!("[{}]", inner.join(","))
            }
        }
    }

    /// The full descriptor, e.g. `scale(2.5)`.
    #[must_use]
    pub fn descriptor(&self) -> String {
        let args = self.arguments();
        if args.is_empty() {
            self.name().to_string()
        } else {
            format!("{}({})", self.name(), args)
        }
    }

    /// Derives the output descriptor: shape copied from the source, element
    /// type adjusted per primitive.
    pub fn preallocate(&self, src: &MatrixHeader) -> Result<MatrixHeader> {
        let mut dst = *src;
        match self {
            Self::Square | Self::Scale(_) | Self::Add(_) | Self::Abs | Self::Clamp { .. } => {}
            Self::Cast(ty) => dst.set_element_type(*ty),
            Self::Pow(_) => {
                dst.set_floating(true);
                dst.set_bits(src.bits().max(32));
            }
            Self::Stitch(steps) => {
                for step in steps {
                    dst = step.preallocate(&dst)?;
                }
            }
        }
        // Preallocation must produce a decodable element type.
        dst.element_type()?;
        Ok(dst)
    }

    /// Emits IR transforming one loaded element value into one output value.
    ///
    /// `src`/`dst` are the per-step descriptors; the stitch driver rebinds
    /// them between steps. Must not emit loads, stores, or branches through
    /// the header.
    pub fn emit(
        &self,
        e: &mut Emitter,
        src: &MatrixHeader,
        dst: &MatrixHeader,
        value: Value,
    ) -> Result<Value> {
        match self {
            Self::Square => Ok(emit_multiply(e, dst, value, value)),

            Self::Scale(a) => {
                let scale = auto_constant(e, dst, *a)?;
                Ok(emit_multiply(e, dst, value, scale))
            }

            Self::Add(b) => {
                let bias = auto_constant(e, dst, *b)?;
                Ok(emit_add(e, dst, value, bias))
            }

            Self::Abs => {
                if !src.is_signed() {
                    Ok(value)
                } else if src.is_floating() {
                    Ok(e.b.ins().fabs(value))
                } else {
                    let zero = auto_constant(e, src, 0.0)?;
                    let negated = e.b.ins().isub(zero, value);
                    let negative = emit_compare_lt(e, src, value, zero);
                    Ok(e.b.ins().select(negative, negated, value))
                }
            }

            Self::Cast(_) => emit_cast(e, src, dst, value),

            Self::Pow(exponent) => self.emit_pow(e, src, dst, value, *exponent),

            Self::Clamp { min, max } => {
                let mut clamped = value;
                if *min > f64::MIN {
                    let low = auto_constant(e, dst, *min)?;
                    let below = emit_compare_lt(e, dst, clamped, low);
                    clamped = e.b.ins().select(below, low, clamped);
                }
                if *max < f64::MAX {
                    let high = auto_constant(e, dst, *max)?;
                    let above = emit_compare_gt(e, dst, clamped, high);
                    clamped = e.b.ins().select(above, high, clamped);
                }
                Ok(clamped)
            }

            Self::Stitch(steps) => {
                let mut current = *src;
                let mut val = value;
                for step in steps {
                    let next = step.preallocate(&current)?;
                    val = step.emit(e, &current, &next, val)?;
                    current = next;
                }
                Ok(val)
            }
        }
    }

    fn emit_pow(
        &self,
        e: &mut Emitter,
        src: &MatrixHeader,
        dst: &MatrixHeader,
        value: Value,
        exponent: f64,
    ) -> Result<Value> {
        let promoted = emit_cast(e, src, dst, value)?;

        // Any integral exponent takes the power-by-integer lowering; the
        // magnitude guard is the 32-bit exponent domain of the original
        // power-by-integer intrinsic.
        let integral = exponent.is_finite()
            && exponent == exponent.ceil()
            && exponent.abs() <= f64::from(i32::MAX);
        if integral {
            let n = exponent as i64;
            if n == 0 {
                return auto_constant(e, dst, 1.0);
            }
            if n == 1 {
                return Ok(promoted);
            }
            if n == 2 {
                return Ok(emit_multiply(e, dst, promoted, promoted));
            }
            let positive = emit_powi(e, dst, promoted, n.unsigned_abs());
            if n < 0 {
                let one = auto_constant(e, dst, 1.0)?;
                return Ok(e.b.ins().fdiv(one, positive));
            }
            return Ok(positive);
        }

        let exp = auto_constant(e, dst, exponent)?;
        let callee = if dst.bits() == 64 {
            e.pow_ref()
        } else {
            e.powf_ref()
        };
        let call = e.b.ins().call(callee, &[promoted, exp]);
        Ok(e.b.inst_results(call)[0])
    }
}

/// Inline square-and-multiply chain for `base^n`, `n >= 1`: the exponent is a
/// compile-time constant, so the chain is O(log n) multiplies.
fn emit_powi(e: &mut Emitter, dst: &MatrixHeader, base: Value, mut n: u64) -> Value {
    let mut result: Option<Value> = None;
    let mut square = base;
    while n > 0 {
        if n & 1 == 1 {
            result = Some(match result {
                None => square,
                Some(acc) => emit_multiply(e, dst, acc, square),
            });
        }
        n >>= 1;
        if n > 0 {
            square = emit_multiply(e, dst, square, square);
        }
    }
    result.expect("exponent is at least 1")
}

/// `quantize(a, b)` is defined as
/// `stitch([scale(a), add(b), clamp(0,255), cast(u8)])` and has no other
/// implementation.
#[must_use]
pub fn quantize(a: f64, b: f64) -> PrimitiveKernel {
    PrimitiveKernel::Stitch(vec![
        PrimitiveKernel::Scale(a),
        PrimitiveKernel::Add(b),
        PrimitiveKernel::Clamp {
            min: 0.0,
            max: 255.0,
        },
        PrimitiveKernel::Cast(ElementType::U8),
    ])
}

/// Formats a configuration number without a trailing fraction when integral.
#[must_use]
pub fn format_number(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn header(element: ElementType, shape: [i32; 4]) -> MatrixHeader {
        MatrixHeader::with_shape(element, shape).unwrap()
    }

    #[test]
    fn test_elementwise_preallocate_keeps_type() {
        let src = header(ElementType::S8, [1, 2, 2, 1]);
        for kernel in [
            PrimitiveKernel::Square,
            PrimitiveKernel::Scale(2.0),
            PrimitiveKernel::Add(1.0),
            PrimitiveKernel::Abs,
            PrimitiveKernel::Clamp {
                min: 0.0,
                max: 10.0,
            },
        ] {
            let dst = kernel.preallocate(&src).unwrap();
            assert_eq!(dst.element_type().unwrap(), ElementType::S8);
            assert_eq!(dst.shape(), src.shape());
            assert_eq!(dst.elements(), src.elements());
        }
    }

    #[test]
    fn test_cast_preallocate_sets_type() {
        let src = header(ElementType::U8, [3, 4, 4, 1]);
        let dst = PrimitiveKernel::Cast(ElementType::F32)
            .preallocate(&src)
            .unwrap();
        assert_eq!(dst.element_type().unwrap(), ElementType::F32);
        assert_eq!(dst.shape(), src.shape());
    }

    #[test]
    fn test_pow_promotes_to_float() {
        let dst = PrimitiveKernel::Pow(2.0)
            .preallocate(&header(ElementType::S8, [1, 2, 2, 1]))
            .unwrap();
        assert_eq!(dst.element_type().unwrap(), ElementType::F32);

        let dst = PrimitiveKernel::Pow(0.5)
            .preallocate(&header(ElementType::F64, [1, 2, 2, 1]))
            .unwrap();
        assert_eq!(dst.element_type().unwrap(), ElementType::F64);
    }

    #[test]
    fn test_quantize_expansion() {
        let kernel = quantize(1.0, 0.0);
        assert_eq!(
            kernel.descriptor(),
            "stitch([scale(1),add(0),clamp(0,255),cast(u8)])"
        );
        let dst = kernel
            .preallocate(&header(ElementType::F32, [1, 2, 2, 1]))
            .unwrap();
        assert_eq!(dst.element_type().unwrap(), ElementType::U8);
    }

    #[test]
    fn test_stitch_preallocate_folds() {
        let kernel = PrimitiveKernel::Stitch(vec![
            PrimitiveKernel::Pow(2.0),
            PrimitiveKernel::Cast(ElementType::S16),
        ]);
        let dst = kernel
            .preallocate(&header(ElementType::U8, [2, 2, 2, 2]))
            .unwrap();
        assert_eq!(dst.element_type().unwrap(), ElementType::S16);
        assert_eq!(dst.elements(), 16);
    }

    #[test]
    fn test_descriptor_round_trip_text() {
        assert_eq!(PrimitiveKernel::Scale(2.5).descriptor(), "scale(2.5)");
        assert_eq!(PrimitiveKernel::Abs.descriptor(), "abs");
        assert_eq!(
            PrimitiveKernel::Clamp {
                min: 0.0,
                max: 255.0
            }
            .descriptor(),
            "clamp(0,255)"
        );
    }
}
