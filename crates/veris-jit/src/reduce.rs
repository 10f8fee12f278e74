//! Reducer Kernels - Axis Sums
//!
//! A reducer is not stitchable: it emits its own loop nest per output
//! element. `SumKernel` collapses a chosen subset of axes; the nest order is
//! always frames outermost down to channels innermost, which fixes the
//! accumulation order and therefore the floating-point rounding pattern.
//!
//! @version 0.1.0
//! @author Veris Development Team

use cranelift::prelude::*;

use veris_core::error::Result;
use veris_matrix::header::MatrixHeader;

use crate::builder::{auto_constant, emit_add, emit_cast, Emitter, KernelBuilder, KernelLoop};

// =============================================================================
// SumKernel
// =============================================================================

/// Sums over a subset of axes, collapsing each to extent 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SumKernel {
    /// Reduce over the channel axis.
    pub channels: bool,
    /// Reduce over the column axis.
    pub columns: bool,
    /// Reduce over the row axis.
    pub rows: bool,
    /// Reduce over the frame axis.
    pub frames: bool,
}

impl SumKernel {
    /// Sums over every axis, producing a single element.
    #[must_use]
    pub fn all() -> Self {
        Self {
            channels: true,
            columns: true,
            rows: true,
            frames: true,
        }
    }

    /// The kernel family name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        "sum"
    }

    /// The configuration argument string, used for cache identity.
    #[must_use]
    pub fn arguments(&self) -> String {
        let mut axes = Vec::new();
        if self.channels {
            axes.push("channels");
        }
        if self.columns {
            axes.push("columns");
        }
        if self.rows {
            axes.push("rows");
        }
        if self.frames {
            axes.push("frames");
        }
        axes.join(",")
    }

    /// Derives the output descriptor: reduced axes collapse to extent 1 and
    /// the element width is promoted to `min(2 × bits, floating ? 64 : 32)`,
    /// never below one byte.
    pub fn preallocate(&self, src: &MatrixHeader) -> Result<MatrixHeader> {
        let mut dst = *src;
        dst.set_extents([
            if self.channels { 1 } else { src.channels },
            if self.columns { 1 } else { src.columns },
            if self.rows { 1 } else { src.rows },
            if self.frames { 1 } else { src.frames },
        ]);
        let cap = if src.is_floating() { 64 } else { 32 };
        dst.set_bits((2 * src.bits()).min(cap).max(8));
        dst.element_type()?;
        Ok(dst)
    }

    /// Emits the reduction for output element `i`: deindex into the output
    /// coordinate space, accumulate over the reduced axes in the fixed nest
    /// order, store the accumulator.
    pub fn emit_body(
        &self,
        e: &mut Emitter,
        src: &KernelBuilder,
        dst: &KernelBuilder,
        i: Value,
    ) -> Result<()> {
        let [c, x, y, t] = dst.deindex(e, i);

        let acc_type = dst.value_type()?;
        let acc = e.new_var(acc_type);
        let zero = auto_constant(e, dst.descriptor(), 0.0)?;
        e.b.def_var(acc, zero);

        // Axes reduce outermost (frames) to innermost (channels); source axes
        // that are statically degenerate contribute no loop.
        let mut loops: Vec<KernelLoop> = Vec::new();

        let src_t = if self.frames && !src.descriptor().single_frame() {
            let lp = e.begin_loop();
            loops.push(lp);
            lp.index
        } else {
            t
        };

        let src_y = if self.rows && !src.descriptor().single_row() {
            let lp = e.begin_loop();
            loops.push(lp);
            lp.index
        } else {
            y
        };

        let src_x = if self.columns && !src.descriptor().single_column() {
            let lp = e.begin_loop();
            loops.push(lp);
            lp.index
        } else {
            x
        };

        let src_c = if self.channels && !src.descriptor().single_channel() {
            let lp = e.begin_loop();
            loops.push(lp);
            lp.index
        } else {
            c
        };

        let index = src.alias_index(dst, e, src_c, src_x, src_y, src_t);
        let element = src.load(e, index)?;
        let element = emit_cast(e, src.descriptor(), dst.descriptor(), element)?;
        let current = e.b.use_var(acc);
        let sum = emit_add(e, dst.descriptor(), current, element);
        e.b.def_var(acc, sum);

        if self.channels && !src.descriptor().single_channel() {
            let limit = src.channels(e);
            let lp = loops.pop().expect("channel loop open");
            e.end_loop(lp, limit);
        }
        if self.columns && !src.descriptor().single_column() {
            let limit = src.columns(e);
            let lp = loops.pop().expect("column loop open");
            e.end_loop(lp, limit);
        }
        if self.rows && !src.descriptor().single_row() {
            let limit = src.rows(e);
            let lp = loops.pop().expect("row loop open");
            e.end_loop(lp, limit);
        }
        if self.frames && !src.descriptor().single_frame() {
            let limit = src.frames(e);
            let lp = loops.pop().expect("frame loop open");
            e.end_loop(lp, limit);
        }

        let total = e.b.use_var(acc);
        dst.store(e, i, total);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use veris_core::element::ElementType;

    fn header(element: ElementType, shape: [i32; 4]) -> MatrixHeader {
        MatrixHeader::with_shape(element, shape).unwrap()
    }

    #[test]
    fn test_preallocate_collapses_axes() {
        let sum = SumKernel {
            channels: false,
            columns: true,
            rows: false,
            frames: false,
        };
        let dst = sum
            .preallocate(&header(ElementType::F32, [1, 4, 2, 1]))
            .unwrap();
        assert_eq!(dst.shape(), [1, 1, 2, 1]);
        assert!(dst.single_column());
        assert_eq!(dst.element_type().unwrap(), ElementType::F64);
    }

    #[test]
    fn test_preallocate_promotion_table() {
        let all = SumKernel::all();
        let cases = [
            (ElementType::U8, ElementType::U16),
            (ElementType::S8, ElementType::S16),
            (ElementType::S16, ElementType::S32),
            (ElementType::S32, ElementType::S32),
            (ElementType::U32, ElementType::U32),
            (ElementType::F32, ElementType::F64),
            (ElementType::F64, ElementType::F64),
            (ElementType::U1, ElementType::U8),
        ];
        for (src, expected) in cases {
            let dst = all.preallocate(&header(src, [2, 3, 4, 5])).unwrap();
            assert_eq!(dst.element_type().unwrap(), expected, "src {src}");
            assert_eq!(dst.shape(), [1, 1, 1, 1]);
        }
    }

    #[test]
    fn test_arguments_string() {
        assert_eq!(SumKernel::all().arguments(), "channels,columns,rows,frames");
        let columns_only = SumKernel {
            channels: false,
            columns: true,
            rows: false,
            frames: false,
        };
        assert_eq!(columns_only.arguments(), "columns");
    }
}
