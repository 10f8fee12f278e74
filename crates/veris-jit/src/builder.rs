//! Kernel Builder - IR Emission Helpers Bound to a Matrix
//!
//! `Emitter` wraps the function under construction (builder, module handle,
//! host helper ids, loop scaffolding); `KernelBuilder` binds a compile-time
//! matrix descriptor to the runtime header pointer of a kernel argument and
//! exposes typed header access, index arithmetic, and element operations.
//!
//! Specialization happens here: every accessor consults the descriptor's
//! fingerprint, so a degenerate axis reads as a constant `1`, a multiply by a
//! statically-1 step is elided, and loads/stores/arithmetic pick the
//! instruction matching the element type.
//!
//! @version 0.1.0
//! @author Veris Development Team

use cranelift::codegen::ir::FuncRef;
use cranelift::prelude::*;
use cranelift_jit::JITModule;
use cranelift_module::{DataId, FuncId, Module};

use veris_core::element::ElementType;
use veris_core::error::{Error, Result};
use veris_matrix::header::{
    MatrixHeader, CHANNELS_OFFSET, COLUMNS_OFFSET, DATA_OFFSET, FRAMES_OFFSET, HASH_OFFSET,
    ROWS_OFFSET,
};

// =============================================================================
// Type mapping
// =============================================================================

/// Maps an element type to the machine type carrying it. One-bit elements are
/// stored one byte per element and carried as `i8`.
#[must_use]
pub fn clif_type(element: ElementType) -> Type {
    match element {
        ElementType::U1 | ElementType::U8 | ElementType::S8 => types::I8,
        ElementType::U16 | ElementType::S16 => types::I16,
        ElementType::U32 | ElementType::S32 => types::I32,
        ElementType::U64 | ElementType::S64 => types::I64,
        ElementType::F16 => types::F16,
        ElementType::F32 => types::F32,
        ElementType::F64 => types::F64,
    }
}

// =============================================================================
// Emitter
// =============================================================================

/// A counted loop in flight: the loop block and its induction value.
#[derive(Clone, Copy)]
pub struct KernelLoop {
    /// The loop header/body block carrying the induction parameter.
    pub block: Block,
    /// The induction value, counting `0..limit`.
    pub index: Value,
}

/// Function-wide emission state: the Cranelift builder plus the module
/// handle needed to reference host helpers from inside the function.
pub struct Emitter<'a> {
    /// The Cranelift function builder at the current insertion point.
    pub b: FunctionBuilder<'a>,
    module: &'a mut JITModule,
    ptr_type: Type,
    malloc: FuncId,
    powf: FuncId,
    pow: FuncId,
    next_var: usize,
}

impl<'a> Emitter<'a> {
    /// Binds an emitter to a function under construction.
    pub fn new(
        b: FunctionBuilder<'a>,
        module: &'a mut JITModule,
        ptr_type: Type,
        malloc: FuncId,
        powf: FuncId,
        pow: FuncId,
    ) -> Self {
        Self {
            b,
            module,
            ptr_type,
            malloc,
            powf,
            pow,
            next_var: 0,
        }
    }

    /// The target's pointer type.
    #[must_use]
    pub fn ptr_type(&self) -> Type {
        self.ptr_type
    }

    /// The module being compiled into.
    pub fn module(&mut self) -> &mut JITModule {
        self.module
    }

    /// Declares a fresh SSA variable of the given type.
    pub fn new_var(&mut self, ty: Type) -> Variable {
        let var = Variable::new(self.next_var);
        self.next_var += 1;
        self.b.declare_var(var, ty);
        var
    }

    fn func_ref(&mut self, id: FuncId) -> FuncRef {
        self.module.declare_func_in_func(id, self.b.func)
    }

    /// The address of a declared function as a pointer value.
    pub fn func_addr_of(&mut self, id: FuncId) -> Value {
        let func_ref = self.func_ref(id);
        let ty = self.ptr_type;
        self.b.ins().func_addr(ty, func_ref)
    }

    /// The address of a module data object as a pointer value.
    pub fn data_addr(&mut self, id: DataId) -> Value {
        let gv = self.module.declare_data_in_func(id, self.b.func);
        let ty = self.ptr_type;
        self.b.ins().symbol_value(ty, gv)
    }

    /// Reference to the host `malloc`.
    pub fn malloc_ref(&mut self) -> FuncRef {
        let id = self.malloc;
        self.func_ref(id)
    }

    /// Reference to the `f32` power helper.
    pub fn powf_ref(&mut self) -> FuncRef {
        let id = self.powf;
        self.func_ref(id)
    }

    /// Reference to the `f64` power helper.
    pub fn pow_ref(&mut self) -> FuncRef {
        let id = self.pow;
        self.func_ref(id)
    }

    /// Opens a counted loop at the current insertion point and leaves the
    /// builder inside it. Loops nest by keeping the returned handles on a
    /// stack and closing them in reverse order.
    pub fn begin_loop(&mut self) -> KernelLoop {
        let zero = self.b.ins().iconst(types::I32, 0);
        let block = self.b.create_block();
        let index = self.b.append_block_param(block, types::I32);
        self.b.ins().jump(block, &[zero]);
        self.b.switch_to_block(block);
        KernelLoop { block, index }
    }

    /// Closes a counted loop over `[0, limit)` with unit stride and leaves
    /// the builder in the exit block.
    pub fn end_loop(&mut self, lp: KernelLoop, limit: Value) {
        let latch = self.b.create_block();
        self.b.ins().jump(latch, &[]);
        self.b.switch_to_block(latch);
        self.b.seal_block(latch);

        let next = self.b.ins().iadd_imm(lp.index, 1);
        let done = self.b.ins().icmp(IntCC::Equal, next, limit);
        let exit = self.b.create_block();
        self.b.ins().brif(done, exit, &[], lp.block, &[next]);
        self.b.seal_block(lp.block);
        self.b.switch_to_block(exit);
        self.b.seal_block(exit);
    }

    /// Finishes emission, releasing the underlying builder.
    pub fn finish(self) {
        self.b.finalize();
    }
}

// =============================================================================
// Descriptor-driven value helpers
// =============================================================================

/// Materializes `value` as a constant of the descriptor's element type.
pub fn auto_constant(e: &mut Emitter, desc: &MatrixHeader, value: f64) -> Result<Value> {
    let element = desc.element_type()?;
    Ok(match element {
        ElementType::F64 => e.b.ins().f64const(value),
        ElementType::F32 => e.b.ins().f32const(value as f32),
        ElementType::F16 => {
            return Err(Error::compile("f16 constant materialization not supported"))
        }
        _ => e.b.ins().iconst(clif_type(element), value as i64),
    })
}

/// Integer or floating add, chosen by the descriptor.
pub fn emit_add(e: &mut Emitter, desc: &MatrixHeader, a: Value, b: Value) -> Value {
    if desc.is_floating() {
        e.b.ins().fadd(a, b)
    } else {
        e.b.ins().iadd(a, b)
    }
}

/// Integer or floating multiply, chosen by the descriptor.
pub fn emit_multiply(e: &mut Emitter, desc: &MatrixHeader, a: Value, b: Value) -> Value {
    if desc.is_floating() {
        e.b.ins().fmul(a, b)
    } else {
        e.b.ins().imul(a, b)
    }
}

/// Ordered-float or signed/unsigned-integer `a < b`.
pub fn emit_compare_lt(e: &mut Emitter, desc: &MatrixHeader, a: Value, b: Value) -> Value {
    if desc.is_floating() {
        e.b.ins().fcmp(FloatCC::LessThan, a, b)
    } else if desc.is_signed() {
        e.b.ins().icmp(IntCC::SignedLessThan, a, b)
    } else {
        e.b.ins().icmp(IntCC::UnsignedLessThan, a, b)
    }
}

/// Ordered-float or signed/unsigned-integer `a > b`.
pub fn emit_compare_gt(e: &mut Emitter, desc: &MatrixHeader, a: Value, b: Value) -> Value {
    if desc.is_floating() {
        e.b.ins().fcmp(FloatCC::GreaterThan, a, b)
    } else if desc.is_signed() {
        e.b.ins().icmp(IntCC::SignedGreaterThan, a, b)
    } else {
        e.b.ins().icmp(IntCC::UnsignedGreaterThan, a, b)
    }
}

/// Converts `v` between element types following standard casting: widen by
/// the source's signedness, truncate to narrow, IEEE promote/demote, and
/// saturating float→int conversion.
pub fn emit_cast(
    e: &mut Emitter,
    from: &MatrixHeader,
    to: &MatrixHeader,
    v: Value,
) -> Result<Value> {
    let from_ty = from.element_type()?;
    let to_ty = to.element_type()?;
    if from_ty == to_ty {
        return Ok(v);
    }
    let from_t = clif_type(from_ty);
    let to_t = clif_type(to_ty);

    Ok(match (from_ty.is_floating(), to_ty.is_floating()) {
        (true, true) => {
            if to_t.bits() > from_t.bits() {
                e.b.ins().fpromote(to_t, v)
            } else if to_t.bits() < from_t.bits() {
                e.b.ins().fdemote(to_t, v)
            } else {
                v
            }
        }
        (false, true) => {
            // Stage sub-word integers at 32 bits by the source's signedness.
            let staged = if from_t.bits() < 32 {
                if from_ty.is_signed() {
                    e.b.ins().sextend(types::I32, v)
                } else {
                    e.b.ins().uextend(types::I32, v)
                }
            } else {
                v
            };
            let wide = if to_t == types::F16 { types::F32 } else { to_t };
            let float = if from_ty.is_signed() {
                e.b.ins().fcvt_from_sint(wide, staged)
            } else {
                e.b.ins().fcvt_from_uint(wide, staged)
            };
            if to_t == types::F16 {
                e.b.ins().fdemote(types::F16, float)
            } else {
                float
            }
        }
        (true, false) => {
            let staged = if from_t == types::F16 {
                e.b.ins().fpromote(types::F32, v)
            } else {
                v
            };
            let stage_t = if to_t.bits() >= 64 {
                types::I64
            } else {
                types::I32
            };
            let int = if to_ty.is_signed() {
                e.b.ins().fcvt_to_sint_sat(stage_t, staged)
            } else {
                e.b.ins().fcvt_to_uint_sat(stage_t, staged)
            };
            if to_t.bits() < stage_t.bits() {
                e.b.ins().ireduce(to_t, int)
            } else {
                int
            }
        }
        (false, false) => {
            if to_t.bits() > from_t.bits() {
                if from_ty.is_signed() {
                    e.b.ins().sextend(to_t, v)
                } else {
                    e.b.ins().uextend(to_t, v)
                }
            } else if to_t.bits() < from_t.bits() {
                e.b.ins().ireduce(to_t, v)
            } else {
                // Same width, signedness reinterpretation only.
                v
            }
        }
    })
}

// =============================================================================
// KernelBuilder
// =============================================================================

/// IR-emission helpers bound to one kernel argument: the compile-time
/// descriptor (the specialization's fingerprint and the sample extents used
/// for alias decisions) plus the runtime header pointer.
pub struct KernelBuilder {
    desc: MatrixHeader,
    ptr: Value,
}

impl KernelBuilder {
    /// Binds a descriptor to a runtime header pointer.
    #[must_use]
    pub fn new(desc: MatrixHeader, ptr: Value) -> Self {
        Self { desc, ptr }
    }

    /// The compile-time descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &MatrixHeader {
        &self.desc
    }

    /// The machine type of one element.
    pub fn value_type(&self) -> Result<Type> {
        Ok(clif_type(self.desc.element_type()?))
    }

    // -------------------------------------------------------------------------
    // Header access
    // -------------------------------------------------------------------------

    fn load_field(&self, e: &mut Emitter, ty: Type, offset: i32) -> Value {
        e.b.ins().load(ty, MemFlags::new(), self.ptr, offset)
    }

    fn store_field(&self, e: &mut Emitter, value: Value, offset: i32) {
        e.b.ins().store(MemFlags::new(), value, self.ptr, offset);
    }

    /// The element storage pointer.
    pub fn data(&self, e: &mut Emitter) -> Value {
        let ty = e.ptr_type();
        self.load_field(e, ty, DATA_OFFSET)
    }

    /// Channel extent; constant `1` when the axis is statically degenerate.
    pub fn channels(&self, e: &mut Emitter) -> Value {
        if self.desc.single_channel() {
            e.b.ins().iconst(types::I32, 1)
        } else {
            self.load_field(e, types::I32, CHANNELS_OFFSET)
        }
    }

    /// Column extent; constant `1` when the axis is statically degenerate.
    pub fn columns(&self, e: &mut Emitter) -> Value {
        if self.desc.single_column() {
            e.b.ins().iconst(types::I32, 1)
        } else {
            self.load_field(e, types::I32, COLUMNS_OFFSET)
        }
    }

    /// Row extent; constant `1` when the axis is statically degenerate.
    pub fn rows(&self, e: &mut Emitter) -> Value {
        if self.desc.single_row() {
            e.b.ins().iconst(types::I32, 1)
        } else {
            self.load_field(e, types::I32, ROWS_OFFSET)
        }
    }

    /// Frame extent; constant `1` when the axis is statically degenerate.
    pub fn frames(&self, e: &mut Emitter) -> Value {
        if self.desc.single_frame() {
            e.b.ins().iconst(types::I32, 1)
        } else {
            self.load_field(e, types::I32, FRAMES_OFFSET)
        }
    }

    /// The runtime fingerprint.
    pub fn hash_value(&self, e: &mut Emitter) -> Value {
        self.load_field(e, types::I16, HASH_OFFSET)
    }

    /// Stores the element storage pointer.
    pub fn set_data(&self, e: &mut Emitter, value: Value) {
        self.store_field(e, value, DATA_OFFSET);
    }

    // -------------------------------------------------------------------------
    // Shape derivations
    // -------------------------------------------------------------------------

    /// Size of the element index space, with statically-1 factors elided.
    pub fn elements(&self, e: &mut Emitter) -> Value {
        let mut product: Option<Value> = None;
        for (single, offset) in [
            (self.desc.single_channel(), CHANNELS_OFFSET),
            (self.desc.single_column(), COLUMNS_OFFSET),
            (self.desc.single_row(), ROWS_OFFSET),
            (self.desc.single_frame(), FRAMES_OFFSET),
        ] {
            if single {
                continue;
            }
            let extent = self.load_field(e, types::I32, offset);
            product = Some(match product {
                None => extent,
                Some(acc) => e.b.ins().imul(acc, extent),
            });
        }
        product.unwrap_or_else(|| e.b.ins().iconst(types::I32, 1))
    }

    /// Packed storage size in bytes.
    pub fn bytes(&self, e: &mut Emitter) -> Value {
        let elements = self.elements(e);
        let size = (i64::from(self.desc.bits()) + 7) / 8;
        e.b.ins().imul_imm(elements, size)
    }

    /// `column_step = channels`.
    pub fn column_step(&self, e: &mut Emitter) -> Value {
        self.channels(e)
    }

    /// `row_step = columns × column_step`, elided when a factor is
    /// statically 1.
    pub fn row_step(&self, e: &mut Emitter) -> Value {
        if self.desc.single_column() {
            self.column_step(e)
        } else if self.desc.single_channel() {
            self.columns(e)
        } else {
            let columns = self.columns(e);
            let step = self.column_step(e);
            e.b.ins().imul(columns, step)
        }
    }

    /// `frame_step = rows × row_step`, elided when a factor is statically 1.
    pub fn frame_step(&self, e: &mut Emitter) -> Value {
        if self.desc.single_row() {
            self.row_step(e)
        } else if self.desc.single_column() && self.desc.single_channel() {
            self.rows(e)
        } else {
            let rows = self.rows(e);
            let step = self.row_step(e);
            e.b.ins().imul(rows, step)
        }
    }

    // Alias steps: when this matrix and `other` have identical static extent
    // on an axis, the optimizer can prove the steps equal if we borrow them
    // outright.

    fn alias_column_step(&self, other: &KernelBuilder, e: &mut Emitter) -> Value {
        if self.desc.channels == other.desc.channels {
            other.column_step(e)
        } else {
            self.column_step(e)
        }
    }

    fn alias_row_step(&self, other: &KernelBuilder, e: &mut Emitter) -> Value {
        if self.desc.columns == other.desc.columns {
            other.row_step(e)
        } else {
            self.row_step(e)
        }
    }

    fn alias_frame_step(&self, other: &KernelBuilder, e: &mut Emitter) -> Value {
        if self.desc.rows == other.desc.rows {
            other.frame_step(e)
        } else {
            self.frame_step(e)
        }
    }

    // -------------------------------------------------------------------------
    // Index arithmetic
    // -------------------------------------------------------------------------

    fn index_c(&self, e: &mut Emitter, c: Value) -> Value {
        if self.desc.single_channel() {
            e.b.ins().iconst(types::I32, 0)
        } else {
            c
        }
    }

    fn index_cx(&self, e: &mut Emitter, c: Value, x: Value) -> Value {
        if self.desc.single_column() {
            self.index_c(e, c)
        } else {
            let step = self.column_step(e);
            let offset = e.b.ins().imul(x, step);
            let inner = self.index_c(e, c);
            e.b.ins().iadd(offset, inner)
        }
    }

    fn index_cxy(&self, e: &mut Emitter, c: Value, x: Value, y: Value) -> Value {
        if self.desc.single_row() {
            self.index_cx(e, c, x)
        } else {
            let step = self.row_step(e);
            let offset = e.b.ins().imul(y, step);
            let inner = self.index_cx(e, c, x);
            e.b.ins().iadd(offset, inner)
        }
    }

    /// Flat element index of coordinates `(c, x, y, t)`.
    pub fn index(&self, e: &mut Emitter, c: Value, x: Value, y: Value, t: Value) -> Value {
        if self.desc.single_frame() {
            self.index_cxy(e, c, x, y)
        } else {
            let step = self.frame_step(e);
            let offset = e.b.ins().imul(t, step);
            let inner = self.index_cxy(e, c, x, y);
            e.b.ins().iadd(offset, inner)
        }
    }

    fn alias_index_cx(&self, other: &KernelBuilder, e: &mut Emitter, c: Value, x: Value) -> Value {
        if self.desc.single_column() {
            self.index_c(e, c)
        } else {
            let step = self.alias_column_step(other, e);
            let offset = e.b.ins().imul(x, step);
            let inner = self.index_c(e, c);
            e.b.ins().iadd(offset, inner)
        }
    }

    fn alias_index_cxy(
        &self,
        other: &KernelBuilder,
        e: &mut Emitter,
        c: Value,
        x: Value,
        y: Value,
    ) -> Value {
        if self.desc.single_row() {
            self.alias_index_cx(other, e, c, x)
        } else {
            let step = self.alias_row_step(other, e);
            let offset = e.b.ins().imul(y, step);
            let inner = self.alias_index_cx(other, e, c, x);
            e.b.ins().iadd(offset, inner)
        }
    }

    /// Flat element index of `(c, x, y, t)`, borrowing step values from
    /// `other` on axes with identical static extent.
    pub fn alias_index(
        &self,
        other: &KernelBuilder,
        e: &mut Emitter,
        c: Value,
        x: Value,
        y: Value,
        t: Value,
    ) -> Value {
        if self.desc.single_frame() {
            self.alias_index_cxy(other, e, c, x, y)
        } else {
            let step = self.alias_frame_step(other, e);
            let offset = e.b.ins().imul(t, step);
            let inner = self.alias_index_cxy(other, e, c, x, y);
            e.b.ins().iadd(offset, inner)
        }
    }

    /// Decomposes a flat index into `(c, x, y, t)` by repeated `urem`/`udiv`
    /// against the step chain, producing constant `0` for degenerate axes
    /// without emitting arithmetic.
    pub fn deindex(&self, e: &mut Emitter, i: Value) -> [Value; 4] {
        let zero = e.b.ins().iconst(types::I32, 0);

        let (t, rem) = if self.desc.single_frame() {
            (zero, i)
        } else {
            let step = self.frame_step(e);
            let rem = e.b.ins().urem(i, step);
            let diff = e.b.ins().isub(i, rem);
            let t = e.b.ins().udiv(diff, step);
            (t, rem)
        };

        let (y, rem) = if self.desc.single_row() {
            (zero, rem)
        } else {
            let step = self.row_step(e);
            let r = e.b.ins().urem(rem, step);
            let diff = e.b.ins().isub(rem, r);
            let y = e.b.ins().udiv(diff, step);
            (y, r)
        };

        let (x, rem) = if self.desc.single_column() {
            (zero, rem)
        } else {
            let step = self.column_step(e);
            let r = e.b.ins().urem(rem, step);
            let diff = e.b.ins().isub(rem, r);
            let x = e.b.ins().udiv(diff, step);
            (x, r)
        };

        let c = if self.desc.single_channel() { zero } else { rem };

        [c, x, y, t]
    }

    // -------------------------------------------------------------------------
    // Typed element operations
    // -------------------------------------------------------------------------

    fn element_address(&self, e: &mut Emitter, i: Value) -> Value {
        let data = self.data(e);
        let index = if e.ptr_type() == types::I32 {
            i
        } else {
            let ty = e.ptr_type();
            e.b.ins().uextend(ty, i)
        };
        let size = (i64::from(self.desc.bits()) + 7) / 8;
        let offset = e.b.ins().imul_imm(index, size);
        e.b.ins().iadd(data, offset)
    }

    /// Loads element `i`.
    pub fn load(&self, e: &mut Emitter, i: Value) -> Result<Value> {
        let ty = self.value_type()?;
        let addr = self.element_address(e, i);
        Ok(e.b.ins().load(ty, MemFlags::new(), addr, 0))
    }

    /// Stores `value` into element `i`.
    pub fn store(&self, e: &mut Emitter, i: Value, value: Value) {
        let addr = self.element_address(e, i);
        e.b.ins().store(MemFlags::new(), value, addr, 0);
    }

    /// Casts `v` from this matrix's element type to `dst`'s.
    pub fn cast(&self, e: &mut Emitter, v: Value, dst: &KernelBuilder) -> Result<Value> {
        emit_cast(e, &self.desc, &dst.desc, v)
    }

    /// Integer or floating add in this matrix's element type.
    pub fn add(&self, e: &mut Emitter, a: Value, b: Value) -> Value {
        emit_add(e, &self.desc, a, b)
    }

    /// Integer or floating multiply in this matrix's element type.
    pub fn multiply(&self, e: &mut Emitter, a: Value, b: Value) -> Value {
        emit_multiply(e, &self.desc, a, b)
    }

    /// Materializes a constant of this matrix's element type.
    pub fn auto_constant(&self, e: &mut Emitter, value: f64) -> Result<Value> {
        auto_constant(e, &self.desc, value)
    }

    // -------------------------------------------------------------------------
    // Allocation and preallocation
    // -------------------------------------------------------------------------

    /// Computes `bytes` from the header and calls the host `malloc`, storing
    /// the returned pointer into the data field.
    pub fn allocate(&self, e: &mut Emitter) {
        let bytes = self.bytes(e);
        let size = if e.ptr_type() == types::I32 {
            bytes
        } else {
            let ty = e.ptr_type();
            e.b.ins().uextend(ty, bytes)
        };
        let malloc = e.malloc_ref();
        let call = e.b.ins().call(malloc, &[size]);
        let ptr = e.b.inst_results(call)[0];
        self.set_data(e, ptr);
    }

    /// Writes this header's extents and fingerprint from `src` following the
    /// static preallocation policy: an axis the destination descriptor marks
    /// degenerate is stored as `1`, every other extent is copied from the
    /// source, and the fingerprint is the destination descriptor's constant.
    pub fn preallocate_from(&self, e: &mut Emitter, src: &KernelBuilder) {
        for (single, offset) in [
            (self.desc.single_channel(), CHANNELS_OFFSET),
            (self.desc.single_column(), COLUMNS_OFFSET),
            (self.desc.single_row(), ROWS_OFFSET),
            (self.desc.single_frame(), FRAMES_OFFSET),
        ] {
            let extent = if single {
                e.b.ins().iconst(types::I32, 1)
            } else {
                src.load_field(e, types::I32, offset)
            };
            self.store_field(e, extent, offset);
        }
        let hash = e.b.ins().iconst(types::I16, i64::from(self.desc.hash));
        self.store_field(e, hash, HASH_OFFSET);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clif_type_mapping() {
        assert_eq!(clif_type(ElementType::U1), types::I8);
        assert_eq!(clif_type(ElementType::S8), types::I8);
        assert_eq!(clif_type(ElementType::U16), types::I16);
        assert_eq!(clif_type(ElementType::F32), types::F32);
        assert_eq!(clif_type(ElementType::F64), types::F64);
    }
}
