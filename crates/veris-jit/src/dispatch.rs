//! Dispatch - Kernel Wrappers, Specialization, and Trampolines
//!
//! A kernel wrapper caches the native entry point compiled for the last seen
//! input fingerprint. Dispatch compares fingerprints lock-free; a miss takes
//! the process-wide compile lock, double-checks, compiles whatever is missing
//! (specialization and trampoline), and publishes the entry with a release
//! store. The module retains every compiled specialization for the process
//! lifetime, so switching back to a previously seen fingerprint is a lookup,
//! not a recompilation.
//!
//! Each specialization is fronted by a JIT-compiled trampoline:
//!
//! ```text
//! if (src.hash != $cached_hash_global) {
//!     $kernel_function_global = &specialized_kernel;
//!     $cached_hash_global     = src.hash;
//! }
//! preallocate_dst_header_from_src_header();
//! dst.data = malloc(dst.bytes);
//! specialized_kernel(&src, &dst, dst.elements);
//! ```
//!
//! `$kernel_function_global` and `$cached_hash_global` are per-family module
//! globals, so kernel instances with the same configuration share both code
//! and re-specialization state. The call targets the trampoline's own
//! specialization rather than the pointer slot: the two agree whenever the
//! cached fingerprint matches, and the direct form stays correct when
//! concurrent dispatch under differing fingerprints interleaves slot updates.
//!
//! @version 0.1.0
//! @author Veris Development Team

use std::sync::atomic::{AtomicPtr, Ordering};

use cranelift::prelude::*;
use cranelift_module::{FuncId, Linkage, Module};

use veris_core::error::{Error, Result};
use veris_matrix::header::MatrixHeader;
use veris_matrix::matrix::Matrix;

use crate::builder::{Emitter, KernelBuilder};
use crate::context::{
    self, CachedBinaryKernel, CachedKernel, CodegenContext, FamilyGlobals,
};
use crate::kernel::PrimitiveKernel;
use crate::reduce::SumKernel;
use crate::registry;

/// Native signature of a unary specialization.
pub type UnaryKernelFn =
    unsafe extern "C" fn(*const MatrixHeader, *mut MatrixHeader, i32);
/// Native signature of a binary specialization.
pub type BinaryKernelFn =
    unsafe extern "C" fn(*const MatrixHeader, *const MatrixHeader, *mut MatrixHeader, i32);

type UnaryTrampolineFn = unsafe extern "C" fn(*const MatrixHeader, *mut MatrixHeader);
type BinaryTrampolineFn =
    unsafe extern "C" fn(*const MatrixHeader, *const MatrixHeader, *mut MatrixHeader);

// =============================================================================
// Kernel kinds
// =============================================================================

/// The two kernel capabilities: a stitchable primitive driven by the shared
/// element-wise loop, or a reducer emitting its own loop nest per output
/// element.
#[derive(Debug, Clone, PartialEq)]
pub enum Kernel {
    /// A per-element primitive (possibly a fused stitch pipeline).
    Stitchable(PrimitiveKernel),
    /// An axis reducer.
    Reducer(SumKernel),
}

impl Kernel {
    /// The kernel family name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stitchable(primitive) => primitive.name(),
            Self::Reducer(sum) => sum.name(),
        }
    }

    /// The configuration argument string.
    #[must_use]
    pub fn arguments(&self) -> String {
        match self {
            Self::Stitchable(primitive) => primitive.arguments(),
            Self::Reducer(sum) => sum.arguments(),
        }
    }

    /// Derives the output descriptor for a given input descriptor.
    pub fn preallocate(&self, src: &MatrixHeader) -> Result<MatrixHeader> {
        match self {
            Self::Stitchable(primitive) => primitive.preallocate(src),
            Self::Reducer(sum) => sum.preallocate(src),
        }
    }

    /// Emits the body executed for output element `i` inside the shared
    /// counted loop.
    pub fn emit_element(
        &self,
        e: &mut Emitter,
        src: &KernelBuilder,
        dst: &KernelBuilder,
        i: Value,
    ) -> Result<()> {
        match self {
            Self::Stitchable(primitive) => {
                let value = src.load(e, i)?;
                let out = primitive.emit(e, src.descriptor(), dst.descriptor(), value)?;
                dst.store(e, i, out);
                Ok(())
            }
            Self::Reducer(sum) => sum.emit_body(e, src, dst, i),
        }
    }
}

// =============================================================================
// Unary compilation
// =============================================================================

fn module_error(e: cranelift_module::ModuleError) -> Error {
    Error::compile(e.to_string())
}

fn compile_unary_specialization(
    ctx: &mut CodegenContext,
    name: &str,
    kernel: &Kernel,
    src: &MatrixHeader,
    dst: &MatrixHeader,
) -> Result<FuncId> {
    let sig = ctx.unary_kernel_signature();
    let id = ctx
        .module
        .declare_function(name, Linkage::Export, &sig)
        .map_err(module_error)?;

    let mut cctx = ctx.module.make_context();
    cctx.func.signature = sig;
    let mut fbc = FunctionBuilderContext::new();
    {
        let (ptr_type, malloc, powf, pow) = (ctx.ptr_type, ctx.malloc, ctx.powf, ctx.pow);
        let builder = FunctionBuilder::new(&mut cctx.func, &mut fbc);
        let mut e = Emitter::new(builder, &mut ctx.module, ptr_type, malloc, powf, pow);

        let entry = e.b.create_block();
        e.b.append_block_params_for_function_params(entry);
        e.b.switch_to_block(entry);
        e.b.seal_block(entry);
        let src_ptr = e.b.block_params(entry)[0];
        let dst_ptr = e.b.block_params(entry)[1];
        let length = e.b.block_params(entry)[2];

        let src_kb = KernelBuilder::new(*src, src_ptr);
        let dst_kb = KernelBuilder::new(*dst, dst_ptr);

        let lp = e.begin_loop();
        kernel.emit_element(&mut e, &src_kb, &dst_kb, lp.index)?;
        e.end_loop(lp, length);
        e.b.ins().return_(&[]);
        e.finish();
    }

    ctx.optimize(&cctx.func)?;
    ctx.define(id, &mut cctx)?;
    Ok(id)
}

fn compile_unary_trampoline(
    ctx: &mut CodegenContext,
    key: &str,
    specialization: FuncId,
    globals: &FamilyGlobals,
    src: &MatrixHeader,
    dst: &MatrixHeader,
) -> Result<FuncId> {
    let sig = ctx.trampoline_signature(1);
    let kernel_sig = ctx.unary_kernel_signature();
    let name = format!("{key}_entry");
    let id = ctx
        .module
        .declare_function(&name, Linkage::Export, &sig)
        .map_err(module_error)?;

    let mut cctx = ctx.module.make_context();
    cctx.func.signature = sig;
    let mut fbc = FunctionBuilderContext::new();
    {
        let (ptr_type, malloc, powf, pow) = (ctx.ptr_type, ctx.malloc, ctx.powf, ctx.pow);
        let builder = FunctionBuilder::new(&mut cctx.func, &mut fbc);
        let mut e = Emitter::new(builder, &mut ctx.module, ptr_type, malloc, powf, pow);

        let entry = e.b.create_block();
        e.b.append_block_params_for_function_params(entry);
        e.b.switch_to_block(entry);
        e.b.seal_block(entry);
        let src_ptr = e.b.block_params(entry)[0];
        let dst_ptr = e.b.block_params(entry)[1];

        let src_kb = KernelBuilder::new(*src, src_ptr);
        let dst_kb = KernelBuilder::new(*dst, dst_ptr);

        // Global slot addresses and this specialization's address, emitted in
        // the entry block so they dominate every use below.
        let kernel_slot = e.data_addr(globals.kernel_slot);
        let hash_slot = e.data_addr(globals.hash_slots[0]);
        let spec_addr = e.func_addr_of(specialization);

        let src_hash = src_kb.hash_value(&mut e);
        let cached = e.b.ins().load(types::I16, MemFlags::new(), hash_slot, 0);
        let stale = e.b.ins().icmp(IntCC::NotEqual, src_hash, cached);

        let update = e.b.create_block();
        let cont = e.b.create_block();
        e.b.ins().brif(stale, update, &[], cont, &[]);
        e.b.seal_block(update);

        e.b.switch_to_block(update);
        e.b.ins().store(MemFlags::new(), spec_addr, kernel_slot, 0);
        e.b.ins().store(MemFlags::new(), src_hash, hash_slot, 0);
        e.b.ins().jump(cont, &[]);
        e.b.seal_block(cont);

        e.b.switch_to_block(cont);
        dst_kb.preallocate_from(&mut e, &src_kb);
        dst_kb.allocate(&mut e);
        let length = dst_kb.elements(&mut e);
        // Call the kernel the family globals now name. Families are shared by
        // equal configurations, so concurrent dispatch under differing
        // fingerprints may interleave slot updates; the call therefore uses
        // the matching specialization's address directly.
        let sig_ref = e.b.import_signature(kernel_sig);
        e.b.ins()
            .call_indirect(sig_ref, spec_addr, &[src_ptr, dst_ptr, length]);
        e.b.ins().return_(&[]);
        e.finish();
    }

    ctx.optimize(&cctx.func)?;
    ctx.define(id, &mut cctx)?;
    Ok(id)
}

/// Ensures a specialization and trampoline exist for `(kernel, src.hash)` and
/// returns the published entry. Must be called with the compile lock held.
fn ensure_unary(
    ctx: &mut CodegenContext,
    kernel: &Kernel,
    src: &MatrixHeader,
) -> Result<&'static CachedKernel> {
    let family = registry::family_key(kernel.name(), &kernel.arguments());
    let key = format!("veris_{}_{}", family, src.fingerprint_string());
    if let Some(entry) = ctx.entry(&key) {
        return Ok(entry);
    }

    let dst = kernel.preallocate(src)?;
    let globals = ctx.family_globals(&family, 1)?;
    let specialization = compile_unary_specialization(ctx, &key, kernel, src, &dst)?;
    let trampoline = compile_unary_trampoline(ctx, &key, specialization, &globals, src, &dst)?;
    ctx.module
        .finalize_definitions()
        .map_err(module_error)?;

    let address = ctx.module.get_finalized_function(trampoline);
    let entry: &'static CachedKernel = Box::leak(Box::new(CachedKernel {
        hash: src.hash,
        trampoline: address,
    }));
    ctx.insert_entry(key.clone(), entry);
    ctx.count_specialization();
    log::debug!(
        "compiled {key} ({} specializations)",
        ctx.compiled_specializations()
    );
    Ok(entry)
}

// =============================================================================
// UnaryKernel wrapper
// =============================================================================

/// The public 1-in-1-out kernel shape: preallocation, allocation, and
/// invocation behind a fingerprint-keyed dispatch cache.
pub struct UnaryKernel {
    kernel: Kernel,
    cache: AtomicPtr<CachedKernel>,
}

impl UnaryKernel {
    /// Wraps a kernel for dispatch.
    #[must_use]
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            cache: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// Resolves a pipeline descriptor, e.g. `"quantize(1,0)"` or
    /// `"sum(columns)"`.
    pub fn from_descriptor(descriptor: &str) -> Result<Self> {
        Ok(Self::new(registry::resolve(descriptor)?))
    }

    /// The wrapped kernel.
    #[must_use]
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Derives the output descriptor for an input descriptor.
    pub fn preallocate(&self, src: &MatrixHeader) -> Result<MatrixHeader> {
        self.kernel.preallocate(src)
    }

    fn entry_for(&self, header: &MatrixHeader) -> Result<&'static CachedKernel> {
        let cached = self.cache.load(Ordering::Acquire);
        if !cached.is_null() {
            let entry = unsafe { &*cached };
            if entry.hash == header.hash {
                return Ok(entry);
            }
        }

        let mut ctx = context::global().lock();
        let cached = self.cache.load(Ordering::Relaxed);
        if !cached.is_null() {
            let entry = unsafe { &*cached };
            if entry.hash == header.hash {
                return Ok(entry);
            }
        }
        let entry = ensure_unary(&mut ctx, &self.kernel, header)?;
        self.cache
            .store(entry as *const CachedKernel as *mut CachedKernel, Ordering::Release);
        Ok(entry)
    }

    /// Compiles (or reuses) the specialization for the input's fingerprint,
    /// then invokes it: the trampoline preallocates and allocates the output
    /// and runs the kernel over its element index space.
    pub fn apply(&self, src: &Matrix) -> Result<Matrix> {
        let header = *src.header();
        header.element_type()?;
        let entry = self.entry_for(&header)?;

        let mut dst = MatrixHeader {
            data: core::ptr::null_mut(),
            channels: 0,
            columns: 0,
            rows: 0,
            frames: 0,
            hash: 0,
        };
        unsafe {
            let trampoline: UnaryTrampolineFn = core::mem::transmute(entry.trampoline);
            trampoline(src.header(), &mut dst);
        }
        if dst.data.is_null() {
            return Err(Error::Allocation { bytes: dst.bytes() });
        }
        Ok(unsafe { Matrix::from_owned_header(dst) })
    }
}

// =============================================================================
// Binary kernels
// =============================================================================

/// The 2-in-1-out emission contract. No binary primitive ships with the SDK;
/// the machinery (ABI, compilation, trampoline, dispatch) is complete and
/// specialized implementations provide the element semantics.
///
/// The destination descriptor returned by `preallocate` must keep every
/// non-degenerate extent equal to the first source's, because the trampoline
/// derives the runtime output header from the first source.
pub trait BinaryOp: Send + Sync {
    /// The kernel family name.
    fn name(&self) -> String;

    /// The configuration argument string.
    fn arguments(&self) -> String {
        String::new()
    }

    /// Derives the output descriptor from both input descriptors.
    fn preallocate(&self, a: &MatrixHeader, b: &MatrixHeader) -> Result<MatrixHeader>;

    /// Emits the body executed for output element `i`; loads from both
    /// sources are the implementation's responsibility.
    fn emit_element(
        &self,
        e: &mut Emitter,
        a: &KernelBuilder,
        b: &KernelBuilder,
        dst: &KernelBuilder,
        i: Value,
    ) -> Result<()>;
}

fn compile_binary_specialization(
    ctx: &mut CodegenContext,
    name: &str,
    op: &dyn BinaryOp,
    a: &MatrixHeader,
    b: &MatrixHeader,
    dst: &MatrixHeader,
) -> Result<FuncId> {
    let sig = ctx.binary_kernel_signature();
    let id = ctx
        .module
        .declare_function(name, Linkage::Export, &sig)
        .map_err(module_error)?;

    let mut cctx = ctx.module.make_context();
    cctx.func.signature = sig;
    let mut fbc = FunctionBuilderContext::new();
    {
        let (ptr_type, malloc, powf, pow) = (ctx.ptr_type, ctx.malloc, ctx.powf, ctx.pow);
        let builder = FunctionBuilder::new(&mut cctx.func, &mut fbc);
        let mut e = Emitter::new(builder, &mut ctx.module, ptr_type, malloc, powf, pow);

        let entry = e.b.create_block();
        e.b.append_block_params_for_function_params(entry);
        e.b.switch_to_block(entry);
        e.b.seal_block(entry);
        let a_ptr = e.b.block_params(entry)[0];
        let b_ptr = e.b.block_params(entry)[1];
        let dst_ptr = e.b.block_params(entry)[2];
        let length = e.b.block_params(entry)[3];

        let a_kb = KernelBuilder::new(*a, a_ptr);
        let b_kb = KernelBuilder::new(*b, b_ptr);
        let dst_kb = KernelBuilder::new(*dst, dst_ptr);

        let lp = e.begin_loop();
        op.emit_element(&mut e, &a_kb, &b_kb, &dst_kb, lp.index)?;
        e.end_loop(lp, length);
        e.b.ins().return_(&[]);
        e.finish();
    }

    ctx.optimize(&cctx.func)?;
    ctx.define(id, &mut cctx)?;
    Ok(id)
}

fn compile_binary_trampoline(
    ctx: &mut CodegenContext,
    key: &str,
    specialization: FuncId,
    globals: &FamilyGlobals,
    a: &MatrixHeader,
    b: &MatrixHeader,
    dst: &MatrixHeader,
) -> Result<FuncId> {
    let sig = ctx.trampoline_signature(2);
    let kernel_sig = ctx.binary_kernel_signature();
    let name = format!("{key}_entry");
    let id = ctx
        .module
        .declare_function(&name, Linkage::Export, &sig)
        .map_err(module_error)?;

    let mut cctx = ctx.module.make_context();
    cctx.func.signature = sig;
    let mut fbc = FunctionBuilderContext::new();
    {
        let (ptr_type, malloc, powf, pow) = (ctx.ptr_type, ctx.malloc, ctx.powf, ctx.pow);
        let builder = FunctionBuilder::new(&mut cctx.func, &mut fbc);
        let mut e = Emitter::new(builder, &mut ctx.module, ptr_type, malloc, powf, pow);

        let entry = e.b.create_block();
        e.b.append_block_params_for_function_params(entry);
        e.b.switch_to_block(entry);
        e.b.seal_block(entry);
        let a_ptr = e.b.block_params(entry)[0];
        let b_ptr = e.b.block_params(entry)[1];
        let dst_ptr = e.b.block_params(entry)[2];

        let a_kb = KernelBuilder::new(*a, a_ptr);
        let b_kb = KernelBuilder::new(*b, b_ptr);
        let dst_kb = KernelBuilder::new(*dst, dst_ptr);

        let kernel_slot = e.data_addr(globals.kernel_slot);
        let hash_slot_a = e.data_addr(globals.hash_slots[0]);
        let hash_slot_b = e.data_addr(globals.hash_slots[1]);
        let spec_addr = e.func_addr_of(specialization);

        let hash_a = a_kb.hash_value(&mut e);
        let hash_b = b_kb.hash_value(&mut e);
        let cached_a = e.b.ins().load(types::I16, MemFlags::new(), hash_slot_a, 0);
        let cached_b = e.b.ins().load(types::I16, MemFlags::new(), hash_slot_b, 0);
        let stale_a = e.b.ins().icmp(IntCC::NotEqual, hash_a, cached_a);
        let stale_b = e.b.ins().icmp(IntCC::NotEqual, hash_b, cached_b);
        let stale = e.b.ins().bor(stale_a, stale_b);

        let update = e.b.create_block();
        let cont = e.b.create_block();
        e.b.ins().brif(stale, update, &[], cont, &[]);
        e.b.seal_block(update);

        e.b.switch_to_block(update);
        e.b.ins().store(MemFlags::new(), spec_addr, kernel_slot, 0);
        e.b.ins().store(MemFlags::new(), hash_a, hash_slot_a, 0);
        e.b.ins().store(MemFlags::new(), hash_b, hash_slot_b, 0);
        e.b.ins().jump(cont, &[]);
        e.b.seal_block(cont);

        e.b.switch_to_block(cont);
        dst_kb.preallocate_from(&mut e, &a_kb);
        dst_kb.allocate(&mut e);
        let length = dst_kb.elements(&mut e);
        let sig_ref = e.b.import_signature(kernel_sig);
        e.b.ins()
            .call_indirect(sig_ref, spec_addr, &[a_ptr, b_ptr, dst_ptr, length]);
        e.b.ins().return_(&[]);
        e.finish();
    }

    ctx.optimize(&cctx.func)?;
    ctx.define(id, &mut cctx)?;
    Ok(id)
}

fn ensure_binary(
    ctx: &mut CodegenContext,
    op: &dyn BinaryOp,
    a: &MatrixHeader,
    b: &MatrixHeader,
) -> Result<&'static CachedBinaryKernel> {
    let family = registry::family_key(&op.name(), &op.arguments());
    let key = format!(
        "veris_{}_{}_{}",
        family,
        a.fingerprint_string(),
        b.fingerprint_string()
    );
    if let Some(entry) = ctx.binary_entry(&key) {
        return Ok(entry);
    }

    let dst = op.preallocate(a, b)?;
    let globals = ctx.family_globals(&family, 2)?;
    let specialization = compile_binary_specialization(ctx, &key, op, a, b, &dst)?;
    let trampoline =
        compile_binary_trampoline(ctx, &key, specialization, &globals, a, b, &dst)?;
    ctx.module
        .finalize_definitions()
        .map_err(module_error)?;

    let address = ctx.module.get_finalized_function(trampoline);
    let entry: &'static CachedBinaryKernel = Box::leak(Box::new(CachedBinaryKernel {
        hash_a: a.hash,
        hash_b: b.hash,
        trampoline: address,
    }));
    ctx.insert_binary_entry(key.clone(), entry);
    ctx.count_specialization();
    log::debug!(
        "compiled {key} ({} specializations)",
        ctx.compiled_specializations()
    );
    Ok(entry)
}

/// The public 2-in-1-out kernel shape.
pub struct BinaryKernel {
    op: Box<dyn BinaryOp>,
    cache: AtomicPtr<CachedBinaryKernel>,
}

impl BinaryKernel {
    /// Wraps a binary operation for dispatch.
    #[must_use]
    pub fn new(op: Box<dyn BinaryOp>) -> Self {
        Self {
            op,
            cache: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    fn entry_for(
        &self,
        a: &MatrixHeader,
        b: &MatrixHeader,
    ) -> Result<&'static CachedBinaryKernel> {
        let cached = self.cache.load(Ordering::Acquire);
        if !cached.is_null() {
            let entry = unsafe { &*cached };
            if entry.hash_a == a.hash && entry.hash_b == b.hash {
                return Ok(entry);
            }
        }

        let mut ctx = context::global().lock();
        let cached = self.cache.load(Ordering::Relaxed);
        if !cached.is_null() {
            let entry = unsafe { &*cached };
            if entry.hash_a == a.hash && entry.hash_b == b.hash {
                return Ok(entry);
            }
        }
        let entry = ensure_binary(&mut ctx, self.op.as_ref(), a, b)?;
        self.cache.store(
            entry as *const CachedBinaryKernel as *mut CachedBinaryKernel,
            Ordering::Release,
        );
        Ok(entry)
    }

    /// Dispatches on both input fingerprints and invokes the specialization.
    pub fn apply(&self, a: &Matrix, b: &Matrix) -> Result<Matrix> {
        a.header().element_type()?;
        b.header().element_type()?;
        let entry = self.entry_for(a.header(), b.header())?;

        let mut dst = MatrixHeader {
            data: core::ptr::null_mut(),
            channels: 0,
            columns: 0,
            rows: 0,
            frames: 0,
            hash: 0,
        };
        unsafe {
            let trampoline: BinaryTrampolineFn = core::mem::transmute(entry.trampoline);
            trampoline(a.header(), b.header(), &mut dst);
        }
        if dst.data.is_null() {
            return Err(Error::Allocation { bytes: dst.bytes() });
        }
        Ok(unsafe { Matrix::from_owned_header(dst) })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use veris_core::element::ElementType;

    #[test]
    fn test_kernel_identity() {
        let kernel = Kernel::Stitchable(PrimitiveKernel::Scale(2.0));
        assert_eq!(kernel.name(), "scale");
        assert_eq!(kernel.arguments(), "2");

        let kernel = Kernel::Reducer(SumKernel::all());
        assert_eq!(kernel.name(), "sum");
    }

    #[test]
    fn test_wrapper_preallocate_passthrough() {
        let wrapper = UnaryKernel::from_descriptor("cast(f32)").unwrap();
        let src = MatrixHeader::with_shape(ElementType::U8, [1, 2, 2, 1]).unwrap();
        let dst = wrapper.preallocate(&src).unwrap();
        assert_eq!(dst.element_type().unwrap(), ElementType::F32);
        assert_eq!(dst.shape(), src.shape());
    }
}
