//! Codegen Context - Process-Wide JIT Host
//!
//! One `CodegenContext` exists per process: it owns the Cranelift JIT module
//! and ISA, the host symbols compiled kernels may call (`malloc` and the
//! float power helpers), the per-family module globals, and the caches that
//! map mangled specialization names to compiled code. All mutation happens
//! under the process-wide compile lock returned by [`global`]; the dispatch
//! hot path never touches it.
//!
//! @version 0.1.0
//! @author Veris Development Team

use std::sync::OnceLock;

use cranelift::codegen::verifier::verify_function;
use cranelift::codegen::Context as ClifContext;
use cranelift::prelude::*;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{DataDescription, DataId, FuncId, Linkage, Module};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use veris_core::error::{Error, Result};

// =============================================================================
// Host helpers callable from generated code
// =============================================================================

extern "C" fn veris_powf(base: f32, exponent: f32) -> f32 {
    base.powf(exponent)
}

extern "C" fn veris_pow(base: f64, exponent: f64) -> f64 {
    base.powf(exponent)
}

// =============================================================================
// Configuration
// =============================================================================

/// Optimization level applied to every compiled function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    /// No optimization; fastest compilation.
    None,
    /// The backend's optimizing pipeline.
    Speed,
}

/// Configuration consumed once at context initialization.
#[derive(Debug, Clone)]
pub struct JitConfig {
    /// Optimization level for compiled kernels.
    pub opt_level: OptLevel,
    /// Run explicit IR verification on every freshly built function.
    pub verify: bool,
    /// Log the IR of every compiled function at debug level.
    pub dump_ir: bool,
}

impl JitConfig {
    /// Creates the default configuration: optimized, verified, no IR dump.
    #[must_use]
    pub fn new() -> Self {
        Self {
            opt_level: OptLevel::Speed,
            verify: true,
            dump_ir: false,
        }
    }

    /// Sets the optimization level.
    #[must_use]
    pub fn opt_level(mut self, level: OptLevel) -> Self {
        self.opt_level = level;
        self
    }

    /// Toggles explicit IR verification.
    #[must_use]
    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Toggles IR dumping.
    #[must_use]
    pub fn dump_ir(mut self, dump: bool) -> Self {
        self.dump_ir = dump;
        self
    }
}

impl Default for JitConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Cached dispatch entries
// =============================================================================

/// A published unary specialization: the fingerprint it was compiled for and
/// its trampoline entry point. Entries live as long as the module does, so
/// dispatch caches hold a single pointer that is swapped atomically.
pub struct CachedKernel {
    /// Input fingerprint the entry was compiled for.
    pub hash: u16,
    /// Native address of the trampoline.
    pub trampoline: *const u8,
}

// Published entries are immutable; the code they point to lives until
// process teardown.
unsafe impl Send for CachedKernel {}
unsafe impl Sync for CachedKernel {}

/// A published binary specialization.
pub struct CachedBinaryKernel {
    /// First input fingerprint.
    pub hash_a: u16,
    /// Second input fingerprint.
    pub hash_b: u16,
    /// Native address of the trampoline.
    pub trampoline: *const u8,
}

unsafe impl Send for CachedBinaryKernel {}
unsafe impl Sync for CachedBinaryKernel {}

/// Per-family module globals: the kernel function pointer slot and one
/// fingerprint slot per input.
#[derive(Clone)]
pub struct FamilyGlobals {
    /// Slot holding the address of the family's current specialization.
    pub kernel_slot: DataId,
    /// Fingerprint slots, one per kernel input.
    pub hash_slots: Vec<DataId>,
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters observable by callers and tests.
#[derive(Debug, Clone, Copy)]
pub struct JitStats {
    /// Specializations compiled since process start.
    pub specializations: usize,
    /// Published dispatch entries (unary and binary).
    pub entries: usize,
}

// =============================================================================
// CodegenContext
// =============================================================================

/// Process-wide JIT host state. See the module documentation.
pub struct CodegenContext {
    pub(crate) module: JITModule,
    pub(crate) ptr_type: Type,
    pub(crate) malloc: FuncId,
    pub(crate) powf: FuncId,
    pub(crate) pow: FuncId,
    verify: bool,
    dump_ir: bool,
    entries: FxHashMap<String, &'static CachedKernel>,
    binary_entries: FxHashMap<String, &'static CachedBinaryKernel>,
    family_globals: FxHashMap<String, FamilyGlobals>,
    compiled: usize,
}

// The module's raw code pointers are only created and read under the global
// compile lock; published entries are immutable once leaked.
unsafe impl Send for CodegenContext {}

impl CodegenContext {
    /// Creates the JIT host. Called once per process through [`initialize`]
    /// or lazily through [`global`].
    pub fn new(config: &JitConfig) -> Result<Self> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("use_colocated_libcalls", "false")
            .map_err(|e| Error::compile(e.to_string()))?;
        flag_builder
            .set("is_pic", "false")
            .map_err(|e| Error::compile(e.to_string()))?;
        let opt = match config.opt_level {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
        };
        flag_builder
            .set("opt_level", opt)
            .map_err(|e| Error::compile(e.to_string()))?;

        let isa_builder = cranelift_native::builder()
            .map_err(|e| Error::compile(format!("failed to get native ISA: {e}")))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| Error::compile(format!("failed to build ISA: {e}")))?;

        let mut jit_builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        jit_builder.symbol("malloc", libc::malloc as *const u8);
        jit_builder.symbol("veris_powf", veris_powf as *const u8);
        jit_builder.symbol("veris_pow", veris_pow as *const u8);
        let mut module = JITModule::new(jit_builder);

        let ptr_type = module.target_config().pointer_type();

        let mut malloc_sig = module.make_signature();
        malloc_sig.params.push(AbiParam::new(ptr_type));
        malloc_sig.returns.push(AbiParam::new(ptr_type));
        let malloc = module
            .declare_function("malloc", Linkage::Import, &malloc_sig)
            .map_err(|e| Error::compile(e.to_string()))?;

        let mut powf_sig = module.make_signature();
        powf_sig.params.push(AbiParam::new(types::F32));
        powf_sig.params.push(AbiParam::new(types::F32));
        powf_sig.returns.push(AbiParam::new(types::F32));
        let powf = module
            .declare_function("veris_powf", Linkage::Import, &powf_sig)
            .map_err(|e| Error::compile(e.to_string()))?;

        let mut pow_sig = module.make_signature();
        pow_sig.params.push(AbiParam::new(types::F64));
        pow_sig.params.push(AbiParam::new(types::F64));
        pow_sig.returns.push(AbiParam::new(types::F64));
        let pow = module
            .declare_function("veris_pow", Linkage::Import, &pow_sig)
            .map_err(|e| Error::compile(e.to_string()))?;

        log::debug!("codegen context initialized ({opt})");

        Ok(Self {
            module,
            ptr_type,
            malloc,
            powf,
            pow,
            verify: config.verify,
            dump_ir: config.dump_ir,
            entries: FxHashMap::default(),
            binary_entries: FxHashMap::default(),
            family_globals: FxHashMap::default(),
            compiled: 0,
        })
    }

    // -------------------------------------------------------------------------
    // Signatures
    // -------------------------------------------------------------------------

    /// `void kernel(const MatrixHeader *src, MatrixHeader *dst, i32 length)`.
    pub(crate) fn unary_kernel_signature(&self) -> Signature {
        let mut sig = self.module.make_signature();
        sig.params.push(AbiParam::new(self.ptr_type));
        sig.params.push(AbiParam::new(self.ptr_type));
        sig.params.push(AbiParam::new(types::I32));
        sig
    }

    /// `void kernel(const MatrixHeader *a, const MatrixHeader *b,
    /// MatrixHeader *dst, i32 length)`.
    pub(crate) fn binary_kernel_signature(&self) -> Signature {
        let mut sig = self.module.make_signature();
        sig.params.push(AbiParam::new(self.ptr_type));
        sig.params.push(AbiParam::new(self.ptr_type));
        sig.params.push(AbiParam::new(self.ptr_type));
        sig.params.push(AbiParam::new(types::I32));
        sig
    }

    /// Trampoline signature: the kernel signature without the length.
    pub(crate) fn trampoline_signature(&self, inputs: usize) -> Signature {
        let mut sig = self.module.make_signature();
        for _ in 0..=inputs {
            sig.params.push(AbiParam::new(self.ptr_type));
        }
        sig
    }

    // -------------------------------------------------------------------------
    // Function pipeline
    // -------------------------------------------------------------------------

    /// Runs the per-function verification pass on freshly built IR. The
    /// backend's optimizing pipeline runs when the function is defined.
    pub(crate) fn optimize(&self, func: &cranelift::codegen::ir::Function) -> Result<()> {
        if self.dump_ir {
            log::debug!("{}", func.display());
        }
        if self.verify {
            verify_function(func, self.module.isa())
                .map_err(|e| Error::compile(e.to_string()))?;
        }
        Ok(())
    }

    /// Defines a declared function from built IR and recycles the context.
    pub(crate) fn define(&mut self, id: FuncId, ctx: &mut ClifContext) -> Result<()> {
        self.module
            .define_function(id, ctx)
            .map_err(|e| Error::compile(e.to_string()))?;
        self.module.clear_context(ctx);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Family globals and published entries
    // -------------------------------------------------------------------------

    /// Returns the module globals for a kernel family, creating the
    /// zero-initialized kernel pointer and fingerprint slots on first use.
    pub(crate) fn family_globals(&mut self, family: &str, inputs: usize) -> Result<FamilyGlobals> {
        if let Some(globals) = self.family_globals.get(family) {
            return Ok(globals.clone());
        }

        let kernel_slot = self.writable_slot(
            &format!("veris_{family}_kernel"),
            u64::from(self.ptr_type.bytes()),
        )?;
        let mut hash_slots = Vec::with_capacity(inputs);
        for i in 0..inputs {
            hash_slots.push(self.writable_slot(&format!("veris_{family}_hash{i}"), 2)?);
        }

        let globals = FamilyGlobals {
            kernel_slot,
            hash_slots,
        };
        self.family_globals
            .insert(family.to_string(), globals.clone());
        Ok(globals)
    }

    fn writable_slot(&mut self, name: &str, size: u64) -> Result<DataId> {
        let id = self
            .module
            .declare_data(name, Linkage::Local, true, false)
            .map_err(|e| Error::compile(e.to_string()))?;
        let mut description = DataDescription::new();
        description.define_zeroinit(size as usize);
        description.set_align(size);
        self.module
            .define_data(id, &description)
            .map_err(|e| Error::compile(e.to_string()))?;
        Ok(id)
    }

    pub(crate) fn entry(&self, key: &str) -> Option<&'static CachedKernel> {
        self.entries.get(key).copied()
    }

    pub(crate) fn insert_entry(&mut self, key: String, entry: &'static CachedKernel) {
        self.entries.insert(key, entry);
    }

    pub(crate) fn binary_entry(&self, key: &str) -> Option<&'static CachedBinaryKernel> {
        self.binary_entries.get(key).copied()
    }

    pub(crate) fn insert_binary_entry(
        &mut self,
        key: String,
        entry: &'static CachedBinaryKernel,
    ) {
        self.binary_entries.insert(key, entry);
    }

    pub(crate) fn count_specialization(&mut self) {
        self.compiled += 1;
    }

    /// Number of specializations compiled since process start.
    #[must_use]
    pub fn compiled_specializations(&self) -> usize {
        self.compiled
    }

    /// Returns counters for callers and tests.
    #[must_use]
    pub fn stats(&self) -> JitStats {
        JitStats {
            specializations: self.compiled,
            entries: self.entries.len() + self.binary_entries.len(),
        }
    }
}

// =============================================================================
// Process-wide accessor
// =============================================================================

static CONTEXT: OnceLock<Mutex<CodegenContext>> = OnceLock::new();

/// Initializes the process-wide context with an explicit configuration.
/// Returns an error if the context already exists.
pub fn initialize(config: &JitConfig) -> Result<()> {
    let context = CodegenContext::new(config)?;
    CONTEXT
        .set(Mutex::new(context))
        .map_err(|_| Error::compile("codegen context already initialized"))
}

/// Returns the process-wide context, initializing it with defaults on first
/// use. The mutex doubles as the compile lock: the dispatch hot path never
/// takes it, and every compilation or publication happens inside it.
pub fn global() -> &'static Mutex<CodegenContext> {
    CONTEXT.get_or_init(|| {
        Mutex::new(
            CodegenContext::new(&JitConfig::default())
                .expect("failed to initialize the JIT context"),
        )
    })
}

/// Number of specializations compiled since process start, for callers that
/// do not hold the lock.
#[must_use]
pub fn compiled_specializations() -> usize {
    global().lock().compiled_specializations()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = JitConfig::new().opt_level(OptLevel::None).dump_ir(true);
        assert_eq!(config.opt_level, OptLevel::None);
        assert!(config.dump_ir);
        assert!(config.verify);
    }

    #[test]
    fn test_global_context_is_shared() {
        let first = global() as *const _;
        let second = global() as *const _;
        assert_eq!(first, second);
    }

    #[test]
    fn test_signatures() {
        let guard = global().lock();
        assert_eq!(guard.unary_kernel_signature().params.len(), 3);
        assert_eq!(guard.binary_kernel_signature().params.len(), 4);
        assert_eq!(guard.trampoline_signature(1).params.len(), 2);
        assert_eq!(guard.trampoline_signature(2).params.len(), 3);
    }
}
