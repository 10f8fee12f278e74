//! Veris JIT - Fingerprint-Specialized Kernel Compiler
//!
//! Compiles pipelines of small per-element primitives (and axis reducers)
//! into fused native routines specialized to the element type and degenerate
//! axes of the input matrix, caches them keyed by the matrix fingerprint, and
//! dispatches subsequent inputs directly to the cached native code.
//!
//! - Fusible per-element primitives: square, scale, add, abs, cast, pow,
//!   clamp, and nested stitch pipelines
//! - Non-fusible reducers: axis sums with a fixed accumulation order
//! - Native code generation via Cranelift
//! - Lock-free hot-path dispatch; compilation serialized by a process-wide
//!   lock
//!
//! # Example
//! ```ignore
//! use veris_jit::{registry, UnaryKernel};
//! use veris_matrix::Matrix;
//!
//! let kernel = UnaryKernel::from_descriptor("quantize(1,0)")?;
//! let src = Matrix::from_slice::<f32>(&[0.0, 128.0, 255.0, 300.0], [1, 2, 2, 1])?;
//! let dst = kernel.apply(&src)?;
//! assert_eq!(dst.to_vec::<u8>()?, vec![0, 128, 255, 255]);
//! ```
//!
//! @version 0.1.0
//! @author Veris Development Team

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]

pub mod builder;
pub mod context;
pub mod dispatch;
pub mod kernel;
pub mod reduce;
pub mod registry;

pub use builder::{Emitter, KernelBuilder};
pub use context::{CodegenContext, JitConfig, JitStats, OptLevel};
pub use dispatch::{BinaryKernel, BinaryOp, Kernel, UnaryKernel};
pub use kernel::PrimitiveKernel;
pub use reduce::SumKernel;

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::dispatch::{BinaryKernel, BinaryOp, Kernel, UnaryKernel};
    pub use crate::kernel::PrimitiveKernel;
    pub use crate::reduce::SumKernel;
    pub use crate::registry;
}
