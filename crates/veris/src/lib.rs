//! # Veris - A Biometric-Processing SDK in Pure Rust
//!
//! Veris processes biometric imagery through pipelines of small numeric
//! primitives that are JIT-compiled into fused native kernels, specialized
//! and cached per input fingerprint (element type + degenerate axes).
//!
//! ## Core Pieces
//!
//! - **Matrices**: self-describing dense four-axis tensors with a 16-bit
//!   type/shape fingerprint ([`veris_matrix`])
//! - **Kernels**: stitchable per-element primitives (square, scale, add, abs,
//!   cast, pow, clamp) fused into one loop, plus axis-sum reducers
//!   ([`veris_jit`])
//! - **Dispatch**: lock-free fingerprint-keyed dispatch to cached native
//!   entry points, with compilation serialized process-wide
//! - **Boundary**: wrap externally-owned image buffers without copying, map
//!   kernels over batches in parallel
//!
//! # Quick Start
//!
//! ```ignore
//! use veris::prelude::*;
//!
//! // Build a pipeline from a descriptor...
//! let kernel = UnaryKernel::from_descriptor("quantize(1,0)")?;
//!
//! // ...and run it: the first call compiles a specialization for the
//! // input's fingerprint, later calls dispatch straight to native code.
//! let src = Matrix::from_slice::<f32>(&[0.0, 128.0, 255.0, 300.0], [1, 2, 2, 1])?;
//! let dst = kernel.apply(&src)?;
//! assert_eq!(dst.to_vec::<u8>()?, vec![0, 128, 255, 255]);
//! ```
//!
//! @version 0.1.0
//! @author Veris Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod image;

pub use veris_core::element::{ElementType, Scalar};
pub use veris_core::error::{Error, Result};
pub use veris_core::stats;
pub use veris_jit::{
    registry, BinaryKernel, BinaryOp, JitConfig, Kernel, PrimitiveKernel, SumKernel, UnaryKernel,
};
pub use veris_matrix::{Matrix, MatrixHeader};

pub use batch::apply_batch;
pub use image::ImageView;

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::batch::apply_batch;
    pub use crate::image::ImageView;
    pub use veris_core::element::{ElementType, Scalar};
    pub use veris_core::error::{Error, Result};
    pub use veris_jit::{registry, BinaryKernel, Kernel, PrimitiveKernel, SumKernel, UnaryKernel};
    pub use veris_matrix::{Matrix, MatrixHeader};
}
