//! Batch Projection - Caller-Side Parallelism
//!
//! Kernels are single-threaded straight-line loops; parallelism above the
//! kernel belongs to the caller. This maps a kernel over a batch of matrices
//! on the rayon pool. The first worker to see an unseen fingerprint compiles
//! it under the process-wide lock; everyone else dispatches lock-free.
//!
//! @version 0.1.0
//! @author Veris Development Team

use rayon::prelude::*;

use veris_core::error::Result;
use veris_jit::UnaryKernel;
use veris_matrix::Matrix;

/// Applies a kernel to every matrix of a batch in parallel, preserving
/// order. Fails on the first kernel error.
pub fn apply_batch(kernel: &UnaryKernel, inputs: &[Matrix]) -> Result<Vec<Matrix>> {
    log::debug!("projecting a batch of {} matrices", inputs.len());
    inputs.par_iter().map(|input| kernel.apply(input)).collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_batch_preserves_order() {
        let kernel = UnaryKernel::from_descriptor("scale(2)").unwrap();
        let inputs: Vec<Matrix> = (0..16)
            .map(|i| Matrix::from_slice::<i32>(&[i, i + 1], [1, 2, 1, 1]).unwrap())
            .collect();
        let outputs = apply_batch(&kernel, &inputs).unwrap();
        assert_eq!(outputs.len(), 16);
        for (i, output) in outputs.iter().enumerate() {
            let i = i as i32;
            assert_eq!(output.to_vec::<i32>().unwrap(), vec![2 * i, 2 * i + 2]);
        }
    }
}
