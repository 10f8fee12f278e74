//! Fingerprint specialization invariants, observed through the compilation
//! counter. Everything lives in one test so the counter observations are
//! strictly ordered within this process.

use veris_jit::{context, UnaryKernel};
use veris_matrix::Matrix;

#[test]
fn test_fingerprint_specialization_properties() {
    let kernel = UnaryKernel::from_descriptor("add(1)").unwrap();
    let start = context::compiled_specializations();

    // First fingerprint compiles once.
    let s8 = Matrix::from_slice::<i8>(&[-1, -2, 3, 4], [1, 2, 2, 1]).unwrap();
    assert_eq!(kernel.apply(&s8).unwrap().to_vec::<i8>().unwrap(), vec![0, -1, 4, 5]);
    assert_eq!(context::compiled_specializations(), start + 1);

    // Dispatching the same fingerprint again reuses the cached pointer.
    for _ in 0..8 {
        kernel.apply(&s8).unwrap();
    }
    assert_eq!(context::compiled_specializations(), start + 1);

    // A second fingerprint compiles exactly once more.
    let f32s = Matrix::from_slice::<f32>(&[1.0, 2.0, 3.0, 4.0], [1, 2, 2, 1]).unwrap();
    assert_eq!(
        kernel.apply(&f32s).unwrap().to_vec::<f32>().unwrap(),
        vec![2.0, 3.0, 4.0, 5.0]
    );
    assert_eq!(context::compiled_specializations(), start + 2);

    // Switching back to the first fingerprint is a lookup, not a recompile.
    let s8_again = Matrix::from_slice::<i8>(&[10, 20, 30, 40], [1, 2, 2, 1]).unwrap();
    assert_eq!(
        kernel.apply(&s8_again).unwrap().to_vec::<i8>().unwrap(),
        vec![11, 21, 31, 41]
    );
    assert_eq!(context::compiled_specializations(), start + 2);

    // A second instance with the same configuration shares the cached code.
    let twin = UnaryKernel::from_descriptor("add(1)").unwrap();
    twin.apply(&s8).unwrap();
    assert_eq!(context::compiled_specializations(), start + 2);

    // Concurrent first-time dispatch compiles exactly once.
    let fresh = UnaryKernel::from_descriptor("scale(42.125)").unwrap();
    let input = Matrix::from_slice::<f64>(&[1.0, -2.0, 4.0, 0.0], [1, 4, 1, 1]).unwrap();
    let before = context::compiled_specializations();
    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                let out = fresh.apply(&input).unwrap().to_vec::<f64>().unwrap();
                assert_eq!(out, vec![42.125, -84.25, 170.5, 0.0]);
            });
        }
    });
    assert_eq!(context::compiled_specializations(), before + 1);
}
