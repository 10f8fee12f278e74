//! SDK-level integration: image boundary into JIT pipelines and back.

use veris::prelude::*;

#[test]
fn test_image_to_quantized_template() {
    // A framework-owned grayscale f32 image, wrapped without copying,
    // normalized and quantized into a byte matrix.
    let mut image: Vec<u8> = Vec::new();
    for value in [0.0f32, 64.5, 127.9, 255.0, 300.0, -5.0] {
        image.extend_from_slice(&value.to_ne_bytes());
    }

    let mut view = ImageView::new(&mut image, ElementType::F32, 1, 3, 2, 12);
    let src = unsafe { view.wrap() }.unwrap();

    let kernel = UnaryKernel::from_descriptor("quantize(1,0)").unwrap();
    let dst = kernel.apply(&src).unwrap();
    drop(src);

    assert_eq!(dst.element_type().unwrap(), ElementType::U8);
    assert_eq!(dst.to_vec::<u8>().unwrap(), vec![0, 64, 127, 255, 255, 0]);
}

#[test]
fn test_descriptor_pipeline_end_to_end() {
    // Feature-style pipeline: absolute response, squared, accumulated per row.
    let kernel = UnaryKernel::from_descriptor("stitch([abs,square])").unwrap();
    let sum = UnaryKernel::from_descriptor("sum(channels,columns)").unwrap();

    let src = Matrix::from_slice::<f32>(
        &[1.0, -2.0, 3.0, -4.0, 0.5, -0.5, 1.5, -1.5],
        [2, 2, 2, 1],
    )
    .unwrap();

    let energy = kernel.apply(&src).unwrap();
    let per_row = sum.apply(&energy).unwrap();

    assert_eq!(per_row.shape(), [1, 1, 2, 1]);
    let values = per_row.to_vec::<f64>().unwrap();
    assert!((values[0] - (1.0 + 4.0 + 9.0 + 16.0)).abs() < 1e-6);
    assert!((values[1] - (0.25 + 0.25 + 2.25 + 2.25)).abs() < 1e-6);
}

#[test]
fn test_batch_projection() {
    let kernel = UnaryKernel::from_descriptor("clamp(0,100)").unwrap();
    let inputs: Vec<Matrix> = (0..32)
        .map(|i| {
            Matrix::from_slice::<i32>(&[-i, i, 50 + i, 200], [1, 4, 1, 1]).unwrap()
        })
        .collect();
    let outputs = apply_batch(&kernel, &inputs).unwrap();
    for (i, output) in outputs.iter().enumerate() {
        let i = i as i32;
        assert_eq!(
            output.to_vec::<i32>().unwrap(),
            vec![0.max(-i), i.min(100), (50 + i).min(100), 100]
        );
    }
}

#[test]
fn test_copied_image_survives_source_drop() {
    let mut bytes = vec![10u8, 20, 30, 40, 50, 60];
    let matrix = {
        let view = ImageView::new(&mut bytes, ElementType::U8, 3, 2, 1, 6);
        view.to_matrix().unwrap()
    };
    drop(bytes);

    let kernel = UnaryKernel::from_descriptor("cast(f64)").unwrap();
    let wide = kernel.apply(&matrix).unwrap();
    assert_eq!(
        wide.to_vec::<f64>().unwrap(),
        vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0]
    );
}
