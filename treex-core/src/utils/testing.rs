use crate::tensor::Tensor;

/// Asserts that `actual` has `expected_shape` and that every element is within
/// `tolerance` of `expected_data`. NaN never counts as close.
pub fn check_tensor_near(
    actual: &Tensor,
    expected_shape: &[usize],
    expected_data: &[f32],
    tolerance: f32,
) {
    assert_eq!(actual.shape(), expected_shape, "shape of {:?}", actual);
    assert_eq!(
        actual.numel(),
        expected_data.len(),
        "expected {} values for shape {:?}",
        expected_data.len(),
        expected_shape
    );

    let mismatch = actual
        .data()
        .iter()
        .zip(expected_data)
        .enumerate()
        .find(|(_, (a, e))| !((*a - *e).abs() <= tolerance));
    if let Some((i, (a, e))) = mismatch {
        panic!(
            "value {} differs: got {}, expected {} (tolerance {})\n  actual:   {:?}\n  expected: {:?}",
            i,
            a,
            e,
            tolerance,
            actual.data(),
            expected_data
        );
    }
}
