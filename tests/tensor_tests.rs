use briny_dispatch::array::{Layout, NdArray};
use briny_dispatch::backend::DispatchMode;
use briny_dispatch::tensor;
use briny_dispatch::tensors::Tensor;

#[test]
fn test_tensor_creation() {
    let t = Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(t.shape, vec![2, 2]);
    assert_eq!(t.data, vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_tensor_macro() {
    let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
    assert_eq!(t.shape, vec![2, 2]);
    assert_eq!(t.data, vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_tensor_shape_mismatch_panics() {
    let result = std::panic::catch_unwind(|| {
        Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0]);
    });
    assert!(result.is_err());
}

#[test]
fn test_slice_is_a_view_of_the_parent() {
    let parent = NdArray::from_tensor(&Tensor::new(vec![4, 2], (0..8).map(|i| i as f32).collect()));
    let view = parent.slice(1, 3).unwrap();
    assert!(view.is_view());
    assert!(view.shares_storage(&parent));
    assert_eq!(view.to_vec(), vec![2.0, 3.0, 4.0, 5.0]);

    view.fill_from(&[9.0; 4]).unwrap();
    assert_eq!(parent.to_vec(), vec![0.0, 1.0, 9.0, 9.0, 9.0, 9.0, 6.0, 7.0]);
}

#[test]
fn test_blocked_round_trip_keeps_logical_values() {
    let t = Tensor::new(vec![2, 3, 2, 2], (0..24).map(|i| i as f32).collect());
    let arr = NdArray::from_tensor_blocked(&t, 4).unwrap();
    assert_eq!(arr.layout(), Layout::Blocked { block: 4 });
    assert!(arr.storage_len() > arr.size());
    assert_eq!(arr.to_tensor(), t);

    let plain = arr.reorder_to_default();
    assert!(!plain.is_blocked());
    assert_eq!(plain.to_vec(), t.data);
}

#[test]
fn test_generic_write_drops_blocking() {
    let t = Tensor::new(vec![1, 2, 2, 2], vec![1.0; 8]);
    let kept = NdArray::from_tensor_blocked(&t, 4).unwrap();
    let dropped = NdArray::from_tensor_blocked(&t, 4).unwrap();
    let update = Tensor::new(vec![1, 2, 2, 2], vec![2.0; 8]);

    kept.write(&update, DispatchMode::Accelerated).unwrap();
    dropped.write(&update, DispatchMode::Generic).unwrap();
    assert!(kept.is_blocked());
    assert!(!dropped.is_blocked());
    assert_eq!(kept.to_vec(), dropped.to_vec());
}

#[test]
fn test_views_cannot_be_blocked() {
    let parent = NdArray::zeros(vec![4, 4, 2, 2]);
    let view = parent.slice(0, 2).unwrap();
    assert!(view.to_blocked_in_place(4).is_err());

    let flat = NdArray::zeros(vec![64]);
    let reused = flat.as_array(vec![4, 4, 2, 2]).unwrap();
    assert!(!reused.is_view());
    reused.to_blocked_in_place(4).unwrap();
    assert!(reused.is_blocked());
}
