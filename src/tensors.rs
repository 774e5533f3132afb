//! Plain row-major tensors used as the compute currency between the engine
//! and the kernels.
//!
//! Kernels never see layouts or views: the engine snapshots every input into
//! a [`Tensor`] in default (row-major) order, the kernel produces fresh
//! output tensors, and the engine writes those back into the caller's
//! arrays.
//!
//! ## Example
//!
//! ```rust
//! use briny_dispatch::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape, vec![2, 3]);
//! ```

/// Represents an N-dimensional tensor with a shape and flat row-major data.
///
/// - `shape` defines the structure, e.g., `[2, 3]` for a 2x3 matrix.
/// - `data` holds the flattened content in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    /// Logical dimensions.
    pub shape: Vec<usize>,
    /// Row-major elements.
    pub data: Vec<T>,
}

/// The element type used by every registered operator.
pub type Ten32 = Tensor<f32>;

impl<T> Tensor<T> {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self { shape, data }
    }

    /// Number of elements.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Reinterprets the data under a new shape with the same element count.
    ///
    /// # Panics
    /// Panics if the element counts differ.
    #[must_use]
    pub fn reshape(self, shape: impl Into<Vec<usize>>) -> Self {
        Self::new(shape, self.data)
    }
}

impl<T: Clone + Default> Tensor<T> {
    /// A tensor of `T::default()` values.
    #[must_use]
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![T::default(); len],
        }
    }
}

/// Number of elements described by `shape`.
#[must_use]
pub fn shape_size(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use briny_dispatch::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape, vec![2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::<f32>::new(Vec::<usize>::new(), vec![$lit])
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!($inner) ),+ ];
        let first_shape = &children[0].shape;
        assert!(children.iter().all(|c| c.shape == *first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].data.len());
        for c in children { data.extend(c.data); }
        $crate::tensors::Tensor::<f32>::new(shape, data)
    }};
}
