//! Shared-storage array handles with a physical layout.
//!
//! An [`NdArray`] is a cheap-to-clone handle: cloning it aliases the same
//! storage, which is how in-place requests are expressed (the output handle
//! is a clone of the input handle). Storage carries a [`Layout`]:
//!
//! - `Default` is plain row-major order.
//! - `Blocked { block }` splits the channel axis (axis 1) into groups of
//!   `block` channels, padding the last group with zeros. For an `N x C x R`
//!   array (where `R` folds every trailing axis) the element `(n, c, r)` lives
//!   at `((n * CB + c / block) * R + r) * block + c % block`, `CB` being the
//!   number of channel groups. It is the native format of the accelerated
//!   path.
//!
//! Blocked storage is only ever addressed by a single array covering the
//! whole buffer. Views ([`NdArray::slice`], [`NdArray::reshape`]) and reused
//! buffers ([`NdArray::as_array`]) first bring the storage back to row-major.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::backend::DispatchMode;
use crate::error::OpError;
use crate::tensors::{shape_size, Ten32};

/// Physical arrangement of an array's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Layout {
    /// Row-major.
    #[default]
    Default,
    /// Channel axis split into zero-padded groups of `block` channels.
    Blocked {
        /// Channels per group.
        block: usize,
    },
}

/// Channel-group width used by the accelerated path for its outputs.
pub const DEFAULT_BLOCK: usize = 8;

#[derive(Debug)]
struct Chunk {
    data: Vec<f32>,
    layout: Layout,
    /// Logical shape the blocked data is arranged against.
    blocked_shape: Vec<usize>,
}

/// A handle onto shared tensor storage.
#[derive(Debug, Clone)]
pub struct NdArray {
    shape: Vec<usize>,
    offset: usize,
    view: bool,
    chunk: Arc<RwLock<Chunk>>,
}

/// Splits a shape of rank >= 2 into `(N, C, R)`.
fn ncr(shape: &[usize]) -> (usize, usize, usize) {
    (shape[0], shape[1], shape[2..].iter().product())
}

/// Physical element count of `shape` blocked by `block`.
#[must_use]
pub fn blocked_size(shape: &[usize], block: usize) -> usize {
    let (n, c, r) = ncr(shape);
    n * c.div_ceil(block) * r * block
}

/// Row-major data to blocked order.
#[must_use]
pub fn to_blocked(data: &[f32], shape: &[usize], block: usize) -> Vec<f32> {
    let (n, c, r) = ncr(shape);
    let cb = c.div_ceil(block);
    let mut out = vec![0.0; n * cb * r * block];
    for ni in 0..n {
        for ci in 0..c {
            let src = (ni * c + ci) * r;
            let dst = (ni * cb + ci / block) * r * block + ci % block;
            for ri in 0..r {
                out[dst + ri * block] = data[src + ri];
            }
        }
    }
    out
}

/// Blocked data back to row-major order.
#[must_use]
pub fn from_blocked(data: &[f32], shape: &[usize], block: usize) -> Vec<f32> {
    let (n, c, r) = ncr(shape);
    let cb = c.div_ceil(block);
    let mut out = vec![0.0; n * c * r];
    for ni in 0..n {
        for ci in 0..c {
            let dst = (ni * c + ci) * r;
            let src = (ni * cb + ci / block) * r * block + ci % block;
            for ri in 0..r {
                out[dst + ri] = data[src + ri * block];
            }
        }
    }
    out
}

impl Chunk {
    fn reorder_to_default(&mut self) {
        if let Layout::Blocked { block } = self.layout {
            self.data = from_blocked(&self.data, &self.blocked_shape, block);
            self.layout = Layout::Default;
            self.blocked_shape.clear();
        }
    }
}

impl NdArray {
    fn with_chunk(shape: Vec<usize>, chunk: Chunk) -> Self {
        Self {
            shape,
            offset: 0,
            view: false,
            chunk: Arc::new(RwLock::new(chunk)),
        }
    }

    /// A zero-filled row-major array.
    #[must_use]
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let data = vec![0.0; shape_size(&shape)];
        Self::with_chunk(
            shape,
            Chunk {
                data,
                layout: Layout::Default,
                blocked_shape: Vec::new(),
            },
        )
    }

    /// A zero-filled array whose storage holds `capacity` elements, at least
    /// as many as `shape` needs.
    ///
    /// # Errors
    /// Fails if `capacity` is too small.
    pub fn with_capacity(shape: impl Into<Vec<usize>>, capacity: usize) -> Result<Self, OpError> {
        let shape = shape.into();
        if capacity < shape_size(&shape) {
            return Err(OpError::InvalidLayout(format!(
                "capacity {capacity} cannot hold shape {shape:?}"
            )));
        }
        Ok(Self::with_chunk(
            shape,
            Chunk {
                data: vec![0.0; capacity],
                layout: Layout::Default,
                blocked_shape: Vec::new(),
            },
        ))
    }

    /// A row-major array holding a copy of `t`.
    #[must_use]
    pub fn from_tensor(t: &Ten32) -> Self {
        Self::with_chunk(
            t.shape.clone(),
            Chunk {
                data: t.data.clone(),
                layout: Layout::Default,
                blocked_shape: Vec::new(),
            },
        )
    }

    /// A blocked array holding a copy of `t`.
    ///
    /// # Errors
    /// Fails for tensors of rank < 2 or a zero block.
    pub fn from_tensor_blocked(t: &Ten32, block: usize) -> Result<Self, OpError> {
        if t.shape.len() < 2 || block == 0 {
            return Err(OpError::InvalidLayout(format!(
                "cannot block shape {:?} by {block}",
                t.shape
            )));
        }
        Ok(Self::with_chunk(
            t.shape.clone(),
            Chunk {
                data: to_blocked(&t.data, &t.shape, block),
                layout: Layout::Blocked { block },
                blocked_shape: t.shape.clone(),
            },
        ))
    }

    fn read(&self) -> RwLockReadGuard<'_, Chunk> {
        self.chunk.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, Chunk> {
        self.chunk.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Logical shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Logical element count.
    #[must_use]
    pub fn size(&self) -> usize {
        shape_size(&self.shape)
    }

    /// Logical rank.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Current storage layout.
    #[must_use]
    pub fn layout(&self) -> Layout {
        self.read().layout
    }

    /// Whether the storage is in the accelerated path's blocked format.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self.layout(), Layout::Blocked { .. })
    }

    /// Whether this array is a window onto storage owned by a larger array.
    ///
    /// Views must not be written in place.
    #[must_use]
    pub fn is_view(&self) -> bool {
        self.view
    }

    /// Whether the two handles address the same storage.
    #[must_use]
    pub fn shares_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.chunk, &other.chunk)
    }

    /// Element count of the underlying storage.
    #[must_use]
    pub fn storage_len(&self) -> usize {
        self.read().data.len()
    }

    /// Copies the logical contents out in row-major order.
    #[must_use]
    pub fn to_tensor(&self) -> Ten32 {
        let chunk = self.read();
        let data = match chunk.layout {
            Layout::Default => chunk.data[self.offset..self.offset + self.size()].to_vec(),
            Layout::Blocked { block } => from_blocked(&chunk.data, &chunk.blocked_shape, block),
        };
        Ten32::new(self.shape.clone(), data)
    }

    /// Row-major logical contents as a flat vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<f32> {
        self.to_tensor().data
    }

    /// A new, independent row-major array with the same contents.
    #[must_use]
    pub fn reorder_to_default(&self) -> Self {
        Self::from_tensor(&self.to_tensor())
    }

    /// A new, independent array with the same contents and layout.
    #[must_use]
    pub fn copy(&self) -> Self {
        if !self.is_blocked() {
            return self.reorder_to_default();
        }
        let chunk = self.read();
        Self::with_chunk(
            self.shape.clone(),
            Chunk {
                data: chunk.data.clone(),
                layout: chunk.layout,
                blocked_shape: chunk.blocked_shape.clone(),
            },
        )
    }

    /// Converts this array's storage to blocked order in place.
    ///
    /// # Errors
    /// Fails for views, reused buffers, rank < 2, or a zero block.
    pub fn to_blocked_in_place(&self, block: usize) -> Result<(), OpError> {
        if self.shape.len() < 2 || block == 0 {
            return Err(OpError::InvalidLayout(format!(
                "cannot block shape {:?} by {block}",
                self.shape
            )));
        }
        let mut chunk = self.write_guard();
        if chunk.layout == Layout::Default
            && (self.view || self.offset != 0 || chunk.data.len() != self.size())
        {
            return Err(OpError::InvalidLayout(
                "views and reused buffers cannot hold blocked data".into(),
            ));
        }
        chunk.reorder_to_default();
        chunk.data = to_blocked(&chunk.data, &self.shape, block);
        chunk.layout = Layout::Blocked { block };
        chunk.blocked_shape = self.shape.clone();
        Ok(())
    }

    /// Brings this array's storage back to row-major order in place.
    pub fn reorder_to_default_in_place(&self) {
        self.write_guard().reorder_to_default();
    }

    /// A view of rows `begin..end` along axis 0.
    ///
    /// Blocked storage is reordered to row-major first.
    ///
    /// # Errors
    /// Fails for rank-0 arrays or an out-of-range window.
    pub fn slice(&self, begin: usize, end: usize) -> Result<Self, OpError> {
        if self.shape.is_empty() || begin > end || end > self.shape[0] {
            return Err(OpError::InvalidLayout(format!(
                "slice {begin}..{end} out of range for shape {:?}",
                self.shape
            )));
        }
        self.reorder_to_default_in_place();
        let row: usize = self.shape[1..].iter().product();
        let mut shape = self.shape.clone();
        shape[0] = end - begin;
        Ok(Self {
            shape,
            offset: self.offset + begin * row,
            view: true,
            chunk: Arc::clone(&self.chunk),
        })
    }

    /// A view with a different shape of the same element count.
    ///
    /// # Errors
    /// Fails if the element counts differ.
    pub fn reshape(&self, shape: impl Into<Vec<usize>>) -> Result<Self, OpError> {
        let shape = shape.into();
        if shape_size(&shape) != self.size() {
            return Err(OpError::InvalidLayout(format!(
                "cannot reshape {:?} to {shape:?}",
                self.shape
            )));
        }
        self.reorder_to_default_in_place();
        Ok(Self {
            shape,
            offset: self.offset,
            view: true,
            chunk: Arc::clone(&self.chunk),
        })
    }

    /// Reuses this array's storage for a (not larger) array of another shape.
    ///
    /// The result is not a view: it starts at the same offset and may be
    /// written in place.
    ///
    /// # Errors
    /// Fails if `shape` needs more elements than are available.
    pub fn as_array(&self, shape: impl Into<Vec<usize>>) -> Result<Self, OpError> {
        let shape = shape.into();
        self.reorder_to_default_in_place();
        let available = self.storage_len() - self.offset;
        if shape_size(&shape) > available {
            return Err(OpError::InvalidLayout(format!(
                "cannot reuse {available} elements for shape {shape:?}"
            )));
        }
        Ok(Self {
            shape,
            offset: self.offset,
            view: false,
            chunk: Arc::clone(&self.chunk),
        })
    }

    /// Overwrites the logical contents with `t`, which must match the shape.
    ///
    /// The accelerated path keeps blocked storage blocked; the generic path
    /// reorders it to row-major first. Windows onto larger buffers are always
    /// row-major.
    ///
    /// # Errors
    /// Fails when the element count differs.
    pub fn write(&self, t: &Ten32, mode: DispatchMode) -> Result<(), OpError> {
        if t.size() != self.size() {
            return Err(OpError::InvalidLayout(format!(
                "cannot write {:?} into {:?}",
                t.shape, self.shape
            )));
        }
        let mut chunk = self.write_guard();
        match (chunk.layout, mode) {
            (Layout::Blocked { block }, DispatchMode::Accelerated) => {
                chunk.data = to_blocked(&t.data, &chunk.blocked_shape, block);
            }
            (Layout::Blocked { .. }, DispatchMode::Generic) => {
                chunk.layout = Layout::Default;
                chunk.blocked_shape.clear();
                chunk.data = t.data.clone();
            }
            (Layout::Default, _) => {
                let start = self.offset;
                chunk.data[start..start + t.size()].copy_from_slice(&t.data);
            }
        }
        Ok(())
    }

    /// Copies `values` into the logical contents in row-major order.
    ///
    /// # Errors
    /// Fails when the element count differs.
    pub fn fill_from(&self, values: &[f32]) -> Result<(), OpError> {
        let t = Ten32::new(self.shape.clone(), values.to_vec());
        self.write(&t, DispatchMode::Accelerated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iota(shape: &[usize]) -> Ten32 {
        let n = shape_size(shape);
        Ten32::new(shape.to_vec(), (0..n).map(|i| i as f32).collect())
    }

    #[test]
    fn blocked_roundtrip_pads_channels() {
        let t = iota(&[2, 3, 2, 2]);
        let blocked = to_blocked(&t.data, &t.shape, 2);
        assert_eq!(blocked.len(), blocked_size(&t.shape, 2));
        assert_eq!(blocked.len(), 2 * 2 * 4 * 2);
        // channel 0 and 1 of the first pixel interleave
        assert_eq!(&blocked[..2], &[0.0, 4.0]);
        assert_eq!(from_blocked(&blocked, &t.shape, 2), t.data);
    }

    #[test]
    fn blocked_array_reads_back_row_major() {
        let t = iota(&[1, 5, 3]);
        let arr = NdArray::from_tensor_blocked(&t, 4).unwrap();
        assert!(arr.is_blocked());
        assert_eq!(arr.to_tensor(), t);
        assert!(!arr.reorder_to_default().is_blocked());
        assert!(arr.copy().is_blocked());
    }

    #[test]
    fn slice_is_a_view_at_row_offset() {
        let arr = NdArray::from_tensor(&iota(&[3, 2]));
        let view = arr.slice(1, 3).unwrap();
        assert!(view.is_view());
        assert!(view.shares_storage(&arr));
        assert_eq!(view.to_vec(), vec![2.0, 3.0, 4.0, 5.0]);
        view.fill_from(&[9.0; 4]).unwrap();
        assert_eq!(arr.to_vec(), vec![0.0, 1.0, 9.0, 9.0, 9.0, 9.0]);
    }

    #[test]
    fn slicing_blocked_storage_reorders_it() {
        let t = iota(&[2, 3, 2]);
        let arr = NdArray::from_tensor_blocked(&t, 2).unwrap();
        let view = arr.slice(0, 1).unwrap();
        assert!(!arr.is_blocked());
        assert_eq!(view.to_vec(), t.data[..6].to_vec());
    }

    #[test]
    fn generic_write_unblocks_accelerated_write_keeps_layout() {
        let t = iota(&[1, 3, 2]);
        let arr = NdArray::from_tensor_blocked(&t, 2).unwrap();
        let doubled = Ten32::new(t.shape.clone(), t.data.iter().map(|x| x * 2.0).collect());
        arr.write(&doubled, DispatchMode::Accelerated).unwrap();
        assert!(arr.is_blocked());
        assert_eq!(arr.to_tensor(), doubled);
        arr.write(&t, DispatchMode::Generic).unwrap();
        assert!(!arr.is_blocked());
        assert_eq!(arr.to_tensor(), t);
    }

    #[test]
    fn reused_buffer_is_not_a_view() {
        let big = NdArray::with_capacity(vec![4, 4], 32).unwrap();
        let small = big.as_array(vec![2, 3]).unwrap();
        assert!(!small.is_view());
        assert!(small.shares_storage(&big));
        assert!(big.as_array(vec![40]).is_err());
    }
}
