//! Single-allocation scratch arena.
//!
//! Every operator call makes at most one scratch allocation; the arena
//! carves it into 64-byte-aligned f32 spans whose sizes are fixed up
//! front. The allocation is released unconditionally when the arena
//! drops, including on every failure path (a no-op for an empty arena).

use std::alloc::{alloc, dealloc, Layout};

use crate::core::blocking::round_up;
use crate::error::{Error, Result};

const ALIGNMENT: usize = 64;

/// One-call scratch memory, partitioned into aligned spans.
pub(crate) struct Arena {
    base: *mut u8,
    layout: Option<Layout>,
    /// Byte offset of each span inside the allocation.
    offsets: Vec<usize>,
}

// The arena itself is only handed between threads through raw span
// pointers whose disjointness the tile index arithmetic guarantees.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Allocate one block large enough for `span_elements[i]` f32 values
    /// per span, each span starting on a 64-byte boundary.
    pub(crate) fn for_spans(span_elements: &[usize]) -> Result<Self> {
        let mut offsets = Vec::with_capacity(span_elements.len());
        let mut bytes = 0usize;
        for &elements in span_elements {
            offsets.push(bytes);
            bytes += round_up(elements * std::mem::size_of::<f32>(), ALIGNMENT);
        }

        if bytes == 0 {
            return Ok(Self {
                base: std::ptr::null_mut(),
                layout: None,
                offsets,
            });
        }

        let layout = Layout::from_size_align(bytes, ALIGNMENT).map_err(|_| Error::OutOfMemory)?;
        let base = unsafe { alloc(layout) };
        if base.is_null() {
            return Err(Error::OutOfMemory);
        }
        Ok(Self {
            base,
            layout: Some(layout),
            offsets,
        })
    }

    /// Base pointer of span `index`.
    #[inline]
    pub(crate) fn span(&self, index: usize) -> *mut f32 {
        debug_assert!(!self.base.is_null());
        unsafe { self.base.add(self.offsets[index]) as *mut f32 }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if let Some(layout) = self.layout.take() {
            unsafe { dealloc(self.base, layout) };
        }
    }
}
