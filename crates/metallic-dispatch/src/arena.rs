//! Shared-storage buffer allocation and host/device byte copies.
//!
//! Buffers live in host-visible shared storage, so every copy direction
//! (host to host, host to device, device to host, device to device) is a flat
//! memory copy once device buffers are resolved to their backing addresses.
//! No blit command is ever encoded, and copies do not wait on submitted work:
//! the caller syncs first if a kernel may still be writing the source.

use std::sync::Arc;

use crate::{
    MetalError, device::DeviceContext, types::{ComputeDevice, CopyKind, CopyOperand, DeviceBuffer}
};

/// Allocation counters for one arena.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub live_buffers: usize,
    pub live_bytes: usize,
    pub total_allocations: usize,
    pub total_bytes_allocated: usize,
}

pub struct MemoryArena<D: ComputeDevice> {
    context: Arc<DeviceContext<D>>,
    stats: ArenaStats,
}

impl<D: ComputeDevice> std::fmt::Debug for MemoryArena<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryArena").field("stats", &self.stats).finish_non_exhaustive()
    }
}

impl<D: ComputeDevice> MemoryArena<D> {
    pub fn new(context: Arc<DeviceContext<D>>) -> Self {
        Self {
            context,
            stats: ArenaStats::default(),
        }
    }

    pub fn stats(&self) -> ArenaStats {
        self.stats
    }

    /// Allocate exactly `nbytes` of shared storage.
    pub fn alloc(&mut self, nbytes: usize) -> Result<D::Buffer, MetalError> {
        if nbytes == 0 {
            return Err(MetalError::BufferCreationFailed(0));
        }
        let buffer = self.context.device().new_shared_buffer(nbytes)?;
        self.stats.live_buffers += 1;
        self.stats.live_bytes += nbytes;
        self.stats.total_allocations += 1;
        self.stats.total_bytes_allocated += nbytes;
        tracing::trace!(nbytes, live_bytes = self.stats.live_bytes, "buffer allocated");
        Ok(buffer)
    }

    /// Allocate a buffer sized to `bytes` and upload them.
    pub fn alloc_from_bytes(&mut self, bytes: &[u8]) -> Result<D::Buffer, MetalError> {
        let buffer = self.alloc(bytes.len())?;
        self.write_bytes(&buffer, 0, bytes)?;
        Ok(buffer)
    }

    /// Release a buffer. Work already encoded against it keeps its own reference.
    pub fn free(&mut self, buffer: D::Buffer) {
        let nbytes = buffer.length();
        self.stats.live_buffers = self.stats.live_buffers.saturating_sub(1);
        self.stats.live_bytes = self.stats.live_bytes.saturating_sub(nbytes);
        tracing::trace!(nbytes, live_bytes = self.stats.live_bytes, "buffer freed");
        drop(buffer);
    }

    /// Host-visible address of the buffer's first byte.
    pub fn contents(&self, buffer: &D::Buffer) -> *mut u8 {
        buffer.contents()
    }

    /// Flat copy of `nbytes` between raw host addresses.
    ///
    /// # Safety
    /// Both ranges must be valid for `nbytes` bytes. They may overlap.
    pub unsafe fn host_copy(dst: *mut u8, src: *const u8, nbytes: usize) {
        unsafe { std::ptr::copy(src, dst, nbytes) };
    }

    /// Copy `nbytes` from `src` to `dst`, resolving device buffers to their
    /// backing memory. Returns the direction that was performed.
    ///
    /// Device sides are bounds-checked against the buffer length. A
    /// [`CopyOperand::HostReadOnly`] destination is rejected.
    ///
    /// # Safety
    /// Host pointers must be valid for `nbytes` bytes, and a
    /// [`CopyOperand::Host`] destination must be writable.
    pub unsafe fn copy(&self, dst: CopyOperand<'_, D::Buffer>, src: CopyOperand<'_, D::Buffer>, nbytes: usize) -> Result<CopyKind, MetalError> {
        let kind = CopyKind::from_sides(dst.kind(), src.kind());
        let dst_ptr = match dst {
            CopyOperand::HostReadOnly(_) => return Err(MetalError::ReadOnlyCopyDestination),
            other => resolve(other, nbytes)?.cast_mut(),
        };
        let src_ptr = resolve(src, nbytes)?;
        unsafe { Self::host_copy(dst_ptr, src_ptr, nbytes) };
        Ok(kind)
    }

    /// Copy `bytes` into `buffer` starting at `offset`.
    pub fn write_bytes(&self, buffer: &D::Buffer, offset: usize, bytes: &[u8]) -> Result<(), MetalError> {
        check_span(buffer, offset, bytes.len())?;
        // SAFETY: span checked against the live buffer above.
        unsafe { Self::host_copy(buffer.contents().add(offset), bytes.as_ptr(), bytes.len()) };
        Ok(())
    }

    /// Fill `out` from `buffer` starting at `offset`.
    pub fn read_bytes(&self, buffer: &D::Buffer, offset: usize, out: &mut [u8]) -> Result<(), MetalError> {
        check_span(buffer, offset, out.len())?;
        // SAFETY: span checked against the live buffer above.
        unsafe { Self::host_copy(out.as_mut_ptr(), buffer.contents().add(offset), out.len()) };
        Ok(())
    }

    /// Read the first `count` elements of the buffer as `T`.
    ///
    /// # Safety
    /// Every bit pattern in that span must be a valid `T`.
    pub unsafe fn read_to_vec<T: Copy>(&self, buffer: &D::Buffer, count: usize) -> Result<Vec<T>, MetalError> {
        let len = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(MetalError::BufferOutOfBounds {
                offset: 0,
                len: usize::MAX,
                buffer_len: buffer.length(),
            })?;
        check_span(buffer, 0, len)?;
        let mut out = Vec::<T>::with_capacity(count);
        unsafe {
            std::ptr::copy_nonoverlapping(buffer.contents().cast_const(), out.as_mut_ptr().cast::<u8>(), len);
            out.set_len(count);
        }
        Ok(out)
    }
}

fn resolve<B: DeviceBuffer>(operand: CopyOperand<'_, B>, nbytes: usize) -> Result<*const u8, MetalError> {
    match operand {
        CopyOperand::Host(ptr) => Ok(ptr.cast_const()),
        CopyOperand::HostReadOnly(ptr) => Ok(ptr),
        CopyOperand::Device(buffer) => {
            check_span(buffer, 0, nbytes)?;
            Ok(buffer.contents().cast_const())
        }
    }
}

fn check_span<B: DeviceBuffer>(buffer: &B, offset: usize, len: usize) -> Result<(), MetalError> {
    let buffer_len = buffer.length();
    match offset.checked_add(len) {
        Some(end) if end <= buffer_len => Ok(()),
        _ => Err(MetalError::BufferOutOfBounds { offset, len, buffer_len }),
    }
}

#[path = "arena.test.rs"]
mod tests;
