#![cfg(test)]

use super::*;
use crate::{backend::SimDevice, types::MemoryKind};

fn arena() -> MemoryArena<SimDevice> {
    MemoryArena::new(Arc::new(DeviceContext::new(SimDevice::new(), 4).expect("context")))
}

#[test]
fn alloc_tracks_live_bytes_until_free() {
    let mut arena = arena();
    let a = arena.alloc(64).expect("alloc");
    let b = arena.alloc(32).expect("alloc");
    assert_eq!(a.length(), 64);
    assert_eq!(
        arena.stats(),
        ArenaStats {
            live_buffers: 2,
            live_bytes: 96,
            total_allocations: 2,
            total_bytes_allocated: 96,
        }
    );

    arena.free(a);
    assert_eq!(arena.stats().live_buffers, 1);
    assert_eq!(arena.stats().live_bytes, 32);
    assert_eq!(arena.stats().total_allocations, 2);
    drop(b);
}

#[test]
fn zero_byte_alloc_is_a_resource_failure() {
    let mut arena = arena();
    let err = arena.alloc(0).expect_err("zero bytes");
    assert!(matches!(err, MetalError::BufferCreationFailed(0)));
    assert_eq!(arena.stats(), ArenaStats::default());
}

#[test]
fn copy_reports_direction_for_every_side_pairing() {
    let mut arena = arena();
    let src_dev = arena.alloc_from_bytes(&[1, 2, 3, 4]).expect("alloc");
    let dst_dev = arena.alloc(4).expect("alloc");
    let src_host = [9u8, 8, 7, 6];
    let mut dst_host = [0u8; 4];

    let kind = unsafe {
        arena.copy(
            CopyOperand::host_slice_mut(&mut dst_host),
            CopyOperand::host_slice(&src_host),
            4,
        )
    }
    .expect("copy");
    assert_eq!(kind, CopyKind::HostToHost);
    assert_eq!(dst_host, [9, 8, 7, 6]);

    let kind = unsafe { arena.copy(CopyOperand::Device(&dst_dev), CopyOperand::host_slice(&src_host), 4) }.expect("copy");
    assert_eq!(kind, CopyKind::HostToDevice);
    assert_eq!(kind.dst(), MemoryKind::Device);

    let kind = unsafe { arena.copy(CopyOperand::Device(&dst_dev), CopyOperand::Device(&src_dev), 2) }.expect("copy");
    assert_eq!(kind, CopyKind::DeviceToDevice);

    let kind = unsafe { arena.copy(CopyOperand::host_slice_mut(&mut dst_host), CopyOperand::Device(&dst_dev), 4) }.expect("copy");
    assert_eq!(kind, CopyKind::DeviceToHost);
    assert_eq!(dst_host, [1, 2, 7, 6]);
}

#[test]
fn device_side_of_a_copy_is_bounds_checked() {
    let mut arena = arena();
    let small = arena.alloc(8).expect("alloc");
    let host = [0u8; 16];
    let err = unsafe { arena.copy(CopyOperand::Device(&small), CopyOperand::host_slice(&host), 16) }.expect_err("too long");
    assert!(matches!(
        err,
        MetalError::BufferOutOfBounds {
            offset: 0,
            len: 16,
            buffer_len: 8
        }
    ));
    assert_eq!(err.kind(), crate::ErrorKind::Usage);
}

#[test]
fn read_only_host_destination_is_rejected() {
    let mut arena = arena();
    let device = arena.alloc_from_bytes(&[9, 8, 7, 6]).expect("alloc");
    let src = [1u8, 2, 3, 4];
    let err = unsafe { arena.copy(CopyOperand::host_slice(&src), CopyOperand::Device(&device), 4) }.expect_err("read-only");
    assert!(matches!(err, MetalError::ReadOnlyCopyDestination));
    assert_eq!(err.kind(), crate::ErrorKind::Usage);
    assert_eq!(src, [1, 2, 3, 4]);

    let mut dst = [0u8; 4];
    let kind = unsafe { arena.copy(CopyOperand::host_slice_mut(&mut dst), CopyOperand::host_slice(&src), 4) }.expect("copy");
    assert_eq!(kind, CopyKind::HostToHost);
    assert_eq!(dst, src);
}

#[test]
fn byte_helpers_respect_offsets() {
    let mut arena = arena();
    let buffer = arena.alloc(8).expect("alloc");
    arena.write_bytes(&buffer, 4, &[0xAA, 0xBB]).expect("write");

    let mut out = [0u8; 4];
    arena.read_bytes(&buffer, 3, &mut out).expect("read");
    assert_eq!(out, [0, 0xAA, 0xBB, 0]);

    assert!(arena.write_bytes(&buffer, 7, &[1, 2]).is_err());
    assert!(arena.read_bytes(&buffer, usize::MAX, &mut out).is_err());
}

#[test]
fn read_to_vec_reinterprets_contents() {
    let mut arena = arena();
    let values = [1.5f32, -2.0, 0.25];
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
    let buffer = arena.alloc_from_bytes(&bytes).expect("alloc");

    let read: Vec<f32> = unsafe { arena.read_to_vec(&buffer, 3) }.expect("read");
    assert_eq!(read, values);
    assert!(unsafe { arena.read_to_vec::<f32>(&buffer, 4) }.is_err());
}

#[test]
fn contents_points_at_buffer_storage() {
    let mut arena = arena();
    let buffer = arena.alloc_from_bytes(&[42]).expect("alloc");
    let ptr = arena.contents(&buffer);
    assert_eq!(unsafe { *ptr }, 42);
}
