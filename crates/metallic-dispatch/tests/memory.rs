use metallic_dispatch::{
    CopyKind, CopyOperand, DeviceBuffer, Dispatcher, MemoryArena, MemoryKind, RuntimeConfig, backend::SimDevice
};

fn dispatcher() -> (SimDevice, Dispatcher<SimDevice>) {
    let device = SimDevice::new();
    let dispatcher = Dispatcher::with_device(device.clone(), &RuntimeConfig::default().with_queue_capacity(4)).expect("dispatcher");
    (device, dispatcher)
}

fn random_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|_| rand::random::<u8>()).collect()
}

#[test]
fn host_pointer_round_trip_for_any_length() {
    let (_, mut dispatcher) = dispatcher();
    let capacity = 4096;
    let buffer = dispatcher.alloc(capacity).expect("alloc");
    let ptr = dispatcher.arena().contents(&buffer);

    for _ in 0..32 {
        let n = rand::random::<u16>() as usize % capacity + 1;
        let pattern = random_bytes(n);
        unsafe { MemoryArena::<SimDevice>::host_copy(ptr, pattern.as_ptr(), n) };
        let mut back = vec![0u8; n];
        unsafe { MemoryArena::<SimDevice>::host_copy(back.as_mut_ptr(), ptr, n) };
        assert_eq!(back, pattern, "n = {n}");
    }
}

#[test]
fn every_copy_kind_matches_a_flat_copy() {
    let (_, mut dispatcher) = dispatcher();
    let n = 257;
    let pattern = random_bytes(n);

    for bits in 0u8..4 {
        let kind = CopyKind::from_bits(bits).expect("valid kind");
        let src_dev = dispatcher.alloc_from_bytes(&pattern).expect("alloc");
        let dst_dev = dispatcher.alloc(n).expect("alloc");
        let mut dst_host = vec![0u8; n];

        let src = match kind.src() {
            MemoryKind::Host => CopyOperand::host_slice(&pattern),
            MemoryKind::Device => CopyOperand::Device(&src_dev),
        };
        let dst = match kind.dst() {
            MemoryKind::Host => CopyOperand::host_slice_mut(&mut dst_host),
            MemoryKind::Device => CopyOperand::Device(&dst_dev),
        };
        let performed = unsafe { dispatcher.copy(dst, src, n) }.expect("copy");
        assert_eq!(performed, kind);

        let copied = match kind.dst() {
            MemoryKind::Host => dst_host,
            MemoryKind::Device => {
                let mut out = vec![0u8; n];
                dispatcher.arena().read_bytes(&dst_dev, 0, &mut out).expect("read");
                out
            }
        };
        assert_eq!(copied, pattern, "kind {kind:?}");
    }
}

#[test]
fn freed_buffer_lifetime_ends_and_address_space_may_be_reused() {
    let (device, mut dispatcher) = dispatcher();
    let pattern: Vec<u8> = (0..1024).map(|i| (i % 251) as u8).collect();

    let first = dispatcher.alloc(1024).expect("alloc");
    dispatcher.arena().write_bytes(&first, 0, &pattern).expect("write");
    dispatcher.free(first);
    assert_eq!(device.stats().buffers_live, 0);
    assert_eq!(dispatcher.arena().stats().live_bytes, 0);

    let second = dispatcher.alloc(1024).expect("alloc");
    assert_eq!(second.length(), 1024);
    assert_eq!(dispatcher.arena().stats().total_allocations, 2);
    assert_eq!(dispatcher.arena().stats().live_buffers, 1);
}

#[test]
fn buffer_bound_to_pending_work_outlives_free() {
    let device = SimDevice::new();
    device.register_kernel("fill", |inv| {
        let data = unsafe { inv.buffer(0).as_slice_mut::<u32>() };
        inv.for_each_thread(|[x, _, _]| data[x] = 7);
    });
    let mut dispatcher = Dispatcher::with_device(device.clone(), &RuntimeConfig::default()).expect("dispatcher");
    let library = dispatcher
        .load_library("kernel void fill(device uint* data [[buffer(0)]]) {}")
        .expect("compile");
    let kernel = dispatcher.get_function(&library, "fill").expect("function");

    let data = dispatcher.alloc(32 * 4).expect("alloc");
    let _ = dispatcher.launch(&kernel, &[&data], metallic_dispatch::LaunchConfig::d1(1, 32)).expect("launch");
    dispatcher.free(data);
    assert_eq!(device.stats().buffers_live, 1);

    dispatcher.sync();
    assert_eq!(device.stats().dispatches_executed, 1);
}
