use std::sync::Arc;

use metallic_dispatch::{
    BatcherState, ContextCell, Dispatcher, ErrorKind, FlushOutcome, KernelHandle, LaunchConfig, LaunchOutcome, MetalError, RuntimeConfig, backend::{SimDevice, SimDeviceConfig}
};

const SOURCE: &str = r#"
#include <metal_stdlib>
using namespace metal;

kernel void add_one(device uint* data [[buffer(0)]], uint i [[thread_position_in_grid]]) {
    data[i] += 1;
}

kernel void copy_u32(device uint* dst [[buffer(0)]],
                     const device uint* src [[buffer(1)]],
                     uint i [[thread_position_in_grid]]) {
    dst[i] = src[i];
}
"#;

fn register_bodies(device: &SimDevice) {
    device.register_kernel("add_one", |inv| {
        let data = unsafe { inv.buffer(0).as_slice_mut::<u32>() };
        inv.for_each_thread(|[x, _, _]| data[x] += 1);
    });
    device.register_kernel("copy_u32", |inv| {
        let dst = unsafe { inv.buffer(0).as_slice_mut::<u32>() };
        let src = unsafe { inv.buffer(1).as_slice::<u32>() };
        inv.for_each_thread(|[x, _, _]| dst[x] = src[x]);
    });
}

fn dispatcher(capacity: usize) -> (SimDevice, Dispatcher<SimDevice>, KernelHandle<SimDevice>) {
    let device = SimDevice::new();
    register_bodies(&device);
    let dispatcher = Dispatcher::with_device(device.clone(), &RuntimeConfig::default().with_queue_capacity(capacity)).expect("dispatcher");
    let library = dispatcher.load_library(SOURCE).expect("compile");
    let kernel = dispatcher.get_function(&library, "add_one").expect("function");
    (device, dispatcher, kernel)
}

fn read_u32s(dispatcher: &Dispatcher<SimDevice>, buffer: &metallic_dispatch::backend::sim::SimBuffer, count: usize) -> Vec<u32> {
    unsafe { dispatcher.arena().read_to_vec(buffer, count) }.expect("read")
}

#[test]
fn second_launch_at_capacity_two_flushes_implicitly() {
    let (device, mut dispatcher, kernel) = dispatcher(2);
    let data = dispatcher.alloc(32 * 4).expect("alloc");
    let config = LaunchConfig::from_dims(1, 1, 1, 32, 1, 1);

    assert_eq!(dispatcher.launch(&kernel, &[&data], config).expect("launch"), LaunchOutcome::Encoded);
    assert_eq!(dispatcher.batcher().pending_dispatches(), 1);

    assert_eq!(dispatcher.launch(&kernel, &[&data], config).expect("launch"), LaunchOutcome::Flushed);
    assert_eq!(dispatcher.batcher().pending_dispatches(), 0);
    assert_eq!(dispatcher.batcher().state(), BatcherState::Submitted);
    assert_eq!(dispatcher.batcher().stats().implicit_flushes, 1);
    assert_eq!(device.stats().dispatches_encoded, 2);
}

#[test]
fn batch_never_exceeds_capacity() {
    let capacity = 5;
    let (device, mut dispatcher, kernel) = dispatcher(capacity);
    let data = dispatcher.alloc(32 * 4).expect("alloc");
    let config = LaunchConfig::d1(1, 32);

    let mut expected_pending = 0;
    for step in 0..200 {
        if rand::random::<u8>() % 7 == 0 {
            let outcome = dispatcher.flush();
            assert_eq!(outcome.submitted(), expected_pending > 0, "step {step}");
            expected_pending = 0;
            continue;
        }
        let outcome = dispatcher.launch(&kernel, &[&data], config).expect("launch");
        expected_pending += 1;
        if expected_pending == capacity {
            assert_eq!(outcome, LaunchOutcome::Flushed, "step {step}");
            expected_pending = 0;
        } else {
            assert_eq!(outcome, LaunchOutcome::Encoded, "step {step}");
        }
        assert!(dispatcher.batcher().pending_dispatches() <= capacity);
        assert_eq!(dispatcher.batcher().pending_dispatches(), expected_pending);
    }

    dispatcher.sync();
    let launched = dispatcher.batcher().stats().dispatches as usize;
    assert_eq!(device.stats().dispatches_executed, launched);
    assert!(read_u32s(&dispatcher, &data, 32).iter().all(|v| *v as usize == launched));
}

#[test]
fn sync_leaves_nothing_open() {
    let (device, mut dispatcher, kernel) = dispatcher(4);
    let data = dispatcher.alloc(64 * 4).expect("alloc");
    for _ in 0..6 {
        let _ = dispatcher.launch(&kernel, &[&data], LaunchConfig::d1(2, 32)).expect("launch");
    }

    dispatcher.sync();
    assert_eq!(dispatcher.batcher().state(), BatcherState::Idle);
    assert_eq!(dispatcher.batcher().pending_dispatches(), 0);
    let stats = device.stats();
    assert_eq!(stats.command_buffers_created, stats.command_buffers_completed);
    assert_eq!(read_u32s(&dispatcher, &data, 64), vec![6; 64]);

    dispatcher.sync();
    assert_eq!(dispatcher.batcher().state(), BatcherState::Idle);
}

#[test]
fn second_flush_is_a_no_op() {
    let (device, mut dispatcher, kernel) = dispatcher(8);
    let data = dispatcher.alloc(32 * 4).expect("alloc");
    let _ = dispatcher.launch(&kernel, &[&data], LaunchConfig::d1(1, 32)).expect("launch");

    assert_eq!(dispatcher.flush(), FlushOutcome::Submitted { dispatches: 1 });
    assert_eq!(dispatcher.flush(), FlushOutcome::Idle);
    assert_eq!(dispatcher.batcher().stats().flushes, 1);
    assert_eq!(device.stats().command_buffers_created, 1);
}

#[test]
fn flush_submits_without_completing() {
    let (device, mut dispatcher, kernel) = dispatcher(8);
    let data = dispatcher.alloc(32 * 4).expect("alloc");
    let _ = dispatcher.launch(&kernel, &[&data], LaunchConfig::d1(1, 32)).expect("launch");

    dispatcher.flush();
    assert_eq!(device.stats().dispatches_executed, 0);
    assert_eq!(read_u32s(&dispatcher, &data, 32), vec![0; 32]);

    dispatcher.sync();
    assert_eq!(device.stats().dispatches_executed, 1);
    assert_eq!(read_u32s(&dispatcher, &data, 32), vec![1; 32]);
}

#[test]
fn dispatches_run_in_launch_order_across_batches() {
    let (device, mut dispatcher, add_one) = dispatcher(2);
    let library = dispatcher.load_library(SOURCE).expect("compile");
    let copy = dispatcher.get_function(&library, "copy_u32").expect("function");
    let src = dispatcher.alloc(32 * 4).expect("alloc");
    let dst = dispatcher.alloc(32 * 4).expect("alloc");
    let config = LaunchConfig::d1(1, 32);

    let _ = dispatcher.launch(&add_one, &[&src], config).expect("launch");
    let _ = dispatcher.launch(&add_one, &[&src], config).expect("launch");
    let _ = dispatcher.launch(&copy, &[&dst, &src], config).expect("launch");
    let _ = dispatcher.launch(&add_one, &[&src], config).expect("launch");
    dispatcher.sync();

    assert_eq!(read_u32s(&dispatcher, &dst, 32), vec![2; 32]);
    assert_eq!(read_u32s(&dispatcher, &src, 32), vec![3; 32]);
    assert_eq!(device.stats().command_buffers_completed, 2);
}

#[test]
fn oversized_threadgroup_is_rejected_before_dispatch() {
    let device = SimDevice::with_config(SimDeviceConfig::default().with_max_threads_per_threadgroup(256));
    let mut dispatcher = Dispatcher::with_device(device.clone(), &RuntimeConfig::default()).expect("dispatcher");
    let library = dispatcher.load_library(SOURCE).expect("compile");
    let kernel = dispatcher.get_function(&library, "add_one").expect("function");
    let data = dispatcher.alloc(1024 * 4).expect("alloc");

    let err = dispatcher
        .launch(&kernel, &[&data], LaunchConfig::from_dims(1, 1, 1, 32, 16, 1))
        .expect_err("512 threads > 256");
    assert!(matches!(err, MetalError::ThreadgroupTooLarge { requested: 512, max: 256 }));
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(device.stats().dispatches_encoded, 0);
    assert_eq!(dispatcher.batcher().pending_dispatches(), 0);

    let _ = dispatcher.launch(&kernel, &[&data], LaunchConfig::from_dims(1, 1, 1, 32, 8, 1)).expect("256 threads fit");
    assert_eq!(device.stats().dispatches_encoded, 1);
}

#[test]
fn rejected_launch_leaves_nothing_to_flush_or_wait_on() {
    let device = SimDevice::with_config(SimDeviceConfig::default().with_max_threads_per_threadgroup(256));
    register_bodies(&device);
    let mut dispatcher = Dispatcher::with_device(device.clone(), &RuntimeConfig::default()).expect("dispatcher");
    let library = dispatcher.load_library(SOURCE).expect("compile");
    let kernel = dispatcher.get_function(&library, "add_one").expect("function");
    let data = dispatcher.alloc(1024 * 4).expect("alloc");
    let oversized = LaunchConfig::from_dims(1, 1, 1, 32, 16, 1);

    assert!(dispatcher.launch(&kernel, &[&data], oversized).is_err());
    assert_eq!(dispatcher.batcher().state(), BatcherState::Idle);
    assert_eq!(dispatcher.flush(), FlushOutcome::Idle);
    dispatcher.sync();
    assert_eq!(dispatcher.batcher().state(), BatcherState::Idle);
    assert_eq!(dispatcher.batcher().pending_dispatches(), 0);
    let stats = device.stats();
    assert_eq!(stats.command_buffers_created, 0);
    assert_eq!(stats.command_buffers_created, stats.command_buffers_completed);

    let _ = dispatcher.launch(&kernel, &[&data], LaunchConfig::d1(1, 32)).expect("launch");
    assert_eq!(dispatcher.flush(), FlushOutcome::Submitted { dispatches: 1 });
    assert!(dispatcher.launch(&kernel, &[&data], oversized).is_err());
    assert_eq!(dispatcher.batcher().state(), BatcherState::Submitted);
    assert_eq!(dispatcher.flush(), FlushOutcome::Idle);
    dispatcher.sync();
    let stats = device.stats();
    assert_eq!(stats.command_buffers_created, 1);
    assert_eq!(stats.command_buffers_completed, 1);
    assert_eq!(read_u32s(&dispatcher, &data, 32), vec![1; 32]);
}

#[test]
fn failed_command_buffer_creation_keeps_submitted_work() {
    let device = SimDevice::with_config(SimDeviceConfig::default().with_command_buffer_limit(1));
    register_bodies(&device);
    let mut dispatcher =
        Dispatcher::with_device(device.clone(), &RuntimeConfig::default().with_queue_capacity(1)).expect("dispatcher");
    let library = dispatcher.load_library(SOURCE).expect("compile");
    let kernel = dispatcher.get_function(&library, "add_one").expect("function");
    let data = dispatcher.alloc(32 * 4).expect("alloc");
    let config = LaunchConfig::d1(1, 32);

    assert_eq!(dispatcher.launch(&kernel, &[&data], config).expect("launch"), LaunchOutcome::Flushed);
    let err = dispatcher.launch(&kernel, &[&data], config).expect_err("no command buffers left");
    assert!(matches!(err, MetalError::CommandBufferCreationFailed));
    assert_eq!(dispatcher.batcher().state(), BatcherState::Submitted);

    dispatcher.sync();
    let stats = device.stats();
    assert_eq!(stats.command_buffers_completed, 1);
    assert_eq!(stats.dispatches_executed, 1);
    assert_eq!(read_u32s(&dispatcher, &data, 32), vec![1; 32]);
}

#[test]
fn handles_from_one_cell_share_a_batcher() {
    let cell = ContextCell::<SimDevice>::new();
    let device = SimDevice::new();
    register_bodies(&device);
    let mut a = Dispatcher::initialize_in(&cell, 8, || Ok(device.clone())).expect("first handle");
    let b = Dispatcher::initialize_in(&cell, 2, || Ok(SimDevice::new())).expect("second handle");
    assert!(Arc::ptr_eq(a.context(), b.context()));
    assert_eq!(b.batcher().queue_capacity(), 8);

    let library = a.load_library(SOURCE).expect("compile");
    let kernel = a.get_function(&library, "add_one").expect("function");
    let data = a.alloc(32 * 4).expect("alloc");
    let _ = a.launch(&kernel, &[&data], LaunchConfig::d1(1, 32)).expect("launch");
    assert_eq!(b.batcher().pending_dispatches(), 1);

    b.sync();
    assert_eq!(a.batcher().state(), BatcherState::Idle);
    assert_eq!(a.batcher().pending_dispatches(), 0);
    assert_eq!(device.stats().dispatches_executed, 1);
    assert_eq!(read_u32s(&a, &data, 32), vec![1; 32]);
}

#[test]
fn simd_width_other_than_32_is_rejected() {
    let device = SimDevice::with_config(SimDeviceConfig::default().with_thread_execution_width(64));
    let dispatcher = Dispatcher::with_device(device.clone(), &RuntimeConfig::default()).expect("dispatcher");
    let library = dispatcher.load_library(SOURCE).expect("compile");
    let kernel = dispatcher.get_function(&library, "add_one").expect("function");

    let err = dispatcher.launch(&kernel, &[], LaunchConfig::d1(1, 32)).expect_err("simd 64");
    assert_eq!(err.to_string(), "Expected SIMD width of 32, found 64 which is not supported");
    assert_eq!(device.stats().dispatches_encoded, 0);
}

#[test]
fn zero_capacity_is_rejected() {
    let err = Dispatcher::with_device(SimDevice::new(), &RuntimeConfig::default().with_queue_capacity(0)).expect_err("capacity 0");
    assert!(matches!(err, MetalError::InvalidQueueCapacity));
}
