#![cfg(test)]

use super::*;
use crate::types::{CommandBuffer, CommandBufferStatus, CommandQueue, ComputeEncoder};

fn one_dispatch(device: &SimDevice, queue: &SimQueue, name: &str, buffer: &SimBuffer) -> SimCommandBuffer {
    let library = device
        .new_library_with_source(&format!("kernel void {name}(device uint* out) {{}}"))
        .expect("compile");
    let function = library.new_function(name).expect("function");
    let pipeline = device.new_compute_pipeline_state(&function).expect("pipeline");

    let cb = queue.command_buffer().expect("command buffer");
    let encoder = cb.compute_command_encoder().expect("encoder");
    encoder.set_compute_pipeline_state(&pipeline);
    encoder.set_buffer(0, buffer, 0);
    encoder.dispatch_threads(
        ThreadExtent {
            width: 4,
            height: 1,
            depth: 1,
        },
        ThreadgroupSize::d1(4),
    );
    encoder.end_encoding();
    cb
}

#[test]
fn buffers_are_zeroed_and_released_on_drop() {
    let device = SimDevice::new();
    let buffer = device.new_shared_buffer(64).expect("alloc");
    assert_eq!(buffer.length(), 64);
    assert!(unsafe { buffer.as_slice::<u8>() }.iter().all(|b| *b == 0));
    assert_eq!(buffer.contents() as usize % BUFFER_ALIGNMENT, 0);
    assert_eq!(device.stats().bytes_live, 64);

    drop(buffer);
    assert_eq!(device.stats().buffers_live, 0);
    assert_eq!(device.stats().bytes_live, 0);
}

#[test]
fn zero_and_oversized_allocations_fail() {
    let device = SimDevice::with_config(SimDeviceConfig::default().with_max_buffer_length(128));
    assert!(matches!(device.new_shared_buffer(0), Err(MetalError::BufferCreationFailed(0))));
    assert!(matches!(device.new_shared_buffer(129), Err(MetalError::BufferCreationFailed(129))));
    assert!(device.new_shared_buffer(128).is_ok());
}

#[test]
fn registered_body_runs_on_completion_not_on_commit() {
    let device = SimDevice::new();
    device.register_kernel("iota", |inv| {
        let out = unsafe { inv.buffer(0).as_slice_mut::<u32>() };
        inv.for_each_thread(|[x, _, _]| out[x] = x as u32);
    });
    let queue = device.new_command_queue(4).expect("queue");
    let buffer = device.new_shared_buffer(16).expect("alloc");

    let cb = one_dispatch(&device, &queue, "iota", &buffer);
    cb.commit();
    cb.wait_until_scheduled();
    assert_eq!(cb.status(), CommandBufferStatus::Scheduled);
    assert_eq!(unsafe { buffer.as_slice::<u32>() }, &[0, 0, 0, 0]);

    cb.wait_until_completed();
    assert_eq!(cb.status(), CommandBufferStatus::Completed);
    assert_eq!(unsafe { buffer.as_slice::<u32>() }, &[0, 1, 2, 3]);
}

#[test]
fn waiting_on_a_later_buffer_completes_earlier_ones_first() {
    let device = SimDevice::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second"] {
        let order = order.clone();
        device.register_kernel(name, move |inv| lock(&order).push(inv.function.to_string()));
    }
    let queue = device.new_command_queue(4).expect("queue");
    let buffer = device.new_shared_buffer(16).expect("alloc");

    let a = one_dispatch(&device, &queue, "first", &buffer);
    a.commit();
    let b = one_dispatch(&device, &queue, "second", &buffer);
    b.commit();
    assert_eq!(queue.in_flight(), 2);

    b.wait_until_completed();
    assert_eq!(a.status(), CommandBufferStatus::Completed);
    assert_eq!(*lock(&order), vec!["first".to_string(), "second".to_string()]);
    assert_eq!(queue.in_flight(), 0);
}

#[test]
fn full_queue_retires_oldest_before_handing_out_a_buffer() {
    let device = SimDevice::new();
    let queue = device.new_command_queue(1).expect("queue");
    let buffer = device.new_shared_buffer(16).expect("alloc");

    let a = one_dispatch(&device, &queue, "k", &buffer);
    a.commit();
    assert_eq!(queue.in_flight(), 1);

    let _b = queue.command_buffer().expect("command buffer");
    assert_eq!(a.status(), CommandBufferStatus::Completed);
    assert_eq!(queue.in_flight(), 0);
}

#[test]
fn only_one_encoder_per_recording_buffer() {
    let device = SimDevice::new();
    let queue = device.new_command_queue(2).expect("queue");
    let cb = queue.command_buffer().expect("command buffer");

    let encoder = cb.compute_command_encoder().expect("encoder");
    assert!(matches!(cb.compute_command_encoder(), Err(MetalError::ComputeEncoderCreationFailed)));
    encoder.end_encoding();
    cb.commit();
    assert!(matches!(cb.compute_command_encoder(), Err(MetalError::ComputeEncoderCreationFailed)));
}

#[test]
fn pipeline_reports_configured_limits() {
    let device = SimDevice::with_config(
        SimDeviceConfig::default()
            .with_thread_execution_width(64)
            .with_max_threads_per_threadgroup(256),
    );
    let library = device.new_library_with_source("kernel void k() {}").expect("compile");
    assert!(library.new_function("missing").is_none());
    let pipeline = device
        .new_compute_pipeline_state(&library.new_function("k").expect("function"))
        .expect("pipeline");
    assert_eq!(pipeline.thread_execution_width(), 64);
    assert_eq!(pipeline.max_total_threads_per_threadgroup(), 256);
    assert_eq!(device.stats().pipelines_built, 1);
}

#[test]
fn concurrent_waiter_returns_only_after_the_body_finishes() {
    use std::sync::{
        atomic::{AtomicBool, Ordering}, mpsc
    };

    let device = SimDevice::new();
    let (started_tx, started_rx) = mpsc::channel();
    let started_tx = Mutex::new(started_tx);
    let finished = Arc::new(AtomicBool::new(false));
    let body_finished = finished.clone();
    device.register_kernel("slow", move |_| {
        let _ = lock(&started_tx).send(());
        std::thread::sleep(std::time::Duration::from_millis(50));
        body_finished.store(true, Ordering::SeqCst);
    });
    let queue = device.new_command_queue(4).expect("queue");
    let buffer = device.new_shared_buffer(16).expect("alloc");

    let cb = one_dispatch(&device, &queue, "slow", &buffer);
    cb.commit();
    cb.wait_until_scheduled();

    let first = {
        let cb = cb.clone();
        std::thread::spawn(move || cb.wait_until_completed())
    };
    started_rx.recv().expect("body started");
    cb.wait_until_completed();
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(cb.status(), CommandBufferStatus::Completed);

    first.join().expect("waiter thread");
    assert_eq!(device.stats().dispatches_executed, 1);
    assert_eq!(device.stats().command_buffers_completed, 1);
}

#[test]
fn command_buffer_limit_fails_creation() {
    let device = SimDevice::with_config(SimDeviceConfig::default().with_command_buffer_limit(2));
    let queue = device.new_command_queue(4).expect("queue");
    let _first = queue.command_buffer().expect("first");
    let _second = queue.command_buffer().expect("second");
    assert!(matches!(queue.command_buffer(), Err(MetalError::CommandBufferCreationFailed)));
    assert_eq!(device.stats().command_buffers_created, 2);
}
