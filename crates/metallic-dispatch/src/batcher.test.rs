#![cfg(test)]

use super::*;
use crate::{
    ErrorKind, backend::{SimDevice, SimDeviceConfig}, loader::KernelLoader, types::{ComputeDevice, GridSize, ThreadgroupSize}
};

const SOURCE: &str = "kernel void noop(device uint* out [[buffer(0)]]) {}";

struct Fixture {
    device: SimDevice,
    batcher: DispatchBatcher<SimDevice>,
    kernel: KernelHandle<SimDevice>,
}

fn fixture(config: SimDeviceConfig, capacity: usize) -> Fixture {
    let device = SimDevice::with_config(config);
    let context = Arc::new(DeviceContext::new(device.clone(), capacity).expect("context"));
    let loader = KernelLoader::new(context.clone());
    let library = loader.load_library(SOURCE).expect("compile");
    let kernel = loader.get_function(&library, "noop").expect("function");
    Fixture {
        device,
        batcher: DispatchBatcher::new(context, PipelinePolicy::Cached),
        kernel,
    }
}

#[test]
fn walks_idle_encoding_submitted_idle() {
    let Fixture { device, mut batcher, kernel } = fixture(SimDeviceConfig::default(), 8);
    let out = device.new_shared_buffer(128).expect("alloc");
    assert_eq!(batcher.state(), BatcherState::Idle);

    assert_eq!(batcher.launch(&kernel, &[&out], LaunchConfig::d1(1, 32)).expect("launch"), LaunchOutcome::Encoded);
    assert_eq!(batcher.state(), BatcherState::Encoding);
    assert_eq!(batcher.pending_dispatches(), 1);

    assert_eq!(batcher.flush(), FlushOutcome::Submitted { dispatches: 1 });
    assert_eq!(batcher.state(), BatcherState::Submitted);
    assert_eq!(batcher.pending_dispatches(), 0);

    batcher.sync();
    assert_eq!(batcher.state(), BatcherState::Idle);
    assert_eq!(device.stats().command_buffers_completed, 1);
}

#[test]
fn launch_after_flush_opens_a_fresh_command_buffer() {
    let Fixture { device, mut batcher, kernel } = fixture(SimDeviceConfig::default(), 8);
    let out = device.new_shared_buffer(128).expect("alloc");

    let _ = batcher.launch(&kernel, &[&out], LaunchConfig::d1(1, 32)).expect("launch");
    batcher.flush();
    let _ = batcher.launch(&kernel, &[&out], LaunchConfig::d1(1, 32)).expect("launch");

    assert_eq!(batcher.state(), BatcherState::Encoding);
    assert_eq!(batcher.stats().command_buffers_opened, 2);
    assert_eq!(device.stats().command_buffers_created, 2);
}

#[test]
fn flush_without_encoder_is_a_no_op() {
    let Fixture { device, mut batcher, .. } = fixture(SimDeviceConfig::default(), 8);
    assert_eq!(batcher.flush(), FlushOutcome::Idle);
    assert!(!batcher.flush().submitted());
    batcher.sync();
    batcher.sync();
    assert_eq!(batcher.stats().flushes, 0);
    assert_eq!(batcher.stats().syncs, 2);
    assert_eq!(device.stats().command_buffers_created, 0);
}

#[test]
fn zero_buffer_launch_is_legal() {
    let Fixture { device, mut batcher, kernel } = fixture(SimDeviceConfig::default(), 8);
    let _ = batcher.launch(&kernel, &[], LaunchConfig::d1(2, 32)).expect("launch");
    batcher.sync();
    assert_eq!(device.stats().dispatches_executed, 1);
}

#[test]
fn rejects_non_32_simd_width() {
    let Fixture { device, mut batcher, kernel } = fixture(SimDeviceConfig::default().with_thread_execution_width(64), 8);
    let out = device.new_shared_buffer(16).expect("alloc");
    let err = batcher
        .launch(&kernel, &[&out], LaunchConfig::d1(1, 32))
        .expect_err("simd 64");
    assert!(matches!(err, MetalError::UnsupportedSimdWidth { expected: 32, found: 64 }));
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(batcher.pending_dispatches(), 0);
    assert_eq!(device.stats().dispatches_encoded, 0);
}

#[test]
fn validation_covers_every_geometry_rule() {
    let device = SimDevice::with_config(SimDeviceConfig::default().with_max_threads_per_threadgroup(256));
    let library = device.new_library_with_source(SOURCE).expect("compile");
    let function = crate::types::Library::new_function(&library, "noop").expect("function");
    let pipeline = device.new_compute_pipeline_state(&function).expect("pipeline");

    let ok = validate_launch(&pipeline, &LaunchConfig::from_dims(4, 2, 1, 16, 16, 1)).expect("valid");
    assert_eq!(
        ok,
        ThreadExtent {
            width: 64,
            height: 32,
            depth: 1
        }
    );

    assert!(matches!(
        validate_launch(&pipeline, &LaunchConfig::new(GridSize::d1(1), ThreadgroupSize::d2(32, 16))),
        Err(MetalError::ThreadgroupTooLarge { requested: 512, max: 256 })
    ));
    assert!(matches!(
        validate_launch(&pipeline, &LaunchConfig::from_dims(1, 1, 1, 32, 0, 1)),
        Err(MetalError::InvalidLaunch(_))
    ));
    assert!(matches!(
        validate_launch(&pipeline, &LaunchConfig::from_dims(0, 1, 1, 32, 1, 1)),
        Err(MetalError::InvalidLaunch(_))
    ));
    assert!(matches!(
        validate_launch(&pipeline, &LaunchConfig::from_dims(usize::MAX, 1, 1, 32, 1, 1)),
        Err(MetalError::InvalidLaunch(_))
    ));
}

#[test]
fn drop_submits_pending_work() {
    let Fixture { device, mut batcher, kernel } = fixture(SimDeviceConfig::default(), 8);
    let out = device.new_shared_buffer(16).expect("alloc");
    let _ = batcher.launch(&kernel, &[&out], LaunchConfig::d1(1, 32)).expect("launch");
    drop(batcher);
    assert_eq!(device.stats().dispatches_encoded, 1);
    assert_eq!(device.stats().command_buffers_created, 1);
}
