#![cfg(target_os = "macos")]

use metallic_dispatch::{BatcherState, Dispatcher, LaunchConfig, LaunchOutcome, MetalError, RuntimeConfig, backend::MetalDevice};
use serial_test::serial;

const SOURCE: &str = r#"
#include <metal_stdlib>
using namespace metal;

kernel void add_one(device uint* data [[buffer(0)]], uint i [[thread_position_in_grid]]) {
    data[i] += 1;
}
"#;

fn metal_dispatcher(capacity: usize) -> Option<Dispatcher<MetalDevice>> {
    let device = match MetalDevice::create_system_default_device() {
        Ok(device) => device,
        Err(MetalError::DeviceNotFound) => return None,
        Err(err) => panic!("unexpected device error: {err}"),
    };
    Some(Dispatcher::with_device(device, &RuntimeConfig::default().with_queue_capacity(capacity)).expect("dispatcher"))
}

#[test]
#[serial]
fn batched_launches_complete_on_sync() {
    let Some(mut dispatcher) = metal_dispatcher(2) else {
        return;
    };
    let library = dispatcher.load_library(SOURCE).expect("compile");
    let kernel = dispatcher.get_function(&library, "add_one").expect("function");
    let data = dispatcher.alloc(64 * 4).expect("alloc");

    assert_eq!(dispatcher.launch(&kernel, &[&data], LaunchConfig::d1(2, 32)).expect("launch"), LaunchOutcome::Encoded);
    assert_eq!(dispatcher.launch(&kernel, &[&data], LaunchConfig::d1(2, 32)).expect("launch"), LaunchOutcome::Flushed);
    let _ = dispatcher.launch(&kernel, &[&data], LaunchConfig::d1(2, 32)).expect("launch");
    dispatcher.sync();

    assert_eq!(dispatcher.batcher().state(), BatcherState::Idle);
    let values: Vec<u32> = unsafe { dispatcher.arena().read_to_vec(&data, 64) }.expect("read");
    assert_eq!(values, vec![3; 64]);
}

#[test]
#[serial]
fn process_wide_context_is_shared() {
    let first = match Dispatcher::initialize(4) {
        Ok(dispatcher) => dispatcher,
        Err(MetalError::DeviceNotFound) => return,
        Err(err) => panic!("unexpected init error: {err}"),
    };
    let second = Dispatcher::initialize(16).expect("second initialize");
    assert!(std::sync::Arc::ptr_eq(first.context(), second.context()));
    assert_eq!(second.context().queue_capacity(), 4);
}

#[test]
#[serial]
fn unknown_function_is_a_compilation_error() {
    let Some(dispatcher) = metal_dispatcher(4) else {
        return;
    };
    let library = dispatcher.load_library(SOURCE).expect("compile");
    let err = dispatcher.get_function(&library, "missing").expect_err("missing");
    assert_eq!(err.to_string(), "Could not find function missing in library");
}
