#![cfg(test)]

use super::*;
use crate::{ErrorKind, backend::SimDevice};

const SOURCE: &str = r#"
kernel void scale(device float* y [[buffer(0)]], uint i [[thread_position_in_grid]]) {
    y[i] *= 2.0f;
}

kernel void shift(device float* y [[buffer(0)]], uint i [[thread_position_in_grid]]) {
    y[i] += 1.0f;
}
"#;

fn loader() -> (SimDevice, KernelLoader<SimDevice>) {
    let device = SimDevice::new();
    let context = Arc::new(DeviceContext::new(device.clone(), 4).expect("context"));
    (device, KernelLoader::new(context))
}

#[test]
fn resolves_each_entry_point_with_a_unique_id() {
    let (_, loader) = loader();
    let library = loader.load_library(SOURCE).expect("compile");
    let scale = loader.get_function(&library, "scale").expect("scale");
    let shift = loader.get_function(&library, "shift").expect("shift");
    let scale_again = loader.get_function(&library, "scale").expect("scale");

    assert_eq!(scale.name(), "scale");
    assert_ne!(scale.id(), shift.id());
    assert_ne!(scale.id(), scale_again.id());
    assert_eq!(scale.clone().id(), scale.id());
}

#[test]
fn missing_entry_point_names_the_function() {
    let (_, loader) = loader();
    let library = loader.load_library(SOURCE).expect("compile");
    let err = loader.get_function(&library, "saxpy").expect_err("missing");
    assert!(matches!(&err, MetalError::FunctionNotFound(name) if name == "saxpy"));
    assert_eq!(err.kind(), ErrorKind::Compilation);
}

#[test]
fn compile_failure_carries_the_diagnostic() {
    let (_, loader) = loader();
    let err = loader.load_library("kernel void broken( {").expect_err("must fail");
    match err {
        MetalError::LibraryCompilationFailed(diagnostic) => assert!(diagnostic.starts_with("program_source:1: error:"), "{diagnostic}"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn cached_policy_builds_once_per_handle() {
    let (device, loader) = loader();
    let library = loader.load_library(SOURCE).expect("compile");
    let scale = loader.get_function(&library, "scale").expect("scale");
    let shift = loader.get_function(&library, "shift").expect("shift");

    let mut cache = PipelineCache::<SimDevice>::new(PipelinePolicy::Cached);
    for _ in 0..3 {
        cache.pipeline(&device, &scale).expect("pipeline");
    }
    let pipeline = cache.pipeline(&device, &shift).expect("pipeline");
    assert_eq!(pipeline.function_name(), "shift");

    assert_eq!(device.stats().pipelines_built, 2);
    assert_eq!(
        cache.stats(),
        PipelineCacheStats {
            hits: 2,
            misses: 2,
            entries: 2,
        }
    );

    cache.clear();
    cache.pipeline(&device, &scale).expect("pipeline");
    assert_eq!(device.stats().pipelines_built, 3);
}

#[test]
fn rebuild_policy_never_caches() {
    let (device, loader) = loader();
    let library = loader.load_library(SOURCE).expect("compile");
    let scale = loader.get_function(&library, "scale").expect("scale");

    let mut cache = PipelineCache::<SimDevice>::new(PipelinePolicy::RebuildEveryLaunch);
    for _ in 0..3 {
        cache.pipeline(&device, &scale).expect("pipeline");
    }
    assert_eq!(device.stats().pipelines_built, 3);
    assert_eq!(cache.stats().entries, 0);
    assert_eq!(cache.stats().hits, 0);
}
