use metallic_dispatch::{Dispatcher, LaunchConfig, PipelinePolicy, RuntimeConfig, backend::SimDevice};

const SOURCE: &str = r#"
kernel void scale(device float* y [[buffer(0)]], uint i [[thread_position_in_grid]]) { y[i] *= 2.0f; }
kernel void shift(device float* y [[buffer(0)]], uint i [[thread_position_in_grid]]) { y[i] += 1.0f; }
"#;

struct Run {
    output: Vec<f32>,
    pipelines_built: usize,
    dispatches_executed: usize,
}

fn run(policy: PipelinePolicy, input: &[f32]) -> Run {
    let device = SimDevice::new();
    device.register_kernel("scale", |inv| {
        let y = unsafe { inv.buffer(0).as_slice_mut::<f32>() };
        inv.for_each_thread(|[x, _, _]| y[x] *= 2.0);
    });
    device.register_kernel("shift", |inv| {
        let y = unsafe { inv.buffer(0).as_slice_mut::<f32>() };
        inv.for_each_thread(|[x, _, _]| y[x] += 1.0);
    });

    let config = RuntimeConfig::default().with_queue_capacity(3).with_pipeline_policy(policy);
    let mut dispatcher = Dispatcher::with_device(device.clone(), &config).expect("dispatcher");
    assert_eq!(dispatcher.batcher().pipeline_policy(), policy);
    let library = dispatcher.load_library(SOURCE).expect("compile");
    let scale = dispatcher.get_function(&library, "scale").expect("scale");
    let shift = dispatcher.get_function(&library, "shift").expect("shift");

    let bytes: Vec<u8> = input.iter().flat_map(|v| v.to_ne_bytes()).collect();
    let y = dispatcher.alloc_from_bytes(&bytes).expect("alloc");
    let launch = LaunchConfig::d1(input.len() / 32, 32);
    for round in 0..5 {
        let kernel = if round % 2 == 0 { &scale } else { &shift };
        let _ = dispatcher.launch(kernel, &[&y], launch).expect("launch");
        let _ = dispatcher.launch(&shift, &[&y], launch).expect("launch");
    }
    dispatcher.sync();

    Run {
        output: unsafe { dispatcher.arena().read_to_vec(&y, input.len()) }.expect("read"),
        pipelines_built: device.stats().pipelines_built,
        dispatches_executed: device.stats().dispatches_executed,
    }
}

#[test]
fn caching_pipelines_does_not_change_results() {
    let input: Vec<f32> = (0..64).map(|_| f32::from(rand::random::<u8>())).collect();

    let cached = run(PipelinePolicy::Cached, &input);
    let rebuilt = run(PipelinePolicy::RebuildEveryLaunch, &input);

    assert_eq!(cached.output, rebuilt.output);
    assert_eq!(cached.dispatches_executed, rebuilt.dispatches_executed);
    assert_eq!(cached.dispatches_executed, 10);

    assert_eq!(cached.pipelines_built, 2);
    assert_eq!(rebuilt.pipelines_built, 10);
}

#[test]
fn clearing_the_cache_rebuilds_on_next_launch() {
    let device = SimDevice::new();
    let mut dispatcher = Dispatcher::with_device(device.clone(), &RuntimeConfig::default()).expect("dispatcher");
    let library = dispatcher.load_library(SOURCE).expect("compile");
    let scale = dispatcher.get_function(&library, "scale").expect("scale");
    let y = dispatcher.alloc(32 * 4).expect("alloc");
    let launch = LaunchConfig::d1(1, 32);

    let _ = dispatcher.launch(&scale, &[&y], launch).expect("launch");
    let _ = dispatcher.launch(&scale, &[&y], launch).expect("launch");
    assert_eq!(device.stats().pipelines_built, 1);
    assert_eq!(dispatcher.batcher().pipeline_stats().entries, 1);

    dispatcher.clear_pipeline_cache();
    assert_eq!(dispatcher.batcher().pipeline_stats().entries, 0);
    let _ = dispatcher.launch(&scale, &[&y], launch).expect("launch");
    dispatcher.sync();
    assert_eq!(device.stats().pipelines_built, 2);
    assert_eq!(device.stats().dispatches_executed, 3);
}
