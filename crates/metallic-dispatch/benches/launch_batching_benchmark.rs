use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use metallic_dispatch::{Dispatcher, LaunchConfig, PipelinePolicy, RuntimeConfig, backend::SimDevice};

const SOURCE: &str = "kernel void noop(device uint* data [[buffer(0)]]) {}";

fn bench_capacity_vs_launches(c: &mut Criterion) {
    let mut group = c.benchmark_group("launch_then_sync");

    for &capacity in &[1usize, 8, 64] {
        for policy in [PipelinePolicy::Cached, PipelinePolicy::RebuildEveryLaunch] {
            let id = BenchmarkId::new(format!("{policy:?}"), capacity);
            group.bench_with_input(id, &capacity, |b, &capacity| {
                let config = RuntimeConfig::default().with_queue_capacity(capacity).with_pipeline_policy(policy);
                let mut dispatcher = Dispatcher::with_device(SimDevice::new(), &config).expect("dispatcher");
                let library = dispatcher.load_library(SOURCE).expect("compile");
                let kernel = dispatcher.get_function(&library, "noop").expect("function");
                let data = dispatcher.alloc(4096).expect("alloc");

                b.iter(|| {
                    for _ in 0..256 {
                        let _ = dispatcher.launch(&kernel, &[&data], LaunchConfig::d1(32, 32)).expect("launch");
                    }
                    dispatcher.sync();
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_capacity_vs_launches);
criterion_main!(benches);
