use metallic_dispatch_env::{DispatchEnvVar, EnvVarError, EnvVarGuard, PIPELINE_CACHE, QUEUE_CAPACITY};
use serial_test::serial;

#[test]
#[serial]
fn unset_variable_reads_as_none() {
    let _clear = EnvVarGuard::unset(DispatchEnvVar::QueueCapacity);
    assert_eq!(QUEUE_CAPACITY.get().expect("read capacity"), None);
    assert_eq!(QUEUE_CAPACITY.get_or(64).expect("read capacity"), 64);
}

#[test]
#[serial]
fn typed_guard_restores_previous_value() {
    let _outer = EnvVarGuard::set(DispatchEnvVar::QueueCapacity, "4");
    {
        let guard = QUEUE_CAPACITY.set_guard(32).expect("set capacity");
        assert_eq!(*guard, 32);
        assert_eq!(QUEUE_CAPACITY.get().expect("read capacity"), Some(32));
    }
    assert_eq!(QUEUE_CAPACITY.get().expect("read capacity"), Some(4));
}

#[test]
#[serial]
fn malformed_value_reports_key_and_raw_text() {
    let _bad = EnvVarGuard::set(DispatchEnvVar::PipelineCache, "sometimes");
    match PIPELINE_CACHE.get() {
        Err(EnvVarError::Parse { name, value, .. }) => {
            assert_eq!(name, "METALLIC_DISPATCH_PIPELINE_CACHE");
            assert_eq!(value, "sometimes");
        }
        other => panic!("expected parse error, got {other:?}"),
    }
}
