#![cfg(test)]

use super::*;

#[test]
fn total_threads_multiplies_per_dimension() {
    let config = LaunchConfig::from_dims(4, 2, 1, 32, 2, 1);
    let extent = config.total_threads().expect("no overflow");
    assert_eq!(
        extent,
        ThreadExtent {
            width: 128,
            height: 4,
            depth: 1
        }
    );
}

#[test]
fn total_threads_reports_overflow() {
    let config = LaunchConfig::from_dims(usize::MAX, 1, 1, 2, 1, 1);
    assert!(matches!(config.total_threads(), Err(MetalError::InvalidLaunch(_))));
}

#[test]
fn thread_count_of_group() {
    assert_eq!(ThreadgroupSize::new(8, 8, 4).thread_count(), Some(256));
    assert_eq!(ThreadgroupSize::new(usize::MAX, 2, 1).thread_count(), None);
}
