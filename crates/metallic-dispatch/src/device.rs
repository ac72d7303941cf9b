//! The device context: one device, its command queue and the batching threshold.

use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    MetalError, batcher::{DispatchBatcher, SharedBatcher}, loader::PipelinePolicy, types::ComputeDevice
};

/// A device plus the single command queue every batch is submitted on.
#[derive(Debug)]
pub struct DeviceContext<D: ComputeDevice> {
    device: D,
    queue: D::Queue,
    queue_capacity: usize,
}

impl<D: ComputeDevice> DeviceContext<D> {
    /// Create the command queue on `device`.
    ///
    /// `queue_capacity` bounds both the in-flight command buffers on the queue
    /// and the dispatches accumulated per batch.
    pub fn new(device: D, queue_capacity: usize) -> Result<Self, MetalError> {
        if queue_capacity == 0 {
            return Err(MetalError::InvalidQueueCapacity);
        }
        let queue = device.new_command_queue(queue_capacity)?;
        tracing::info!(device = %device.name(), queue_capacity, "compute device initialized");
        Ok(Self {
            device,
            queue,
            queue_capacity,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn queue(&self) -> &D::Queue {
        &self.queue
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

/// The device context together with the one batcher allowed to drive its queue.
pub struct SharedContext<D: ComputeDevice> {
    pub context: Arc<DeviceContext<D>>,
    pub batcher: SharedBatcher<D>,
}

impl<D: ComputeDevice> Clone for SharedContext<D> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            batcher: self.batcher.clone(),
        }
    }
}

impl<D: ComputeDevice> std::fmt::Debug for SharedContext<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedContext").finish_non_exhaustive()
    }
}

impl<D: ComputeDevice> SharedContext<D> {
    /// A fresh context on `device` with its own idle batcher.
    pub fn new(device: D, queue_capacity: usize, policy: PipelinePolicy) -> Result<Self, MetalError> {
        let context = Arc::new(DeviceContext::new(device, queue_capacity)?);
        let batcher = Arc::new(Mutex::new(DispatchBatcher::new(context.clone(), policy)));
        Ok(Self { context, batcher })
    }
}

/// Lazily-initialised slot holding at most one [`SharedContext`].
///
/// The first successful [`ContextCell::get_or_try_init`] creates the context
/// and its batcher; later calls return the same pair and ignore their
/// arguments. A failed initialisation leaves the cell empty.
pub struct ContextCell<D: ComputeDevice> {
    slot: Mutex<Option<SharedContext<D>>>,
}

impl<D: ComputeDevice> Default for ContextCell<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: ComputeDevice> ContextCell<D> {
    pub const fn new() -> Self {
        Self { slot: Mutex::new(None) }
    }

    pub fn get(&self) -> Option<SharedContext<D>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_or_try_init<F>(&self, queue_capacity: usize, policy: PipelinePolicy, make_device: F) -> Result<SharedContext<D>, MetalError>
    where
        F: FnOnce() -> Result<D, MetalError>,
    {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slot.as_ref() {
            if existing.context.queue_capacity != queue_capacity {
                tracing::debug!(
                    requested = queue_capacity,
                    active = existing.context.queue_capacity,
                    "device already initialized; keeping existing queue capacity"
                );
            }
            return Ok(existing.clone());
        }
        let shared = SharedContext::new(make_device()?, queue_capacity, policy)?;
        *slot = Some(shared.clone());
        Ok(shared)
    }
}

#[cfg(target_os = "macos")]
static METAL_CONTEXT: ContextCell<crate::backend::MetalDevice> = ContextCell::new();

/// Initialise the process-wide Metal context on the system default device.
#[cfg(target_os = "macos")]
pub fn initialize(queue_capacity: usize, policy: PipelinePolicy) -> Result<SharedContext<crate::backend::MetalDevice>, MetalError> {
    METAL_CONTEXT.get_or_try_init(queue_capacity, policy, crate::backend::MetalDevice::create_system_default_device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimDevice;

    fn lock_batcher(shared: &SharedContext<SimDevice>) -> std::sync::MutexGuard<'_, DispatchBatcher<SimDevice>> {
        shared.batcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[test]
    fn second_initialization_returns_the_first_context() {
        let cell = ContextCell::<SimDevice>::new();
        let first = cell.get_or_try_init(2, PipelinePolicy::Cached, || Ok(SimDevice::new())).expect("init");
        let second = cell
            .get_or_try_init(99, PipelinePolicy::RebuildEveryLaunch, || panic!("device must not be created twice"))
            .expect("init");
        assert!(Arc::ptr_eq(&first.context, &second.context));
        assert!(Arc::ptr_eq(&first.batcher, &second.batcher));
        assert_eq!(second.context.queue_capacity(), 2);
        assert_eq!(lock_batcher(&second).pipeline_policy(), PipelinePolicy::Cached);
    }

    #[test]
    fn failed_initialization_leaves_cell_empty() {
        let cell = ContextCell::<SimDevice>::new();
        let err = cell
            .get_or_try_init(4, PipelinePolicy::Cached, || Err(MetalError::DeviceNotFound))
            .expect_err("no device");
        assert!(matches!(err, MetalError::DeviceNotFound));
        assert!(cell.get().is_none());

        assert!(matches!(
            cell.get_or_try_init(0, PipelinePolicy::Cached, || Ok(SimDevice::new())),
            Err(MetalError::InvalidQueueCapacity)
        ));
        assert!(cell.get().is_none());

        assert!(cell.get_or_try_init(4, PipelinePolicy::Cached, || Ok(SimDevice::new())).is_ok());
        assert!(cell.get().is_some());
    }
}
