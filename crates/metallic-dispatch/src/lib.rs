//! Batching dispatcher for compute kernels on a single Metal device.
//!
//! The crate owns one command queue, accumulates kernel launches into shared
//! command buffers and exposes explicit flush/sync points. [`Dispatcher`]
//! bundles the device context, memory arena, kernel loader and batcher behind
//! one handle; each component is also usable on its own.

pub use arena::{ArenaStats, MemoryArena};
pub use batcher::{BatcherState, BatcherStats, DispatchBatcher, FlushOutcome, LaunchOutcome, REQUIRED_SIMD_WIDTH, SharedBatcher};
pub use config::{ConfigError, DEFAULT_QUEUE_CAPACITY, RuntimeConfig};
pub use device::{ContextCell, DeviceContext, SharedContext};
pub use error::{ErrorKind, MetalError, OrAbort};
pub use loader::{KernelHandle, KernelLoader, PipelineCache, PipelineCacheStats, PipelinePolicy};
pub use types::*;

pub mod arena;
pub mod backend;
pub mod batcher;
pub mod config;
pub mod device;
mod error;
pub mod loader;
pub mod logging;
pub mod types;

use std::sync::{Arc, MutexGuard, PoisonError};

/// The device context plus everything needed to allocate, load and launch.
///
/// Handles initialised from the same [`ContextCell`] share one
/// [`DispatchBatcher`], so `sync` on any of them waits for work launched
/// through all of them. Allocation counters are per handle.
pub struct Dispatcher<D: ComputeDevice> {
    shared: SharedContext<D>,
    arena: MemoryArena<D>,
    loader: KernelLoader<D>,
}

impl<D: ComputeDevice> std::fmt::Debug for Dispatcher<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("context", &self.shared.context)
            .field("arena", &self.arena)
            .field("batcher", &*self.batcher())
            .finish()
    }
}

#[cfg(target_os = "macos")]
impl Dispatcher<backend::MetalDevice> {
    /// Initialise the process-wide Metal context on the system default device.
    ///
    /// Only the first call creates the device and its batcher; later calls
    /// share them and ignore `queue_capacity`.
    pub fn initialize(queue_capacity: usize) -> Result<Self, MetalError> {
        Self::initialize_with_config(&RuntimeConfig::default().with_queue_capacity(queue_capacity))
    }

    /// Like [`Dispatcher::initialize`], taking the capacity and pipeline
    /// policy from `config`.
    pub fn initialize_with_config(config: &RuntimeConfig) -> Result<Self, MetalError> {
        let shared = device::initialize(config.queue_capacity, config.pipeline_policy)?;
        Ok(Self::from_shared(shared))
    }
}

impl<D: ComputeDevice> Dispatcher<D> {
    /// Initialise (or join) the context and batcher held by `cell`.
    pub fn initialize_in<F>(cell: &ContextCell<D>, queue_capacity: usize, make_device: F) -> Result<Self, MetalError>
    where
        F: FnOnce() -> Result<D, MetalError>,
    {
        let shared = cell.get_or_try_init(queue_capacity, PipelinePolicy::default(), make_device)?;
        Ok(Self::from_shared(shared))
    }

    /// A dispatcher with a private context and batcher on `device`.
    pub fn with_device(device: D, config: &RuntimeConfig) -> Result<Self, MetalError> {
        let shared = SharedContext::new(device, config.queue_capacity, config.pipeline_policy)?;
        Ok(Self::from_shared(shared))
    }

    /// A new handle on an existing context and batcher, with its own arena.
    pub fn from_shared(shared: SharedContext<D>) -> Self {
        Self {
            arena: MemoryArena::new(shared.context.clone()),
            loader: KernelLoader::new(shared.context.clone()),
            shared,
        }
    }

    pub fn context(&self) -> &Arc<DeviceContext<D>> {
        &self.shared.context
    }

    pub fn device(&self) -> &D {
        self.shared.context.device()
    }

    pub fn arena(&self) -> &MemoryArena<D> {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut MemoryArena<D> {
        &mut self.arena
    }

    pub fn loader(&self) -> &KernelLoader<D> {
        &self.loader
    }

    /// Lock the shared batcher.
    ///
    /// Launching through this handle while the guard is alive deadlocks.
    pub fn batcher(&self) -> MutexGuard<'_, DispatchBatcher<D>> {
        self.shared.batcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn alloc(&mut self, nbytes: usize) -> Result<D::Buffer, MetalError> {
        self.arena.alloc(nbytes)
    }

    pub fn alloc_from_bytes(&mut self, bytes: &[u8]) -> Result<D::Buffer, MetalError> {
        self.arena.alloc_from_bytes(bytes)
    }

    pub fn free(&mut self, buffer: D::Buffer) {
        self.arena.free(buffer);
    }

    /// See [`MemoryArena::copy`].
    ///
    /// # Safety
    /// Host pointers must be valid for `nbytes` bytes, and a host destination
    /// must be writable.
    pub unsafe fn copy(&self, dst: CopyOperand<'_, D::Buffer>, src: CopyOperand<'_, D::Buffer>, nbytes: usize) -> Result<CopyKind, MetalError> {
        unsafe { self.arena.copy(dst, src, nbytes) }
    }

    pub fn load_library(&self, source: &str) -> Result<D::Library, MetalError> {
        self.loader.load_library(source)
    }

    pub fn get_function(&self, library: &D::Library, name: &str) -> Result<KernelHandle<D>, MetalError> {
        self.loader.get_function(library, name)
    }

    pub fn launch(&self, kernel: &KernelHandle<D>, buffers: &[&D::Buffer], config: LaunchConfig) -> Result<LaunchOutcome, MetalError> {
        self.batcher().launch(kernel, buffers, config)
    }

    pub fn flush(&self) -> FlushOutcome {
        self.batcher().flush()
    }

    /// Block until all work launched through any handle sharing this batcher has completed.
    pub fn sync(&self) {
        self.batcher().sync();
    }

    /// Forget cached pipeline states on the shared batcher.
    pub fn clear_pipeline_cache(&self) {
        self.batcher().clear_pipeline_cache();
    }
}
