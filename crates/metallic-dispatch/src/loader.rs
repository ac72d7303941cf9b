//! Kernel library loading and pipeline-state caching.
//!
//! A [`KernelHandle`] pairs a resolved entry point with a process-unique id.
//! The [`PipelineCache`] keys compiled pipeline states by that id, so two
//! handles resolved from the same library get independent cache entries and
//! a handle never aliases another kernel's pipeline.
//!
//! # Usage
//! ```text
//! let library = loader.load_library(SOURCE)?;
//! let axpy = loader.get_function(&library, "axpy")?;
//! dispatcher.launch(&axpy, &[&y, &x], LaunchConfig::d1(n / 32, 32))?;
//! ```

use std::{
    fmt, sync::{
        Arc, atomic::{AtomicU64, Ordering}
    }
};

use rustc_hash::FxHashMap;

use crate::{
    MetalError, device::DeviceContext, types::{ComputeDevice, Library}
};

static NEXT_KERNEL_ID: AtomicU64 = AtomicU64::new(1);

/// A resolved kernel entry point.
pub struct KernelHandle<D: ComputeDevice> {
    id: u64,
    name: Arc<str>,
    function: D::Function,
}

impl<D: ComputeDevice> KernelHandle<D> {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn function(&self) -> &D::Function {
        &self.function
    }
}

impl<D: ComputeDevice> Clone for KernelHandle<D> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            function: self.function.clone(),
        }
    }
}

impl<D: ComputeDevice> fmt::Debug for KernelHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelHandle").field("id", &self.id).field("name", &self.name).finish()
    }
}

/// Compiles kernel source and resolves entry points on one device.
pub struct KernelLoader<D: ComputeDevice> {
    context: Arc<DeviceContext<D>>,
}

impl<D: ComputeDevice> fmt::Debug for KernelLoader<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelLoader").finish_non_exhaustive()
    }
}

impl<D: ComputeDevice> KernelLoader<D> {
    pub fn new(context: Arc<DeviceContext<D>>) -> Self {
        Self { context }
    }

    /// Compile a source unit into a library.
    ///
    /// The compiler diagnostic is carried in [`MetalError::LibraryCompilationFailed`].
    pub fn load_library(&self, source: &str) -> Result<D::Library, MetalError> {
        let library = self.context.device().new_library_with_source(source).inspect_err(|err| {
            tracing::debug!(error = %err, "kernel library failed to compile");
        })?;
        tracing::debug!(source_bytes = source.len(), "kernel library compiled");
        Ok(library)
    }

    /// Resolve the entry point `name` in `library`.
    pub fn get_function(&self, library: &D::Library, name: &str) -> Result<KernelHandle<D>, MetalError> {
        let function = library
            .new_function(name)
            .ok_or_else(|| MetalError::FunctionNotFound(name.to_string()))?;
        let id = NEXT_KERNEL_ID.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(kernel = name, id, "kernel function resolved");
        Ok(KernelHandle {
            id,
            name: Arc::from(name),
            function,
        })
    }
}

/// When pipeline states are (re)built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PipelinePolicy {
    /// Build once per kernel handle and reuse.
    #[default]
    Cached,
    /// Build a fresh pipeline state on every launch.
    RebuildEveryLaunch,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Pipeline states keyed by [`KernelHandle::id`].
pub struct PipelineCache<D: ComputeDevice> {
    policy: PipelinePolicy,
    pipelines: FxHashMap<u64, D::Pipeline>,
    hits: u64,
    misses: u64,
}

impl<D: ComputeDevice> fmt::Debug for PipelineCache<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineCache")
            .field("policy", &self.policy)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<D: ComputeDevice> PipelineCache<D> {
    pub fn new(policy: PipelinePolicy) -> Self {
        Self {
            policy,
            pipelines: FxHashMap::default(),
            hits: 0,
            misses: 0,
        }
    }

    /// Whether pipelines are reused across launches or rebuilt each time.
    pub fn policy(&self) -> PipelinePolicy {
        self.policy
    }

    /// Pipeline state for `kernel`, building it when the policy or an empty
    /// slot requires it.
    pub fn pipeline(&mut self, device: &D, kernel: &KernelHandle<D>) -> Result<D::Pipeline, MetalError> {
        if self.policy == PipelinePolicy::Cached
            && let Some(pipeline) = self.pipelines.get(&kernel.id)
        {
            self.hits += 1;
            return Ok(pipeline.clone());
        }

        self.misses += 1;
        let pipeline = device.new_compute_pipeline_state(&kernel.function)?;
        tracing::trace!(kernel = %kernel.name, id = kernel.id, policy = ?self.policy, "pipeline state built");
        if self.policy == PipelinePolicy::Cached {
            self.pipelines.insert(kernel.id, pipeline.clone());
        }
        Ok(pipeline)
    }

    /// Drop every cached pipeline state.
    pub fn clear(&mut self) {
        self.pipelines.clear();
    }

    pub fn stats(&self) -> PipelineCacheStats {
        PipelineCacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.pipelines.len(),
        }
    }
}

#[path = "loader.test.rs"]
mod tests;
