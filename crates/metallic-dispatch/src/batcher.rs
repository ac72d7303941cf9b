//! The dispatch batcher: one open command buffer, one open compute encoder,
//! and the threshold that decides when accumulated work goes to the device.
//!
//! ```text
//!   Idle ──launch──▶ Encoding ──flush──▶ Submitted ──launch──▶ Encoding
//!    ▲                  │                    │
//!    └──────sync────────┴────────sync────────┘
//! ```
//!
//! `launch` opens whatever is missing, encodes one dispatch and, once
//! `queue_capacity` dispatches have accumulated, flushes as a side effect.
//! A flush commits and waits until the device has *scheduled* the buffer;
//! only `sync` waits for completion.

use std::{
    fmt, sync::{Arc, Mutex}
};

use crate::{
    MetalError, device::DeviceContext, loader::{KernelHandle, PipelineCache, PipelineCacheStats, PipelinePolicy}, types::{
        CommandBuffer, CommandQueue, ComputeDevice, ComputeEncoder, LaunchConfig, PipelineState, ThreadExtent
    }
};

/// Execution width every kernel is compiled for.
pub const REQUIRED_SIMD_WIDTH: usize = 32;

/// Where the batcher is in the command-buffer lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BatcherState {
    /// No command buffer held.
    Idle,
    /// A recording command buffer with no open encoder.
    Open,
    /// A compute encoder is accepting dispatches.
    Encoding,
    /// The held command buffer was committed and not yet waited on.
    Submitted,
}

/// What a successful `launch` did besides encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[must_use]
pub enum LaunchOutcome {
    /// The dispatch was encoded and is waiting for a flush.
    Encoded,
    /// The dispatch filled the batch, which was submitted.
    Flushed,
}

/// Result of [`DispatchBatcher::flush`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlushOutcome {
    /// No encoder was open; nothing was committed.
    Idle,
    /// The open pass was ended and its command buffer committed and scheduled.
    Submitted {
        /// Dispatches the committed pass carried; at least 1.
        dispatches: usize,
    },
}

impl FlushOutcome {
    /// True when a command buffer was committed.
    pub fn submitted(self) -> bool {
        matches!(self, FlushOutcome::Submitted { .. })
    }
}

/// Lifetime counters for one batcher.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatcherStats {
    /// Dispatches successfully encoded.
    pub dispatches: u64,
    /// Command buffers committed, explicitly or implicitly.
    pub flushes: u64,
    /// Flushes triggered by reaching the queue capacity inside `launch`.
    pub implicit_flushes: u64,
    /// Calls to `sync`, including no-op ones.
    pub syncs: u64,
    /// Command buffers created by `launch`.
    pub command_buffers_opened: u64,
}

/// A batcher shared by every handle initialised from one [`crate::ContextCell`].
pub type SharedBatcher<D> = Arc<Mutex<DispatchBatcher<D>>>;

/// Owner of the open command buffer and compute encoder on one queue.
pub struct DispatchBatcher<D: ComputeDevice> {
    context: Arc<DeviceContext<D>>,
    pipelines: PipelineCache<D>,
    command_buffer: Option<D::CommandBuffer>,
    encoder: Option<D::Encoder>,
    queue_size: usize,
    stats: BatcherStats,
}

impl<D: ComputeDevice> fmt::Debug for DispatchBatcher<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchBatcher")
            .field("state", &self.state())
            .field("queue_size", &self.queue_size)
            .field("queue_capacity", &self.context.queue_capacity())
            .field("stats", &self.stats)
            .finish()
    }
}

impl<D: ComputeDevice> DispatchBatcher<D> {
    /// An idle batcher submitting on `context`'s queue.
    ///
    /// Only one batcher should drive a queue; [`crate::ContextCell`] hands out
    /// a single shared instance per context.
    pub fn new(context: Arc<DeviceContext<D>>, policy: PipelinePolicy) -> Self {
        Self {
            context,
            pipelines: PipelineCache::new(policy),
            command_buffer: None,
            encoder: None,
            queue_size: 0,
            stats: BatcherStats::default(),
        }
    }

    pub fn state(&self) -> BatcherState {
        match (&self.command_buffer, &self.encoder) {
            (None, _) => BatcherState::Idle,
            (Some(_), Some(_)) => BatcherState::Encoding,
            (Some(cb), None) if cb.status().is_recording() => BatcherState::Open,
            (Some(_), None) => BatcherState::Submitted,
        }
    }

    /// Dispatches encoded into the open command buffer since the last flush.
    #[inline]
    pub fn pending_dispatches(&self) -> usize {
        self.queue_size
    }

    #[inline]
    pub fn queue_capacity(&self) -> usize {
        self.context.queue_capacity()
    }

    pub fn stats(&self) -> BatcherStats {
        self.stats
    }

    pub fn pipeline_stats(&self) -> PipelineCacheStats {
        self.pipelines.stats()
    }

    pub fn pipeline_policy(&self) -> PipelinePolicy {
        self.pipelines.policy()
    }

    /// Forget every cached pipeline state; the next launch of each kernel rebuilds it.
    pub fn clear_pipeline_cache(&mut self) {
        self.pipelines.clear();
    }

    /// Encode one dispatch of `kernel` with `buffers` bound to slots `0..n`.
    ///
    /// Launch geometry is validated against the pipeline before a command
    /// buffer or encoder is opened, so a rejected launch leaves the batcher in
    /// the state it was in.
    pub fn launch(&mut self, kernel: &KernelHandle<D>, buffers: &[&D::Buffer], config: LaunchConfig) -> Result<LaunchOutcome, MetalError> {
        let pipeline = self.pipelines.pipeline(self.context.device(), kernel)?;
        let threads = validate_launch(&pipeline, &config).inspect_err(|err| {
            tracing::debug!(kernel = kernel.name(), error = %err, "launch rejected");
        })?;

        let recording = matches!(&self.command_buffer, Some(cb) if cb.status().is_recording());
        if !recording {
            // Keep the submitted buffer until its replacement exists.
            let fresh = self.context.queue().command_buffer()?;
            if self.command_buffer.replace(fresh).is_some() {
                tracing::trace!("released submitted command buffer");
            }
            self.stats.command_buffers_opened += 1;
        }

        if self.encoder.is_none() {
            let command_buffer = self.command_buffer.as_ref().ok_or(MetalError::CommandBufferCreationFailed)?;
            self.encoder = Some(command_buffer.compute_command_encoder()?);
        }
        let encoder = self.encoder.as_ref().ok_or(MetalError::ComputeEncoderCreationFailed)?;

        encoder.set_compute_pipeline_state(&pipeline);
        for (index, buffer) in buffers.iter().enumerate() {
            encoder.set_buffer(index, buffer, 0);
        }
        encoder.dispatch_threads(threads, config.group);

        self.queue_size += 1;
        self.stats.dispatches += 1;
        tracing::trace!(
            kernel = kernel.name(),
            buffers = buffers.len(),
            queue_size = self.queue_size,
            "dispatch encoded"
        );

        if self.queue_size >= self.context.queue_capacity() {
            self.stats.implicit_flushes += 1;
            self.flush();
            return Ok(LaunchOutcome::Flushed);
        }
        Ok(LaunchOutcome::Encoded)
    }

    /// End the open compute pass, commit it and wait until it is scheduled.
    ///
    /// A no-op when no encoder is open.
    pub fn flush(&mut self) -> FlushOutcome {
        let Some(encoder) = self.encoder.take() else {
            return FlushOutcome::Idle;
        };
        encoder.end_encoding();
        drop(encoder);

        let dispatches = std::mem::take(&mut self.queue_size);
        if let Some(cb) = &self.command_buffer {
            cb.commit();
            cb.wait_until_scheduled();
        }
        self.stats.flushes += 1;
        tracing::debug!(dispatches, "command buffer submitted");
        FlushOutcome::Submitted { dispatches }
    }

    /// Flush, then block until every submitted command buffer has completed.
    pub fn sync(&mut self) {
        self.flush();
        if let Some(cb) = self.command_buffer.take() {
            if !cb.status().is_recording() {
                cb.wait_until_completed();
            }
            tracing::debug!("command buffer completed");
        }
        self.stats.syncs += 1;
    }
}

impl<D: ComputeDevice> Drop for DispatchBatcher<D> {
    fn drop(&mut self) {
        if self.queue_size > 0 {
            tracing::debug!(pending = self.queue_size, "submitting pending dispatches on drop");
        }
        self.flush();
    }
}

/// Check `config` against the pipeline's limits and return the absolute
/// thread extent to dispatch.
pub fn validate_launch<P: PipelineState>(pipeline: &P, config: &LaunchConfig) -> Result<ThreadExtent, MetalError> {
    let width = pipeline.thread_execution_width();
    if width != REQUIRED_SIMD_WIDTH {
        return Err(MetalError::UnsupportedSimdWidth {
            expected: REQUIRED_SIMD_WIDTH,
            found: width,
        });
    }

    let group = config.group;
    if group.width == 0 || group.height == 0 || group.depth == 0 {
        return Err(MetalError::InvalidLaunch(format!(
            "threadgroup {}x{}x{} has an empty dimension",
            group.width, group.height, group.depth
        )));
    }
    let grid = config.grid;
    if grid.width == 0 || grid.height == 0 || grid.depth == 0 {
        return Err(MetalError::InvalidLaunch(format!(
            "grid {}x{}x{} has an empty dimension",
            grid.width, grid.height, grid.depth
        )));
    }

    let max = pipeline.max_total_threads_per_threadgroup();
    let requested = group
        .thread_count()
        .ok_or_else(|| MetalError::InvalidLaunch("threadgroup thread count overflows".to_string()))?;
    if requested > max {
        return Err(MetalError::ThreadgroupTooLarge { requested, max });
    }

    config.total_threads()
}

#[path = "batcher.test.rs"]
mod tests;
