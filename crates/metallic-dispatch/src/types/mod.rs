//! Device-facing traits the dispatcher is written against.
//!
//! Each trait mirrors the subset of the Metal object model the batcher needs.
//! [`crate::backend::metal`] implements them over `objc2-metal`;
//! [`crate::backend::sim`] implements them over host memory.

use std::fmt;

pub mod dispatch;
pub mod memory;

pub use dispatch::{GridSize, LaunchConfig, ThreadExtent, ThreadgroupSize};
pub use memory::{CopyKind, CopyOperand, MemoryKind};

use crate::MetalError;

/// Lifecycle of a command buffer as reported by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandBufferStatus {
    NotEnqueued,
    Enqueued,
    Committed,
    Scheduled,
    Completed,
    Error,
}

impl CommandBufferStatus {
    /// True while dispatches may still be encoded into the buffer.
    pub fn is_recording(self) -> bool {
        self == CommandBufferStatus::NotEnqueued
    }
}

/// A compute device and the factory for everything that hangs off it.
pub trait ComputeDevice: Clone + fmt::Debug + Send + Sync + 'static {
    type Queue: CommandQueue<CommandBuffer = Self::CommandBuffer>;
    type CommandBuffer: CommandBuffer<Encoder = Self::Encoder>;
    type Encoder: ComputeEncoder<Buffer = Self::Buffer, Pipeline = Self::Pipeline>;
    type Buffer: DeviceBuffer;
    type Library: Library<Function = Self::Function>;
    type Function: Clone + fmt::Debug + Send + Sync;
    type Pipeline: PipelineState;

    fn name(&self) -> String;

    /// Create a queue that keeps at most `max_command_buffers` uncompleted buffers in flight.
    fn new_command_queue(&self, max_command_buffers: usize) -> Result<Self::Queue, MetalError>;

    /// Allocate `length` bytes in host-visible shared storage.
    fn new_shared_buffer(&self, length: usize) -> Result<Self::Buffer, MetalError>;

    fn new_library_with_source(&self, source: &str) -> Result<Self::Library, MetalError>;

    fn new_compute_pipeline_state(&self, function: &Self::Function) -> Result<Self::Pipeline, MetalError>;
}

pub trait CommandQueue: fmt::Debug + Send + Sync {
    type CommandBuffer;

    fn command_buffer(&self) -> Result<Self::CommandBuffer, MetalError>;
}

pub trait CommandBuffer: fmt::Debug + Send {
    type Encoder;

    fn status(&self) -> CommandBufferStatus;

    fn compute_command_encoder(&self) -> Result<Self::Encoder, MetalError>;

    fn commit(&self);

    /// Block until the device has scheduled the buffer (not necessarily run it).
    fn wait_until_scheduled(&self);

    /// Block until the device has finished executing the buffer.
    fn wait_until_completed(&self);
}

pub trait ComputeEncoder: fmt::Debug + Send {
    type Buffer;
    type Pipeline;

    fn set_compute_pipeline_state(&self, pipeline: &Self::Pipeline);

    fn set_buffer(&self, index: usize, buffer: &Self::Buffer, offset: usize);

    /// Dispatch `threads` total threads in groups of `group`.
    fn dispatch_threads(&self, threads: ThreadExtent, group: ThreadgroupSize);

    fn end_encoding(&self);
}

/// Host-visible device memory.
pub trait DeviceBuffer: fmt::Debug + Send + Sync {
    /// Base address of the backing storage; valid while the buffer is alive.
    fn contents(&self) -> *mut u8;

    fn length(&self) -> usize;
}

pub trait Library: fmt::Debug + Send + Sync {
    type Function;

    fn new_function(&self, name: &str) -> Option<Self::Function>;
}

pub trait PipelineState: Clone + fmt::Debug + Send + Sync {
    /// Lanes executing in lockstep (SIMD width).
    fn thread_execution_width(&self) -> usize;

    fn max_total_threads_per_threadgroup(&self) -> usize;
}
