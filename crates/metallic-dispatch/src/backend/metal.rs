//! `objc2-metal` implementation of the device traits.

use objc2::{rc::Retained, runtime::ProtocolObject};
use objc2_foundation::NSString;
use objc2_metal::{
    MTLBuffer, MTLCommandBuffer, MTLCommandBufferStatus, MTLCommandEncoder, MTLCommandQueue, MTLComputeCommandEncoder, MTLComputePipelineState, MTLDevice, MTLFunction, MTLLibrary, MTLResourceOptions, MTLSize
};

use crate::{
    MetalError, types::{
        CommandBuffer, CommandBufferStatus, CommandQueue, ComputeDevice, ComputeEncoder, DeviceBuffer, Library, PipelineState, ThreadExtent, ThreadgroupSize
    }
};

// Metal objects are internally synchronised; the wrappers only add Send/Sync.
#[derive(Clone, Debug)]
pub struct MetalDevice(pub Retained<ProtocolObject<dyn MTLDevice>>);

#[derive(Debug)]
pub struct MetalQueue(pub Retained<ProtocolObject<dyn MTLCommandQueue>>);

#[derive(Clone, Debug)]
pub struct MetalBuffer(pub Retained<ProtocolObject<dyn MTLBuffer>>);

#[derive(Clone, Debug)]
pub struct MetalCommandBuffer(pub(crate) Retained<ProtocolObject<dyn MTLCommandBuffer>>);

#[derive(Clone, Debug)]
pub struct ComputeCommandEncoder(pub(crate) Retained<ProtocolObject<dyn MTLComputeCommandEncoder>>);

#[derive(Clone, Debug)]
pub struct MetalLibrary(pub(crate) Retained<ProtocolObject<dyn MTLLibrary>>);

#[derive(Clone, Debug)]
pub struct MetalFunction(pub(crate) Retained<ProtocolObject<dyn MTLFunction>>);

#[derive(Clone, Debug)]
pub struct MetalPipeline(pub(crate) Retained<ProtocolObject<dyn MTLComputePipelineState>>);

unsafe impl Send for MetalDevice {}
unsafe impl Sync for MetalDevice {}
unsafe impl Send for MetalQueue {}
unsafe impl Sync for MetalQueue {}
unsafe impl Send for MetalBuffer {}
unsafe impl Sync for MetalBuffer {}
unsafe impl Send for MetalCommandBuffer {}
unsafe impl Send for ComputeCommandEncoder {}
unsafe impl Send for MetalLibrary {}
unsafe impl Sync for MetalLibrary {}
unsafe impl Send for MetalFunction {}
unsafe impl Sync for MetalFunction {}
unsafe impl Send for MetalPipeline {}
unsafe impl Sync for MetalPipeline {}

impl MetalDevice {
    pub fn create_system_default_device() -> Result<MetalDevice, MetalError> {
        objc2_metal::MTLCreateSystemDefaultDevice()
            .map(MetalDevice)
            .ok_or(MetalError::DeviceNotFound)
    }

    /// Unique registry id of the underlying GPU.
    pub fn registry_id(&self) -> u64 {
        self.0.registryID()
    }
}

impl ComputeDevice for MetalDevice {
    type Queue = MetalQueue;
    type CommandBuffer = MetalCommandBuffer;
    type Encoder = ComputeCommandEncoder;
    type Buffer = MetalBuffer;
    type Library = MetalLibrary;
    type Function = MetalFunction;
    type Pipeline = MetalPipeline;

    fn name(&self) -> String {
        self.0.name().to_string()
    }

    fn new_command_queue(&self, max_command_buffers: usize) -> Result<MetalQueue, MetalError> {
        self.0
            .newCommandQueueWithMaxCommandBufferCount(max_command_buffers)
            .map(MetalQueue)
            .ok_or(MetalError::CommandQueueCreationFailed)
    }

    fn new_shared_buffer(&self, length: usize) -> Result<MetalBuffer, MetalError> {
        self.0
            .newBufferWithLength_options(length, MTLResourceOptions::StorageModeShared)
            .map(MetalBuffer)
            .ok_or(MetalError::BufferCreationFailed(length))
    }

    fn new_library_with_source(&self, source: &str) -> Result<MetalLibrary, MetalError> {
        let ns_source = NSString::from_str(source);
        self.0
            .newLibraryWithSource_options_error(&ns_source, None)
            .map(MetalLibrary)
            .map_err(|err| MetalError::LibraryCompilationFailed(err.localizedDescription().to_string()))
    }

    fn new_compute_pipeline_state(&self, function: &MetalFunction) -> Result<MetalPipeline, MetalError> {
        self.0
            .newComputePipelineStateWithFunction_error(&function.0)
            .map(MetalPipeline)
            .map_err(|err| MetalError::PipelineCreationFailed(err.localizedDescription().to_string()))
    }
}

impl CommandQueue for MetalQueue {
    type CommandBuffer = MetalCommandBuffer;

    fn command_buffer(&self) -> Result<MetalCommandBuffer, MetalError> {
        self.0
            .commandBuffer()
            .map(MetalCommandBuffer)
            .ok_or(MetalError::CommandBufferCreationFailed)
    }
}

impl CommandBuffer for MetalCommandBuffer {
    type Encoder = ComputeCommandEncoder;

    fn status(&self) -> CommandBufferStatus {
        match self.0.status() {
            MTLCommandBufferStatus::NotEnqueued => CommandBufferStatus::NotEnqueued,
            MTLCommandBufferStatus::Enqueued => CommandBufferStatus::Enqueued,
            MTLCommandBufferStatus::Committed => CommandBufferStatus::Committed,
            MTLCommandBufferStatus::Scheduled => CommandBufferStatus::Scheduled,
            MTLCommandBufferStatus::Completed => CommandBufferStatus::Completed,
            _ => CommandBufferStatus::Error,
        }
    }

    fn compute_command_encoder(&self) -> Result<ComputeCommandEncoder, MetalError> {
        self.0
            .computeCommandEncoder()
            .map(ComputeCommandEncoder)
            .ok_or(MetalError::ComputeEncoderCreationFailed)
    }

    fn commit(&self) {
        self.0.commit();
    }

    fn wait_until_scheduled(&self) {
        self.0.waitUntilScheduled();
    }

    fn wait_until_completed(&self) {
        self.0.waitUntilCompleted();
    }
}

impl ComputeEncoder for ComputeCommandEncoder {
    type Buffer = MetalBuffer;
    type Pipeline = MetalPipeline;

    fn set_compute_pipeline_state(&self, pipeline: &MetalPipeline) {
        self.0.setComputePipelineState(&pipeline.0);
    }

    fn set_buffer(&self, index: usize, buffer: &MetalBuffer, offset: usize) {
        unsafe {
            self.0.setBuffer_offset_atIndex(Some(&buffer.0), offset, index);
        }
    }

    fn dispatch_threads(&self, threads: ThreadExtent, group: ThreadgroupSize) {
        let grid_size = MTLSize {
            width: threads.width,
            height: threads.height,
            depth: threads.depth,
        };
        let group_size = MTLSize {
            width: group.width,
            height: group.height,
            depth: group.depth,
        };
        self.0.dispatchThreads_threadsPerThreadgroup(grid_size, group_size);
    }

    fn end_encoding(&self) {
        self.0.endEncoding();
    }
}

impl DeviceBuffer for MetalBuffer {
    fn contents(&self) -> *mut u8 {
        self.0.contents().as_ptr().cast()
    }

    fn length(&self) -> usize {
        self.0.length()
    }
}

impl Library for MetalLibrary {
    type Function = MetalFunction;

    fn new_function(&self, name: &str) -> Option<MetalFunction> {
        let ns_name = NSString::from_str(name);
        self.0.newFunctionWithName(&ns_name).map(MetalFunction)
    }
}

impl PipelineState for MetalPipeline {
    fn thread_execution_width(&self) -> usize {
        self.0.threadExecutionWidth()
    }

    fn max_total_threads_per_threadgroup(&self) -> usize {
        self.0.maxTotalThreadsPerThreadgroup()
    }
}
