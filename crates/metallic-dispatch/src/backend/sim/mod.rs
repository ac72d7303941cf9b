//! Host-memory reference device.
//!
//! `SimDevice` honours the same contract as the Metal backend: shared buffers
//! are plain host allocations, command buffers walk the Metal status sequence,
//! the queue completes buffers strictly in commit order and never holds more
//! than its in-flight limit. Kernel bodies are host closures registered by
//! entry-point name; a kernel with no registered body still encodes and
//! "executes" as a no-op, so batching can be exercised without any math.

use std::{
    alloc::{self, Layout}, fmt, ptr::NonNull, sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock, atomic::{AtomicUsize, Ordering}
    }
};

use rustc_hash::FxHashMap;

use crate::{
    MetalError, types::{ComputeDevice, DeviceBuffer, Library, PipelineState, ThreadExtent, ThreadgroupSize}
};

pub mod command;
pub mod compiler;

pub use command::{SimCommandBuffer, SimEncoder, SimQueue};

pub const DEFAULT_THREAD_EXECUTION_WIDTH: usize = 32;
pub const DEFAULT_MAX_THREADS_PER_THREADGROUP: usize = 1024;
pub const DEFAULT_MAX_BUFFER_LENGTH: usize = 1 << 30;

const BUFFER_ALIGNMENT: usize = 16;

/// Limits reported by the simulated device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimDeviceConfig {
    pub name: String,
    pub thread_execution_width: usize,
    pub max_threads_per_threadgroup: usize,
    pub max_buffer_length: usize,
    /// Total command buffers a queue will hand out; `None` is unlimited.
    pub command_buffer_limit: Option<usize>,
}

impl Default for SimDeviceConfig {
    fn default() -> Self {
        Self {
            name: "Simulated Compute Device".to_string(),
            thread_execution_width: DEFAULT_THREAD_EXECUTION_WIDTH,
            max_threads_per_threadgroup: DEFAULT_MAX_THREADS_PER_THREADGROUP,
            max_buffer_length: DEFAULT_MAX_BUFFER_LENGTH,
            command_buffer_limit: None,
        }
    }
}

impl SimDeviceConfig {
    #[must_use]
    pub fn with_thread_execution_width(mut self, width: usize) -> Self {
        self.thread_execution_width = width;
        self
    }

    #[must_use]
    pub fn with_max_threads_per_threadgroup(mut self, max: usize) -> Self {
        self.max_threads_per_threadgroup = max;
        self
    }

    #[must_use]
    pub fn with_max_buffer_length(mut self, max: usize) -> Self {
        self.max_buffer_length = max;
        self
    }

    /// Fail `command_buffer()` once `limit` buffers have been created on a queue.
    #[must_use]
    pub fn with_command_buffer_limit(mut self, limit: usize) -> Self {
        self.command_buffer_limit = Some(limit);
        self
    }
}

/// Host implementation of a kernel entry point.
pub type HostKernel = Arc<dyn Fn(&KernelInvocation<'_>) + Send + Sync>;

/// A buffer bound at one argument slot of a dispatch.
#[derive(Clone, Debug)]
pub struct SimBinding {
    pub buffer: SimBuffer,
    pub offset: usize,
}

/// Everything a host kernel sees for one dispatch.
pub struct KernelInvocation<'a> {
    pub function: &'a str,
    pub bindings: &'a [Option<SimBinding>],
    pub threads: ThreadExtent,
    pub group: ThreadgroupSize,
}

impl KernelInvocation<'_> {
    /// Buffer bound at `index`.
    ///
    /// # Panics
    /// If nothing was bound at `index`; on hardware that is a GPU fault.
    pub fn buffer(&self, index: usize) -> &SimBuffer {
        match self.bindings.get(index) {
            Some(Some(binding)) => &binding.buffer,
            _ => panic!("kernel {} read unbound buffer slot {index}", self.function),
        }
    }

    /// Visit every thread position in x-fastest order.
    pub fn for_each_thread(&self, mut f: impl FnMut([usize; 3])) {
        for z in 0..self.threads.depth {
            for y in 0..self.threads.height {
                for x in 0..self.threads.width {
                    f([x, y, z]);
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct SimCounters {
    pipelines_built: AtomicUsize,
    buffers_live: AtomicUsize,
    bytes_live: AtomicUsize,
    command_buffers_created: AtomicUsize,
    command_buffers_completed: AtomicUsize,
    dispatches_encoded: AtomicUsize,
    dispatches_executed: AtomicUsize,
}

/// Point-in-time view of the simulated device's activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimStats {
    pub pipelines_built: usize,
    pub buffers_live: usize,
    pub bytes_live: usize,
    pub command_buffers_created: usize,
    pub command_buffers_completed: usize,
    pub dispatches_encoded: usize,
    pub dispatches_executed: usize,
}

struct DeviceShared {
    config: SimDeviceConfig,
    kernels: RwLock<FxHashMap<String, HostKernel>>,
    counters: Arc<SimCounters>,
}

#[derive(Clone)]
pub struct SimDevice {
    shared: Arc<DeviceShared>,
}

impl fmt::Debug for SimDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimDevice").field("config", &self.shared.config).finish_non_exhaustive()
    }
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDevice {
    pub fn new() -> Self {
        Self::with_config(SimDeviceConfig::default())
    }

    pub fn with_config(config: SimDeviceConfig) -> Self {
        Self {
            shared: Arc::new(DeviceShared {
                config,
                kernels: RwLock::new(FxHashMap::default()),
                counters: Arc::new(SimCounters::default()),
            }),
        }
    }

    pub fn config(&self) -> &SimDeviceConfig {
        &self.shared.config
    }

    /// Register the host body executed for entry point `name`.
    ///
    /// Pipelines built afterwards pick up the body; existing pipelines keep the
    /// body they were built with.
    pub fn register_kernel<F>(&self, name: impl Into<String>, body: F)
    where
        F: Fn(&KernelInvocation<'_>) + Send + Sync + 'static,
    {
        self.shared
            .kernels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(body));
    }

    pub fn stats(&self) -> SimStats {
        let c = &self.shared.counters;
        SimStats {
            pipelines_built: c.pipelines_built.load(Ordering::Relaxed),
            buffers_live: c.buffers_live.load(Ordering::Relaxed),
            bytes_live: c.bytes_live.load(Ordering::Relaxed),
            command_buffers_created: c.command_buffers_created.load(Ordering::Relaxed),
            command_buffers_completed: c.command_buffers_completed.load(Ordering::Relaxed),
            dispatches_encoded: c.dispatches_encoded.load(Ordering::Relaxed),
            dispatches_executed: c.dispatches_executed.load(Ordering::Relaxed),
        }
    }
}

impl ComputeDevice for SimDevice {
    type Queue = SimQueue;
    type CommandBuffer = SimCommandBuffer;
    type Encoder = SimEncoder;
    type Buffer = SimBuffer;
    type Library = SimLibrary;
    type Function = SimFunction;
    type Pipeline = SimPipeline;

    fn name(&self) -> String {
        self.shared.config.name.clone()
    }

    fn new_command_queue(&self, max_command_buffers: usize) -> Result<SimQueue, MetalError> {
        if max_command_buffers == 0 {
            return Err(MetalError::CommandQueueCreationFailed);
        }
        Ok(SimQueue::new(
            max_command_buffers,
            self.shared.config.command_buffer_limit,
            self.shared.counters.clone(),
        ))
    }

    fn new_shared_buffer(&self, length: usize) -> Result<SimBuffer, MetalError> {
        if length == 0 || length > self.shared.config.max_buffer_length {
            return Err(MetalError::BufferCreationFailed(length));
        }
        SimBuffer::allocate(length, self.shared.counters.clone())
    }

    fn new_library_with_source(&self, source: &str) -> Result<SimLibrary, MetalError> {
        let functions = compiler::compile(source).map_err(MetalError::LibraryCompilationFailed)?;
        Ok(SimLibrary {
            functions: functions.into_iter().map(Arc::from).collect(),
        })
    }

    fn new_compute_pipeline_state(&self, function: &SimFunction) -> Result<SimPipeline, MetalError> {
        let body = self
            .shared
            .kernels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&*function.name)
            .cloned();
        self.shared.counters.pipelines_built.fetch_add(1, Ordering::Relaxed);
        Ok(SimPipeline {
            function: function.name.clone(),
            thread_execution_width: self.shared.config.thread_execution_width,
            max_total_threads_per_threadgroup: self.shared.config.max_threads_per_threadgroup,
            body,
        })
    }
}

struct Allocation {
    ptr: NonNull<u8>,
    layout: Layout,
    counters: Arc<SimCounters>,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from `alloc_zeroed` with exactly this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
        self.counters.buffers_live.fetch_sub(1, Ordering::Relaxed);
        self.counters.bytes_live.fetch_sub(self.layout.size(), Ordering::Relaxed);
    }
}

/// Zero-initialised host allocation standing in for shared device memory.
///
/// Clones share storage, the way a retained `MTLBuffer` does; the memory is
/// released when the last clone (including any held by pending dispatches)
/// is dropped.
#[derive(Clone)]
pub struct SimBuffer {
    allocation: Arc<Allocation>,
}

// Raw storage; synchronisation is the caller's contract, as with shared Metal buffers.
unsafe impl Send for SimBuffer {}
unsafe impl Sync for SimBuffer {}

impl fmt::Debug for SimBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimBuffer")
            .field("ptr", &self.allocation.ptr)
            .field("length", &self.allocation.layout.size())
            .finish()
    }
}

impl SimBuffer {
    fn allocate(length: usize, counters: Arc<SimCounters>) -> Result<Self, MetalError> {
        let layout = Layout::from_size_align(length, BUFFER_ALIGNMENT).map_err(|_| MetalError::BufferCreationFailed(length))?;
        // SAFETY: `length` is non-zero, checked by the device before we get here.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(MetalError::BufferCreationFailed(length))?;
        counters.buffers_live.fetch_add(1, Ordering::Relaxed);
        counters.bytes_live.fetch_add(length, Ordering::Relaxed);
        Ok(Self {
            allocation: Arc::new(Allocation { ptr, layout, counters }),
        })
    }

    /// View the whole buffer as `T`s.
    ///
    /// # Safety
    /// No other reference may be writing the buffer while the slice is alive.
    pub unsafe fn as_slice<T: Copy>(&self) -> &[T] {
        let len = self.length() / std::mem::size_of::<T>();
        unsafe { std::slice::from_raw_parts(self.contents().cast::<T>(), len) }
    }

    /// Mutable view of the whole buffer as `T`s.
    ///
    /// # Safety
    /// The caller must have exclusive access to the buffer while the slice is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_slice_mut<T: Copy>(&self) -> &mut [T] {
        let len = self.length() / std::mem::size_of::<T>();
        unsafe { std::slice::from_raw_parts_mut(self.contents().cast::<T>(), len) }
    }
}

impl DeviceBuffer for SimBuffer {
    fn contents(&self) -> *mut u8 {
        self.allocation.ptr.as_ptr()
    }

    fn length(&self) -> usize {
        self.allocation.layout.size()
    }
}

/// Compiled unit: the entry points found in the source.
#[derive(Clone, Debug)]
pub struct SimLibrary {
    functions: Vec<Arc<str>>,
}

impl SimLibrary {
    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|name| &**name)
    }
}

impl Library for SimLibrary {
    type Function = SimFunction;

    fn new_function(&self, name: &str) -> Option<SimFunction> {
        self.functions
            .iter()
            .find(|candidate| &***candidate == name)
            .map(|name| SimFunction { name: name.clone() })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimFunction {
    name: Arc<str>,
}

impl SimFunction {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Clone)]
pub struct SimPipeline {
    function: Arc<str>,
    thread_execution_width: usize,
    max_total_threads_per_threadgroup: usize,
    body: Option<HostKernel>,
}

impl SimPipeline {
    pub fn function_name(&self) -> &str {
        &self.function
    }
}

impl fmt::Debug for SimPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimPipeline")
            .field("function", &self.function)
            .field("thread_execution_width", &self.thread_execution_width)
            .field("max_total_threads_per_threadgroup", &self.max_total_threads_per_threadgroup)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

impl PipelineState for SimPipeline {
    fn thread_execution_width(&self) -> usize {
        self.thread_execution_width
    }

    fn max_total_threads_per_threadgroup(&self) -> usize {
        self.max_total_threads_per_threadgroup
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[path = "sim.test.rs"]
mod tests;
