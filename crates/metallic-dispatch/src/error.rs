use thiserror::Error;

/// Broad classification of a [`MetalError`].
///
/// None of these are transient: the dispatcher never retries, and the caller
/// decides whether a failure terminates the process (see [`OrAbort`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The device refused to create an object (queue, buffer, encoder, pipeline).
    Resource,
    /// Kernel source failed to compile or a named entry point is missing.
    Compilation,
    /// The caller or code generator broke a launch contract.
    Precondition,
    /// A buffer accessor or copy was called with an out-of-range span or a
    /// read-only destination.
    Usage,
}

#[derive(Error, Debug)]
pub enum MetalError {
    #[error("Device not found")]
    DeviceNotFound,
    #[error("Command queue creation failed")]
    CommandQueueCreationFailed,
    #[error("Command buffer creation failed")]
    CommandBufferCreationFailed,
    #[error("Compute encoder creation failed")]
    ComputeEncoderCreationFailed,
    #[error("Buffer creation failed with size {0}")]
    BufferCreationFailed(usize),
    #[error("Library compilation failed: {0}")]
    LibraryCompilationFailed(String),
    #[error("Could not find function {0} in library")]
    FunctionNotFound(String),
    #[error("Pipeline creation failed: {0}")]
    PipelineCreationFailed(String),
    #[error("Expected SIMD width of {expected}, found {found} which is not supported")]
    UnsupportedSimdWidth { expected: usize, found: usize },
    #[error("Threadgroup of {requested} threads exceeds the device limit of {max}")]
    ThreadgroupTooLarge { requested: usize, max: usize },
    #[error("Invalid launch: {0}")]
    InvalidLaunch(String),
    #[error("Queue capacity must be at least 1")]
    InvalidQueueCapacity,
    #[error("Access of {len} bytes at offset {offset} is outside a buffer of {buffer_len} bytes")]
    BufferOutOfBounds { offset: usize, len: usize, buffer_len: usize },
    #[error("Copy destination is a read-only host pointer")]
    ReadOnlyCopyDestination,
}

impl MetalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MetalError::DeviceNotFound
            | MetalError::CommandQueueCreationFailed
            | MetalError::CommandBufferCreationFailed
            | MetalError::ComputeEncoderCreationFailed
            | MetalError::BufferCreationFailed(_)
            | MetalError::PipelineCreationFailed(_) => ErrorKind::Resource,
            MetalError::LibraryCompilationFailed(_) | MetalError::FunctionNotFound(_) => ErrorKind::Compilation,
            MetalError::UnsupportedSimdWidth { .. }
            | MetalError::ThreadgroupTooLarge { .. }
            | MetalError::InvalidLaunch(_)
            | MetalError::InvalidQueueCapacity => ErrorKind::Precondition,
            MetalError::BufferOutOfBounds { .. } | MetalError::ReadOnlyCopyDestination => ErrorKind::Usage,
        }
    }
}

/// Fail-fast conversion for callers that treat every dispatcher error as fatal.
pub trait OrAbort<T> {
    /// Return the value, or log the error and terminate the process with exit code 1.
    fn or_abort(self) -> T;
}

impl<T> OrAbort<T> for Result<T, MetalError> {
    fn or_abort(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(kind = ?err.kind(), "{err}");
                eprintln!("{err}");
                std::process::exit(1);
            }
        }
    }
}
