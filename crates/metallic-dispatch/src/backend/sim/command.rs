//! Simulated queue, command buffers and compute encoders.

use std::{
    collections::VecDeque, sync::{
        Arc, Condvar, Mutex, PoisonError, Weak, atomic::{AtomicU64, AtomicUsize, Ordering}
    }
};

use smallvec::SmallVec;

use super::{HostKernel, KernelInvocation, SimBinding, SimBuffer, SimCounters, SimPipeline, lock};
use crate::{
    MetalError, types::{CommandBuffer, CommandBufferStatus, CommandQueue, ComputeEncoder, ThreadExtent, ThreadgroupSize}
};

struct QueueShared {
    max_in_flight: usize,
    limit: Option<usize>,
    created: AtomicUsize,
    /// Committed, not yet completed, in commit order.
    in_flight: Mutex<VecDeque<SimCommandBuffer>>,
    /// Held while retiring so buffers execute one at a time, in order.
    retire: Mutex<()>,
    next_id: AtomicU64,
    counters: Arc<SimCounters>,
}

impl QueueShared {
    /// Complete buffers from the front of the queue up to and including `id`.
    /// Returns at once if `id` is no longer queued.
    fn complete_through(&self, id: u64) {
        let _retire = lock(&self.retire);
        loop {
            let next = {
                let mut in_flight = lock(&self.in_flight);
                if !in_flight.iter().any(|buffer| buffer.shared.id == id) {
                    return;
                }
                in_flight.pop_front()
            };
            let Some(buffer) = next else { return };
            let done = buffer.shared.id == id;
            buffer.execute();
            if done {
                return;
            }
        }
    }
}

#[derive(Clone)]
pub struct SimQueue {
    shared: Arc<QueueShared>,
}

impl std::fmt::Debug for SimQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimQueue")
            .field("max_in_flight", &self.shared.max_in_flight)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl SimQueue {
    pub(super) fn new(max_in_flight: usize, limit: Option<usize>, counters: Arc<SimCounters>) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                max_in_flight,
                limit,
                created: AtomicUsize::new(0),
                in_flight: Mutex::new(VecDeque::new()),
                retire: Mutex::new(()),
                next_id: AtomicU64::new(1),
                counters,
            }),
        }
    }

    /// Committed buffers that have not completed yet.
    pub fn in_flight(&self) -> usize {
        lock(&self.shared.in_flight).len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.shared.max_in_flight
    }
}

impl CommandQueue for SimQueue {
    type CommandBuffer = SimCommandBuffer;

    fn command_buffer(&self) -> Result<SimCommandBuffer, MetalError> {
        if let Some(limit) = self.shared.limit {
            let claimed = self
                .shared
                .created
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| (n < limit).then_some(n + 1));
            if claimed.is_err() {
                return Err(MetalError::CommandBufferCreationFailed);
            }
        }

        // A full queue blocks until the oldest buffer retires.
        loop {
            let oldest = {
                let in_flight = lock(&self.shared.in_flight);
                if in_flight.len() < self.shared.max_in_flight {
                    break;
                }
                in_flight.front().map(|buffer| buffer.shared.id)
            };
            match oldest {
                Some(id) => self.shared.complete_through(id),
                None => break,
            }
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.counters.command_buffers_created.fetch_add(1, Ordering::Relaxed);
        Ok(SimCommandBuffer {
            shared: Arc::new(CommandBufferShared {
                id,
                state: Mutex::new(CommandBufferState {
                    status: CommandBufferStatus::NotEnqueued,
                    encoder_open: false,
                    executing: false,
                    dispatches: Vec::new(),
                }),
                completed: Condvar::new(),
                queue: Arc::downgrade(&self.shared),
                counters: self.shared.counters.clone(),
            }),
        })
    }
}

struct RecordedDispatch {
    function: Arc<str>,
    body: Option<HostKernel>,
    bindings: SmallVec<[Option<SimBinding>; 8]>,
    threads: ThreadExtent,
    group: ThreadgroupSize,
}

struct CommandBufferState {
    status: CommandBufferStatus,
    encoder_open: bool,
    executing: bool,
    dispatches: Vec<RecordedDispatch>,
}

struct CommandBufferShared {
    id: u64,
    state: Mutex<CommandBufferState>,
    /// Signalled once the status reaches `Completed`.
    completed: Condvar,
    queue: Weak<QueueShared>,
    counters: Arc<SimCounters>,
}

#[derive(Clone)]
pub struct SimCommandBuffer {
    shared: Arc<CommandBufferShared>,
}

impl std::fmt::Debug for SimCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("SimCommandBuffer")
            .field("id", &self.shared.id)
            .field("status", &state.status)
            .field("dispatches", &state.dispatches.len())
            .finish()
    }
}

impl SimCommandBuffer {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Dispatches encoded and not yet executed.
    pub fn pending_dispatches(&self) -> usize {
        lock(&self.shared.state).dispatches.len()
    }

    fn execute(&self) {
        let dispatches = {
            let mut state = lock(&self.shared.state);
            if state.status == CommandBufferStatus::Completed || state.executing {
                return;
            }
            state.executing = true;
            std::mem::take(&mut state.dispatches)
        };

        for dispatch in &dispatches {
            if let Some(body) = &dispatch.body {
                body(&KernelInvocation {
                    function: &dispatch.function,
                    bindings: &dispatch.bindings,
                    threads: dispatch.threads,
                    group: dispatch.group,
                });
            }
        }

        let counters = &self.shared.counters;
        counters.dispatches_executed.fetch_add(dispatches.len(), Ordering::Relaxed);
        counters.command_buffers_completed.fetch_add(1, Ordering::Relaxed);

        let mut state = lock(&self.shared.state);
        state.executing = false;
        state.status = CommandBufferStatus::Completed;
        drop(state);
        self.shared.completed.notify_all();
    }
}

impl CommandBuffer for SimCommandBuffer {
    type Encoder = SimEncoder;

    fn status(&self) -> CommandBufferStatus {
        lock(&self.shared.state).status
    }

    fn compute_command_encoder(&self) -> Result<SimEncoder, MetalError> {
        let mut state = lock(&self.shared.state);
        if !state.status.is_recording() || state.encoder_open {
            return Err(MetalError::ComputeEncoderCreationFailed);
        }
        state.encoder_open = true;
        Ok(SimEncoder {
            command_buffer: self.shared.clone(),
            state: Mutex::new(EncoderState {
                pipeline: None,
                bindings: SmallVec::new(),
                ended: false,
            }),
        })
    }

    fn commit(&self) {
        {
            let mut state = lock(&self.shared.state);
            assert!(
                state.status.is_recording(),
                "command buffer {} committed twice",
                self.shared.id
            );
            assert!(
                !state.encoder_open,
                "command buffer {} committed with an open encoder",
                self.shared.id
            );
            state.status = CommandBufferStatus::Committed;
            // Enqueued under the state lock: a committed buffer is always queued or executed.
            if let Some(queue) = self.shared.queue.upgrade() {
                lock(&queue.in_flight).push_back(self.clone());
                return;
            }
        }
        self.execute();
    }

    fn wait_until_scheduled(&self) {
        let mut state = lock(&self.shared.state);
        if state.status == CommandBufferStatus::Committed {
            state.status = CommandBufferStatus::Scheduled;
        }
    }

    fn wait_until_completed(&self) {
        let status = self.status();
        if status.is_recording() || status == CommandBufferStatus::Completed {
            return;
        }
        match self.shared.queue.upgrade() {
            Some(queue) => queue.complete_through(self.shared.id),
            None => self.execute(),
        }

        let mut state = lock(&self.shared.state);
        while state.status != CommandBufferStatus::Completed {
            state = self.shared.completed.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

struct EncoderState {
    pipeline: Option<SimPipeline>,
    bindings: SmallVec<[Option<SimBinding>; 8]>,
    ended: bool,
}

pub struct SimEncoder {
    command_buffer: Arc<CommandBufferShared>,
    state: Mutex<EncoderState>,
}

impl std::fmt::Debug for SimEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("SimEncoder")
            .field("command_buffer", &self.command_buffer.id)
            .field("pipeline", &state.pipeline.as_ref().map(SimPipeline::function_name))
            .field("ended", &state.ended)
            .finish()
    }
}

impl ComputeEncoder for SimEncoder {
    type Buffer = SimBuffer;
    type Pipeline = SimPipeline;

    fn set_compute_pipeline_state(&self, pipeline: &SimPipeline) {
        lock(&self.state).pipeline = Some(pipeline.clone());
    }

    fn set_buffer(&self, index: usize, buffer: &SimBuffer, offset: usize) {
        let mut state = lock(&self.state);
        if state.bindings.len() <= index {
            state.bindings.resize(index + 1, None);
        }
        state.bindings[index] = Some(SimBinding {
            buffer: buffer.clone(),
            offset,
        });
    }

    fn dispatch_threads(&self, threads: ThreadExtent, group: ThreadgroupSize) {
        let state = lock(&self.state);
        assert!(!state.ended, "dispatch on an ended compute encoder");
        let Some(pipeline) = state.pipeline.as_ref() else {
            panic!("dispatch without a compute pipeline state");
        };
        let dispatch = RecordedDispatch {
            function: pipeline.function.clone(),
            body: pipeline.body.clone(),
            bindings: state.bindings.clone(),
            threads,
            group,
        };
        drop(state);

        lock(&self.command_buffer.state).dispatches.push(dispatch);
        self.command_buffer.counters.dispatches_encoded.fetch_add(1, Ordering::Relaxed);
    }

    fn end_encoding(&self) {
        let mut state = lock(&self.state);
        assert!(!state.ended, "compute encoder ended twice");
        state.ended = true;
        lock(&self.command_buffer.state).encoder_open = false;
    }
}
