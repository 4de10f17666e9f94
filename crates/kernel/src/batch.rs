//! Recorded command batches.
//!
//! A [`CommandBatch`] is an ordered list of device operations -- access
//! transitions and simulation dispatches -- recorded once per iteration and
//! submitted atomically to a single queue. The recorder mirrors a command
//! allocator: it is recorded into, finished, and must be reset before the
//! next iteration records into it again.

/// Shader access state of a particle buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAccess {
    /// Readable by dispatches and the consumer; writes are forbidden.
    ShaderRead,
    /// Writable by exactly one dispatch; reads are forbidden.
    ShaderWrite,
}

/// One recorded device operation.
#[derive(Debug, Clone)]
pub enum BatchOp<B> {
    /// Change a buffer's shader access state.
    Transition {
        /// The buffer whose access state changes.
        buffer: B,
        /// The access state the buffer transitions into.
        access: BufferAccess,
    },
    /// Run the simulation transform over one partition's particles.
    Dispatch {
        /// Source buffer, read by every invocation.
        read: B,
        /// Destination buffer, written once per particle.
        write: B,
        /// Number of particles to process.
        particle_count: u32,
    },
}

/// An ordered, immutable op list ready for submission.
#[derive(Debug, Clone)]
pub struct CommandBatch<B> {
    ops: Vec<BatchOp<B>>,
}

impl<B> CommandBatch<B> {
    /// The recorded operations in submission order.
    pub fn ops(&self) -> &[BatchOp<B>] {
        &self.ops
    }

    /// Number of recorded operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch contains no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Records one iteration's command batch.
///
/// Lifecycle per iteration: record ops, [`finish`](BatchRecorder::finish) to
/// obtain the batch, submit, then [`reset`](BatchRecorder::reset) before the
/// next iteration. Recording into a finished recorder is a defect.
#[derive(Debug)]
pub struct BatchRecorder<B> {
    ops: Vec<BatchOp<B>>,
    open: bool,
}

impl<B: Clone> BatchRecorder<B> {
    /// Create an empty, open recorder.
    pub fn new() -> Self {
        Self {
            ops: Vec::new(),
            open: true,
        }
    }

    /// Record an access transition.
    pub fn transition(&mut self, buffer: B, access: BufferAccess) {
        debug_assert!(self.open, "recording into a finished batch recorder");
        self.ops.push(BatchOp::Transition { buffer, access });
    }

    /// Record a simulation dispatch.
    pub fn dispatch(&mut self, read: B, write: B, particle_count: u32) {
        debug_assert!(self.open, "recording into a finished batch recorder");
        self.ops.push(BatchOp::Dispatch {
            read,
            write,
            particle_count,
        });
    }

    /// Close the recorder and take the recorded batch.
    pub fn finish(&mut self) -> CommandBatch<B> {
        debug_assert!(self.open, "finishing an already finished recorder");
        self.open = false;
        CommandBatch {
            ops: std::mem::take(&mut self.ops),
        }
    }

    /// Reopen the recorder for the next iteration.
    pub fn reset(&mut self) {
        self.ops.clear();
        self.open = true;
    }
}

impl<B: Clone> Default for BatchRecorder<B> {
    fn default() -> Self {
        Self::new()
    }
}
