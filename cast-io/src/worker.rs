//! Worker contexts
//!
//! CPU-bound work (encoding) runs on a worker context separate from the one
//! that owns sender bookkeeping. Interaction is one-way message passing:
//! commands go to the worker, outputs come back over a channel that the owner
//! drains. A single worker processes commands strictly in order, so outputs
//! arrive in submission order.
//!
//! Every command carries a [`CancellationToken`]. Once the owner's
//! [`Lifeline`] is dropped, outputs for its commands are discarded instead of
//! delivered.

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Worker errors
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker thread has exited")]
    Disconnected,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Keeps the tokens derived from it valid; dropping it cancels them all
#[derive(Debug, Default)]
pub struct Lifeline(Arc<()>);

impl Lifeline {
    pub fn new() -> Self {
        Lifeline(Arc::new(()))
    }

    /// Token that reports cancelled once this lifeline is dropped
    pub fn token(&self) -> CancellationToken {
        CancellationToken(Arc::downgrade(&self.0))
    }
}

/// Weak handle checked by a worker before delivering an output
#[derive(Debug, Clone)]
pub struct CancellationToken(Weak<()>);

impl CancellationToken {
    /// Check if the owner has gone away
    pub fn is_cancelled(&self) -> bool {
        self.0.strong_count() == 0
    }
}

/// Work performed on a worker context
pub trait Processor: Send + 'static {
    type Command: Send + 'static;
    type Output: Send + 'static;

    /// Handle one command, emitting zero or more outputs
    fn process(&mut self, command: Self::Command, emit: &mut dyn FnMut(Self::Output));
}

impl<P: Processor + ?Sized> Processor for Box<P> {
    type Command = P::Command;
    type Output = P::Output;

    fn process(&mut self, command: Self::Command, emit: &mut dyn FnMut(Self::Output)) {
        (**self).process(command, emit)
    }
}

/// Where a worker runs its processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMode {
    /// On the submitting thread; outputs are queued until drained
    Inline,
    /// On a dedicated, named thread
    Thread { name: String },
}

struct Envelope<C> {
    token: CancellationToken,
    command: C,
}

enum Context<P: Processor> {
    Inline {
        processor: P,
        outputs: Sender<P::Output>,
    },
    Thread {
        commands: Option<Sender<Envelope<P::Command>>>,
        handle: Option<JoinHandle<()>>,
    },
}

/// Handle to a worker context and the queue of its outputs
pub struct Worker<P: Processor> {
    context: Context<P>,
    outputs: Receiver<P::Output>,
}

impl<P: Processor> Worker<P> {
    /// Start a worker for `processor`
    pub fn spawn(processor: P, mode: WorkerMode) -> Result<Self, WorkerError> {
        let (output_tx, output_rx) = channel::unbounded();

        let context = match mode {
            WorkerMode::Inline => Context::Inline {
                processor,
                outputs: output_tx,
            },
            WorkerMode::Thread { name } => {
                let (command_tx, command_rx) = channel::unbounded::<Envelope<P::Command>>();
                let thread_name = name.clone();
                let handle = thread::Builder::new().name(name).spawn(move || {
                    run_worker(processor, command_rx, output_tx);
                    tracing::debug!("Worker {} exiting", thread_name);
                })?;
                Context::Thread {
                    commands: Some(command_tx),
                    handle: Some(handle),
                }
            }
        };

        Ok(Worker {
            context,
            outputs: output_rx,
        })
    }

    /// Hand a command to the worker
    pub fn submit(&mut self, token: CancellationToken, command: P::Command) -> Result<(), WorkerError> {
        match &mut self.context {
            Context::Inline { processor, outputs } => {
                processor.process(command, &mut |output| deliver(&token, outputs, output));
                Ok(())
            }
            Context::Thread { commands, .. } => commands
                .as_ref()
                .ok_or(WorkerError::Disconnected)?
                .send(Envelope { token, command })
                .map_err(|_| WorkerError::Disconnected),
        }
    }

    /// Take the next completed output, if any
    pub fn try_recv(&self) -> Option<P::Output> {
        match self.outputs.try_recv() {
            Ok(output) => Some(output),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Take every output completed so far, in submission order
    pub fn drain(&self) -> Vec<P::Output> {
        self.outputs.try_iter().collect()
    }

    /// Block until the next output arrives or the worker exits
    ///
    /// Inline workers never have outputs pending completion, so this does not
    /// block for them.
    pub fn recv(&self) -> Option<P::Output> {
        match self.context {
            Context::Inline { .. } => self.try_recv(),
            Context::Thread { .. } => self.outputs.recv().ok(),
        }
    }

    /// Check if completed outputs are waiting to be drained
    pub fn has_pending(&self) -> bool {
        !self.outputs.is_empty()
    }

    /// Check if the worker runs on its own thread
    pub fn is_threaded(&self) -> bool {
        matches!(self.context, Context::Thread { .. })
    }
}

impl<P: Processor> Drop for Worker<P> {
    fn drop(&mut self) {
        if let Context::Thread { commands, handle } = &mut self.context {
            // Closing the command channel ends the worker loop
            commands.take();
            if let Some(handle) = handle.take() {
                if handle.join().is_err() {
                    tracing::warn!("Worker thread panicked");
                }
            }
        }
    }
}

fn run_worker<P: Processor>(
    mut processor: P,
    commands: Receiver<Envelope<P::Command>>,
    outputs: Sender<P::Output>,
) {
    for Envelope { token, command } in commands.iter() {
        if token.is_cancelled() {
            continue;
        }
        processor.process(command, &mut |output| deliver(&token, &outputs, output));
    }
}

fn deliver<T>(token: &CancellationToken, outputs: &Sender<T>, output: T) {
    if token.is_cancelled() {
        tracing::trace!("Owner gone, discarding worker output");
        return;
    }
    // The receiver lives as long as the owner; a send error means it is gone
    let _ = outputs.send(output);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Emits `n` copies of each command
    struct Repeat(usize);

    impl Processor for Repeat {
        type Command = u32;
        type Output = u32;

        fn process(&mut self, command: u32, emit: &mut dyn FnMut(u32)) {
            for _ in 0..self.0 {
                emit(command);
            }
        }
    }

    #[test]
    fn test_inline_outputs_queued_until_drained() {
        let lifeline = Lifeline::new();
        let mut worker = Worker::spawn(Repeat(2), WorkerMode::Inline).unwrap();

        worker.submit(lifeline.token(), 7).unwrap();
        worker.submit(lifeline.token(), 8).unwrap();

        assert!(!worker.is_threaded());
        assert_eq!(worker.drain(), vec![7, 7, 8, 8]);
        assert!(worker.try_recv().is_none());
    }

    #[test]
    fn test_thread_preserves_order() {
        let lifeline = Lifeline::new();
        let mode = WorkerMode::Thread {
            name: "test-worker".to_string(),
        };
        let mut worker = Worker::spawn(Repeat(1), mode).unwrap();

        for i in 0..100 {
            worker.submit(lifeline.token(), i).unwrap();
        }
        let received: Vec<u32> = (0..100).filter_map(|_| worker.recv()).collect();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_cancelled_token_discards_output() {
        let lifeline = Lifeline::new();
        let token = lifeline.token();
        let mut worker = Worker::spawn(Repeat(1), WorkerMode::Inline).unwrap();

        drop(lifeline);
        assert!(token.is_cancelled());

        worker.submit(token, 1).unwrap();
        assert!(worker.drain().is_empty());
    }

    #[test]
    fn test_drop_joins_thread() {
        let lifeline = Lifeline::new();
        let mode = WorkerMode::Thread {
            name: "test-worker-drop".to_string(),
        };
        let mut worker = Worker::spawn(Repeat(1), mode).unwrap();
        worker.submit(lifeline.token(), 1).unwrap();
        drop(worker);
    }
}
