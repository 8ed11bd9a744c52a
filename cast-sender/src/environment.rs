//! Execution environment handed to senders at construction

use cast_io::{Clock, SystemClock, WorkerMode};
use cast_protocol::{RtcpChannel, TransportSender};
use std::sync::Arc;

/// Clock and encoder placement shared by the senders of a session
#[derive(Clone)]
pub struct SenderEnvironment {
    pub clock: Arc<dyn Clock>,
    /// Run encoders on dedicated threads rather than inline
    pub threaded_encoders: bool,
}

impl SenderEnvironment {
    /// System clock, one encoder thread per sender
    pub fn new() -> Self {
        SenderEnvironment {
            clock: Arc::new(SystemClock),
            threaded_encoders: true,
        }
    }

    /// Encoders run synchronously on submit; used with a manual clock
    pub fn inline(clock: Arc<dyn Clock>) -> Self {
        SenderEnvironment {
            clock,
            threaded_encoders: false,
        }
    }

    pub fn threaded(clock: Arc<dyn Clock>) -> Self {
        SenderEnvironment {
            clock,
            threaded_encoders: true,
        }
    }

    pub(crate) fn worker_mode(&self, name: &str) -> WorkerMode {
        if self.threaded_encoders {
            WorkerMode::Thread {
                name: name.to_string(),
            }
        } else {
            WorkerMode::Inline
        }
    }
}

impl Default for SenderEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound collaborators of one sender
pub struct SenderCollaborators {
    pub transport: Box<dyn TransportSender + Send>,
    pub rtcp: Box<dyn RtcpChannel + Send>,
}

impl SenderCollaborators {
    pub fn new(
        transport: impl TransportSender + Send + 'static,
        rtcp: impl RtcpChannel + Send + 'static,
    ) -> Self {
        SenderCollaborators {
            transport: Box::new(transport),
            rtcp: Box::new(rtcp),
        }
    }
}
