//! Role labels used to prefix diagnostics.

use std::fmt;

/// The part a process plays in one of the samples
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Socket server
    Listener,
    /// Socket client
    Connector,
    /// FIFO writer
    Producer,
    /// FIFO reader
    Consumer,
    /// Shared-memory counter participant
    Participant,
}

impl Role {
    /// Prefix for diagnostic lines
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Listener => "SERVER",
            Self::Connector => "CLIENT",
            Self::Producer => "PRODUCER",
            Self::Consumer => "CONSUMER",
            Self::Participant => "PARTICIPANT",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
