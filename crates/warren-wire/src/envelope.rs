//! The replicated-log command envelope.
//!
//! The durable log never stores a bare command: every record wraps its
//! postcard payload in `{schema_version, kind, payload}`. The kind tag is
//! the stable [`CommandKind`] numbering (additions only), and the schema
//! version gives the apply path a migration hook without touching old
//! records.

use serde::{Deserialize, Serialize};
use warren_kernel::{Command, CommandKind};

use crate::WireError;

/// Current envelope schema. Bump only with a migration on the decode path.
pub const SCHEMA_VERSION: u16 = 1;

/// A command as it sits in the log and on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub schema_version: u16,
    pub kind: CommandKind,
    pub payload: Vec<u8>,
}

impl CommandEnvelope {
    /// Wraps a command. The payload is the canonical encoding of the whole
    /// typed command; the kind tag rides alongside for dispatch and
    /// auditability without decoding.
    pub fn encode(command: &Command) -> crate::Result<Self> {
        Ok(Self {
            schema_version: SCHEMA_VERSION,
            kind: command.kind(),
            payload: postcard::to_allocvec(command)?,
        })
    }

    /// Unwraps back into the typed command, verifying that the payload
    /// agrees with the declared kind.
    pub fn decode(&self) -> crate::Result<Command> {
        if self.schema_version > SCHEMA_VERSION {
            return Err(WireError::SchemaTooNew {
                got: self.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        let command: Command = postcard::from_bytes(&self.payload)?;
        if command.kind() != self.kind {
            return Err(WireError::KindMismatch);
        }
        Ok(command)
    }
}
