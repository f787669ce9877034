//! # warren-vsr: viewstamped replication for the control plane
//!
//! This crate implements the replicator's consensus core as a pure,
//! deterministic state machine. The [`Replica`] takes protocol messages,
//! timeout firings, and client submissions as input and produces new state
//! plus [`Output`] - messages to send, committed log entries to apply, and
//! leadership notifications. No I/O, no clocks, no randomness: the driver
//! (in `warren-server`) owns sockets, timers, and election jitter.
//!
//! # Protocol overview
//!
//! ## Normal operation
//!
//! ```text
//! Submit ──► Leader
//!              ├──Prepare──► Backup₁ ─PrepareOk─┐
//!              ├──Prepare──► Backup₂ ─PrepareOk─┤
//!              │◄───────── quorum ──────────────┘
//!              ├──Commit───► All   (entry applied everywhere, in order)
//! ```
//!
//! ## View change
//!
//! ```text
//! Backup ──StartViewChange──► All          (election timeout)
//!            │ quorum
//!            ▼
//! Backup ──DoViewChange──► leader(view+1)  (carries log + commit point)
//!            │ quorum
//!            ▼
//! New leader ──StartView──► All            (authoritative log for the view)
//! ```
//!
//! A replica that has fallen behind the compaction horizon catches up with
//! a snapshot-based state transfer instead of log repair.
//!
//! The leader for view `v` is `v mod n`: deterministic, no separate
//! election state. Quorum is a strict majority of the configured voters.

mod config;
mod message;
mod replica;
mod types;


pub use config::VsrConfig;
pub use message::{
    Commit, DoViewChange, Heartbeat, Message, MessagePayload, Prepare, PrepareOk, StartView,
    StartViewChange, StateTransferRequest, StateTransferResponse,
};
pub use replica::{InstallSnapshot, Leadership, Output, Replica, SubmitError};
pub use types::{LogEntry, OpNumber, ReplicaId, ReplicaStatus, ViewNumber};
