//! Session Layer
//!
//! Per-client match sessions on top of a [`RoomStore`](crate::store::RoomStore).
//!
//! This layer is **non-deterministic** (tasks, channels, store I/O). All
//! rule decisions are delegated to `game/`.
//!
//! ## Module Structure
//!
//! - `config`: Session tunables
//! - `controller`: Create/join, local intent, snapshot processing
//! - `proposal`: Best-of-3 offer/accept
//! - `events`: Events for the presentation layer

pub mod config;
pub mod controller;
pub mod events;
pub mod proposal;

pub use config::SessionConfig;
pub use controller::{SessionController, SessionError};
pub use events::{SessionEvent, SessionEvents, TerminationReason};
pub use proposal::{HostAction, NegotiationError, ProposalNegotiator};
