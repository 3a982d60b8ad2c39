//! # Mukjjippa
//!
//! Two-player Mukjjippa matches synchronized through a replicated room
//! document. There is no game server: each client talks only to the
//! store, and the host seat writes every state transition.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        MUKJJIPPA                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── code.rs     - Room codes                                │
//! │  └── hash.rs     - Snapshot fingerprints                     │
//! │                                                              │
//! │  game/           - Match rules (deterministic)               │
//! │  ├── state.rs    - Room document                             │
//! │  ├── rules.rs    - Round resolution                          │
//! │  ├── update.rs   - Conditional partial updates               │
//! │  └── transition.rs - Host-side next-state planning           │
//! │                                                              │
//! │  store/          - Room store contract (non-deterministic)   │
//! │  └── memory.rs   - In-process store                          │
//! │                                                              │
//! │  session/        - Per-client sessions (non-deterministic)   │
//! │  ├── controller.rs - Create/join, intent, observation        │
//! │  ├── proposal.rs - Best-of-3 negotiation                     │
//! │  ├── events.rs   - Presentation events                       │
//! │  └── config.rs   - Tunables                                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! `core/` and `game/` are pure: both clients resolve the same snapshot
//! to the same outcome, with no clock, randomness or I/O involved.
//! Randomness is confined to room-code generation in the session layer.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use core::code::MatchCode;
pub use game::rules::{resolve_round, RoundOutcome, ResolvedRound, Perspective};
pub use game::state::{Hand, Match, MatchPhase, PlayerSlot};
pub use session::{SessionConfig, SessionController, SessionError, SessionEvent, SessionEvents};
pub use store::{MemoryStore, RoomStore, StoreError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Round wins that end a single match.
pub const SINGLE_ROUND_THRESHOLD: u32 = 1;

/// Round wins that end a best-of-3.
pub const BEST_OF3_THRESHOLD: u32 = 2;
