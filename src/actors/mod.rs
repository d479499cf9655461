//! Actor-based worker runtime
//!
//! Each loop of a worker runs as an independent async task, controlled
//! through a handle and reporting through a broadcast channel.
//!
//! ## Architecture Overview
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │  worker (main)   │
//!                 └────────┬─────────┘
//!                          │ spawns
//!            ┌─────────────┴─────────────┐
//!            │                           │
//!    ┌───────▼────────┐         ┌────────▼───────┐
//!    │  MonitorActor  │         │  CleanupActor  │
//!    │ claim → probe  │         │ purge orphans  │
//!    │    → record    │         │   in batches   │
//!    └───────┬────────┘         └────────┬───────┘
//!            │                           │
//!            └─────────────┬─────────────┘
//!                 ┌────────▼─────────┐
//!                 │ Broadcast Channel│ (SweepEvent)
//!                 └──────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Events**: Sweep reports are published to a broadcast channel
//! 3. **Request/Response**: oneshot channels for `SweepNow` and `GetStats`

pub mod cleanup;
pub mod messages;
pub mod scheduler;

pub use cleanup::CleanupHandle;
pub use messages::{CleanupStats, MonitorStats, SweepEvent};
pub use scheduler::MonitorHandle;
