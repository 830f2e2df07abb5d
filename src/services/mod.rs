//! Direct data access for sessions, tasks, participants, and progress.
//!
//! ARCHITECTURE
//! ============
//! Request/response operations the coordinator and participant views call
//! outside the live sync loop. Each function takes the store by reference
//! and returns `SyncError`; none of them touch the projection. The live
//! views pick up their effects through push or polling.

pub mod participant;
pub mod progress;
pub mod session;
pub mod task;
