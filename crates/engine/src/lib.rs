//! Entrasync Engine — reconciles group memberships between two tenants.
//!
//! The engine discovers groups at the source by display-name prefix,
//! matches them to destination groups by name, diffs memberships under
//! case-insensitive identity keys, and dispatches the minimal set of
//! create/add/remove operations, optionally across a bounded worker
//! pool.

pub mod pool;
pub mod report;
pub mod sync;
