//! Entrasync Graph — Microsoft Graph gateway for group reconciliation.
//!
//! This crate handles credential resolution and token acquisition,
//! paginated group/member reads, and the group/member write operations
//! the reconciliation engine dispatches.

pub mod auth;
pub mod client;
pub mod identity;
pub mod models;
