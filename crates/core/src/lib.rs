//! Entrasync Core — error and configuration types shared by every crate.

pub mod config;
pub mod error;
