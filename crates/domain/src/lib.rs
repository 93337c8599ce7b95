//! `mb-domain` — shared types for mcpbridge.
//!
//! This crate holds the pieces every other crate needs: the error
//! taxonomy, the process-wide configuration object, and the
//! provider-agnostic tool/message types that flow between the tool
//! servers, the LLM adapter, and the bridge session.

pub mod config;
pub mod error;
pub mod tool;
