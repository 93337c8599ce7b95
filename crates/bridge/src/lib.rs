//! `mb-bridge` — the bridge session and its CLI.
//!
//! One bridging run goes from a user prompt to a final answer (or a
//! categorized failure): tools are discovered from the configured
//! servers, projected into the model's capability catalog, and the
//! [`session::BridgeSession`] turn loop dispatches whatever the model
//! requests until it stops asking.

pub mod catalog;
pub mod cli;
pub mod conversation;
pub mod session;
