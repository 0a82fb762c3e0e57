//! Client library for the JGPT chat backend
//!
//! The heart of the crate is [`session::SessionController`]: it owns the
//! message log of the active conversation view, drives cancellable
//! streaming chat turns over the backend's SSE protocol, and reconstructs
//! incremental turn state (thoughts, tool calls, citations, streamed
//! answer text). Supporting layers:
//!
//! - [`protocol`] — SSE framing and event normalization
//! - [`api`] — the authenticated HTTP surface, behind a transport trait
//! - [`auth`] — durable bearer-token storage, unverified display claims
//! - [`conversation`] — message-log and reasoning-trace types

pub mod api;
pub mod auth;
pub mod config;
pub mod conversation;
pub mod protocol;
pub mod session;

pub use config::Config;
pub use session::{Notice, SessionController, StopHandle, TurnOutcome};
