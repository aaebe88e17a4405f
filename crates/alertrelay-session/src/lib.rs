//! # Alert Relay Session
//!
//! The contract between the channel reconciler and the chat session it
//! drives.
//!
//! ## Overview
//!
//! The session owns the connection: registration, authentication, TLS,
//! line framing and flood control all live behind the [`Session`] trait.
//! Consumers see four commands (connect, disconnect, join, state queries)
//! and a broadcast stream of [`SessionEvent`]s.
//!
//! ## Event Flow
//!
//! ```text
//! Reconciler                          Session
//!   |<------- Connected ---------------|
//!   |-------- JOIN #foo -------------->|
//!   |<------- JoinConfirmed(#foo) -----|
//!   |<------- Kicked(#foo, self) ------|
//!   |-------- JOIN #foo -------------->|
//!   |<------- Disconnected ------------|
//! ```
//!
//! [`MemorySession`] implements the contract in memory for tests.

pub mod error;
pub mod memory;
pub mod session;

pub use error::{Result, SessionError};
pub use memory::{MemorySession, SessionCommand};
pub use session::{Session, SessionEvent, EVENT_BUFFER};
