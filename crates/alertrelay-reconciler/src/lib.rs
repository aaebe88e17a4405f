//! # Alert Relay Reconciler
//!
//! Keeps a configured set of channels joined on a chat session that
//! connects, drops, loses join attempts and gets kicked.
//!
//! ## Overview
//!
//! The [`ChannelReconciler`] runs one worker task that reconciles the
//! desired channels against what the session reports:
//!
//! - **Connected**: join every channel not yet joined or in flight
//! - **Join confirmed**: mark the channel joined, cancel its retry
//! - **Retry fired**: no confirmation within the delay, join again
//! - **Kicked**: rejoin immediately
//! - **Disconnected**: forget all membership, cancel every retry
//!
//! Timing goes through a [`Delayer`] and a [`Clock`], so tests drive it
//! with [`ManualDelayer`] and [`ManualClock`] instead of sleeping.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use alertrelay_core::{ChannelSpec, ReconcilerConfig};
//! use alertrelay_reconciler::{ChannelReconciler, SystemClock, TokioDelayer};
//! use alertrelay_session::{MemorySession, Session};
//! use tokio::sync::watch;
//!
//! async fn example() -> alertrelay_reconciler::Result<()> {
//!     let (session, _commands) = MemorySession::new("alertbot");
//!     let config = ReconcilerConfig::new(vec![ChannelSpec::new("#alerts")]);
//!
//!     let reconciler = ChannelReconciler::new(
//!         config,
//!         session.clone(),
//!         Arc::new(TokioDelayer),
//!         Arc::new(SystemClock),
//!     )?;
//!
//!     let (_shutdown_tx, shutdown) = watch::channel(false);
//!     reconciler.start(shutdown).await?;
//!     let _ = session.connect().await;
//!
//!     let mut membership = reconciler.membership();
//!     membership.wait_joined(&"#alerts".into()).await?;
//!
//!     reconciler.stop().await
//! }
//! ```

pub mod clock;
pub mod delay;
pub mod error;
pub mod membership;
pub mod reconciler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use delay::{Canceller, Delayer, FireSignal, ManualDelayer, ManualTimerState, Timer, TokioDelayer};
pub use error::{ReconcilerError, Result};
pub use membership::{Action, ChannelTable, RetryToken};
pub use reconciler::{ChannelReconciler, MembershipView};
