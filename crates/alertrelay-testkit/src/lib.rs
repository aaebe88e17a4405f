//! # Alert Relay Testkit
//!
//! Testing utilities for the alert relay.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a reconciler wired to an in-memory session, a manual
//!   delayer and a manual clock, with helpers for scripting scenarios
//! - **Generators**: Proptest strategies for channel sets and event scripts
//! - **Tracing**: a one-call subscriber for readable test logs
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use alertrelay_testkit::ReconcilerFixture;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let mut fixture = ReconcilerFixture::new(&["#foo"])?;
//!     fixture.start().await?;
//!     fixture.connect().await?;
//!
//!     let channel = fixture.next_join().await?;
//!     fixture.session.confirm_join(channel.as_str());
//!     fixture.wait_joined("#foo").await?;
//!     fixture.stop().await
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use alertrelay_testkit::generators::{channel_specs, table_script};
//!
//! proptest! {
//!     #[test]
//!     fn table_never_joined_while_disconnected(
//!         (specs, script) in channel_specs(4).prop_flat_map(|s| {
//!             let n = s.len();
//!             (Just(s), table_script(n, 64))
//!         })
//!     ) {
//!         // drive a ChannelTable with `script` and check invariants
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod logging;

pub use fixtures::{ReconcilerFixture, FIXTURE_NICK, TEST_RETRY_DELAY};
pub use generators::{channel_specs, table_script, TableInput};
pub use logging::init_tracing;
