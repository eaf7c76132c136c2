//! Register access engine.
//!
//! - [`group`]: packs sensor addresses into batched read spans
//! - [`Session`]: batched reads, bitmask-preserving writes, register state
//! - [`PollDriver`]: retry/escalation policy and the poll loop
//!
//! # Example
//!
//! ```rust,ignore
//! use sunsynk_gw::prelude::*;
//!
//! let mut session = Session::new(transport, EngineConfig::default());
//! session.connect().await?;
//! session.track(SENSORS_5KW.iter().cloned());
//!
//! let mut driver = PollDriver::new(session.into_shared(), RetryPolicy::default());
//! driver.run(&store, Duration::from_secs(2), writes, shutdown).await?;
//! ```

pub mod group;
pub mod poll;
pub mod session;

pub use group::{group_addresses, group_sensors, RegisterGroup, ALLOW_GAP, DEFAULT_BATCH_SIZE};
pub use poll::{CycleOutcome, PollDriver, RetryPolicy, WriteRequest};
pub use session::{
    EngineConfig, ReadReport, Session, SharedSession, ShortReadInfo, WriteReport, MAX_BATCH_SIZE,
};
