//! State and value storage.
//!
//! - [`RegisterState`]: raw register cache and tracked sensors, owned by a
//!   session
//! - [`ValueStore`]: outbound sink for decoded readings, with
//!   [`MemoryStore`] as the in-process default
//!
//! # Example
//!
//! ```rust,ignore
//! use sunsynk_gw::store::{MemoryStore, ValueStore};
//!
//! let store = MemoryStore::new();
//! store.publish(&session.values()).await?;
//! ```

mod memory;
pub mod registers;
mod traits;

pub use memory::MemoryStore;
pub use registers::{RegisterState, TrackedSensor};
pub use traits::{ValueEvent, ValueStore};
