//! Namespaced key/value persistence for Widgetry host state.
//!
//! Backs four namespaces (instance states, per-plugin data, capability
//! sets, and app settings) with a single JSON file. Every mutation is
//! flushed through a write-to-temp-then-rename cycle so a crash mid-write
//! can never leave a truncated store on disk.

mod error;
mod store;

pub use error::{StoreError, StoreResult};
pub use store::{Namespace, WidgetStore};
