//! Shared identifier types for the Widgetry runtime host.
//!
//! Widget ids are validated strings (they name directories on disk and
//! appear in `widget://` deep links); instance ids are UUID v7 for
//! time-ordered, never-reused identifiers.

mod ids;

pub use ids::{InstanceId, PluginId, PluginIdError};
