//! Host-owned window resources.
//!
//! The shell's real windows (wrapping the OS window sandbox) live behind
//! these traits; the lifecycle manager owns each handle exclusively and
//! releases it on close or crash. Handles are never shared between
//! instances.

use crate::error::HostResult;
use crate::manifest::WidgetSize;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use widgetry_types::PluginId;

/// A window position in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

/// Current window geometry as reported by the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub position: Position,
    pub size: WidgetSize,
}

/// Everything needed to open a widget window.
#[derive(Debug, Clone)]
pub struct WindowOptions {
    pub plugin_id: PluginId,
    /// Entry document inside the installed widget directory.
    pub entry_point: PathBuf,
    pub position: Position,
    pub size: WidgetSize,
    pub min_size: Option<WidgetSize>,
    pub max_size: Option<WidgetSize>,
}

/// An opaque, exclusively-owned window resource.
#[async_trait]
pub trait WindowHandle: Send {
    /// Current geometry, for persistence on close.
    fn bounds(&self) -> WindowBounds;

    /// Plays the exit animation and releases window content. The caller
    /// bounds the wait; implementations should finish within `budget`.
    async fn close_graceful(&mut self, budget: Duration);

    /// Hard-destroys the underlying window. Must be safe after
    /// `close_graceful` and on crashed windows.
    fn destroy(&mut self);
}

/// Creates widget windows on behalf of the lifecycle manager.
pub trait WindowSystem: Send + Sync {
    fn create_window(&self, options: &WindowOptions) -> HostResult<Box<dyn WindowHandle>>;
}

/// Window system that opens no real windows.
///
/// Used by the test suites and by headless host runs (e.g. CI smoke tests
/// of the lifecycle state machine).
#[derive(Debug, Default)]
pub struct HeadlessWindowSystem;

struct HeadlessWindow {
    bounds: WindowBounds,
    destroyed: bool,
}

#[async_trait]
impl WindowHandle for HeadlessWindow {
    fn bounds(&self) -> WindowBounds {
        self.bounds
    }

    async fn close_graceful(&mut self, _budget: Duration) {}

    fn destroy(&mut self) {
        self.destroyed = true;
    }
}

impl WindowSystem for HeadlessWindowSystem {
    fn create_window(&self, options: &WindowOptions) -> HostResult<Box<dyn WindowHandle>> {
        Ok(Box::new(HeadlessWindow {
            bounds: WindowBounds {
                position: options.position,
                size: options.size,
            },
            destroyed: false,
        }))
    }
}
