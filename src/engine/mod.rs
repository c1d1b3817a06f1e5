//! Rendering engine seam.
//!
//! The dispatcher drives any [`PageEngine`] implementation; the engine owns
//! all page state (fetched document, viewport, zoom) and is free to be
//! non-`Sync` since exactly one worker thread ever touches it.

pub mod html;
pub mod layout;
pub mod surface;

pub use html::HtmlEngine;
pub use surface::{Painter, Surface};

use crate::error::Result;
use crate::params::RenderJob;

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Page settings applied on every load.
///
/// This is a fixed policy, not user-configurable: it bounds the resource
/// usage and security exposure of each render.
#[derive(Debug, Clone, Copy)]
pub struct PagePolicy {
    pub scripts_enabled: bool,
    pub plugins_enabled: bool,
    pub java_enabled: bool,
    pub webgl_enabled: bool,
    pub local_storage_enabled: bool,
    pub private_browsing: bool,
}

impl PagePolicy {
    pub const fn locked() -> Self {
        Self {
            scripts_enabled: true,
            plugins_enabled: false,
            java_enabled: false,
            webgl_enabled: false,
            local_storage_enabled: false,
            private_browsing: true,
        }
    }
}

/// Core trait for page-rendering engines.
///
/// Calls arrive strictly serialized from the dispatcher's worker thread.
pub trait PageEngine {
    /// Load the job's URL and make the page current, applying the fixed
    /// [`PagePolicy`] along with the job's user agent and zoom factor.
    fn load_page(&mut self, job: &RenderJob) -> Result<()>;

    /// Measure the loaded document's height through the engine's scripting
    /// hook. `Ok(0)` means the page reported no height.
    fn measure_height(&mut self) -> Result<u32>;

    /// Resize the capture viewport.
    fn set_viewport(&mut self, viewport: Viewport);

    /// Paint the current page into the surface behind `painter`.
    fn paint(&mut self, painter: &mut Painter<'_>) -> Result<()>;
}
