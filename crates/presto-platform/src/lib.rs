// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::sync::Arc;

use portable_atomic::{AtomicBool, Ordering};
use presto_render::{RenderSize, WindowAdapter};
use tracing::trace;
use winit::raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use winit::window::Window;

pub use winit;

/// Set from the event loop, consumed by the frame loop.
#[derive(Debug, Default)]
pub struct ResizeFlag(AtomicBool);

impl ResizeFlag {
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clears the flag and reports whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// A winit window as the swapchain sees it.
pub struct WinitWindowAdapter {
    window: Arc<Window>,
    resize: ResizeFlag,
}

impl WinitWindowAdapter {
    pub fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            resize: ResizeFlag::default(),
        }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Call from `WindowEvent::Resized`.
    pub fn notify_resized(&self, width: u32, height: u32) {
        trace!("resize requested: {width}x{height}");
        self.resize.raise();
    }
}

impl WindowAdapter for WinitWindowAdapter {
    fn drawable_size(&self) -> RenderSize {
        let size = self.window.inner_size();
        RenderSize::new(size.width, size.height)
    }

    fn take_resize(&self) -> bool {
        self.resize.take()
    }
}

impl HasWindowHandle for WinitWindowAdapter {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl HasDisplayHandle for WinitWindowAdapter {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}
