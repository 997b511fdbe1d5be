// SPDX-License-Identifier: CEPL-1.0
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimised window reports a zero-area drawable.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What the frame cycle needs from the windowing toolkit.
///
/// The resize flag is edge-triggered: the toolkit raises it on every size
/// change and the consumer takes it exactly once before acting on it.
pub trait WindowAdapter {
    /// Current drawable size in pixels (not logical points).
    fn drawable_size(&self) -> RenderSize;
    /// Clears the resize flag and reports whether it was raised, in one step
    /// so a change landing in between is not lost.
    fn take_resize(&self) -> bool;
}

/// A window adapter that can also hand out native handles for surface creation.
pub trait NativeWindow: WindowAdapter + HasWindowHandle + HasDisplayHandle {}

impl<T> NativeWindow for T where T: WindowAdapter + HasWindowHandle + HasDisplayHandle {}
