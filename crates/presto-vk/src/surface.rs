// SPDX-License-Identifier: CEPL-1.0
use std::ffi::c_char;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};

use crate::error::{PrestoError, Result};

/// Raw handles, fetched once. Some backends refuse them until the window is
/// actually shown.
#[derive(Clone, Copy, Debug)]
pub struct WindowHandles {
    pub display: RawDisplayHandle,
    pub window: RawWindowHandle,
}

impl WindowHandles {
    pub fn of<W: HasWindowHandle + HasDisplayHandle + ?Sized>(window: &W) -> Result<Self> {
        let display = window
            .display_handle()
            .map_err(|e| PrestoError::Window(e.to_string()))?
            .as_raw();
        let window = window
            .window_handle()
            .map_err(|e| PrestoError::Window(e.to_string()))?
            .as_raw();
        Ok(Self { display, window })
    }
}

/// Instance extensions the platform's WSI needs.
pub fn required_instance_extensions(display: RawDisplayHandle) -> Result<Vec<*const c_char>> {
    Ok(ash_window::enumerate_required_extensions(display)?.to_vec())
}

/// # Safety
/// `instance` must have been created with [`required_instance_extensions`]
/// for the same display, and the window must outlive the returned surface.
pub unsafe fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    handles: WindowHandles,
) -> Result<vk::SurfaceKHR> {
    unsafe { ash_window::create_surface(entry, instance, handles.display, handles.window, None) }
        .map_err(PrestoError::resource("window surface"))
}
