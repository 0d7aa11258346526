// Platform - window descriptor and surface creation
//
// The backend never owns a window. It gets a read-only descriptor with the
// current size and the raw platform handles, and turns those into a
// VkSurfaceKHR with the matching WSI extension.

use anyhow::{bail, Context, Result};
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{
    HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle,
};
use std::ffi::{c_void, CStr};

/// Read-only view of the window the backend presents to.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub width: u32,
    pub height: u32,
    pub display: RawDisplayHandle,
    pub handle: RawWindowHandle,
}

impl Window {
    /// Snapshot the size and raw handles of a live window.
    pub fn from_handles<W>(window: &W, width: u32, height: u32) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let display = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();
        Ok(Self {
            width,
            height,
            display,
            handle,
        })
    }
}

/// Instance extensions needed to create a surface on `display`.
pub fn required_instance_extensions(display: RawDisplayHandle) -> Result<Vec<&'static CStr>> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        other => bail!("Unsupported display type: {:?}", other),
    };
    Ok(vec![khr::Surface::name(), platform])
}

/// Create a presentable surface for `window`.
///
/// # Safety
/// The handles in `window` must refer to a live window and display that
/// outlive the returned surface.
pub unsafe fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    window: &Window,
) -> Result<vk::SurfaceKHR> {
    let surface = match (window.display, window.handle) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as *const c_void;
            let hwnd = handle.hwnd.get() as *const c_void;
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(hwnd);
            khr::Win32Surface::new(entry, instance).create_win32_surface(&create_info, None)
        }
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr())
                .surface(handle.surface.as_ptr());
            khr::WaylandSurface::new(entry, instance).create_wayland_surface(&create_info, None)
        }
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
            let dpy = display
                .display
                .map_or(std::ptr::null_mut(), |d| d.as_ptr());
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy as *mut vk::Display)
                .window(handle.window);
            khr::XlibSurface::new(entry, instance).create_xlib_surface(&create_info, None)
        }
        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
            let connection = display
                .connection
                .map_or(std::ptr::null_mut(), |c| c.as_ptr());
            let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection)
                .window(handle.window.get());
            khr::XcbSurface::new(entry, instance).create_xcb_surface(&create_info, None)
        }
        (display, handle) => bail!(
            "Unsupported window handle type: {:?} / {:?}",
            display,
            handle
        ),
    };

    surface.context("Failed to create window surface")
}
