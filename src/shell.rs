// Winit shell - hosts the Vulkan backend on a native window
//
// Turns the window's raw handles into a Vulkan surface and device and hands
// both to the graphics context when it connects.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::prelude::VkResult;
use ash::{vk, Entry};
use bridge_renderer::backend::vulkan::{KhrSurface, VulkanDevice};
use bridge_renderer::{ContextToken, Extent, GraphicsApi, RendererError, VulkanConnection, VulkanWindow, Window};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_void, CStr};
use std::sync::Arc;

pub struct Shell {
    window: Arc<winit::window::Window>,
    title: String,
    validation: bool,
    present_mode: vk::PresentModeKHR,
    api: Option<GraphicsApi>,
}

impl Shell {
    pub fn new(
        window: Arc<winit::window::Window>,
        title: &str,
        validation: bool,
        present_mode: vk::PresentModeKHR,
    ) -> Self {
        Self {
            window,
            title: title.to_string(),
            validation,
            present_mode,
            api: None,
        }
    }

    fn open(&self) -> Result<VulkanConnection> {
        let display = self
            .window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let handle = self
            .window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let extensions = surface_extensions(display)?;
        let (device, surface) = VulkanDevice::new(&self.title, self.validation, &extensions, |entry, instance| unsafe {
            create_surface(entry, instance, display, handle)
        })?;

        let surface = KhrSurface::new(device.clone(), surface, self.present_mode)
            .context("Failed to query surface capabilities")?;

        Ok(VulkanConnection {
            driver: device,
            surface: Box::new(surface),
        })
    }
}

impl Window for Shell {
    fn init(&mut self, _token: &ContextToken, api: GraphicsApi) -> bridge_renderer::Result<()> {
        match api {
            GraphicsApi::Vulkan => {
                self.api = Some(api);
                Ok(())
            }
            GraphicsApi::OpenGl => Err(RendererError::Unsupported(
                "the winit shell has no OpenGL context".to_string(),
            )),
        }
    }

    fn size(&self) -> Extent {
        let size = self.window.inner_size();
        Extent::new(size.width, size.height)
    }
}

impl VulkanWindow for Shell {
    fn connect(&mut self, _token: &ContextToken) -> bridge_renderer::Result<VulkanConnection> {
        if self.api != Some(GraphicsApi::Vulkan) {
            return Err(RendererError::invalid("window connected before init"));
        }
        self.open().map_err(|err| RendererError::DeviceFatal {
            operation: "connect window",
            reason: format!("{err:#}"),
        })
    }
}

/// Instance extensions needed to create a surface for `display`
fn surface_extensions(display: RawDisplayHandle) -> Result<Vec<&'static CStr>> {
    let platform = match display {
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        other => anyhow::bail!("Unsupported display handle: {:?}", other),
    };
    Ok(vec![khr::Surface::name(), platform])
}

/// # Safety
/// The handles must stay valid for the lifetime of the returned surface.
unsafe fn create_surface(
    entry: &Entry,
    instance: &ash::Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> VkResult<vk::SurfaceKHR> {
    match (display, window) {
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => {
            let dpy = display.display.map_or(std::ptr::null_mut(), |d| d.as_ptr());
            let info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy.cast())
                .window(window.window);
            khr::XlibSurface::new(entry, instance).create_xlib_surface(&info, None)
        }
        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(window)) => {
            let connection = display.connection.map_or(std::ptr::null_mut(), |c| c.as_ptr());
            let info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection.cast())
                .window(window.window.get());
            khr::XcbSurface::new(entry, instance).create_xcb_surface(&info, None)
        }
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
            let info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr().cast())
                .surface(window.surface.as_ptr().cast());
            khr::WaylandSurface::new(entry, instance).create_wayland_surface(&info, None)
        }
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(window)) => {
            let hinstance = window.hinstance.map_or(0, |h| h.get()) as *const c_void;
            let info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(window.hwnd.get() as *const c_void);
            khr::Win32Surface::new(entry, instance).create_win32_surface(&info, None)
        }
        _ => Err(vk::Result::ERROR_EXTENSION_NOT_PRESENT),
    }
}
