// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::khr::surface;
use ash::vk;
use quint_core::Logger;
use quint_render::RenderError;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::context::GraphicsContext;
use crate::vk_error;

/// The window's presentation surface. Created from, and destroyed before,
/// the [`GraphicsContext`].
pub struct Surface {
    loader: surface::Instance,
    handle: vk::SurfaceKHR,
    logger: Arc<Logger>,
}

impl Surface {
    pub fn new(
        context: &GraphicsContext,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
    ) -> Result<Self, RenderError> {
        let logger = context.logger().clone();
        logger.debug("Surface creating...");

        let display_raw = display
            .display_handle()
            .map_err(|e| RenderError::init(format!("display handle: {e}")))?
            .as_raw();
        let window_raw = window
            .window_handle()
            .map_err(|e| RenderError::init(format!("window handle: {e}")))?
            .as_raw();

        // SAFETY: the window outlives the renderer that owns this surface.
        let handle = unsafe {
            ash_window::create_surface(
                context.entry(),
                context.instance(),
                display_raw,
                window_raw,
                None,
            )
        }
        .map_err(|e| RenderError::init(format!("create_surface: {e}")))?;
        let loader = surface::Instance::new(context.entry(), context.instance());

        logger.info("Surface created");
        Ok(Self {
            loader,
            handle,
            logger,
        })
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    pub fn capabilities(
        &self,
        device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR, RenderError> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(device, self.handle)
        }
        .map_err(vk_error("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))
    }

    pub fn formats(
        &self,
        device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::SurfaceFormatKHR>, RenderError> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(device, self.handle)
        }
        .map_err(vk_error("vkGetPhysicalDeviceSurfaceFormatsKHR"))
    }

    pub fn present_modes(
        &self,
        device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::PresentModeKHR>, RenderError> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(device, self.handle)
        }
        .map_err(vk_error("vkGetPhysicalDeviceSurfacePresentModesKHR"))
    }

    pub fn supports_present(
        &self,
        device: vk::PhysicalDevice,
        family: u32,
    ) -> Result<bool, RenderError> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(device, family, self.handle)
        }
        .map_err(vk_error("vkGetPhysicalDeviceSurfaceSupportKHR"))
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.logger.debug("Surface destroying...");
        // SAFETY: the swapchain built on this surface is already gone.
        unsafe { self.loader.destroy_surface(self.handle, None) };
        self.logger.debug("Surface destroyed");
    }
}
