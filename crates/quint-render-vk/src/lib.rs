// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan backend: instance, surface, device, swapchain, pipeline and the
//! per-frame objects, each owned by its own RAII type so teardown order is
//! fixed by construction.
mod context;
mod device;
mod frame;
mod pipeline;
mod renderer;
mod surface;
mod swapchain;

use ash::vk;
use quint_render::RenderError;

pub use context::{ContextOptions, GraphicsContext, VALIDATION_LAYER};
pub use device::{
    select_physical_device, DeviceQueries, LogicalDevice, PhysicalDeviceChoice, QueueFamilyIndices,
};
pub use frame::{FrameResources, FrameSlot};
pub use pipeline::{install_builtin_shaders, load_spirv, RenderTargets, ShaderPaths};
pub use renderer::{RendererOptions, VkRenderer};
pub use surface::Surface;
pub use swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format, SwapchainState,
    PREFERRED_SURFACE_FORMAT,
};

/// Maps a raw Vulkan failure onto the error taxonomy. Surface loss is singled
/// out because the frame loop treats it differently from other device errors.
pub(crate) fn vk_error(what: &'static str) -> impl FnOnce(vk::Result) -> RenderError {
    move |result| match result {
        vk::Result::ERROR_SURFACE_LOST_KHR => RenderError::SurfaceLost,
        other => RenderError::device(what, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_loss_is_not_a_generic_device_error() {
        assert!(matches!(
            vk_error("vkQueuePresentKHR")(vk::Result::ERROR_SURFACE_LOST_KHR),
            RenderError::SurfaceLost
        ));
        let err = vk_error("vkQueueSubmit")(vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(err, RenderError::Device { what: "vkQueueSubmit", .. }));
        assert!(err.to_string().starts_with("vkQueueSubmit failed"));
    }
}
