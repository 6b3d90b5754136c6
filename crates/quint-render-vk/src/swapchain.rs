// SPDX-License-Identifier: CEPL-1.0
//! Swapchain policy (pure functions over surface queries) and the swapchain
//! object with its per-image views.
use std::sync::Arc;

use ash::khr::swapchain;
use ash::vk;
use quint_core::Logger;
use quint_render::{RenderError, RenderSize};

use crate::device::{LogicalDevice, PhysicalDeviceChoice};
use crate::surface::Surface;

/// 8-bit BGRA in the sRGB nonlinear color space.
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// A single UNDEFINED entry means the surface takes any format, so the
/// preferred one is used. Otherwise the preferred pair if listed, else the
/// first reported. `None` only for an empty list.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Some(PREFERRED_SURFACE_FORMAT);
        }
    }
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == PREFERRED_SURFACE_FORMAT.format
                && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| formats.first().copied())
}

/// MAILBOX, then IMMEDIATE, then FIFO (always supported).
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's fixed extent, unless it reports the "any size" sentinel, in
/// which case the window size is clamped into the supported range.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    let clamp = |value: u32, min: u32, max: u32| value.min(max).max(min);
    vk::Extent2D {
        width: clamp(
            window.width,
            caps.min_image_extent.width,
            caps.max_image_extent.width,
        ),
        height: clamp(
            window.height,
            caps.min_image_extent.height,
            caps.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum (0 means no maximum).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count.saturating_add(1);
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

fn sharing_for(choice: &PhysicalDeviceChoice) -> (vk::SharingMode, Vec<u32>) {
    if choice.shares_images() {
        (
            vk::SharingMode::CONCURRENT,
            vec![choice.graphics_family, choice.present_family],
        )
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

fn creation_failed(what: &str) -> impl FnOnce(RenderError) -> RenderError + '_ {
    move |err| RenderError::SwapchainCreationFailed(format!("{what}: {err}"))
}

/// A swapchain plus one color view per image.
pub struct SwapchainState {
    loader: swapchain::Device,
    device: ash::Device,
    handle: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    logger: Arc<Logger>,
}

impl SwapchainState {
    /// Builds a swapchain for `window_size`. `previous` is handed to the
    /// driver as the old swapchain so it can recycle resources; the caller
    /// still owns it and destroys it afterwards.
    pub fn build(
        device: &LogicalDevice,
        surface: &Surface,
        window_size: RenderSize,
        previous: Option<&SwapchainState>,
        logger: Arc<Logger>,
    ) -> Result<Self, RenderError> {
        let physical = device.choice().physical_device;
        let caps = surface
            .capabilities(physical)
            .map_err(creation_failed("surface capabilities"))?;
        let formats = surface
            .formats(physical)
            .map_err(creation_failed("surface formats"))?;
        let modes = surface
            .present_modes(physical)
            .map_err(creation_failed("present modes"))?;

        let format = choose_surface_format(&formats).ok_or_else(|| {
            RenderError::SwapchainCreationFailed("surface reports no formats".to_owned())
        })?;
        let present_mode = choose_present_mode(&modes);
        let extent = choose_extent(&caps, window_size);
        if extent.width == 0 || extent.height == 0 {
            return Err(RenderError::ZeroExtent);
        }
        let image_count = choose_image_count(&caps);
        let (sharing_mode, families) = sharing_for(device.choice());

        let create_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surface.handle(),
            min_image_count: image_count,
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: families.len() as u32,
            p_queue_family_indices: families.as_ptr(),
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: previous.map_or(vk::SwapchainKHR::null(), |p| p.handle),
            ..Default::default()
        };

        let loader = device.swapchain_loader().clone();
        // SAFETY: `families` outlives the call; the surface and the previous
        // swapchain are alive.
        let handle = unsafe { loader.create_swapchain(&create_info, None) }.map_err(|e| {
            RenderError::SwapchainCreationFailed(format!("vkCreateSwapchainKHR: {e}"))
        })?;

        // From here on Drop cleans up whatever was created.
        let mut state = Self {
            loader,
            device: device.raw().clone(),
            handle,
            format,
            present_mode,
            extent,
            images: Vec::new(),
            image_views: Vec::new(),
            logger,
        };

        state.images = unsafe { state.loader.get_swapchain_images(handle) }.map_err(|e| {
            RenderError::SwapchainCreationFailed(format!("vkGetSwapchainImagesKHR: {e}"))
        })?;
        state.image_views.reserve(state.images.len());
        for &image in &state.images {
            let view_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: format.format,
                components: vk::ComponentMapping::default(),
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view = unsafe { state.device.create_image_view(&view_info, None) }.map_err(
                |e| RenderError::SwapchainCreationFailed(format!("vkCreateImageView: {e}")),
            )?;
            state.image_views.push(view);
        }

        state.logger.info(format!(
            "Swapchain created: {:?}/{:?}, {:?}, {}x{}, {} images",
            format.format,
            format.color_space,
            present_mode,
            extent.width,
            extent.height,
            state.images.len()
        ));
        Ok(state)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn loader(&self) -> &swapchain::Device {
        &self.loader
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for SwapchainState {
    fn drop(&mut self) {
        self.logger.debug("Swapchain destroying...");
        // SAFETY: the device is idle and every framebuffer over these views
        // is gone. Views go before the swapchain that owns their images.
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
        self.logger.debug("Swapchain destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn undefined_only_means_preferred() {
        let formats = [fmt(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        assert_eq!(
            choose_surface_format(&formats),
            Some(PREFERRED_SURFACE_FORMAT)
        );
    }

    #[test]
    fn preferred_format_wins_when_listed() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats),
            Some(PREFERRED_SURFACE_FORMAT)
        );
    }

    #[test]
    fn falls_back_to_first_reported_format() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            // right format, wrong color space
            fmt(
                vk::Format::B8G8R8A8_UNORM,
                vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            ),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[0]));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_preference() {
        use vk::PresentModeKHR as P;
        assert_eq!(choose_present_mode(&[P::FIFO, P::IMMEDIATE, P::MAILBOX]), P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::FIFO, P::IMMEDIATE]), P::IMMEDIATE);
        assert_eq!(choose_present_mode(&[P::FIFO_RELAXED, P::FIFO]), P::FIFO);
        assert_eq!(choose_present_mode(&[]), P::FIFO);
    }

    #[test]
    fn fixed_extent_is_used_verbatim() {
        let c = caps((1024, 768), (1, 1), (4096, 4096));
        assert_eq!(
            choose_extent(&c, RenderSize::new(10, 10)),
            vk::Extent2D {
                width: 1024,
                height: 768
            }
        );
    }

    #[test]
    fn free_extent_clamps_window_size() {
        let c = caps((u32::MAX, u32::MAX), (200, 100), (1920, 1080));
        assert_eq!(
            choose_extent(&c, RenderSize::new(800, 600)),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
        assert_eq!(
            choose_extent(&c, RenderSize::new(4000, 50)),
            vk::Extent2D {
                width: 1920,
                height: 100
            }
        );
    }

    #[test]
    fn free_extent_keeps_sizes_on_the_bounds() {
        let c = caps((u32::MAX, u32::MAX), (200, 100), (1920, 1080));
        assert_eq!(
            choose_extent(&c, RenderSize::new(200, 100)),
            vk::Extent2D {
                width: 200,
                height: 100
            }
        );
        assert_eq!(
            choose_extent(&c, RenderSize::new(1920, 1080)),
            vk::Extent2D {
                width: 1920,
                height: 1080
            }
        );
        // mixed: one axis on its minimum, the other on its maximum
        assert_eq!(
            choose_extent(&c, RenderSize::new(200, 1080)),
            vk::Extent2D {
                width: 200,
                height: 1080
            }
        );
    }

    #[test]
    fn format_choice_is_stable_across_calls() {
        let lists: [Vec<vk::SurfaceFormatKHR>; 3] = [
            vec![fmt(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            vec![
                fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                PREFERRED_SURFACE_FORMAT,
            ],
            vec![
                fmt(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                fmt(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            ],
        ];
        for formats in &lists {
            let first = choose_surface_format(formats);
            assert!(first.is_some());
            for _ in 0..8 {
                assert_eq!(choose_surface_format(formats), first);
            }
        }
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        let mut c = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&c), 3);
        c.max_image_count = 8;
        assert_eq!(choose_image_count(&c), 3);
        // min == max leaves no room for the extra image
        c.min_image_count = 3;
        c.max_image_count = 3;
        assert_eq!(choose_image_count(&c), 3);
    }

    #[test]
    fn sharing_follows_queue_families() {
        use ash::vk::Handle;
        let mut choice = PhysicalDeviceChoice {
            physical_device: vk::PhysicalDevice::from_raw(1),
            graphics_family: 0,
            present_family: 0,
        };
        assert_eq!(sharing_for(&choice), (vk::SharingMode::EXCLUSIVE, vec![]));
        choice.present_family = 2;
        assert_eq!(
            sharing_for(&choice),
            (vk::SharingMode::CONCURRENT, vec![0, 2])
        );
    }
}
