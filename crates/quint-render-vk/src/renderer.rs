// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use quint_core::Logger;
use quint_render::{
    AcquireOutcome, PresentOutcome, Presenter, RenderError, RenderSize, Renderer,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::context::{ContextOptions, GraphicsContext};
use crate::device::{self, LogicalDevice};
use crate::frame::FrameResources;
use crate::pipeline::{RenderTargets, ShaderPaths};
use crate::surface::Surface;
use crate::swapchain::SwapchainState;
use crate::vk_error;

#[derive(Clone, Debug)]
pub struct RendererOptions {
    pub app_name: String,
    pub validation: bool,
    pub frames_in_flight: usize,
    pub shaders: ShaderPaths,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            app_name: "quintessence".to_owned(),
            validation: cfg!(debug_assertions),
            frames_in_flight: quint_render::DEFAULT_FRAMES_IN_FLIGHT,
            shaders: ShaderPaths::default(),
        }
    }
}

/// The whole Vulkan object graph for one window.
///
/// STRICT TEARDOWN ORDER is the field order below: frame resources,
/// render targets, swapchain, logical device, surface, context. Drop waits
/// for the device to go idle before any of them is released.
///
/// Command buffers start out clearing to [`quint_render::DEFAULT_CLEAR_COLOR`];
/// use [`Renderer::set_clear_color`] to change it.
pub struct VkRenderer {
    frames: FrameResources,
    targets: RenderTargets,
    swapchain: SwapchainState,
    device: LogicalDevice,
    surface: Surface,
    context: GraphicsContext,

    shaders: ShaderPaths,
}

impl VkRenderer {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: RendererOptions,
        logger: Arc<Logger>,
    ) -> Result<Self, RenderError> {
        // STRICT ORDER:
        // 1) Instance (+ debug messenger when validating)
        // 2) Surface from this instance
        // 3) Physical device chosen against this surface, then the logical device
        // 4) Swapchain + views
        // 5) Render pass + pipeline for the swapchain format/extent
        // 6) Sync slots, framebuffers, recorded command buffers
        // A failure at any step drops what was built so far in reverse order.
        let display_raw = display
            .display_handle()
            .map_err(|e| RenderError::init(format!("display handle: {e}")))?
            .as_raw();
        let context = GraphicsContext::new(
            display_raw,
            &ContextOptions {
                app_name: options.app_name.clone(),
                validation: options.validation,
            },
            logger.clone(),
        )?;
        let surface = Surface::new(&context, window, display)?;

        let choice = device::pick_device(&context, &surface)?;
        let device = LogicalDevice::new(&context, choice)?;

        let swapchain = SwapchainState::build(&device, &surface, size, None, logger.clone())?;
        let targets = RenderTargets::build(
            &device,
            swapchain.format().format,
            swapchain.extent(),
            &options.shaders,
            logger.clone(),
        )?;

        let mut frames = FrameResources::new(&device, options.frames_in_flight, logger.clone())?;
        frames.rebuild(&swapchain, &targets)?;

        logger.info(format!(
            "Renderer ready on {} ({} frames in flight)",
            device.name(),
            frames.slot_count()
        ));
        Ok(Self {
            frames,
            targets,
            swapchain,
            device,
            surface,
            context,
            shaders: options.shaders,
        })
    }

    pub fn extent(&self) -> RenderSize {
        let extent = self.swapchain.extent();
        RenderSize::new(extent.width, extent.height)
    }

    fn logger(&self) -> &Arc<Logger> {
        self.context.logger()
    }
}

impl Renderer for VkRenderer {
    fn clear_color(&self) -> [f32; 4] {
        self.frames.clear_color()
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<(), RenderError> {
        self.device.wait_idle()?;
        self.frames.set_clear_color(rgba, &self.targets)?;
        self.logger().debug(format!("Clear color set to {rgba:?}"));
        Ok(())
    }
}

impl Presenter for VkRenderer {
    fn frames_in_flight(&self) -> usize {
        self.frames.slot_count()
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<(), RenderError> {
        self.frames.wait(slot)
    }

    fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome, RenderError> {
        let semaphore = self.frames.slot(slot)?.image_available;
        let result = unsafe {
            self.swapchain.loader().acquire_next_image(
                self.swapchain.handle(),
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            // Suboptimal still hands out a usable image; present reports it.
            Ok((image, _suboptimal)) => Ok(AcquireOutcome::Acquired(image)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(vk_error("vkAcquireNextImageKHR")(e)),
        }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<(), RenderError> {
        self.frames.reset(slot)
    }

    fn submit(&mut self, slot: usize, image: u32) -> Result<(), RenderError> {
        let sync = *self.frames.slot(slot)?;
        let command_buffer = self.frames.command_buffer(image)?;

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [sync.render_finished];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait_semaphores.len() as u32,
            p_wait_semaphores: wait_semaphores.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: command_buffers.len() as u32,
            p_command_buffers: command_buffers.as_ptr(),
            signal_semaphore_count: signal_semaphores.len() as u32,
            p_signal_semaphores: signal_semaphores.as_ptr(),
            ..Default::default()
        };

        unsafe {
            self.device.raw().queue_submit(
                self.device.graphics_queue(),
                std::slice::from_ref(&submit),
                sync.in_flight,
            )
        }
        .map_err(vk_error("vkQueueSubmit"))
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<PresentOutcome, RenderError> {
        let wait_semaphores = [self.frames.slot(slot)?.render_finished];
        let swapchains = [self.swapchain.handle()];
        let indices = [image];
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: wait_semaphores.len() as u32,
            p_wait_semaphores: wait_semaphores.as_ptr(),
            swapchain_count: swapchains.len() as u32,
            p_swapchains: swapchains.as_ptr(),
            p_image_indices: indices.as_ptr(),
            ..Default::default()
        };

        match unsafe {
            self.swapchain
                .loader()
                .queue_present(self.device.present_queue(), &present)
        } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(e) => Err(vk_error("vkQueuePresentKHR")(e)),
        }
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        self.device.wait_idle()
    }

    fn rebuild(&mut self, size: RenderSize) -> Result<(), RenderError> {
        // STRICT ORDER (rebuild), device already idle:
        // 1) New swapchain, old handle passed as the hint
        // 2) New render targets if format or extent changed
        // 3) Release framebuffers + command buffers (old views, old pass)
        // 4) Swap in new targets, then destroy the old swapchain (views, handle)
        // 5) Recreate framebuffers + command buffers against the new views
        let logger = self.logger().clone();
        logger.debug(format!("Swapchain rebuilding for {size}..."));
        let swapchain = SwapchainState::build(
            &self.device,
            &self.surface,
            size,
            Some(&self.swapchain),
            logger.clone(),
        )?;

        let targets_stale = swapchain.format().format != self.targets.format()
            || swapchain.extent() != self.targets.extent();
        let targets = if targets_stale {
            Some(RenderTargets::build(
                &self.device,
                swapchain.format().format,
                swapchain.extent(),
                &self.shaders,
                logger.clone(),
            )?)
        } else {
            None
        };

        self.frames.release_image_resources();
        if let Some(targets) = targets {
            self.targets = targets;
        }
        let retired = std::mem::replace(&mut self.swapchain, swapchain);
        drop(retired);

        self.frames.rebuild(&self.swapchain, &self.targets)?;
        logger.info(format!("Swapchain rebuilt at {}", self.extent()));
        Ok(())
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        let logger = self.logger().clone();
        logger.debug("Renderer shutting down...");
        if let Err(e) = self.device.wait_idle() {
            logger.error(format!("Device did not go idle before teardown: {e}"));
        }
    }
}
