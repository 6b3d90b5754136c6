// SPDX-License-Identifier: CEPL-1.0
//! Per-image framebuffers and pre-recorded command buffers, plus the
//! per-slot synchronization objects of the frames-in-flight protocol.
use std::sync::Arc;

use ash::vk;
use quint_core::Logger;
use quint_render::RenderError;

use crate::device::LogicalDevice;
use crate::pipeline::RenderTargets;
use crate::swapchain::SwapchainState;
use crate::vk_error;

/// Sync objects for one frame slot. The fence is created signaled so the
/// first wait on every slot returns immediately.
#[derive(Clone, Copy, Debug)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

fn clear_value(rgba: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32: rgba },
    }
}

pub struct FrameResources {
    device: ash::Device,
    pool: vk::CommandPool,
    framebuffers: Vec<vk::Framebuffer>,
    command_buffers: Vec<vk::CommandBuffer>,
    slots: Vec<FrameSlot>,
    clear_color: [f32; 4],
    logger: Arc<Logger>,
}

impl FrameResources {
    pub fn new(
        device: &LogicalDevice,
        frames_in_flight: usize,
        logger: Arc<Logger>,
    ) -> Result<Self, RenderError> {
        let raw = device.raw();
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: device.choice().graphics_family,
            ..Default::default()
        };
        let pool = unsafe { raw.create_command_pool(&pool_info, None) }
            .map_err(vk_error("vkCreateCommandPool"))?;

        let mut frames = Self {
            device: raw.clone(),
            pool,
            framebuffers: Vec::new(),
            command_buffers: Vec::new(),
            slots: Vec::new(),
            clear_color: quint_render::DEFAULT_CLEAR_COLOR,
            logger,
        };

        let semaphore_info = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        let fence_info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        for _ in 0..frames_in_flight.max(1) {
            // A slot joins `slots` only when complete; partial ones are undone here.
            let image_available = unsafe { raw.create_semaphore(&semaphore_info, None) }
                .map_err(vk_error("vkCreateSemaphore"))?;
            let render_finished = match unsafe { raw.create_semaphore(&semaphore_info, None) } {
                Ok(s) => s,
                Err(e) => {
                    unsafe { raw.destroy_semaphore(image_available, None) };
                    return Err(vk_error("vkCreateSemaphore")(e));
                }
            };
            let in_flight = match unsafe { raw.create_fence(&fence_info, None) } {
                Ok(f) => f,
                Err(e) => {
                    unsafe {
                        raw.destroy_semaphore(image_available, None);
                        raw.destroy_semaphore(render_finished, None);
                    }
                    return Err(vk_error("vkCreateFence")(e));
                }
            };
            frames.slots.push(FrameSlot {
                image_available,
                render_finished,
                in_flight,
            });
        }

        frames
            .logger
            .debug(format!("{} frame slot(s) created", frames.slots.len()));
        Ok(frames)
    }

    /// Recreates the framebuffers and command buffers against the current
    /// swapchain views and render targets, then records them.
    pub fn rebuild(
        &mut self,
        swapchain: &SwapchainState,
        targets: &RenderTargets,
    ) -> Result<(), RenderError> {
        self.release_image_resources();

        let extent = swapchain.extent();
        for &view in swapchain.image_views() {
            let attachments = [view];
            let info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: targets.render_pass(),
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            let framebuffer = unsafe { self.device.create_framebuffer(&info, None) }
                .map_err(vk_error("vkCreateFramebuffer"))?;
            self.framebuffers.push(framebuffer);
        }

        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: self.framebuffers.len() as u32,
            ..Default::default()
        };
        self.command_buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(vk_error("vkAllocateCommandBuffers"))?;

        self.record(targets)?;
        self.logger.debug(format!(
            "{} framebuffer(s) and command buffer(s) recorded",
            self.framebuffers.len()
        ));
        Ok(())
    }

    /// Changes the clear color and re-records every command buffer. The
    /// device must be idle.
    pub fn set_clear_color(
        &mut self,
        rgba: [f32; 4],
        targets: &RenderTargets,
    ) -> Result<(), RenderError> {
        self.clear_color = rgba;
        unsafe {
            self.device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
        }
        .map_err(vk_error("vkResetCommandPool"))?;
        self.record(targets)
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    fn record(&self, targets: &RenderTargets) -> Result<(), RenderError> {
        let clear_values = [clear_value(self.clear_color)];
        for (&cmd, &framebuffer) in self.command_buffers.iter().zip(&self.framebuffers) {
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::SIMULTANEOUS_USE,
                ..Default::default()
            };
            let pass_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: targets.render_pass(),
                framebuffer,
                render_area: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: targets.extent(),
                },
                clear_value_count: clear_values.len() as u32,
                p_clear_values: clear_values.as_ptr(),
                ..Default::default()
            };

            // SAFETY: the buffer is not pending; the device is idle whenever
            // recording happens.
            unsafe {
                self.device
                    .begin_command_buffer(cmd, &begin)
                    .map_err(vk_error("vkBeginCommandBuffer"))?;
                self.device
                    .cmd_begin_render_pass(cmd, &pass_begin, vk::SubpassContents::INLINE);
                self.device.cmd_bind_pipeline(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    targets.pipeline(),
                );
                self.device.cmd_draw(cmd, 3, 1, 0, 0);
                self.device.cmd_end_render_pass(cmd);
                self.device
                    .end_command_buffer(cmd)
                    .map_err(vk_error("vkEndCommandBuffer"))?;
            }
        }
        Ok(())
    }

    /// Drops everything tied to the swapchain images. Sync slots survive.
    pub fn release_image_resources(&mut self) {
        unsafe {
            if !self.command_buffers.is_empty() {
                self.device
                    .free_command_buffers(self.pool, &self.command_buffers);
            }
            for &framebuffer in &self.framebuffers {
                self.device.destroy_framebuffer(framebuffer, None);
            }
        }
        self.command_buffers.clear();
        self.framebuffers.clear();
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Result<&FrameSlot, RenderError> {
        self.slots.get(index).ok_or_else(|| {
            RenderError::device("frame slot lookup", format!("slot {index} out of range"))
        })
    }

    pub fn command_buffer(&self, image: u32) -> Result<vk::CommandBuffer, RenderError> {
        self.command_buffers
            .get(image as usize)
            .copied()
            .ok_or_else(|| {
                RenderError::device(
                    "command buffer lookup",
                    format!("no command buffer for swapchain image {image}"),
                )
            })
    }

    pub fn wait(&self, index: usize) -> Result<(), RenderError> {
        let fence = self.slot(index)?.in_flight;
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
            .map_err(vk_error("vkWaitForFences"))
    }

    pub fn reset(&self, index: usize) -> Result<(), RenderError> {
        let fence = self.slot(index)?.in_flight;
        unsafe { self.device.reset_fences(&[fence]) }.map_err(vk_error("vkResetFences"))
    }
}

impl Drop for FrameResources {
    fn drop(&mut self) {
        self.logger.debug("Frame resources destroying...");
        self.release_image_resources();
        // SAFETY: the device is idle, so no fence or semaphore is pending.
        unsafe {
            for slot in &self.slots {
                self.device.destroy_fence(slot.in_flight, None);
                self.device.destroy_semaphore(slot.render_finished, None);
                self.device.destroy_semaphore(slot.image_available, None);
            }
            self.device.destroy_command_pool(self.pool, None);
        }
        self.logger.debug("Frame resources destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_value_carries_float_rgba() {
        let value = clear_value([0.1, 0.2, 0.3, 1.0]);
        let rgba = unsafe { value.color.float32 };
        assert_eq!(rgba, [0.1, 0.2, 0.3, 1.0]);
    }
}
