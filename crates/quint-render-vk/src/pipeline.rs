// SPDX-License-Identifier: CEPL-1.0
//! Shader loading, the render pass and the graphics pipeline.
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::util::read_spv;
use ash::vk;
use quint_core::Logger;
use quint_render::RenderError;

use crate::device::LogicalDevice;
use crate::vk_error;

/// SPIR-V compiled from the bundled GLSL at build time.
pub const BUILTIN_VERTEX_SPV: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/triangle.vert.spv"));
pub const BUILTIN_FRAGMENT_SPV: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/triangle.frag.spv"));

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Where the pipeline reads its precompiled shaders from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderPaths {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("assets/shaders/vertex.spv"),
            fragment: PathBuf::from("assets/shaders/fragment.spv"),
        }
    }
}

/// Writes the build-time SPIR-V to `paths`, creating parent directories.
pub fn install_builtin_shaders(paths: &ShaderPaths) -> io::Result<()> {
    for (path, bytes) in [
        (&paths.vertex, BUILTIN_VERTEX_SPV),
        (&paths.fragment, BUILTIN_FRAGMENT_SPV),
    ] {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
    }
    Ok(())
}

/// Reads a SPIR-V binary as 32-bit words.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>, RenderError> {
    let fail = |source: io::Error| RenderError::ShaderLoadFailed {
        path: path.to_path_buf(),
        source,
    };
    let bytes = fs::read(path).map_err(fail)?;
    let words = read_spv(&mut Cursor::new(&bytes)).map_err(fail)?;
    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(fail(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing SPIR-V magic number",
        )));
    }
    Ok(words)
}

fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }
}

/// Orders the attachment write after the presentation engine has released
/// the image (the image-available wait happens at the same stage).
fn external_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    }
}

fn viewport_for(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

fn scissor_for(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Render pass, pipeline layout and pipeline for one swapchain format and
/// extent. Rebuilt whenever either changes.
pub struct RenderTargets {
    device: ash::Device,
    render_pass: vk::RenderPass,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    format: vk::Format,
    extent: vk::Extent2D,
    logger: Arc<Logger>,
}

impl RenderTargets {
    pub fn build(
        device: &LogicalDevice,
        format: vk::Format,
        extent: vk::Extent2D,
        shaders: &ShaderPaths,
        logger: Arc<Logger>,
    ) -> Result<Self, RenderError> {
        // Both binaries are read before any GPU object exists, so a missing
        // file leaves nothing behind.
        let vertex = load_spirv(&shaders.vertex)?;
        let fragment = load_spirv(&shaders.fragment)?;
        logger.debug("Shaders loaded");

        let raw = device.raw();
        let render_pass = create_render_pass(raw, format)?;
        let mut targets = Self {
            device: raw.clone(),
            render_pass,
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            format,
            extent,
            logger,
        };

        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            ..Default::default()
        };
        targets.pipeline_layout = unsafe { raw.create_pipeline_layout(&layout_info, None) }
            .map_err(vk_error("vkCreatePipelineLayout"))?;
        targets.pipeline = create_pipeline(
            raw,
            targets.render_pass,
            targets.pipeline_layout,
            extent,
            &vertex,
            &fragment,
        )?;

        targets.logger.info(format!(
            "Render pass and pipeline created for {format:?} at {}x{}",
            extent.width, extent.height
        ));
        Ok(targets)
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for RenderTargets {
    fn drop(&mut self) {
        self.logger.debug("Pipeline destroying...");
        // SAFETY: the device is idle and the framebuffers built against this
        // render pass are gone. Destroying a null handle is a no-op.
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.destroy_render_pass(self.render_pass, None);
        }
        self.logger.debug("Pipeline destroyed");
    }
}

fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass, RenderError> {
    let attachments = [color_attachment(format)];
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        ..Default::default()
    };
    let dependency = external_dependency();
    let info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    unsafe { device.create_render_pass(&info, None) }.map_err(vk_error("vkCreateRenderPass"))
}

fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule, RenderError> {
    let info = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        code_size: code.len() * 4,
        p_code: code.as_ptr(),
        ..Default::default()
    };
    unsafe { device.create_shader_module(&info, None) }.map_err(vk_error("vkCreateShaderModule"))
}

fn create_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    extent: vk::Extent2D,
    vertex: &[u32],
    fragment: &[u32],
) -> Result<vk::Pipeline, RenderError> {
    let vs = create_shader_module(device, vertex)?;
    let fs = match create_shader_module(device, fragment) {
        Ok(fs) => fs,
        Err(err) => {
            unsafe { device.destroy_shader_module(vs, None) };
            return Err(err);
        }
    };

    let entry = c"main";
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    // Vertices come from gl_VertexIndex; no vertex buffers.
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        primitive_restart_enable: vk::FALSE,
        ..Default::default()
    };
    // Fixed viewport and scissor: the pipeline is rebuilt when the extent changes.
    let viewport = viewport_for(extent);
    let scissor = scissor_for(extent);
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        p_viewports: &viewport,
        scissor_count: 1,
        p_scissors: &scissor,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        depth_clamp_enable: vk::FALSE,
        rasterizer_discard_enable: vk::FALSE,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::CLOCKWISE,
        depth_bias_enable: vk::FALSE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        sample_shading_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        logic_op_enable: vk::FALSE,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_color_blend_state: &color_blend,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    // SAFETY: every state struct referenced above lives until the call returns.
    let result = unsafe {
        device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        )
    };
    // Modules are only needed during pipeline creation.
    unsafe {
        device.destroy_shader_module(vs, None);
        device.destroy_shader_module(fs, None);
    }

    match result {
        Ok(pipelines) => pipelines
            .into_iter()
            .next()
            .ok_or_else(|| RenderError::device("vkCreateGraphicsPipelines", "no pipeline returned")),
        Err((_, err)) => Err(vk_error("vkCreateGraphicsPipelines")(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("quint-shaders-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn default_paths_point_at_assets() {
        let paths = ShaderPaths::default();
        assert_eq!(paths.vertex, Path::new("assets/shaders/vertex.spv"));
        assert_eq!(paths.fragment, Path::new("assets/shaders/fragment.spv"));
    }

    #[test]
    fn loads_well_formed_spirv() {
        let path = scratch("ok.spv");
        fs::write(&path, words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0])).unwrap();
        let words = load_spirv(&path).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn missing_file_names_the_path() {
        let path = scratch("does-not-exist.spv");
        let err = load_spirv(&path).unwrap_err();
        match &err {
            RenderError::ShaderLoadFailed { path: p, source } => {
                assert_eq!(p, &path);
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().contains("does-not-exist.spv"));
    }

    #[test]
    fn truncated_or_foreign_bytes_are_rejected() {
        let odd = scratch("odd.spv");
        fs::write(&odd, [0x03, 0x02, 0x23]).unwrap();
        assert!(matches!(
            load_spirv(&odd),
            Err(RenderError::ShaderLoadFailed { .. })
        ));

        let foreign = scratch("foreign.spv");
        fs::write(&foreign, words_to_bytes(&[0xdead_beef, 0])).unwrap();
        assert!(matches!(
            load_spirv(&foreign),
            Err(RenderError::ShaderLoadFailed { .. })
        ));
    }

    #[test]
    fn installed_builtins_load_back() {
        let root = scratch("install");
        let paths = ShaderPaths {
            vertex: root.join("nested/vertex.spv"),
            fragment: root.join("nested/fragment.spv"),
        };
        install_builtin_shaders(&paths).unwrap();
        assert!(load_spirv(&paths.vertex).unwrap().len() > 5);
        assert!(load_spirv(&paths.fragment).unwrap().len() > 5);
    }

    #[test]
    fn attachment_is_cleared_and_presented() {
        let a = color_attachment(vk::Format::B8G8R8A8_UNORM);
        assert_eq!(a.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(a.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(a.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(a.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(a.samples, vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn dependency_waits_on_color_output() {
        let d = external_dependency();
        assert_eq!(d.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(d.dst_subpass, 0);
        assert_eq!(d.src_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(d.dst_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert!(d
            .dst_access_mask
            .contains(vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
    }

    #[test]
    fn viewport_covers_the_whole_extent() {
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let v = viewport_for(extent);
        assert_eq!((v.x, v.y, v.width, v.height), (0.0, 0.0, 640.0, 480.0));
        assert_eq!((v.min_depth, v.max_depth), (0.0, 1.0));
        assert_eq!(scissor_for(extent).extent, extent);
    }
}
