//! Graphics pipeline construction
//!
//! Builds the two model pipelines (fill and edge) from a stored
//! `PipelineConfig`. The viewport and scissor are baked in at build time,
//! so a pipeline cannot survive a resize: `rebuild` destroys the old
//! handles and builds again from the stored config against the new extent.

use std::path::PathBuf;

use ash::{vk, Device};

use crate::render::mesh::ModelVertex;
use crate::render::vulkan::{ShaderModule, VulkanError, VulkanResult};

/// Everything needed to (re)build one graphics pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path of the SPIR-V vertex shader
    pub vertex_shader: PathBuf,
    /// Path of the SPIR-V fragment shader
    pub fragment_shader: PathBuf,
    /// Face culling direction
    pub cull_mode: vk::CullModeFlags,
}

impl PipelineConfig {
    /// Config for the solid fill pass: back faces culled
    pub fn fill(shader_dir: &std::path::Path) -> Self {
        Self {
            vertex_shader: shader_dir.join("model.vert.spv"),
            fragment_shader: shader_dir.join("model.frag.spv"),
            cull_mode: vk::CullModeFlags::BACK,
        }
    }

    /// Config for the outline pass: front faces culled so only the
    /// edge-shader-expanded back faces remain
    pub fn edge(shader_dir: &std::path::Path) -> Self {
        Self {
            vertex_shader: shader_dir.join("edge.vert.spv"),
            fragment_shader: shader_dir.join("model.frag.spv"),
            cull_mode: vk::CullModeFlags::FRONT,
        }
    }
}

/// Graphics pipeline with its layout, rebuildable from the stored config
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    config: PipelineConfig,
}

impl GraphicsPipeline {
    /// Build a pipeline for the model vertex layout
    pub fn new(
        device: Device,
        render_pass: vk::RenderPass,
        set_layout: vk::DescriptorSetLayout,
        extent: vk::Extent2D,
        config: PipelineConfig,
    ) -> VulkanResult<Self> {
        let (pipeline, layout) =
            Self::build(&device, render_pass, set_layout, extent, &config)?;

        Ok(Self {
            device,
            pipeline,
            layout,
            config,
        })
    }

    /// Destroy the current handles and build again from the stored config.
    ///
    /// Used after swapchain recreation; the caller guarantees the device is
    /// idle with respect to this pipeline.
    pub fn rebuild(
        &mut self,
        render_pass: vk::RenderPass,
        set_layout: vk::DescriptorSetLayout,
        extent: vk::Extent2D,
    ) -> VulkanResult<()> {
        let (pipeline, layout) =
            Self::build(&self.device, render_pass, set_layout, extent, &self.config)?;

        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
        self.pipeline = pipeline;
        self.layout = layout;
        Ok(())
    }

    fn build(
        device: &Device,
        render_pass: vk::RenderPass,
        set_layout: vk::DescriptorSetLayout,
        extent: vk::Extent2D,
        config: &PipelineConfig,
    ) -> VulkanResult<(vk::Pipeline, vk::PipelineLayout)> {
        let vertex_shader = ShaderModule::from_file(device.clone(), &config.vertex_shader)?;
        let fragment_shader = ShaderModule::from_file(device.clone(), &config.fragment_shader)?;

        let entry = std::ffi::CStr::from_bytes_with_nul(b"main\0").unwrap();
        let shader_stages = [
            vertex_shader.stage_info(vk::ShaderStageFlags::VERTEX, entry),
            fragment_shader.stage_info(vk::ShaderStageFlags::FRAGMENT, entry),
        ];

        let binding_descriptions = [ModelVertex::binding_description()];
        let attribute_descriptions = ModelVertex::attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport = vk::Viewport::builder()
            .x(0.0)
            .y(0.0)
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0)
            .build();

        let scissor = vk::Rect2D::builder()
            .offset(vk::Offset2D { x: 0, y: 0 })
            .extent(extent)
            .build();

        let viewports = [viewport];
        let scissors = [scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(config.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        // Opaque overwrite; the material format carries alpha but this
        // renderer intentionally configures no blending
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();

        let color_blend_attachments = [color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info.build()],
                None,
            )
        };

        match pipelines {
            Ok(pipelines) => Ok((pipelines[0], layout)),
            Err((_, err)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                Err(VulkanError::Api(err))
            }
        }
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Get layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// The stored build configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_fill_and_edge_share_fragment_shader() {
        let fill = PipelineConfig::fill(Path::new("shaders"));
        let edge = PipelineConfig::edge(Path::new("shaders"));

        assert_eq!(fill.fragment_shader, edge.fragment_shader);
        assert_ne!(fill.vertex_shader, edge.vertex_shader);
        assert_eq!(fill.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(edge.cull_mode, vk::CullModeFlags::FRONT);
    }
}
