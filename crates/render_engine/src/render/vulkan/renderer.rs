//! Frame orchestration
//!
//! Owns the per-frame synchronization objects, the model's GPU buffers and
//! textures, and the swapchain-dependent resource set. Drives the
//! per-tick acquire/record/submit/present sequence and rebuilds the whole
//! resource set when the surface goes stale.

use std::path::{Path, PathBuf};

use ash::vk;
use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix4, Perspective3, Point3, Rotation3, Vector3};

use crate::assets::{AssetError, ImageData, PmxModel};
use crate::foundation::Timer;
use crate::render::vulkan::{
    descriptor_set, sync::AcquireOutcome, sync::FrameSchedule, sync::TickAction, CommandPool,
    DepthBuffer, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, Framebuffer,
    FrameSync, GraphicsPipeline, IndexBuffer, PipelineConfig, RenderPass, Swapchain, Texture,
    UniformBuffer, VertexBuffer, VulkanContext, VulkanError, VulkanResult, Window,
};

/// Number of frame slots that may have GPU work outstanding at once
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Fixed size of the sampler array bound to the fragment stage
pub const MAX_BOUND_TEXTURES: usize = 8;

/// Model spin rate in radians per second
const ROTATION_RATE: f32 = 0.5;

/// Renderer construction parameters
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Application name reported to the Vulkan instance
    pub application_name: String,
    /// Directory holding the compiled SPIR-V shaders
    pub shader_dir: PathBuf,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "pmx viewer".to_string(),
            shader_dir: PathBuf::from("target/shaders"),
        }
    }
}

/// Per-frame transform block, laid out as the shaders expect
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct TransformBlock {
    model: [[f32; 4]; 4],
    view: [[f32; 4]; 4],
    proj: [[f32; 4]; 4],
    inverse_model: [[f32; 4]; 4],
}

/// Everything whose lifetime is tied to one swapchain generation.
///
/// Constructed as a unit and replaced as a unit; a resize never recreates
/// only part of it. Members are individually RAII, so a failure partway
/// through construction releases whatever was already created.
struct SwapchainResources {
    swapchain: Swapchain,
    depth: DepthBuffer,
    render_pass: RenderPass,
    framebuffers: Vec<Framebuffer>,
    // Uniform buffers are sized per swapchain image, not per frame slot,
    // so a host write can never alias a buffer a previous submission
    // still reads.
    uniform_buffers: Vec<UniformBuffer<TransformBlock>>,
    descriptor_pool: DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,
    fill_pipeline: GraphicsPipeline,
    edge_pipeline: GraphicsPipeline,
}

impl SwapchainResources {
    fn new(
        context: &VulkanContext,
        set_layout: &DescriptorSetLayout,
        image_infos: &[vk::DescriptorImageInfo],
        shader_dir: &Path,
        window_extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let swapchain = Swapchain::new(context, window_extent, vk::SwapchainKHR::null())?;
        let (depth, render_pass, framebuffers, uniform_buffers, descriptor_pool, descriptor_sets) =
            Self::build_dependents(context, set_layout, image_infos, &swapchain)?;

        let device = context.raw_device();
        let fill_pipeline = GraphicsPipeline::new(
            device.clone(),
            render_pass.handle(),
            set_layout.handle(),
            swapchain.extent(),
            PipelineConfig::fill(shader_dir),
        )?;
        let edge_pipeline = GraphicsPipeline::new(
            device,
            render_pass.handle(),
            set_layout.handle(),
            swapchain.extent(),
            PipelineConfig::edge(shader_dir),
        )?;

        Ok(Self {
            swapchain,
            depth,
            render_pass,
            framebuffers,
            uniform_buffers,
            descriptor_pool,
            descriptor_sets,
            fill_pipeline,
            edge_pipeline,
        })
    }

    /// Tear down and recreate every member against the current surface.
    ///
    /// The caller must have waited for the device to go idle. The new
    /// generation is fully built before any old member is dropped; the
    /// pipelines are rebuilt from their stored configs because their
    /// baked-in viewport is stale.
    fn rebuild(
        &mut self,
        context: &VulkanContext,
        set_layout: &DescriptorSetLayout,
        image_infos: &[vk::DescriptorImageInfo],
        window_extent: vk::Extent2D,
    ) -> VulkanResult<()> {
        let swapchain = Swapchain::new(context, window_extent, self.swapchain.handle())?;
        let (depth, render_pass, framebuffers, uniform_buffers, descriptor_pool, descriptor_sets) =
            Self::build_dependents(context, set_layout, image_infos, &swapchain)?;

        self.fill_pipeline
            .rebuild(render_pass.handle(), set_layout.handle(), swapchain.extent())?;
        self.edge_pipeline
            .rebuild(render_pass.handle(), set_layout.handle(), swapchain.extent())?;

        // Replace in dependency order: framebuffers before the render pass
        // and image views they reference, the swapchain itself last.
        self.framebuffers = framebuffers;
        self.depth = depth;
        self.render_pass = render_pass;
        self.descriptor_sets = descriptor_sets;
        self.descriptor_pool = descriptor_pool;
        self.uniform_buffers = uniform_buffers;
        self.swapchain = swapchain;
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn build_dependents(
        context: &VulkanContext,
        set_layout: &DescriptorSetLayout,
        image_infos: &[vk::DescriptorImageInfo],
        swapchain: &Swapchain,
    ) -> VulkanResult<(
        DepthBuffer,
        RenderPass,
        Vec<Framebuffer>,
        Vec<UniformBuffer<TransformBlock>>,
        DescriptorPool,
        Vec<vk::DescriptorSet>,
    )> {
        let device = context.raw_device();
        let physical = context.physical_device().device;

        let depth = DepthBuffer::new(
            device.clone(),
            context.instance(),
            physical,
            swapchain.extent(),
        )?;
        let render_pass = RenderPass::new_forward_pass(
            device.clone(),
            swapchain.format().format,
            depth.format(),
        )?;

        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|&view| {
                Framebuffer::new(
                    device.clone(),
                    render_pass.handle(),
                    &[view, depth.image_view()],
                    swapchain.extent(),
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        let image_count = swapchain.image_count();
        let uniform_buffers = (0..image_count)
            .map(|_| UniformBuffer::new(device.clone(), context.instance(), physical))
            .collect::<VulkanResult<Vec<_>>>()?;

        let descriptor_pool = DescriptorPool::new(
            device.clone(),
            image_count as u32,
            MAX_BOUND_TEXTURES as u32,
        )?;
        let layouts = vec![set_layout.handle(); image_count];
        let descriptor_sets = descriptor_pool.allocate_descriptor_sets(&layouts)?;
        for (&set, uniform_buffer) in descriptor_sets.iter().zip(&uniform_buffers) {
            descriptor_set::write_model_descriptor_set(
                &device,
                set,
                uniform_buffer.handle(),
                UniformBuffer::<TransformBlock>::block_size(),
                image_infos,
            );
        }

        Ok((
            depth,
            render_pass,
            framebuffers,
            uniform_buffers,
            descriptor_pool,
            descriptor_sets,
        ))
    }
}

/// The frame orchestrator: one of these drives the whole render loop.
pub struct Renderer {
    // Field order is drop order: swapchain-dependent resources first,
    // the context that owns device and instance last.
    resources: SwapchainResources,
    frames: Vec<FrameSync>,
    schedule: FrameSchedule,
    command_buffers: Vec<vk::CommandBuffer>,
    command_pool: CommandPool,
    vertex_buffer: VertexBuffer,
    index_buffer: IndexBuffer,
    #[allow(dead_code)] // owns the image views referenced by the descriptor sets
    textures: Vec<Texture>,
    #[allow(dead_code)]
    fallback_texture: Texture,
    image_infos: [vk::DescriptorImageInfo; MAX_BOUND_TEXTURES],
    material_ranges: Vec<u32>,
    set_layout: DescriptorSetLayout,
    timer: Timer,
    pending_resize: bool,
    context: VulkanContext,
}

impl Renderer {
    /// Create a renderer for the given window with the model's geometry
    /// and textures uploaded.
    pub fn new(
        window: &mut Window,
        config: &RendererConfig,
        model: &PmxModel,
    ) -> VulkanResult<Self> {
        let context = VulkanContext::new(window, &config.application_name)?;
        let device = context.raw_device();
        let physical = context.physical_device().device;

        let command_pool = CommandPool::new(device.clone(), context.physical_device().graphics_family)?;

        let vertex_buffer =
            VertexBuffer::new(device.clone(), context.instance(), physical, &model.vertices)?;
        let index_buffer =
            IndexBuffer::new(device.clone(), context.instance(), physical, &model.indices)?;

        if model.texture_paths.len() > MAX_BOUND_TEXTURES {
            log::warn!(
                "model references {} textures, binding only the first {}",
                model.texture_paths.len(),
                MAX_BOUND_TEXTURES
            );
        }
        let mut textures = Vec::new();
        for path in model.texture_paths.iter().take(MAX_BOUND_TEXTURES) {
            let image = ImageData::from_file(path).map_err(asset_error)?;
            textures.push(Texture::from_image(&context, &command_pool, &image)?);
        }
        let fallback_texture = Texture::fallback_white(&context, &command_pool)?;

        // Unused sampler slots are backed by the white fallback so every
        // descriptor in the array is valid.
        let mut image_infos = [fallback_texture.descriptor_info(); MAX_BOUND_TEXTURES];
        for (info, texture) in image_infos.iter_mut().zip(&textures) {
            *info = texture.descriptor_info();
        }

        let set_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(
                0,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )
            .add_combined_image_sampler_array(
                1,
                MAX_BOUND_TEXTURES as u32,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .build(&device)?;

        let (width, height) = window.get_framebuffer_size();
        let resources = SwapchainResources::new(
            &context,
            &set_layout,
            &image_infos,
            &config.shader_dir,
            vk::Extent2D { width, height },
        )?;

        let frames = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameSync::new(device.clone()))
            .collect::<VulkanResult<Vec<_>>>()?;
        let schedule = FrameSchedule::new(MAX_FRAMES_IN_FLIGHT, resources.swapchain.image_count());
        let command_buffers = command_pool.allocate_command_buffers(MAX_FRAMES_IN_FLIGHT as u32)?;

        log::info!(
            "Renderer ready: {} vertices, {} material ranges, {} textures",
            model.vertices.len(),
            model.material_ranges.len(),
            textures.len()
        );

        Ok(Self {
            resources,
            frames,
            schedule,
            command_buffers,
            command_pool,
            vertex_buffer,
            index_buffer,
            textures,
            fallback_texture,
            image_infos,
            material_ranges: model.material_ranges.clone(),
            set_layout,
            timer: Timer::new(),
            pending_resize: false,
            context,
        })
    }

    /// Note an externally observed resize; the swapchain is rebuilt after
    /// the next present.
    pub fn note_resized(&mut self) {
        self.pending_resize = true;
    }

    /// Render one frame.
    ///
    /// Surface staleness is handled internally by rebuilding the swapchain
    /// resource set and skipping the tick; every other device error is
    /// returned and fatal.
    pub fn draw_frame(&mut self, window: &Window) -> VulkanResult<()> {
        self.timer.update();
        let slot = self.schedule.current_slot();

        // 1. Bound outstanding work for this slot to one submission
        self.frames[slot].in_flight.wait(u64::MAX)?;

        // 2. Acquire the next presentable image
        let acquire = unsafe {
            self.context.swapchain_loader().acquire_next_image(
                self.resources.swapchain.handle(),
                u64::MAX,
                self.frames[slot].image_available.handle(),
                vk::Fence::null(),
            )
        };
        let outcome = match acquire {
            Ok((image, suboptimal)) => {
                if suboptimal {
                    self.pending_resize = true;
                }
                AcquireOutcome::Acquired(image)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => AcquireOutcome::Stale,
            Err(e) => return Err(VulkanError::Api(e)),
        };

        match self.schedule.plan(outcome) {
            TickAction::RebuildSwapchain => {
                // The fence was never submitted against and stays
                // signaled; the next tick retries this slot.
                log::debug!("surface out of date at acquire, rebuilding swapchain");
                self.rebuild_swapchain(window)
            }
            TickAction::Draw { image, prior_slot } => {
                // 3. The image may still be owned by an earlier slot's
                // submission when there are more images than slots.
                if let Some(prior) = prior_slot {
                    if prior != slot {
                        self.frames[prior].in_flight.wait(u64::MAX)?;
                    }
                }

                // 4. Record the draw commands for this image
                self.record_commands(slot, image as usize)?;

                // 5. Update this image's uniform buffer, then submit
                self.update_uniforms(image as usize)?;
                self.frames[slot].in_flight.reset()?;
                self.submit(slot, image)?;
                self.schedule.mark_submitted(image);

                // 6. Present, rebuilding afterwards when stale or resized
                let needs_rebuild = self.present(slot, image)?;
                if needs_rebuild || self.pending_resize {
                    self.rebuild_swapchain(window)?;
                }

                // 7. Next slot
                self.schedule.advance();
                Ok(())
            }
        }
    }

    /// Wait until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.context.wait_idle()
    }

    fn submit(&self, slot: usize, _image: u32) -> VulkanResult<()> {
        let wait_semaphores = [self.frames[slot].image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffers[slot]];
        let signal_semaphores = [self.frames[slot].render_finished.handle()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.context
                .raw_device()
                .queue_submit(
                    self.context.graphics_queue(),
                    &[submit_info.build()],
                    self.frames[slot].in_flight.handle(),
                )
                .map_err(VulkanError::Api)
        }
    }

    /// Present the image; returns whether the swapchain must be rebuilt
    fn present(&mut self, slot: usize, image: u32) -> VulkanResult<bool> {
        let wait_semaphores = [self.frames[slot].render_finished.handle()];
        let swapchains = [self.resources.swapchain.handle()];
        let image_indices = [image];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.context
                .swapchain_loader()
                .queue_present(self.context.present_queue(), &present_info)
        };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("surface out of date at present");
                Ok(true)
            }
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    fn rebuild_swapchain(&mut self, window: &Window) -> VulkanResult<()> {
        let (width, height) = window.get_framebuffer_size();
        if width == 0 || height == 0 {
            // Minimized: there is nothing to rebuild against yet. Leave
            // the resize pending and try again next tick.
            self.pending_resize = true;
            return Ok(());
        }
        self.pending_resize = false;

        self.context.wait_idle()?;
        self.resources.rebuild(
            &self.context,
            &self.set_layout,
            &self.image_infos,
            vk::Extent2D { width, height },
        )?;
        self.schedule
            .reset_images(self.resources.swapchain.image_count());

        log::info!("swapchain rebuilt at {}x{}", width, height);
        Ok(())
    }

    fn record_commands(&self, slot: usize, image: usize) -> VulkanResult<()> {
        let device = self.context.raw_device();
        let command_buffer = self.command_buffers[slot];
        let extent = self.resources.swapchain.extent();

        // The pool was created with RESET_COMMAND_BUFFER; begin implicitly
        // resets. The step-1 fence wait makes that reset safe.
        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe {
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [1.0, 1.0, 1.0, 1.0],
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(self.resources.render_pass.handle())
            .framebuffer(self.resources.framebuffers[image].handle())
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        let vertex_buffers = [self.vertex_buffer.handle()];
        let offsets = [0u64];
        let descriptor_sets = [self.resources.descriptor_sets[image]];

        unsafe {
            device.cmd_begin_render_pass(
                command_buffer,
                &render_pass_begin,
                vk::SubpassContents::INLINE,
            );

            // Fill pass, then the outline pass over the same ranges
            for pipeline in [&self.resources.fill_pipeline, &self.resources.edge_pipeline] {
                device.cmd_bind_pipeline(
                    command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    pipeline.handle(),
                );
                device.cmd_bind_vertex_buffers(command_buffer, 0, &vertex_buffers, &offsets);
                device.cmd_bind_index_buffer(
                    command_buffer,
                    self.index_buffer.handle(),
                    0,
                    vk::IndexType::UINT32,
                );
                device.cmd_bind_descriptor_sets(
                    command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    pipeline.layout(),
                    0,
                    &descriptor_sets,
                    &[],
                );

                // One indexed draw per material range at its cumulative
                // offset into the shared index buffer
                let mut first_index = 0u32;
                for &triangles in &self.material_ranges {
                    let index_count = triangles * 3;
                    if index_count > 0 {
                        device.cmd_draw_indexed(command_buffer, index_count, 1, first_index, 0, 0);
                    }
                    first_index += index_count;
                }
            }

            device.cmd_end_render_pass(command_buffer);
            device
                .end_command_buffer(command_buffer)
                .map_err(VulkanError::Api)?;
        }

        Ok(())
    }

    fn update_uniforms(&self, image: usize) -> VulkanResult<()> {
        let extent = self.resources.swapchain.extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;

        let model =
            Rotation3::from_axis_angle(&Vector3::y_axis(), self.timer.total_time() * ROTATION_RATE)
                .to_homogeneous();
        let view = Matrix4::look_at_rh(
            &Point3::new(0.0, 14.0, 36.0),
            &Point3::new(0.0, 10.0, 0.0),
            &Vector3::y(),
        );
        let mut proj = Perspective3::new(aspect, std::f32::consts::FRAC_PI_4, 0.1, 200.0)
            .to_homogeneous();
        // Flip Y: Vulkan clip space points down, the projection points up
        proj[(1, 1)] *= -1.0;

        let inverse_model = model.try_inverse().unwrap_or_else(Matrix4::identity);

        let block = TransformBlock {
            model: model.into(),
            view: view.into(),
            proj: proj.into(),
            inverse_model: inverse_model.into(),
        };

        self.resources.uniform_buffers[image].update(&block)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Sync objects and command buffers may still be referenced by
        // in-flight work; drain the device before the fields drop.
        let _ = self.context.wait_idle();
    }
}

fn asset_error(e: AssetError) -> VulkanError {
    match e {
        AssetError::NotFound { path } => VulkanError::AssetNotFound { path },
        AssetError::LoadFailed(message) => VulkanError::InitializationFailed(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_transform_block_layout() {
        // Four column-major mat4s, tightly packed
        assert_eq!(std::mem::size_of::<TransformBlock>(), 4 * 64);
    }

    #[test]
    fn test_projection_y_flip() {
        let mut proj =
            Perspective3::new(4.0 / 3.0, std::f32::consts::FRAC_PI_4, 0.1, 200.0).to_homogeneous();
        let before = proj[(1, 1)];
        proj[(1, 1)] *= -1.0;
        assert!(before > 0.0);
        assert_relative_eq!(proj[(1, 1)], -before);
    }

    #[test]
    fn test_model_rotation_inverts_cleanly() {
        let model = Rotation3::from_axis_angle(&Vector3::y_axis(), 1.3).to_homogeneous();
        let inverse = model.try_inverse().unwrap_or_else(Matrix4::identity);
        let product = model * inverse;
        assert_relative_eq!(product, Matrix4::identity(), epsilon = 1e-5);
    }

    #[test]
    fn test_default_config() {
        let config = RendererConfig::default();
        assert_eq!(config.shader_dir, PathBuf::from("target/shaders"));
    }
}
