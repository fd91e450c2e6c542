//! Vulkan texture management
//!
//! Uploads decoded RGBA8 pixel buffers through a staging buffer into a
//! sampled device-local image, handling the layout transitions on a
//! single-time command buffer.

use ash::{vk, Device};

use crate::assets::ImageData;
use crate::render::vulkan::{factory, Buffer, CommandPool, VulkanContext, VulkanError, VulkanResult};

/// Sampled 2D texture: image, view, sampler and memory with RAII cleanup
pub struct Texture {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    image_view: vk::ImageView,
    sampler: vk::Sampler,
}

impl Texture {
    /// Upload an RGBA8 image as a sampled texture
    pub fn from_image(
        context: &VulkanContext,
        command_pool: &CommandPool,
        image_data: &ImageData,
    ) -> VulkanResult<Self> {
        let device = context.raw_device();
        let format = vk::Format::R8G8B8A8_SRGB;

        // Staging buffer filled with the pixel data
        let staging = Buffer::new(
            device.clone(),
            context.instance(),
            context.physical_device().device,
            image_data.byte_len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.write_data(&image_data.data)?;

        let (image, memory) = factory::create_image(
            &device,
            context.instance(),
            context.physical_device().device,
            image_data.width,
            image_data.height,
            1,
            format,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let upload = (|| -> VulkanResult<(vk::ImageView, vk::Sampler)> {
            transition_image_layout(
                &device,
                command_pool,
                context.graphics_queue(),
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;
            copy_buffer_to_image(
                &device,
                command_pool,
                context.graphics_queue(),
                staging.handle(),
                image,
                image_data.width,
                image_data.height,
            )?;
            transition_image_layout(
                &device,
                command_pool,
                context.graphics_queue(),
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )?;

            let image_view = factory::create_image_view(
                &device,
                image,
                format,
                vk::ImageAspectFlags::COLOR,
                1,
            )?;

            let sampler_info = vk::SamplerCreateInfo::builder()
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .address_mode_u(vk::SamplerAddressMode::REPEAT)
                .address_mode_v(vk::SamplerAddressMode::REPEAT)
                .address_mode_w(vk::SamplerAddressMode::REPEAT)
                .anisotropy_enable(true)
                .max_anisotropy(
                    context
                        .physical_device()
                        .properties
                        .limits
                        .max_sampler_anisotropy,
                )
                .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
                .unnormalized_coordinates(false)
                .compare_enable(false)
                .compare_op(vk::CompareOp::ALWAYS)
                .mipmap_mode(vk::SamplerMipmapMode::LINEAR);

            let sampler = match unsafe { device.create_sampler(&sampler_info, None) } {
                Ok(sampler) => sampler,
                Err(e) => {
                    unsafe { device.destroy_image_view(image_view, None) };
                    return Err(VulkanError::Api(e));
                }
            };

            Ok((image_view, sampler))
        })();

        match upload {
            Ok((image_view, sampler)) => Ok(Self {
                device,
                image,
                memory,
                image_view,
                sampler,
            }),
            Err(e) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                Err(e)
            }
        }
    }

    /// A 1x1 white texture backing unused sampler slots
    pub fn fallback_white(
        context: &VulkanContext,
        command_pool: &CommandPool,
    ) -> VulkanResult<Self> {
        Self::from_image(
            context,
            command_pool,
            &ImageData::solid_color([255, 255, 255, 255]),
        )
    }

    /// Get the image view handle
    pub fn image_view(&self) -> vk::ImageView {
        self.image_view
    }

    /// Get the sampler handle
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Descriptor info for binding this texture
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.image_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_image_view(self.image_view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

fn transition_image_layout(
    device: &Device,
    command_pool: &CommandPool,
    queue: vk::Queue,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> VulkanResult<()> {
    let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        _ => {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Unsupported layout transition {:?} -> {:?}",
                    old_layout, new_layout
                ),
            })
        }
    };

    let command_buffer = command_pool.begin_single_time()?;

    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }

    command_pool.end_single_time(command_buffer, queue)
}

fn copy_buffer_to_image(
    device: &Device,
    command_pool: &CommandPool,
    queue: vk::Queue,
    buffer: vk::Buffer,
    image: vk::Image,
    width: u32,
    height: u32,
) -> VulkanResult<()> {
    let command_buffer = command_pool.begin_single_time()?;

    let region = vk::BufferImageCopy::builder()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        })
        .build();

    unsafe {
        device.cmd_copy_buffer_to_image(
            command_buffer,
            buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    }

    command_pool.end_single_time(command_buffer, queue)
}
