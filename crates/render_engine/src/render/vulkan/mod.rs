//! Vulkan rendering backend
//!
//! Low-level Vulkan wrappers following RAII ownership: every created handle
//! lives in a type whose `Drop` releases it, and the swapchain-dependent
//! handles are grouped into one resource set that is torn down and rebuilt
//! together.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptor_set;
pub mod factory;
pub mod framebuffer;
pub mod pipeline;
pub mod render_pass;
pub mod renderer;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod window;

pub use buffer::{Buffer, IndexBuffer, UniformBuffer, VertexBuffer};
pub use commands::CommandPool;
pub use context::{
    LogicalDevice, PhysicalDeviceInfo, VulkanContext, VulkanError, VulkanInstance, VulkanResult,
};
pub use descriptor_set::{DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder};
pub use framebuffer::{DepthBuffer, Framebuffer};
pub use pipeline::{GraphicsPipeline, PipelineConfig};
pub use render_pass::RenderPass;
pub use renderer::{Renderer, RendererConfig, MAX_BOUND_TEXTURES, MAX_FRAMES_IN_FLIGHT};
pub use shader::ShaderModule;
pub use surface::SurfaceSettings;
pub use swapchain::Swapchain;
pub use sync::{Fence, FrameSync, Semaphore};
pub use texture::Texture;
pub use window::{Window, WindowError};
