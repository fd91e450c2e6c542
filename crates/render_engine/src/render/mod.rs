//! Rendering: mesh types and the Vulkan backend

pub mod mesh;
pub mod vulkan;

pub use mesh::ModelVertex;
pub use vulkan::{Renderer, RendererConfig, VulkanError, VulkanResult, Window};
