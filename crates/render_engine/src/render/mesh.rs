//! GPU-facing mesh vertex type and its Vulkan input layout

use ash::vk;
use bytemuck::{Pod, Zeroable};

/// A single vertex as the shaders consume it.
///
/// `color` carries the model normal as a stand-in vertex color and `tex_id`
/// selects a slot in the bound sampler array.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ModelVertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Vertex color (the decoded normal)
    pub color: [f32; 3],
    /// Primary texture coordinates
    pub uv: [f32; 2],
    /// Index into the bound sampler array
    pub tex_id: i32,
}

impl ModelVertex {
    /// Vertex input binding description for the model vertex buffer
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Vertex attribute descriptions matching the shader input locations
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 4] {
        [
            // Position attribute (location = 0)
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            // Color attribute (location = 1)
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 12,
            },
            // Texture coordinate attribute (location = 2)
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: 24,
            },
            // Texture slot attribute (location = 3)
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 3,
                format: vk::Format::R32_SINT,
                offset: 32,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_is_tightly_packed() {
        // 3 + 3 + 2 floats plus one i32
        assert_eq!(std::mem::size_of::<ModelVertex>(), 36);
    }

    #[test]
    fn test_attribute_offsets_match_layout() {
        let attributes = ModelVertex::attribute_descriptions();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[2].offset, 24);
        assert_eq!(attributes[3].offset, 32);
        assert_eq!(
            ModelVertex::binding_description().stride as usize,
            std::mem::size_of::<ModelVertex>()
        );
    }
}
