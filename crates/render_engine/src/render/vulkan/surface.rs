//! Surface capability negotiation
//!
//! Chooses presentation format, present mode and resolution from the
//! adapter's reported surface capabilities. Negotiation runs on every
//! swapchain creation and recreation; nothing is cached, because the
//! reported capabilities change with display configuration.

use ash::extensions::khr::Surface;
use ash::vk;

use crate::render::vulkan::{VulkanError, VulkanResult};

/// The negotiated presentation parameters for one swapchain generation
#[derive(Debug, Clone, Copy)]
pub struct SurfaceSettings {
    /// Color format and color space of the presentable images
    pub format: vk::SurfaceFormatKHR,
    /// Presentation mode
    pub present_mode: vk::PresentModeKHR,
    /// Pixel extent of the presentable images
    pub extent: vk::Extent2D,
    /// Surface transform to apply at present time
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Image count to request (bounded by the surface's min/max)
    pub image_count: u32,
}

impl SurfaceSettings {
    /// Query the surface afresh and choose format, present mode and extent.
    ///
    /// `requested_extent` is the window's current framebuffer size in
    /// pixels; it only matters when the surface leaves the extent undefined.
    pub fn negotiate(
        surface_loader: &Surface,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        requested_extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let capabilities = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(physical_device, surface)
                .map_err(VulkanError::Api)?
        };
        let formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(physical_device, surface)
                .map_err(VulkanError::Api)?
        };
        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(physical_device, surface)
                .map_err(VulkanError::Api)?
        };

        if formats.is_empty() || present_modes.is_empty() {
            return Err(VulkanError::InitializationFailed(
                "Surface reports no formats or present modes".to_string(),
            ));
        }

        Ok(Self {
            format: choose_surface_format(&formats),
            present_mode: choose_present_mode(&present_modes),
            extent: choose_extent(&capabilities, requested_extent),
            pre_transform: capabilities.current_transform,
            image_count: choose_image_count(&capabilities),
        })
    }
}

/// Prefer 8-bit BGRA sRGB with the sRGB-nonlinear color space; otherwise
/// fall back to the first reported format.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .find(|sf| {
            sf.format == vk::Format::B8G8R8A8_SRGB
                && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .copied()
        .unwrap_or(formats[0])
}

/// Prefer MAILBOX (low-latency triple buffering); FIFO is always available.
fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// A fixed current extent is used verbatim; the undefined sentinel means
/// the requested extent gets clamped into the surface bounds per axis.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: requested.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: requested.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One more than the minimum, capped by the maximum when one is declared
fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && count > capabilities.max_image_count {
        count = capabilities.max_image_count;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(
        current: (u32, u32),
        min: (u32, u32),
        max: (u32, u32),
    ) -> vk::SurfaceCapabilitiesKHR {
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
    fn test_undefined_extent_clamps_per_axis() {
        let caps = capabilities((u32::MAX, u32::MAX), (100, 100), (800, 600));
        let extent = choose_extent(
            &caps,
            vk::Extent2D {
                width: 50,
                height: 900,
            },
        );
        assert_eq!(extent.width, 100);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn test_fixed_extent_used_verbatim() {
        let caps = capabilities((640, 480), (100, 100), (800, 600));
        let extent = choose_extent(
            &caps,
            vk::Extent2D {
                width: 1920,
                height: 1080,
            },
        );
        assert_eq!(extent.width, 640);
        assert_eq!(extent.height, 480);
    }

    #[test]
    fn test_prefers_bgra_srgb() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_falls_back_to_first_format() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::R16G16B16A16_SFLOAT,
                color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            },
        ];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_present_mode_preference() {
        assert_eq!(
            choose_present_mode(&[
                vk::PresentModeKHR::FIFO,
                vk::PresentModeKHR::MAILBOX,
                vk::PresentModeKHR::IMMEDIATE,
            ]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_image_count_respects_declared_maximum() {
        let mut caps = capabilities((640, 480), (100, 100), (800, 600));
        caps.min_image_count = 2;
        caps.max_image_count = 0; // no declared maximum
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
    }
}
