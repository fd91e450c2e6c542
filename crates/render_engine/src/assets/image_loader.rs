//! Image loading utilities for texture data
//!
//! Provides PNG, JPEG and BMP loading for use with the texture system.

use std::path::Path;

use crate::assets::AssetError;

/// Loaded image data ready for GPU upload
#[derive(Debug, Clone)]
pub struct ImageData {
    /// Raw RGBA pixel data
    pub data: Vec<u8>,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

impl ImageData {
    /// Load an image from a file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AssetError> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(AssetError::NotFound {
                path: path_ref.to_path_buf(),
            });
        }

        log::debug!("Loading image from: {:?}", path_ref);

        let img = image::open(path_ref)
            .map_err(|e| AssetError::LoadFailed(format!("{:?}: {}", path_ref, e)))?;

        // Convert to RGBA8 format (standard for GPU upload)
        let rgba_img = img.to_rgba8();
        let (width, height) = rgba_img.dimensions();

        log::info!("Loaded image {}x{} from {:?}", width, height, path_ref);

        Ok(Self {
            data: rgba_img.into_raw(),
            width,
            height,
        })
    }

    /// A 1x1 solid-color image, used as the fallback texture
    pub fn solid_color(color: [u8; 4]) -> Self {
        Self {
            data: color.to_vec(),
            width: 1,
            height: 1,
        }
    }

    /// Size of the pixel buffer in bytes
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_color() {
        let img = ImageData::solid_color([255, 255, 255, 255]);
        assert_eq!(img.width, 1);
        assert_eq!(img.height, 1);
        assert_eq!(img.byte_len(), 4);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let result = ImageData::from_file("no/such/texture.png");
        match result {
            Err(AssetError::NotFound { path }) => {
                assert!(path.ends_with("texture.png"));
            }
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }
}
