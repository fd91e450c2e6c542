//! Asset loading: PMX models and texture images

pub mod image_loader;
pub mod pmx;

pub use image_loader::ImageData;
pub use pmx::{PmxError, PmxModel};

use std::path::PathBuf;

/// Asset loading errors
#[derive(thiserror::Error, Debug)]
pub enum AssetError {
    /// The asset file does not exist or could not be opened
    #[error("Asset not found: {path:?}")]
    NotFound {
        /// Path of the missing asset
        path: PathBuf,
    },

    /// The asset file exists but could not be decoded
    #[error("Failed to load asset: {0}")]
    LoadFailed(String),
}
