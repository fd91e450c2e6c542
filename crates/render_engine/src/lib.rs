//! # Render Engine
//!
//! A minimal Vulkan renderer for PMX humanoid models.
//!
//! The crate decodes a PMX 2.0 model file, uploads its geometry and textures
//! to a Vulkan device, and draws it every frame with a two-pass
//! outline-and-fill technique while tolerating window resizes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_engine::assets::pmx;
//! use render_engine::render::vulkan::{Renderer, RendererConfig, Window};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     render_engine::foundation::logging::init();
//!
//!     let model = pmx::load("model.pmx")?;
//!     let mut window = Window::new("pmx viewer", 800, 600)?;
//!     let mut renderer = Renderer::new(&mut window, &RendererConfig::default(), &model)?;
//!
//!     while !window.should_close() {
//!         window.poll_events();
//!         if window.take_framebuffer_resized() {
//!             renderer.note_resized();
//!         }
//!         renderer.draw_frame(&window)?;
//!     }
//!     renderer.wait_idle()?;
//!     Ok(())
//! }
//! ```

pub mod assets;
pub mod config;
pub mod foundation;
pub mod render;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        assets::pmx::{self, PmxError, PmxModel},
        config::{Config, ViewerConfig},
        render::mesh::ModelVertex,
        render::vulkan::{Renderer, RendererConfig, VulkanError, Window},
    };
}
