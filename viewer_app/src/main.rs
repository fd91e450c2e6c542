//! PMX viewer: loads a model given on the command line and spins it in a
//! window until the user closes it.

use std::process::ExitCode;

use render_engine::assets::pmx;
use render_engine::config::{Config, ViewerConfig};
use render_engine::render::vulkan::{Renderer, RendererConfig, Window};

const CONFIG_PATH: &str = "viewer.toml";

fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = match ViewerConfig::load_from_file(CONFIG_PATH) {
        Ok(config) => config,
        Err(e) => {
            log::debug!("no usable {} ({}), using defaults", CONFIG_PATH, e);
            ViewerConfig::default()
        }
    };

    let model_path = std::env::args()
        .nth(1)
        .or_else(|| config.default_model.clone())
        .ok_or("usage: pmx_viewer <model.pmx>")?;

    let model = pmx::load(&model_path)?;

    let mut window = Window::new(
        &config.window.title,
        config.window.width,
        config.window.height,
    )?;

    let renderer_config = RendererConfig {
        application_name: config.window.title.clone(),
        shader_dir: config.shader_dir.clone().into(),
    };
    let mut renderer = Renderer::new(&mut window, &renderer_config, &model)?;

    while !window.should_close() {
        window.poll_events();
        if window.take_framebuffer_resized() {
            renderer.note_resized();
        }
        renderer.draw_frame(&window)?;
    }

    renderer.wait_idle()?;
    Ok(())
}
