// Frame driver
//
// Ties the window, the shared graphics context, the swapchain and the
// triangle pipeline together and runs one Begin -> Apply -> End per redraw.

use anyhow::{Context, Result};
use std::sync::Arc;
use winit::window::Window;

use crate::backend::{GraphicsContext, Pipeline, PipelineDesc, ShaderModule, ShaderStage, Swapchain};
use crate::config::ShaderConfig;

/// Field order is drop order: the pipeline goes before the render pass it
/// was built against, the swapchain before the window its surface targets.
pub struct Renderer {
    pipeline: Pipeline,
    swapchain: Swapchain,
    context: Arc<GraphicsContext>,
    window: Arc<Window>,
}

impl Renderer {
    pub fn new(context: Arc<GraphicsContext>, window: Arc<Window>, shaders: &ShaderConfig) -> Result<Self> {
        let size = window.inner_size();
        let swapchain = Swapchain::new(context.clone(), window.as_ref(), (size.width, size.height))
            .context("Failed to create swapchain")?;

        // Modules are only needed while the pipeline is built
        let vertex = ShaderModule::load(context.clone(), &shaders.vertex, ShaderStage::Vertex)?;
        let fragment = ShaderModule::load(context.clone(), &shaders.fragment, ShaderStage::Fragment)?;

        let pipeline = Pipeline::new(
            context.clone(),
            &PipelineDesc {
                fragment: &fragment,
                vertex: &vertex,
                render_pass: swapchain.render_pass,
                extent: swapchain.extent,
            },
        )
        .context("Failed to create graphics pipeline")?;

        log::info!(
            "Renderer ready: {} swapchain images, {:?}, {:?}, validation {}",
            swapchain.image_count(),
            swapchain.format.format,
            swapchain.present_mode,
            if context.validation_enabled() { "on" } else { "off" }
        );

        Ok(Self {
            pipeline,
            swapchain,
            context,
            window,
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Render one frame. Returns once the GPU is idle again.
    pub fn update(&mut self) -> Result<()> {
        self.swapchain.begin()?;
        self.swapchain.apply(&self.pipeline)?;
        self.swapchain.end()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let cycle = self.swapchain.cycle();
        log::info!(
            "Shutting down renderer after {} frames (fence pre-signaled {}x, last phase {:?}, fence {:?})",
            cycle.frames_submitted(),
            cycle.pre_signals(),
            cycle.phase(),
            cycle.fence()
        );
        if let Err(e) = self.context.wait_idle() {
            log::error!("Device wait before teardown failed: {:#}", e);
        }
    }
}
