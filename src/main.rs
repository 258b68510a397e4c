// =============================================================================
// TRIANGLE BOOTSTRAP - Minimal Vulkan frame loop
// =============================================================================
//
// Brings up one Vulkan context, one window, one swapchain and one pipeline,
// then draws a single hardcoded triangle every frame until the window closes.
//
// OWNERSHIP:
// ┌─────────────────────────────────────────────────────────────────┐
// │  InstanceScope (instance, diagnostics, physical + logical device) │
// │    └── Renderer                                                 │
// │          ├── Swapchain (surface, images, views, render pass,     │
// │          │              framebuffers, command buffer, sync)      │
// │          └── Pipeline (borrows the swapchain's render pass)     │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW (one frame in flight, device idle between frames):
// 1. Begin: wait fence, reset it, acquire image, open render pass
// 2. Apply: bind pipeline, set viewport/scissor, draw 3 vertices
// 3. End:   close pass, submit, present, wait for device idle
//
// =============================================================================

mod backend;
mod config;
mod renderer;

use anyhow::{Context, Result};
use backend::InstanceScope;
use config::Config;
use raw_window_handle::HasRawDisplayHandle;
use renderer::Renderer;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowAttributes, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let (config, source) = Config::load();
    init_logging(&config);
    source.log();

    log::info!("Starting triangle bootstrap");
    log::info!(
        "Window: {}x{} \"{}\"",
        config.window.width,
        config.window.height,
        config.window.title
    );

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(err) => Err(err),
        None => {
            log::info!("Clean exit");
            Ok(())
        }
    }
}

/// RUST_LOG wins over the configured level when set
fn init_logging(config: &Config) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(config.log_level());
    builder.parse_default_env();
    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    /// Dropped before `scope` is shut down
    renderer: Option<Renderer>,
    scope: InstanceScope,
    /// First fatal error; returned from main after the loop exits
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            renderer: None,
            scope: InstanceScope::new(),
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            // Out-of-date swapchains are fatal, so never let the user resize
            .with_resizable(false);

        let window: Arc<Window> = Arc::new(
            event_loop
                .create_window(attributes)
                .context("Failed to create window")?,
        );

        let context = self
            .scope
            .initialize(
                &self.config.window.title,
                self.config.debug.validation,
                window.raw_display_handle(),
            )
            .context("Failed to initialize Vulkan")?;

        let renderer = Renderer::new(context, window, &self.config.shaders)?;
        self.renderer = Some(renderer);
        log::info!("Vulkan initialized successfully");
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("{:#}", err);
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.scope.is_initialized() || self.fatal.is_some() {
            return;
        }
        if let Err(err) = self.init(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                if let Err(err) = renderer.update() {
                    self.fail(event_loop, err.context("Frame failed"));
                }
            }

            _ => {}
        }
    }

    /// Keep the loop drawing back to back
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(renderer) = &self.renderer {
            renderer.window().request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Pipeline and swapchain first, then the context they hold
        self.renderer = None;
        if let Some(context) = self.scope.get() {
            log::info!(
                "Releasing graphics context (validation was {})",
                if context.validation_enabled() { "on" } else { "off" }
            );
        }
        self.scope.shutdown();
        log::info!("Cleanup complete");
    }
}
