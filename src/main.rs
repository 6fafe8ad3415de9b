// =============================================================================
// BRIDGE RENDERER DEMO
// =============================================================================
//
// Opens a window, connects it to a Vulkan graphics context and clears every
// swapchain frame through a renderer.
//
// FRAME FLOW:
// 1. Resize the swapchain if the window changed or the last frame was out of date
// 2. Swapchain prepares the next frame (wait fence, acquire image)
// 3. Draw callback records a clear through the renderer
// 4. Swapchain submits and presents
//
// =============================================================================

mod shell;

use anyhow::{Context, Result};
use bridge_renderer::{
    Config, GraphicsApi, GraphicsContext, Renderer, Resource as _, Swapchain, Window as _, WindowRef,
};
use shell::Shell;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting bridge renderer demo");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    if config.graphics.api != GraphicsApi::Vulkan {
        log::warn!(
            "The demo shell only hosts Vulkan, ignoring api = {}",
            config.graphics.api
        );
    }

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

fn init_logging(config: &Config) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(config.log_level());
    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Everything that lives on the GPU. Field order is drop order.
struct Gpu {
    swapchain: Swapchain,
    renderer: Arc<Renderer>,
    context: GraphicsContext,
    shell: Shell,
}

struct App {
    config: Config,
    window: Option<Arc<Window>>,
    gpu: Option<Gpu>,
    is_minimized: bool,
    is_fullscreen: bool,
    needs_resize: bool,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        Self {
            config,
            window: None,
            gpu: None,
            is_minimized: false,
            is_fullscreen,
            needs_resize: false,
        }
    }

    fn init_gpu(&self, window: Arc<Window>) -> Result<Gpu> {
        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let mut shell = Shell::new(
            window,
            &self.config.window.title,
            enable_validation,
            self.config.get_present_mode(),
        );

        let context = GraphicsContext::create(WindowRef::Vulkan(&mut shell))
            .context("Failed to create graphics context")?;
        let renderer = context.create_renderer(self.config.renderer_info()?)?;

        let size = shell.size();
        let mut swapchain = context
            .create_swapchain(self.config.swapchain_info().extent(size.width, size.height))
            .context("Failed to create swapchain")?;

        let draw = renderer.clone();
        swapchain.set_draw_callback(move |target| {
            let recorded = draw.begin(&*target).and_then(|frame| draw.end(&frame));
            if let Err(err) = recorded {
                log::error!("Failed to record frame: {}", err);
            }
        });

        log::info!(
            "Swapchain ready: {} frames in flight at {}x{}",
            swapchain.frames_in_flight(),
            swapchain.width(),
            swapchain.height()
        );

        Ok(Gpu {
            swapchain,
            renderer,
            context,
            shell,
        })
    }

    fn render_frame(&mut self) -> bridge_renderer::Result<()> {
        let Some(gpu) = self.gpu.as_mut() else {
            return Ok(());
        };
        if self.is_minimized {
            return Ok(());
        }

        if self.needs_resize || gpu.swapchain.needs_recreate() {
            let size = gpu.shell.size();
            gpu.swapchain.resize(size.width, size.height)?;
            self.needs_resize = false;
        }

        if !gpu.swapchain.present()? {
            log::debug!("Frame skipped");
        }
        Ok(())
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            self.needs_resize = true;
        }
    }

    fn shutdown(&mut self) {
        if let Some(gpu) = self.gpu.take() {
            if let Err(err) = gpu.context.wait_idle() {
                log::error!("Failed to drain the device: {}", err);
            }
            log::debug!(
                "Releasing renderer {} ({} live resources)",
                gpu.renderer.id(),
                gpu.context.resources().registry().live().len()
            );
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match self.init_gpu(window.clone()) {
            Ok(gpu) => self.gpu = Some(gpu),
            Err(e) => {
                log::error!("Failed to initialize graphics: {:#}", e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    self.needs_resize = true;
                }
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render_frame() {
                    log::error!("Render error: {}", e);
                    if e.is_fatal() {
                        self.shutdown();
                        event_loop.exit();
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                self.shutdown();
                                event_loop.exit();
                            }
                            KeyCode::F11 => self.toggle_fullscreen(),
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
        log::info!("Cleanup complete");
    }
}
