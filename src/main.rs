// =============================================================================
// KILN - Render-graph driven Vulkan frame loop
// =============================================================================
//
// FRAME FLOW:
// 1. Recreate the swapchain if the window changed
// 2. Acquire swapchain image
// 3. Update the render graph against that image
// 4. Record, submit and wait on each batch, then present
// 5. Apply hot reloads whose frame has completed
//
// =============================================================================

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

use kiln::backend::{Device, GraphicsContext, Shader, Swapchain};
use kiln::config::Config;
use kiln::graph::BuiltinRuntime;
use kiln::render::{clear_program, Renderer};
use kiln::resource::ResourceManager;
use kiln::RenderError;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting kiln");
    log::info!(
        "Window: {}x{}, {} frame(s) in flight",
        config.window.width,
        config.window.height,
        config.graphics.frames_in_flight
    );

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app).context("Event loop failed")?;
    Ok(())
}

/// RUST_LOG overrides the configured level.
fn init_logging(config: &Config) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(config.log_level());
    builder.parse_default_env();
    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: everything created from the device goes
/// before it, and the context goes last.
struct App {
    config: Config,

    resources: Option<ResourceManager<Shader>>,
    renderer: Option<Renderer>,
    device: Option<Arc<Device>>,
    context: Option<GraphicsContext>,
    window: Option<Arc<Window>>,

    /// Set when the window is resized, the swapchain went out of date or a
    /// frame was lost
    needs_resize: bool,
    /// Window has zero area; nothing to render into
    is_minimized: bool,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            resources: None,
            renderer: None,
            device: None,
            context: None,
            window: None,
            needs_resize: false,
            is_minimized: false,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_vulkan(&mut self, window: &Arc<Window>) -> Result<()> {
        let context = GraphicsContext::new(
            &**window,
            &self.config.window.title,
            self.config.debug.validation_layers,
        )
        .context("Failed to create graphics context")?;

        let runtime = BuiltinRuntime::new(clear_program(self.config.graphics.clear_color));
        let selector = self.config.device_selector();
        let device = Device::find_device_with(&context, &runtime, selector.as_ref())
            .context("Failed to create device")?;
        log::info!("Using GPU: {}", device.name());

        let swapchain = Swapchain::new(&context, device.clone(), &**window, None)
            .context("Failed to create swapchain")?;
        let renderer = Renderer::new(device.clone(), swapchain, self.config.graphics.frames_in_flight)
            .context("Failed to create renderer")?;

        if self.config.assets.hot_reload {
            self.resources = self.load_shaders(&device);
        }

        self.renderer = Some(renderer);
        self.device = Some(device);
        self.context = Some(context);
        Ok(())
    }

    /// Load every `*.<stage>.spv` directly under the asset directory and watch
    /// it. A missing directory only disables hot reload.
    fn load_shaders(&self, device: &Arc<Device>) -> Option<ResourceManager<Shader>> {
        let directory = &self.config.assets.directory;
        let mut manager = match ResourceManager::watch(directory) {
            Ok(manager) => manager,
            Err(e) => {
                log::warn!("Hot reload disabled for {:?}: {}", directory, e);
                return None;
            }
        };

        let entries = match std::fs::read_dir(manager.root()) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Could not list {:?}: {}", directory, e);
                return Some(manager);
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(shader) = Shader::for_path(device.clone(), Path::new(&name)) else {
                continue;
            };
            if let Err(e) = manager.load(&name, shader) {
                log::error!("Failed to load shader {:?}: {}", name, e);
            }
        }
        log::info!("Loaded {} shader(s)", manager.len());
        Some(manager)
    }

    // =========================================================================
    // RENDERING
    // =========================================================================

    /// Returns Ok(false) when the frame was skipped.
    fn render_frame(&mut self) -> Result<bool, RenderError> {
        if self.is_minimized {
            return Ok(false);
        }
        let (Some(renderer), Some(context), Some(window)) =
            (self.renderer.as_mut(), self.context.as_ref(), self.window.as_ref())
        else {
            return Ok(false);
        };

        if self.needs_resize || renderer.needs_recreation() {
            renderer.recreate_swapchain(context, &**window)?;
            self.needs_resize = false;
        }

        renderer.acquire_next_image()?;
        renderer.update()?;
        renderer.render()?;

        if let Some(resources) = self.resources.as_mut() {
            resources.poll(renderer.last_submitted_frame());
            resources.reload_ready(renderer.completed_frame());
        }
        Ok(true)
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

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_vulkan(&window) {
            log::error!("Failed to initialize Vulkan: {:?}", e);
            event_loop.exit();
            return;
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

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(_) => {}
                Err(e) if e.is_out_of_date() => {
                    log::debug!("Swapchain out of date, recreating");
                    self.needs_resize = true;
                }
                Err(e) => log::error!("Render error: {}", e),
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        if let Some(ref device) = self.device {
            let _ = device.wait_idle();
        }

        // Reverse order of creation
        self.resources = None;
        self.renderer = None;
        self.device = None;
        self.context = None;
    }
}
