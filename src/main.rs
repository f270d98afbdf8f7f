// =============================================================================
// VULKAN WRAPPER - textured, lit cubes through a thin Vulkan layer
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (window, keyboard, mouse)                     │
// │    └── App (input state, camera, fullscreen, FPS title)         │
// │          └── Renderer                                           │
// │                ├── VulkanDevice (instance, surface, allocator)  │
// │                ├── Swapchain + tracked targets                  │
// │                │     depth -> render pass -> framebuffers ->    │
// │                │     pipeline (replayed on resize / reload)     │
// │                └── Buffers, texture, descriptors, sync          │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

mod backend;
mod camera;
mod config;
mod error;
mod hot_reload;
mod input;
mod mesh;
mod renderer;

use anyhow::Result;
use config::Config;
use input::InputState;
use renderer::Renderer;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

const CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    init_logging();
    let config = Config::load(CONFIG_PATH);
    apply_log_level(&config);

    log::info!("Starting Vulkan wrapper");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Started before the config is read so its warnings are visible. The
/// logger lets everything through; `apply_log_level` narrows it afterwards.
fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Trace)
        .parse_default_env()
        .init();
    log::set_max_level(log::LevelFilter::Info);
}

/// RUST_LOG wins over the configured level
fn apply_log_level(config: &Config) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    log::set_max_level(config.log_level());
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer goes before the window it
/// presents to.
pub struct App {
    config: Config,
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,

    input: InputState,
    quit_key: KeyCode,
    fullscreen_key: KeyCode,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    pub fn new(config: Config) -> Self {
        let quit_key = key_binding(&config.controls.quit_key, KeyCode::Escape);
        let fullscreen_key = key_binding(&config.controls.fullscreen_key, KeyCode::F11);
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();

        Self {
            config,
            renderer: None,
            window: None,
            is_fullscreen,
            input: InputState::new(),
            quit_key,
            fullscreen_key,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn toggle_fullscreen(&mut self) {
        let Some(window) = &self.window else {
            return;
        };

        self.is_fullscreen = !self.is_fullscreen;
        if self.is_fullscreen {
            window.set_fullscreen(Some(Fullscreen::Borderless(None)));
            log::info!("Entered fullscreen mode");
        } else {
            window.set_fullscreen(None);
            log::info!("Exited fullscreen mode");
        }

        if let Some(renderer) = &mut self.renderer {
            renderer.request_recreate();
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        match shortcut(&self.input, self.quit_key, self.fullscreen_key) {
            Some(Shortcut::Quit) => {
                log::info!("{:?} pressed, exiting...", self.quit_key);
                self.input.end_frame();
                event_loop.exit();
                return;
            }
            Some(Shortcut::ToggleFullscreen) => self.toggle_fullscreen(),
            None => {}
        }

        let Some(renderer) = &mut self.renderer else {
            self.input.end_frame();
            return;
        };

        renderer.camera.update(&self.input, dt);
        self.input.end_frame();

        match renderer.render_frame() {
            Ok(true) => self.update_fps(dt),
            Ok(false) => {}
            Err(e) => log::error!("Render error: {:?}", e),
        }
    }

    fn update_fps(&mut self, frame_time: f32) {
        if !self.config.debug.show_fps {
            return;
        }

        self.frame_count += 1;
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed < 1.0 {
            return;
        }

        let fps = self.frame_count as f32 / elapsed;
        if let Some(window) = &self.window {
            let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
            window.set_title(&format!(
                "{} - {:.0} FPS ({:.2}ms) [{}]",
                self.config.window.title,
                fps,
                frame_time * 1000.0,
                mode
            ));
        }

        self.frame_count = 0;
        self.last_fps_update = now;
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Shortcut {
    Quit,
    ToggleFullscreen,
}

/// Window shortcuts pressed since the last frame; quitting wins.
fn shortcut(input: &InputState, quit_key: KeyCode, fullscreen_key: KeyCode) -> Option<Shortcut> {
    if input.was_pressed(quit_key) {
        Some(Shortcut::Quit)
    } else if input.was_pressed(fullscreen_key) {
        Some(Shortcut::ToggleFullscreen)
    } else {
        None
    }
}

fn key_binding(name: &str, fallback: KeyCode) -> KeyCode {
    input::parse_key(name).unwrap_or_else(|| {
        log::warn!("Unknown key '{}', using {:?}", name, fallback);
        fallback
    })
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_resizable(self.config.window.resizable)
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

        match Renderer::new(&window, &self.config) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:?}", e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
        self.last_frame_time = Instant::now();
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(renderer) = &self.renderer {
                    if let Err(e) = renderer.wait_idle() {
                        log::warn!("{:#}", e);
                    }
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = &mut self.renderer {
                    renderer.resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    self.input.key_event(key, event.state, event.repeat);
                }
            }

            WindowEvent::MouseInput { state, button, .. } => self.input.mouse_button(button, state),
            WindowEvent::CursorMoved { position, .. } => self.input.cursor_moved(position.x, position.y),
            WindowEvent::CursorLeft { .. } => self.input.cursor_left(),
            WindowEvent::MouseWheel { delta, .. } => self.input.scrolled(delta),
            WindowEvent::Focused(false) => self.input.clear(),

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::event::ElementState;

    #[test]
    fn shortcuts_fire_on_the_press_edge() {
        let mut input = InputState::new();
        assert_eq!(shortcut(&input, KeyCode::Escape, KeyCode::F11), None);

        input.key_event(KeyCode::F11, ElementState::Pressed, false);
        assert_eq!(
            shortcut(&input, KeyCode::Escape, KeyCode::F11),
            Some(Shortcut::ToggleFullscreen)
        );

        // Held across frames: no second toggle
        input.end_frame();
        assert_eq!(shortcut(&input, KeyCode::Escape, KeyCode::F11), None);
    }

    #[test]
    fn quit_wins_over_fullscreen() {
        let mut input = InputState::new();
        input.key_event(KeyCode::F11, ElementState::Pressed, false);
        input.key_event(KeyCode::KeyQ, ElementState::Pressed, false);
        assert_eq!(shortcut(&input, KeyCode::KeyQ, KeyCode::F11), Some(Shortcut::Quit));
    }
}
