//! Virtual Try-On - Main Entry Point
//!
//! Opens the window, starts the try-on session and drives redraws from the
//! session's frame pacer.
//!
//! Usage: `virtual-tryon [config.json]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use virtual_tryon::render::Tick;
use virtual_tryon::{App, TryOnConfig};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Fullscreen, Window, WindowAttributes, WindowId};

const WINDOW_TITLE: &str = "Virtual Try-On";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;

/// Application state machine
enum AppState {
    /// Initial state before window is created
    Uninitialized { config: TryOnConfig },
    /// Window and graphics context are ready
    Running { window: Arc<Window>, app: App },
    /// Startup failed or the window was closed
    Exited,
}

/// Main application handler implementing winit's ApplicationHandler trait
struct TryOnApp {
    state: AppState,
}

impl TryOnApp {
    fn new(config: TryOnConfig) -> Self {
        Self {
            state: AppState::Uninitialized { config },
        }
    }

    fn create(event_loop: &ActiveEventLoop, config: TryOnConfig) -> anyhow::Result<(Arc<Window>, App)> {
        let window_attributes = WindowAttributes::default()
            .with_title(WINDOW_TITLE)
            .with_inner_size(LogicalSize::new(DEFAULT_WIDTH, DEFAULT_HEIGHT));

        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .context("Failed to create window")?,
        );

        log::info!(
            "Window created: {}x{}",
            window.inner_size().width,
            window.inner_size().height
        );

        log::info!("Initializing wgpu and egui...");
        let app = pollster::block_on(App::new(window.clone(), config))?;
        Ok((window, app))
    }
}

impl ApplicationHandler for TryOnApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        // Only initialize if we haven't already
        if !matches!(self.state, AppState::Uninitialized { .. }) {
            return;
        }
        let AppState::Uninitialized { config } = std::mem::replace(&mut self.state, AppState::Exited)
        else {
            return;
        };

        match Self::create(event_loop, config) {
            Ok((window, app)) => {
                log::info!("Virtual Try-On ready!");
                log::info!("Press ESC to exit, F11 for fullscreen, arrows or 1-9 to pick a garment");
                window.request_redraw();
                self.state = AppState::Running { window, app };
            }
            Err(e) => {
                log::error!("{:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        // Only handle events if we're running
        let AppState::Running { window, app } = &mut self.state else {
            return;
        };

        // Let egui handle the event first
        let egui_consumed = app.handle_window_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, exiting...");
                app.shutdown();
                event_loop.exit();
            }

            // Keyboard input (only if egui doesn't want it)
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } if !egui_consumed => match key_code {
                KeyCode::Escape => {
                    log::info!("Escape pressed, exiting...");
                    app.shutdown();
                    event_loop.exit();
                }
                KeyCode::F11 => {
                    if window.fullscreen().is_some() {
                        window.set_fullscreen(None);
                        log::info!("Exiting fullscreen");
                    } else {
                        window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                        log::info!("Entering fullscreen");
                    }
                }
                KeyCode::ArrowRight | KeyCode::ArrowDown => app.select_next(),
                KeyCode::ArrowLeft | KeyCode::ArrowUp => app.select_previous(),
                KeyCode::Delete | KeyCode::Backspace => app.deselect(),
                key => {
                    if let Some(index) = digit_index(key) {
                        app.select_garment(index);
                    }
                }
            },

            WindowEvent::Resized(physical_size) => {
                app.resize(physical_size);
                window.request_redraw();
            }

            WindowEvent::RedrawRequested => match app.render() {
                Ok(()) => {}
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    log::warn!("Surface lost, reconfiguring...");
                    app.resize(app.size());
                }
                Err(wgpu::SurfaceError::OutOfMemory) => {
                    log::error!("Out of GPU memory!");
                    app.shutdown();
                    event_loop.exit();
                }
                Err(e) => {
                    log::warn!("Surface error: {:?}", e);
                }
            },

            // Mouse and other input only matter to egui
            _ => {
                if egui_consumed {
                    window.request_redraw();
                }
            }
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let AppState::Running { window, app } = &mut self.state else {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        };

        let now = Instant::now();
        match app.poll(now) {
            Tick::Redraw => {
                window.request_redraw();
                event_loop.set_control_flow(ControlFlow::WaitUntil(now + app.frame_duration()));
            }
            Tick::WaitUntil(at) => event_loop.set_control_flow(ControlFlow::WaitUntil(at)),
            // Render loop never started (camera failed): redraw on events only
            Tick::Idle => event_loop.set_control_flow(ControlFlow::Wait),
        }
    }
}

/// Digit keys 1-9 map to catalog positions 0-8
fn digit_index(key: KeyCode) -> Option<usize> {
    let digits = [
        KeyCode::Digit1,
        KeyCode::Digit2,
        KeyCode::Digit3,
        KeyCode::Digit4,
        KeyCode::Digit5,
        KeyCode::Digit6,
        KeyCode::Digit7,
        KeyCode::Digit8,
        KeyCode::Digit9,
    ];
    digits.iter().position(|&digit| digit == key)
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Virtual Try-On v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = TryOnConfig::load_or_default(config_path.as_deref());

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = TryOnApp::new(config);
    event_loop.run_app(&mut app).context("Event loop error")?;
    Ok(())
}
