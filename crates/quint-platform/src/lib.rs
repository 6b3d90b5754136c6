// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! The window side of the renderer: one OS window plus the event loop that
//! owns it.
//!
//! The windowing subsystem is an explicit [`Platform`] value rather than
//! lazily initialized global state. Dropping it closes the window first and
//! then tears down the event loop, on every exit path.
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::time::Duration;

use quint_core::Logger;
use quint_render::{RenderSize, SurfaceSource};
use thiserror::Error;

pub use winit;

use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    error::{EventLoopError, OsError},
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowId},
};

/// Startup pumps to wait for the platform to let us create the window.
const MAX_STARTUP_PUMPS: u32 = 120;
const STARTUP_PUMP_TIMEOUT: Duration = Duration::from_millis(16);

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("failed to initialize the windowing subsystem: {0}")]
    EventLoop(#[from] EventLoopError),

    #[error("failed to create window: {0}")]
    Window(#[from] OsError),

    #[error("the platform did not allow window creation after {0} event pumps")]
    WindowNeverCreated(u32),

    #[error("the event loop exited during startup (code {0})")]
    ExitedDuringStartup(i32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            title: "quintessence".to_owned(),
            resizable: true,
        }
    }
}

fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

/// Receives winit callbacks while the event loop is being pumped.
struct WindowState {
    config: WindowConfig,
    logger: Arc<Logger>,
    created: Option<Window>,
    window_id: Option<WindowId>,
    create_error: Option<OsError>,
    resized: bool,
    close_requested: bool,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        // Only ever one window, even if the platform resumes us again.
        if self.window_id.is_some() || self.create_error.is_some() {
            return;
        }

        self.logger.debug("Window creating...");
        let attributes = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height))
            .with_resizable(self.config.resizable);

        match event_loop.create_window(attributes) {
            Ok(window) => {
                self.window_id = Some(window.id());
                self.created = Some(window);
                self.logger.debug("Window created");
            }
            Err(e) => {
                self.logger.error(format!("Window creation failed: {e}"));
                self.create_error = Some(e);
            }
        }
    }

    fn window_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.window_id != Some(window_id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.logger.debug("Close requested");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                self.logger
                    .debug(format!("Resized to {}x{}", size.width, size.height));
                self.resized = true;
            }
            _ => {}
        }
    }
}

/// Owns the event loop and the single window it created.
pub struct Platform {
    // Released by hand in Drop: the window first, then its event loop.
    window: ManuallyDrop<Window>,
    state: WindowState,
    event_loop: ManuallyDrop<EventLoop<()>>,
}

impl Platform {
    pub fn new(config: WindowConfig, logger: Arc<Logger>) -> Result<Self, PlatformError> {
        logger.debug("Windowing subsystem initializing...");
        let mut event_loop = EventLoop::new()?;
        logger.debug("Windowing subsystem initialized");

        let mut state = WindowState {
            config,
            logger,
            created: None,
            window_id: None,
            create_error: None,
            resized: false,
            close_requested: false,
        };

        for _ in 0..MAX_STARTUP_PUMPS {
            let status = event_loop.pump_app_events(Some(STARTUP_PUMP_TIMEOUT), &mut state);
            if let Some(err) = state.create_error.take() {
                return Err(err.into());
            }
            if let Some(window) = state.created.take() {
                // Events seen before the renderer exists carry no information.
                state.resized = false;
                return Ok(Self {
                    window: ManuallyDrop::new(window),
                    state,
                    event_loop: ManuallyDrop::new(event_loop),
                });
            }
            if let PumpStatus::Exit(code) = status {
                return Err(PlatformError::ExitedDuringStartup(code));
            }
        }

        Err(PlatformError::WindowNeverCreated(MAX_STARTUP_PUMPS))
    }

    /// The native window, for surface creation.
    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn size(&self) -> RenderSize {
        render_size(self.window.inner_size())
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.state) {
            self.state
                .logger
                .debug(format!("Event loop exited with code {code}"));
            self.state.close_requested = true;
        }
    }
}

impl SurfaceSource for Platform {
    fn framebuffer_size(&self) -> RenderSize {
        self.size()
    }

    fn poll_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    fn wait_events(&mut self) {
        self.pump(None);
    }

    fn take_resize(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }

    fn close_requested(&self) -> bool {
        self.state.close_requested
    }
}

/// Runs `close_window` then `terminate`, logging each step.
fn teardown(logger: &Logger, close_window: impl FnOnce(), terminate: impl FnOnce()) {
    logger.debug("Window destroying...");
    close_window();
    logger.debug("Window destroyed");
    logger.debug("Windowing subsystem terminating...");
    terminate();
    logger.debug("Windowing subsystem terminated");
}

impl Drop for Platform {
    fn drop(&mut self) {
        let logger = self.state.logger.clone();
        let window = &mut self.window;
        let event_loop = &mut self.event_loop;
        // SAFETY: Drop runs once and neither field is touched afterwards.
        teardown(
            &logger,
            || unsafe { ManuallyDrop::drop(window) },
            || unsafe { ManuallyDrop::drop(event_loop) },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_window_is_resizable_512() {
        let cfg = WindowConfig::default();
        assert_eq!((cfg.width, cfg.height), (512, 512));
        assert!(cfg.resizable);
        assert_eq!(cfg.title, "quintessence");
    }

    #[test]
    fn physical_size_maps_to_render_size() {
        assert_eq!(
            render_size(PhysicalSize::new(800, 600)),
            RenderSize::new(800, 600)
        );
        assert!(render_size(PhysicalSize::new(0, 600)).is_empty());
    }

    #[test]
    fn teardown_closes_the_window_before_the_event_loop() {
        use quint_core::{LogLevel, LogSink};
        use std::sync::Mutex;

        #[derive(Clone, Default)]
        struct Capture(Arc<Mutex<Vec<String>>>);
        impl LogSink for Capture {
            fn write(&self, _level: LogLevel, message: &str) {
                self.0.lock().unwrap().push(message.to_owned());
            }
        }

        let capture = Capture::default();
        let logger = Logger::new().with_sink(capture.clone());
        let steps = capture.0.clone();
        let steps_after = capture.0.clone();
        teardown(
            &logger,
            || steps.lock().unwrap().push("<window released>".to_owned()),
            || steps_after.lock().unwrap().push("<event loop released>".to_owned()),
        );

        assert_eq!(
            *capture.0.lock().unwrap(),
            [
                "Window destroying...",
                "<window released>",
                "Window destroyed",
                "Windowing subsystem terminating...",
                "<event loop released>",
                "Windowing subsystem terminated",
            ]
        );
    }

    #[test]
    fn errors_read_as_one_line() {
        let msg = PlatformError::WindowNeverCreated(MAX_STARTUP_PUMPS).to_string();
        assert!(!msg.contains('\n'));
        assert!(msg.contains("120"));
    }
}
