// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic pieces of the renderer: sizes, the error taxonomy and the
//! frame-presentation state machine.
mod error;
pub mod frame_loop;

pub use error::RenderError;
pub use frame_loop::{
    AcquireOutcome, FrameLoop, FrameState, FrameStats, PresentOutcome, Presenter, StepOutcome,
    SurfaceSource,
};

/// Default number of frames the CPU may record ahead of the GPU.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Opaque black.
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// A presenter whose recorded commands can be reconfigured between frames.
pub trait Renderer: Presenter {
    fn clear_color(&self) -> [f32; 4];
    /// Re-records every command buffer. Waits for the device first.
    fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<(), RenderError>;
}

/// Framebuffer size in physical pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero-area framebuffer.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for RenderSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
