// SPDX-License-Identifier: CEPL-1.0
//! The steady-state frame driver.
//!
//! `FrameLoop` owns nothing on the GPU. It sequences a [`Presenter`] (the
//! backend's swapchain, command buffers and per-slot sync objects) against a
//! [`SurfaceSource`] (the window) and decides when the swapchain must be
//! rebuilt.
//!
//! STRICT PER-FRAME ORDER, for slot `f = frame_counter % N`:
//! 1) wait on slot `f`'s in-flight fence (backpressure: at most N frames queued)
//! 2) acquire the next image, signalling slot `f`'s image-available semaphore
//! 3) reset slot `f`'s fence (only now that a submission is certain)
//! 4) submit, waiting on image-available, signalling render-finished + fence
//! 5) present, waiting on render-finished
//! 6) rebuild on out-of-date/suboptimal or a pending resize
use crate::{RenderError, RenderSize};

/// Window-side collaborator of the loop.
pub trait SurfaceSource {
    /// Current framebuffer size in physical pixels.
    fn framebuffer_size(&self) -> RenderSize;
    /// Dispatch pending platform events without blocking.
    fn poll_events(&mut self);
    /// Block until at least one platform event arrives, then dispatch it.
    fn wait_events(&mut self);
    /// Returns and clears the pending-resize flag.
    fn take_resize(&mut self) -> bool;
    fn close_requested(&self) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(u32),
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// The presentation engine reported out-of-date or suboptimal.
    Stale,
}

/// GPU-side collaborator of the loop. Slots are indices in `0..frames_in_flight()`.
pub trait Presenter {
    fn frames_in_flight(&self) -> usize;
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), RenderError>;
    fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome, RenderError>;
    fn reset_slot(&mut self, slot: usize) -> Result<(), RenderError>;
    fn submit(&mut self, slot: usize, image: u32) -> Result<(), RenderError>;
    fn present(&mut self, slot: usize, image: u32) -> Result<PresentOutcome, RenderError>;
    fn wait_idle(&mut self) -> Result<(), RenderError>;
    /// Replace every swapchain-dependent object. Called only after `wait_idle`.
    fn rebuild(&mut self, size: RenderSize) -> Result<(), RenderError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameState {
    #[default]
    Idle,
    Acquiring,
    Submitting,
    Presenting,
    Rebuilding,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub iterations: u64,
    pub presented: u64,
    pub rebuilds: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Presented,
    Rebuilt,
    /// Close was requested while waiting for a minimized window.
    Closed,
}

#[derive(Debug, Default)]
pub struct FrameLoop {
    state: FrameState,
    frame_counter: u64,
    stats: FrameStats,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Drives frames until the surface asks to close or `max_presented` frames
    /// have been presented, then waits for the device to go idle. Iterations
    /// that only rebuilt the swapchain do not count towards the limit.
    pub fn run<P, S>(
        &mut self,
        presenter: &mut P,
        surface: &mut S,
        max_presented: Option<u64>,
    ) -> Result<FrameStats, RenderError>
    where
        P: Presenter + ?Sized,
        S: SurfaceSource + ?Sized,
    {
        loop {
            surface.poll_events();
            if surface.close_requested() {
                break;
            }
            if max_presented.is_some_and(|max| self.stats.presented >= max) {
                break;
            }
            self.stats.iterations += 1;
            if self.step(presenter, surface)? == StepOutcome::Closed {
                break;
            }
        }

        // Nothing may still target an object that is about to be freed.
        presenter.wait_idle()?;
        Ok(self.stats)
    }

    /// One pass through the state machine.
    pub fn step<P, S>(&mut self, presenter: &mut P, surface: &mut S) -> Result<StepOutcome, RenderError>
    where
        P: Presenter + ?Sized,
        S: SurfaceSource + ?Sized,
    {
        let slots = presenter.frames_in_flight().max(1) as u64;
        let slot = (self.frame_counter % slots) as usize;

        self.state = FrameState::Acquiring;
        presenter.wait_for_slot(slot)?;
        let image = match presenter.acquire(slot)? {
            AcquireOutcome::Acquired(image) => image,
            AcquireOutcome::OutOfDate => return self.rebuild(presenter, surface),
        };
        presenter.reset_slot(slot)?;

        self.state = FrameState::Submitting;
        presenter.submit(slot, image)?;

        self.state = FrameState::Presenting;
        let outcome = presenter.present(slot, image)?;
        self.frame_counter += 1;
        self.stats.presented += 1;

        let resized = surface.take_resize();
        if outcome == PresentOutcome::Stale || resized {
            return self.rebuild(presenter, surface);
        }

        self.state = FrameState::Idle;
        Ok(StepOutcome::Presented)
    }

    fn rebuild<P, S>(&mut self, presenter: &mut P, surface: &mut S) -> Result<StepOutcome, RenderError>
    where
        P: Presenter + ?Sized,
        S: SurfaceSource + ?Sized,
    {
        self.state = FrameState::Rebuilding;

        loop {
            // Minimized: nothing can be presented until the window has area again.
            while surface.framebuffer_size().is_empty() {
                if surface.close_requested() {
                    self.state = FrameState::Idle;
                    return Ok(StepOutcome::Closed);
                }
                surface.wait_events();
            }
            surface.take_resize();
            let size = surface.framebuffer_size();

            presenter.wait_idle()?;
            match presenter.rebuild(size) {
                Ok(()) => break,
                // Minimized between the size query and the surface query.
                Err(RenderError::ZeroExtent) => {
                    if surface.close_requested() {
                        self.state = FrameState::Idle;
                        return Ok(StepOutcome::Closed);
                    }
                    surface.wait_events();
                }
                Err(e) => return Err(e),
            }
        }
        self.stats.rebuilds += 1;

        self.state = FrameState::Idle;
        Ok(StepOutcome::Rebuilt)
    }
}
