// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use thiserror::Error;

/// Every failure the renderer can report.
///
/// Anything raised during setup is fatal. In steady state staleness is
/// recovered (and that is not an error), as is [`RenderError::ZeroExtent`]
/// during a rebuild; everything else here unwinds to the process boundary.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("initialization failed: {0}")]
    InitializationFailure(String),

    #[error("no physical devices were enumerated")]
    NoDeviceFound,

    #[error("no physical device supports graphics, presentation and the required extensions")]
    NoSuitableDevice,

    #[error("swapchain creation failed: {0}")]
    SwapchainCreationFailed(String),

    /// The surface reported no area although the window had one. The frame
    /// loop waits for the next event and retries.
    #[error("surface extent is zero")]
    ZeroExtent,

    #[error("failed to load shader `{}`: {source}", path.display())]
    ShaderLoadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("presentation surface was lost")]
    SurfaceLost,

    #[error("{what} failed: {reason}")]
    Device { what: &'static str, reason: String },
}

impl RenderError {
    pub fn init(message: impl Into<String>) -> Self {
        Self::InitializationFailure(message.into())
    }

    pub fn device(what: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Device {
            what,
            reason: reason.to_string(),
        }
    }
}
