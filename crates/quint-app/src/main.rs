// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quint_core::{init_tracing, Logger, TerminalSink, TracingSink};
use quint_platform::Platform;
use quint_render::{FrameLoop, RenderError, Renderer};
use quint_render_vk::{install_builtin_shaders, VkRenderer};
use tracing::{info, warn};

use config::{load_cfg, AppCfg, LogCfg};

#[derive(Parser, Debug)]
#[command(author, version, about = "Draws a triangle with Vulkan", long_about = None)]
struct Args {
    /// Config file; missing means defaults
    #[arg(long, default_value = "quintessence.toml")]
    config: PathBuf,

    /// Stop after this many presented frames
    #[arg(long)]
    frames: Option<u64>,

    /// Override the window width
    #[arg(long)]
    width: Option<u32>,

    /// Override the window height
    #[arg(long)]
    height: Option<u32>,

    /// Disable the validation layer and debug messenger
    #[arg(long)]
    no_validation: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the bundled SPIR-V shaders to the configured asset paths
    InstallShaders,
}

fn apply_overrides(cfg: &mut AppCfg, args: &Args) {
    if let Some(width) = args.width {
        cfg.window.width = width;
    }
    if let Some(height) = args.height {
        cfg.window.height = height;
    }
    if args.no_validation {
        cfg.render.validation = false;
    }
}

fn build_logger(cfg: &LogCfg) -> Logger {
    let mut logger = Logger::new().with_sink(TracingSink);
    if cfg.terminal {
        logger.attach(TerminalSink);
    }
    logger
}

/// Returns whether the command buffers were re-recorded.
fn apply_clear_color<R: Renderer>(
    renderer: &mut R,
    rgba: [f32; 4],
    logger: &Logger,
) -> Result<bool, RenderError> {
    if renderer.clear_color() == rgba {
        return Ok(false);
    }
    renderer.set_clear_color(rgba)?;
    logger.info(format!("Clear color {rgba:?}"));
    Ok(true)
}

fn run(args: Args) -> Result<()> {
    let (mut cfg, cfg_error) = match load_cfg(&args.config) {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppCfg::default(), Some(e)),
    };
    init_tracing(&cfg.log.filter);
    if let Some(e) = cfg_error {
        warn!("{e:#}; using defaults");
    }
    apply_overrides(&mut cfg, &args);

    if let Some(Command::InstallShaders) = args.command {
        let paths = cfg.render.shader_paths();
        install_builtin_shaders(&paths).context("installing shaders")?;
        info!(
            "shaders written to {} and {}",
            paths.vertex.display(),
            paths.fragment.display()
        );
        return Ok(());
    }

    let logger = Arc::new(build_logger(&cfg.log));

    // Declared before the renderer so it is dropped after it.
    let mut platform =
        Platform::new(cfg.window_config(), logger.clone()).context("window setup")?;
    let mut renderer = VkRenderer::new(
        platform.window(),
        platform.window(),
        platform.size(),
        cfg.renderer_options(),
        logger.clone(),
    )
    .context("renderer setup")?;
    apply_clear_color(&mut renderer, cfg.render.clear_color, &logger)
        .context("applying clear color")?;

    let stats = FrameLoop::new()
        .run(&mut renderer, &mut platform, args.frames)
        .context("frame loop")?;
    logger.info(format!(
        "Loop finished: {} iteration(s), {} frame(s) presented, {} swapchain rebuild(s)",
        stats.iterations, stats.presented, stats.rebuilds
    ));
    Ok(())
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("quintessence: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use quint_render::{AcquireOutcome, PresentOutcome, Presenter, RenderSize};

    use super::*;

    #[derive(Default)]
    struct FakeRenderer {
        clear_color: [f32; 4],
        recordings: usize,
        fail: bool,
    }

    impl Presenter for FakeRenderer {
        fn frames_in_flight(&self) -> usize {
            1
        }
        fn wait_for_slot(&mut self, _slot: usize) -> Result<(), RenderError> {
            Ok(())
        }
        fn acquire(&mut self, _slot: usize) -> Result<AcquireOutcome, RenderError> {
            Ok(AcquireOutcome::Acquired(0))
        }
        fn reset_slot(&mut self, _slot: usize) -> Result<(), RenderError> {
            Ok(())
        }
        fn submit(&mut self, _slot: usize, _image: u32) -> Result<(), RenderError> {
            Ok(())
        }
        fn present(&mut self, _slot: usize, _image: u32) -> Result<PresentOutcome, RenderError> {
            Ok(PresentOutcome::Presented)
        }
        fn wait_idle(&mut self) -> Result<(), RenderError> {
            Ok(())
        }
        fn rebuild(&mut self, _size: RenderSize) -> Result<(), RenderError> {
            Ok(())
        }
    }

    impl Renderer for FakeRenderer {
        fn clear_color(&self) -> [f32; 4] {
            self.clear_color
        }
        fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<(), RenderError> {
            if self.fail {
                return Err(RenderError::device("vkAllocateCommandBuffers", "out of memory"));
            }
            self.clear_color = rgba;
            self.recordings += 1;
            Ok(())
        }
    }

    #[test]
    fn configured_clear_color_is_recorded_once() {
        let logger = Logger::new();
        let mut renderer = FakeRenderer {
            clear_color: quint_render::DEFAULT_CLEAR_COLOR,
            ..FakeRenderer::default()
        };
        let teal = [0.0, 0.5, 0.5, 1.0];
        assert!(apply_clear_color(&mut renderer, teal, &logger).unwrap());
        assert_eq!(renderer.clear_color(), teal);
        assert!(!apply_clear_color(&mut renderer, teal, &logger).unwrap());
        assert_eq!(renderer.recordings, 1);
    }

    #[test]
    fn default_clear_color_skips_re_recording() {
        let logger = Logger::new();
        let mut renderer = FakeRenderer {
            clear_color: quint_render::DEFAULT_CLEAR_COLOR,
            ..FakeRenderer::default()
        };
        let cfg = AppCfg::default();
        assert!(!apply_clear_color(&mut renderer, cfg.render.clear_color, &logger).unwrap());
        assert_eq!(renderer.recordings, 0);
    }

    #[test]
    fn clear_color_failure_propagates() {
        let logger = Logger::new();
        let mut renderer = FakeRenderer {
            fail: true,
            ..FakeRenderer::default()
        };
        let err = apply_clear_color(&mut renderer, [1.0; 4], &logger).unwrap_err();
        assert!(matches!(err, RenderError::Device { .. }));
    }

    #[test]
    fn flags_override_the_config() {
        let args = Args::parse_from([
            "quintessence",
            "--width",
            "800",
            "--height",
            "600",
            "--no-validation",
            "--frames",
            "60",
        ]);
        let mut cfg = AppCfg::default();
        cfg.render.validation = true;
        apply_overrides(&mut cfg, &args);
        assert_eq!((cfg.window.width, cfg.window.height), (800, 600));
        assert!(!cfg.render.validation);
        assert_eq!(args.frames, Some(60));
        assert_eq!(args.config, PathBuf::from("quintessence.toml"));
    }

    #[test]
    fn install_shaders_subcommand_parses() {
        let args = Args::parse_from(["quintessence", "--config", "alt.toml", "install-shaders"]);
        assert!(matches!(args.command, Some(Command::InstallShaders)));
        assert_eq!(args.config, PathBuf::from("alt.toml"));
    }

    #[test]
    fn logger_sinks_follow_config() {
        assert_eq!(build_logger(&LogCfg::default()).sink_count(), 1);
        let with_terminal = LogCfg {
            terminal: true,
            ..LogCfg::default()
        };
        assert_eq!(build_logger(&with_terminal).sink_count(), 2);
    }
}
