// SPDX-License-Identifier: CEPL-1.0
//! `quintessence.toml`: every field is optional.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use quint_platform::WindowConfig;
use quint_render::{DEFAULT_CLEAR_COLOR, DEFAULT_FRAMES_IN_FLIGHT};
use quint_render_vk::{RendererOptions, ShaderPaths};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct WindowCfg {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub resizable: bool,
}

impl Default for WindowCfg {
    fn default() -> Self {
        let window = WindowConfig::default();
        Self {
            width: window.width,
            height: window.height,
            title: window.title,
            resizable: window.resizable,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub frames_in_flight: usize,
    pub validation: bool,
    pub clear_color: [f32; 4],
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let shaders = ShaderPaths::default();
        Self {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            validation: cfg!(debug_assertions),
            clear_color: DEFAULT_CLEAR_COLOR,
            vertex_shader: shaders.vertex,
            fragment_shader: shaders.fragment,
        }
    }
}

impl RenderCfg {
    pub fn shader_paths(&self) -> ShaderPaths {
        ShaderPaths {
            vertex: self.vertex_shader.clone(),
            fragment: self.fragment_shader.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LogCfg {
    /// Also print lifecycle lines with colored prefixes.
    pub terminal: bool,
    /// Used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LogCfg {
    fn default() -> Self {
        Self {
            terminal: false,
            filter: "info".to_owned(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub log: LogCfg,
}

impl AppCfg {
    pub fn parse(text: &str) -> Result<Self> {
        let mut cfg: AppCfg = toml::from_str(text)?;
        cfg.render.frames_in_flight = cfg.render.frames_in_flight.max(1);
        Ok(cfg)
    }

    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            width: self.window.width,
            height: self.window.height,
            title: self.window.title.clone(),
            resizable: self.window.resizable,
        }
    }

    pub fn renderer_options(&self) -> RendererOptions {
        RendererOptions {
            app_name: self.window.title.clone(),
            validation: self.render.validation,
            frames_in_flight: self.render.frames_in_flight,
            shaders: self.render.shader_paths(),
        }
    }
}

/// A missing file is not an error: defaults apply.
pub fn load_cfg(path: &Path) -> Result<AppCfg> {
    match fs::read_to_string(path) {
        Ok(text) => AppCfg::parse(&text).with_context(|| format!("parsing {}", path.display())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(AppCfg::default()),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}
