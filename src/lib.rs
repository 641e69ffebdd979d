//! Mind map renderer
//!
//! Turns a markdown outline into a mind map image by laying it out inside a
//! headless browser and capturing the result.
//!
//! # Pipeline
//!
//! - **Tree provider**: text is parsed into an outline tree ([`markdown`])
//! - **Style resolver**: every node gets a color and a stroke width ([`style`])
//! - **Document assembler**: tree, styles and layout engine code become one
//!   self-contained HTML document ([`document`])
//! - **Render driver**: the document is loaded into an isolated rendering
//!   context ([`context`], [`cdp`]) and captured once the completion
//!   watcher ([`watcher`]) reports that layout has settled
//! - **Output sink**: bytes are handed back or written to disk ([`output`])
//!
//! # Example
//!
//! ```no_run
//! use mindmap_render::{RenderConfig, RenderOptions, RenderOutput};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let renderer = mindmap_render::new_renderer(RenderConfig::from_env()?)?;
//! let out = renderer
//!     .render("# Plan\n## Build\n## Ship", None, RenderOptions::default())
//!     .await?;
//! if let RenderOutput::Buffer(png) = out {
//!     println!("{} bytes", png.len());
//! }
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub mod error;
pub use error::{Error, ErrorKind, Result};

pub mod assets;
pub mod context;
pub mod document;
pub mod markdown;
pub mod output;
pub mod renderer;
pub mod request;
pub mod style;
pub mod tree;
pub mod watcher;

// Chrome DevTools Protocol backend
#[cfg(feature = "cdp")]
pub mod cdp;

pub use assets::AssetBundle;
pub use context::{CancelToken, LaunchConfig, RenderContext, RenderDriver};
pub use document::{assemble, Document};
pub use markdown::MarkdownTransformer;
pub use output::RenderOutput;
pub use renderer::MindmapRenderer;
pub use request::RenderRequest;
pub use style::StyleConfig;
pub use tree::{Node, Outline, TreeProvider};
pub use watcher::{CompletionWatcher, WatchSettings, WatchState};

/// Overall wall-clock budget for one render, launch through capture
pub const DEFAULT_RENDER_TIMEOUT_MS: u64 = 120_000;
/// Host-side bound on waiting for the completion flag
pub const DEFAULT_COMPLETION_TIMEOUT_MS: u64 = 30_000;

pub const MIN_DIMENSION: u32 = 100;
pub const MAX_DIMENSION: u32 = 10_000;
pub const DEFAULT_WIDTH: u32 = 2400;
pub const DEFAULT_HEIGHT: u32 = 1800;

/// Largest accepted input text, in bytes
pub const MAX_TEXT_LEN: usize = 10 * 1024 * 1024;

pub const DEFAULT_ASSETS_DIR: &str = "assets";
pub const DEFAULT_JPEG_QUALITY: u32 = 90;

/// Image dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Default for Size {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

/// Raster output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    /// Guess the format from a file extension (`.jpg`/`.jpeg` are JPEG)
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }
}

impl FromStr for ImageFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            other => Err(Error::ValidationError(format!(
                "unsupported format '{}' (expected png or jpeg)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call render options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            format: ImageFormat::Png,
        }
    }
}

impl RenderOptions {
    pub fn size(&self) -> Size {
        Size {
            width: self.width,
            height: self.height,
        }
    }
}

/// Renderer configuration
///
/// [`RenderConfig::from_env`] layers `MINDMAP_*` environment variables over
/// the defaults below.
///
/// # Examples
///
/// ```
/// let cfg = mindmap_render::RenderConfig::default();
/// assert_eq!(cfg.render_timeout_ms, 120_000);
/// assert!(cfg.max_concurrent_renders >= 1);
/// ```
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Directory holding the layout engine scripts and optional `fonts/`
    pub assets_dir: PathBuf,
    /// Browser executable; `None` lets the backend discover one
    pub chrome_path: Option<PathBuf>,
    /// Extra browser flags
    pub launch_args: Vec<String>,
    /// Simultaneous rendering contexts allowed per renderer
    pub max_concurrent_renders: usize,
    /// Overall budget for one render in milliseconds
    pub render_timeout_ms: u64,
    /// Completion watcher tuning
    pub watch: WatchSettings,
    pub style: StyleConfig,
    pub jpeg_quality: u32,
    /// Largest accepted input text in bytes
    pub max_text_len: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from(DEFAULT_ASSETS_DIR),
            chrome_path: None,
            launch_args: context::DEFAULT_LAUNCH_ARGS.iter().map(|s| s.to_string()).collect(),
            max_concurrent_renders: num_cpus::get().max(1),
            render_timeout_ms: DEFAULT_RENDER_TIMEOUT_MS,
            watch: WatchSettings::default(),
            style: StyleConfig::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_text_len: MAX_TEXT_LEN,
        }
    }
}

impl RenderConfig {
    /// Defaults overridden by `MINDMAP_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`RenderConfig::from_env`] with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("MINDMAP_ASSETS_DIR") {
            cfg.assets_dir = PathBuf::from(dir);
        }
        if let Some(path) = get("MINDMAP_CHROME_PATH") {
            cfg.chrome_path = Some(PathBuf::from(path));
        }
        if let Some(v) = get("MINDMAP_MAX_CONCURRENCY") {
            let n: usize = parse_var("MINDMAP_MAX_CONCURRENCY", &v)?;
            if n == 0 {
                return Err(Error::ConfigError("MINDMAP_MAX_CONCURRENCY must be at least 1".into()));
            }
            cfg.max_concurrent_renders = n;
        }
        if let Some(v) = get("MINDMAP_RENDER_TIMEOUT_MS") {
            cfg.render_timeout_ms = parse_var("MINDMAP_RENDER_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("MINDMAP_COMPLETION_TIMEOUT_MS") {
            cfg.watch.completion_timeout = Duration::from_millis(parse_var("MINDMAP_COMPLETION_TIMEOUT_MS", &v)?);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_renders == 0 {
            return Err(Error::ConfigError("max_concurrent_renders must be at least 1".into()));
        }
        if self.render_timeout_ms == 0 {
            return Err(Error::ConfigError("render timeout must be positive".into()));
        }
        if self.watch.completion_timeout.is_zero() {
            return Err(Error::ConfigError("completion timeout must be positive".into()));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(Error::ConfigError(format!(
                "jpeg quality {} is outside 1..=100",
                self.jpeg_quality
            )));
        }
        Ok(())
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    /// Launch parameters for one render of the given size
    pub fn launch_config(&self, window: Size) -> LaunchConfig {
        LaunchConfig {
            executable: self.chrome_path.clone(),
            args: self.launch_args.clone(),
            sandbox: false,
            window,
            operation_timeout: self.render_timeout(),
            jpeg_quality: self.jpeg_quality,
        }
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::ConfigError(format!("{}={:?} is not valid: {}", key, value, e)))
}

/// Create a renderer backed by headless Chrome, loading assets from
/// `config.assets_dir`.
#[cfg(feature = "cdp")]
pub fn new_renderer(config: RenderConfig) -> Result<MindmapRenderer<cdp::CdpDriver>> {
    config.validate()?;
    let assets = AssetBundle::load(&config.assets_dir)?;
    Ok(MindmapRenderer::new(cdp::CdpDriver, assets, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = RenderConfig::default();
        assert_eq!(config.render_timeout_ms, 120_000);
        assert_eq!(config.watch.completion_timeout, Duration::from_secs(30));
        assert_eq!(config.assets_dir, PathBuf::from("assets"));
        assert!(config.max_concurrent_renders >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_options() {
        let opts = RenderOptions::default();
        assert_eq!(opts.size(), Size { width: 2400, height: 1800 });
        assert_eq!(opts.format, ImageFormat::Png);
    }

    #[test]
    fn env_overrides_defaults() {
        let cfg = RenderConfig::from_lookup(lookup(&[
            ("MINDMAP_ASSETS_DIR", "/opt/mindmap"),
            ("MINDMAP_CHROME_PATH", "/usr/bin/chromium"),
            ("MINDMAP_MAX_CONCURRENCY", "3"),
            ("MINDMAP_RENDER_TIMEOUT_MS", "60000"),
            ("MINDMAP_COMPLETION_TIMEOUT_MS", " 5000 "),
        ]))
        .unwrap();
        assert_eq!(cfg.assets_dir, PathBuf::from("/opt/mindmap"));
        assert_eq!(cfg.chrome_path, Some(PathBuf::from("/usr/bin/chromium")));
        assert_eq!(cfg.max_concurrent_renders, 3);
        assert_eq!(cfg.render_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.watch.completion_timeout, Duration::from_secs(5));
    }

    #[test]
    fn malformed_env_is_a_config_error() {
        let err = RenderConfig::from_lookup(lookup(&[("MINDMAP_RENDER_TIMEOUT_MS", "soon")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("MINDMAP_RENDER_TIMEOUT_MS"));

        let err = RenderConfig::from_lookup(lookup(&[("MINDMAP_MAX_CONCURRENCY", "0")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let cfg = RenderConfig::from_lookup(lookup(&[("MINDMAP_ASSETS_DIR", "  ")])).unwrap();
        assert_eq!(cfg.assets_dir, PathBuf::from(DEFAULT_ASSETS_DIR));
    }

    #[test]
    fn image_format_parsing() {
        assert_eq!("PNG".parse::<ImageFormat>().unwrap(), ImageFormat::Png);
        assert_eq!("jpg".parse::<ImageFormat>().unwrap(), ImageFormat::Jpeg);
        assert_eq!("gif".parse::<ImageFormat>().unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(ImageFormat::from_path(Path::new("out/map.JPEG")), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_path(Path::new("map")), None);
        assert_eq!(ImageFormat::Jpeg.to_string(), "jpeg");
        assert_eq!(ImageFormat::Jpeg.mime_type(), "image/jpeg");
    }

    #[test]
    fn launch_config_follows_request_size() {
        let cfg = RenderConfig::default();
        let launch = cfg.launch_config(Size { width: 800, height: 600 });
        assert_eq!(launch.window, Size { width: 800, height: 600 });
        assert!(!launch.sandbox);
        assert_eq!(launch.jpeg_quality, 90);
        assert_eq!(launch.operation_timeout, Duration::from_secs(120));
    }
}
