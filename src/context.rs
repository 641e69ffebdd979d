//! Rendering-context capability: the seam between the render pipeline and
//! whatever actually loads HTML, runs its scripts and takes screenshots.

use crate::{Error, ImageFormat, Result, Size};
use log::warn;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Launch flags suited to containers and CI machines
pub const DEFAULT_LAUNCH_ARGS: [&str; 5] = [
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-software-rasterizer",
    "--font-render-hinting=none",
];

/// Per-call launch parameters for a rendering context
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Browser executable; `None` lets the backend discover one
    pub executable: Option<PathBuf>,
    /// Extra command-line flags
    pub args: Vec<String>,
    /// Whether the browser's own sandbox stays enabled
    pub sandbox: bool,
    /// Window size, equal to the requested image size
    pub window: Size,
    /// Upper bound for any single backend operation
    pub operation_timeout: Duration,
    /// Quality used for JPEG captures
    pub jpeg_quality: u32,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            executable: None,
            args: DEFAULT_LAUNCH_ARGS.iter().map(|s| s.to_string()).collect(),
            sandbox: false,
            window: Size::default(),
            operation_timeout: Duration::from_millis(crate::DEFAULT_RENDER_TIMEOUT_MS),
            jpeg_quality: crate::DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Starts isolated rendering contexts, one per render call
pub trait RenderDriver: Send + Sync + 'static {
    type Context: RenderContext;

    fn launch(&self, config: &LaunchConfig) -> Result<Self::Context>;
}

/// An isolated environment that can load a document, run its scripts and
/// capture pixels.
pub trait RenderContext {
    /// Load a complete HTML document and wait for it to finish loading
    fn load_html(&mut self, html: &str) -> Result<()>;

    /// Evaluate a script expression, optionally awaiting a returned promise
    fn evaluate(&mut self, script: &str, await_promise: bool) -> Result<Option<serde_json::Value>>;

    /// Block until `predicate` evaluates to `true`.
    ///
    /// Fails with [`Error::Timeout`] once `timeout` elapses and with
    /// [`Error::Cancelled`] as soon as `cancel` trips.
    fn wait_for_function(&mut self, predicate: &str, timeout: Duration, cancel: &CancelToken) -> Result<()>;

    /// Capture the top-left `size` region of the page
    fn screenshot(&mut self, format: ImageFormat, size: Size) -> Result<Vec<u8>>;

    /// Tear the context down. Must be safe to call more than once.
    fn close(&mut self) -> Result<()>;
}

/// Shared flag used to abandon an in-flight render
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    const SLICE: Duration = Duration::from_millis(50);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early with [`Error::Cancelled`]
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(Self::SLICE));
        }
    }
}

/// Owns a rendering context and closes it when dropped, whatever path the
/// render took.
pub struct ContextGuard<C: RenderContext> {
    inner: C,
}

impl<C: RenderContext> ContextGuard<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<C: RenderContext> Deref for ContextGuard<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.inner
    }
}

impl<C: RenderContext> DerefMut for ContextGuard<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.inner
    }
}

impl<C: RenderContext> Drop for ContextGuard<C> {
    fn drop(&mut self) {
        if let Err(e) = self.inner.close() {
            warn!("Failed to tear down rendering context: {}", e);
        }
    }
}
