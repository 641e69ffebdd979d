//! Chrome DevTools Protocol backend for the rendering-context capability

use crate::context::{CancelToken, LaunchConfig, RenderContext, RenderDriver};
use crate::{Error, ImageFormat, Result, Size};
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};
use std::ffi::OsStr;
use std::io::Write;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

const POLL_SLICE: Duration = Duration::from_millis(50);

/// Launches one headless Chrome per render call (uses the `headless_chrome` crate)
#[derive(Debug, Clone, Copy, Default)]
pub struct CdpDriver;

impl RenderDriver for CdpDriver {
    type Context = CdpContext;

    fn launch(&self, config: &LaunchConfig) -> Result<CdpContext> {
        let args: Vec<&OsStr> = config.args.iter().map(OsStr::new).collect();
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(config.sandbox)
            .window_size(Some((config.window.width, config.window.height)))
            .path(config.executable.clone())
            .idle_browser_timeout(config.operation_timeout)
            .args(args)
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;

        let tab = browser.new_tab()?;
        tab.set_default_timeout(config.operation_timeout);

        debug!(
            "Launched headless Chrome with a {}x{} window",
            config.window.width, config.window.height
        );
        Ok(CdpContext {
            browser: Some(browser),
            tab: Some(tab),
            page: None,
            jpeg_quality: config.jpeg_quality,
        })
    }
}

/// One browser process with a single tab
pub struct CdpContext {
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
    // the loaded document lives on disk for the lifetime of the context
    page: Option<NamedTempFile>,
    jpeg_quality: u32,
}

impl CdpContext {
    fn tab(&self) -> Result<&Arc<Tab>> {
        self.tab
            .as_ref()
            .ok_or_else(|| Error::CdpError("rendering context is already closed".into()))
    }
}

fn spawn_eval(tab: Arc<Tab>, script: String) -> Receiver<Result<Option<serde_json::Value>>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let res = tab
            .evaluate(&script, true)
            .map(|obj| obj.value)
            .map_err(|e| Error::ScriptError(format!("Evaluation failed: {}", e)));
        let _ = tx.send(res);
    });
    rx
}

impl RenderContext for CdpContext {
    fn load_html(&mut self, html: &str) -> Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix("mindmap-")
            .suffix(".html")
            .tempfile()
            .map_err(|e| Error::LoadError(format!("Failed to create page file: {}", e)))?;
        file.write_all(html.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| Error::LoadError(format!("Failed to write page file: {}", e)))?;

        let url = url::Url::from_file_path(file.path())
            .map_err(|_| Error::LoadError(format!("Not an absolute path: {}", file.path().display())))?;

        let tab = self.tab()?;
        tab.navigate_to(url.as_str())
            .map_err(|e| Error::LoadError(format!("Navigation failed: {}", e)))?;
        tab.wait_until_navigated()
            .map_err(|e| Error::LoadError(format!("Wait for navigation failed: {}", e)))?;

        self.page = Some(file);
        Ok(())
    }

    fn evaluate(&mut self, script: &str, await_promise: bool) -> Result<Option<serde_json::Value>> {
        let obj = self
            .tab()?
            .evaluate(script, await_promise)
            .map_err(|e| Error::ScriptError(format!("Evaluation failed: {}", e)))?;
        Ok(obj.value)
    }

    fn wait_for_function(&mut self, predicate: &str, timeout: Duration, cancel: &CancelToken) -> Result<()> {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let deadline = Instant::now() + timeout;
        let tab = self.tab()?.clone();
        let mut rx = spawn_eval(tab.clone(), predicate.to_string());

        loop {
            cancel.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout(timeout_ms));
            }
            match rx.recv_timeout((deadline - now).min(POLL_SLICE)) {
                Ok(Ok(Some(serde_json::Value::Bool(true)))) => return Ok(()),
                Ok(Ok(other)) => {
                    debug!("Predicate not yet satisfied ({:?}), re-evaluating", other);
                    cancel.sleep(POLL_SLICE)?;
                    rx = spawn_eval(tab.clone(), predicate.to_string());
                }
                Ok(Err(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::ScriptError("evaluation thread exited without a result".into()))
                }
            }
        }
    }

    fn screenshot(&mut self, format: ImageFormat, size: Size) -> Result<Vec<u8>> {
        let (format, quality) = match format {
            ImageFormat::Png => (Page::CaptureScreenshotFormatOption::Png, None),
            ImageFormat::Jpeg => (Page::CaptureScreenshotFormatOption::Jpeg, Some(self.jpeg_quality)),
        };
        let clip = Page::Viewport {
            x: 0.0,
            y: 0.0,
            width: f64::from(size.width),
            height: f64::from(size.height),
            scale: 1.0,
        };
        self.tab()?
            .capture_screenshot(format, quality, Some(clip), true)
            .map_err(|e| Error::RenderError(format!("Screenshot failed: {}", e)))
    }

    fn close(&mut self) -> Result<()> {
        self.tab.take();
        if self.browser.take().is_some() {
            debug!("Closed headless Chrome");
        }
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close() {
                warn!("Failed to remove page file: {}", e);
            }
        }
        Ok(())
    }
}

impl Drop for CdpContext {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cdp_context_lifecycle() {
        // This test requires Chrome to be installed, so we skip it in CI
        if std::env::var("CI").is_ok() {
            return;
        }
        let config = LaunchConfig {
            window: Size { width: 320, height: 240 },
            ..Default::default()
        };
        let mut ctx = match CdpDriver.launch(&config) {
            Ok(ctx) => ctx,
            Err(e) => {
                eprintln!("Skipping CDP lifecycle test because Chrome is not available or failed to launch: {}", e);
                return;
            }
        };
        ctx.load_html("<html><body><p>hi</p><script>window.done = Promise.resolve(true);</script></body></html>")
            .unwrap();
        ctx.wait_for_function("window.done", Duration::from_secs(5), &CancelToken::new())
            .unwrap();
        let png = ctx.screenshot(ImageFormat::Png, config.window).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        ctx.close().unwrap();
        ctx.close().unwrap();
        assert!(ctx.evaluate("1", false).is_err());
    }
}
