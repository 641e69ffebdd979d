//! Async render entry point.
//!
//! Each render runs its rendering context on a dedicated worker thread that
//! owns the context end to end; the async caller only awaits a oneshot
//! reply. A semaphore bounds how many contexts exist at once, and a shared
//! [`CancelToken`] lets a timed-out or dropped caller stop the worker.

use crate::assets::AssetBundle;
use crate::context::{CancelToken, ContextGuard, LaunchConfig, RenderContext, RenderDriver};
use crate::document::{assemble, Document};
use crate::markdown::MarkdownTransformer;
use crate::output::{self, RenderOutput};
use crate::request::RenderRequest;
use crate::tree::TreeProvider;
use crate::watcher::{CompletionWatcher, WatchSettings};
use crate::{Error, ImageFormat, RenderConfig, RenderOptions, Result, Size};
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tokio::sync::{oneshot, Semaphore};

/// Renders outlines to images through a [`RenderDriver`].
///
/// Cloning is cheap; clones share the concurrency limit.
pub struct MindmapRenderer<D: RenderDriver> {
    driver: Arc<D>,
    provider: Arc<dyn TreeProvider>,
    assets: Arc<AssetBundle>,
    config: Arc<RenderConfig>,
    permits: Arc<Semaphore>,
}

impl<D: RenderDriver> Clone for MindmapRenderer<D> {
    fn clone(&self) -> Self {
        Self {
            driver: self.driver.clone(),
            provider: self.provider.clone(),
            assets: self.assets.clone(),
            config: self.config.clone(),
            permits: self.permits.clone(),
        }
    }
}

/// Trips the token when the render future is dropped or finishes
struct AbortOnDrop(CancelToken);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

impl<D: RenderDriver> MindmapRenderer<D> {
    /// Create a renderer using the markdown tree provider
    pub fn new(driver: D, assets: AssetBundle, config: RenderConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_renders.max(1)));
        Self {
            driver: Arc::new(driver),
            provider: Arc::new(MarkdownTransformer::new()),
            assets: Arc::new(assets),
            config: Arc::new(config),
            permits,
        }
    }

    /// Replace the tree provider
    pub fn with_provider<P: TreeProvider + 'static>(mut self, provider: P) -> Self {
        self.provider = Arc::new(provider);
        self
    }

    /// Rendering contexts that could start right now
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Validate, transform and assemble without touching a rendering context
    pub fn prepare<'a>(&self, text: &'a str, options: RenderOptions) -> Result<(RenderRequest<'a>, Document)> {
        let request = RenderRequest::with_limit(text, options, self.config.max_text_len)?;
        let outline = self.provider.transform(request.text).map_err(|e| match e {
            Error::TransformError(_) => e,
            other => Error::TransformError(other.to_string()),
        })?;
        let refs = self.provider.assets_for(&outline.features);
        let document = assemble(
            outline.root,
            &refs,
            &self.assets,
            &self.config.style,
            request.size,
            &self.config.watch,
        )?;
        Ok((request, document))
    }

    /// Render `text` into an image.
    ///
    /// Without a destination the image bytes are returned; with one they are
    /// written there (parents created) and the path is returned.
    pub async fn render(
        &self,
        text: &str,
        destination: Option<&Path>,
        options: RenderOptions,
    ) -> Result<RenderOutput> {
        let started = Instant::now();
        let this = self.clone();
        let text = text.to_owned();
        let (size, format, document) = tokio::task::spawn_blocking(move || {
            this.prepare(&text, options)
                .map(|(request, document)| (request.size, request.format, document))
        })
        .await
        .map_err(|e| Error::RenderError(format!("document preparation task failed: {}", e)))??;
        info!(
            "Rendering document {} ({} nodes) at {}x{} as {}",
            &document.fingerprint[..12],
            document.node_count,
            size.width,
            size.height,
            format.mime_type()
        );

        let bytes = self.capture(document, size, format).await?;
        let out = output::deliver(bytes, destination).await?;
        info!("Render finished in {:?}", started.elapsed());
        Ok(out)
    }

    async fn capture(&self, document: Document, size: Size, format: ImageFormat) -> Result<Vec<u8>> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::RenderError("renderer is shut down".into()))?;

        let cancel = CancelToken::new();
        let _abort = AbortOnDrop(cancel.clone());
        let (tx, rx) = oneshot::channel();

        let driver = self.driver.clone();
        let launch = self.config.launch_config(size);
        let watch = self.config.watch.clone();
        let token = cancel.clone();
        thread::Builder::new()
            .name("mindmap-render".into())
            .spawn(move || {
                let res = run_pipeline(&*driver, &launch, &watch, &document.html, format, size, &token);
                // the context is already torn down here
                drop(permit);
                let _ = tx.send(res);
            })
            .map_err(|e| Error::InitializationError(format!("Failed to spawn render worker: {}", e)))?;

        match tokio::time::timeout(self.config.render_timeout(), rx).await {
            Ok(Ok(res)) => res,
            Ok(Err(_)) => Err(Error::RenderError("render worker exited without a result".into())),
            Err(_) => {
                warn!(
                    "Render exceeded its {}ms budget; abandoning the rendering context",
                    self.config.render_timeout_ms
                );
                Err(Error::Timeout(self.config.render_timeout_ms))
            }
        }
    }
}

/// Worker-thread side of one render
fn run_pipeline<D: RenderDriver>(
    driver: &D,
    launch: &LaunchConfig,
    watch: &WatchSettings,
    html: &str,
    format: ImageFormat,
    size: Size,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    let mut watcher = CompletionWatcher::new(watch.clone());
    let res = drive(driver, launch, &mut watcher, html, format, size, cancel);
    if res.is_err() {
        watcher.fail();
    }
    debug!("Completion watcher history: {:?}", watcher.history());
    res
}

fn drive<D: RenderDriver>(
    driver: &D,
    launch: &LaunchConfig,
    watcher: &mut CompletionWatcher,
    html: &str,
    format: ImageFormat,
    size: Size,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    cancel.check()?;
    let mut ctx = ContextGuard::new(driver.launch(launch)?);

    cancel.check()?;
    ctx.load_html(html)?;
    watcher.document_loaded();

    watcher.await_settled(&mut *ctx, cancel)?;

    cancel.check()?;
    let bytes = ctx.screenshot(format, size)?;
    if bytes.is_empty() {
        return Err(Error::RenderError("capture returned no data".into()));
    }
    watcher.captured();
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::COMPLETION_PREDICATE;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        launched: AtomicUsize,
        closed: AtomicUsize,
        html: Mutex<Option<String>>,
    }

    struct RecordingDriver(Arc<Recorder>);

    struct RecordingContext(Arc<Recorder>);

    impl RenderDriver for RecordingDriver {
        type Context = RecordingContext;

        fn launch(&self, _config: &LaunchConfig) -> Result<RecordingContext> {
            self.0.launched.fetch_add(1, Ordering::SeqCst);
            Ok(RecordingContext(self.0.clone()))
        }
    }

    impl RenderContext for RecordingContext {
        fn load_html(&mut self, html: &str) -> Result<()> {
            *self.0.html.lock().unwrap() = Some(html.to_string());
            Ok(())
        }

        fn evaluate(&mut self, _script: &str, _await_promise: bool) -> Result<Option<serde_json::Value>> {
            Ok(None)
        }

        fn wait_for_function(&mut self, predicate: &str, _timeout: Duration, _cancel: &CancelToken) -> Result<()> {
            assert_eq!(predicate, COMPLETION_PREDICATE);
            Ok(())
        }

        fn screenshot(&mut self, format: ImageFormat, size: Size) -> Result<Vec<u8>> {
            Ok(format!("{}:{}x{}", format, size.width, size.height).into_bytes())
        }

        fn close(&mut self) -> Result<()> {
            self.0.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn renderer(recorder: &Arc<Recorder>) -> MindmapRenderer<RecordingDriver> {
        let mut config = RenderConfig::default();
        config.watch.settle_delay = Duration::from_millis(1);
        let assets = AssetBundle::from_scripts([
            (crate::assets::D3_SCRIPT, "/* d3 */"),
            (crate::assets::MARKMAP_VIEW_SCRIPT, "/* view */"),
        ]);
        MindmapRenderer::new(RecordingDriver(recorder.clone()), assets, config)
    }

    #[tokio::test]
    async fn render_runs_the_whole_pipeline() {
        let recorder = Arc::new(Recorder::default());
        let out = renderer(&recorder)
            .render(
                "# A\n## B",
                None,
                RenderOptions {
                    width: 800,
                    height: 600,
                    format: ImageFormat::Png,
                },
            )
            .await
            .unwrap();

        assert_eq!(out.as_bytes(), Some(&b"png:800x600"[..]));
        assert_eq!(recorder.launched.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 1);
        let html = recorder.html.lock().unwrap().clone().unwrap();
        assert!(html.contains("/* view */"));
        assert!(html.contains("width: 800px;"));
    }

    #[tokio::test]
    async fn transform_errors_never_launch() {
        let recorder = Arc::new(Recorder::default());
        let err = renderer(&recorder)
            .render("---", None, RenderOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Transform);
        assert_eq!(recorder.launched.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn prepare_fingerprints_the_document() {
        let recorder = Arc::new(Recorder::default());
        let r = renderer(&recorder);
        let (req, doc) = r.prepare("# A\n## B", RenderOptions::default()).unwrap();
        assert_eq!(req.size, Size::default());
        assert_eq!(doc.node_count, 2);
        let (_, again) = r.prepare("# A\n## B", RenderOptions::default()).unwrap();
        assert_eq!(doc.fingerprint, again.fingerprint);
    }
}
