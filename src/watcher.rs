//! Completion watcher: decides when client-side layout has settled enough
//! to capture pixels.
//!
//! The context half is a script embedded in the document. Once layout has
//! been kicked off it waits a warm-up delay, then checks once per animation
//! frame whether node elements exist. A run of consecutive positive frames
//! completes the render; running out of frame checks completes it too, but
//! marks the result degraded. Completion sets a boolean flag and resolves a
//! promise the host can await.
//!
//! The host half ([`CompletionWatcher`]) awaits that promise under its own
//! timeout, then waits a settle delay and for font loading before handing
//! over to capture.

use crate::context::{CancelToken, RenderContext};
use crate::{Error, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Elements counted as "layout has produced something"
pub const NODE_SELECTOR: &str = ".markmap-node";

/// Resolves to `true` once the context-side flag is set. Never resolves if
/// the watcher script did not install itself.
pub const COMPLETION_PREDICATE: &str = "(window.__mindmapDone || new Promise(function () {})).then(function () { return window.__mindmapRenderComplete === true; })";

const STATUS_EXPR: &str = "JSON.stringify(window.__mindmapStatus || null)";

const FONTS_READY_EXPR: &str = "(document.fonts ? document.fonts.ready.then(function () { return document.fonts.status; }) : Promise.resolve('unsupported'))";

const CONTEXT_SCRIPT_TEMPLATE: &str = r#"(function () {
  var settings = {{SETTINGS}};
  var status = { frames: 0, stableFrames: 0, degraded: false, error: null };
  var resolveDone;
  window.__mindmapRenderComplete = false;
  window.__mindmapStatus = status;
  window.__mindmapDone = new Promise(function (resolve) { resolveDone = resolve; });

  function finish() {
    if (window.__mindmapRenderComplete) { return; }
    window.__mindmapRenderComplete = true;
    resolveDone(true);
  }

  window.__mindmapFail = function (err) {
    status.error = String(err && err.message ? err.message : err);
    finish();
  };

  window.__mindmapWatch = function (root) {
    function check() {
      if (window.__mindmapRenderComplete) { return; }
      status.frames += 1;
      var present = root.querySelectorAll(settings.nodeSelector).length > 0;
      status.stableFrames = present ? status.stableFrames + 1 : 0;
      if (status.stableFrames >= settings.minStableFrames) {
        finish();
      } else if (status.frames >= settings.maxFrameChecks) {
        status.degraded = true;
        finish();
      } else {
        requestAnimationFrame(check);
      }
    }
    setTimeout(function () { requestAnimationFrame(check); }, settings.warmupMs);
  };
})();"#;

/// Tuning for both halves of the watcher
#[derive(Debug, Clone, PartialEq)]
pub struct WatchSettings {
    /// Delay between starting layout and the first frame check
    pub warmup: Duration,
    /// Consecutive positive frames required to complete
    pub min_stable_frames: u32,
    /// Frame checks after which completion is declared regardless
    pub max_frame_checks: u32,
    /// Host-side bound on waiting for the completion flag
    pub completion_timeout: Duration,
    /// Host-side pause after the flag is observed
    pub settle_delay: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            warmup: Duration::from_millis(500),
            min_stable_frames: 10,
            max_frame_checks: 100,
            completion_timeout: Duration::from_millis(crate::DEFAULT_COMPLETION_TIMEOUT_MS),
            settle_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextSettings<'a> {
    warmup_ms: u64,
    min_stable_frames: u32,
    max_frame_checks: u32,
    node_selector: &'a str,
}

impl WatchSettings {
    /// Script that installs the context half of the watcher.
    ///
    /// It defines `window.__mindmapWatch(root)`, to be called right after
    /// layout starts, and `window.__mindmapFail(err)` for bootstrap errors.
    pub fn context_script(&self) -> String {
        let settings = ContextSettings {
            warmup_ms: u64::try_from(self.warmup.as_millis()).unwrap_or(u64::MAX),
            min_stable_frames: self.min_stable_frames.max(1),
            max_frame_checks: self.max_frame_checks.max(self.min_stable_frames.max(1)),
            node_selector: NODE_SELECTOR,
        };
        // Serializing a struct of plain numbers and a str cannot fail
        let json = serde_json::to_string(&settings).unwrap_or_else(|_| "{}".to_string());
        CONTEXT_SCRIPT_TEMPLATE.replace("{{SETTINGS}}", &json)
    }
}

/// Host-side view of the render lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    DocumentLoaded,
    AwaitingCompletionFlag,
    CompletionObserved,
    SettleDelay,
    FontsReady,
    Captured,
    TimedOut,
    Failed,
}

impl WatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WatchState::Captured | WatchState::Failed)
    }
}

/// Diagnostics published by the context half
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionReport {
    pub frames: u32,
    pub stable_frames: u32,
    pub degraded: bool,
    pub error: Option<String>,
}

/// Host half of the completion protocol for one render call
#[derive(Debug)]
pub struct CompletionWatcher {
    settings: WatchSettings,
    history: Vec<WatchState>,
}

impl CompletionWatcher {
    pub fn new(settings: WatchSettings) -> Self {
        Self {
            settings,
            history: vec![WatchState::Idle],
        }
    }

    pub fn state(&self) -> WatchState {
        self.history.last().copied().unwrap_or(WatchState::Idle)
    }

    /// Every state visited so far, in order
    pub fn history(&self) -> &[WatchState] {
        &self.history
    }

    fn transition(&mut self, next: WatchState) {
        debug!("Completion watcher: {:?} -> {:?}", self.state(), next);
        self.history.push(next);
    }

    pub fn document_loaded(&mut self) {
        self.transition(WatchState::DocumentLoaded);
    }

    /// Any failure outside the watcher's own wait, e.g. during load or capture
    pub fn fail(&mut self) {
        if !self.state().is_terminal() {
            self.transition(WatchState::Failed);
        }
    }

    pub fn captured(&mut self) {
        self.transition(WatchState::Captured);
    }

    /// Wait for the context to report completion, then settle and wait for
    /// fonts. On success the watcher is in [`WatchState::FontsReady`].
    pub fn await_settled<C>(&mut self, ctx: &mut C, cancel: &CancelToken) -> Result<CompletionReport>
    where
        C: RenderContext + ?Sized,
    {
        let res = self.settle(ctx, cancel);
        if let Err(e) = &res {
            if e.is_timeout() {
                self.transition(WatchState::TimedOut);
            }
            self.fail();
        }
        res
    }

    fn settle<C>(&mut self, ctx: &mut C, cancel: &CancelToken) -> Result<CompletionReport>
    where
        C: RenderContext + ?Sized,
    {
        self.transition(WatchState::AwaitingCompletionFlag);
        ctx.wait_for_function(COMPLETION_PREDICATE, self.settings.completion_timeout, cancel)?;
        self.transition(WatchState::CompletionObserved);

        let report = read_report(ctx)?;
        if let Some(err) = &report.error {
            return Err(Error::RenderError(format!("layout failed inside the rendering context: {}", err)));
        }
        if report.degraded {
            warn!(
                "Layout never stabilised ({} frame checks, {} stable); capturing anyway",
                report.frames, report.stable_frames
            );
        }

        self.transition(WatchState::SettleDelay);
        cancel.sleep(self.settings.settle_delay)?;

        cancel.check()?;
        let fonts = ctx.evaluate(FONTS_READY_EXPR, true)?;
        debug!("Font loading finished with status {:?}", fonts);
        self.transition(WatchState::FontsReady);
        Ok(report)
    }
}

fn read_report<C>(ctx: &mut C) -> Result<CompletionReport>
where
    C: RenderContext + ?Sized,
{
    let parsed = match ctx.evaluate(STATUS_EXPR, false)? {
        Some(serde_json::Value::String(s)) => serde_json::from_str::<Option<CompletionReport>>(&s),
        Some(other) => serde_json::from_value::<Option<CompletionReport>>(other),
        None => Ok(None),
    };
    parsed
        .map(Option::unwrap_or_default)
        .map_err(|e| Error::ScriptError(format!("malformed completion status: {}", e)))
}
