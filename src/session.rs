use crate::audio::{FeatureSnapshot, FeatureSource, FEATURE_NAMES};
use crate::canvas::CanvasHandle;
use crate::host::{ModuleHost, DEFAULT_MODULE_SOURCE};
use crate::render::{FrameContext, RendererRegistry, TwoDRenderer};
use anyhow::Context;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Before the feature source has started; no ticks are dispatched. This
    /// state is terminal when audio acquisition failed.
    Idle,
    Running,
}

/// Owns the whole pipeline: primary canvas, renderer registry, module host,
/// feature source, and the elapsed-time accumulator. The runtime drives it
/// through `start`, `on_frame`, and `on_source_edited`.
pub struct Session {
    canvas: CanvasHandle,
    registry: RendererRegistry,
    host: ModuleHost,
    features: Box<dyn FeatureSource>,
    state: SessionState,
    time: f64,
    last_features: FeatureSnapshot,
    last_draw_error: Option<String>,
}

impl Session {
    pub fn new(canvas: CanvasHandle, features: Box<dyn FeatureSource>) -> Self {
        let mut registry = RendererRegistry::new();
        registry.register(Box::new(TwoDRenderer::new()));

        Self {
            canvas,
            registry,
            host: ModuleHost::new(),
            features,
            state: SessionState::Idle,
            time: 0.0,
            last_features: FeatureSnapshot::empty(),
            last_draw_error: None,
        }
    }

    /// Start the feature source and transition Idle → Running, then install
    /// the initial default module. The transition happens only on a
    /// successful start; on failure the session stays Idle for good.
    pub fn start(&mut self) -> anyhow::Result<()> {
        self.features.start().context("start feature source")?;
        self.state = SessionState::Running;
        // The default module shipping broken would be a bug in this crate,
        // not a reason to refuse startup; it is logged like any bad edit.
        let _ = self.host.install_from_source(DEFAULT_MODULE_SOURCE);
        Ok(())
    }

    /// Edit path: called with the full source text on every observed change.
    /// Failures keep the last good module and are surfaced via `last_error`.
    pub fn on_source_edited(&mut self, source: &str) {
        if self.host.install_from_source(source).is_ok() {
            self.last_draw_error = None;
        }
    }

    /// One tick. Clears the primary canvas, pulls the newest feature
    /// snapshot, advances elapsed time, and dispatches every active module
    /// with a registered renderer. Each dispatch is guarded: a failing draw
    /// is logged and the rest of the tick proceeds.
    pub fn on_frame(&mut self, dt: f32) {
        if self.state != SessionState::Running {
            return;
        }

        self.canvas.clear();

        let features = self
            .features
            .get(FEATURE_NAMES)
            .unwrap_or_else(FeatureSnapshot::empty);

        self.time += dt as f64;

        self.last_features = features.clone();

        for module in self.host.modules() {
            let mut ctx = FrameContext {
                canvas: &self.canvas,
                features: &features,
                time: self.time,
                dt,
                module,
                scripts: self.host.scripts(),
            };
            match self.registry.dispatch(&module.meta.renderer, &mut ctx) {
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("module draw failed: {e:#}");
                    self.last_draw_error = Some(format!("{e:#}"));
                }
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn elapsed(&self) -> f64 {
        self.time
    }

    /// Snapshot used by the most recent tick; for HUD display.
    pub fn features(&self) -> &FeatureSnapshot {
        &self.last_features
    }

    pub fn canvas(&self) -> &CanvasHandle {
        &self.canvas
    }

    pub fn host(&self) -> &ModuleHost {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut ModuleHost {
        &mut self.host
    }

    pub fn registry_mut(&mut self) -> &mut RendererRegistry {
        &mut self.registry
    }

    /// Most recent error worth showing on the HUD: a rejected edit wins over
    /// an older draw failure.
    pub fn last_error(&self) -> Option<&str> {
        self.host.last_error().or(self.last_draw_error.as_deref())
    }
}
