mod two_d;

pub use two_d::TwoDRenderer;

use crate::audio::{FeatureSnapshot, FEATURE_NAMES};
use crate::canvas::CanvasHandle;
use crate::module::ModuleHandle;
use crate::script::ScriptProvider;
use std::collections::{BTreeMap, HashSet};

/// Everything one dispatch needs, rebuilt every tick.
pub struct FrameContext<'a> {
    pub canvas: &'a CanvasHandle,
    pub features: &'a FeatureSnapshot,
    pub time: f64,
    pub dt: f32,
    pub module: &'a ModuleHandle,
    pub scripts: &'a ScriptProvider,
}

pub trait ModuleRenderer {
    fn name(&self) -> &'static str;
    fn render(&mut self, ctx: &mut FrameContext<'_>) -> anyhow::Result<()>;
}

/// Type-tag → renderer mapping. A module whose tag has no registered
/// renderer is skipped, not an error; the skip is logged once per tag.
pub struct RendererRegistry {
    renderers: BTreeMap<&'static str, Box<dyn ModuleRenderer>>,
    unknown_seen: HashSet<String>,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self {
            renderers: BTreeMap::new(),
            unknown_seen: HashSet::new(),
        }
    }

    pub fn register(&mut self, renderer: Box<dyn ModuleRenderer>) {
        self.renderers.insert(renderer.name(), renderer);
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.renderers.contains_key(type_tag)
    }

    /// Ok(true) when a renderer ran, Ok(false) when the tag is unregistered.
    pub fn dispatch(
        &mut self,
        type_tag: &str,
        ctx: &mut FrameContext<'_>,
    ) -> anyhow::Result<bool> {
        let Some(renderer) = self.renderers.get_mut(type_tag) else {
            if self.unknown_seen.insert(type_tag.to_string()) {
                tracing::warn!("no renderer registered for module type '{type_tag}'");
            }
            return Ok(false);
        };
        renderer.render(ctx)?;
        Ok(true)
    }
}

impl Default for RendererRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the script-facing context map for a draw call. The canonical feature
/// names are always present (0.0 when the snapshot lacks them) so an empty
/// snapshot cannot fault module arithmetic.
pub fn script_context(
    canvas: &CanvasHandle,
    features: &FeatureSnapshot,
    time: f64,
    dt: f32,
    module: &ModuleHandle,
) -> rhai::Map {
    let (w, h) = canvas.size();

    let mut feat = rhai::Map::new();
    for name in FEATURE_NAMES {
        feat.insert((*name).into(), rhai::Dynamic::from(0.0f64));
    }
    for (name, value) in features.iter() {
        feat.insert(name.into(), rhai::Dynamic::from(value as f64));
    }

    let mut ctx = rhai::Map::new();
    ctx.insert("canvas".into(), rhai::Dynamic::from(canvas.clone()));
    ctx.insert("width".into(), rhai::Dynamic::from(w as f64));
    ctx.insert("height".into(), rhai::Dynamic::from(h as f64));
    ctx.insert("time".into(), rhai::Dynamic::from(time));
    ctx.insert("dt".into(), rhai::Dynamic::from(dt as f64));
    ctx.insert("features".into(), rhai::Dynamic::from(feat));
    ctx.insert("props".into(), rhai::Dynamic::from(module.props_map()));
    ctx
}
