use crate::canvas::{CanvasHandle, CompositeOp};
use crate::module::{ModuleHandle, ModuleMeta, PropValue};
use noise::{NoiseFn, Perlin};
use rhai::{Dynamic, Engine, FnPtr, ImmutableString, Map};
use std::collections::BTreeMap;
use thiserror::Error;

/// Script-seam failures, flattened to plain messages: rhai's error values
/// hold interpreter state that may not cross threads, and callers only ever
/// log or display these.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("module source failed to parse: {0}")]
    Parse(String),
    #[error("module source failed to evaluate: {0}")]
    Eval(String),
    #[error("module draw failed: {0}")]
    Draw(String),
    #[error("{0}")]
    Shape(&'static str),
}

/// The concrete script strategy behind the compile seam: a rhai engine with
/// the canvas surface, math constants, and a seeded gradient-noise function
/// registered. The host depends only on `compile` and `call_draw`.
pub struct ScriptProvider {
    engine: Engine,
}

impl ScriptProvider {
    pub fn new() -> Self {
        let mut engine = Engine::new();

        engine
            .register_type_with_name::<CanvasHandle>("Canvas")
            .register_fn("clear", |c: &mut CanvasHandle| c.clear())
            .register_fn("save", |c: &mut CanvasHandle| c.save())
            .register_fn("restore", |c: &mut CanvasHandle| c.restore())
            .register_fn("begin_path", |c: &mut CanvasHandle| c.begin_path())
            .register_fn("close_path", |c: &mut CanvasHandle| c.close_path())
            .register_fn("stroke", |c: &mut CanvasHandle| c.stroke())
            .register_fn("move_to", |c: &mut CanvasHandle, x: f64, y: f64| {
                c.move_to(x as f32, y as f32)
            })
            .register_fn("line_to", |c: &mut CanvasHandle, x: f64, y: f64| {
                c.line_to(x as f32, y as f32)
            })
            .register_fn(
                "arc",
                |c: &mut CanvasHandle, cx: f64, cy: f64, r: f64, a0: f64, a1: f64| {
                    c.arc(cx as f32, cy as f32, r as f32, a0 as f32, a1 as f32)
                },
            )
            .register_fn(
                "fill_rect",
                |c: &mut CanvasHandle, x: f64, y: f64, w: f64, h: f64| {
                    c.fill_rect(x as f32, y as f32, w as f32, h as f32)
                },
            )
            .register_set("stroke_style", |c: &mut CanvasHandle, v: ImmutableString| {
                c.set_stroke_style(&v)
            })
            .register_set("fill_style", |c: &mut CanvasHandle, v: ImmutableString| {
                c.set_fill_style(&v)
            })
            .register_set("line_width", |c: &mut CanvasHandle, v: f64| {
                c.set_line_width(v as f32)
            })
            .register_set("global_alpha", |c: &mut CanvasHandle, v: f64| {
                c.set_global_alpha(v as f32)
            })
            .register_set("composite", |c: &mut CanvasHandle, v: ImmutableString| {
                c.set_composite(CompositeOp::from_name(&v))
            })
            .register_get("width", |c: &mut CanvasHandle| c.size().0 as f64)
            .register_get("height", |c: &mut CanvasHandle| c.size().1 as f64);

        // 2-D gradient noise, freshly seeded per provider so restarted
        // sessions drift differently.
        let perlin = Perlin::new(fastrand::u32(..));
        engine.register_fn("noise", move |x: f64, y: f64| perlin.get([x, y]));

        let mut consts = rhai::Module::new();
        consts.set_var("PI", std::f64::consts::PI);
        consts.set_var("TAU", std::f64::consts::TAU);
        engine.register_global_module(consts.into());

        Self { engine }
    }

    /// Evaluate `source` as a single module-map expression. Statements are
    /// rejected at parse time; any runtime fault during evaluation is
    /// returned, never propagated as a panic.
    pub fn compile(&self, source: &str) -> Result<ModuleHandle, ScriptError> {
        let ast = self
            .engine
            .compile_expression(source)
            .map_err(|e| ScriptError::Parse(e.to_string()))?;
        let value: Dynamic = self
            .engine
            .eval_ast(&ast)
            .map_err(|e| ScriptError::Eval(e.to_string()))?;
        let map = value
            .try_cast::<Map>()
            .ok_or(ScriptError::Shape("module source must evaluate to an object map"))?;

        let meta = parse_meta(&map)?;
        let props = parse_props(&map);
        let draw = map
            .get("draw")
            .and_then(|d| d.clone().try_cast::<FnPtr>())
            .ok_or(ScriptError::Shape("module has no draw closure"))?;

        Ok(ModuleHandle {
            meta,
            props,
            draw,
            ast,
        })
    }

    /// Invoke a module's draw closure with the per-frame context map.
    pub fn call_draw(&self, module: &ModuleHandle, ctx: Map) -> Result<(), ScriptError> {
        module
            .draw
            .call::<Dynamic>(&self.engine, &module.ast, (ctx,))
            .map(|_| ())
            .map_err(|e| ScriptError::Draw(e.to_string()))
    }
}

impl Default for ScriptProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_meta(map: &Map) -> Result<ModuleMeta, ScriptError> {
    let meta = map
        .get("meta")
        .and_then(|d| d.clone().try_cast::<Map>())
        .ok_or(ScriptError::Shape("module has no meta map"))?;

    let renderer = meta
        .get("type")
        .and_then(|d| d.clone().into_string().ok())
        .ok_or(ScriptError::Shape("module meta has no type tag"))?;

    let alpha = meta.get("alpha").and_then(as_number).map(|a| {
        (a as f32).clamp(0.0, 1.0)
    });

    let composite = meta
        .get("composite")
        .or_else(|| meta.get("compositeOperation"))
        .and_then(|d| d.clone().into_string().ok())
        .map(|s| CompositeOp::from_name(&s));

    Ok(ModuleMeta {
        renderer,
        alpha,
        composite,
    })
}

fn parse_props(map: &Map) -> BTreeMap<String, PropValue> {
    let mut props = BTreeMap::new();
    let Some(src) = map.get("props").and_then(|d| d.clone().try_cast::<Map>()) else {
        return props;
    };
    for (name, value) in &src {
        match PropValue::from_dynamic(value) {
            Some(v) => {
                props.insert(name.to_string(), v);
            }
            None => {
                tracing::debug!("skipping non-scalar prop '{name}'");
            }
        }
    }
    props
}

fn as_number(d: &Dynamic) -> Option<f64> {
    d.as_float().ok().or_else(|| d.as_int().ok().map(|i| i as f64))
}
