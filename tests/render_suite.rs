use live_visualizer::audio::FeatureSnapshot;
use live_visualizer::canvas::CanvasHandle;
use live_visualizer::module::ModuleHandle;
use live_visualizer::render::{FrameContext, ModuleRenderer, RendererRegistry, TwoDRenderer};
use live_visualizer::script::ScriptProvider;
use std::cell::RefCell;
use std::rc::Rc;

const WHITE_FILL: &str = r##"#{
  meta: #{ type: "2d" },
  draw: |ctx| {
    let c = ctx.canvas;
    c.fill_style = "#ffffff";
    c.fill_rect(0.0, 0.0, ctx.width, ctx.height);
  },
}"##;

const HALF_ALPHA_FILL: &str = r##"#{
  meta: #{ type: "2d", alpha: 0.5 },
  draw: |ctx| {
    let c = ctx.canvas;
    c.fill_style = "#ffffff";
    c.fill_rect(0.0, 0.0, ctx.width, ctx.height);
  },
}"##;

const EMPTY_DRAW: &str = r##"#{
  meta: #{ type: "2d" },
  draw: |ctx| {},
}"##;

const THROWING_DRAW: &str = r##"#{
  meta: #{ type: "2d" },
  draw: |ctx| {
    throw "exploded mid-frame";
  },
}"##;

const LEAKY_STATE_DRAW: &str = r##"#{
  meta: #{ type: "2d" },
  draw: |ctx| {
    let c = ctx.canvas;
    c.global_alpha = 0.0;
    c.composite = "multiply";
    c.stroke_style = "#123123";
  },
}"##;

fn compile(scripts: &ScriptProvider, src: &str) -> ModuleHandle {
    scripts.compile(src).unwrap()
}

fn render_once(
    renderer: &mut TwoDRenderer,
    scripts: &ScriptProvider,
    primary: &CanvasHandle,
    module: &ModuleHandle,
) -> anyhow::Result<()> {
    let features = FeatureSnapshot::empty();
    let mut ctx = FrameContext {
        canvas: primary,
        features: &features,
        time: 0.0,
        dt: 1.0 / 60.0,
        module,
        scripts,
    };
    renderer.render(&mut ctx)
}

fn fill_primary(primary: &CanvasHandle, style: &str) {
    primary.set_fill_style(style);
    let (w, h) = primary.size();
    primary.fill_rect(0.0, 0.0, w as f32, h as f32);
}

// ── Registry ────────────────────────────────────────────────────────────────

struct RecordingRenderer {
    calls: Rc<RefCell<u32>>,
}

impl ModuleRenderer for RecordingRenderer {
    fn name(&self) -> &'static str {
        "rec"
    }

    fn render(&mut self, _ctx: &mut FrameContext<'_>) -> anyhow::Result<()> {
        *self.calls.borrow_mut() += 1;
        Ok(())
    }
}

#[test]
fn dispatch_runs_the_matching_renderer() {
    let scripts = ScriptProvider::new();
    let module = compile(
        &scripts,
        r##"#{ meta: #{ type: "rec" }, draw: |ctx| {} }"##,
    );
    let primary = CanvasHandle::new(8, 8);
    let features = FeatureSnapshot::empty();

    let calls = Rc::new(RefCell::new(0u32));
    let mut registry = RendererRegistry::new();
    registry.register(Box::new(RecordingRenderer {
        calls: Rc::clone(&calls),
    }));
    assert!(registry.contains("rec"));

    let mut ctx = FrameContext {
        canvas: &primary,
        features: &features,
        time: 0.0,
        dt: 0.016,
        module: &module,
        scripts: &scripts,
    };
    assert!(registry.dispatch("rec", &mut ctx).unwrap());
    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn dispatch_skips_unknown_type_without_error() {
    let scripts = ScriptProvider::new();
    let module = compile(
        &scripts,
        r##"#{ meta: #{ type: "mystery" }, draw: |ctx| {} }"##,
    );
    let primary = CanvasHandle::new(8, 8);
    let features = FeatureSnapshot::empty();

    let mut registry = RendererRegistry::new();
    registry.register(Box::new(TwoDRenderer::new()));

    let mut ctx = FrameContext {
        canvas: &primary,
        features: &features,
        time: 0.0,
        dt: 0.016,
        module: &module,
        scripts: &scripts,
    };
    let ran = registry.dispatch("mystery", &mut ctx).unwrap();
    assert!(!ran);
    assert!(primary.copy_pixels().iter().all(|&b| b == 0), "nothing drawn");
}

// ── 2D renderer ─────────────────────────────────────────────────────────────

#[test]
fn module_draw_reaches_the_primary_canvas() {
    let scripts = ScriptProvider::new();
    let module = compile(&scripts, WHITE_FILL);
    let primary = CanvasHandle::new(16, 8);
    let mut renderer = TwoDRenderer::new();

    render_once(&mut renderer, &scripts, &primary, &module).unwrap();
    let px = primary.pixel(8, 4);
    assert_eq!((px.r, px.g, px.b, px.a), (255, 255, 255, 255));
}

#[test]
fn offscreen_buffer_tracks_primary_size_across_resizes() {
    let scripts = ScriptProvider::new();
    let module = compile(&scripts, EMPTY_DRAW);
    let primary = CanvasHandle::new(64, 32);
    let mut renderer = TwoDRenderer::new();

    render_once(&mut renderer, &scripts, &primary, &module).unwrap();
    assert_eq!(renderer.buffer_size(), (64, 32));

    primary.resize(80, 48);
    render_once(&mut renderer, &scripts, &primary, &module).unwrap();
    assert_eq!(renderer.buffer_size(), (80, 48));
}

#[test]
fn compositing_with_defaults_leaves_primary_state_untouched() {
    let scripts = ScriptProvider::new();
    let module = compile(&scripts, WHITE_FILL);
    let primary = CanvasHandle::new(16, 8);
    primary.set_stroke_style("#ff00ff");
    let before = primary.state_snapshot();

    let mut renderer = TwoDRenderer::new();
    render_once(&mut renderer, &scripts, &primary, &module).unwrap();

    assert_eq!(primary.state_snapshot(), before);
}

#[test]
fn empty_draw_preserves_prior_primary_content() {
    let scripts = ScriptProvider::new();
    let module = compile(&scripts, EMPTY_DRAW);
    let primary = CanvasHandle::new(8, 8);
    fill_primary(&primary, "#ff0000");

    let mut renderer = TwoDRenderer::new();
    render_once(&mut renderer, &scripts, &primary, &module).unwrap();

    // The off-screen buffer starts from a copy of the primary, so a module
    // that draws nothing composites the same content straight back.
    let px = primary.pixel(4, 4);
    assert_eq!((px.r, px.a), (255, 255));
}

#[test]
fn half_alpha_module_composites_fifty_fifty() {
    let scripts = ScriptProvider::new();
    let module = compile(&scripts, HALF_ALPHA_FILL);
    let primary = CanvasHandle::new(8, 8);
    fill_primary(&primary, "rgb(100, 100, 100)");

    let mut renderer = TwoDRenderer::new();
    render_once(&mut renderer, &scripts, &primary, &module).unwrap();

    let px = primary.pixel(4, 4);
    assert!(
        (px.r as i32 - 178).abs() <= 2,
        "expected ~50% blend of white over gray, got {}",
        px.r
    );
}

#[test]
fn throwing_draw_returns_error_and_keeps_primary_state_clean() {
    let scripts = ScriptProvider::new();
    let module = compile(&scripts, THROWING_DRAW);
    let primary = CanvasHandle::new(8, 8);
    let before = primary.state_snapshot();

    let mut renderer = TwoDRenderer::new();
    let err = render_once(&mut renderer, &scripts, &primary, &module).unwrap_err();
    assert!(format!("{err:#}").contains("exploded"));
    assert_eq!(primary.state_snapshot(), before);
}

#[test]
fn module_state_changes_do_not_leak_into_later_frames() {
    let scripts = ScriptProvider::new();
    let leaky = compile(&scripts, LEAKY_STATE_DRAW);
    let fill = compile(&scripts, WHITE_FILL);
    let primary = CanvasHandle::new(8, 8);
    let mut renderer = TwoDRenderer::new();

    render_once(&mut renderer, &scripts, &primary, &leaky).unwrap();
    primary.clear();
    render_once(&mut renderer, &scripts, &primary, &fill).unwrap();

    // If the leaky module's zero alpha had survived in the buffer state, the
    // later fill would be invisible.
    assert_eq!(primary.pixel(4, 4).r, 255);
}

#[test]
fn script_sees_canvas_dimensions_and_time() {
    let scripts = ScriptProvider::new();
    let module = compile(
        &scripts,
        r##"#{
          meta: #{ type: "2d" },
          draw: |ctx| {
            let c = ctx.canvas;
            c.fill_style = "#fff";
            // one pixel in the last column, row picked from the time value
            c.fill_rect(ctx.width - 1.0, ctx.time, 1.0, 1.0);
          },
        }"##,
    );
    let primary = CanvasHandle::new(10, 10);
    let features = FeatureSnapshot::empty();
    let mut renderer = TwoDRenderer::new();
    let mut ctx = FrameContext {
        canvas: &primary,
        features: &features,
        time: 3.0,
        dt: 0.016,
        module: &module,
        scripts: &scripts,
    };
    renderer.render(&mut ctx).unwrap();
    assert_eq!(primary.pixel(9, 3).r, 255);
    assert_eq!(primary.pixel(9, 4).a, 0);
}
