use live_visualizer::audio::{FeatureBlock, FeatureSnapshot, FeatureSource};
use live_visualizer::canvas::CanvasHandle;
use live_visualizer::module::PropValue;
use live_visualizer::session::{Session, SessionState};
use std::cell::RefCell;
use std::rc::Rc;

/// Feature source with externally scripted output: `None` simulates an
/// analyzer that has produced nothing yet.
#[derive(Clone)]
struct SharedBlock(Rc<RefCell<Option<FeatureBlock>>>);

struct FakeSource {
    started: Rc<RefCell<bool>>,
    block: SharedBlock,
}

impl FeatureSource for FakeSource {
    fn start(&mut self) -> anyhow::Result<()> {
        *self.started.borrow_mut() = true;
        Ok(())
    }

    fn get(&self, names: &[&str]) -> Option<FeatureSnapshot> {
        let block = (*self.block.0.borrow())?;
        let mut snap = FeatureSnapshot::empty();
        for name in names {
            if let Some(v) = block.value(name) {
                snap.insert(name, v);
            }
        }
        Some(snap)
    }
}

struct FailingSource;

impl FeatureSource for FailingSource {
    fn start(&mut self) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("microphone unavailable"))
    }

    fn get(&self, _names: &[&str]) -> Option<FeatureSnapshot> {
        None
    }
}

fn session_with_block(w: usize, h: usize) -> (Session, SharedBlock, Rc<RefCell<bool>>) {
    let block = SharedBlock(Rc::new(RefCell::new(None)));
    let started = Rc::new(RefCell::new(false));
    let source = FakeSource {
        started: Rc::clone(&started),
        block: block.clone(),
    };
    let canvas = CanvasHandle::new(w, h);
    let session = Session::new(canvas, Box::new(source));
    (session, block, started)
}

fn painted(session: &Session) -> bool {
    session
        .canvas()
        .copy_pixels()
        .chunks_exact(4)
        .any(|px| px[3] != 0)
}

const WHITE_FILL: &str = r##"#{
  meta: #{ type: "2d" },
  props: #{ pad: 0.0 },
  draw: |ctx| {
    let c = ctx.canvas;
    c.fill_style = "#ffffff";
    c.fill_rect(ctx.props.pad, 0.0, ctx.width - ctx.props.pad, ctx.height);
  },
}"##;

const RMS_GATED: &str = r##"#{
  meta: #{ type: "2d" },
  draw: |ctx| {
    if ctx.features.rms > 0.5 {
      let c = ctx.canvas;
      c.fill_style = "#fff";
      c.fill_rect(0.0, 0.0, ctx.width, ctx.height);
    }
  },
}"##;

// ── Lifecycle ───────────────────────────────────────────────────────────────

#[test]
fn session_is_idle_until_started() {
    let (mut session, _block, started) = session_with_block(8, 8);
    assert_eq!(session.state(), SessionState::Idle);

    // Ticks before start are ignored entirely.
    session.on_frame(0.016);
    assert_eq!(session.elapsed(), 0.0);
    assert!(!painted(&session));

    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Running);
    assert!(*started.borrow());
}

#[test]
fn start_installs_the_default_module() {
    let (mut session, _block, _started) = session_with_block(32, 16);
    session.start().unwrap();
    let module = session.host().active().expect("default module installed");
    assert_eq!(module.meta.renderer, "2d");
}

#[test]
fn failed_audio_start_leaves_session_idle() {
    let canvas = CanvasHandle::new(8, 8);
    let mut session = Session::new(canvas, Box::new(FailingSource));
    assert!(session.start().is_err());
    assert_eq!(session.state(), SessionState::Idle);

    session.on_frame(0.016);
    assert_eq!(session.elapsed(), 0.0);
}

// ── Ticking ─────────────────────────────────────────────────────────────────

#[test]
fn elapsed_time_accumulates_per_tick() {
    let (mut session, _block, _started) = session_with_block(8, 8);
    session.start().unwrap();
    session.on_source_edited(WHITE_FILL);

    for _ in 0..3 {
        session.on_frame(0.016);
    }
    assert!((session.elapsed() - 0.048).abs() < 1e-6);
}

#[test]
fn missing_snapshot_becomes_empty_mapping() {
    let (mut session, block, _started) = session_with_block(8, 8);
    session.start().unwrap();
    session.on_source_edited(RMS_GATED);

    // Source returns None: the tick must still run, with rms read as 0.
    assert!(block.0.borrow().is_none());
    session.on_frame(0.016);
    assert!(session.features().is_empty());
    assert!(!painted(&session));
    assert!(session.last_error().is_none(), "absence is not an error");
}

#[test]
fn live_features_reach_the_draw_routine() {
    let (mut session, block, _started) = session_with_block(8, 8);
    session.start().unwrap();
    session.on_source_edited(RMS_GATED);

    *block.0.borrow_mut() = Some(FeatureBlock {
        rms: 0.9,
        energy: 12.0,
        ..FeatureBlock::default()
    });
    session.on_frame(0.016);
    assert!(painted(&session), "rms above threshold must draw");

    *block.0.borrow_mut() = Some(FeatureBlock {
        rms: 0.1,
        ..FeatureBlock::default()
    });
    session.on_frame(0.016);
    assert!(!painted(&session), "each tick reads the newest snapshot");
}

#[test]
fn tick_clears_before_drawing() {
    let (mut session, _block, _started) = session_with_block(8, 8);
    session.start().unwrap();
    session.on_source_edited(WHITE_FILL);
    session.on_frame(0.016);
    assert!(painted(&session));

    // A module that stops painting leaves a cleared canvas, not stale pixels.
    session.on_source_edited(
        r##"#{ meta: #{ type: "2d" }, draw: |ctx| {} }"##,
    );
    session.on_frame(0.016);
    assert!(!painted(&session));
}

// ── Hot reload ──────────────────────────────────────────────────────────────

#[test]
fn bad_edit_keeps_last_good_module_drawing() {
    let (mut session, _block, _started) = session_with_block(8, 8);
    session.start().unwrap();
    session.on_source_edited(WHITE_FILL);
    session
        .host_mut()
        .set_prop("pad", PropValue::Number(2.0));

    session.on_source_edited("#{ this is not a module");
    assert!(session.last_error().is_some());

    // Old module, old edited props, still rendering.
    assert_eq!(
        session.host().prop("pad"),
        Some(&PropValue::Number(2.0))
    );
    session.on_frame(0.016);
    assert!(painted(&session));
}

#[test]
fn unknown_module_type_is_skipped_silently() {
    let (mut session, _block, _started) = session_with_block(8, 8);
    session.start().unwrap();
    session.on_source_edited(
        r##"#{
          meta: #{ type: "3d" },
          draw: |ctx| {
            let c = ctx.canvas;
            c.fill_style = "#fff";
            c.fill_rect(0.0, 0.0, ctx.width, ctx.height);
          },
        }"##,
    );
    session.on_frame(0.016);
    assert!(!painted(&session), "no renderer for the tag, no drawing");
    assert!(session.last_error().is_none());
}

#[test]
fn throwing_draw_is_guarded_per_tick() {
    let (mut session, _block, _started) = session_with_block(8, 8);
    session.start().unwrap();
    session.on_source_edited(
        r##"#{ meta: #{ type: "2d" }, draw: |ctx| { throw "bad frame"; } }"##,
    );

    session.on_frame(0.016);
    assert!(session.last_error().is_some());

    // The loop keeps ticking and recovers as soon as a good edit lands.
    session.on_frame(0.016);
    assert!((session.elapsed() - 0.032).abs() < 1e-6);
    session.on_source_edited(WHITE_FILL);
    session.on_frame(0.016);
    assert!(painted(&session));
    assert!(session.last_error().is_none());
}

// ── Property panel binding ──────────────────────────────────────────────────

#[test]
fn prop_edits_between_ticks_are_observed_by_draw() {
    let (mut session, _block, _started) = session_with_block(16, 8);
    session.start().unwrap();
    session.on_source_edited(WHITE_FILL);

    session.on_frame(0.016);
    assert_ne!(session.canvas().pixel(1, 4).a, 0, "pad 0 covers column 1");

    // Mutate the live value through the panel path; next tick must see it.
    assert!(session.host_mut().set_prop("pad", PropValue::Number(8.0)));
    session.on_frame(0.016);
    assert_eq!(session.canvas().pixel(1, 4).a, 0, "pad 8 leaves column 1 clear");
    assert_ne!(session.canvas().pixel(12, 4).a, 0);
}
