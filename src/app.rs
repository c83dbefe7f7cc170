use crate::audio::AudioSystem;
use crate::canvas::CanvasHandle;
use crate::config::Config;
use crate::display::{HalfBlockPresenter, ScreenFrame, TerminalGuard};
use crate::host::DEFAULT_MODULE_SOURCE;
use crate::module::{PropKind, PropValue};
use crate::session::Session;
use anyhow::Context;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use std::fmt::Write as _;
use std::fs;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};

/// Edit observation: the script file stands in for the editor collaborator.
/// Polled once per frame; a changed mtime delivers the full source text.
struct ScriptWatch {
    path: PathBuf,
    mtime: Option<SystemTime>,
}

impl ScriptWatch {
    fn new(path: PathBuf) -> anyhow::Result<Self> {
        if !path.exists() {
            fs::write(&path, DEFAULT_MODULE_SOURCE)
                .with_context(|| format!("seed script file {}", path.display()))?;
        }
        let mtime = fs::metadata(&path).and_then(|m| m.modified()).ok();
        Ok(Self { path, mtime })
    }

    fn read(&self) -> Option<String> {
        fs::read_to_string(&self.path).ok()
    }

    fn poll(&mut self) -> Option<String> {
        let mtime = fs::metadata(&self.path).and_then(|m| m.modified()).ok()?;
        if self.mtime == Some(mtime) {
            return None;
        }
        self.mtime = Some(mtime);
        self.read()
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct PanelUi {
    open: bool,
    cursor: usize,
}

pub fn run(cfg: Config) -> anyhow::Result<()> {
    // Acquire the microphone before touching the terminal so a failure stays
    // readable. Acquisition failure never starts the loop; it is not a crash.
    let audio = match AudioSystem::new(cfg.device.as_deref()) {
        Ok(a) => a,
        Err(e) => {
            tracing::error!("audio acquisition failed: {e:#}");
            eprintln!("audio unavailable: {e:#}");
            eprintln!("no feature source; the render loop will not start.");
            return Ok(());
        }
    };

    let mut watch = match cfg.script.clone() {
        Some(path) => Some(ScriptWatch::new(path)?),
        None => None,
    };

    let _term = TerminalGuard::new()?;
    let mut out = BufWriter::new(TerminalGuard::stdout());
    let mut presenter = HalfBlockPresenter::new();

    let mut last_size = crossterm::terminal::size().context("get terminal size")?;
    if last_size.0 < 4 || last_size.1 < 3 {
        return Err(anyhow::anyhow!(
            "terminal too small (need at least 4x3, got {}x{})",
            last_size.0,
            last_size.1
        ));
    }

    let mut show_hud = cfg.hud;
    let mut show_help = false;
    let mut panel = PanelUi::default();
    let mut hud_rows = hud_rows_for(last_size, show_hud);

    let canvas = CanvasHandle::new(0, 0);
    resize_canvas(&canvas, last_size, hud_rows);

    let mut session = Session::new(canvas.clone(), Box::new(audio));
    session.start().context("start session")?;

    // The watched file is the live source of truth once present.
    if let Some(w) = &watch {
        if let Some(src) = w.read() {
            session.on_source_edited(&src);
        }
    }

    let start = Instant::now();
    let mut last_frame = start;
    let mut fps = FpsCounter::new();

    loop {
        let now = Instant::now();

        while event::poll(Duration::from_millis(0))? {
            match event::read()? {
                Event::Key(k) if k.kind != KeyEventKind::Release => {
                    if handle_key(
                        k.code,
                        k.modifiers,
                        &mut session,
                        &mut panel,
                        &mut show_hud,
                        &mut show_help,
                        watch.as_ref(),
                    ) {
                        return Ok(());
                    }
                }
                Event::Resize(c, r) => {
                    last_size = (c, r);
                    hud_rows = hud_rows_for(last_size, show_hud);
                    resize_canvas(&canvas, last_size, hud_rows);
                }
                _ => {}
            }
        }

        // Size check once per frame; resize events can be missed.
        let sz = crossterm::terminal::size()?;
        if sz != last_size {
            last_size = sz;
            hud_rows = hud_rows_for(last_size, show_hud);
            resize_canvas(&canvas, last_size, hud_rows);
        }
        let wanted_rows = hud_rows_for(last_size, show_hud);
        if wanted_rows != hud_rows {
            hud_rows = wanted_rows;
            resize_canvas(&canvas, last_size, hud_rows);
        }

        if let Some(w) = watch.as_mut() {
            if let Some(src) = w.poll() {
                session.on_source_edited(&src);
            }
        }

        let dt = now.duration_since(last_frame).as_secs_f32().max(1e-6);
        last_frame = now;

        session.on_frame(dt);
        fps.tick();

        let hud = if show_hud {
            build_hud(&session, fps.fps())
        } else {
            String::new()
        };

        let panel_text = if panel.open {
            Some(build_panel_popup(&session, &mut panel))
        } else {
            None
        };
        let overlay = if let Some(ref text) = panel_text {
            Some(text.as_str())
        } else if show_help {
            Some(help_popup_text())
        } else {
            None
        };

        let (term_cols, term_rows) = last_size;
        let visual_rows = term_rows.saturating_sub(hud_rows).max(1);
        canvas.with_pixels(|pixels, pw, ph| {
            presenter.present(
                &ScreenFrame {
                    term_cols,
                    term_rows,
                    visual_rows,
                    pixel_width: pw,
                    pixel_height: ph,
                    pixels_rgba: pixels,
                    hud: &hud,
                    hud_rows,
                    overlay,
                    sync_updates: cfg.sync_updates,
                },
                &mut out,
            )
        })?;

        // Frame pacing.
        let target = Duration::from_secs_f32(1.0 / cfg.fps.max(1) as f32);
        let elapsed = now.elapsed();
        if elapsed < target {
            std::thread::sleep(target - elapsed);
        }
    }
}

fn hud_rows_for(size: (u16, u16), show_hud: bool) -> u16 {
    if !show_hud {
        return 0;
    }
    let rows = size.1;
    if rows <= 1 {
        return 0;
    }
    (rows - 1).min(2)
}

fn resize_canvas(canvas: &CanvasHandle, size: (u16, u16), hud_rows: u16) {
    let (cols, rows) = size;
    let visual_rows = rows.saturating_sub(hud_rows).max(1);
    // Half-block cells: one column of pixels per cell, two rows.
    canvas.resize(cols as usize, (visual_rows as usize) * 2);
}

fn handle_key(
    code: KeyCode,
    mods: KeyModifiers,
    session: &mut Session,
    panel: &mut PanelUi,
    show_hud: &mut bool,
    show_help: &mut bool,
    watch: Option<&ScriptWatch>,
) -> bool {
    if mods.contains(KeyModifiers::CONTROL) && matches!(code, KeyCode::Char('c')) {
        return true;
    }

    if panel.open {
        let names = session.host().prop_names();
        panel.cursor = panel.cursor.min(names.len().saturating_sub(1));
        match code {
            KeyCode::Char('q') | KeyCode::Char('Q') => return true,
            KeyCode::Esc | KeyCode::Char('p') | KeyCode::Char('P') => panel.open = false,
            KeyCode::Up => panel.cursor = panel.cursor.saturating_sub(1),
            KeyCode::Down => {
                if !names.is_empty() {
                    panel.cursor = (panel.cursor + 1).min(names.len() - 1);
                }
            }
            KeyCode::Left => {
                if let Some(name) = names.get(panel.cursor) {
                    session.host_mut().nudge_prop(name, -1.0);
                }
            }
            KeyCode::Right | KeyCode::Char(' ') | KeyCode::Enter => {
                if let Some(name) = names.get(panel.cursor) {
                    session.host_mut().nudge_prop(name, 1.0);
                }
            }
            _ => {}
        }
        return false;
    }

    match code {
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('Q') => true,
        KeyCode::Char('p') | KeyCode::Char('P') => {
            panel.open = true;
            *show_help = false;
            false
        }
        KeyCode::Char('i') | KeyCode::Char('I') => {
            *show_hud = !*show_hud;
            false
        }
        KeyCode::Char('?') | KeyCode::Char('/') | KeyCode::Char('h') | KeyCode::Char('H')
        | KeyCode::F(1) => {
            *show_help = !*show_help;
            false
        }
        KeyCode::Char('r') | KeyCode::Char('R') => {
            if let Some(w) = watch {
                if let Some(src) = w.read() {
                    session.on_source_edited(&src);
                }
            }
            false
        }
        _ => false,
    }
}

fn build_hud(session: &Session, fps: f32) -> String {
    let module_type = session
        .host()
        .active()
        .map(|m| m.meta.renderer.as_str())
        .unwrap_or("-");
    let props = session.host().prop_names().len();
    let rms = session.features().get("rms").unwrap_or(0.0);
    let energy = session.features().get("energy").unwrap_or(0.0);

    let mut hud = String::new();
    let _ = write!(
        hud,
        "Module: {} | Props: {} | rms {:>5.3} | energy {:>6.2} | t {:>7.1}s | FPS {:>4.1}",
        module_type,
        props,
        rms,
        energy,
        session.elapsed(),
        fps,
    );
    match session.last_error() {
        Some(err) => {
            let line: String = err.chars().take(160).collect();
            let _ = write!(hud, "\nerr: {}", line.replace('\n', " "));
        }
        None => {
            let _ = write!(
                hud,
                "\nKeys: p props | r reload | i HUD | ?/h help | q quit"
            );
        }
    }
    hud
}

fn build_panel_popup(session: &Session, panel: &mut PanelUi) -> String {
    let host = session.host();
    let names = host.prop_names();
    panel.cursor = panel.cursor.min(names.len().saturating_sub(1));

    let mut lines = Vec::new();
    lines.push("Module Properties".to_string());
    if names.is_empty() {
        lines.push("(no editable properties)".to_string());
    }
    for (i, name) in names.iter().enumerate() {
        let Some(value) = host.prop(name) else {
            continue;
        };
        let cursor = if i == panel.cursor { '>' } else { ' ' };
        let kind = match value.kind() {
            PropKind::Number => "num",
            PropKind::Text => "txt",
            PropKind::Bool => "bool",
        };
        let shown = match value {
            PropValue::Number(n) => format!("{n:>10.3}"),
            other => format!("{:>10}", other.label()),
        };
        lines.push(format!("{cursor} {name:<16} {shown}  [{kind}]"));
    }
    lines.push(String::new());
    lines.push("up/down select | left/right adjust (bools toggle) | p/esc close".to_string());
    lines.join("\n")
}

fn help_popup_text() -> &'static str {
    "Live Visualizer Hotkeys\n\
p  open/close the property panel\n\
Property panel keys:\n\
  up/down  select property\n\
  left/right  adjust number / toggle bool\n\
  esc or p  close panel\n\
r  reload the script file now\n\
i  show/hide HUD\n\
? or / or h or F1  toggle this help\n\
q or esc  quit\n\
\n\
Edit the watched script file in any editor; every save\n\
re-evaluates the module. A bad edit keeps the last good\n\
module running and shows the error on the HUD."
}

struct FpsCounter {
    last: Instant,
    frames: u32,
    fps: f32,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            last: Instant::now(),
            frames: 0,
            fps: 0.0,
        }
    }

    fn tick(&mut self) {
        self.frames += 1;
        let now = Instant::now();
        let dt = now.duration_since(self.last).as_secs_f32();
        if dt >= 0.5 {
            self.fps = (self.frames as f32) / dt;
            self.frames = 0;
            self.last = now;
        }
    }

    fn fps(&self) -> f32 {
        self.fps
    }
}
