use anyhow::Context;
use crossterm::{
    cursor,
    terminal::{self, ClearType},
    ExecutableCommand,
};
use std::io::{stdout, Stdout, Write};

/// Raw-mode/alternate-screen guard. Created before any drawing; Drop
/// restores the terminal even when setup or the run loop bails early.
pub struct TerminalGuard {
    _private: (),
}

impl TerminalGuard {
    pub fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode().context("enable raw mode")?;
        let guard = Self { _private: () };

        let mut out = stdout();
        out.execute(terminal::EnterAlternateScreen)
            .context("enter alternate screen")?;
        out.execute(terminal::Clear(ClearType::All))
            .context("clear screen")?;
        out.execute(cursor::Hide).context("hide cursor")?;

        Ok(guard)
    }

    pub fn stdout() -> Stdout {
        stdout()
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut out = stdout();
        let _ = out.write_all(b"\x1b[?2026l\x1b[?7h\x1b[0m");
        let _ = out.flush();
        let _ = out.execute(cursor::Show);
        let _ = out.execute(terminal::LeaveAlternateScreen);
    }
}

/// One presented frame: the primary canvas pixels plus HUD and an optional
/// centered overlay (help or the property panel).
pub struct ScreenFrame<'a> {
    pub term_cols: u16,
    pub term_rows: u16,
    pub visual_rows: u16,
    pub pixel_width: usize,
    pub pixel_height: usize,
    pub pixels_rgba: &'a [u8],
    pub hud: &'a str,
    pub hud_rows: u16,
    pub overlay: Option<&'a str>,
    pub sync_updates: bool,
}

/// Truecolor half-block presenter: every character cell shows two vertically
/// stacked pixels. Canvas pixels carry alpha; they are composited over the
/// black backdrop before being emitted.
pub struct HalfBlockPresenter {
    last_fg: Option<(u8, u8, u8)>,
    last_bg: Option<(u8, u8, u8)>,
}

impl HalfBlockPresenter {
    pub fn new() -> Self {
        Self {
            last_fg: None,
            last_bg: None,
        }
    }

    pub fn present(&mut self, frame: &ScreenFrame<'_>, out: &mut dyn Write) -> anyhow::Result<()> {
        let cols = frame.term_cols as usize;
        let visual_rows = frame.visual_rows as usize;
        let w = frame.pixel_width;
        let h = frame.pixel_height;

        if cols == 0 || visual_rows == 0 || w == 0 || h == 0 {
            return Ok(());
        }
        if w != cols || h != visual_rows.saturating_mul(2) {
            // Size changed mid-frame; skip rather than index out of bounds.
            return Ok(());
        }
        if frame.pixels_rgba.len() < w * h * 4 {
            return Ok(());
        }

        if frame.sync_updates {
            out.write_all(b"\x1b[?2026h")?;
        }

        // Home, reset, autowrap off while painting full-width rows.
        out.write_all(b"\x1b[H\x1b[0m\x1b[?7l")?;
        self.last_fg = None;
        self.last_bg = None;

        const HALF_BLOCK: char = '\u{2580}';

        for row in 0..visual_rows {
            let top_y = row * 2;
            let bot_y = top_y + 1;
            for x in 0..cols {
                let top = over_black(frame.pixels_rgba, (top_y * w + x) * 4);
                let bot = over_black(frame.pixels_rgba, (bot_y * w + x) * 4);

                if self.last_fg != Some(top) {
                    write!(out, "\x1b[38;2;{};{};{}m", top.0, top.1, top.2)?;
                    self.last_fg = Some(top);
                }
                if self.last_bg != Some(bot) {
                    write!(out, "\x1b[48;2;{};{};{}m", bot.0, bot.1, bot.2)?;
                    self.last_bg = Some(bot);
                }
                write!(out, "{HALF_BLOCK}")?;
            }
            out.write_all(b"\r\n")?;
        }

        let mut hud_lines = frame.hud.lines();
        for i in 0..(frame.hud_rows as usize) {
            write!(out, "\x1b[{};1H\x1b[0m\x1b[2K", visual_rows + i + 1)?;
            if let Some(line) = hud_lines.next() {
                let clipped: String = line.chars().take(cols).collect();
                write!(out, "{clipped}")?;
            }
        }

        if let Some(text) = frame.overlay {
            draw_overlay_popup(out, frame.term_cols, frame.term_rows, text)?;
        }

        out.write_all(b"\x1b[?7h")?;
        if frame.sync_updates {
            out.write_all(b"\x1b[?2026l")?;
        }
        out.flush()?;
        Ok(())
    }
}

impl Default for HalfBlockPresenter {
    fn default() -> Self {
        Self::new()
    }
}

fn over_black(pixels: &[u8], i: usize) -> (u8, u8, u8) {
    let a = pixels[i + 3] as u16;
    (
        ((pixels[i] as u16 * a) / 255) as u8,
        ((pixels[i + 1] as u16 * a) / 255) as u8,
        ((pixels[i + 2] as u16 * a) / 255) as u8,
    )
}

/// Centered boxed popup; used for the help screen and the property panel.
/// The first text line becomes the box title.
pub fn draw_overlay_popup(
    out: &mut dyn Write,
    term_cols: u16,
    term_rows: u16,
    text: &str,
) -> anyhow::Result<()> {
    let cols = term_cols as usize;
    let rows = term_rows as usize;
    if text.trim().is_empty() || cols < 10 || rows < 4 {
        return Ok(());
    }

    let max_inner_w = cols.saturating_sub(6).max(1);
    let mut source = text.lines();
    let title: String = source.next().unwrap_or("").chars().take(max_inner_w).collect();

    let mut body: Vec<String> = Vec::new();
    for raw in source {
        let mut line = raw;
        loop {
            if line.chars().count() <= max_inner_w {
                body.push(line.to_string());
                break;
            }
            let split = line
                .char_indices()
                .nth(max_inner_w)
                .map(|(i, _)| i)
                .unwrap_or(line.len());
            body.push(line[..split].to_string());
            line = &line[split..];
        }
    }

    let content_w = body
        .iter()
        .map(|l| l.chars().count())
        .chain([title.chars().count() + 2])
        .max()
        .unwrap_or(1);
    let inner_w = content_w.clamp(1, max_inner_w);
    let body_h = body.len().min(rows.saturating_sub(3).max(1));

    let box_w = inner_w + 4;
    let box_h = body_h + 2;
    let start_col = (cols.saturating_sub(box_w)) / 2 + 1;
    let start_row = (rows.saturating_sub(box_h)) / 2 + 1;

    // Title embedded in the top border: +- Title ----+
    let shown: String = title.chars().take(inner_w.saturating_sub(1)).collect();
    let mut top = format!("+- {} ", shown);
    while top.chars().count() < box_w - 1 {
        top.push('-');
    }
    top.push('+');

    out.write_all(b"\x1b[0m\x1b[38;2;236;242;255m\x1b[48;2;10;14;24m")?;
    write!(out, "\x1b[{};{}H{}", start_row, start_col, top)?;

    for (i, line) in body.iter().take(body_h).enumerate() {
        let row = start_row + 1 + i;
        let padded: String = line.chars().take(inner_w).collect();
        write!(
            out,
            "\x1b[{};{}H| {:<width$} |",
            row,
            start_col,
            padded,
            width = inner_w
        )?;
    }

    write!(
        out,
        "\x1b[{};{}H+{}+",
        start_row + box_h - 1,
        start_col,
        "-".repeat(box_w.saturating_sub(2))
    )?;
    out.write_all(b"\x1b[0m")?;
    Ok(())
}
