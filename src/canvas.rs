use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const WHITE: Self = Self { r: 255, g: 255, b: 255, a: 255 };
    pub const BLACK: Self = Self { r: 0, g: 0, b: 0, a: 255 };
    pub const TRANSPARENT: Self = Self { r: 0, g: 0, b: 0, a: 0 };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeOp {
    Normal,
    Lighter,
    Multiply,
    Screen,
    Overlay,
}

impl CompositeOp {
    /// Unknown identifiers fall back to Normal rather than erroring; a module
    /// with a typo in its blend mode still draws.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "lighter" | "add" | "additive" => Self::Lighter,
            "multiply" => Self::Multiply,
            "screen" => Self::Screen,
            "overlay" => Self::Overlay,
            _ => Self::Normal,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Lighter => "lighter",
            Self::Multiply => "multiply",
            Self::Screen => "screen",
            Self::Overlay => "overlay",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawState {
    pub global_alpha: f32,
    pub composite: CompositeOp,
    pub stroke_style: Rgba,
    pub fill_style: Rgba,
    pub line_width: f32,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            global_alpha: 1.0,
            composite: CompositeOp::Normal,
            stroke_style: Rgba::WHITE,
            fill_style: Rgba::BLACK,
            line_width: 1.0,
        }
    }
}

/// Software RGBA drawing surface. Mirrors the minimum 2D-context contract the
/// module draw routines rely on: a mutable size, clear, scaled blits, a
/// save/restore state stack, and stroked path primitives.
pub struct Canvas {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
    state: DrawState,
    stack: Vec<DrawState>,
    // Path under construction: a list of subpaths, each a polyline.
    path: Vec<Vec<(f32, f32)>>,
}

impl Canvas {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0u8; width * height * 4],
            state: DrawState::default(),
            stack: Vec::new(),
            path: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: usize, y: usize) -> Rgba {
        if x >= self.width || y >= self.height {
            return Rgba::TRANSPARENT;
        }
        let i = (y * self.width + x) * 4;
        Rgba {
            r: self.pixels[i],
            g: self.pixels[i + 1],
            b: self.pixels[i + 2],
            a: self.pixels[i + 3],
        }
    }

    /// Resizing discards the pixel contents, like reassigning a canvas
    /// element's dimensions. Draw state and the state stack are untouched.
    pub fn resize(&mut self, width: usize, height: usize) {
        if width == self.width && height == self.height {
            return;
        }
        self.width = width;
        self.height = height;
        self.pixels = vec![0u8; width * height * 4];
        self.path.clear();
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    pub fn save(&mut self) {
        self.stack.push(self.state);
    }

    /// Restore with an empty stack is a no-op, matching 2D-context semantics.
    pub fn restore(&mut self) {
        if let Some(prev) = self.stack.pop() {
            self.state = prev;
        }
    }

    pub fn state(&self) -> &DrawState {
        &self.state
    }

    pub fn set_global_alpha(&mut self, alpha: f32) {
        if alpha.is_finite() {
            self.state.global_alpha = alpha.clamp(0.0, 1.0);
        }
    }

    pub fn set_composite(&mut self, op: CompositeOp) {
        self.state.composite = op;
    }

    pub fn set_line_width(&mut self, width: f32) {
        if width.is_finite() && width > 0.0 {
            self.state.line_width = width;
        }
    }

    /// Invalid color strings leave the current style in place, like the DOM
    /// context does.
    pub fn set_stroke_style(&mut self, style: &str) {
        if let Some(c) = parse_color(style) {
            self.state.stroke_style = c;
        }
    }

    pub fn set_fill_style(&mut self, style: &str) {
        if let Some(c) = parse_color(style) {
            self.state.fill_style = c;
        }
    }

    pub fn begin_path(&mut self) {
        self.path.clear();
    }

    pub fn move_to(&mut self, x: f32, y: f32) {
        self.path.push(vec![(x, y)]);
    }

    pub fn line_to(&mut self, x: f32, y: f32) {
        match self.path.last_mut() {
            Some(sub) => sub.push((x, y)),
            // line_to with no current point starts a subpath there.
            None => self.move_to(x, y),
        }
    }

    pub fn close_path(&mut self) {
        if let Some(sub) = self.path.last_mut() {
            if sub.len() > 1 {
                let first = sub[0];
                sub.push(first);
            }
        }
    }

    pub fn arc(&mut self, cx: f32, cy: f32, radius: f32, start: f32, end: f32) {
        if !radius.is_finite() || radius < 0.0 {
            return;
        }
        let sweep = (end - start).abs().min(std::f32::consts::TAU);
        let segments = ((radius * sweep) as usize).clamp(8, 128);
        let connect = self.path.last().map(|s| !s.is_empty()).unwrap_or(false);
        if !connect {
            self.path.push(Vec::with_capacity(segments + 1));
        }
        let Some(sub) = self.path.last_mut() else {
            return;
        };
        for i in 0..=segments {
            let t = start + (end - start) * (i as f32 / segments as f32);
            sub.push((cx + radius * t.cos(), cy + radius * t.sin()));
        }
    }

    /// Stroke the current path with the current style. The path survives the
    /// stroke so it can be stroked again after a style change.
    pub fn stroke(&mut self) {
        let color = self.state.stroke_style;
        let radius = (self.state.line_width * 0.5).max(0.0);
        let path = std::mem::take(&mut self.path);
        for sub in &path {
            for pair in sub.windows(2) {
                self.stamp_segment(pair[0], pair[1], radius, color);
            }
            if sub.len() == 1 {
                self.stamp_disc(sub[0].0, sub[0].1, radius, color);
            }
        }
        self.path = path;
    }

    pub fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32) {
        let color = self.state.fill_style;
        let x0 = x.floor().max(0.0) as usize;
        let y0 = y.floor().max(0.0) as usize;
        let x1 = ((x + w).ceil().max(0.0) as usize).min(self.width);
        let y1 = ((y + h).ceil().max(0.0) as usize).min(self.height);
        for py in y0..y1 {
            for px in x0..x1 {
                self.put(px, py, color);
            }
        }
    }

    /// Scaled nearest-neighbour blit of another surface through the current
    /// alpha and composite operation.
    pub fn draw_image(&mut self, src: &Canvas, dx: f32, dy: f32, dw: f32, dh: f32) {
        self.draw_pixels(src.pixels(), src.width(), src.height(), dx, dy, dw, dh);
    }

    pub fn draw_pixels(
        &mut self,
        src: &[u8],
        src_w: usize,
        src_h: usize,
        dx: f32,
        dy: f32,
        dw: f32,
        dh: f32,
    ) {
        if src_w == 0 || src_h == 0 || dw <= 0.0 || dh <= 0.0 {
            return;
        }
        if src.len() < src_w * src_h * 4 {
            return;
        }
        let x0 = dx.floor().max(0.0) as usize;
        let y0 = dy.floor().max(0.0) as usize;
        let x1 = ((dx + dw).ceil().max(0.0) as usize).min(self.width);
        let y1 = ((dy + dh).ceil().max(0.0) as usize).min(self.height);
        for py in y0..y1 {
            let v = (py as f32 - dy) / dh;
            let sy = ((v * src_h as f32) as usize).min(src_h - 1);
            for px in x0..x1 {
                let u = (px as f32 - dx) / dw;
                let sx = ((u * src_w as f32) as usize).min(src_w - 1);
                let i = (sy * src_w + sx) * 4;
                let c = Rgba {
                    r: src[i],
                    g: src[i + 1],
                    b: src[i + 2],
                    a: src[i + 3],
                };
                self.put(px, py, c);
            }
        }
    }

    fn stamp_segment(&mut self, a: (f32, f32), b: (f32, f32), radius: f32, color: Rgba) {
        let dx = b.0 - a.0;
        let dy = b.1 - a.1;
        let len = (dx * dx + dy * dy).sqrt();
        if !len.is_finite() {
            return;
        }
        let steps = (len.ceil() as usize).max(1);
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            self.stamp_disc(a.0 + dx * t, a.1 + dy * t, radius, color);
        }
    }

    fn stamp_disc(&mut self, cx: f32, cy: f32, radius: f32, color: Rgba) {
        if radius <= 0.5 {
            if cx >= 0.0 && cy >= 0.0 {
                self.put(cx.round() as usize, cy.round() as usize, color);
            }
            return;
        }
        let r2 = radius * radius;
        let x0 = (cx - radius).floor().max(0.0) as usize;
        let y0 = (cy - radius).floor().max(0.0) as usize;
        let x1 = ((cx + radius).ceil().max(0.0) as usize).min(self.width.saturating_sub(1));
        let y1 = ((cy + radius).ceil().max(0.0) as usize).min(self.height.saturating_sub(1));
        for py in y0..=y1 {
            for px in x0..=x1 {
                let ddx = px as f32 - cx;
                let ddy = py as f32 - cy;
                if ddx * ddx + ddy * ddy <= r2 {
                    self.put(px, py, color);
                }
            }
        }
    }

    fn put(&mut self, x: usize, y: usize, src: Rgba) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = (y * self.width + x) * 4;
        let dst = Rgba {
            r: self.pixels[i],
            g: self.pixels[i + 1],
            b: self.pixels[i + 2],
            a: self.pixels[i + 3],
        };
        let out = blend(dst, src, self.state.composite, self.state.global_alpha);
        self.pixels[i] = out.r;
        self.pixels[i + 1] = out.g;
        self.pixels[i + 2] = out.b;
        self.pixels[i + 3] = out.a;
    }
}

fn blend(dst: Rgba, src: Rgba, op: CompositeOp, global_alpha: f32) -> Rgba {
    let sa = (src.a as f32 / 255.0) * global_alpha.clamp(0.0, 1.0);
    if sa <= 0.0 {
        return dst;
    }
    let da = dst.a as f32 / 255.0;
    let s = [
        src.r as f32 / 255.0,
        src.g as f32 / 255.0,
        src.b as f32 / 255.0,
    ];
    let d = [
        dst.r as f32 / 255.0,
        dst.g as f32 / 255.0,
        dst.b as f32 / 255.0,
    ];

    let oa = sa + da * (1.0 - sa);
    let mut out = [0.0f32; 3];
    for ch in 0..3 {
        let blended = match op {
            CompositeOp::Normal => s[ch],
            CompositeOp::Lighter => (s[ch] + d[ch]).min(1.0),
            CompositeOp::Multiply => s[ch] * d[ch],
            CompositeOp::Screen => 1.0 - (1.0 - s[ch]) * (1.0 - d[ch]),
            CompositeOp::Overlay => {
                if d[ch] < 0.5 {
                    2.0 * s[ch] * d[ch]
                } else {
                    1.0 - 2.0 * (1.0 - s[ch]) * (1.0 - d[ch])
                }
            }
        };
        // Blend modes only apply against covered backdrop; un-premultiplied
        // source-over weighting, oa > 0 because sa > 0.
        let mixed = s[ch] * (1.0 - da) + blended * da;
        out[ch] = (mixed * sa + d[ch] * da * (1.0 - sa)) / oa;
    }

    Rgba {
        r: (out[0].clamp(0.0, 1.0) * 255.0).round() as u8,
        g: (out[1].clamp(0.0, 1.0) * 255.0).round() as u8,
        b: (out[2].clamp(0.0, 1.0) * 255.0).round() as u8,
        a: (oa.clamp(0.0, 1.0) * 255.0).round() as u8,
    }
}

/// Parse the color syntaxes module sources actually use: #rgb / #rrggbb /
/// #rrggbbaa hex, rgb()/rgba(), and hsl()/hsla().
pub fn parse_color(s: &str) -> Option<Rgba> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix('#') {
        return parse_hex(hex);
    }
    let lower = s.to_ascii_lowercase();
    if let Some(args) = func_args(&lower, "rgba").or_else(|| func_args(&lower, "rgb")) {
        return parse_rgb_args(&args);
    }
    if let Some(args) = func_args(&lower, "hsla").or_else(|| func_args(&lower, "hsl")) {
        return parse_hsl_args(&args);
    }
    None
}

fn parse_hex(hex: &str) -> Option<Rgba> {
    let nib = |c: u8| -> Option<u8> {
        match c {
            b'0'..=b'9' => Some(c - b'0'),
            b'a'..=b'f' => Some(c - b'a' + 10),
            b'A'..=b'F' => Some(c - b'A' + 10),
            _ => None,
        }
    };
    let b = hex.as_bytes();
    match b.len() {
        3 | 4 => {
            let mut v = [255u8; 4];
            for (i, &c) in b.iter().enumerate() {
                let n = nib(c)?;
                v[i] = n << 4 | n;
            }
            Some(Rgba { r: v[0], g: v[1], b: v[2], a: v[3] })
        }
        6 | 8 => {
            let mut v = [255u8; 4];
            for i in 0..b.len() / 2 {
                v[i] = nib(b[i * 2])? << 4 | nib(b[i * 2 + 1])?;
            }
            Some(Rgba { r: v[0], g: v[1], b: v[2], a: v[3] })
        }
        _ => None,
    }
}

fn func_args(s: &str, name: &str) -> Option<Vec<String>> {
    let rest = s.strip_prefix(name)?.trim_start();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    Some(inner.split(',').map(|p| p.trim().to_string()).collect())
}

fn parse_rgb_args(args: &[String]) -> Option<Rgba> {
    if args.len() != 3 && args.len() != 4 {
        return None;
    }
    let chan = |v: &str| -> Option<u8> {
        let f = v.parse::<f32>().ok()?;
        Some(f.clamp(0.0, 255.0).round() as u8)
    };
    let a = if args.len() == 4 {
        let f = args[3].parse::<f32>().ok()?;
        (f.clamp(0.0, 1.0) * 255.0).round() as u8
    } else {
        255
    };
    Some(Rgba {
        r: chan(&args[0])?,
        g: chan(&args[1])?,
        b: chan(&args[2])?,
        a,
    })
}

fn parse_hsl_args(args: &[String]) -> Option<Rgba> {
    if args.len() != 3 && args.len() != 4 {
        return None;
    }
    let h = args[0].parse::<f32>().ok()?;
    let pct = |v: &str| -> Option<f32> {
        let v = v.strip_suffix('%').unwrap_or(v);
        Some(v.parse::<f32>().ok()?.clamp(0.0, 100.0) / 100.0)
    };
    let s = pct(&args[1])?;
    let l = pct(&args[2])?;
    let a = if args.len() == 4 {
        (args[3].parse::<f32>().ok()?.clamp(0.0, 1.0) * 255.0).round() as u8
    } else {
        255
    };
    let (r, g, b) = hsl_to_rgb(h, s, l);
    Some(Rgba { r, g, b, a })
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (u8, u8, u8) {
    let h = h.rem_euclid(360.0) / 60.0;
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = c * (1.0 - (h.rem_euclid(2.0) - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    (
        ((r + m).clamp(0.0, 1.0) * 255.0).round() as u8,
        ((g + m).clamp(0.0, 1.0) * 255.0).round() as u8,
        ((b + m).clamp(0.0, 1.0) * 255.0).round() as u8,
    )
}

/// Shared handle so the primary surface, the renderer's off-screen surface,
/// and script code can all address the same canvas. Single-threaded by
/// design; the frame loop and edit path never run concurrently.
#[derive(Clone)]
pub struct CanvasHandle(Rc<RefCell<Canvas>>);

impl CanvasHandle {
    pub fn new(width: usize, height: usize) -> Self {
        Self(Rc::new(RefCell::new(Canvas::new(width, height))))
    }

    pub fn size(&self) -> (usize, usize) {
        let c = self.0.borrow();
        (c.width(), c.height())
    }

    pub fn resize(&self, width: usize, height: usize) {
        self.0.borrow_mut().resize(width, height);
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    pub fn save(&self) {
        self.0.borrow_mut().save();
    }

    pub fn restore(&self) {
        self.0.borrow_mut().restore();
    }

    pub fn set_global_alpha(&self, alpha: f32) {
        self.0.borrow_mut().set_global_alpha(alpha);
    }

    pub fn set_composite(&self, op: CompositeOp) {
        self.0.borrow_mut().set_composite(op);
    }

    pub fn set_line_width(&self, width: f32) {
        self.0.borrow_mut().set_line_width(width);
    }

    pub fn set_stroke_style(&self, style: &str) {
        self.0.borrow_mut().set_stroke_style(style);
    }

    pub fn set_fill_style(&self, style: &str) {
        self.0.borrow_mut().set_fill_style(style);
    }

    pub fn begin_path(&self) {
        self.0.borrow_mut().begin_path();
    }

    pub fn move_to(&self, x: f32, y: f32) {
        self.0.borrow_mut().move_to(x, y);
    }

    pub fn line_to(&self, x: f32, y: f32) {
        self.0.borrow_mut().line_to(x, y);
    }

    pub fn close_path(&self) {
        self.0.borrow_mut().close_path();
    }

    pub fn arc(&self, cx: f32, cy: f32, radius: f32, start: f32, end: f32) {
        self.0.borrow_mut().arc(cx, cy, radius, start, end);
    }

    pub fn stroke(&self) {
        self.0.borrow_mut().stroke();
    }

    pub fn fill_rect(&self, x: f32, y: f32, w: f32, h: f32) {
        self.0.borrow_mut().fill_rect(x, y, w, h);
    }

    /// Blit another surface onto this one. Panics if both handles alias the
    /// same canvas; the renderer only ever blits between distinct surfaces.
    pub fn draw_from(&self, src: &CanvasHandle, dx: f32, dy: f32, dw: f32, dh: f32) {
        let src = src.0.borrow();
        self.0.borrow_mut().draw_image(&src, dx, dy, dw, dh);
    }

    pub fn state_snapshot(&self) -> DrawState {
        *self.0.borrow().state()
    }

    pub fn pixel(&self, x: usize, y: usize) -> Rgba {
        self.0.borrow().pixel(x, y)
    }

    pub fn copy_pixels(&self) -> Vec<u8> {
        self.0.borrow().pixels().to_vec()
    }

    pub fn with_pixels<R>(&self, f: impl FnOnce(&[u8], usize, usize) -> R) -> R {
        let c = self.0.borrow();
        f(c.pixels(), c.width(), c.height())
    }
}
