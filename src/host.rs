use crate::module::{ModuleHandle, PropValue};
use crate::script::{ScriptError, ScriptProvider};

/// Module installed at startup, once the audio pipeline is up: a noise-wobbled
/// ring of points linked by colored lines, sized by the energy feature.
pub const DEFAULT_MODULE_SOURCE: &str = r##"#{
  meta: #{
    type: "2d",
  },

  props: #{
    num_points: 10.0,
    line_width: 0.5,
    spread: 1.0,
    link_step: 2.0,
    colors: true,
    animate: false,
  },

  draw: |ctx| {
    let c = ctx.canvas;
    let w = ctx.width;
    let h = ctx.height;
    let p = ctx.props;
    let energy = ctx.features.energy;
    let t = ctx.time;

    c.stroke_style = "#fff";
    c.line_width = p.line_width;

    let n = p.num_points.to_int();
    if n < 1 { n = 1; }
    let xs = [];
    let ys = [];
    for i in 0..n {
      let step = if p.animate { i.to_float() * sin(t / 4.0) } else { i.to_float() };
      let theta = TAU / n.to_float();
      let radius = p.spread * h / 3.0 + sin(t / 6.0) * 40.0 + energy * 3.0;
      let cx = w / 2.0 + noise(i.to_float(), t / 10.0) * 80.0;
      let cy = h / 2.0 + noise(i.to_float(), t / 20.0) * 80.0;
      let px = radius * cos(theta * step) + cx;
      let py = radius * sin(theta * step) + cy;
      c.begin_path();
      c.arc(px, py, 1.0 + energy * 3.0, 0.0, TAU);
      c.stroke();
      xs.push(px);
      ys.push(py);
    }

    let m = p.link_step.to_int();
    for i in 0..xs.len() {
      c.begin_path();
      for j in 0..xs.len() {
        if p.colors {
          c.composite = "overlay";
          let hue = (i * j).to_float() / xs.len().to_float() * 360.0 + t * 30.0;
          c.stroke_style = `hsla(${hue}, 50%, 50%, 1)`;
        }
        c.line_to(xs[i], ys[i]);
        c.line_to(xs[j], ys[j]);
        if m > 0 && j % m == 0 {
          c.stroke();
        }
      }
      c.close_path();
      c.stroke();
    }
  },
}"##;

/// Owns the active module slot(s) and the script provider behind them.
/// Installation replaces slot 0 of the bounded module list; a failed
/// evaluation keeps the previous module drawing.
pub struct ModuleHost {
    scripts: ScriptProvider,
    modules: Vec<ModuleHandle>,
    last_error: Option<String>,
    installs: u64,
}

impl ModuleHost {
    pub fn new() -> Self {
        Self {
            scripts: ScriptProvider::new(),
            modules: Vec::new(),
            last_error: None,
            installs: 0,
        }
    }

    /// Evaluate `source` and install the result at slot 0. On failure the
    /// previous module stays active; the error is logged and retained for
    /// display. A bad edit must never stop the render loop.
    pub fn install_from_source(&mut self, source: &str) -> Result<(), ScriptError> {
        match self.scripts.compile(source) {
            Ok(module) => {
                if self.modules.is_empty() {
                    self.modules.push(module);
                } else {
                    self.modules[0] = module;
                }
                self.installs += 1;
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("module install rejected: {e}");
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn scripts(&self) -> &ScriptProvider {
        &self.scripts
    }

    pub fn modules(&self) -> &[ModuleHandle] {
        &self.modules
    }

    pub fn active(&self) -> Option<&ModuleHandle> {
        self.modules.first()
    }

    /// Count of successful installs; lets callers notice a replacement.
    pub fn installs(&self) -> u64 {
        self.installs
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Property names of the active module, in panel order.
    pub fn prop_names(&self) -> Vec<String> {
        self.active()
            .map(|m| m.props.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn prop(&self, name: &str) -> Option<&PropValue> {
        self.active().and_then(|m| m.props.get(name))
    }

    /// Panel write path. The new value must match the property's inferred
    /// kind; a kind change would break the control bound to it.
    pub fn set_prop(&mut self, name: &str, value: PropValue) -> bool {
        let Some(module) = self.modules.first_mut() else {
            return false;
        };
        match module.props.get_mut(name) {
            Some(current) if current.kind() == value.kind() => {
                *current = value;
                true
            }
            _ => false,
        }
    }

    /// Slider-style nudge for number props, toggle for bools. Text props are
    /// only writable through `set_prop`.
    pub fn nudge_prop(&mut self, name: &str, direction: f64) -> bool {
        let Some(current) = self.prop(name).cloned() else {
            return false;
        };
        match current {
            PropValue::Number(n) => {
                let step = prop_step(n);
                self.set_prop(name, PropValue::Number(n + step * direction))
            }
            PropValue::Bool(b) => self.set_prop(name, PropValue::Bool(!b)),
            PropValue::Text(_) => false,
        }
    }
}

impl Default for ModuleHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Adjustment step scaled to the value's magnitude so small tunables stay
/// finely adjustable and large ones move usefully.
fn prop_step(value: f64) -> f64 {
    let mag = value.abs();
    if mag < 2.0 {
        0.1
    } else if mag < 20.0 {
        1.0
    } else {
        5.0
    }
}
