use crate::canvas::CompositeOp;
use rhai::{Dynamic, FnPtr, AST};
use std::collections::BTreeMap;

/// Control kind a property binds to: number → slider-style adjustment,
/// text → text input, bool → checkbox/toggle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropKind {
    Number,
    Text,
    Bool,
}

/// Tagged property value. The kind is inferred once when a module is
/// installed and stays stable for the instance's lifetime; panel edits
/// replace the value but never the kind.
#[derive(Clone, Debug, PartialEq)]
pub enum PropValue {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl PropValue {
    pub fn kind(&self) -> PropKind {
        match self {
            Self::Number(_) => PropKind::Number,
            Self::Text(_) => PropKind::Text,
            Self::Bool(_) => PropKind::Bool,
        }
    }

    /// Infer a property from an evaluated script value. Non-scalar values
    /// (arrays, maps, functions) are not editable properties and yield None.
    pub fn from_dynamic(d: &Dynamic) -> Option<Self> {
        if let Ok(f) = d.as_float() {
            return Some(Self::Number(f));
        }
        if let Ok(i) = d.as_int() {
            return Some(Self::Number(i as f64));
        }
        if let Ok(b) = d.as_bool() {
            return Some(Self::Bool(b));
        }
        d.clone().into_string().ok().map(Self::Text)
    }

    pub fn to_dynamic(&self) -> Dynamic {
        match self {
            Self::Number(n) => Dynamic::from(*n),
            Self::Text(s) => Dynamic::from(s.clone()),
            Self::Bool(b) => Dynamic::from(*b),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Number(n) => format!("{n:.3}"),
            Self::Text(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

/// Module metadata. `renderer` selects the registry entry; alpha and
/// composite are consumed only by the 2D renderer and default to fully
/// opaque, normal blending when absent from the source.
#[derive(Clone, Debug)]
pub struct ModuleMeta {
    pub renderer: String,
    pub alpha: Option<f32>,
    pub composite: Option<CompositeOp>,
}

impl ModuleMeta {
    pub fn alpha_or_default(&self) -> f32 {
        self.alpha.unwrap_or(1.0)
    }

    pub fn composite_or_default(&self) -> CompositeOp {
        self.composite.unwrap_or(CompositeOp::Normal)
    }
}

/// An evaluated, installable module: metadata, the live property state read
/// by draw every frame, and the draw closure with the AST that defines it.
#[derive(Debug)]
pub struct ModuleHandle {
    pub meta: ModuleMeta,
    pub props: BTreeMap<String, PropValue>,
    pub draw: FnPtr,
    pub ast: AST,
}

impl ModuleHandle {
    /// Props as a script map, rebuilt per call so draw always observes the
    /// most recent panel edits.
    pub fn props_map(&self) -> rhai::Map {
        let mut map = rhai::Map::new();
        for (name, value) in &self.props {
            map.insert(name.as_str().into(), value.to_dynamic());
        }
        map
    }
}
