use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::effects::error::{EffectError, Result};
use crate::effects::lut::{CubeLut, LutFilter};
use crate::effects::shader::CustomShaderFilter;
use crate::effects::FrameContext;
use crate::frame::{unit_to_u8, FrameBuffer};

/// Colour transform families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    ColorMatrix,
    LookupTable,
    CustomShader,
}

impl FilterKind {
    /// Channel encoding: 0 colour matrix, 1 LUT, 2 custom shader.
    pub fn from_index(index: i64) -> Result<Self> {
        match index {
            0 => Ok(Self::ColorMatrix),
            1 => Ok(Self::LookupTable),
            2 => Ok(Self::CustomShader),
            _ => Err(EffectError::UnsupportedKind {
                category: "filter",
                kind: index.to_string(),
            }),
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "colormatrix" | "matrix" => Ok(Self::ColorMatrix),
            "lut" | "lookuptable" => Ok(Self::LookupTable),
            "customshader" | "shader" => Ok(Self::CustomShader),
            _ => Err(EffectError::UnsupportedKind {
                category: "filter",
                kind: name.to_string(),
            }),
        }
    }
}

/// A loosely typed filter or effect parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Number(f32),
    Flag(bool),
    Text(String),
    List(Vec<f32>),
}

impl ParamValue {
    pub fn as_number(&self) -> Option<f32> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Flag(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

pub type Params = BTreeMap<String, ParamValue>;

/// Declarative description of the colour filter to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub id: String,
    pub kind: FilterKind,
    /// 0.0 leaves frames untouched, 1.0 applies the filter fully.
    pub intensity: f32,
    pub params: Params,
    pub lut_path: Option<PathBuf>,
    pub shader_code: Option<String>,
}

impl FilterSpec {
    pub fn new(id: impl Into<String>, kind: FilterKind) -> Self {
        Self {
            id: id.into(),
            kind,
            intensity: 1.0,
            params: Params::new(),
            lut_path: None,
            shader_code: None,
        }
    }
}

/// A ready-to-run colour filter. Stateless once created.
pub trait FrameFilter: Send + Sync {
    fn kind(&self) -> FilterKind;

    /// Transform the frame in place at full strength. Intensity blending is
    /// the compositor's job.
    fn apply(&self, frame: &mut FrameBuffer, ctx: &FrameContext<'_>);
}

/// Validate an intensity-like value in 0.0..=1.0.
pub(crate) fn unit_param(name: &str, value: f32) -> Result<f32> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(EffectError::invalid(name, format!("{value} outside 0.0..=1.0")));
    }
    Ok(value)
}

/// Builds filters from specs. One per session, shared by every call.
#[derive(Debug, Default, Clone)]
pub struct FilterFactory;

impl FilterFactory {
    pub fn new() -> Self {
        Self
    }

    pub fn create(&self, spec: &FilterSpec) -> Result<Box<dyn FrameFilter>> {
        unit_param("intensity", spec.intensity)?;
        match spec.kind {
            FilterKind::ColorMatrix => Ok(Box::new(ColorMatrixFilter::from_params(&spec.params)?)),
            FilterKind::LookupTable => {
                let path = spec
                    .lut_path
                    .as_deref()
                    .ok_or_else(|| EffectError::invalid("lutPath", "required for LUT filters"))?;
                Ok(Box::new(LutFilter::new(CubeLut::resolve(path)?)))
            }
            FilterKind::CustomShader => {
                let source = spec.shader_code.as_deref().ok_or_else(|| {
                    EffectError::invalid("shaderCode", "required for custom shader filters")
                })?;
                Ok(Box::new(CustomShaderFilter::compile(source, &spec.params)?))
            }
        }
    }
}

/// Named colour grades, shared by the matrix filter and the built-in LUTs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorPreset {
    Mono,
    Sepia,
    Noir,
    Vivid,
    Cool,
    Warm,
    Fade,
    Negative,
}

impl ColorPreset {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mono" | "grayscale" | "greyscale" => Some(Self::Mono),
            "sepia" => Some(Self::Sepia),
            "noir" => Some(Self::Noir),
            "vivid" => Some(Self::Vivid),
            "cool" => Some(Self::Cool),
            "warm" => Some(Self::Warm),
            "fade" => Some(Self::Fade),
            "negative" | "invert" => Some(Self::Negative),
            _ => None,
        }
    }

    /// Row-major 4x5 matrix; the fifth column is an offset on the 0..255 scale.
    pub fn matrix(self) -> [f32; 20] {
        const LR: f32 = 0.299;
        const LG: f32 = 0.587;
        const LB: f32 = 0.114;
        match self {
            Self::Mono => [
                LR, LG, LB, 0.0, 0.0, //
                LR, LG, LB, 0.0, 0.0, //
                LR, LG, LB, 0.0, 0.0, //
                0.0, 0.0, 0.0, 1.0, 0.0,
            ],
            Self::Sepia => [
                0.393, 0.769, 0.189, 0.0, 0.0, //
                0.349, 0.686, 0.168, 0.0, 0.0, //
                0.272, 0.534, 0.131, 0.0, 0.0, //
                0.0, 0.0, 0.0, 1.0, 0.0,
            ],
            Self::Noir => {
                // Luma at 2x contrast around mid grey.
                let (r, g, b, o) = (LR * 2.0, LG * 2.0, LB * 2.0, -127.5);
                [
                    r, g, b, 0.0, o, //
                    r, g, b, 0.0, o, //
                    r, g, b, 0.0, o, //
                    0.0, 0.0, 0.0, 1.0, 0.0,
                ]
            }
            Self::Vivid => {
                let s = 1.4;
                let (ir, ig, ib) = ((1.0 - s) * LR, (1.0 - s) * LG, (1.0 - s) * LB);
                [
                    ir + s, ig, ib, 0.0, 0.0, //
                    ir, ig + s, ib, 0.0, 0.0, //
                    ir, ig, ib + s, 0.0, 0.0, //
                    0.0, 0.0, 0.0, 1.0, 0.0,
                ]
            }
            Self::Cool => [
                0.9, 0.0, 0.0, 0.0, 0.0, //
                0.0, 0.95, 0.0, 0.0, 0.0, //
                0.0, 0.0, 1.1, 0.0, 0.0, //
                0.0, 0.0, 0.0, 1.0, 0.0,
            ],
            Self::Warm => [
                1.1, 0.0, 0.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.85, 0.0, 0.0, //
                0.0, 0.0, 0.0, 1.0, 0.0,
            ],
            Self::Fade => [
                0.85, 0.0, 0.0, 0.0, 25.5, //
                0.0, 0.85, 0.0, 0.0, 25.5, //
                0.0, 0.0, 0.85, 0.0, 25.5, //
                0.0, 0.0, 0.0, 1.0, 0.0,
            ],
            Self::Negative => [
                -1.0, 0.0, 0.0, 0.0, 255.0, //
                0.0, -1.0, 0.0, 0.0, 255.0, //
                0.0, 0.0, -1.0, 0.0, 255.0, //
                0.0, 0.0, 0.0, 1.0, 0.0,
            ],
        }
    }
}

/// Apply a 4x5 colour matrix to unit RGBA.
pub(crate) fn apply_matrix(m: &[f32; 20], c: [f32; 4]) -> [f32; 4] {
    let mut out = [0.0f32; 4];
    for (row, o) in out.iter_mut().enumerate() {
        let k = &m[row * 5..row * 5 + 5];
        *o = (k[0] * c[0] + k[1] * c[1] + k[2] * c[2] + k[3] * c[3] + k[4] / 255.0)
            .clamp(0.0, 1.0);
    }
    out
}

pub struct ColorMatrixFilter {
    matrix: [f32; 20],
}

impl ColorMatrixFilter {
    pub fn new(matrix: [f32; 20]) -> Self {
        Self { matrix }
    }

    /// `matrix` (20 numbers) wins over `preset`; with neither, sepia.
    pub fn from_params(params: &Params) -> Result<Self> {
        if let Some(value) = params.get("matrix") {
            let ParamValue::List(values) = value else {
                return Err(EffectError::invalid("matrix", "expected a list of 20 numbers"));
            };
            let matrix: [f32; 20] = values.as_slice().try_into().map_err(|_| {
                EffectError::invalid("matrix", format!("expected 20 numbers, got {}", values.len()))
            })?;
            if matrix.iter().any(|v| !v.is_finite()) {
                return Err(EffectError::invalid("matrix", "contains a non-finite value"));
            }
            return Ok(Self::new(matrix));
        }

        let preset = match params.get("preset") {
            None => ColorPreset::Sepia,
            Some(value) => {
                let name = value
                    .as_text()
                    .ok_or_else(|| EffectError::invalid("preset", "expected a preset name"))?;
                ColorPreset::from_name(name)
                    .ok_or_else(|| EffectError::invalid("preset", format!("unknown preset {name}")))?
            }
        };
        Ok(Self::new(preset.matrix()))
    }
}

impl FrameFilter for ColorMatrixFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::ColorMatrix
    }

    fn apply(&self, frame: &mut FrameBuffer, _ctx: &FrameContext<'_>) {
        for px in frame.pixels_mut() {
            let [r, g, b, a] = apply_matrix(&self.matrix, px.to_unit());
            px.r = unit_to_u8(r);
            px.g = unit_to_u8(g);
            px.b = unit_to_u8(b);
            px.a = unit_to_u8(a);
        }
    }
}
