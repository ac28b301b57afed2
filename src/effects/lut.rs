//! 3D colour lookup tables in the Adobe/Resolve `.cube` format.

use std::path::Path;

use crate::effects::error::{EffectError, Result};
use crate::effects::filter::{apply_matrix, ColorPreset, FilterKind, FrameFilter};
use crate::effects::FrameContext;
use crate::frame::{unit_to_u8, FrameBuffer};

/// Lattice size for the built-in preset tables.
const PRESET_SIZE: usize = 17;
const MAX_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct CubeLut {
    pub title: Option<String>,
    size: usize,
    domain_min: [f32; 3],
    domain_max: [f32; 3],
    /// Red varies fastest, then green, then blue.
    table: Vec<[f32; 3]>,
}

fn parse_error(line: usize, message: impl Into<String>) -> EffectError {
    EffectError::invalid("lutPath", format!("line {line}: {}", message.into()))
}

fn parse_triplet(parts: &[&str], line: usize) -> Result<[f32; 3]> {
    if parts.len() != 3 {
        return Err(parse_error(line, format!("expected 3 values, got {}", parts.len())));
    }
    let mut out = [0.0f32; 3];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = part
            .parse::<f32>()
            .map_err(|e| parse_error(line, format!("{part:?}: {e}")))?;
    }
    Ok(out)
}

impl CubeLut {
    /// Parse `.cube` text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut title = None;
        let mut size = None;
        let mut domain_min = [0.0; 3];
        let mut domain_max = [1.0; 3];
        let mut table = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts[0] {
                "TITLE" => {
                    title = Some(line["TITLE".len()..].trim().trim_matches('"').to_string());
                }
                "LUT_3D_SIZE" => {
                    let n: usize = parts
                        .get(1)
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| parse_error(line_no, "bad LUT_3D_SIZE"))?;
                    if !(2..=MAX_SIZE).contains(&n) {
                        return Err(parse_error(line_no, format!("LUT_3D_SIZE {n} out of range")));
                    }
                    size = Some(n);
                    table.reserve(n * n * n);
                }
                "LUT_1D_SIZE" => {
                    return Err(parse_error(line_no, "1D LUTs are not supported"));
                }
                "DOMAIN_MIN" => domain_min = parse_triplet(&parts[1..], line_no)?,
                "DOMAIN_MAX" => domain_max = parse_triplet(&parts[1..], line_no)?,
                keyword if keyword.starts_with(|c: char| c.is_ascii_alphabetic()) => {
                    tracing::debug!(keyword, "ignoring unknown .cube keyword");
                }
                _ => table.push(parse_triplet(&parts, line_no)?),
            }
        }

        let size = size.ok_or_else(|| parse_error(0, "missing LUT_3D_SIZE"))?;
        if table.len() != size * size * size {
            return Err(parse_error(
                0,
                format!("expected {} entries, found {}", size * size * size, table.len()),
            ));
        }
        if (0..3).any(|c| domain_max[c] <= domain_min[c]) {
            return Err(parse_error(0, "DOMAIN_MAX must exceed DOMAIN_MIN"));
        }

        Ok(Self {
            title,
            size,
            domain_min,
            domain_max,
            table,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| EffectError::Asset {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&text)
    }

    /// Load `path` if it exists; otherwise treat its file stem as the name
    /// of a built-in table (`/luts/warm.cube` gives the warm preset).
    pub fn resolve(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        match Self::preset(stem) {
            Some(lut) => {
                tracing::debug!(path = %path.display(), preset = stem, "using built-in LUT");
                Ok(lut)
            }
            None => Err(EffectError::Asset {
                path: path.to_path_buf(),
                reason: "file not found and no built-in table by that name".to_string(),
            }),
        }
    }

    /// Built-in table baked from a named colour grade.
    pub fn preset(name: &str) -> Option<Self> {
        let preset = ColorPreset::from_name(name)?;
        let matrix = preset.matrix();
        let mut lut = Self::from_fn(PRESET_SIZE, |rgb| {
            let [r, g, b, _] = apply_matrix(&matrix, [rgb[0], rgb[1], rgb[2], 1.0]);
            [r, g, b]
        });
        lut.title = Some(name.to_ascii_lowercase());
        Some(lut)
    }

    /// Sample `f` on a `size`³ lattice over the unit cube.
    pub fn from_fn(size: usize, f: impl Fn([f32; 3]) -> [f32; 3]) -> Self {
        let size = size.clamp(2, MAX_SIZE);
        let step = 1.0 / (size - 1) as f32;
        let mut table = Vec::with_capacity(size * size * size);
        for b in 0..size {
            for g in 0..size {
                for r in 0..size {
                    table.push(f([r as f32 * step, g as f32 * step, b as f32 * step]));
                }
            }
        }
        Self {
            title: None,
            size,
            domain_min: [0.0; 3],
            domain_max: [1.0; 3],
            table,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn entry(&self, r: usize, g: usize, b: usize) -> [f32; 3] {
        self.table[r + g * self.size + b * self.size * self.size]
    }

    /// Trilinear lookup of a unit RGB colour.
    pub fn sample(&self, rgb: [f32; 3]) -> [f32; 3] {
        let max = (self.size - 1) as f32;
        let mut idx = [0usize; 3];
        let mut frac = [0.0f32; 3];
        for c in 0..3 {
            let t = (rgb[c] - self.domain_min[c]) / (self.domain_max[c] - self.domain_min[c]);
            let pos = t.clamp(0.0, 1.0) * max;
            let base = (pos.floor() as usize).min(self.size - 2);
            idx[c] = base;
            frac[c] = pos - base as f32;
        }

        let [r0, g0, b0] = idx;
        let [fr, fg, fb] = frac;
        let lerp = |a: [f32; 3], b: [f32; 3], t: f32| {
            [
                a[0] + (b[0] - a[0]) * t,
                a[1] + (b[1] - a[1]) * t,
                a[2] + (b[2] - a[2]) * t,
            ]
        };

        let c00 = lerp(self.entry(r0, g0, b0), self.entry(r0 + 1, g0, b0), fr);
        let c10 = lerp(self.entry(r0, g0 + 1, b0), self.entry(r0 + 1, g0 + 1, b0), fr);
        let c01 = lerp(self.entry(r0, g0, b0 + 1), self.entry(r0 + 1, g0, b0 + 1), fr);
        let c11 = lerp(
            self.entry(r0, g0 + 1, b0 + 1),
            self.entry(r0 + 1, g0 + 1, b0 + 1),
            fr,
        );
        let c0 = lerp(c00, c10, fg);
        let c1 = lerp(c01, c11, fg);
        lerp(c0, c1, fb)
    }
}

pub struct LutFilter {
    lut: CubeLut,
}

impl LutFilter {
    pub fn new(lut: CubeLut) -> Self {
        Self { lut }
    }
}

impl FrameFilter for LutFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::LookupTable
    }

    fn apply(&self, frame: &mut FrameBuffer, _ctx: &FrameContext<'_>) {
        for px in frame.pixels_mut() {
            let [r, g, b, _] = px.to_unit();
            let [r, g, b] = self.lut.sample([r, g, b]);
            px.r = unit_to_u8(r);
            px.g = unit_to_u8(g);
            px.b = unit_to_u8(b);
        }
    }
}
