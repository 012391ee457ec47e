//! Textures: wrap modes and filtering on top of layers
//!
//! A regular texture has one layer. A pyramid ("made" texture) holds every
//! resolution level, finest first, and blends the two levels that bracket
//! the footprint of an area lookup.

use std::fmt;
use std::str::FromStr;

use crate::cache::TextureCache;
use crate::error::{TextureError, TextureResult};
use crate::layer::TextureLayer;
use crate::math::{lerp, Color};
use crate::options::LookupOptions;
use crate::sampler::SampleSource;

/// What happens to coordinates outside `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    /// Repeat the image
    #[default]
    Periodic,
    /// Outside is the fill colour
    Black,
    /// Repeat the edge texels
    Clamp,
}

impl WrapMode {
    /// Map a coordinate into `[0, 1]`, or `None` if it falls off a black
    /// edge
    pub fn apply(self, x: f32) -> Option<f32> {
        match self {
            WrapMode::Periodic => {
                let x = x % 1.0;
                Some(if x < 0.0 { x + 1.0 } else { x })
            }
            WrapMode::Black => (0.0..=1.0).contains(&x).then_some(x),
            WrapMode::Clamp => Some(x.clamp(0.0, 1.0)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WrapMode::Periodic => "periodic",
            WrapMode::Black => "black",
            WrapMode::Clamp => "clamp",
        }
    }
}

impl FromStr for WrapMode {
    type Err = TextureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "periodic" => Ok(WrapMode::Periodic),
            "black" => Ok(WrapMode::Black),
            "clamp" => Ok(WrapMode::Clamp),
            other => Err(TextureError::UnknownWrapMode(other.to_string())),
        }
    }
}

impl fmt::Display for WrapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Four corners of a footprint in texture space
///
/// Corners are in bilinear order: `(0, 0)`, `(1, 0)`, `(0, 1)`, `(1, 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub s: [f32; 4],
    pub t: [f32; 4],
}

impl Quad {
    pub fn new(s: [f32; 4], t: [f32; 4]) -> Self {
        Self { s, t }
    }

    /// Axis-aligned footprint around `(s, t)`
    ///
    /// `ds` and `dt` are the raster footprint in texture units; each side
    /// is scaled by the filter width and grown by the blur.
    pub fn around(s: f32, t: f32, ds: f32, dt: f32, options: &LookupOptions) -> Self {
        let samt = (ds * options.swidth + options.sblur) * 0.5;
        let tamt = (dt * options.twidth + options.tblur) * 0.5;
        Self {
            s: [s - samt, s + samt, s - samt, s + samt],
            t: [t - tamt, t - tamt, t + tamt, t + tamt],
        }
    }

    /// Parallelogram centred on `centre` with sides `du` and `dv`
    pub fn parallelogram(centre: [f32; 2], du: [f32; 2], dv: [f32; 2]) -> Self {
        let s = centre[0] - 0.5 * (du[0] + dv[0]);
        let t = centre[1] - 0.5 * (du[1] + dv[1]);
        Self {
            s: [s, s + du[0], s + dv[0], s + du[0] + dv[0]],
            t: [t, t + du[1], t + dv[1], t + du[1] + dv[1]],
        }
    }

    /// Bilinear interpolation of the corners at `(u, v)` in the unit square
    pub fn at(&self, u: f32, v: f32) -> (f32, f32) {
        let blend = |c: &[f32; 4]| {
            (c[0] * (1.0 - u) + c[1] * u) * (1.0 - v) + (c[2] * (1.0 - u) + c[3] * u) * v
        };
        (blend(&self.s), blend(&self.t))
    }

    pub fn centre(&self) -> (f32, f32) {
        (
            self.s.iter().sum::<f32>() * 0.25,
            self.t.iter().sum::<f32>() * 0.25,
        )
    }
}

/// Filter-weighted average of `sample` over the positions `sampler` hands
/// out
///
/// `sample` returns `None` to drop a position from the average entirely.
/// Returns `None` when no weight was accumulated.
pub(crate) fn filtered<S, F>(sampler: &mut S, options: &LookupOptions, mut sample: F) -> Option<Color>
where
    S: SampleSource + ?Sized,
    F: FnMut(f32, f32) -> Option<Color>,
{
    let count = sampler.begin(options.samples);
    let mut total = 0.0f32;
    let mut sum = [0.0f32; 3];

    for _ in 0..count {
        let [u, v] = sampler.next_pair();
        let weight = options.filter.weight(u - 0.5, v - 0.5, 1.0, 1.0);
        let Some(color) = sample(u, v) else {
            continue;
        };
        total += weight;
        for (s, c) in sum.iter_mut().zip(color) {
            *s += c * weight;
        }
    }

    (total != 0.0).then(|| sum.map(|s| s / total))
}

#[derive(Debug)]
enum TextureKind {
    Regular(TextureLayer),
    Pyramid(Vec<TextureLayer>),
}

/// A named texture with wrap modes
#[derive(Debug)]
pub struct Texture {
    name: String,
    width: u32,
    height: u32,
    smode: WrapMode,
    tmode: WrapMode,
    kind: TextureKind,
    cache: TextureCache,
}

impl Texture {
    /// Texture over a single layer
    pub fn regular(
        cache: &TextureCache,
        name: impl Into<String>,
        layer: TextureLayer,
        smode: WrapMode,
        tmode: WrapMode,
    ) -> Self {
        cache.texture_opened();
        Self {
            name: name.into(),
            width: layer.width(),
            height: layer.height(),
            smode,
            tmode,
            kind: TextureKind::Regular(layer),
            cache: cache.clone(),
        }
    }

    /// Pyramid over `layers`, finest first
    ///
    /// `width` and `height` are the base resolution used to measure
    /// footprints.
    ///
    /// # Errors
    /// Returns [`TextureError::EmptyPyramid`] if `layers` is empty.
    pub fn pyramid(
        cache: &TextureCache,
        name: impl Into<String>,
        width: u32,
        height: u32,
        smode: WrapMode,
        tmode: WrapMode,
        layers: Vec<TextureLayer>,
    ) -> TextureResult<Self> {
        if layers.is_empty() {
            return Err(TextureError::EmptyPyramid);
        }
        cache.texture_opened();
        Ok(Self {
            name: name.into(),
            width,
            height,
            smode,
            tmode,
            kind: TextureKind::Pyramid(layers),
            cache: cache.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn smode(&self) -> WrapMode {
        self.smode
    }

    pub fn tmode(&self) -> WrapMode {
        self.tmode
    }

    pub fn is_pyramid(&self) -> bool {
        matches!(self.kind, TextureKind::Pyramid(_))
    }

    /// Layers, finest first
    pub fn levels(&self) -> &[TextureLayer] {
        match &self.kind {
            TextureKind::Regular(layer) => std::slice::from_ref(layer),
            TextureKind::Pyramid(layers) => layers,
        }
    }

    fn wrap(&self, s: f32, t: f32) -> Option<(f32, f32)> {
        Some((self.smode.apply(s)?, self.tmode.apply(t)?))
    }

    /// Point lookup at `(s, t)`
    ///
    /// Off a black edge this returns `options.fill` without touching any
    /// layer.
    pub fn lookup(&self, s: f32, t: f32, options: &LookupOptions) -> Color {
        match self.wrap(s, t) {
            Some((s, t)) => self.levels()[0].lookup(s, t, options.channel, options.fill),
            None => options.fill,
        }
    }

    /// Pyramid level for a footprint: half the log2 of the largest squared
    /// centre-to-corner distance in base texels, never below zero
    pub fn mip_level(&self, quad: &Quad) -> f32 {
        let (cs, ct) = quad.centre();
        let (w, h) = (self.width as f32, self.height as f32);
        let diag = quad
            .s
            .iter()
            .zip(&quad.t)
            .map(|(s, t)| {
                let (ds, dt) = ((s - cs) * w, (t - ct) * h);
                ds * ds + dt * dt
            })
            .fold(0.0f32, f32::max);
        (0.5 * diag.log2()).max(0.0)
    }

    /// Filtered area lookup over `quad`
    ///
    /// Positions that fall off a black edge are left out of the average.
    /// If nothing is left the result is `options.fill`.
    pub fn lookup4<S>(&self, sampler: &mut S, quad: &Quad, options: &LookupOptions) -> Color
    where
        S: SampleSource + ?Sized,
    {
        let (channel, fill) = (options.channel, options.fill);

        let result = match &self.kind {
            TextureKind::Pyramid(layers) if layers.len() > 1 => {
                let level = self.mip_level(quad);
                let i = (level.floor() as usize).min(layers.len() - 2);
                let offset = (level - i as f32).min(1.0);
                let (fine, coarse) = (&layers[i], &layers[i + 1]);

                filtered(sampler, options, |u, v| {
                    let (s, t) = quad.at(u, v);
                    let (s, t) = self.wrap(s, t)?;
                    Some(lerp(
                        fine.lookup(s, t, channel, fill),
                        coarse.lookup(s, t, channel, fill),
                        offset,
                    ))
                })
            }
            _ => {
                let layer = &self.levels()[0];
                filtered(sampler, options, |u, v| {
                    let (s, t) = quad.at(u, v);
                    let (s, t) = self.wrap(s, t)?;
                    Some(layer.lookup(s, t, channel, fill))
                })
            }
        };

        result.unwrap_or(fill)
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.cache.texture_closed();
    }
}
