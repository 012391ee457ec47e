//! Direction and position indexed lookups
//!
//! Every variant takes a vector `d` plus two differentials `du` and `dv`
//! describing the footprint of the shading sample.

use crate::deep_shadow::DeepShadowMap;
use crate::layer::TextureLayer;
use crate::math::{add, scale, transform_point, Color, Matrix, Vec3, BLACK};
use crate::options::LookupOptions;
use crate::sampler::SampleSource;
use crate::texture::{filtered, Quad, Texture};

/// Cube face order of a cubic environment
pub const CUBE_FACES: [&str; 6] = ["px", "py", "pz", "nx", "ny", "nz"];

/// Single depth map with its lookup-space to NDC transform
#[derive(Debug)]
pub struct ShadowMap {
    layer: TextureLayer,
    to_ndc: Matrix,
}

impl ShadowMap {
    pub fn new(layer: TextureLayer, to_ndc: Matrix) -> Self {
        Self { layer, to_ndc }
    }

    pub fn layer(&self) -> &TextureLayer {
        &self.layer
    }

    pub fn to_ndc(&self) -> &Matrix {
        &self.to_ndc
    }

    /// Fraction of the footprint around `d` that lies behind the stored
    /// depth
    ///
    /// The footprint is scaled by `1 + options.blur`. Positions that
    /// project outside the map count as lit.
    pub fn lookup<S>(
        &self,
        sampler: &mut S,
        d: Vec3,
        du: Vec3,
        dv: Vec3,
        options: &LookupOptions,
    ) -> Color
    where
        S: SampleSource + ?Sized,
    {
        let blur = 1.0 + options.blur;
        let occlusion = filtered(sampler, options, |u, v| {
            let (x, y) = ((u - 0.5) * blur, (v - 0.5) * blur);
            let p = add(add(d, scale(du, x)), scale(dv, y));
            let [s, t, z] = transform_point(&self.to_ndc, p);
            if !(0.0..=1.0).contains(&s) || !(0.0..=1.0).contains(&t) {
                return Some(BLACK);
            }
            let occluded = z - options.shadow_bias > self.layer.lookupz(s, t);
            Some(if occluded { [1.0; 3] } else { BLACK })
        });
        occlusion.unwrap_or(BLACK)
    }
}

/// Environment map variants
#[derive(Debug)]
pub enum Environment {
    /// Six faces in [`CUBE_FACES`] order
    Cubic(Box<[Texture; 6]>),
    /// One texture indexed by a sphere projection
    Spherical(Texture),
    Shadow(ShadowMap),
    DeepShadow(DeepShadowMap),
}

impl Environment {
    pub fn kind(&self) -> &'static str {
        match self {
            Environment::Cubic(_) => "cubic environment",
            Environment::Spherical(_) => "spherical environment",
            Environment::Shadow(_) => "shadow map",
            Environment::DeepShadow(_) => "deep shadow map",
        }
    }

    /// Filtered lookup for direction or position `d`
    ///
    /// Environments return colour, shadow variants return the occluded
    /// fraction.
    pub fn lookup<S>(
        &self,
        sampler: &mut S,
        d: Vec3,
        du: Vec3,
        dv: Vec3,
        options: &LookupOptions,
    ) -> Color
    where
        S: SampleSource + ?Sized,
    {
        match self {
            Environment::Cubic(faces) => {
                let (face, quad) = cube_quad(d, du, dv);
                faces[face].lookup4(sampler, &quad, options)
            }
            Environment::Spherical(texture) => {
                let quad = sphere_quad(d, du, dv);
                texture.lookup4(sampler, &quad, options)
            }
            Environment::Shadow(map) => map.lookup(sampler, d, du, dv, options),
            Environment::DeepShadow(map) => map.lookup(sampler, d, du, dv, options),
        }
    }
}

/// Dominant axis of `d`; ties go to the earlier axis
fn major_axis(d: Vec3) -> usize {
    let [x, y, z] = d.map(f32::abs);
    if y > x {
        if z > y {
            2
        } else {
            1
        }
    } else if z > y && z > x {
        2
    } else {
        0
    }
}

/// Face index and footprint on that face for direction `d`
fn cube_quad(d: Vec3, du: Vec3, dv: Vec3) -> (usize, Quad) {
    let axis = major_axis(d);
    let (uaxis, vaxis) = match axis {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    };
    let (face, c) = if d[axis] > 0.0 {
        (axis, 1.0)
    } else {
        (axis + 3, -1.0)
    };

    // Onto the face plane, then from [-1, 1] to [0, 1]
    let project = |v: Vec3| -> Option<[f32; 2]> {
        if v[axis] == 0.0 {
            return None;
        }
        let t = c / v[axis];
        Some([(v[uaxis] * t + 1.0) * 0.5, (v[vaxis] * t + 1.0) * 0.5])
    };

    let centre = project(d).unwrap_or([0.5, 0.5]);
    let offset = |v: Vec3| {
        project(v).map_or([0.0, 0.0], |p| [p[0] - centre[0], p[1] - centre[1]])
    };
    let quad = Quad::parallelogram(centre, offset(add(d, du)), offset(add(d, dv)));
    (face, quad)
}

fn sphere_point(v: Vec3) -> [f32; 2] {
    let [x, y, z] = v;
    let m = 2.0 * (x * x + y * y + (z + 1.0) * (z + 1.0)).sqrt();
    let m = m.max(f32::MIN_POSITIVE);
    [x / m + 0.5, y / m + 0.5]
}

/// Footprint on a sphere map for direction `d`
fn sphere_quad(d: Vec3, du: Vec3, dv: Vec3) -> Quad {
    let centre = sphere_point(d);
    let offset = |v: Vec3| {
        let p = sphere_point(v);
        [p[0] - centre[0], p[1] - centre[1]]
    };
    Quad::parallelogram(centre, offset(add(d, du)), offset(add(d, dv)))
}
