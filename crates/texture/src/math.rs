//! Small vector and matrix helpers
//!
//! Matrices are 4x4, row-major, and act on row vectors: a point `p`
//! transforms as `[x y z 1] * M`, so `a * b` applies `a` first.

/// RGB colour
pub type Color = [f32; 3];

/// 3D point or direction
pub type Vec3 = [f32; 3];

/// 4x4 row-major matrix
pub type Matrix = [f32; 16];

/// Identity matrix
pub const IDENTITY: Matrix = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Black
pub const BLACK: Color = [0.0; 3];

/// `a * b`: transform by `a`, then by `b`
pub fn mul_matrix(a: &Matrix, b: &Matrix) -> Matrix {
    let mut out = [0.0; 16];
    for row in 0..4 {
        for col in 0..4 {
            out[row * 4 + col] = (0..4).map(|k| a[row * 4 + k] * b[k * 4 + col]).sum();
        }
    }
    out
}

/// Transform a point, dividing by the homogeneous coordinate
pub fn transform_point(m: &Matrix, p: Vec3) -> Vec3 {
    let [x, y, z] = p;
    let tx = x * m[0] + y * m[4] + z * m[8] + m[12];
    let ty = x * m[1] + y * m[5] + z * m[9] + m[13];
    let tz = x * m[2] + y * m[6] + z * m[10] + m[14];
    let w = x * m[3] + y * m[7] + z * m[11] + m[15];
    if w != 0.0 && w != 1.0 {
        [tx / w, ty / w, tz / w]
    } else {
        [tx, ty, tz]
    }
}

pub fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn scale(a: Vec3, s: f32) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

/// `a + (b - a) * t`
pub fn lerp(a: Color, b: Color, t: f32) -> Color {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}
