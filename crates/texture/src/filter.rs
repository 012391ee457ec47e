//! Reconstruction filters for area lookups
//!
//! Area lookups draw sample positions `(r0, r1)` in the unit square and
//! weight each texel fetch by `filter.weight(r0 - 0.5, r1 - 0.5, 1.0, 1.0)`.

use std::f32::consts::PI;

/// Filter kernel shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    #[default]
    Box,
    Triangle,
    Gaussian,
    Sinc,
    Disk,
    CatmullRom,
    Mitchell,
    Bessel,
    Lanczos2,
    Lanczos3,
    Hann,
    Hamming,
}

impl Filter {
    /// Filter for a host enumeration value; unknown values give [`Filter::Box`]
    pub fn from_index(index: i32) -> Self {
        match index {
            1 => Filter::Triangle,
            2 => Filter::Gaussian,
            3 => Filter::Sinc,
            4 => Filter::Disk,
            5 => Filter::CatmullRom,
            6 => Filter::Mitchell,
            7 => Filter::Bessel,
            8 => Filter::Lanczos2,
            9 => Filter::Lanczos3,
            10 => Filter::Hann,
            11 => Filter::Hamming,
            _ => Filter::Box,
        }
    }

    /// Weight at offset `(x, y)` from the centre of a `w` x `h` kernel
    pub fn weight(self, x: f32, y: f32, w: f32, h: f32) -> f32 {
        match self {
            Filter::Box => {
                let (w, h) = (w * 0.5, h * 0.5);
                if x.abs() <= w && y.abs() <= h {
                    1.0
                } else {
                    0.0
                }
            }
            Filter::Triangle => {
                let (w, h) = (w * 0.5, h * 0.5);
                if x.abs() <= w && y.abs() <= h {
                    (w - x.abs()) * (h - y.abs())
                } else {
                    0.0
                }
            }
            Filter::Gaussian => {
                let x = x * 2.0 / w;
                let y = y * 2.0 / h;
                (-2.0 * (x * x + y * y)).exp()
            }
            Filter::Sinc => windowed_sinc(x, w) * windowed_sinc(y, h),
            Filter::Disk => {
                let (w, h) = (w * 0.5, h * 0.5);
                if x * x / (w * w) + y * y / (h * h) < 1.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Filter::CatmullRom => {
                let d2 = x * x + y * y;
                let d = d2.sqrt();
                if d < 1.0 {
                    1.5 * d * d2 - 2.5 * d2 + 1.0
                } else if d < 2.0 {
                    -d * d2 * 0.5 + 2.5 * d2 - 4.0 * d + 2.0
                } else {
                    0.0
                }
            }
            Filter::Mitchell => mitchell((x / w).hypot(y / h)),
            Filter::Bessel => {
                let (hw, hh) = (w * 0.5, h * 0.5);
                let t = x * x / (hw * hw) + y * y / (hh * hh);
                if t >= 1.0 {
                    return 0.0;
                }
                let d = x.hypot(y);
                if d > 0.0 {
                    let window = (0.5 * PI * t.sqrt()).cos();
                    window * 2.0 * bessel_j1(PI * d) / d
                } else {
                    PI
                }
            }
            Filter::Lanczos2 => lanczos((x / w).hypot(y / h), 2.0),
            Filter::Lanczos3 => lanczos((x / w).hypot(y / h), 3.0),
            Filter::Hann => hann((x / w).hypot(y / h), 0.5),
            Filter::Hamming => hann((x / w).hypot(y / h), 0.54),
        }
    }
}

/// Sinc with a half-period cosine window of width `w`
fn windowed_sinc(x: f32, w: f32) -> f32 {
    if x == 0.0 {
        return 1.0;
    }
    let x = x * PI;
    (0.5 * x / w).cos() * x.sin() / x
}

fn sinc(t: f32) -> f32 {
    windowed_sinc(t, 1.0)
}

fn lanczos(t: f32, lobes: f32) -> f32 {
    if t < lobes {
        sinc(t) * sinc(t / lobes)
    } else {
        0.0
    }
}

fn mitchell(t: f32) -> f32 {
    const B: f32 = 1.0 / 3.0;
    const C: f32 = 1.0 / 3.0;
    const D: f32 = 1.0 / 6.0;

    let cubic = if t > 2.0 {
        0.0
    } else if t > 1.0 {
        (((-B - 6.0 * C) * t + (6.0 * B + 30.0 * C)) * t + (-12.0 * B - 48.0 * C)) * t
            + (8.0 * B + 24.0 * C)
    } else {
        ((12.0 - 9.0 * B - 6.0 * C) * t + (-18.0 + 12.0 * B + 6.0 * C)) * t * t + (6.0 - 2.0 * B)
    };
    cubic * D
}

/// Raised cosine over a 3-wide window
fn hann(t: f32, a: f32) -> f32 {
    let n = 2.0;
    if t < n * 0.5 {
        a + (1.0 - a) * (2.0 * PI * t / n).cos()
    } else {
        0.0
    }
}

/// Bessel function of the first kind, order one (rational approximation)
fn bessel_j1(x: f32) -> f32 {
    let x = x as f64;
    let ax = x.abs();
    let value = if ax < 8.0 {
        let y = x * x;
        let num = x
            * (72362614232.0
                + y * (-7895059235.0
                    + y * (242396853.1
                        + y * (-2972611.439 + y * (15704.48260 + y * (-30.16036606))))));
        let den = 144725228442.0
            + y * (2300535178.0
                + y * (18583304.74 + y * (99447.43394 + y * (376.9991397 + y))));
        num / den
    } else {
        let z = 8.0 / ax;
        let y = z * z;
        let xx = ax - 2.356194491;
        let p = 1.0
            + y * (0.183105e-2
                + y * (-0.3516396496e-4 + y * (0.2457520174e-5 + y * (-0.240337019e-6))));
        let q = 0.04687499995
            + y * (-0.2002690873e-3
                + y * (0.8449199096e-5 + y * (-0.88228987e-6 + y * 0.105787412e-6)));
        let ans = (0.636619772 / ax).sqrt() * (xx.cos() * p - z * xx.sin() * q);
        if x < 0.0 {
            -ans
        } else {
            ans
        }
    };
    value as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Filter; 12] = [
        Filter::Box,
        Filter::Triangle,
        Filter::Gaussian,
        Filter::Sinc,
        Filter::Disk,
        Filter::CatmullRom,
        Filter::Mitchell,
        Filter::Bessel,
        Filter::Lanczos2,
        Filter::Lanczos3,
        Filter::Hann,
        Filter::Hamming,
    ];

    #[test]
    fn test_from_index_follows_host_order() {
        for (i, filter) in ALL.iter().enumerate() {
            assert_eq!(Filter::from_index(i as i32), *filter);
        }
        assert_eq!(Filter::from_index(-1), Filter::Box);
        assert_eq!(Filter::from_index(42), Filter::Box);
    }

    #[test]
    fn test_every_filter_is_positive_at_centre() {
        for filter in ALL {
            assert!(filter.weight(0.0, 0.0, 1.0, 1.0) > 0.0, "{filter:?}");
        }
    }

    #[test]
    fn test_box_support() {
        assert_eq!(Filter::Box.weight(0.5, -0.5, 1.0, 1.0), 1.0);
        assert_eq!(Filter::Box.weight(0.51, 0.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_triangle_falls_off() {
        assert_eq!(Filter::Triangle.weight(0.0, 0.0, 1.0, 1.0), 0.25);
        assert_eq!(Filter::Triangle.weight(0.25, 0.0, 1.0, 1.0), 0.125);
        assert_eq!(Filter::Triangle.weight(0.5, 0.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_gaussian_is_symmetric() {
        let a = Filter::Gaussian.weight(0.3, 0.1, 1.0, 1.0);
        let b = Filter::Gaussian.weight(-0.3, -0.1, 1.0, 1.0);
        assert_eq!(a, b);
        assert!(a < Filter::Gaussian.weight(0.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn test_mitchell_centre_value() {
        // (6 - 2B) / 6 with B = 1/3
        let expected = (6.0 - 2.0 / 3.0) / 6.0;
        assert!((Filter::Mitchell.weight(0.0, 0.0, 1.0, 1.0) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_bessel_limit_at_origin() {
        let near = Filter::Bessel.weight(1e-4, 0.0, 1.0, 1.0);
        assert!((near - PI).abs() < 1e-3);
        assert_eq!(Filter::Bessel.weight(0.6, 0.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_bessel_j1_known_values() {
        assert!((bessel_j1(1.0) - 0.440_050_6).abs() < 1e-6);
        assert!((bessel_j1(10.0) - 0.043_472_75).abs() < 1e-5);
        assert!((bessel_j1(-1.0) + 0.440_050_6).abs() < 1e-6);
    }
}
