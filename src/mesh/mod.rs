pub mod scatter;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SpectraError;

/// Particle-to-grid assignment kernels, in order of increasing support.
///
/// These are the first four B-splines: the 1-D Fourier window of order p is
/// sinc^p(k/(2N)) with p = 1 (NGP) through 4 (PCS). Cell centers sit at
/// (c + 1/2)/N, so the 1-D kernel argument for cell c and grid coordinate
/// u = x·N is t = u - c - 1/2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentKernel {
    Ngp,
    Cic,
    Tsc,
    Pcs,
}

impl FromStr for AssignmentKernel {
    type Err = SpectraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NGP" => Ok(Self::Ngp),
            "CIC" => Ok(Self::Cic),
            "TSC" => Ok(Self::Tsc),
            "PCS" => Ok(Self::Pcs),
            _ => Err(SpectraError::UnknownKernel(s.to_string())),
        }
    }
}

impl fmt::Display for AssignmentKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ngp => "NGP",
            Self::Cic => "CIC",
            Self::Tsc => "TSC",
            Self::Pcs => "PCS",
        };
        f.write_str(name)
    }
}

impl AssignmentKernel {
    /// Cells touched along each axis.
    pub fn width(&self) -> usize {
        match self {
            Self::Ngp => 1,
            Self::Cic => 2,
            Self::Tsc => 3,
            Self::Pcs => 4,
        }
    }

    /// Exponent of the 1-D sinc window.
    pub fn window_power(&self) -> i32 {
        match self {
            Self::Ngp => 1,
            Self::Cic => 2,
            Self::Tsc => 3,
            Self::Pcs => 4,
        }
    }

    /// Ghost planes needed on each side for an unshifted scatter. The
    /// interlaced scatter needs one extra plane on the right.
    pub fn ghost_planes(&self) -> usize {
        match self {
            Self::Ngp => 0,
            Self::Cic => 1,
            Self::Tsc | Self::Pcs => 2,
        }
    }

    /// Leftmost touched cell for grid coordinate `u = x·N`.
    pub fn base_cell(&self, u: f64) -> i64 {
        let w = self.width() as i64;
        if w % 2 == 1 {
            u.floor() as i64 - (w - 1) / 2
        } else {
            (u + 0.5).floor() as i64 - w / 2
        }
    }

    /// 1-D weight at signed cell-center distance `t`.
    pub fn weight_1d(&self, t: f64) -> f64 {
        let a = t.abs();
        match self {
            Self::Ngp => {
                if a <= 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Cic => {
                if a < 1.0 {
                    1.0 - a
                } else {
                    0.0
                }
            }
            Self::Tsc => {
                if a < 0.5 {
                    0.75 - a * a
                } else if a < 1.5 {
                    0.5 * (1.5 - a) * (1.5 - a)
                } else {
                    0.0
                }
            }
            Self::Pcs => {
                if a < 1.0 {
                    (4.0 - 6.0 * a * a + 3.0 * a * a * a) / 6.0
                } else if a < 2.0 {
                    let b = 2.0 - a;
                    b * b * b / 6.0
                } else {
                    0.0
                }
            }
        }
    }

    /// 1-D Fourier window at integer frequency `jprime` of an N-cell axis.
    pub fn window_1d(&self, jprime: f64, n: usize) -> f64 {
        sinc(std::f64::consts::PI * jprime / n as f64).powi(self.window_power())
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-8 { 1.0 } else { x.sin() / x }
}
