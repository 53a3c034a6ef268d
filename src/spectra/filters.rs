use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpectraError};
use crate::grid::slab::{GridStatus, SlabGrid};

/// Arguments below this are treated as the k → 0 limit, where every filter
/// passes unity.
const SMALL_KR: f64 = 1e-5;

/// Fourier-space smoothing kernels applied as F(|k|·R).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmoothingFilter {
    /// Hard cutoff: passes kR < 1, strictly.
    SharpK,
    Gaussian,
    /// Real-space spherical top-hat; defined for d = 2 and 3 only.
    TopHat,
}

impl FromStr for SmoothingFilter {
    type Err = SpectraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sharpk" => Ok(Self::SharpK),
            "gaussian" => Ok(Self::Gaussian),
            "tophat" => Ok(Self::TopHat),
            _ => Err(SpectraError::UnknownKernel(s.to_string())),
        }
    }
}

impl fmt::Display for SmoothingFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SharpK => "sharpk",
            Self::Gaussian => "gaussian",
            Self::TopHat => "tophat",
        };
        f.write_str(name)
    }
}

impl SmoothingFilter {
    /// Filter value at `x = kR` in `dim` dimensions.
    ///
    /// The top-hat must have been validated against `dim` beforehand; other
    /// filters ignore it.
    pub fn evaluate(&self, x: f64, dim: usize) -> f64 {
        if x.abs() < SMALL_KR {
            return 1.0;
        }
        match self {
            Self::SharpK => {
                if x < 1.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Gaussian => (-0.5 * x * x).exp(),
            Self::TopHat => match dim {
                2 => 2.0 * bessel_j1(x) / x,
                3 => 3.0 * (x.sin() - x * x.cos()) / (x * x * x),
                _ => unreachable!("top-hat dimension validated by the caller"),
            },
        }
    }
}

/// Multiply every Fourier amplitude by F(|k|·R).
pub fn smooth_fourier_grid<const D: usize>(
    grid: &mut SlabGrid<D>,
    r: f64,
    filter: SmoothingFilter,
) -> Result<()> {
    grid.require(GridStatus::Fourier)?;
    if filter == SmoothingFilter::TopHat && !(D == 2 || D == 3) {
        return Err(SpectraError::UnsupportedDim(D));
    }

    let n = grid.n();
    let nz = grid.nz();
    let x_start = grid.local_x_start();
    let lines_per_plane = n.pow(D as u32 - 2);
    let fold = |j: usize| -> f64 {
        if j <= n / 2 {
            j as f64
        } else {
            j as f64 - n as f64
        }
    };

    grid.fourier_slice_mut()
        .par_chunks_mut(nz)
        .enumerate()
        .for_each(|(row, line)| {
            use std::f64::consts::TAU;
            let kx = TAU * fold(x_start + row / lines_per_plane);
            let mut krow2 = kx * kx;
            let mut rest = row % lines_per_plane;
            for _ in 1..D - 1 {
                let k = TAU * fold(rest % n);
                rest /= n;
                krow2 += k * k;
            }
            for (jz, amp) in line.iter_mut().enumerate() {
                let kz = TAU * jz as f64;
                let kmag = (krow2 + kz * kz).sqrt();
                *amp *= filter.evaluate(kmag * r, D);
            }
        });
    Ok(())
}

/// Bessel function of the first kind, order one, by the standard rational
/// approximations (|error| below 1e-7 everywhere).
fn bessel_j1(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 8.0 {
        let y = x * x;
        let num = x
            * (72_362_614_232.0
                + y * (-7_895_059_235.0
                    + y * (242_396_853.1
                        + y * (-2_972_611.439
                            + y * (15_704.482_60 + y * (-30.160_366_06))))));
        let den = 144_725_228_442.0
            + y * (2_300_535_178.0
                + y * (18_583_304.74 + y * (99_447.433_94 + y * (376.999_139_7 + y))));
        num / den
    } else {
        let z = 8.0 / ax;
        let y = z * z;
        let xx = ax - 2.356_194_491;
        let p1 = 1.0
            + y * (0.183_105e-2
                + y * (-0.351_639_649_6e-4
                    + y * (0.245_752_017_4e-5 + y * (-0.240_337_019e-6))));
        let p2 = 0.046_874_999_95
            + y * (-0.200_269_087_3e-3
                + y * (0.844_919_909_6e-5
                    + y * (-0.882_289_87e-6 + y * 0.105_787_412e-6)));
        let ans = (0.636_619_772 / ax).sqrt() * (xx.cos() * p1 - z * xx.sin() * p2);
        if x < 0.0 { -ans } else { ans }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SoloComm;
    use rustfft::num_complex::Complex;

    #[test]
    fn test_filter_from_str() {
        assert_eq!("sharpk".parse::<SmoothingFilter>().unwrap(), SmoothingFilter::SharpK);
        assert_eq!("Gaussian".parse::<SmoothingFilter>().unwrap(), SmoothingFilter::Gaussian);
        assert!(matches!(
            "boxcar".parse::<SmoothingFilter>(),
            Err(SpectraError::UnknownKernel(_))
        ));
    }

    #[test]
    fn test_filters_pass_unity_at_origin() {
        for f in [
            SmoothingFilter::SharpK,
            SmoothingFilter::Gaussian,
            SmoothingFilter::TopHat,
        ] {
            assert_eq!(f.evaluate(1e-7, 3), 1.0);
        }
    }

    #[test]
    fn test_sharpk_cut_is_strict() {
        let f = SmoothingFilter::SharpK;
        assert_eq!(f.evaluate(0.999, 3), 1.0);
        assert_eq!(f.evaluate(1.0, 3), 0.0);
        assert_eq!(f.evaluate(1.5, 3), 0.0);
    }

    #[test]
    fn test_bessel_j1_reference_values() {
        assert!((bessel_j1(1.0) - 0.440_050_585_7).abs() < 1e-7);
        // First zero of J1.
        assert!(bessel_j1(3.831_705_970_2).abs() < 1e-7);
        assert!((bessel_j1(10.0) + 0.043_472_746_17).abs() < 1e-6);
    }

    #[test]
    fn test_tophat_rejects_unsupported_dim() {
        let comm = SoloComm;
        let mut grid = SlabGrid::<4>::new(4, 0, 0, &comm).unwrap();
        let fft = crate::grid::fft::FftDriver::new(4);
        fft.forward(&mut grid, &comm).unwrap();
        let err = smooth_fourier_grid(&mut grid, 0.5, SmoothingFilter::TopHat);
        assert!(matches!(err, Err(SpectraError::UnsupportedDim(4))));
        // Dimension-agnostic filters still run.
        smooth_fourier_grid(&mut grid, 0.5, SmoothingFilter::Gaussian).unwrap();
    }

    #[test]
    fn test_tophat_applies_analytic_form_per_mode() {
        // Scenario: unit amplitudes times the 3-d top-hat at R = 2/N.
        let comm = SoloComm;
        let n = 32;
        let r = 2.0 / n as f64;
        let mut grid = SlabGrid::<3>::new(n, 0, 0, &comm).unwrap();
        grid.set_status(crate::grid::slab::GridStatus::Fourier);
        grid.fill_fourier(Complex::new(1.0, 0.0));
        smooth_fourier_grid(&mut grid, r, SmoothingFilter::TopHat).unwrap();
        for idx in 0..grid.n_fourier_cells_local() {
            let (_, kmag) = grid.fourier_wavevector_and_norm(idx);
            let x = kmag * r;
            let expect = if x < SMALL_KR {
                1.0
            } else {
                3.0 * (x.sin() - x * x.cos()) / (x * x * x)
            };
            let got = grid.get_fourier(idx).re;
            assert!((got - expect).abs() < 1e-12, "mode {idx}: {got} vs {expect}");
        }
    }
}
