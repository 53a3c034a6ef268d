use serde::{Deserialize, Serialize};

use crate::comm::Communicator;
use crate::error::{Result, SpectraError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinningScale {
    Linear,
    Log,
}

/// Shared radial bin geometry for the spectrum accumulators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RadialBins {
    pub n_bins: usize,
    pub k_min: f64,
    pub k_max: f64,
    pub scale: BinningScale,
}

impl RadialBins {
    pub fn new(n_bins: usize, k_min: f64, k_max: f64, scale: BinningScale) -> Result<Self> {
        if n_bins == 0 {
            return Err(SpectraError::BadBinning("need at least one bin".into()));
        }
        if k_min < 0.0 || k_min >= k_max {
            return Err(SpectraError::BadBinning(format!(
                "range [{k_min}, {k_max}] is empty or negative"
            )));
        }
        if scale == BinningScale::Log && k_min <= 0.0 {
            return Err(SpectraError::BadBinning(
                "log binning needs k_min > 0".into(),
            ));
        }
        Ok(Self {
            n_bins,
            k_min,
            k_max,
            scale,
        })
    }

    /// Bin holding `k`, if any. `k == k_max` lands in the last bin so the
    /// caller can put the cut exactly at the Nyquist norm.
    pub fn locate(&self, k: f64) -> Option<usize> {
        if k < self.k_min || k > self.k_max {
            return None;
        }
        let frac = match self.scale {
            BinningScale::Linear => (k - self.k_min) / (self.k_max - self.k_min),
            BinningScale::Log => (k / self.k_min).ln() / (self.k_max / self.k_min).ln(),
        };
        Some(((frac * self.n_bins as f64) as usize).min(self.n_bins - 1))
    }

    pub fn center(&self, i: usize) -> f64 {
        let frac = (i as f64 + 0.5) / self.n_bins as f64;
        match self.scale {
            BinningScale::Linear => self.k_min + frac * (self.k_max - self.k_min),
            BinningScale::Log => self.k_min * (self.k_max / self.k_min).powf(frac),
        }
    }

    pub fn lower_edge(&self, i: usize) -> f64 {
        let frac = i as f64 / self.n_bins as f64;
        match self.scale {
            BinningScale::Linear => self.k_min + frac * (self.k_max - self.k_min),
            BinningScale::Log => self.k_min * (self.k_max / self.k_min).powf(frac),
        }
    }

    pub fn upper_edge(&self, i: usize) -> f64 {
        self.lower_edge(i + 1)
    }

    pub fn width(&self, i: usize) -> f64 {
        self.upper_edge(i) - self.lower_edge(i)
    }
}

/// Radially binned power spectrum accumulator.
///
/// `kbin`, `pofk` and `count` accumulate weighted sums until `normalize()`
/// all-reduces them and turns the first two into count-weighted means. Empty
/// bins report the bin midpoint and zero power.
#[derive(Debug, Clone, Serialize)]
pub struct PowerSpectrumBinning {
    pub bins: RadialBins,
    pub kbin: Vec<f64>,
    pub pofk: Vec<f64>,
    pub count: Vec<f64>,
}

impl PowerSpectrumBinning {
    pub fn new(n_bins: usize, k_min: f64, k_max: f64, scale: BinningScale) -> Result<Self> {
        let bins = RadialBins::new(n_bins, k_min, k_max, scale)?;
        Ok(Self {
            bins,
            kbin: vec![0.0; n_bins],
            pofk: vec![0.0; n_bins],
            count: vec![0.0; n_bins],
        })
    }

    /// Linear bins spanning the full mode range of an N-cell grid, one bin
    /// per integer frequency shell.
    pub fn for_grid(n: usize) -> Result<Self> {
        use std::f64::consts::TAU;
        Self::new(n / 2, 0.0, TAU * (n / 2) as f64, BinningScale::Linear)
    }

    pub fn n_bins(&self) -> usize {
        self.bins.n_bins
    }

    pub fn reset(&mut self) {
        self.kbin.fill(0.0);
        self.pofk.fill(0.0);
        self.count.fill(0.0);
    }

    pub fn add(&mut self, k: f64, value: f64, weight: f64) {
        if let Some(i) = self.bins.locate(k) {
            self.kbin[i] += weight * k;
            self.pofk[i] += weight * value;
            self.count[i] += weight;
        }
    }

    /// All-reduce the accumulators and form count-weighted means. Collective.
    pub fn normalize(&mut self, comm: &dyn Communicator) {
        let n = self.n_bins();
        let mut buf = Vec::with_capacity(3 * n);
        buf.extend_from_slice(&self.count);
        buf.extend_from_slice(&self.kbin);
        buf.extend_from_slice(&self.pofk);
        comm.all_reduce_sum_f64(&mut buf);
        self.count.copy_from_slice(&buf[..n]);
        self.kbin.copy_from_slice(&buf[n..2 * n]);
        self.pofk.copy_from_slice(&buf[2 * n..]);

        for i in 0..n {
            if self.count[i] > 0.0 {
                self.kbin[i] /= self.count[i];
                self.pofk[i] /= self.count[i];
            } else {
                self.kbin[i] = self.bins.center(i);
                self.pofk[i] = 0.0;
            }
        }
    }

    /// Subtract a flat (shot-noise) floor from every bin. Call after
    /// `normalize`.
    pub fn subtract_shot_noise(&mut self, floor: f64) {
        for p in &mut self.pofk {
            *p -= floor;
        }
    }
}

/// Accumulator for the n-point polyspectrum over `n_bins` radial shells.
///
/// `p123`/`n123` are flat tensors of length `n_bins^ORDER` indexed mixed-radix
/// by the per-leg shell indices; `computed` flags the tuples the engine
/// actually integrated, distinguishing a genuine zero from an unfilled cell.
/// `q123` carries the reduced bispectrum for ORDER == 3.
#[derive(Debug, Clone, Serialize)]
pub struct PolyspectrumBinning<const ORDER: usize> {
    pub bins: RadialBins,
    pub p123: Vec<f64>,
    pub n123: Vec<f64>,
    pub q123: Vec<f64>,
    pub computed: Vec<bool>,
    /// Count-weighted mean k per shell.
    pub kmean: Vec<f64>,
    /// In-shell power per shell.
    pub pofk: Vec<f64>,
}

pub type BispectrumBinning = PolyspectrumBinning<3>;

impl<const ORDER: usize> PolyspectrumBinning<ORDER> {
    pub fn new(n_bins: usize, k_min: f64, k_max: f64, scale: BinningScale) -> Result<Self> {
        if ORDER < 2 {
            return Err(SpectraError::BadBinning(format!(
                "polyspectrum order must be at least 2, got {ORDER}"
            )));
        }
        let bins = RadialBins::new(n_bins, k_min, k_max, scale)?;
        let len = n_bins.pow(ORDER as u32);
        Ok(Self {
            bins,
            p123: vec![0.0; len],
            n123: vec![0.0; len],
            q123: if ORDER == 3 { vec![0.0; len] } else { Vec::new() },
            computed: vec![false; len],
            kmean: vec![0.0; n_bins],
            pofk: vec![0.0; n_bins],
        })
    }

    pub fn n_bins(&self) -> usize {
        self.bins.n_bins
    }

    /// Mixed-radix flat index of a shell tuple.
    pub fn index_of(&self, tuple: &[usize; ORDER]) -> usize {
        let mut idx = 0;
        for &i in tuple {
            debug_assert!(i < self.bins.n_bins);
            idx = idx * self.bins.n_bins + i;
        }
        idx
    }

    pub fn get(&self, tuple: &[usize; ORDER]) -> f64 {
        self.p123[self.index_of(tuple)]
    }

    pub fn reset(&mut self) {
        self.p123.fill(0.0);
        self.n123.fill(0.0);
        self.q123.fill(0.0);
        self.computed.fill(false);
        self.kmean.fill(0.0);
        self.pofk.fill(0.0);
    }
}
