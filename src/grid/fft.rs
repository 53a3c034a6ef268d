use std::sync::Arc;

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::comm::Communicator;
use crate::error::{Result, SpectraError};
use crate::grid::slab::{GridStatus, SlabGrid, slab_range};

/// Planned transforms for one grid size.
///
/// The packed last axis uses a real-to-complex pair, every other axis a
/// complex pass of the same length. Axis 0 is distributed: its lines are
/// gathered by an all-to-all slab transpose against the second storage axis,
/// transformed locally, and scattered back.
///
/// Normalization: `forward` scales by `1/N^D` so the DC amplitude equals the
/// mean of the real field; `inverse` applies the unnormalized conjugate
/// transforms, making the two exact inverses of each other.
pub struct FftDriver {
    n: usize,
    r2c: Arc<dyn RealToComplex<f64>>,
    c2r: Arc<dyn ComplexToReal<f64>>,
    fft_fwd: Arc<dyn Fft<f64>>,
    fft_inv: Arc<dyn Fft<f64>>,
}

impl FftDriver {
    pub fn new(n: usize) -> Self {
        let mut real_planner = RealFftPlanner::<f64>::new();
        let mut planner = FftPlanner::<f64>::new();
        Self {
            n,
            r2c: real_planner.plan_fft_forward(n),
            c2r: real_planner.plan_fft_inverse(n),
            fft_fwd: planner.plan_fft_forward(n),
            fft_inv: planner.plan_fft_inverse(n),
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Distributed real-to-complex transform; Real → Fourier.
    pub fn forward<const D: usize>(
        &self,
        grid: &mut SlabGrid<D>,
        comm: &dyn Communicator,
    ) -> Result<()> {
        grid.require(GridStatus::Real)?;
        debug_assert_eq!(grid.n(), self.n);

        let n = self.n;
        let nz = grid.nz();
        let lines_per_plane = n.pow(D as u32 - 2);
        let mut line = vec![0.0f64; n];
        let mut out = vec![Complex::new(0.0, 0.0); nz];
        let mut scratch = self.r2c.make_scratch_vec();

        for px in 0..grid.local_nx() as i64 {
            for l in 0..lines_per_plane {
                let plane = grid.real_plane(px);
                line.copy_from_slice(&plane[l * n..(l + 1) * n]);
                self.r2c
                    .process_with_scratch(&mut line, &mut out, &mut scratch)
                    .map_err(|e| {
                        SpectraError::Precondition(format!("real-to-complex pass failed: {e}"))
                    })?;
                let base = (px as usize * lines_per_plane + l) * nz;
                grid.fourier_slice_mut()[base..base + nz].copy_from_slice(&out);
            }
        }

        self.c2c_mid_axes(grid, &self.fft_fwd);
        self.c2c_first_axis(grid, comm, &self.fft_fwd);

        let scale = 1.0 / (n as f64).powi(D as i32);
        for amp in grid.fourier_slice_mut() {
            *amp *= scale;
        }

        grid.set_status(GridStatus::Fourier);
        Ok(())
    }

    /// Distributed complex-to-real transform; Fourier → Real.
    pub fn inverse<const D: usize>(
        &self,
        grid: &mut SlabGrid<D>,
        comm: &dyn Communicator,
    ) -> Result<()> {
        grid.require(GridStatus::Fourier)?;
        debug_assert_eq!(grid.n(), self.n);

        self.c2c_first_axis(grid, comm, &self.fft_inv);
        self.c2c_mid_axes(grid, &self.fft_inv);

        let n = self.n;
        let nz = grid.nz();
        let lines_per_plane = n.pow(D as u32 - 2);
        let mut line = vec![Complex::new(0.0, 0.0); nz];
        let mut out = vec![0.0f64; n];
        let mut scratch = self.c2r.make_scratch_vec();

        for px in 0..grid.local_nx() as i64 {
            for l in 0..lines_per_plane {
                let base = (px as usize * lines_per_plane + l) * nz;
                line.copy_from_slice(&grid.fourier_slice()[base..base + nz]);
                // DC and Nyquist must be purely real for the packed inverse;
                // clear round-off left by the preceding complex passes.
                line[0].im = 0.0;
                line[nz - 1].im = 0.0;
                self.c2r
                    .process_with_scratch(&mut line, &mut out, &mut scratch)
                    .map_err(|e| {
                        SpectraError::Precondition(format!("complex-to-real pass failed: {e}"))
                    })?;
                let plane = grid.real_plane_mut(px);
                plane[l * n..(l + 1) * n].copy_from_slice(&out);
            }
        }

        grid.set_status(GridStatus::Real);
        Ok(())
    }

    /// In-place complex passes along the fully local middle axes (1..D-1,
    /// excluding the packed axis). No-op for D == 2.
    fn c2c_mid_axes<const D: usize>(&self, grid: &mut SlabGrid<D>, fft: &Arc<dyn Fft<f64>>) {
        let n = self.n;
        let nz = grid.nz();
        let buf = grid.fourier_slice_mut();
        let total = buf.len();
        let mut line = vec![Complex::new(0.0, 0.0); n];
        let mut scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        for axis in 1..D - 1 {
            // Stride of this axis in the packed layout.
            let stride = n.pow((D - 2 - axis) as u32) * nz;
            let mut base = 0;
            while base < total {
                if (base / stride) % n != 0 {
                    base += 1;
                    continue;
                }
                for t in 0..n {
                    line[t] = buf[base + t * stride];
                }
                fft.process_with_scratch(&mut line, &mut scratch);
                for t in 0..n {
                    buf[base + t * stride] = line[t];
                }
                base += 1;
            }
        }
    }

    /// Complex pass along the distributed axis 0.
    ///
    /// The Fourier buffer is viewed as `[local_nx][R][C]` with R the second
    /// storage axis. R is slab-partitioned over the workers; an all-to-all
    /// hands every worker full axis-0 lines for its R rows, the lines are
    /// transformed in place, and a mirror all-to-all restores the x slabs.
    fn c2c_first_axis<const D: usize>(
        &self,
        grid: &mut SlabGrid<D>,
        comm: &dyn Communicator,
        fft: &Arc<dyn Fft<f64>>,
    ) {
        let n = self.n;
        let nz = grid.nz();
        let size = comm.size();
        let local_nx = grid.local_nx();
        let r_total = if D >= 3 { n } else { nz };
        let c_cols = grid.n_fourier_cells_local() / (local_nx * r_total).max(1);
        debug_assert_eq!(local_nx * r_total * c_cols, grid.n_fourier_cells_local());

        let (_, my_r_count) = slab_range(r_total, size, comm.rank());

        // Scatter my x-planes into per-destination blocks, ordered
        // (px, r_row, col) within each block.
        let buf = grid.fourier_slice();
        let mut sends: Vec<Vec<Complex<f64>>> = Vec::with_capacity(size);
        for dest in 0..size {
            let (r_start, r_count) = slab_range(r_total, size, dest);
            let mut block = Vec::with_capacity(local_nx * r_count * c_cols);
            for px in 0..local_nx {
                for rr in r_start..r_start + r_count {
                    let base = (px * r_total + rr) * c_cols;
                    block.extend_from_slice(&buf[base..base + c_cols]);
                }
            }
            sends.push(block);
        }
        let recvd = comm.all_to_all_c64(sends);

        // Assemble full-length x lines, contiguous in x.
        let mut xbuf = vec![Complex::new(0.0, 0.0); my_r_count * c_cols * n];
        for (src, block) in recvd.iter().enumerate() {
            let (x_start, x_count) = slab_range(n, size, src);
            debug_assert_eq!(block.len(), x_count * my_r_count * c_cols);
            for px in 0..x_count {
                for rl in 0..my_r_count {
                    for c in 0..c_cols {
                        xbuf[(rl * c_cols + c) * n + x_start + px] =
                            block[(px * my_r_count + rl) * c_cols + c];
                    }
                }
            }
        }

        let mut scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        for chunk in xbuf.chunks_mut(n) {
            fft.process_with_scratch(chunk, &mut scratch);
        }

        // Mirror exchange back to x slabs.
        let mut sends_back: Vec<Vec<Complex<f64>>> = Vec::with_capacity(size);
        for dest in 0..size {
            let (x_start, x_count) = slab_range(n, size, dest);
            let mut block = Vec::with_capacity(x_count * my_r_count * c_cols);
            for px in 0..x_count {
                for rl in 0..my_r_count {
                    for c in 0..c_cols {
                        block.push(xbuf[(rl * c_cols + c) * n + x_start + px]);
                    }
                }
            }
            sends_back.push(block);
        }
        let returned = comm.all_to_all_c64(sends_back);

        let buf = grid.fourier_slice_mut();
        for (src, block) in returned.iter().enumerate() {
            let (r_start, r_count) = slab_range(r_total, size, src);
            debug_assert_eq!(block.len(), local_nx * r_count * c_cols);
            for px in 0..local_nx {
                for rl in 0..r_count {
                    let base = (px * r_total + r_start + rl) * c_cols;
                    buf[base..base + c_cols].copy_from_slice(
                        &block[(px * r_count + rl) * c_cols..(px * r_count + rl + 1) * c_cols],
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SoloComm;
    use std::f64::consts::TAU;

    #[test]
    fn test_forward_dc_is_mean() {
        let comm = SoloComm;
        let fft = FftDriver::new(8);
        let mut grid = SlabGrid::<3>::new(8, 0, 0, &comm).unwrap();
        grid.fill_real(2.5);
        fft.forward(&mut grid, &comm).unwrap();
        let dc = grid.get_fourier(0);
        assert!((dc.re - 2.5).abs() < 1e-12, "DC = {dc}");
        assert!(dc.im.abs() < 1e-12);
        // Every other amplitude vanishes.
        let max_rest = grid.fourier_slice()[1..]
            .iter()
            .map(|a| a.norm())
            .fold(0.0, f64::max);
        assert!(max_rest < 1e-12, "leakage {max_rest}");
    }

    #[test]
    fn test_forward_isolates_single_mode() {
        let comm = SoloComm;
        let n = 8;
        let fft = FftDriver::new(n);
        let mut grid = SlabGrid::<2>::new(n, 0, 0, &comm).unwrap();
        // cos(2π·3x/N) along axis 0: amplitude 1/2 at j_x = 3, k_z = 0 (the
        // conjugate at j_x = N-3 is stored too since z is the packed axis).
        for x in 0..n as i64 {
            for z in 0..n as i64 {
                grid.set_real([x, z], (TAU * 3.0 * x as f64 / n as f64).cos());
            }
        }
        fft.forward(&mut grid, &comm).unwrap();
        let nz = grid.nz();
        for idx in 0..grid.n_fourier_cells_local() {
            let coord = grid.fourier_coord(idx);
            let amp = grid.get_fourier(idx);
            let expect = if coord[1] == 0 && (coord[0] == 3 || coord[0] == n - 3) {
                0.5
            } else {
                0.0
            };
            assert!(
                (amp.re - expect).abs() < 1e-12 && amp.im.abs() < 1e-12,
                "mode ({},{}) of nz={nz}: {amp} != {expect}",
                coord[0],
                coord[1]
            );
        }
    }

    #[test]
    fn test_roundtrip_identity() {
        let comm = SoloComm;
        let fft = FftDriver::new(6);
        let mut grid = SlabGrid::<3>::new(6, 1, 1, &comm).unwrap();
        // Deterministic pseudo-random field.
        let mut state = 1u64;
        let mut original = Vec::new();
        for x in 0..6i64 {
            for y in 0..6i64 {
                for z in 0..6i64 {
                    state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                    let v = (state >> 11) as f64 / (1u64 << 53) as f64 - 0.5;
                    grid.set_real([x, y, z], v);
                    original.push(v);
                }
            }
        }
        fft.forward(&mut grid, &comm).unwrap();
        fft.inverse(&mut grid, &comm).unwrap();
        let mut i = 0;
        for x in 0..6i64 {
            for y in 0..6i64 {
                for z in 0..6i64 {
                    assert!(
                        (grid.get_real([x, y, z]) - original[i]).abs() < 1e-12,
                        "cell ({x},{y},{z}) drifted"
                    );
                    i += 1;
                }
            }
        }
    }

    #[test]
    fn test_wrong_state_is_rejected() {
        let comm = SoloComm;
        let fft = FftDriver::new(4);
        let mut grid = SlabGrid::<2>::new(4, 0, 0, &comm).unwrap();
        assert!(fft.inverse(&mut grid, &comm).is_err());
        fft.forward(&mut grid, &comm).unwrap();
        assert!(fft.forward(&mut grid, &comm).is_err());
    }
}
