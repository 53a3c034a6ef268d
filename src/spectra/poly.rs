use log::{debug, info};

use crate::comm::Communicator;
use crate::error::Result;
use crate::grid::fft::FftDriver;
use crate::grid::slab::{GridStatus, SlabGrid};
use crate::mesh::AssignmentKernel;
use crate::mesh::scatter::{assign_particles_to_grid, deconvolve_window};
use crate::particle::Particle;
use crate::spectra::binning::{BispectrumBinning, PolyspectrumBinning};
use crate::spectra::power::packed_weight;

/// n-point polyspectrum of a Fourier grid by the multi-grid shell estimator.
///
/// Per shell the field is masked to the shell (F_i) and paired with the shell
/// indicator (N_i), both taken back to real space once; every ordered shell
/// tuple then integrates the product of its real-space shell fields, so the
/// expensive transforms are reused across all tuples. One all-reduce runs per
/// admitted tuple. Collective.
pub fn polyspectrum_from_grid<const D: usize, const ORDER: usize>(
    grid: &SlabGrid<D>,
    binning: &mut PolyspectrumBinning<ORDER>,
    comm: &dyn Communicator,
) -> Result<()> {
    grid.require(GridStatus::Fourier)?;
    binning.reset();
    let n = grid.n();
    let nz = grid.nz();
    let n_bins = binning.n_bins();
    let fft = FftDriver::new(n);

    // Shell fields F_i, indicators N_i, and in-shell statistics.
    let mut shell_fields = Vec::with_capacity(n_bins);
    let mut shell_counts = Vec::with_capacity(n_bins);
    let mut stats = vec![0.0; 3 * n_bins];
    debug!(
        "building {n_bins} shell-field pairs on a {n}^{D} mesh ({} grids in flight)",
        2 * n_bins
    );
    for i in 0..n_bins {
        let k_lo = binning.bins.lower_edge(i);
        let k_hi = binning.bins.upper_edge(i);
        let mut masked = grid.clone();
        let mut indicator = grid.clone();
        for idx in 0..grid.n_fourier_cells_local() {
            let (_, kmag) = grid.fourier_wavevector_and_norm(idx);
            let in_shell = kmag >= k_lo && kmag < k_hi;
            if in_shell {
                indicator.set_fourier(idx, 1.0.into());
                let w = packed_weight(idx, nz);
                stats[3 * i] += w;
                stats[3 * i + 1] += w * kmag;
                stats[3 * i + 2] += w * grid.get_fourier(idx).norm_sqr();
            } else {
                masked.set_fourier(idx, 0.0.into());
                indicator.set_fourier(idx, 0.0.into());
            }
        }
        fft.inverse(&mut masked, comm)?;
        fft.inverse(&mut indicator, comm)?;
        shell_fields.push(masked);
        shell_counts.push(indicator);
    }

    comm.all_reduce_sum_f64(&mut stats);
    for i in 0..n_bins {
        let count = stats[3 * i];
        if count > 0.0 {
            binning.kmean[i] = stats[3 * i + 1] / count;
            binning.pofk[i] = stats[3 * i + 2] / count;
        } else {
            binning.kmean[i] = binning.bins.center(i);
            binning.pofk[i] = 0.0;
        }
    }

    // Ordered tuples i_1 <= ... <= i_n that can close a polygon: the n-1
    // shorter legs must reach the longest one to within half a bin per leg.
    let scale = (1.0 / (std::f64::consts::TAU * n as f64)).powi(D as i32);
    let n_cells = shell_fields[0].n_real_cells_owned();
    let mut tuple = [0usize; ORDER];
    loop {
        let last = tuple[ORDER - 1];
        let legs: f64 = tuple[..ORDER - 1]
            .iter()
            .map(|&i| binning.bins.center(i))
            .sum();
        let closable = legs
            >= binning.bins.center(last) - 0.5 * ORDER as f64 * binning.bins.width(last);
        if closable {
            let mut sums = [0.0f64; 2];
            let fields: Vec<&[f64]> = tuple
                .iter()
                .map(|&i| shell_fields[i].owned_real_slice())
                .collect();
            let counts: Vec<&[f64]> = tuple
                .iter()
                .map(|&i| shell_counts[i].owned_real_slice())
                .collect();
            for c in 0..n_cells {
                let mut pf = 1.0;
                let mut pn = 1.0;
                for a in 0..ORDER {
                    pf *= fields[a][c];
                    pn *= counts[a][c];
                }
                sums[0] += pf;
                sums[1] += pn;
            }
            sums[0] *= scale;
            sums[1] *= scale;
            comm.all_reduce_sum_f64(&mut sums);

            let idx = binning.index_of(&tuple);
            // Round-off can push an empty configuration count negative.
            let n_config = sums[1].max(0.0);
            binning.n123[idx] = n_config;
            binning.p123[idx] = if n_config > 0.0 { sums[0] / n_config } else { 0.0 };
            binning.computed[idx] = true;
        }
        if !advance_nondecreasing(&mut tuple, n_bins) {
            break;
        }
    }

    if ORDER == 3 {
        fill_reduced(binning);
    }
    symmetry_fill(binning);
    info!("{ORDER}-point polyspectrum done over {n_bins} shells");
    Ok(())
}

/// Next non-decreasing tuple in lexicographic order; false when exhausted.
fn advance_nondecreasing<const ORDER: usize>(tuple: &mut [usize; ORDER], n_bins: usize) -> bool {
    for pos in (0..ORDER).rev() {
        if tuple[pos] + 1 < n_bins {
            let next = tuple[pos] + 1;
            for t in &mut tuple[pos..] {
                *t = next;
            }
            return true;
        }
    }
    false
}

/// Reduced bispectrum: divide by the sum of pairwise power products.
fn fill_reduced<const ORDER: usize>(binning: &mut PolyspectrumBinning<ORDER>) {
    debug_assert_eq!(ORDER, 3);
    let n_bins = binning.n_bins();
    for i1 in 0..n_bins {
        for i2 in i1..n_bins {
            for i3 in i2..n_bins {
                let idx = (i1 * n_bins + i2) * n_bins + i3;
                if !binning.computed[idx] {
                    continue;
                }
                let (p1, p2, p3) = (binning.pofk[i1], binning.pofk[i2], binning.pofk[i3]);
                let denom = p1 * p2 + p2 * p3 + p3 * p1;
                binning.q123[idx] = if denom != 0.0 {
                    binning.p123[idx] / denom
                } else {
                    0.0
                };
            }
        }
    }
}

/// Copy every canonical (sorted) tuple onto its permutations.
fn symmetry_fill<const ORDER: usize>(binning: &mut PolyspectrumBinning<ORDER>) {
    let n_bins = binning.n_bins();
    let total = binning.p123.len();
    for flat in 0..total {
        let mut tuple = [0usize; ORDER];
        let mut rest = flat;
        for pos in (0..ORDER).rev() {
            tuple[pos] = rest % n_bins;
            rest /= n_bins;
        }
        if tuple.windows(2).all(|w| w[0] <= w[1]) {
            continue;
        }
        let mut sorted = tuple;
        sorted.sort_unstable();
        let src = binning.index_of(&sorted);
        binning.p123[flat] = binning.p123[src];
        binning.n123[flat] = binning.n123[src];
        binning.computed[flat] = binning.computed[src];
        if !binning.q123.is_empty() {
            binning.q123[flat] = binning.q123[src];
        }
    }
}

/// Full polyspectrum pipeline from particles: scatter, transform, deconvolve,
/// run the shell estimator. Collective.
pub fn compute_polyspectrum<const D: usize, const ORDER: usize>(
    nmesh: usize,
    particles: &[Particle<D>],
    n_part_total: u64,
    binning: &mut PolyspectrumBinning<ORDER>,
    kernel: AssignmentKernel,
    comm: &dyn Communicator,
) -> Result<()> {
    let ghosts = kernel.ghost_planes();
    let mut grid = SlabGrid::<D>::new(nmesh, ghosts, ghosts, comm)?;
    assign_particles_to_grid(&mut grid, particles, n_part_total, kernel, comm)?;
    let fft = FftDriver::new(nmesh);
    fft.forward(&mut grid, comm)?;
    deconvolve_window(&mut grid, kernel)?;
    polyspectrum_from_grid(&grid, binning, comm)
}

/// Three-point convenience wrapper.
pub fn compute_bispectrum<const D: usize>(
    nmesh: usize,
    particles: &[Particle<D>],
    n_part_total: u64,
    binning: &mut BispectrumBinning,
    kernel: AssignmentKernel,
    comm: &dyn Communicator,
) -> Result<()> {
    compute_polyspectrum::<D, 3>(nmesh, particles, n_part_total, binning, kernel, comm)
}
