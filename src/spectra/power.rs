use log::{debug, info};
use rayon::prelude::*;
use rustfft::num_complex::Complex;

use crate::comm::Communicator;
use crate::error::{Result, SpectraError};
use crate::grid::fft::FftDriver;
use crate::grid::slab::{GridStatus, SlabGrid};
use crate::mesh::AssignmentKernel;
use crate::mesh::scatter::{assign_particles_to_grid, deconvolve_window};
use crate::particle::{Particle, migrate_particles, wrap_unit};
use crate::spectra::binning::PowerSpectrumBinning;

/// Which coordinate axes serve as line-of-sight directions for the
/// particle-based multipole estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LosAxes {
    /// Average the estimate over all D axes (the historical behavior).
    All,
    /// Use a single fixed axis.
    Single(usize),
}

/// Mode multiplicity under the Hermitian packing: interior planes of the
/// packed axis stand in for their unstored conjugates.
#[inline]
pub(crate) fn packed_weight(idx: usize, nz: usize) -> f64 {
    let jz = idx % nz;
    if jz == 0 || jz == nz - 1 { 1.0 } else { 2.0 }
}

/// Accumulate |δ(k)|² of the owned Fourier cells into radial bins.
///
/// Does not normalize; call `pofk.normalize(comm)` afterwards (collective).
pub fn bin_up<const D: usize>(
    grid: &SlabGrid<D>,
    pofk: &mut PowerSpectrumBinning,
) -> Result<()> {
    grid.require(GridStatus::Fourier)?;
    let nz = grid.nz();
    for idx in 0..grid.n_fourier_cells_local() {
        let (_, kmag) = grid.fourier_wavevector_and_norm(idx);
        let amp = grid.get_fourier(idx);
        pofk.add(kmag, amp.norm_sqr(), packed_weight(idx, nz));
    }
    Ok(())
}

/// Standard gridded power spectrum: scatter, transform, deconvolve, bin,
/// subtract shot noise. Collective.
pub fn compute_power_spectrum<const D: usize>(
    nmesh: usize,
    particles: &[Particle<D>],
    n_part_total: u64,
    pofk: &mut PowerSpectrumBinning,
    kernel: AssignmentKernel,
    comm: &dyn Communicator,
) -> Result<()> {
    let ghosts = kernel.ghost_planes();
    let mut grid = SlabGrid::<D>::new(nmesh, ghosts, ghosts, comm)?;
    assign_particles_to_grid(&mut grid, particles, n_part_total, kernel, comm)?;
    let fft = FftDriver::new(nmesh);
    fft.forward(&mut grid, comm)?;
    deconvolve_window(&mut grid, kernel)?;

    pofk.reset();
    bin_up(&grid, pofk)?;
    pofk.normalize(comm);
    pofk.subtract_shot_noise(1.0 / n_part_total as f64);
    info!("power spectrum done: {nmesh}^{D} mesh, {kernel}, {n_part_total} particles");
    Ok(())
}

/// Interlaced power spectrum: a second scatter shifted by half a cell along
/// every axis cancels the leading alias images before deconvolution.
/// Positions are shifted in place and restored before returning. Collective.
pub fn compute_power_spectrum_interlacing<const D: usize>(
    nmesh: usize,
    particles: &mut [Particle<D>],
    n_part_total: u64,
    pofk: &mut PowerSpectrumBinning,
    kernel: AssignmentKernel,
    comm: &dyn Communicator,
) -> Result<()> {
    let n = nmesh;
    let ghosts = kernel.ghost_planes();
    let mut grid = SlabGrid::<D>::new(n, ghosts, ghosts, comm)?;
    let mut shifted = SlabGrid::<D>::new(n, ghosts, ghosts + 1, comm)?;

    assign_particles_to_grid(&mut grid, particles, n_part_total, kernel, comm)?;

    // Half-cell shift along every axis; ghost planes absorb the x overhang,
    // the other axes wrap inside the scatter.
    let half = 0.5 / n as f64;
    for p in particles.iter_mut() {
        for x in &mut p.pos {
            *x += half;
        }
    }
    let scatter_result =
        assign_particles_to_grid(&mut shifted, particles, n_part_total, kernel, comm);
    for p in particles.iter_mut() {
        for x in &mut p.pos {
            *x -= half;
        }
    }
    scatter_result?;

    let fft = FftDriver::new(n);
    fft.forward(&mut grid, comm)?;
    fft.forward(&mut shifted, comm)?;

    // δ = (Ĝ1 + e^{i k·s} Ĝ2) / 2 with s the half-cell shift.
    for idx in 0..grid.n_fourier_cells_local() {
        let (kvec, _) = grid.fourier_wavevector_and_norm(idx);
        let theta: f64 = kvec.iter().map(|k| k * half).sum();
        let phase = Complex::from_polar(1.0, theta);
        let combined = 0.5 * (grid.get_fourier(idx) + phase * shifted.get_fourier(idx));
        grid.set_fourier(idx, combined);
    }

    deconvolve_window(&mut grid, kernel)?;
    pofk.reset();
    bin_up(&grid, pofk)?;
    pofk.normalize(comm);
    pofk.subtract_shot_noise(1.0 / n_part_total as f64);
    Ok(())
}

/// Alias-free reference estimator: evaluates δ(k) = Σ e^{-ik·x} / n directly
/// for every owned mode. O(n_part · n_modes); meant for validation at small
/// sizes.
///
/// Every worker must hold the full particle set — the mode sum has no
/// cross-worker reduction. A partial set is a hard precondition failure.
pub fn compute_power_spectrum_direct_summation<const D: usize>(
    nmesh: usize,
    particles: &[Particle<D>],
    n_part_total: u64,
    pofk: &mut PowerSpectrumBinning,
    comm: &dyn Communicator,
) -> Result<()> {
    if particles.len() as u64 != n_part_total {
        return Err(SpectraError::Precondition(format!(
            "direct summation needs the full particle set on every worker \
             ({} held, {n_part_total} total)",
            particles.len()
        )));
    }
    let mut grid = SlabGrid::<D>::new(nmesh, 0, 0, comm)?;
    grid.set_status(GridStatus::Fourier);

    let n = nmesh;
    let nz = grid.nz();
    let x_start = grid.local_x_start();
    let lines_per_plane = n.pow(D as u32 - 2);
    let inv_n = 1.0 / n_part_total as f64;
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
            let mut kvec = [0.0f64; D];
            kvec[0] = TAU * fold(x_start + row / lines_per_plane);
            let mut rest = row % lines_per_plane;
            for axis in (1..D - 1).rev() {
                kvec[axis] = TAU * fold(rest % n);
                rest /= n;
            }
            for (jz, amp) in line.iter_mut().enumerate() {
                kvec[D - 1] = TAU * jz as f64;
                let mut sum = Complex::new(0.0, 0.0);
                for p in particles {
                    let kx: f64 = kvec.iter().zip(&p.pos).map(|(k, x)| k * x).sum();
                    sum += Complex::from_polar(1.0, -kx);
                }
                *amp = sum * inv_n;
            }
        });

    // Remove the mean: δ(0) would otherwise be exactly one.
    if x_start == 0 {
        let dc = grid.get_fourier(0);
        grid.set_fourier(0, dc - Complex::new(1.0, 0.0));
    }

    pofk.reset();
    bin_up(&grid, pofk)?;
    pofk.normalize(comm);
    pofk.subtract_shot_noise(inv_n);
    Ok(())
}

/// Binomial coefficient as a float; the multipole orders in play are tiny.
fn binomial(n: usize, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    let mut out = 1.0;
    for i in 0..k.min(n - k) {
        out = out * (n - i) as f64 / (i + 1) as f64;
    }
    out
}

/// Coefficient of μ^{ℓ-2m} in the Legendre polynomial L_ℓ.
pub fn legendre_coefficient(ell: usize, m: usize) -> f64 {
    let sign = if m % 2 == 0 { 1.0 } else { -1.0 };
    sign * binomial(ell, m) * binomial(2 * ell - 2 * m, ell) / 2f64.powi(ell as i32)
}

/// Line-of-sight multipoles of a Fourier grid.
///
/// Fills `pell[ℓ]` with P_ℓ(k) for ℓ = 0..pell.len()-1: the μ-moments
/// ⟨|δ|² μ^m⟩ are binned with the packed-axis weighting of [`bin_up`],
/// normalized, and projected onto the Legendre polynomials. Collective.
pub fn compute_power_spectrum_multipoles<const D: usize>(
    grid: &SlabGrid<D>,
    pell: &mut [PowerSpectrumBinning],
    los: [f64; D],
    comm: &dyn Communicator,
) -> Result<()> {
    grid.require(GridStatus::Fourier)?;
    if pell.is_empty() {
        return Err(SpectraError::BadBinning(
            "multipoles need at least one binning (the monopole)".into(),
        ));
    }
    let los_norm = los.iter().map(|x| x * x).sum::<f64>().sqrt();
    if !(los_norm > 0.0) || !los_norm.is_finite() {
        return Err(SpectraError::BadLineOfSight(format!(
            "direction {los:?} has no usable norm"
        )));
    }
    let mut unit = los;
    for x in &mut unit {
        *x /= los_norm;
    }

    for b in pell.iter_mut() {
        b.reset();
    }

    let nz = grid.nz();
    for idx in 0..grid.n_fourier_cells_local() {
        let (kvec, kmag) = grid.fourier_wavevector_and_norm(idx);
        if kmag == 0.0 {
            continue;
        }
        let mu = kvec.iter().zip(&unit).map(|(k, l)| k * l).sum::<f64>() / kmag;
        let amp2 = grid.get_fourier(idx).norm_sqr();
        let w = packed_weight(idx, nz);
        let mut mu_pow = 1.0;
        for b in pell.iter_mut() {
            b.add(kmag, amp2 * mu_pow, w);
            mu_pow *= mu;
        }
    }
    for b in pell.iter_mut() {
        b.normalize(comm);
    }

    // Project the μ-moments onto L_ℓ from a snapshot, since pell holds both
    // the raw moments and the projected output.
    let moments: Vec<Vec<f64>> = pell.iter().map(|b| b.pofk.clone()).collect();
    for ell in (0..pell.len()).rev() {
        for i in 0..pell[ell].n_bins() {
            let mut sum = 0.0;
            for m in 0..=ell / 2 {
                sum += legendre_coefficient(ell, m) * moments[ell - 2 * m][i];
            }
            pell[ell].pofk[i] = sum;
        }
    }
    Ok(())
}

/// Redshift-space multipoles from particles.
///
/// For each selected axis, particles are displaced by `vel·κ` along that
/// axis (periodic wrap), migrated to their new owners, gridded, and the
/// multipoles taken with that axis as the line of sight; the displacement is
/// then undone. With [`LosAxes::All`] the per-axis results are averaged.
/// Shot noise is subtracted from the monopole only. Collective.
pub fn compute_power_spectrum_multipoles_rsd<const D: usize>(
    nmesh: usize,
    particles: &mut Vec<Particle<D>>,
    n_part_total: u64,
    kappa: f64,
    pell: &mut [PowerSpectrumBinning],
    kernel: AssignmentKernel,
    axes: LosAxes,
    comm: &dyn Communicator,
) -> Result<()> {
    if pell.is_empty() {
        return Err(SpectraError::BadBinning(
            "multipoles need at least one binning (the monopole)".into(),
        ));
    }
    let axis_list: Vec<usize> = match axes {
        LosAxes::All => (0..D).collect(),
        LosAxes::Single(a) => {
            if a >= D {
                return Err(SpectraError::BadLineOfSight(format!(
                    "axis {a} out of range for dimension {D}"
                )));
            }
            vec![a]
        }
    };

    let ghosts = kernel.ghost_planes();
    let fft = FftDriver::new(nmesh);
    for b in pell.iter_mut() {
        b.reset();
    }
    let n_bins = pell[0].n_bins();
    let mut mean_pofk = vec![vec![0.0; n_bins]; pell.len()];
    let mut mean_kbin = vec![0.0; n_bins];
    let mut mean_count = vec![0.0; n_bins];

    for &axis in &axis_list {
        for p in particles.iter_mut() {
            p.pos[axis] = wrap_unit(p.pos[axis] + p.vel[axis] * kappa);
        }
        migrate_particles(particles, nmesh, comm);

        let mut grid = SlabGrid::<D>::new(nmesh, ghosts, ghosts, comm)?;
        assign_particles_to_grid(&mut grid, particles, n_part_total, kernel, comm)?;
        fft.forward(&mut grid, comm)?;
        deconvolve_window(&mut grid, kernel)?;

        let mut los = [0.0; D];
        los[axis] = 1.0;
        let mut axis_pell = pell.to_vec();
        compute_power_spectrum_multipoles(&grid, &mut axis_pell, los, comm)?;

        for (mean, b) in mean_pofk.iter_mut().zip(&axis_pell) {
            for (acc, p) in mean.iter_mut().zip(&b.pofk) {
                *acc += p / axis_list.len() as f64;
            }
        }
        for (acc, k) in mean_kbin.iter_mut().zip(&axis_pell[0].kbin) {
            *acc += k / axis_list.len() as f64;
        }
        for (acc, c) in mean_count.iter_mut().zip(&axis_pell[0].count) {
            *acc += c / axis_list.len() as f64;
        }

        for p in particles.iter_mut() {
            p.pos[axis] = wrap_unit(p.pos[axis] - p.vel[axis] * kappa);
        }
        migrate_particles(particles, nmesh, comm);
    }

    for (ell, b) in pell.iter_mut().enumerate() {
        b.pofk.copy_from_slice(&mean_pofk[ell]);
        b.kbin.copy_from_slice(&mean_kbin);
        b.count.copy_from_slice(&mean_count);
    }
    pell[0].subtract_shot_noise(1.0 / n_part_total as f64);
    debug!(
        "redshift-space multipoles done over {} axis run(s)",
        axis_list.len()
    );
    Ok(())
}
