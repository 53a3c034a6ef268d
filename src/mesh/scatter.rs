use log::debug;
use rayon::prelude::*;

use crate::comm::Communicator;
use crate::error::{Result, SpectraError};
use crate::grid::halo;
use crate::grid::slab::{GridStatus, SlabGrid};
use crate::mesh::AssignmentKernel;
use crate::particle::Particle;

/// Window amplitudes below this floor are not deconvolved.
const WINDOW_FLOOR: f64 = 1e-10;

/// Scatter particles onto the grid as a density in units of the mean.
///
/// Each particle deposits `N^D / n_part_total` times the product of 1-D
/// kernel weights, so the owned cells of all ranks together average to one
/// and the DC amplitude after a forward transform is exactly one. Deposits
/// that land in ghost planes are folded back onto their owners; the grid's
/// ghost zones are zero on return. Collective.
///
/// Particles must already live on the rank owning their x position; only the
/// x axis may reach outside the owned range (into the ghost planes), the
/// remaining axes wrap periodically.
pub fn assign_particles_to_grid<const D: usize>(
    grid: &mut SlabGrid<D>,
    particles: &[Particle<D>],
    n_part_total: u64,
    kernel: AssignmentKernel,
    comm: &dyn Communicator,
) -> Result<()> {
    grid.require(GridStatus::Real)?;
    if n_part_total == 0 {
        return Err(SpectraError::Precondition(
            "density assignment needs at least one particle".into(),
        ));
    }
    let ghosts = kernel.ghost_planes();
    if grid.n_left() < ghosts || grid.n_right() < ghosts {
        return Err(SpectraError::Precondition(format!(
            "{kernel} needs {ghosts} ghost planes, grid has ({}, {})",
            grid.n_left(),
            grid.n_right()
        )));
    }

    let n = grid.n();
    let width = kernel.width();
    let x_start = grid.local_x_start() as i64;
    let weight = (n as f64).powi(D as i32) / n_part_total as f64;

    grid.fill_real(0.0);
    let mut bases = [0i64; D];
    let mut weights = [[0.0f64; 4]; D];
    for p in particles {
        for axis in 0..D {
            let u = p.pos[axis] * n as f64;
            let base = kernel.base_cell(u);
            bases[axis] = base;
            for t in 0..width {
                weights[axis][t] = kernel.weight_1d(u - (base + t as i64) as f64 - 0.5);
            }
        }
        // Odometer over the D-dimensional support stencil.
        for m in 0..width.pow(D as u32) {
            let mut rest = m;
            let mut w = weight;
            let mut coord = [0i64; D];
            for axis in (0..D).rev() {
                let t = rest % width;
                rest /= width;
                w *= weights[axis][t];
                coord[axis] = bases[axis] + t as i64;
            }
            coord[0] -= x_start;
            grid.add_real(coord, w);
        }
    }
    debug!(
        "rank {}: scattered {} particles with {kernel}",
        comm.rank(),
        particles.len()
    );

    halo::fold_ghost_slices(grid, comm);
    Ok(())
}

/// Divide every Fourier amplitude by the kernel's window, undoing the
/// smoothing the scatter applied. Modes whose window is numerically zero are
/// left untouched.
pub fn deconvolve_window<const D: usize>(
    grid: &mut SlabGrid<D>,
    kernel: AssignmentKernel,
) -> Result<()> {
    grid.require(GridStatus::Fourier)?;
    let n = grid.n();
    let nz = grid.nz();
    let x_start = grid.local_x_start();
    let lines_per_plane = n.pow(D as u32 - 2);

    // Per-axis window tables; the product over axes is the full window.
    let fold = |j: usize| -> f64 {
        if j <= n / 2 {
            j as f64
        } else {
            j as f64 - n as f64
        }
    };
    let w_axis: Vec<f64> = (0..n).map(|j| kernel.window_1d(fold(j), n)).collect();
    let w_packed: Vec<f64> = (0..nz).map(|j| kernel.window_1d(j as f64, n)).collect();

    grid.fourier_slice_mut()
        .par_chunks_mut(nz)
        .enumerate()
        .for_each(|(row, line)| {
            let px = row / lines_per_plane;
            let mut w_row = w_axis[(x_start + px) % n];
            let mut rest = row % lines_per_plane;
            for _ in 1..D - 1 {
                let j = rest % n;
                rest /= n;
                w_row *= w_axis[j];
            }
            for (z, amp) in line.iter_mut().enumerate() {
                let w = w_row * w_packed[z];
                if w >= WINDOW_FLOOR {
                    *amp /= w;
                }
            }
        });
    Ok(())
}
