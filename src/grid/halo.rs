use crate::comm::Communicator;
use crate::grid::slab::SlabGrid;

/// Refresh the ghost planes from the owning neighbors.
///
/// Each rank sends its last `n_left` owned planes to the right neighbor's
/// left ghost and its first `n_right` owned planes to the left neighbor's
/// right ghost, with periodic rank wrap. Valid in either grid state, but only
/// meaningful for the real view. Collective.
pub fn communicate<const D: usize>(grid: &mut SlabGrid<D>, comm: &dyn Communicator) {
    let right = (comm.rank() + 1) % comm.size();
    let left = (comm.rank() + comm.size() - 1) % comm.size();
    let plane = grid.plane_cells();
    let nx = grid.local_nx() as i64;

    let n_left = grid.n_left();
    if n_left > 0 {
        let send: Vec<f64> = (nx - n_left as i64..nx)
            .flat_map(|x| grid.real_plane(x).iter().copied())
            .collect();
        let recv = comm.sendrecv_f64(right, &send, left);
        debug_assert_eq!(recv.len(), n_left * plane);
        for (i, x) in (-(n_left as i64)..0).enumerate() {
            grid.real_plane_mut(x)
                .copy_from_slice(&recv[i * plane..(i + 1) * plane]);
        }
    }

    let n_right = grid.n_right();
    if n_right > 0 {
        let send: Vec<f64> = (0..n_right as i64)
            .flat_map(|x| grid.real_plane(x).iter().copied())
            .collect();
        let recv = comm.sendrecv_f64(left, &send, right);
        debug_assert_eq!(recv.len(), n_right * plane);
        for (i, x) in (nx..nx + n_right as i64).enumerate() {
            grid.real_plane_mut(x)
                .copy_from_slice(&recv[i * plane..(i + 1) * plane]);
        }
    }
}

/// Fold ghost-plane deposits back onto the planes that own them.
///
/// The inverse flow of [`communicate`]: left ghosts accumulate onto the left
/// neighbor's last owned planes, right ghosts onto the right neighbor's first
/// owned planes. Local ghosts are zeroed afterwards. Required after a scatter
/// that deposited into ghost planes. Collective.
pub fn fold_ghost_slices<const D: usize>(grid: &mut SlabGrid<D>, comm: &dyn Communicator) {
    let right = (comm.rank() + 1) % comm.size();
    let left = (comm.rank() + comm.size() - 1) % comm.size();
    let plane = grid.plane_cells();
    let nx = grid.local_nx() as i64;

    let n_left = grid.n_left();
    if n_left > 0 {
        let send: Vec<f64> = (-(n_left as i64)..0)
            .flat_map(|x| grid.real_plane(x).iter().copied())
            .collect();
        let recv = comm.sendrecv_f64(left, &send, right);
        debug_assert_eq!(recv.len(), n_left * plane);
        for (i, x) in (nx - n_left as i64..nx).enumerate() {
            for (cell, add) in grid
                .real_plane_mut(x)
                .iter_mut()
                .zip(&recv[i * plane..(i + 1) * plane])
            {
                *cell += add;
            }
        }
    }

    let n_right = grid.n_right();
    if n_right > 0 {
        let send: Vec<f64> = (nx..nx + n_right as i64)
            .flat_map(|x| grid.real_plane(x).iter().copied())
            .collect();
        let recv = comm.sendrecv_f64(right, &send, left);
        debug_assert_eq!(recv.len(), n_right * plane);
        for (i, x) in (0..n_right as i64).enumerate() {
            for (cell, add) in grid
                .real_plane_mut(x)
                .iter_mut()
                .zip(&recv[i * plane..(i + 1) * plane])
            {
                *cell += add;
            }
        }
    }

    for x in -(n_left as i64)..0 {
        grid.real_plane_mut(x).fill(0.0);
    }
    for x in nx..nx + n_right as i64 {
        grid.real_plane_mut(x).fill(0.0);
    }
}
