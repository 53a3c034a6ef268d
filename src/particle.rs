use log::debug;

use crate::comm::Communicator;

/// A tracer particle in box-normalized coordinates.
///
/// Positions live in `[0, 1)^D`; velocities are in whatever units the caller
/// uses, converted to displacements by the velocity-to-displacement factor of
/// the redshift-space estimators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle<const D: usize> {
    pub pos: [f64; D],
    pub vel: [f64; D],
}

impl<const D: usize> Particle<D> {
    pub fn new(pos: [f64; D], vel: [f64; D]) -> Self {
        Self { pos, vel }
    }

    /// A particle at rest.
    pub fn at(pos: [f64; D]) -> Self {
        Self {
            pos,
            vel: [0.0; D],
        }
    }
}

/// Wrap a box-normalized coordinate back into `[0, 1)`.
#[inline]
pub fn wrap_unit(x: f64) -> f64 {
    let w = x - x.floor();
    // x.floor() of e.g. -1e-17 yields w == 1.0; fold that back.
    if w >= 1.0 { w - 1.0 } else { w }
}

/// Rank owning a particle under the slab decomposition of an N-cell grid.
pub fn owner_rank<const D: usize>(p: &Particle<D>, n: usize, size: usize) -> usize {
    let plane = ((p.pos[0] * n as f64) as usize).min(n - 1);
    crate::grid::slab::rank_of_plane(n, size, plane)
}

/// Move every particle to the rank owning its x position. Collective.
///
/// Needed after a displacement that may carry particles across slab
/// boundaries (the redshift-space estimators).
pub fn migrate_particles<const D: usize>(
    particles: &mut Vec<Particle<D>>,
    n: usize,
    comm: &dyn Communicator,
) {
    if comm.size() == 1 {
        return;
    }
    let mut sends: Vec<Vec<f64>> = (0..comm.size()).map(|_| Vec::new()).collect();
    let mut kept = Vec::with_capacity(particles.len());
    for p in particles.drain(..) {
        let dest = owner_rank(&p, n, comm.size());
        if dest == comm.rank() {
            kept.push(p);
        } else {
            sends[dest].extend_from_slice(&p.pos);
            sends[dest].extend_from_slice(&p.vel);
        }
    }
    let moved: usize = sends.iter().map(|s| s.len() / (2 * D)).sum();
    let recvd = comm.all_to_all_f64(sends);
    for block in recvd {
        debug_assert_eq!(block.len() % (2 * D), 0);
        for rec in block.chunks_exact(2 * D) {
            let mut p = Particle {
                pos: [0.0; D],
                vel: [0.0; D],
            };
            p.pos.copy_from_slice(&rec[..D]);
            p.vel.copy_from_slice(&rec[D..]);
            kept.push(p);
        }
    }
    if moved > 0 {
        debug!("rank {}: migrated {moved} particles out", comm.rank());
    }
    *particles = kept;
}
