use anyhow::Result;
use rand::prelude::*;

use polyspectra::comm::{Communicator, SoloComm, ThreadComm};
use polyspectra::grid::halo;
use polyspectra::particle::owner_rank;
use polyspectra::spectra::poly::compute_bispectrum;
use polyspectra::spectra::power::{
    LosAxes, compute_power_spectrum, compute_power_spectrum_multipoles_rsd,
};
use polyspectra::{
    AssignmentKernel, BinningScale, BispectrumBinning, FftDriver, Particle,
    PowerSpectrumBinning, SlabGrid,
};

use std::f64::consts::TAU;

const NMESH: usize = 16;

fn particle_box(count: usize, seed: u64) -> Vec<Particle<3>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            Particle::<3>::new(
                [rng.random::<f64>(), rng.random::<f64>(), rng.random::<f64>()],
                [
                    rng.random::<f64>() - 0.5,
                    rng.random::<f64>() - 0.5,
                    rng.random::<f64>() - 0.5,
                ],
            )
        })
        .collect()
}

fn deal_by_rank(particles: &[Particle<3>], workers: usize) -> Vec<Vec<Particle<3>>> {
    let mut per_rank = vec![Vec::new(); workers];
    for p in particles {
        per_rank[owner_rank(p, NMESH, workers)].push(*p);
    }
    per_rank
}

#[test]
fn halo_exchange_fills_ghosts_from_neighbors() {
    let results = ThreadComm::run(4, |comm| {
        let mut grid = SlabGrid::<2>::new(NMESH, 2, 2, comm).unwrap();
        for x in 0..grid.local_nx() as i64 {
            for y in 0..NMESH as i64 {
                let gx = grid.local_x_start() as i64 + x;
                grid.set_real([x, y], (gx * 100 + y) as f64);
            }
        }
        halo::communicate(&mut grid, comm);
        // Every materialized plane must now carry its global plane's values,
        // with the x index wrapped periodically.
        let nx = grid.local_nx() as i64;
        for x in -2..nx + 2 {
            let gx = (grid.local_x_start() as i64 + x).rem_euclid(NMESH as i64);
            for y in 0..NMESH as i64 {
                if grid.get_real([x, y]) != (gx * 100 + y) as f64 {
                    return Err((comm.rank(), x, y));
                }
            }
        }
        Ok(())
    });
    for r in results {
        assert_eq!(r, Ok(()), "ghost plane mismatch");
    }
}

#[test]
fn distributed_fft_roundtrip_preserves_the_field() {
    let max_err = ThreadComm::run(3, |comm| {
        let mut grid = SlabGrid::<3>::new(NMESH, 1, 1, comm).unwrap();
        let mut rng = StdRng::seed_from_u64(40 + comm.rank() as u64);
        let mut original = Vec::new();
        for x in 0..grid.local_nx() as i64 {
            for y in 0..NMESH as i64 {
                for z in 0..NMESH as i64 {
                    let v = rng.random::<f64>() - 0.5;
                    grid.set_real([x, y, z], v);
                    original.push(v);
                }
            }
        }
        let fft = FftDriver::new(NMESH);
        fft.forward(&mut grid, comm).unwrap();
        fft.inverse(&mut grid, comm).unwrap();

        let mut err = 0.0f64;
        let mut i = 0;
        for x in 0..grid.local_nx() as i64 {
            for y in 0..NMESH as i64 {
                for z in 0..NMESH as i64 {
                    err = err.max((grid.get_real([x, y, z]) - original[i]).abs());
                    i += 1;
                }
            }
        }
        err
    });
    for (rank, err) in max_err.iter().enumerate() {
        assert!(*err < 1e-12, "rank {rank}: roundtrip error {err}");
    }
}

#[test]
fn distributed_fft_matches_solo_transform() {
    // One deterministic field, one canonical spectrum: every worker count
    // must reproduce the solo amplitudes on its slab.
    let field = |x: usize, y: usize, z: usize| -> f64 {
        (TAU * 3.0 * x as f64 / NMESH as f64).sin()
            + 0.5 * (TAU * (y as f64 + 2.0 * z as f64) / NMESH as f64).cos()
            + (x * 7 + y * 3 + z) as f64 / 1000.0
    };

    let solo_comm = SoloComm;
    let mut solo = SlabGrid::<3>::new(NMESH, 0, 0, &solo_comm).unwrap();
    for x in 0..NMESH as i64 {
        for y in 0..NMESH as i64 {
            for z in 0..NMESH as i64 {
                solo.set_real([x, y, z], field(x as usize, y as usize, z as usize));
            }
        }
    }
    FftDriver::new(NMESH).forward(&mut solo, &solo_comm).unwrap();
    let solo_modes: Vec<_> = solo.fourier_slice().to_vec();
    let lines = NMESH * (NMESH / 2 + 1);

    for workers in [2, 3, 5] {
        let slabs = ThreadComm::run(workers, |comm| {
            let mut grid = SlabGrid::<3>::new(NMESH, 0, 0, comm).unwrap();
            for x in 0..grid.local_nx() as i64 {
                for y in 0..NMESH as i64 {
                    for z in 0..NMESH as i64 {
                        let gx = grid.local_x_start() + x as usize;
                        grid.set_real([x, y, z], field(gx, y as usize, z as usize));
                    }
                }
            }
            FftDriver::new(NMESH).forward(&mut grid, comm).unwrap();
            (grid.local_x_start(), grid.fourier_slice().to_vec())
        });
        for (x_start, modes) in slabs {
            for (i, amp) in modes.iter().enumerate() {
                let solo_amp = solo_modes[x_start * lines + i];
                assert!(
                    (*amp - solo_amp).norm() < 1e-12,
                    "{workers} workers: mode {i} of slab at {x_start}: {amp} vs {solo_amp}"
                );
            }
        }
    }
}

#[test]
fn power_spectrum_is_worker_count_independent() -> Result<()> {
    const NPART: usize = 500;
    let particles = particle_box(NPART, 77);

    let mut solo = PowerSpectrumBinning::for_grid(NMESH)?;
    compute_power_spectrum(
        NMESH,
        &particles,
        NPART as u64,
        &mut solo,
        AssignmentKernel::Tsc,
        &SoloComm,
    )?;

    for workers in [2, 4] {
        let per_rank = deal_by_rank(&particles, workers);
        let results = ThreadComm::run(workers, |comm| {
            let mut pofk = PowerSpectrumBinning::for_grid(NMESH).unwrap();
            compute_power_spectrum(
                NMESH,
                &per_rank[comm.rank()],
                NPART as u64,
                &mut pofk,
                AssignmentKernel::Tsc,
                comm,
            )
            .unwrap();
            pofk
        });
        for (rank, pofk) in results.iter().enumerate() {
            for i in 0..solo.n_bins() {
                assert_eq!(solo.count[i], pofk.count[i], "bin {i} count");
                let tol = 1e-9 * (solo.pofk[i].abs() + 1.0 / NPART as f64);
                assert!(
                    (solo.pofk[i] - pofk.pofk[i]).abs() < tol,
                    "{workers} workers, rank {rank}, bin {i}: {} vs {}",
                    solo.pofk[i],
                    pofk.pofk[i]
                );
                assert!((solo.kbin[i] - pofk.kbin[i]).abs() < 1e-9 * (solo.kbin[i] + 1.0));
            }
        }
    }
    Ok(())
}

#[test]
fn bispectrum_is_worker_count_independent() -> Result<()> {
    const NPART: usize = 300;
    const NBINS: usize = 3;
    let particles = particle_box(NPART, 8);

    let mut solo =
        BispectrumBinning::new(NBINS, TAU, TAU * (NMESH / 2) as f64, BinningScale::Linear)?;
    compute_bispectrum(
        NMESH,
        &particles,
        NPART as u64,
        &mut solo,
        AssignmentKernel::Cic,
        &SoloComm,
    )?;

    let per_rank = deal_by_rank(&particles, 2);
    let results = ThreadComm::run(2, |comm| {
        let mut binning =
            BispectrumBinning::new(NBINS, TAU, TAU * (NMESH / 2) as f64, BinningScale::Linear)
                .unwrap();
        compute_bispectrum(
            NMESH,
            &per_rank[comm.rank()],
            NPART as u64,
            &mut binning,
            AssignmentKernel::Cic,
            comm,
        )
        .unwrap();
        binning
    });

    for binning in &results {
        for idx in 0..solo.p123.len() {
            assert_eq!(solo.computed[idx], binning.computed[idx], "tuple {idx}");
            let tol = 1e-8 * (solo.p123[idx].abs() + 1e-6);
            assert!(
                (solo.p123[idx] - binning.p123[idx]).abs() < tol,
                "tuple {idx}: {} vs {}",
                solo.p123[idx],
                binning.p123[idx]
            );
        }
        for i in 0..NBINS {
            assert!((solo.pofk[i] - binning.pofk[i]).abs() < 1e-9 * (solo.pofk[i].abs() + 1e-9));
        }
    }
    Ok(())
}

#[test]
fn rsd_multipoles_survive_particle_migration() -> Result<()> {
    const NPART: usize = 400;
    const KAPPA: f64 = 0.4;
    let particles = particle_box(NPART, 15);

    let mut solo_pell = vec![
        PowerSpectrumBinning::for_grid(NMESH)?,
        PowerSpectrumBinning::for_grid(NMESH)?,
        PowerSpectrumBinning::for_grid(NMESH)?,
    ];
    let mut solo_parts = particles.clone();
    compute_power_spectrum_multipoles_rsd(
        NMESH,
        &mut solo_parts,
        NPART as u64,
        KAPPA,
        &mut solo_pell,
        AssignmentKernel::Cic,
        LosAxes::All,
        &SoloComm,
    )?;

    let per_rank = deal_by_rank(&particles, 3);
    let results = ThreadComm::run(3, |comm| {
        let mut parts = per_rank[comm.rank()].clone();
        let mut pell = vec![
            PowerSpectrumBinning::for_grid(NMESH).unwrap(),
            PowerSpectrumBinning::for_grid(NMESH).unwrap(),
            PowerSpectrumBinning::for_grid(NMESH).unwrap(),
        ];
        compute_power_spectrum_multipoles_rsd(
            NMESH,
            &mut parts,
            NPART as u64,
            KAPPA,
            &mut pell,
            AssignmentKernel::Cic,
            LosAxes::All,
            comm,
        )
        .unwrap();
        (parts.len(), pell)
    });

    let total_after: usize = results.iter().map(|(n, _)| n).sum();
    assert_eq!(total_after, NPART, "particles lost in migration");

    for (_, pell) in &results {
        for ell in 0..3 {
            for i in 0..solo_pell[ell].n_bins() {
                let tol = 1e-8 * (solo_pell[ell].pofk[i].abs() + 1.0 / NPART as f64);
                assert!(
                    (solo_pell[ell].pofk[i] - pell[ell].pofk[i]).abs() < tol,
                    "ell={ell} bin {i}: {} vs {}",
                    solo_pell[ell].pofk[i],
                    pell[ell].pofk[i]
                );
            }
        }
    }
    Ok(())
}
