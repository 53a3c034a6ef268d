use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use rand::prelude::*;
use serde::Serialize;

use polyspectra::comm::{Communicator, ThreadComm};
use polyspectra::mesh::scatter::{assign_particles_to_grid, deconvolve_window};
use polyspectra::particle::owner_rank;
use polyspectra::spectra::filters::smooth_fourier_grid;
use polyspectra::spectra::poly::compute_bispectrum;
use polyspectra::spectra::power::{bin_up, compute_power_spectrum_interlacing};
use polyspectra::{
    AssignmentKernel, BinningScale, BispectrumBinning, FftDriver, Particle,
    PowerSpectrumBinning, SlabGrid, SmoothingFilter,
};

#[derive(Parser, Debug)]
#[command(name = "pofk")]
#[command(version)]
#[command(about = "Power spectrum and bispectrum of a random particle box.")]
struct Args {
    #[arg(long, default_value_t = 64, help = "Mesh cells per side")]
    nmesh: usize,
    #[arg(long, default_value_t = 100_000, help = "Number of particles")]
    npart: u64,
    #[arg(
        long,
        env = "POFK_KERNEL",
        default_value = "CIC",
        help = "Assignment kernel: NGP, CIC, TSC or PCS"
    )]
    kernel: String,
    #[arg(long, default_value_t = 1, help = "In-process workers (slab count)")]
    workers: usize,
    #[arg(long, default_value_t = 1234, help = "Seed for the particle box")]
    seed: u64,
    #[arg(long, help = "Interlace two half-cell-shifted scatters")]
    interlacing: bool,
    #[arg(long, help = "Also compute the bispectrum over this many shells")]
    bispectrum_bins: Option<usize>,
    #[arg(long, help = "Smoothing radius in box units, applied before binning")]
    smoothing: Option<f64>,
    #[arg(
        long,
        default_value = "gaussian",
        help = "Smoothing filter: sharpk, gaussian or tophat"
    )]
    smoothing_filter: String,
    #[arg(long, help = "Write the JSON result here instead of stdout")]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct Output {
    nmesh: usize,
    npart: u64,
    kernel: AssignmentKernel,
    interlacing: bool,
    pofk: PowerSpectrumBinning,
    bispectrum: Option<BispectrumBinning>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    info!("pofk v{}", env!("CARGO_PKG_VERSION"));
    info!("Args: {args:?}");

    let kernel: AssignmentKernel = args.kernel.parse()?;
    let filter: SmoothingFilter = args.smoothing_filter.parse()?;
    if args.workers == 0 || args.nmesh / args.workers.max(1) < kernel.ghost_planes() + 1 {
        anyhow::bail!(
            "{} workers cannot hold a {} mesh with {} ghost planes",
            args.workers,
            args.nmesh,
            kernel.ghost_planes()
        );
    }

    // One particle box, dealt out to the workers by slab ownership.
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut per_rank: Vec<Vec<Particle<3>>> = vec![Vec::new(); args.workers];
    for _ in 0..args.npart {
        let p = Particle::<3>::new(
            [rng.random::<f64>(), rng.random::<f64>(), rng.random::<f64>()],
            [
                rng.random::<f64>() - 0.5,
                rng.random::<f64>() - 0.5,
                rng.random::<f64>() - 0.5,
            ],
        );
        per_rank[owner_rank(&p, args.nmesh, args.workers)].push(p);
    }

    let results = ThreadComm::run(args.workers, |comm| {
        run_worker(&args, kernel, filter, &per_rank, comm)
    });
    let (pofk, bispectrum) = results.into_iter().next().expect("at least one worker")?;

    let out = Output {
        nmesh: args.nmesh,
        npart: args.npart,
        kernel,
        interlacing: args.interlacing,
        pofk,
        bispectrum,
    };
    let json = serde_json::to_string_pretty(&out).context("failed to serialize result")?;
    match &args.output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("failed to write {path:?}"))?;
            info!("Wrote {path:?}");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run_worker(
    args: &Args,
    kernel: AssignmentKernel,
    filter: SmoothingFilter,
    per_rank: &[Vec<Particle<3>>],
    comm: &ThreadComm,
) -> polyspectra::Result<(PowerSpectrumBinning, Option<BispectrumBinning>)> {
    use std::f64::consts::TAU;
    let n = args.nmesh;
    let mut particles = per_rank[comm.rank()].clone();
    let mut pofk = PowerSpectrumBinning::for_grid(n)?;

    if args.interlacing {
        compute_power_spectrum_interlacing(
            n,
            &mut particles,
            args.npart,
            &mut pofk,
            kernel,
            comm,
        )?;
    } else {
        let ghosts = kernel.ghost_planes();
        let mut grid = SlabGrid::<3>::new(n, ghosts, ghosts, comm)?;
        assign_particles_to_grid(&mut grid, &particles, args.npart, kernel, comm)?;
        let fft = FftDriver::new(n);
        fft.forward(&mut grid, comm)?;
        deconvolve_window(&mut grid, kernel)?;
        if let Some(r) = args.smoothing {
            smooth_fourier_grid(&mut grid, r, filter)?;
        }
        pofk.reset();
        bin_up(&grid, &mut pofk)?;
        pofk.normalize(comm);
        pofk.subtract_shot_noise(1.0 / args.npart as f64);
    }

    let bispectrum = match args.bispectrum_bins {
        Some(n_bins) => {
            let mut b = BispectrumBinning::new(
                n_bins,
                TAU,
                TAU * (n / 2) as f64,
                BinningScale::Linear,
            )?;
            compute_bispectrum(n, &particles, args.npart, &mut b, kernel, comm)?;
            Some(b)
        }
        None => None,
    };
    Ok((pofk, bispectrum))
}
