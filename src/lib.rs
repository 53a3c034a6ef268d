//! Distributed-memory n-point polyspectra of periodic scalar fields.
//!
//! A density grid is slab-decomposed along its first axis over a pool of
//! workers; particles are scattered onto it with a B-spline kernel, the grid
//! is taken to Fourier space with a distributed real-to-complex transform,
//! and the estimators bin the result into power spectra, line-of-sight
//! multipoles, bispectra and higher-order polyspectra.

// Enable pedantic lints globally, then allow the noisy ones we're not fixing.
#![warn(clippy::pedantic, clippy::nursery)]
// Not a public-API-polished crate; #[must_use] everywhere is noise
#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]
// Index names (jx/jz, k_min/k_max, n123/p123) are intentionally similar
#![allow(clippy::similar_names)]
// Mesh arithmetic performs intentional casts
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_lossless,
    clippy::cast_possible_wrap
)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]
// Style/pedantic lints that add noise without value here
#![allow(
    clippy::module_name_repetitions,
    clippy::items_after_statements,
    clippy::doc_markdown,
    clippy::float_cmp,
    clippy::many_single_char_names,
    clippy::needless_range_loop,
    clippy::too_many_arguments,
    clippy::too_many_lines
)]
#![allow(clippy::redundant_pub_crate)]

pub mod comm;
pub mod error;
pub mod grid;
pub mod mesh;
pub mod particle;
pub mod spectra;

pub use comm::{Communicator, SoloComm, ThreadComm};
pub use error::{Result, SpectraError};
pub use grid::fft::FftDriver;
pub use grid::slab::{GridStatus, SlabGrid};
pub use mesh::AssignmentKernel;
pub use particle::Particle;
pub use spectra::binning::{
    BinningScale, BispectrumBinning, PolyspectrumBinning, PowerSpectrumBinning,
};
pub use spectra::filters::SmoothingFilter;
pub use spectra::power::LosAxes;
