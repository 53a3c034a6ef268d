pub mod fft;
pub mod halo;
pub mod slab;
