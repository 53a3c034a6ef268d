pub mod threaded;

use rustfft::num_complex::Complex;

pub use threaded::ThreadComm;

/// Message-passing surface shared by every collective in the library.
///
/// One instance per worker; `rank`/`size` are captured here once and threaded
/// explicitly through the grid and estimator calls. Every method is a
/// collective (or a matched point-to-point pair) and must be entered by all
/// workers in the same order.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Send `send` to `dest` and receive the matching buffer from `src`.
    fn sendrecv_f64(&self, dest: usize, send: &[f64], src: usize) -> Vec<f64>;

    /// As `sendrecv_f64` for complex payloads.
    fn sendrecv_c64(&self, dest: usize, send: &[Complex<f64>], src: usize)
    -> Vec<Complex<f64>>;

    /// Elementwise sum of `buf` over all workers, result replicated everywhere.
    ///
    /// The sum is accumulated in rank order at rank 0 and broadcast back, so
    /// the result is deterministic across runs.
    fn all_reduce_sum_f64(&self, buf: &mut [f64]);

    /// Personalized exchange: `sends[r]` goes to rank r, the result holds one
    /// buffer per source rank. `sends.len()` must equal `size()`.
    fn all_to_all_c64(&self, sends: Vec<Vec<Complex<f64>>>) -> Vec<Vec<Complex<f64>>>;

    fn all_to_all_f64(&self, sends: Vec<Vec<f64>>) -> Vec<Vec<f64>>;

    fn barrier(&self);
}

/// The single-worker communicator: every collective is the identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoloComm;

impl Communicator for SoloComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn sendrecv_f64(&self, _dest: usize, send: &[f64], _src: usize) -> Vec<f64> {
        send.to_vec()
    }

    fn sendrecv_c64(
        &self,
        _dest: usize,
        send: &[Complex<f64>],
        _src: usize,
    ) -> Vec<Complex<f64>> {
        send.to_vec()
    }

    fn all_reduce_sum_f64(&self, _buf: &mut [f64]) {}

    fn all_to_all_c64(&self, sends: Vec<Vec<Complex<f64>>>) -> Vec<Vec<Complex<f64>>> {
        sends
    }

    fn all_to_all_f64(&self, sends: Vec<Vec<f64>>) -> Vec<Vec<f64>> {
        sends
    }

    fn barrier(&self) {}
}
