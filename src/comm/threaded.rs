use std::collections::VecDeque;
use std::sync::Mutex;

use crossbeam::channel::{Receiver, Sender, unbounded};
use rustfft::num_complex::Complex;

use super::Communicator;

enum Payload {
    F64(Vec<f64>),
    C64(Vec<Complex<f64>>),
}

type Envelope = (usize, Payload);

/// In-process worker communicator over an unbounded crossbeam channel mesh.
///
/// Each rank owns one receiving channel; messages are tagged with the source
/// rank and stashed when they arrive ahead of the matching receive. Channels
/// preserve per-pair ordering and the collectives run in lockstep, so a stash
/// never grows beyond one in-flight collective.
pub struct ThreadComm {
    rank: usize,
    size: usize,
    senders: Vec<Sender<Envelope>>,
    receiver: Receiver<Envelope>,
    stash: Mutex<Vec<VecDeque<Payload>>>,
}

impl ThreadComm {
    /// Build the full mesh for `size` workers. Hand one element per thread.
    pub fn create(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "communicator needs at least one worker");
        let mut senders = Vec::with_capacity(size);
        let mut receivers = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = unbounded();
            senders.push(tx);
            receivers.push(rx);
        }
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| ThreadComm {
                rank,
                size,
                senders: senders.clone(),
                receiver,
                stash: Mutex::new((0..size).map(|_| VecDeque::new()).collect()),
            })
            .collect()
    }

    /// Run `f` once per worker on a scoped thread pool and collect the results
    /// in rank order. Test and driver harness.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(&ThreadComm) -> R + Sync,
    {
        let comms = Self::create(size);
        std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| {
                    let f = &f;
                    scope.spawn(move || f(comm))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("worker thread panicked"))
                .collect()
        })
    }

    fn post(&self, dest: usize, payload: Payload) {
        self.senders[dest]
            .send((self.rank, payload))
            .expect("peer communicator dropped mid-collective");
    }

    fn recv_from(&self, src: usize) -> Payload {
        loop {
            {
                let mut stash = self.stash.lock().expect("comm stash poisoned");
                if let Some(payload) = stash[src].pop_front() {
                    return payload;
                }
            }
            let (from, payload) = self
                .receiver
                .recv()
                .expect("peer communicator dropped mid-collective");
            if from == src {
                return payload;
            }
            let mut stash = self.stash.lock().expect("comm stash poisoned");
            stash[from].push_back(payload);
        }
    }

    fn recv_f64_from(&self, src: usize) -> Vec<f64> {
        match self.recv_from(src) {
            Payload::F64(v) => v,
            Payload::C64(_) => unreachable!("collective payload type mismatch"),
        }
    }

    fn recv_c64_from(&self, src: usize) -> Vec<Complex<f64>> {
        match self.recv_from(src) {
            Payload::C64(v) => v,
            Payload::F64(_) => unreachable!("collective payload type mismatch"),
        }
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn sendrecv_f64(&self, dest: usize, send: &[f64], src: usize) -> Vec<f64> {
        self.post(dest, Payload::F64(send.to_vec()));
        self.recv_f64_from(src)
    }

    fn sendrecv_c64(
        &self,
        dest: usize,
        send: &[Complex<f64>],
        src: usize,
    ) -> Vec<Complex<f64>> {
        self.post(dest, Payload::C64(send.to_vec()));
        self.recv_c64_from(src)
    }

    fn all_reduce_sum_f64(&self, buf: &mut [f64]) {
        if self.size == 1 {
            return;
        }
        if self.rank == 0 {
            // Accumulate in rank order so the reduction is deterministic.
            for src in 1..self.size {
                let part = self.recv_f64_from(src);
                debug_assert_eq!(part.len(), buf.len());
                for (acc, x) in buf.iter_mut().zip(part) {
                    *acc += x;
                }
            }
            for dest in 1..self.size {
                self.post(dest, Payload::F64(buf.to_vec()));
            }
        } else {
            self.post(0, Payload::F64(buf.to_vec()));
            let total = self.recv_f64_from(0);
            buf.copy_from_slice(&total);
        }
    }

    fn all_to_all_c64(&self, mut sends: Vec<Vec<Complex<f64>>>) -> Vec<Vec<Complex<f64>>> {
        assert_eq!(sends.len(), self.size);
        let mut out: Vec<Vec<Complex<f64>>> = (0..self.size).map(|_| Vec::new()).collect();
        out[self.rank] = std::mem::take(&mut sends[self.rank]);
        for dest in 0..self.size {
            if dest != self.rank {
                self.post(dest, Payload::C64(std::mem::take(&mut sends[dest])));
            }
        }
        for src in 0..self.size {
            if src != self.rank {
                out[src] = self.recv_c64_from(src);
            }
        }
        out
    }

    fn all_to_all_f64(&self, mut sends: Vec<Vec<f64>>) -> Vec<Vec<f64>> {
        assert_eq!(sends.len(), self.size);
        let mut out: Vec<Vec<f64>> = (0..self.size).map(|_| Vec::new()).collect();
        out[self.rank] = std::mem::take(&mut sends[self.rank]);
        for dest in 0..self.size {
            if dest != self.rank {
                self.post(dest, Payload::F64(std::mem::take(&mut sends[dest])));
            }
        }
        for src in 0..self.size {
            if src != self.rank {
                out[src] = self.recv_f64_from(src);
            }
        }
        out
    }

    fn barrier(&self) {
        let mut token = [0.0];
        self.all_reduce_sum_f64(&mut token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_reduce_sums_in_rank_order() {
        let sums = ThreadComm::run(4, |comm| {
            let mut buf = vec![comm.rank() as f64, 1.0];
            comm.all_reduce_sum_f64(&mut buf);
            buf
        });
        for sum in sums {
            assert_eq!(sum, vec![6.0, 4.0]);
        }
    }

    #[test]
    fn test_all_to_all_routes_by_rank() {
        let results = ThreadComm::run(3, |comm| {
            let sends: Vec<Vec<f64>> = (0..3)
                .map(|dest| vec![(comm.rank() * 10 + dest) as f64])
                .collect();
            comm.all_to_all_f64(sends)
        });
        for (rank, recvd) in results.iter().enumerate() {
            for (src, buf) in recvd.iter().enumerate() {
                assert_eq!(buf, &vec![(src * 10 + rank) as f64]);
            }
        }
    }

    #[test]
    fn test_sendrecv_ring() {
        let results = ThreadComm::run(3, |comm| {
            let right = (comm.rank() + 1) % comm.size();
            let left = (comm.rank() + comm.size() - 1) % comm.size();
            comm.sendrecv_f64(right, &[comm.rank() as f64], left)
        });
        assert_eq!(results[0], vec![2.0]);
        assert_eq!(results[1], vec![0.0]);
        assert_eq!(results[2], vec![1.0]);
    }

    #[test]
    fn test_sendrecv_to_self() {
        let results = ThreadComm::run(1, |comm| comm.sendrecv_f64(0, &[7.0], 0));
        assert_eq!(results[0], vec![7.0]);
    }
}
