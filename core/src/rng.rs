//! Deterministic random streams for retry jitter.
//!
//! RULE: backoff jitter never touches a platform RNG.
//! Every worker gets its own stream, seeded from
//! (job_seed XOR worker_index * golden ratio), so a job run with the
//! same seed and the same failures sleeps for the same intervals.

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// A named, deterministic RNG for a single worker.
pub struct JitterRng {
    pub name: String,
    inner: Pcg64Mcg,
}

impl JitterRng {
    pub fn new(job_seed: u64, stream_index: u64) -> Self {
        let derived_seed = job_seed ^ (stream_index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            name: format!("stream-{stream_index}"),
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Roll a u64 in [0, n). Returns 0 when n is 0.
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        use rand::RngCore;
        if n == 0 {
            return 0;
        }
        self.inner.next_u64() % n
    }
}

/// All jitter streams for one job run, indexed by worker slot.
pub struct RngBank {
    job_seed: u64,
}

impl RngBank {
    pub fn new(job_seed: u64) -> Self {
        Self { job_seed }
    }

    pub fn for_worker(&self, worker_index: usize) -> JitterRng {
        JitterRng::new(self.job_seed, worker_index as u64)
            .with_name(format!("arrears-worker-{worker_index}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_and_slot_give_same_stream() {
        let bank = RngBank::new(7);
        let mut a = bank.for_worker(3);
        let mut b = bank.for_worker(3);
        for _ in 0..32 {
            assert_eq!(a.next_u64_below(1_000), b.next_u64_below(1_000));
        }
    }

    #[test]
    fn draws_stay_below_bound() {
        let mut rng = RngBank::new(99).for_worker(0);
        for _ in 0..256 {
            assert!(rng.next_u64_below(5) < 5);
        }
        assert_eq!(rng.next_u64_below(0), 0);
    }
}
