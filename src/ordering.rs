use chrono::{DateTime, Timelike, Utc};
use rand::Rng;
use rand::seq::SliceRandom;

use crate::model::{ImageRecord, OrderingPolicy};

const LCG_MODULUS: i64 = 1 << 31;
const LCG_MULTIPLIER: i64 = 1_103_515_245;
const LCG_INCREMENT: i64 = 12_345;

/// Wall-clock context the deterministic seed keys derive from.
///
/// Both keys use UTC so the shuffle order does not depend on the host
/// timezone.
#[derive(Debug, Clone, Copy)]
pub struct SeedContext {
    now: DateTime<Utc>,
}

impl SeedContext {
    pub fn current() -> Self {
        Self { now: Utc::now() }
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    /// Seed key for [`OrderingPolicy::RandomDaily`]: `YYYY-MM-DD`.
    pub fn daily_key(&self) -> String {
        self.now.format("%Y-%m-%d").to_string()
    }

    /// Seed key for [`OrderingPolicy::RandomHourly`]: `YYYY-MM-DD-H`,
    /// hour unpadded.
    pub fn hourly_key(&self) -> String {
        format!("{}-{}", self.daily_key(), self.now.hour())
    }
}

/// Fold a key string into a signed 32-bit seed with wrapping arithmetic
/// (`seed = seed * 31 + unit` over UTF-16 code units).
fn fold_seed(key: &str) -> i32 {
    let mut seed: i32 = 0;
    for unit in key.encode_utf16() {
        seed = seed
            .wrapping_shl(5)
            .wrapping_sub(seed)
            .wrapping_add(i32::from(unit));
    }
    seed
}

/// Linear congruential generator with `state = (a*state + c) mod 2^31`,
/// state kept in `[0, 2^31)`.
struct Lcg {
    state: i64,
}

impl Lcg {
    fn from_key(key: &str) -> Self {
        let mut seed = fold_seed(key);
        if seed == 0 {
            // A zero seed would freeze the generator on the increment alone.
            seed = rand::rng().random_range(1..i32::MAX);
        }
        Self {
            state: i64::from(seed).rem_euclid(LCG_MODULUS),
        }
    }

    /// Uniform draw in `[0, 1]`.
    fn next_unit(&mut self) -> f64 {
        self.state = (LCG_MULTIPLIER * self.state + LCG_INCREMENT).rem_euclid(LCG_MODULUS);
        self.state as f64 / (LCG_MODULUS - 1) as f64
    }
}

/// Deterministic Fisher–Yates permutation of a copy of `records`, driven by
/// the key-seeded generator. Equal key and equal input order reproduce the
/// same output bit for bit.
pub fn seeded_shuffle(records: &[ImageRecord], key: &str) -> Vec<ImageRecord> {
    let mut lcg = Lcg::from_key(key);
    let mut shuffled = records.to_vec();
    let mut i = shuffled.len();
    while i > 0 {
        let j = ((lcg.next_unit() * i as f64) as usize).min(i - 1);
        i -= 1;
        shuffled.swap(i, j);
    }
    shuffled
}

/// Order a snapshot of records under the given policy. Pure apart from the
/// process RNG consumed by `Random` (fresh permutation per call) and the
/// zero-seed fallback.
pub fn order(
    records: &[ImageRecord],
    policy: OrderingPolicy,
    seed: &SeedContext,
) -> Vec<ImageRecord> {
    match policy {
        OrderingPolicy::Newest => {
            let mut sorted = records.to_vec();
            sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            sorted
        }
        OrderingPolicy::Oldest => {
            let mut sorted = records.to_vec();
            sorted.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            sorted
        }
        OrderingPolicy::Random => {
            let mut shuffled = records.to_vec();
            shuffled.shuffle(&mut rand::rng());
            shuffled
        }
        OrderingPolicy::RandomDaily => seeded_shuffle(records, &seed.daily_key()),
        OrderingPolicy::RandomHourly => seeded_shuffle(records, &seed.hourly_key()),
    }
}
