// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Big-integer sampling and Fiat-Shamir challenge helpers.

use crate::errors::{CallerError, InternalError, Result};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, Rng, RngCore};
use tracing::error;

pub(crate) const CRYPTOGRAPHIC_RETRY_MAX: usize = 500usize;

/// Compute a^e (mod n).
pub(crate) fn modpow(a: &BigNumber, e: &BigNumber, n: &BigNumber) -> BigNumber {
    a.modpow(e, n)
}

/// Sample a number uniformly at random from the range [0, n). This can be
/// used for sampling from a prime field `F_p` or the integers modulo `n`
/// (for any `n`).
pub(crate) fn random_positive_bn<R: RngCore + CryptoRng>(rng: &mut R, n: &BigNumber) -> BigNumber {
    BigNumber::from_rng(n, rng)
}

/// Sample a number uniformly at random from the range [-n, n].
pub(crate) fn random_plusminus<R: RngCore + CryptoRng>(rng: &mut R, n: &BigNumber) -> BigNumber {
    // `from_rng()` samples the _open_ interval, so add 1 to get the closed
    // interval for `n`
    let open_interval_max: BigNumber = n + 1;
    let val = BigNumber::from_rng(&open_interval_max, rng);
    let is_positive: bool = rng.gen();
    match is_positive {
        true => val,
        false => -val,
    }
}

/// Sample a number uniformly at random from the range `[-2^n, 2^n]`.
pub(crate) fn random_plusminus_by_size<R: RngCore + CryptoRng>(rng: &mut R, n: usize) -> BigNumber {
    let range = BigNumber::one() << n;
    random_plusminus(rng, &range)
}

/// Derive a deterministic pseudorandom value in `[0, n)` from the
/// [`Transcript`].
pub(crate) fn positive_challenge_from_transcript(
    transcript: &mut Transcript,
    n: &BigNumber,
) -> Result<BigNumber> {
    // To avoid sample bias, we can't take `t mod n`, because that would bias
    // smaller numbers. Instead, we re-sample a new value (different because
    // there's a new label in the transcript).
    let len = n.to_bytes().len();
    let mut t = vec![0u8; len];
    for _ in 0..CRYPTOGRAPHIC_RETRY_MAX {
        transcript.challenge_bytes(b"sampling randomness", t.as_mut_slice());
        let b = BigNumber::from_slice(t.as_slice());
        if &b < n {
            return Ok(b);
        }
    }
    Err(CallerError::RetryFailed)?
}

/// Generate a random `BigNumber` that is in the multiplicative group of
/// integers modulo `n`.
///
/// Note: In this application, `n` is typically the product of two primes. If
/// the drawn element is not coprime with `n` and is not `0 mod n`, then the
/// caller has accidentally stumbled upon the factorization of `n`!
/// This is a security issue when `n` is someone else's Paillier modulus, but
/// the chance of this happening is basically 0 and we drop the element
/// anyway.
pub(crate) fn random_bn_in_z_star<R: RngCore + CryptoRng>(
    rng: &mut R,
    n: &BigNumber,
) -> Result<BigNumber> {
    // Try up to `CRYPTOGRAPHIC_RETRY_MAX` times to draw a non-zero element.
    // This should virtually never error, though.
    std::iter::repeat_with(|| BigNumber::from_rng(n, rng))
        .take(CRYPTOGRAPHIC_RETRY_MAX)
        .find(|result| result != &BigNumber::zero() && result.gcd(n) == BigNumber::one())
        .ok_or_else(|| {
            error!("failed to sample an element of Z*_n within the retry budget");
            InternalError::CallingApplicationMistake(CallerError::RetryFailed)
        })
}

/// Append a [`BigNumber`] to the transcript under the given label.
///
/// Values are encoded as a sign byte plus the big-endian magnitude, so
/// distinct integers always append distinct transcript entries.
pub(crate) fn transcript_bn(transcript: &mut Transcript, label: &'static [u8], n: &BigNumber) {
    let sign: u8 = if n < &BigNumber::zero() { 1 } else { 0 };
    let mut bytes = vec![sign];
    bytes.extend(n.to_bytes());
    transcript.append_message(label, &bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::init_testing;

    #[test]
    fn test_random_bn_in_range() {
        let mut rng = init_testing();
        // Statistical tests -- should generate random numbers that are long
        // enough
        let mut max_len = 0;
        let num_bytes = 100;

        for _ in 0..1000 {
            let bn = random_plusminus_by_size(&mut rng, num_bytes * 8);
            let len = bn.to_bytes().len();
            if max_len < len {
                max_len = len;
            }
        }

        assert!(max_len > num_bytes - 2);
    }

    #[test]
    fn challenges_stay_below_the_modulus() {
        let modulus = BigNumber::from(1u64) << 64;
        for i in 0..100u64 {
            let mut transcript = Transcript::new(b"challenge test");
            transcript.append_message(b"round", &i.to_le_bytes());
            let challenge =
                positive_challenge_from_transcript(&mut transcript, &modulus).unwrap();
            assert!(challenge >= BigNumber::zero());
            assert!(challenge < modulus);
        }
    }

    #[test]
    fn z_star_elements_are_coprime() {
        let mut rng = init_testing();
        let n = BigNumber::from(15u64); // 3 * 5
        for _ in 0..50 {
            let x = random_bn_in_z_star(&mut rng, &n).unwrap();
            assert_eq!(x.gcd(&n), BigNumber::one());
        }
    }
}

////////////////////////////
// Test Utility Functions //
////////////////////////////

/// Returns an rng to be used for testing. This will print the rng seed
/// to stderr so that if a test fails, the failing seed can be recovered
/// and used for debugging.
#[cfg(test)]
pub(crate) mod testing {
    use rand::{
        rngs::{OsRng, StdRng},
        Rng, SeedableRng,
    };

    /// Initialize any fields necessary for our tests. This should be called
    /// at the top of all our tests. This function is idempotent.
    ///
    /// This will print the rng seed to stderr so that if a test fails, the
    /// failing seed can be recovered and used for debugging.
    pub(crate) fn init_testing() -> StdRng {
        let mut seeder = OsRng;
        let seed = seeder.gen();
        eprintln!(
            "To re-run test with the same randomness, use init_testing_with_seed() with the following seed:"
        );
        eprintln!("\t{seed:?}");
        StdRng::from_seed(seed)
    }

    /// A seeded version of [`init_testing`]. This function can be used when
    /// a test fails unexpectedly, and you want to reproduce the run using a
    /// specific RNG seed.
    ///
    /// **Additionally, turns on logging by default.**
    ///
    /// This function should only be called when debugging. Avoid calling as
    /// part of a normal unit test execution; otherwise it will turn on
    /// logging for all tests.
    #[allow(unused)]
    pub(crate) fn init_testing_with_seed(seed: [u8; 32]) -> StdRng {
        use tracing_subscriber::{
            filter::Targets, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
        };

        let logging_level = EnvFilter::from_default_env()
            .max_level_hint()
            .unwrap()
            .into_level()
            .unwrap();

        // Only capture logging events from this crate.
        let targets = Targets::new().with_target("tss_mpc", logging_level);
        let stdout_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_filter(targets);

        // It's okay if this fails. It just means logging has already been set
        // up for this thread.
        let _ = tracing_subscriber::registry().with(stdout_layer).try_init();

        // Return RNG
        StdRng::from_seed(seed)
    }
}
