//! Random interaction identifiers.

use core::fmt;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// Random bytes per identifier.
pub const ID_BYTES: usize = 12;

/// Generates lowercase hex identifiers of [`ID_BYTES`] random bytes.
///
/// The random source is injected so tests can make identifiers predictable.
pub struct RandomIdGenerator {
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl fmt::Debug for RandomIdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomIdGenerator").finish_non_exhaustive()
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self::new(StdRng::from_entropy())
    }
}

impl RandomIdGenerator {
    /// Creates a generator drawing from `rng`.
    pub fn new(rng: impl RngCore + Send + 'static) -> Self {
        Self {
            rng: Mutex::new(Box::new(rng)),
        }
    }

    /// Returns a fresh 24-character identifier.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut bytes = [0u8; ID_BYTES];
        self.rng.lock().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}
