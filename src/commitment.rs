//! Hash commitments.
//!
//! A commitment to a sequence of byte strings is the SHA-512/256 digest of a
//! fresh 256-bit blinding factor followed by the length-prefixed messages.
//! The opening is the blinding factor together with the messages; opening
//! verification is total and returns a boolean.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512_256};

/// A hiding, binding commitment to a sequence of messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Commitment {
    hash: [u8; 32],
}

/// The opening of a [`Commitment`]: the blinding factor and the committed
/// messages, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CommitmentOpening {
    blinding: [u8; 32],
    parts: Vec<Vec<u8>>,
}

impl Commitment {
    /// Whether `opening` opens this commitment. Total: never errors.
    pub(crate) fn verify(&self, opening: &CommitmentOpening) -> bool {
        opening.commitment() == *self
    }
}

impl CommitmentOpening {
    /// Assemble an opening from a caller-managed blinding factor; protocol
    /// decommitment structs carry the blinding alongside their payload.
    pub(crate) fn new(blinding: [u8; 32], parts: Vec<Vec<u8>>) -> Self {
        Self { blinding, parts }
    }

    /// The commitment this opening opens.
    pub(crate) fn commitment(&self) -> Commitment {
        let mut hasher = Sha512_256::new();
        hasher.update(self.blinding);
        for part in &self.parts {
            // Length prefixes keep distinct sequences from hashing alike.
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        Commitment {
            hash: hasher.finalize().into(),
        }
    }
}
