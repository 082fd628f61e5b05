// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::curve::EcdsaCurveTrait;

/// The artifact of a successful threshold signing run.
///
/// The signature is verified against the aggregate public key before it is
/// released, so a value of this type always verifies for its digest.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureData<C: EcdsaCurveTrait> {
    signature: C::Signature,
    recovery_id: u8,
    message_digest: [u8; 32],
}

impl<C: EcdsaCurveTrait> SignatureData<C> {
    pub(crate) fn new(signature: C::Signature, recovery_id: u8, message_digest: [u8; 32]) -> Self {
        Self {
            signature,
            recovery_id,
            message_digest,
        }
    }

    /// The assembled signature, normalized to the low-s form.
    pub fn signature(&self) -> &C::Signature {
        &self.signature
    }

    /// The public-key recovery byte.
    ///
    /// The convention is the parity of the y-coordinate of the nonce point
    /// `R` (0 for even, 1 for odd), flipped once more if `s` was negated
    /// during low-s normalization.
    pub fn recovery_id(&self) -> u8 {
        self.recovery_id
    }

    /// The digest that was signed.
    pub fn message_digest(&self) -> &[u8; 32] {
        &self.message_digest
    }
}
