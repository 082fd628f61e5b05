//! Schnorr-style (EdDSA) threshold protocols over Ed25519.
//!
//! Structurally simpler siblings of the ECDSA protocols: key generation is
//! Feldman sharing with Schnorr proofs, signing is a commit-reveal of nonce
//! commitments followed by partial signatures, and resharing re-deals the
//! Lagrange-scaled shares to a new committee. None of them need Paillier or
//! ring-Pedersen material.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

mod commit;
pub(crate) mod keygen;
mod keyshare;
mod reshare;
mod sign;

pub use keygen::{EddsaKeygenParticipant, Input as KeygenInput};
pub use keyshare::Output;
pub use reshare::{
    EddsaReshareParticipant, Input as ReshareInput, ReshareOutput,
};
pub use sign::{EddsaSignParticipant, EddsaSignature, Input as SignInput};
