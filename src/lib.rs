//! A library for full-threshold multi-party signing under ECDSA (secp256k1)
//! and EdDSA (Ed25519).
//!
//! A set of mutually distrusting parties jointly generates a public key whose
//! private key never exists in one place, then collaboratively produces
//! signatures under that key with a `(t, n)` threshold: any `t + 1` of the
//! `n` shareholders can sign. Shares can be transferred to a new committee
//! with a new threshold without ever reconstructing the secret.
//!
//! The ECDSA protocols follow Gennaro and Goldfeder's scheme, built on
//! Paillier encryption, multiplicative-to-additive share conversion with
//! zero-knowledge range proofs, and Feldman verifiable secret sharing. The
//! EdDSA protocols are a Schnorr-style analogue without the Paillier
//! machinery.
//!
//! # Driving a protocol
//!
//! Each protocol is a [`ProtocolParticipant`]: a message-driven state machine
//! for one party. The calling application owns the network. It kicks a
//! participant off with [`ProtocolParticipant::initialize_message`], feeds
//! every incoming message to [`ProtocolParticipant::process_message`], and
//! delivers the messages returned in each [`ProcessOutcome`] to their
//! recipients. Delivery order across parties is arbitrary; early messages
//! are parked internally until their round begins. On completion the
//! participant returns its typed output: a key share, a signature, or a
//! reshared key.
//!
//! A failed verification anywhere aborts the run for that party with an
//! error naming the suspected culprit; no signature or share is released
//! from a failed run.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

#![allow(non_snake_case)]
#![warn(missing_docs)]
#![warn(unused_results)]

/// Serialize a value with the crate's wire encoding.
macro_rules! serialize {
    ($value:expr) => {{
        bincode::serialize($value).map_err(|_| {
            crate::errors::InternalError::CallingApplicationMistake(
                crate::errors::CallerError::DeserializationFailed,
            )
        })
    }};
}

/// Deserialize a value from the crate's wire encoding.
macro_rules! deserialize {
    ($bytes:expr) => {{
        bincode::deserialize($bytes).map_err(|_| {
            crate::errors::InternalError::CallingApplicationMistake(
                crate::errors::CallerError::DeserializationFailed,
            )
        })
    }};
}

/// Run a message-generating method at most once per participant lifetime.
///
/// Every subsequent invocation returns an empty message set, making round
/// emission idempotent under message replay and out-of-order delivery.
macro_rules! run_only_once {
    ($self:ident . $func:ident ( $($args:expr),* $(,)? )) => {{
        if $self.read_progress(stringify!($func))? {
            tracing::info!("{} already ran; not running again", stringify!($func));
            Ok(std::vec::Vec::new())
        } else {
            $self.write_progress(stringify!($func))?;
            $self.$func($($args),*)
        }
    }};
}

mod commitment;
mod curve;
mod ed25519;
pub mod eddsa;
pub mod errors;
mod k256;
pub mod keygen;
mod local_storage;
mod messages;
mod mta;
mod paillier;
mod participant;
mod protocol;
pub mod reshare;
mod ring_pedersen;
pub mod sign;
mod utils;
mod vss;
mod zkp;

pub use crate::k256::{SignatureK256, K256};
pub use curve::{
    CurveTrait, EcdsaCurveTrait, ScalarTrait, SchnorrCurveTrait, SignatureTrait, TestCurve,
    VerifyingKeyTrait,
};
pub use ed25519::Ed25519;
pub use messages::{
    EddsaKeygenMessageType, EddsaReshareMessageType, EddsaSignMessageType, KeygenMessageType,
    Message, MessageType, ReshareMessageType, SignMessageType,
};
pub use paillier::PaillierError;
pub use participant::{ProcessOutcome, ProtocolParticipant, Status};
pub use protocol::{Identifier, ParticipantConfig, ParticipantIdentifier, ProtocolType};
