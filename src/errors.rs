//! Error types for the protocol suite.
//!
//! Errors are split between mistakes made by the calling application
//! ([`CallerError`]) and failures arising during protocol execution. Protocol
//! faults ([`ProtocolFault`]) additionally name the participants suspected of
//! causing them; any fault is fatal to the running protocol instance.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{paillier::PaillierError, protocol::ParticipantIdentifier};
use std::fmt::{Display, Formatter};

/// The default Result type used in this crate.
pub type Result<T> = std::result::Result<T, InternalError>;

/// Errors that can occur while running a protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalError {
    /// An internal invariant of the library was violated. This always
    /// indicates a bug.
    InternalInvariantFailed,
    /// The calling application passed a bad input or drove the API
    /// incorrectly.
    CallingApplicationMistake(CallerError),
    /// A zero-knowledge proof failed to verify. At the participant layer this
    /// is converted into a [`ProtocolFault`] naming the prover.
    FailedToVerifyProof,
    /// A Paillier operation failed.
    PaillierError(PaillierError),
    /// A peer violated the protocol; the fault names the suspects.
    ProtocolError(ProtocolFault),
}

/// Errors caused by the calling application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerError {
    /// Invalid input was provided to a protocol constructor.
    BadInput,
    /// A message or persisted blob failed to deserialize.
    DeserializationFailed,
    /// A randomized routine exceeded its retry budget.
    RetryFailed,
    /// A message was delivered to a protocol instance that already
    /// terminated.
    ProtocolAlreadyTerminated,
}

/// A fatal protocol violation, tagged with the indices of the suspected
/// culprits.
///
/// Every fault aborts the protocol run for the local party; there is no
/// intra-run recovery. A bad message is treated as a signal that the sender
/// is faulty or malicious.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolFault {
    /// A multiplicative-to-additive range proof failed to verify.
    RangeProofInvalid(Vec<ParticipantIdentifier>),
    /// A responder's proof in the multiplicative-to-additive conversion
    /// failed to verify.
    BobProofInvalid(Vec<ParticipantIdentifier>),
    /// A Schnorr proof of knowledge failed to verify.
    SchnorrProofInvalid(Vec<ParticipantIdentifier>),
    /// A ring-Pedersen parameter (discrete-log) proof failed to verify.
    DlnProofInvalid(Vec<ParticipantIdentifier>),
    /// A secret share did not match its public commitment, a commitment
    /// failed to open, or the aggregate public key was inconsistent.
    ShareInconsistent(Vec<ParticipantIdentifier>),
    /// A peer's Paillier key or ring-Pedersen parameters failed validation.
    PaillierParamInvalid(Vec<ParticipantIdentifier>),
    /// A peer sent two messages for the same round.
    DuplicateMessage(Vec<ParticipantIdentifier>),
    /// A message arrived for a round that is not reachable from the current
    /// state and could not be parked.
    MessageOutOfOrder(Vec<ParticipantIdentifier>),
    /// The assembled threshold signature failed verification against the
    /// aggregate public key. The signature is not released.
    SignatureVerifyFail,
    /// The protocol run was cancelled by the calling application.
    Aborted,
}

impl ProtocolFault {
    /// The participants suspected of causing this fault.
    pub fn culprits(&self) -> &[ParticipantIdentifier] {
        match self {
            Self::RangeProofInvalid(culprits)
            | Self::BobProofInvalid(culprits)
            | Self::SchnorrProofInvalid(culprits)
            | Self::DlnProofInvalid(culprits)
            | Self::ShareInconsistent(culprits)
            | Self::PaillierParamInvalid(culprits)
            | Self::DuplicateMessage(culprits)
            | Self::MessageOutOfOrder(culprits) => culprits,
            Self::SignatureVerifyFail | Self::Aborted => &[],
        }
    }
}

impl Display for InternalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InternalInvariantFailed => {
                write!(f, "an internal invariant was violated (this is a bug)")
            }
            Self::CallingApplicationMistake(caller_error) => {
                write!(f, "the calling application made an error: {caller_error}")
            }
            Self::FailedToVerifyProof => write!(f, "a zero-knowledge proof failed to verify"),
            Self::PaillierError(paillier_error) => {
                write!(f, "a Paillier operation failed: {paillier_error}")
            }
            Self::ProtocolError(fault) => write!(f, "protocol fault: {fault}"),
        }
    }
}

impl Display for CallerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::BadInput => "bad input to a protocol constructor",
            Self::DeserializationFailed => "failed to deserialize a message or blob",
            Self::RetryFailed => "a randomized routine exceeded its retry budget",
            Self::ProtocolAlreadyTerminated => {
                "a message was delivered to a terminated protocol instance"
            }
        };
        write!(f, "{message}")
    }
}

impl Display for ProtocolFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (message, culprits) = match self {
            Self::RangeProofInvalid(c) => ("range proof failed to verify", c),
            Self::BobProofInvalid(c) => ("MtA response proof failed to verify", c),
            Self::SchnorrProofInvalid(c) => ("Schnorr proof failed to verify", c),
            Self::DlnProofInvalid(c) => ("ring-Pedersen parameter proof failed to verify", c),
            Self::ShareInconsistent(c) => ("secret share inconsistent with commitments", c),
            Self::PaillierParamInvalid(c) => ("Paillier or ring-Pedersen parameters invalid", c),
            Self::DuplicateMessage(c) => ("duplicate message for a round", c),
            Self::MessageOutOfOrder(c) => ("message out of order", c),
            Self::SignatureVerifyFail => {
                return write!(f, "assembled signature failed verification")
            }
            Self::Aborted => return write!(f, "protocol run cancelled"),
        };
        write!(f, "{message}; culprits: {culprits:?}")
    }
}

impl std::error::Error for InternalError {}

impl From<CallerError> for InternalError {
    fn from(error: CallerError) -> Self {
        Self::CallingApplicationMistake(error)
    }
}

impl From<ProtocolFault> for InternalError {
    fn from(fault: ProtocolFault) -> Self {
        Self::ProtocolError(fault)
    }
}

impl From<PaillierError> for InternalError {
    fn from(error: PaillierError) -> Self {
        Self::PaillierError(error)
    }
}
