//! The message envelope exchanged between participants.
//!
//! Every message carries the sending and receiving party, the session
//! identifier, a broadcast-vs-point-to-point flag and a typed, but not yet
//! validated, payload. The engine routes a message to its round by the
//! [`MessageType`] alone; payloads stay opaque until the handling round
//! deserializes and checks them.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    errors::{InternalError, ProtocolFault, Result},
    protocol::{Identifier, ParticipantIdentifier},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::error;

/// Message types for the ECDSA key generation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeygenMessageType {
    /// Signal that a participant is ready to begin.
    Ready,
    /// Round 1: commitment to the Feldman coefficient commitments, plus
    /// Paillier and ring-Pedersen parameters with their proofs.
    R1Commit,
    /// Round 2: opening of the round 1 commitment.
    R2Decommit,
    /// Round 2: a Paillier-encrypted Feldman sub-share, sent peer-to-peer.
    R2PrivateShare,
    /// Round 3: Schnorr proof of knowledge of the aggregated share.
    R3Proof,
}

/// Message types for the threshold ECDSA signing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignMessageType {
    /// Signal that a participant is ready to begin.
    Ready,
    /// Round 1: commitment to the nonce witness point.
    R1Commit,
    /// Round 1: the encrypted nonce share with its range proof, sent
    /// peer-to-peer.
    R1MtaInit,
    /// Round 2: the MtA responses for both the nonce and key-share pairings,
    /// sent peer-to-peer.
    R2MtaResponse,
    /// Round 3: reveal of the masked nonce product share.
    R3Delta,
    /// Round 4: opening of the round 1 commitment.
    R4Decommit,
    /// Round 5: reveal of the signature share.
    R5SigShare,
}

/// Message types for the ECDSA resharing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReshareMessageType {
    /// Signal that a participant is ready to begin.
    Ready,
    /// Round 1: an old-committee member's commitment to its fresh sharing
    /// polynomial.
    R1Commit,
    /// Round 2: a new-committee member's Paillier and ring-Pedersen
    /// parameters with their proofs.
    R2AuxInfo,
    /// Round 3: a Paillier-encrypted sub-share for a new-committee member,
    /// sent peer-to-peer.
    R3PrivateShare,
    /// Round 4: opening of the round 1 commitment.
    R4Decommit,
    /// Round 5: a new-committee member's Schnorr proof of its fresh share.
    R5Proof,
}

/// Message types for the EdDSA key generation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EddsaKeygenMessageType {
    /// Signal that a participant is ready to begin.
    Ready,
    /// Round 1: commitment to the Feldman coefficient commitments.
    R1Commit,
    /// Round 2: opening of the round 1 commitment.
    R2Decommit,
    /// Round 2: a Feldman sub-share, sent peer-to-peer.
    R2PrivateShare,
    /// Round 3: Schnorr proof of knowledge of the aggregated share.
    R3Proof,
}

/// Message types for the threshold EdDSA signing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EddsaSignMessageType {
    /// Signal that a participant is ready to begin.
    Ready,
    /// Round 1: commitment to the nonce commitment point.
    R1Commit,
    /// Round 2: opening of the round 1 commitment, with a proof of knowledge
    /// of the nonce.
    R2Decommit,
    /// Round 3: reveal of the signature share.
    R3SigShare,
}

/// Message types for the EdDSA resharing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EddsaReshareMessageType {
    /// Signal that a participant is ready to begin.
    Ready,
    /// Round 1: an old-committee member's commitment to its fresh sharing
    /// polynomial.
    R1Commit,
    /// Round 2: a sub-share for a new-committee member, sent peer-to-peer.
    R2PrivateShare,
    /// Round 3: opening of the round 1 commitment.
    R3Decommit,
    /// Round 4: a new-committee member's Schnorr proof of its fresh share.
    R4Proof,
}

/// The type of a [`Message`]; identifies the protocol and round it belongs
/// to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// A key generation message.
    Keygen(KeygenMessageType),
    /// A signing message.
    Sign(SignMessageType),
    /// A resharing message.
    Reshare(ReshareMessageType),
    /// An EdDSA key generation message.
    EddsaKeygen(EddsaKeygenMessageType),
    /// An EdDSA signing message.
    EddsaSign(EddsaSignMessageType),
    /// An EdDSA resharing message.
    EddsaReshare(EddsaReshareMessageType),
}

/// A single message emitted or consumed by a protocol participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    message_type: MessageType,
    identifier: Identifier,
    from: ParticipantIdentifier,
    to: ParticipantIdentifier,
    broadcast: bool,
    /// The raw payload. Not validated until the receiving round deserializes
    /// and checks it.
    pub(crate) unverified_bytes: Vec<u8>,
}

impl Message {
    /// Create a new point-to-point message.
    pub fn new<T: Serialize>(
        message_type: MessageType,
        identifier: Identifier,
        from: ParticipantIdentifier,
        to: ParticipantIdentifier,
        content: &T,
    ) -> Result<Self> {
        Ok(Self {
            message_type,
            identifier,
            from,
            to,
            broadcast: false,
            unverified_bytes: serialize!(content)?,
        })
    }

    /// Create a new broadcast message addressed to `to`.
    ///
    /// The engine emits one copy per recipient; the flag records the sender's
    /// claim that every recipient was sent the same payload.
    pub fn new_broadcast<T: Serialize>(
        message_type: MessageType,
        identifier: Identifier,
        from: ParticipantIdentifier,
        to: ParticipantIdentifier,
        content: &T,
    ) -> Result<Self> {
        Ok(Self {
            message_type,
            identifier,
            from,
            to,
            broadcast: true,
            unverified_bytes: serialize!(content)?,
        })
    }

    /// The type of this message.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// The session this message belongs to.
    pub fn id(&self) -> Identifier {
        self.identifier
    }

    /// The sending party.
    pub fn from(&self) -> ParticipantIdentifier {
        self.from
    }

    /// The receiving party.
    pub fn to(&self) -> ParticipantIdentifier {
        self.to
    }

    /// Whether the sender flagged this message as a broadcast.
    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    /// Check that the message has the expected type.
    pub(crate) fn check_type(&self, expected: MessageType) -> Result<()> {
        if self.message_type() != expected {
            error!(
                "A message was misrouted. Expected {:?}, got {:?}",
                expected,
                self.message_type()
            );
            return Err(InternalError::InternalInvariantFailed);
        }
        Ok(())
    }

    /// Check that the message has the expected type and was flagged as a
    /// broadcast by its sender.
    pub(crate) fn check_broadcast(&self, expected: MessageType) -> Result<()> {
        self.check_type(expected)?;
        if !self.is_broadcast() {
            error!(
                "Expected a broadcast message of type {:?} from {}, got point-to-point",
                expected,
                self.from()
            );
            Err(ProtocolFault::MessageOutOfOrder(vec![self.from()]))?;
        }
        Ok(())
    }

    /// Check that the message has the expected type and is point-to-point.
    pub(crate) fn check_peer_to_peer(&self, expected: MessageType) -> Result<()> {
        self.check_type(expected)?;
        if self.is_broadcast() {
            error!(
                "Expected a point-to-point message of type {:?} from {}, got broadcast",
                expected,
                self.from()
            );
            Err(ProtocolFault::MessageOutOfOrder(vec![self.from()]))?;
        }
        Ok(())
    }
}

/// A buffer of messages that arrived before their round started, keyed by
/// message type.
///
/// Dropping early traffic instead of parking it here is a classic source of
/// livelock: a fast peer's round-N+1 message can arrive before the local
/// party finishes round N.
#[derive(Debug, Default)]
pub(crate) struct MessageQueue {
    queue: HashMap<MessageType, Vec<Message>>,
}

impl MessageQueue {
    pub(crate) fn store(&mut self, message: Message) {
        self.queue
            .entry(message.message_type())
            .or_default()
            .push(message);
    }

    /// Drain all parked messages of the given type.
    pub(crate) fn retrieve_all(&mut self, message_type: MessageType) -> Vec<Message> {
        self.queue.remove(&message_type).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::init_testing;

    #[test]
    fn broadcast_flag_is_checked() {
        let mut rng = init_testing();
        let sid = Identifier::random(&mut rng);
        let from = ParticipantIdentifier::random(&mut rng);
        let to = ParticipantIdentifier::random(&mut rng);
        let ty = MessageType::Keygen(KeygenMessageType::R1Commit);

        let p2p = Message::new(ty, sid, from, to, &[0u8; 4]).unwrap();
        assert!(p2p.check_peer_to_peer(ty).is_ok());
        assert!(p2p.check_broadcast(ty).is_err());

        let broadcast = Message::new_broadcast(ty, sid, from, to, &[0u8; 4]).unwrap();
        assert!(broadcast.check_broadcast(ty).is_ok());
        assert!(broadcast.check_peer_to_peer(ty).is_err());
    }

    #[test]
    fn queue_parks_and_drains_by_type() {
        let mut rng = init_testing();
        let sid = Identifier::random(&mut rng);
        let from = ParticipantIdentifier::random(&mut rng);
        let to = ParticipantIdentifier::random(&mut rng);

        let mut queue = MessageQueue::default();
        let ty = MessageType::Sign(SignMessageType::R3Delta);
        let other_ty = MessageType::Sign(SignMessageType::R5SigShare);
        queue.store(Message::new(ty, sid, from, to, &1u8).unwrap());
        queue.store(Message::new(ty, sid, to, from, &2u8).unwrap());
        queue.store(Message::new(other_ty, sid, from, to, &3u8).unwrap());

        assert_eq!(queue.retrieve_all(ty).len(), 2);
        assert!(queue.retrieve_all(ty).is_empty());
        assert_eq!(queue.retrieve_all(other_ty).len(), 1);
    }
}
