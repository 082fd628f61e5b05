//! The message-driven engine shared by every protocol in this crate.
//!
//! A [`ProtocolParticipant`] is one party's state machine for one protocol
//! run. The calling application owns the transport: it feeds parsed incoming
//! messages to [`ProtocolParticipant::process_message`] and delivers the
//! messages returned in the [`ProcessOutcome`]. Rounds advance implicitly:
//! each round's handler records validated peer contributions in local
//! storage, and when contributions from all expected peers are present the
//! participant emits the next round's messages. Messages that arrive for a
//! future round are parked and drained when that round begins.
//!
//! A single failed verification anywhere aborts the run for this party with
//! a fault naming the culprit; there is no per-message retry.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    errors::{CallerError, InternalError, ProtocolFault, Result},
    local_storage::{LocalStorage, TypeTag},
    messages::{Message, MessageQueue, MessageType},
    protocol::{Identifier, ParticipantIdentifier, ProtocolType},
    zkp::ProofContext,
};
use rand::{CryptoRng, RngCore};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{error, info, warn};

/// The result of processing one message.
#[derive(Debug)]
pub enum ProcessOutcome<O> {
    /// The protocol is incomplete and no messages were produced.
    Incomplete,
    /// The protocol is incomplete; deliver the produced messages.
    Processed(Vec<Message>),
    /// The protocol terminated for this participant with the given output.
    Terminated(O),
    /// The protocol terminated for this participant, but the produced
    /// messages must still be delivered so the other participants can
    /// terminate too.
    TerminatedForThisParticipant(O, Vec<Message>),
}

impl<O> ProcessOutcome<O> {
    /// Build an outcome from an optional output and a set of messages.
    pub(crate) fn from(output: Option<O>, messages: Vec<Message>) -> Self {
        match (output, messages.is_empty()) {
            (None, true) => Self::Incomplete,
            (None, false) => Self::Processed(messages),
            (Some(output), true) => Self::Terminated(output),
            (Some(output), false) => Self::TerminatedForThisParticipant(output, messages),
        }
    }

    /// Split the outcome into its output and message parts.
    pub(crate) fn into_parts(self) -> (Option<O>, Vec<Message>) {
        match self {
            Self::Incomplete => (None, Vec::new()),
            Self::Processed(messages) => (None, messages),
            Self::Terminated(output) => (Some(output), Vec::new()),
            Self::TerminatedForThisParticipant(output, messages) => (Some(output), messages),
        }
    }

    /// Attach additional messages to this outcome.
    pub(crate) fn with_messages(self, messages: Vec<Message>) -> Self {
        let (output, mut all_messages) = self.into_parts();
        all_messages.extend(messages);
        Self::from(output, all_messages)
    }

    /// Merge a set of outcomes into one.
    ///
    /// At most one of the outcomes may carry an output; two outputs for the
    /// same participant indicate an internal bug.
    pub(crate) fn collect(outcomes: Vec<Self>) -> Result<Self> {
        let mut all_messages = Vec::new();
        let mut output = None;
        for outcome in outcomes {
            let (maybe_output, messages) = outcome.into_parts();
            if maybe_output.is_some() {
                if output.is_some() {
                    error!("a single participant produced two outputs");
                    return Err(InternalError::InternalInvariantFailed);
                }
                output = maybe_output;
            }
            all_messages.extend(messages);
        }
        Ok(Self::from(output, all_messages))
    }

    /// Merge a set of outcomes with additional messages.
    pub(crate) fn collect_with_messages(
        outcomes: Vec<Self>,
        messages: Vec<Message>,
    ) -> Result<Self> {
        Ok(Self::collect(outcomes)?.with_messages(messages))
    }

    /// Merge this outcome with a set of others.
    pub(crate) fn consolidate(self, others: Vec<Self>) -> Result<Self> {
        let mut outcomes = vec![self];
        outcomes.extend(others);
        Self::collect(outcomes)
    }
}

/// The externally observable status of a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// The participant has not yet received its ready signal.
    NotReady,
    /// The participant is processing rounds.
    Running,
    /// The participant terminated and produced an output.
    TerminatedSuccessfully,
    /// The run was cancelled; secret scratch state has been dropped.
    Aborted,
}

impl Status {
    /// Whether the participant accepts round messages.
    pub fn is_ready(&self) -> bool {
        matches!(self, Status::Running | Status::TerminatedSuccessfully)
    }
}

/// The interface of one party's state machine for one protocol run.
pub trait ProtocolParticipant {
    /// The input this protocol requires.
    type Input;
    /// The artifact the protocol terminates with.
    type Output;

    /// Create a new participant for the session `sid`.
    fn new(
        sid: Identifier,
        id: ParticipantIdentifier,
        other_participant_ids: Vec<ParticipantIdentifier>,
        input: Self::Input,
    ) -> Result<Self>
    where
        Self: Sized;

    /// The message type that kicks off this protocol for a participant.
    fn ready_type() -> MessageType;

    /// The protocol this participant runs.
    fn protocol_type() -> ProtocolType;

    /// This participant's identifier.
    fn id(&self) -> ParticipantIdentifier;

    /// The identifiers of all other participants.
    fn other_ids(&self) -> &[ParticipantIdentifier];

    /// The session identifier.
    fn sid(&self) -> Identifier;

    /// Process one incoming message, advancing the state machine as far as
    /// the accumulated traffic allows.
    fn process_message<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<Self::Output>>;

    /// The participant's current status.
    fn status(&self) -> &Status;

    /// Cancel the run.
    ///
    /// All stored state, including secret scratch material, is dropped
    /// (secret types zeroize on drop) and any further call to
    /// [`ProtocolParticipant::process_message`] fails with an abort fault.
    fn cancel(&mut self);

    /// The message the calling application uses to kick off this
    /// participant.
    fn initialize_message(&self) -> Result<Message> {
        let empty: [u8; 0] = [];
        Message::new(Self::ready_type(), self.sid(), self.id(), self.id(), &empty)
    }
}

mod storage {
    use super::*;

    pub(super) struct Ready;
    impl TypeTag for Ready {
        type Value = ();
    }
    pub(super) struct Progress;
    impl TypeTag for Progress {
        type Value = HashSet<&'static str>;
    }
    pub(super) struct Stash;
    impl TypeTag for Stash {
        type Value = MessageQueue;
    }
}

/// Functionality shared by the participant implementations but not exposed
/// to the calling application.
pub(crate) trait InnerProtocolParticipant: ProtocolParticipant {
    /// The context bound into this protocol's Fiat-Shamir transcripts.
    type Context: ProofContext;

    /// Collect the context for proofs produced and verified in this run.
    fn retrieve_context(&self) -> Self::Context;

    fn local_storage(&self) -> &LocalStorage;
    fn local_storage_mut(&mut self) -> &mut LocalStorage;
    fn status_mut(&mut self) -> &mut Status;

    /// All participant identifiers, including this participant's.
    fn all_participants(&self) -> Vec<ParticipantIdentifier> {
        let mut all = self.other_ids().to_vec();
        all.push(self.id());
        all
    }

    /// Build one point-to-point message per other participant with the given
    /// content.
    fn message_for_other_participants<T: Serialize>(
        &self,
        message_type: MessageType,
        content: T,
    ) -> Result<Vec<Message>> {
        self.other_ids()
            .iter()
            .map(|&other| Message::new(message_type, self.sid(), self.id(), other, &content))
            .collect()
    }

    /// Build one broadcast-flagged message per other participant with the
    /// given content.
    fn broadcast_for_other_participants<T: Serialize>(
        &self,
        message_type: MessageType,
        content: T,
    ) -> Result<Vec<Message>> {
        self.other_ids()
            .iter()
            .map(|&other| {
                Message::new_broadcast(message_type, self.sid(), self.id(), other, &content)
            })
            .collect()
    }

    /// Park a message that cannot be handled yet.
    fn stash_message(&mut self, message: &Message) -> Result<()> {
        info!(
            "Stashing early {:?} message from {}",
            message.message_type(),
            message.from()
        );
        let id = self.id();
        if !self.local_storage().contains::<storage::Stash>(id) {
            self.local_storage_mut()
                .store::<storage::Stash>(id, MessageQueue::default());
        }
        let stash = self
            .local_storage_mut()
            .retrieve_mut::<storage::Stash>(id)?;
        stash.store(message.clone());
        Ok(())
    }

    /// Drain all parked messages of the given type.
    fn fetch_messages(&mut self, message_type: MessageType) -> Result<Vec<Message>> {
        let id = self.id();
        if !self.local_storage().contains::<storage::Stash>(id) {
            return Ok(Vec::new());
        }
        let stash = self
            .local_storage_mut()
            .retrieve_mut::<storage::Stash>(id)?;
        Ok(stash.retrieve_all(message_type))
    }

    /// Process a ready message.
    ///
    /// The first ready message must come from the local party itself (the
    /// caller's kick-off); it triggers a broadcast of our readiness to all
    /// peers. Once every participant has signalled readiness the status
    /// flips to [`Status::Running`].
    fn process_ready_message<R: RngCore + CryptoRng>(
        &mut self,
        _rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<Self::Output>> {
        message.check_type(Self::ready_type())?;
        self.local_storage_mut()
            .store::<storage::Ready>(message.from(), ());

        let messages = if message.from() == self.id() {
            run_only_once!(self.ready_messages_for_peers())?
        } else {
            Vec::new()
        };

        if self
            .local_storage()
            .contains_for_all_ids::<storage::Ready>(&self.all_participants())
            && *self.status() == Status::NotReady
        {
            info!("All participants are ready; starting round one");
            *self.status_mut() = Status::Running;
        }

        Ok(ProcessOutcome::Processed(messages))
    }

    /// Tell all peers that this participant is ready.
    fn ready_messages_for_peers(&mut self) -> Result<Vec<Message>> {
        let empty: [u8; 0] = [];
        self.broadcast_for_other_participants(Self::ready_type(), empty)
    }

    /// Whether every participant, including this one, has signalled
    /// readiness.
    fn is_ready(&self) -> bool {
        self.local_storage()
            .contains_for_all_ids::<storage::Ready>(&self.all_participants())
    }

    /// Fail if a value of type `T` was already recorded for the sender;
    /// receiving the same round message twice is a protocol violation.
    fn check_for_duplicate_msg<T: TypeTag>(&self, from: ParticipantIdentifier) -> Result<()> {
        if self.local_storage().contains::<T>(from) {
            error!("received a duplicate round message from {from}");
            Err(ProtocolFault::DuplicateMessage(vec![from]))?;
        }
        Ok(())
    }

    /// Whether the named once-only routine already ran.
    fn read_progress(&self, function: &'static str) -> Result<bool> {
        let id = self.id();
        if !self.local_storage().contains::<storage::Progress>(id) {
            return Ok(false);
        }
        Ok(self
            .local_storage()
            .retrieve::<storage::Progress>(id)?
            .contains(function))
    }

    /// Record that the named once-only routine ran.
    fn write_progress(&mut self, function: &'static str) -> Result<()> {
        let id = self.id();
        if !self.local_storage().contains::<storage::Progress>(id) {
            self.local_storage_mut()
                .store::<storage::Progress>(id, HashSet::new());
        }
        let progress = self
            .local_storage_mut()
            .retrieve_mut::<storage::Progress>(id)?;
        let _ = progress.insert(function);
        Ok(())
    }

    /// Worker for [`ProtocolParticipant::cancel`]: drop all stored state and
    /// mark the run aborted.
    fn abort(&mut self) {
        warn!("cancelling protocol run for {}", self.id());
        *self.local_storage_mut() = LocalStorage::default();
        *self.status_mut() = Status::Aborted;
    }

    /// Guard shared by all `process_message` implementations: reject traffic
    /// to finished or cancelled participants and park traffic that arrives
    /// before readiness.
    fn check_can_process(&mut self, message: &Message) -> Result<bool> {
        let status = self.status().clone();
        match status {
            Status::TerminatedSuccessfully => {
                Err(CallerError::ProtocolAlreadyTerminated.into())
            }
            Status::Aborted => Err(ProtocolFault::Aborted.into()),
            Status::NotReady if message.message_type() != Self::ready_type() => {
                self.stash_message(message)?;
                Ok(false)
            }
            _ => Ok(true),
        }
    }
}

