//! Threshold EdDSA signing.
//!
//! A Schnorr-style two-phase protocol: each signer of the quorum commits to
//! a nonce commitment `R_i = r_i·G`, opens it together with a proof of
//! knowledge of `r_i`, and then reveals the partial signature
//! `s_i = r_i + c·λ_i·x_i`, where `c` is the standard Ed25519 challenge over
//! the aggregate `R`, the joint public key and the message. Aggregation
//! yields `(R, s)`, which is verified with a standard Ed25519 verifier
//! before release.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    commitment::Commitment,
    curve::{CurveTrait, ScalarTrait, SchnorrCurveTrait},
    errors::{CallerError, ProtocolFault, Result},
    eddsa::{commit::PointsDecommit, keyshare::Output},
    local_storage::{LocalStorage, TypeTag},
    messages::{EddsaSignMessageType, Message, MessageType},
    participant::{InnerProtocolParticipant, ProcessOutcome, ProtocolParticipant, Status},
    protocol::{Identifier, ParticipantConfig, ParticipantIdentifier, ProtocolType, SharedContext},
    zkp::{
        pisch::{self, PiSchProof},
        Proof,
    },
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Input for the threshold EdDSA signing protocol.
#[derive(Debug)]
pub struct Input<C: CurveTrait> {
    message: Vec<u8>,
    key_share: Output<C>,
}

impl<C: CurveTrait> Input<C> {
    /// Construct a new signing input from the message to sign and this
    /// party's saved key material.
    ///
    /// EdDSA signs the message itself, not a prehash.
    pub fn new(message: impl Into<Vec<u8>>, key_share: Output<C>) -> Self {
        Self {
            message: message.into(),
            key_share,
        }
    }

    pub(crate) fn message(&self) -> &[u8] {
        &self.message
    }

    pub(crate) fn key_share(&self) -> &Output<C> {
        &self.key_share
    }

    pub(crate) fn check_participant_config(&self, config: &ParticipantConfig) -> Result<()> {
        if config.count() < self.key_share.threshold() + 1 {
            error!(
                "signing requires at least {} participants, got {}",
                self.key_share.threshold() + 1,
                config.count()
            );
            Err(CallerError::BadInput)?;
        }
        let shareholders = self.key_share.participants();
        for pid in config.all_participants() {
            if !shareholders.contains(&pid) {
                error!("{pid} is not a shareholder of this key");
                Err(CallerError::BadInput)?;
            }
        }
        Ok(())
    }
}

/// The artifact of a successful threshold EdDSA signing run.
///
/// Verified against the joint public key before release; the byte encoding
/// is the standard 64-byte `R ‖ s`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EddsaSignature<C: CurveTrait> {
    big_r: C,
    s: C::Scalar,
}

impl<C: CurveTrait> EddsaSignature<C> {
    /// The nonce commitment point `R`.
    pub fn big_r(&self) -> &C {
        &self.big_r
    }

    /// The signature scalar `s`.
    pub fn s(&self) -> &C::Scalar {
        &self.s
    }

    /// The standard 64-byte encoding `R ‖ s`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.big_r.to_bytes();
        bytes.extend(self.s.to_bytes());
        bytes
    }
}

/// This signer's nonce.
#[derive(Zeroize, ZeroizeOnDrop)]
struct NonceSecret<C: CurveTrait> {
    r: C::Scalar,
}

mod storage {
    use super::*;

    pub(super) struct Commit;
    impl TypeTag for Commit {
        type Value = Commitment;
    }
    pub(super) struct Nonce<C: CurveTrait> {
        _c: std::marker::PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for Nonce<C> {
        type Value = NonceSecret<C>;
    }
    pub(super) struct OwnDecommit<C: CurveTrait> {
        _c: std::marker::PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for OwnDecommit<C> {
        type Value = PointsDecommit<C>;
    }
    pub(super) struct BigR<C: CurveTrait> {
        _c: std::marker::PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for BigR<C> {
        type Value = C;
    }
    pub(super) struct AggregateR<C: CurveTrait> {
        _c: std::marker::PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for AggregateR<C> {
        type Value = C;
    }
    pub(super) struct SigShare<C: CurveTrait> {
        _c: std::marker::PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for SigShare<C> {
        type Value = C::Scalar;
    }
}

/// The opening of a signer's nonce commitment with a proof of knowledge of
/// the nonce, broadcast in round 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
struct DecommitPayload<C: CurveTrait> {
    decommit: PointsDecommit<C>,
    proof: PiSchProof<C>,
}

/// A [`ProtocolParticipant`] that runs the threshold EdDSA signing
/// protocol.
///
/// # Protocol input
/// The message and the saved key material; see [`Input`]. The participants
/// of the run form the signing quorum and must number at least
/// `threshold + 1`.
///
/// # Protocol output
/// Upon successful completion, the participant outputs an
/// [`EddsaSignature`], already verified against the joint public key.
#[derive(Debug)]
pub struct EddsaSignParticipant<C: SchnorrCurveTrait> {
    sid: Identifier,
    input: Input<C>,
    id: ParticipantIdentifier,
    other_participant_ids: Vec<ParticipantIdentifier>,
    local_storage: LocalStorage,
    status: Status,
}

impl<C: SchnorrCurveTrait> ProtocolParticipant for EddsaSignParticipant<C> {
    type Input = Input<C>;
    type Output = EddsaSignature<C>;

    fn new(
        sid: Identifier,
        id: ParticipantIdentifier,
        other_participant_ids: Vec<ParticipantIdentifier>,
        input: Self::Input,
    ) -> Result<Self> {
        input.check_participant_config(&ParticipantConfig::new(id, &other_participant_ids)?)?;

        Ok(Self {
            sid,
            input,
            id,
            other_participant_ids,
            local_storage: Default::default(),
            status: Status::NotReady,
        })
    }

    fn ready_type() -> MessageType {
        MessageType::EddsaSign(EddsaSignMessageType::Ready)
    }

    fn protocol_type() -> ProtocolType {
        ProtocolType::EddsaSign
    }

    fn id(&self) -> ParticipantIdentifier {
        self.id
    }

    fn other_ids(&self) -> &[ParticipantIdentifier] {
        &self.other_participant_ids
    }

    fn sid(&self) -> Identifier {
        self.sid
    }

    #[instrument(skip_all)]
    fn process_message<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<Self::Output>> {
        info!(
            "EDDSA SIGN: player {}: received {:?} from {}",
            self.id(),
            message.message_type(),
            message.from()
        );

        if !self.check_can_process(message)? {
            return Ok(ProcessOutcome::Incomplete);
        }

        match message.message_type() {
            MessageType::EddsaSign(EddsaSignMessageType::Ready) => {
                self.handle_ready_msg(rng, message)
            }
            MessageType::EddsaSign(EddsaSignMessageType::R1Commit) => {
                self.handle_round_one_msg(rng, message)
            }
            MessageType::EddsaSign(EddsaSignMessageType::R2Decommit) => {
                self.handle_round_two_msg(message)
            }
            MessageType::EddsaSign(EddsaSignMessageType::R3SigShare) => {
                self.handle_round_three_msg(message)
            }
            message_type => {
                error!("incorrect message type given to EddsaSignParticipant: {message_type:?}");
                Err(ProtocolFault::MessageOutOfOrder(vec![message.from()]))?
            }
        }
    }

    fn status(&self) -> &Status {
        &self.status
    }

    fn cancel(&mut self) {
        self.abort()
    }
}

impl<C: SchnorrCurveTrait> InnerProtocolParticipant for EddsaSignParticipant<C> {
    type Context = SharedContext;

    fn retrieve_context(&self) -> Self::Context {
        SharedContext::collect(self)
    }

    fn local_storage(&self) -> &LocalStorage {
        &self.local_storage
    }

    fn local_storage_mut(&mut self) -> &mut LocalStorage {
        &mut self.local_storage
    }

    fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }
}

impl<C: SchnorrCurveTrait> EddsaSignParticipant<C> {
    #[instrument(skip_all, err(Debug))]
    fn handle_ready_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        info!("Handling ready EdDSA sign message.");

        let ready_outcome = self.process_ready_message(rng, message)?;
        if !self.is_ready() {
            return Ok(ready_outcome);
        }
        let round_one_messages = run_only_once!(self.gen_round_one_msgs(rng))?;

        let round_one_outcomes = self
            .fetch_messages(MessageType::EddsaSign(EddsaSignMessageType::R1Commit))?
            .iter()
            .map(|msg| self.handle_round_one_msg(rng, msg))
            .collect::<Result<Vec<_>>>()?;

        ready_outcome
            .with_messages(round_one_messages)
            .consolidate(round_one_outcomes)
    }

    /// Sample the nonce and broadcast a commitment to `R_i = r_i·G`.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_one_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round one EdDSA sign messages.");

        let r = C::Scalar::random(rng);
        let big_r = C::generator().multiply_by_scalar(&r);

        let decommit = PointsDecommit::new(rng, &self.sid(), &self.id(), &[big_r]);
        let commit = decommit.commit()?;
        self.local_storage
            .store::<storage::Commit>(self.id(), commit);
        self.local_storage
            .store::<storage::OwnDecommit<C>>(self.id(), decommit);
        self.local_storage
            .store::<storage::BigR<C>>(self.id(), big_r);
        self.local_storage
            .store::<storage::Nonce<C>>(self.id(), NonceSecret { r });

        self.broadcast_for_other_participants(
            MessageType::EddsaSign(EddsaSignMessageType::R1Commit),
            commit,
        )
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_one_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::Commit>(message.from())?;
        message.check_broadcast(MessageType::EddsaSign(EddsaSignMessageType::R1Commit))?;
        info!("Handling round one EdDSA sign message.");

        let commit: Commitment = deserialize!(&message.unverified_bytes)?;
        self.local_storage
            .store_once::<storage::Commit>(message.from(), commit)?;

        if !self
            .local_storage
            .contains_for_all_ids::<storage::Commit>(&self.all_participants())
        {
            return Ok(ProcessOutcome::Incomplete);
        }

        let round_two_messages = run_only_once!(self.gen_round_two_msgs(rng))?;

        let outcomes = self
            .fetch_messages(MessageType::EddsaSign(EddsaSignMessageType::R2Decommit))?
            .iter()
            .map(|msg| self.handle_round_two_msg(msg))
            .collect::<Result<Vec<_>>>()?;

        ProcessOutcome::collect_with_messages(outcomes, round_two_messages)
    }

    /// Open the nonce commitment with a proof of knowledge of the nonce.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_two_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round two EdDSA sign messages.");

        let decommit = self
            .local_storage
            .retrieve::<storage::OwnDecommit<C>>(self.id())?
            .clone();
        let big_r = *self.local_storage.retrieve::<storage::BigR<C>>(self.id())?;
        let r = self
            .local_storage
            .retrieve::<storage::Nonce<C>>(self.id())?
            .r;

        let context = self.retrieve_context();
        let proof = PiSchProof::<C>::prove(
            pisch::CommonInput::new(&big_r),
            pisch::ProverSecret::new(&r),
            &context,
            &mut nonce_transcript(self.id())?,
            rng,
        )?;

        self.broadcast_for_other_participants(
            MessageType::EddsaSign(EddsaSignMessageType::R2Decommit),
            DecommitPayload { decommit, proof },
        )
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_two_msg(
        &mut self,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::BigR<C>>(message.from())?;

        if !self
            .local_storage
            .contains_for_all_ids::<storage::Commit>(&self.all_participants())
        {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        message.check_broadcast(MessageType::EddsaSign(EddsaSignMessageType::R2Decommit))?;
        info!("Handling round two EdDSA sign message.");

        let payload: DecommitPayload<C> = deserialize!(&message.unverified_bytes)?;
        let commit = self
            .local_storage
            .retrieve::<storage::Commit>(message.from())?;
        payload.decommit.verify_against(
            message.id(),
            message.from(),
            commit,
        )?;
        if payload.decommit.points.len() != 1 {
            error!("{} opened the wrong number of nonce points", message.from());
            Err(ProtocolFault::ShareInconsistent(vec![message.from()]))?;
        }
        let big_r = payload.decommit.points[0];

        let context = self.retrieve_context();
        payload
            .proof
            .verify(
                pisch::CommonInput::new(&big_r),
                &context,
                &mut nonce_transcript(message.from())?,
            )
            .map_err(|_| ProtocolFault::SchnorrProofInvalid(vec![message.from()]))?;

        self.local_storage
            .store_once::<storage::BigR<C>>(message.from(), big_r)?;

        self.maybe_finish_round_two()
    }

    fn maybe_finish_round_two(
        &mut self,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        if !self
            .local_storage
            .contains_for_all_ids::<storage::BigR<C>>(&self.all_participants())
        {
            return Ok(ProcessOutcome::Incomplete);
        }

        let round_three_messages = run_only_once!(self.gen_round_three_msgs())?;

        let outcomes = self
            .fetch_messages(MessageType::EddsaSign(EddsaSignMessageType::R3SigShare))?
            .iter()
            .map(|msg| self.handle_round_three_msg(msg))
            .collect::<Result<Vec<_>>>()?;

        ProcessOutcome::collect_with_messages(outcomes, round_three_messages)
    }

    /// Fix the aggregate `R` and reveal this signer's partial signature.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_three_msgs(&mut self) -> Result<Vec<Message>> {
        info!("Generating round three EdDSA sign messages.");

        let mut aggregate_r = C::identity();
        for pid in self.all_participants() {
            aggregate_r = aggregate_r + *self.local_storage.retrieve::<storage::BigR<C>>(pid)?;
        }
        self.local_storage
            .store::<storage::AggregateR<C>>(self.id(), aggregate_r);

        let public_key = self.input.key_share().public_key_point();
        let challenge =
            C::schnorr_challenge(&aggregate_r, &public_key, self.input.message());

        let quorum = self.all_participants();
        let lambda = self
            .input
            .key_share()
            .lagrange_coefficient(self.id(), &quorum)?;
        let x = self.input.key_share().private_key_share().as_scalar();
        let r = self
            .local_storage
            .retrieve::<storage::Nonce<C>>(self.id())?
            .r;

        // s_i = r_i + c·λ_i·x_i
        let share = r.add(&challenge.mul(&lambda.mul(x)));
        self.local_storage
            .store::<storage::SigShare<C>>(self.id(), share);

        self.broadcast_for_other_participants(
            MessageType::EddsaSign(EddsaSignMessageType::R3SigShare),
            share,
        )
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_three_msg(
        &mut self,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::SigShare<C>>(message.from())?;
        message.check_broadcast(MessageType::EddsaSign(EddsaSignMessageType::R3SigShare))?;

        if !self
            .local_storage
            .contains::<storage::AggregateR<C>>(self.id())
        {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        info!("Handling round three EdDSA sign message.");

        let share: C::Scalar = deserialize!(&message.unverified_bytes)?;
        self.local_storage
            .store_once::<storage::SigShare<C>>(message.from(), share)?;

        if !self
            .local_storage
            .contains_for_all_ids::<storage::SigShare<C>>(&self.all_participants())
        {
            return Ok(ProcessOutcome::Incomplete);
        }

        self.compute_output()
    }

    /// Aggregate the partial signatures and verify the signature before
    /// releasing it.
    fn compute_output(&mut self) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let mut s = C::Scalar::zero();
        for pid in self.all_participants() {
            s = s.add(self.local_storage.retrieve::<storage::SigShare<C>>(pid)?);
        }
        let big_r = self
            .local_storage
            .remove::<storage::AggregateR<C>>(self.id())?;

        let public_key = self.input.key_share().public_key_point();
        C::verify_schnorr(&big_r, &s, &public_key, self.input.message()).map_err(|_| {
            error!("assembled signature failed verification; not releasing it");
            ProtocolFault::SignatureVerifyFail
        })?;

        // Drop the nonce now rather than at participant drop.
        let _ = self.local_storage.remove::<storage::Nonce<C>>(self.id())?;

        let output = EddsaSignature { big_r, s };
        self.status = Status::TerminatedSuccessfully;
        Ok(ProcessOutcome::Terminated(output))
    }
}

/// The transcript for a signer's proof of knowledge of its nonce.
fn nonce_transcript(sender: ParticipantIdentifier) -> Result<Transcript> {
    let mut transcript = Transcript::new(b"eddsa sign nonce");
    transcript.append_message(b"sender", &serialize!(&sender)?);
    Ok(transcript)
}
