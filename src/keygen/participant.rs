//! Types and functions related to the key generation sub-protocol.
//!
//! Produces a `(t, n)`-threshold key: an aggregate public key whose private
//! key is Shamir-shared among the `n` parties, alongside the Paillier and
//! ring-Pedersen material the signing protocol needs.
//!
//! # High-level protocol description
//! The key generation protocol runs in three message rounds:
//! - In round 1 each participant deals a fresh Feldman sharing of a random
//!   contribution and broadcasts a commitment to its coefficient
//!   commitments, together with its Paillier public key and ring-Pedersen
//!   parameters and proofs of their well-formedness.
//! - Once all round 1 broadcasts are in, each participant opens its
//!   commitment to everyone and sends each peer its sub-share, encrypted to
//!   that peer's Paillier key.
//! - Each participant checks every sub-share it received against the
//!   dealers' opened coefficient commitments, aggregates its final share,
//!   and broadcasts a Schnorr proof of knowledge of it. Once all proofs
//!   verify, the participant outputs its share of the joint key.

// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    commitment::Commitment,
    curve::{CurveTrait, ScalarTrait},
    errors::{InternalError, ProtocolFault, Result},
    keygen::{
        commit::KeygenDecommit,
        input::Input,
        keyshare::{AuxInfoPublic, EncryptedVssShare, KeySharePrivate, KeySharePublic},
        output::Output,
    },
    local_storage::{LocalStorage, TypeTag},
    messages::{KeygenMessageType, Message, MessageType},
    participant::{InnerProtocolParticipant, ProcessOutcome, ProtocolParticipant, Status},
    paillier::EncryptionKey,
    protocol::{Identifier, ParticipantConfig, ParticipantIdentifier, ProtocolType, SharedContext},
    ring_pedersen::RingPedersen,
    vss,
    vss::VssShare,
    zkp::{
        piprm::{self, PiPrmProof},
        pisch::{self, PiSchProof},
        Proof,
    },
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

mod storage {
    use super::*;

    pub(super) struct Commit;
    impl TypeTag for Commit {
        type Value = Commitment;
    }
    pub(super) struct AuxInfo;
    impl TypeTag for AuxInfo {
        type Value = AuxInfoPublic;
    }
    pub(super) struct Decommit<C: CurveTrait> {
        _c: std::marker::PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for Decommit<C> {
        type Value = KeygenDecommit<C>;
    }
    pub(super) struct SharesForOthers<C: CurveTrait> {
        _c: std::marker::PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for SharesForOthers<C> {
        type Value = Vec<(ParticipantIdentifier, VssShare<C>)>;
    }
    pub(super) struct PrivateShare<C: CurveTrait> {
        _c: std::marker::PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for PrivateShare<C> {
        type Value = VssShare<C>;
    }
    pub(super) struct FinalShare;
    impl TypeTag for FinalShare {
        type Value = KeySharePrivate;
    }
    pub(super) struct ProofOk;
    impl TypeTag for ProofOk {
        type Value = ();
    }
}

/// The round 1 broadcast: a commitment to the dealer's Feldman coefficient
/// commitments, plus the auxiliary encryption parameters and their proofs.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeygenRoundOnePayload {
    commit: Commitment,
    paillier_pk: EncryptionKey,
    ring_pedersen: RingPedersen,
    /// Proof that `h2` lies in the subgroup generated by `h1`.
    dln_proof_forward: PiPrmProof,
    /// Proof that `h1` lies in the subgroup generated by `h2`.
    dln_proof_reverse: PiPrmProof,
}

/// A [`ProtocolParticipant`] that runs the key generation protocol.
///
/// # Protocol input
/// The threshold and pre-generated Paillier/ring-Pedersen material; see
/// [`Input`].
///
/// # Protocol output
/// Upon successful completion, the participant outputs an [`Output`]: its
/// secret Shamir share, everyone's public shares and auxiliary material, and
/// the joint public key.
///
/// # 🔒 Storage requirements
/// The output contains secret key material and must be stored securely by
/// the calling application.
#[derive(Debug)]
pub struct KeygenParticipant<C: CurveTrait> {
    /// The current session identifier.
    sid: Identifier,
    /// The current protocol input.
    input: Input,
    /// A unique identifier for this participant.
    id: ParticipantIdentifier,
    /// A list of all other participant identifiers participating in the
    /// protocol.
    other_participant_ids: Vec<ParticipantIdentifier>,
    /// Local storage for this participant to store secrets.
    local_storage: LocalStorage,
    /// Status of the protocol execution.
    status: Status,
    _curve: std::marker::PhantomData<C>,
}

impl<C: CurveTrait> ProtocolParticipant for KeygenParticipant<C> {
    type Input = Input;
    type Output = Output<C>;

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
            _curve: std::marker::PhantomData,
        })
    }

    fn ready_type() -> MessageType {
        MessageType::Keygen(KeygenMessageType::Ready)
    }

    fn protocol_type() -> ProtocolType {
        ProtocolType::Keygen
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
            "KEYGEN: player {}: received {:?} from {}",
            self.id(),
            message.message_type(),
            message.from()
        );

        if !self.check_can_process(message)? {
            return Ok(ProcessOutcome::Incomplete);
        }

        match message.message_type() {
            MessageType::Keygen(KeygenMessageType::Ready) => self.handle_ready_msg(rng, message),
            MessageType::Keygen(KeygenMessageType::R1Commit) => {
                self.handle_round_one_msg(rng, message)
            }
            MessageType::Keygen(KeygenMessageType::R2Decommit) => {
                self.handle_round_two_msg(rng, message)
            }
            MessageType::Keygen(KeygenMessageType::R2PrivateShare) => {
                self.handle_round_two_msg_private(rng, message)
            }
            MessageType::Keygen(KeygenMessageType::R3Proof) => self.handle_round_three_msg(message),
            message_type => {
                error!("incorrect message type given to KeygenParticipant: {message_type:?}");
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

impl<C: CurveTrait> InnerProtocolParticipant for KeygenParticipant<C> {
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

impl<C: CurveTrait> KeygenParticipant<C> {
    /// Handle "Ready" messages from the protocol participants.
    ///
    /// Once all participants have signalled readiness, this participant
    /// generates its round one messages.
    #[instrument(skip_all, err(Debug))]
    fn handle_ready_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        info!("Handling ready keygen message.");

        let ready_outcome = self.process_ready_message(rng, message)?;
        if !self.is_ready() {
            return Ok(ready_outcome);
        }
        let round_one_messages = run_only_once!(self.gen_round_one_msgs(rng))?;

        // Process any round 1 messages that arrived before we were ready.
        let round_one_outcomes = self
            .fetch_messages(MessageType::Keygen(KeygenMessageType::R1Commit))?
            .iter()
            .map(|msg| self.handle_round_one_msg(rng, msg))
            .collect::<Result<Vec<_>>>()?;

        ready_outcome
            .with_messages(round_one_messages)
            .consolidate(round_one_outcomes)
    }

    /// Generate the protocol's round one messages.
    ///
    /// The outcome is a broadcast with (1) a commitment to this dealer's
    /// Feldman coefficient commitments and (2) the dealer's Paillier and
    /// ring-Pedersen parameters with well-formedness proofs.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_one_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round one keygen messages.");

        let config = self.config()?;
        let coordinates = self
            .all_participants()
            .iter()
            .map(|&pid| config.share_coordinate(pid))
            .collect::<Result<Vec<_>>>()?;

        // Deal a fresh random contribution.
        let contribution = C::Scalar::random(rng);
        let (vss_commitments, shares) =
            vss::share::<C, _>(rng, self.input.threshold(), &contribution, &coordinates)?;

        let mut shares_for_others = Vec::new();
        for (pid, share) in self.all_participants().into_iter().zip(shares) {
            if pid == self.id() {
                self.local_storage
                    .store::<storage::PrivateShare<C>>(pid, share);
            } else {
                shares_for_others.push((pid, share));
            }
        }
        self.local_storage
            .store::<storage::SharesForOthers<C>>(self.id(), shares_for_others);

        let decommit = KeygenDecommit::new(rng, &self.sid(), &self.id(), &vss_commitments);
        let commit = decommit.commit()?;
        self.local_storage
            .store::<storage::Commit>(self.id(), commit);
        self.local_storage
            .store::<storage::Decommit<C>>(self.id(), decommit);
        let commit_for_payload = commit;

        // Attach the auxiliary parameters and their proofs.
        let pre_params = self.input.pre_params();
        let params = pre_params.ring_pedersen.clone();
        let witness = &pre_params.ring_pedersen_witness;
        let context = self.retrieve_context();

        let dln_proof_forward = PiPrmProof::prove(
            piprm::CommonInput::new(params.modulus(), params.h1(), params.h2()),
            piprm::ProverSecret::new(witness.alpha(), witness.phi()),
            &context,
            &mut dln_transcript(self.id())?,
            rng,
        )?;
        let dln_proof_reverse = PiPrmProof::prove(
            piprm::CommonInput::new(params.modulus(), params.h2(), params.h1()),
            piprm::ProverSecret::new(witness.beta(), witness.phi()),
            &context,
            &mut dln_transcript(self.id())?,
            rng,
        )?;

        let paillier_pk = pre_params.paillier_dk.encryption_key();
        let own_aux = AuxInfoPublic::new(self.id(), paillier_pk.clone(), params.clone());
        self.local_storage
            .store::<storage::AuxInfo>(self.id(), own_aux);

        let payload = KeygenRoundOnePayload {
            commit: commit_for_payload,
            paillier_pk,
            ring_pedersen: params,
            dln_proof_forward,
            dln_proof_reverse,
        };
        self.broadcast_for_other_participants(
            MessageType::Keygen(KeygenMessageType::R1Commit),
            payload,
        )
    }

    /// Handle round one messages from the protocol participants.
    ///
    /// Validates the sender's auxiliary parameters and stores its
    /// commitment. Once all round 1 broadcasts are in, the participant sends
    /// its decommitment and the encrypted sub-shares.
    #[instrument(skip_all, err(Debug))]
    fn handle_round_one_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::Commit>(message.from())?;
        message.check_broadcast(MessageType::Keygen(KeygenMessageType::R1Commit))?;
        info!("Handling round one keygen message.");

        let payload: KeygenRoundOnePayload = deserialize!(&message.unverified_bytes)?;
        let aux = AuxInfoPublic::new(
            message.from(),
            payload.paillier_pk,
            payload.ring_pedersen,
        );
        self.validate_aux_info(&aux)?;

        let context = self.retrieve_context();
        let params = aux.ring_pedersen();
        payload
            .dln_proof_forward
            .verify(
                piprm::CommonInput::new(params.modulus(), params.h1(), params.h2()),
                &context,
                &mut dln_transcript(message.from())?,
            )
            .map_err(|_| ProtocolFault::DlnProofInvalid(vec![message.from()]))?;
        payload
            .dln_proof_reverse
            .verify(
                piprm::CommonInput::new(params.modulus(), params.h2(), params.h1()),
                &context,
                &mut dln_transcript(message.from())?,
            )
            .map_err(|_| ProtocolFault::DlnProofInvalid(vec![message.from()]))?;

        self.local_storage
            .store_once::<storage::Commit>(message.from(), payload.commit)?;
        self.local_storage
            .store::<storage::AuxInfo>(message.from(), aux);

        // Check if we've received all the commitments, which ends round one.
        let r1_done = self
            .local_storage
            .contains_for_all_ids::<storage::Commit>(&self.all_participants());
        if !r1_done {
            return Ok(ProcessOutcome::Incomplete);
        }

        let round_two_messages = run_only_once!(self.gen_round_two_msgs(rng))?;

        // Process any round 2 messages that arrived early.
        let mut outcomes = self
            .fetch_messages(MessageType::Keygen(KeygenMessageType::R2PrivateShare))?
            .iter()
            .map(|msg| self.handle_round_two_msg_private(rng, msg))
            .collect::<Result<Vec<_>>>()?;
        let decommit_outcomes = self
            .fetch_messages(MessageType::Keygen(KeygenMessageType::R2Decommit))?
            .iter()
            .map(|msg| self.handle_round_two_msg(rng, msg))
            .collect::<Result<Vec<_>>>()?;
        outcomes.extend(decommit_outcomes);

        ProcessOutcome::collect_with_messages(outcomes, round_two_messages)
    }

    /// Generate the protocol's round two messages: the opening of the round
    /// one commitment (broadcast) and one encrypted sub-share per peer
    /// (point-to-point).
    #[instrument(skip_all, err(Debug))]
    fn gen_round_two_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round two keygen messages.");

        let decommit = self
            .local_storage
            .retrieve::<storage::Decommit<C>>(self.id())?
            .clone();
        let mut messages = self.broadcast_for_other_participants(
            MessageType::Keygen(KeygenMessageType::R2Decommit),
            decommit,
        )?;

        let shares = self
            .local_storage
            .retrieve::<storage::SharesForOthers<C>>(self.id())?
            .clone();
        for (pid, share) in shares {
            let aux = self.local_storage.retrieve::<storage::AuxInfo>(pid)?;
            let encrypted = EncryptedVssShare::encrypt(&share, aux.pk(), rng)?;
            messages.push(Message::new(
                MessageType::Keygen(KeygenMessageType::R2PrivateShare),
                self.sid(),
                self.id(),
                pid,
                &encrypted,
            )?);
        }
        Ok(messages)
    }

    /// Handle a round two private message: decrypt and store the sub-share
    /// sent to us.
    #[instrument(skip_all, err(Debug))]
    fn handle_round_two_msg_private<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::PrivateShare<C>>(message.from())?;
        message.check_peer_to_peer(MessageType::Keygen(KeygenMessageType::R2PrivateShare))?;
        info!("Handling round two keygen private message.");

        let encrypted: EncryptedVssShare = deserialize!(&message.unverified_bytes)?;
        let my_coordinate = self.config()?.share_coordinate(self.id())?;
        let share = encrypted.decrypt::<C>(
            &self.input.pre_params().paillier_dk,
            my_coordinate,
            message.from(),
        )?;
        self.local_storage
            .store_once::<storage::PrivateShare<C>>(message.from(), share)?;

        self.maybe_finish_round_two(rng)
    }

    /// Handle a round two decommitment message.
    #[instrument(skip_all, err(Debug))]
    fn handle_round_two_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::Decommit<C>>(message.from())?;
        info!("Handling round two keygen message.");

        // We must receive all commitments in round 1 before we start
        // processing decommitments in round 2.
        let r1_done = self
            .local_storage
            .contains_for_all_ids::<storage::Commit>(&self.all_participants());
        if !r1_done {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }

        let commit = self
            .local_storage
            .retrieve::<storage::Commit>(message.from())?;
        let decommit = KeygenDecommit::from_message(message, commit)?;
        if decommit.vss_commitments.len() != self.input.threshold() + 1 {
            error!(
                "dealer {} opened a polynomial of the wrong degree",
                message.from()
            );
            Err(ProtocolFault::ShareInconsistent(vec![message.from()]))?;
        }
        self.local_storage
            .store_once::<storage::Decommit<C>>(message.from(), decommit)?;

        self.maybe_finish_round_two(rng)
    }

    /// Complete round two if every decommitment and every sub-share has
    /// arrived: verify the shares against the dealers' polynomials and move
    /// on to round three.
    fn maybe_finish_round_two<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let all_decommits = self
            .local_storage
            .contains_for_all_ids::<storage::Decommit<C>>(&self.all_participants());
        let all_shares = self
            .local_storage
            .contains_for_all_ids::<storage::PrivateShare<C>>(&self.all_participants());
        if !(all_decommits && all_shares) {
            return Ok(ProcessOutcome::Incomplete);
        }

        // Each dealer's sub-share must match its public polynomial.
        for pid in self.other_ids().to_vec() {
            let decommit = self.local_storage.retrieve::<storage::Decommit<C>>(pid)?;
            let share = self
                .local_storage
                .retrieve::<storage::PrivateShare<C>>(pid)?;
            if !vss::verify_share(&decommit.vss_commitments, share) {
                error!("sub-share from {pid} does not match its public commitments");
                Err(ProtocolFault::ShareInconsistent(vec![pid]))?;
            }
        }

        let round_three_messages = run_only_once!(self.gen_round_three_msgs(rng))?;

        let outcomes = self
            .fetch_messages(MessageType::Keygen(KeygenMessageType::R3Proof))?
            .iter()
            .map(|msg| self.handle_round_three_msg(msg))
            .collect::<Result<Vec<_>>>()?;

        ProcessOutcome::collect_with_messages(outcomes, round_three_messages)
    }

    /// Generate the protocol's round three messages: aggregate the final
    /// share and prove knowledge of it via Schnorr.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_three_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round three keygen messages.");

        let mut final_share = C::Scalar::zero();
        for pid in self.all_participants() {
            let share = self
                .local_storage
                .retrieve::<storage::PrivateShare<C>>(pid)?;
            final_share = final_share.add(&share.value);
        }

        // The aggregated share must match the aggregated public polynomials.
        let my_coordinate = self.config()?.share_coordinate(self.id())?;
        let implied_public = self.eval_public_share(my_coordinate)?;
        if C::generator().multiply_by_scalar(&final_share) != implied_public {
            error!("aggregated share does not match the dealers' polynomials");
            return Err(InternalError::InternalInvariantFailed);
        }

        let context = self.retrieve_context();
        let proof = PiSchProof::<C>::prove(
            pisch::CommonInput::new(&implied_public),
            pisch::ProverSecret::new(&final_share),
            &context,
            &mut schnorr_transcript(self.id())?,
            rng,
        )?;

        self.local_storage.store::<storage::FinalShare>(
            self.id(),
            KeySharePrivate::from_bigint(&C::scalar_to_bn(&final_share)),
        );
        self.local_storage
            .store::<storage::ProofOk>(self.id(), ());

        self.broadcast_for_other_participants(
            MessageType::Keygen(KeygenMessageType::R3Proof),
            proof,
        )
    }

    /// Handle a round three message: verify a peer's Schnorr proof of its
    /// aggregated share.
    #[instrument(skip_all, err(Debug))]
    fn handle_round_three_msg(
        &mut self,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::ProofOk>(message.from())?;

        if !self
            .local_storage
            .contains::<storage::FinalShare>(self.id())
        {
            info!("Not yet ready to handle a round three keygen message.");
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        message.check_broadcast(MessageType::Keygen(KeygenMessageType::R3Proof))?;
        info!("Handling round three keygen message.");

        let proof: PiSchProof<C> = deserialize!(&message.unverified_bytes)?;
        let their_coordinate = self.config()?.share_coordinate(message.from())?;
        let their_public = self.eval_public_share(their_coordinate)?;
        let context = self.retrieve_context();
        proof
            .verify(
                pisch::CommonInput::new(&their_public),
                &context,
                &mut schnorr_transcript(message.from())?,
            )
            .map_err(|_| ProtocolFault::SchnorrProofInvalid(vec![message.from()]))?;

        self.local_storage
            .store_once::<storage::ProofOk>(message.from(), ())?;

        self.maybe_finish_protocol()
    }

    fn maybe_finish_protocol(
        &mut self,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        if !self
            .local_storage
            .contains_for_all_ids::<storage::ProofOk>(&self.all_participants())
        {
            return Ok(ProcessOutcome::Incomplete);
        }

        let config = self.config()?;
        let mut public_key_shares = Vec::new();
        for pid in self.all_participants() {
            let coordinate = config.share_coordinate(pid)?;
            let public_share = self.eval_public_share(coordinate)?;
            public_key_shares.push(KeySharePublic::new(pid, public_share));
        }

        // Every dealer's constant term contributes to the joint key.
        let mut public_key = C::identity();
        let mut vss_commitments = Vec::new();
        for pid in self.all_participants() {
            let decommit = self.local_storage.remove::<storage::Decommit<C>>(pid)?;
            public_key = public_key + decommit.vss_commitments[0];
            vss_commitments.push((pid, decommit.vss_commitments));
        }

        let mut aux_info = Vec::new();
        for pid in self.all_participants() {
            aux_info.push(self.local_storage.remove::<storage::AuxInfo>(pid)?);
        }

        let private_key_share = self
            .local_storage
            .remove::<storage::FinalShare>(self.id())?;

        let output = Output::from_parts(
            self.input.threshold(),
            public_key,
            private_key_share,
            public_key_shares,
            vss_commitments,
            aux_info,
            self.input.pre_params().clone().into_private(),
        )?;

        self.status = Status::TerminatedSuccessfully;
        Ok(ProcessOutcome::Terminated(output))
    }

    /// Evaluate the sum of all dealers' public polynomials at `coordinate`.
    fn eval_public_share(&self, coordinate: usize) -> Result<C> {
        let mut sum = C::identity();
        for pid in self.all_participants() {
            let decommit = self.local_storage.retrieve::<storage::Decommit<C>>(pid)?;
            sum = sum + vss::eval_commitment(&decommit.vss_commitments, coordinate);
        }
        Ok(sum)
    }

    /// Validate a peer's auxiliary parameters, including the cross-peer
    /// duplicate generator check.
    fn validate_aux_info(&self, aux: &AuxInfoPublic) -> Result<()> {
        let check_dupes = !self.input.ignores_h1h2_dupes();
        aux.validate(check_dupes)?;

        if !check_dupes {
            tracing::warn!(
                "skipping duplicate ring-Pedersen generator checks for {}",
                aux.participant()
            );
            return Ok(());
        }
        for pid in self.all_participants() {
            if !self.local_storage.contains::<storage::AuxInfo>(pid) {
                continue;
            }
            let other = self.local_storage.retrieve::<storage::AuxInfo>(pid)?;
            let clash = other.ring_pedersen().h1() == aux.ring_pedersen().h1()
                || other.ring_pedersen().h2() == aux.ring_pedersen().h2()
                || other.ring_pedersen().h1() == aux.ring_pedersen().h2()
                || other.ring_pedersen().h2() == aux.ring_pedersen().h1();
            if clash {
                error!(
                    "{} presented ring-Pedersen generators already used by {}",
                    aux.participant(),
                    pid
                );
                Err(ProtocolFault::PaillierParamInvalid(vec![aux.participant()]))?;
            }
        }
        Ok(())
    }

    fn config(&self) -> Result<ParticipantConfig> {
        ParticipantConfig::new(self.id(), self.other_ids())
    }
}

/// The transcript for a dealer's ring-Pedersen parameter proofs.
fn dln_transcript(sender: ParticipantIdentifier) -> Result<Transcript> {
    let mut transcript = Transcript::new(b"keygen ring-pedersen");
    transcript.append_message(b"sender", &serialize!(&sender)?);
    Ok(transcript)
}

/// The transcript for a participant's Schnorr proof of its final share.
fn schnorr_transcript(sender: ParticipantIdentifier) -> Result<Transcript> {
    let mut transcript = Transcript::new(b"keygen schnorr");
    transcript.append_message(b"sender", &serialize!(&sender)?);
    Ok(transcript)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        curve::TestCurve,
        keygen::keyshare::PreParams,
        utils::testing::init_testing,
        vss,
    };
    use itertools::Itertools;
    use rand::{CryptoRng, Rng, RngCore};
    use std::collections::HashMap;
    use tracing::debug;

    type TestKeygenParticipant = KeygenParticipant<TestCurve>;

    impl<C: CurveTrait> KeygenParticipant<C> {
        pub(crate) fn new_quorum<R: RngCore + CryptoRng>(
            sid: Identifier,
            threshold: usize,
            quorum_size: usize,
            rng: &mut R,
        ) -> Result<Vec<Self>> {
            let configs = ParticipantConfig::random_quorum(quorum_size, rng)?;
            configs
                .into_iter()
                .map(|config| {
                    let input = Input::new(threshold, PreParams::simulate(rng)?);
                    Self::new(sid, config.id(), config.other_ids().to_vec(), input)
                })
                .collect()
        }
    }

    /// Deliver all messages into their respective participant's inboxes.
    pub(crate) fn deliver_all(
        messages: &[Message],
        inboxes: &mut HashMap<ParticipantIdentifier, Vec<Message>>,
    ) {
        for message in messages {
            inboxes
                .get_mut(&message.to())
                .unwrap()
                .push(message.clone());
        }
    }

    fn is_keygen_done(quorum: &[TestKeygenParticipant]) -> bool {
        quorum
            .iter()
            .all(|participant| *participant.status() == Status::TerminatedSuccessfully)
    }

    #[allow(clippy::type_complexity)]
    fn process_messages<R: RngCore + CryptoRng>(
        quorum: &mut [TestKeygenParticipant],
        inboxes: &mut HashMap<ParticipantIdentifier, Vec<Message>>,
        rng: &mut R,
    ) -> Option<(usize, ProcessOutcome<Output<TestCurve>>)> {
        // Pick a random participant to process
        let index = rng.gen_range(0..quorum.len());
        let participant = quorum.get_mut(index).unwrap();

        let inbox = inboxes.get_mut(&participant.id()).unwrap();
        if inbox.is_empty() {
            // No messages to process for this participant, so pick another
            return None;
        }
        let message = inbox.remove(rng.gen_range(0..inbox.len()));
        debug!(
            "processing participant: {}, with message type: {:?} from {}",
            &participant.id(),
            &message.message_type(),
            &message.from(),
        );
        Some((index, participant.process_message(rng, &message).unwrap()))
    }

    /// Run a full keygen among fresh participants and return each party's
    /// output, in participant order.
    pub(crate) fn run_keygen<R: RngCore + CryptoRng>(
        sid: Identifier,
        threshold: usize,
        quorum_size: usize,
        rng: &mut R,
    ) -> Result<Vec<(ParticipantIdentifier, Output<TestCurve>)>> {
        let mut quorum =
            TestKeygenParticipant::new_quorum(sid, threshold, quorum_size, rng)?;
        let mut inboxes = HashMap::new();
        for participant in &quorum {
            let _ = inboxes.insert(participant.id(), vec![]);
        }
        let mut outputs: HashMap<ParticipantIdentifier, Output<TestCurve>> = HashMap::new();

        for participant in &quorum {
            let inbox = inboxes.get_mut(&participant.id()).unwrap();
            inbox.push(participant.initialize_message()?);
        }

        while !is_keygen_done(&quorum) {
            let (index, outcome) = match process_messages(&mut quorum, &mut inboxes, rng) {
                None => continue,
                Some(x) => x,
            };
            let id = quorum[index].id();
            match outcome {
                ProcessOutcome::Incomplete => {}
                ProcessOutcome::Processed(messages) => deliver_all(&messages, &mut inboxes),
                ProcessOutcome::Terminated(output) => {
                    assert!(outputs.insert(id, output).is_none())
                }
                ProcessOutcome::TerminatedForThisParticipant(output, messages) => {
                    deliver_all(&messages, &mut inboxes);
                    assert!(outputs.insert(id, output).is_none());
                }
            }
        }

        Ok(quorum
            .iter()
            .map(|participant| {
                let output = outputs.remove(&participant.id()).unwrap();
                (participant.id(), output)
            })
            .collect())
    }

    #[test]
    fn keygen_quorums_agree_on_one_public_key() -> Result<()> {
        for quorum_size in [2usize, 3] {
            let mut rng = init_testing();
            let sid = Identifier::random(&mut rng);
            let outputs = run_keygen(sid, quorum_size - 1, quorum_size, &mut rng)?;

            let reference = outputs[0].1.public_key_point();
            for (_, output) in &outputs {
                assert_eq!(output.public_key_point(), reference);
                assert_eq!(output.public_key_shares().len(), quorum_size);
            }
        }
        Ok(())
    }

    #[test]
    fn any_quorum_of_shares_reconstructs_the_private_key() -> Result<()> {
        let mut rng = init_testing();
        let sid = Identifier::random(&mut rng);
        let threshold = 1;
        let outputs = run_keygen(sid, threshold, 3, &mut rng)?;

        let participants = outputs[0].1.participants();
        let public_key = outputs[0].1.public_key_point();

        // Interpolate every pair of shares at zero; each must yield the
        // joint private key.
        for pair in outputs.iter().combinations(2) {
            let quorum = pair
                .iter()
                .map(|(pid, _)| crate::protocol::share_coordinate(&participants, *pid))
                .collect::<Result<Vec<_>>>()?;

            let mut secret = <TestCurve as CurveTrait>::Scalar::zero();
            for ((_, output), &coordinate) in pair.iter().zip(&quorum) {
                let lambda = vss::lagrange_coefficient_at_zero::<TestCurve>(coordinate, &quorum)?;
                let share = output.private_key_share().to_scalar::<TestCurve>()?;
                secret = secret.add(&lambda.mul(&share));
            }
            assert_eq!(
                TestCurve::generator().multiply_by_scalar(&secret),
                public_key
            );
        }
        Ok(())
    }

    #[test]
    fn bad_threshold_is_rejected() {
        let mut rng = init_testing();
        let sid = Identifier::random(&mut rng);
        // threshold == quorum size can never sign.
        assert!(TestKeygenParticipant::new_quorum(sid, 2, 2, &mut rng).is_err());
    }
}
