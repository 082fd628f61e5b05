// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    curve::CurveTrait,
    errors::{CallerError, Result},
    keygen::{self, PreParams},
    protocol::{ParticipantConfig, ParticipantIdentifier},
};
use std::collections::HashSet;
use tracing::error;

/// Input for the resharing protocol.
///
/// Resharing transfers a shared key from an *old committee* to a *new
/// committee* with a new threshold, without reconstructing the secret. The
/// two committees may overlap; a protocol run includes every member of
/// either. Old members contribute their existing key material; new members
/// contribute fresh Paillier and ring-Pedersen material.
#[derive(Debug)]
pub struct Input<C: CurveTrait> {
    new_threshold: usize,
    old_committee: Vec<ParticipantIdentifier>,
    new_committee: Vec<ParticipantIdentifier>,
    key_share: Option<keygen::Output<C>>,
    pre_params: Option<PreParams>,
}

impl<C: CurveTrait> Input<C> {
    /// Construct a resharing input.
    ///
    /// `key_share` must be provided iff this party belongs to the old
    /// committee; `pre_params` must be provided iff it belongs to the new
    /// committee.
    pub fn new(
        new_threshold: usize,
        old_committee: Vec<ParticipantIdentifier>,
        new_committee: Vec<ParticipantIdentifier>,
        key_share: Option<keygen::Output<C>>,
        pre_params: Option<PreParams>,
    ) -> Self {
        Self {
            new_threshold,
            old_committee,
            new_committee,
            key_share,
            pre_params,
        }
    }

    pub(crate) fn new_threshold(&self) -> usize {
        self.new_threshold
    }

    pub(crate) fn old_committee(&self) -> &[ParticipantIdentifier] {
        &self.old_committee
    }

    pub(crate) fn new_committee(&self) -> &[ParticipantIdentifier] {
        &self.new_committee
    }

    pub(crate) fn is_old(&self, pid: ParticipantIdentifier) -> bool {
        self.old_committee.contains(&pid)
    }

    pub(crate) fn is_new(&self, pid: ParticipantIdentifier) -> bool {
        self.new_committee.contains(&pid)
    }

    pub(crate) fn key_share(&self) -> Result<&keygen::Output<C>> {
        self.key_share.as_ref().ok_or_else(|| {
            error!("an old-committee member requires its key share");
            CallerError::BadInput.into()
        })
    }

    pub(crate) fn pre_params(&self) -> Result<&PreParams> {
        self.pre_params.as_ref().ok_or_else(|| {
            error!("a new-committee member requires pre-parameters");
            CallerError::BadInput.into()
        })
    }

    pub(crate) fn check_participant_config(&self, config: &ParticipantConfig) -> Result<()> {
        if self.new_threshold >= self.new_committee.len() {
            error!(
                "new threshold {} requires more than {} new-committee members",
                self.new_threshold,
                self.new_committee.len()
            );
            Err(CallerError::BadInput)?;
        }

        // The run includes exactly the union of the two committees.
        let union = self
            .old_committee
            .iter()
            .chain(self.new_committee.iter())
            .copied()
            .collect::<HashSet<_>>();
        let participants = config
            .all_participants()
            .into_iter()
            .collect::<HashSet<_>>();
        if union != participants {
            error!("the participant set must be the union of the old and new committees");
            Err(CallerError::BadInput)?;
        }

        let id = config.id();
        if self.is_old(id) {
            let key_share = self.key_share()?;
            let shareholders = key_share.participants();
            for pid in &self.old_committee {
                if !shareholders.contains(pid) {
                    error!("{pid} is not a shareholder of the key being reshared");
                    Err(CallerError::BadInput)?;
                }
            }
            if self.old_committee.len() < key_share.threshold() + 1 {
                error!(
                    "resharing requires at least {} old-committee members",
                    key_share.threshold() + 1
                );
                Err(CallerError::BadInput)?;
            }
        } else if self.key_share.is_some() {
            error!("only old-committee members provide a key share");
            Err(CallerError::BadInput)?;
        }

        if self.is_new(id) {
            let _ = self.pre_params()?;
        } else if self.pre_params.is_some() {
            error!("only new-committee members provide pre-parameters");
            Err(CallerError::BadInput)?;
        }

        if !self.is_old(id) && !self.is_new(id) {
            error!("this party is in neither committee");
            Err(CallerError::BadInput)?;
        }
        Ok(())
    }
}
