//! Annotation reconciliation engine.
//!
//! A vote is classified against the user's ledger entry for the same
//! (phrase, language) pair:
//!
//! - no prior entry: every provider is counted once and the phrase's
//!   annotation count goes up ([`VoteOutcome::Created`])
//! - identical judgements: nothing changes ([`VoteOutcome::Unchanged`])
//! - some judgements differ: each flipped provider moves one vote from the
//!   bucket it was counted in to the other ([`VoteOutcome::Updated`])
//!
//! Classification and counter arithmetic are pure; stores run them inside
//! their per-(phrase, language) serialization unit so the plan is always
//! computed against the state it is applied to.

use crate::error::AppError;
use crate::i18n::Language;
use crate::model::{Judgements, LanguageRecords, ProviderRecord, ProviderSet, UserIdentity};
use crate::monitor::{EventSink, VoteSummary};
use crate::store::PhraseStore;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Result of a reconciled vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteOutcome {
    Created,
    Unchanged,
    Updated,
}

/// How a single provider's judgement moves between two votes by one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    TrueToFalse,
    FalseToTrue,
}

impl Transition {
    pub fn between(prior: bool, next: bool) -> Self {
        match (prior, next) {
            (true, false) => Transition::TrueToFalse,
            (false, true) => Transition::FalseToTrue,
            _ => Transition::Unchanged,
        }
    }

    pub fn delta(self) -> CounterDelta {
        match self {
            Transition::Unchanged => CounterDelta::ZERO,
            Transition::TrueToFalse => CounterDelta {
                correct: -1,
                incorrect: 1,
            },
            Transition::FalseToTrue => CounterDelta {
                correct: 1,
                incorrect: -1,
            },
        }
    }
}

/// Signed change to one provider's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterDelta {
    pub correct: i64,
    pub incorrect: i64,
}

impl CounterDelta {
    pub const ZERO: CounterDelta = CounterDelta {
        correct: 0,
        incorrect: 0,
    };

    /// A user's first judgement lands in exactly one bucket.
    pub fn first(judgement: bool) -> Self {
        if judgement {
            CounterDelta {
                correct: 1,
                incorrect: 0,
            }
        } else {
            CounterDelta {
                correct: 0,
                incorrect: 1,
            }
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Apply to a record, refusing to drive either counter below zero.
    pub fn apply_to(&self, record: &mut ProviderRecord) -> Result<(), CounterUnderflow> {
        let correct = record
            .correct
            .checked_add_signed(self.correct)
            .ok_or(CounterUnderflow)?;
        let incorrect = record
            .incorrect
            .checked_add_signed(self.incorrect)
            .ok_or(CounterUnderflow)?;
        record.correct = correct;
        record.incorrect = incorrect;
        Ok(())
    }
}

/// A delta would have made a counter negative, meaning the ledger and the
/// counters disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("vote counter would become negative")]
pub struct CounterUnderflow;

/// What a vote does to the counters, decided from the prior ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotePlan {
    Create(Judgements),
    Unchanged,
    Update(ProviderSet<Transition>),
}

impl VotePlan {
    pub fn outcome(&self) -> VoteOutcome {
        match self {
            VotePlan::Create(_) => VoteOutcome::Created,
            VotePlan::Unchanged => VoteOutcome::Unchanged,
            VotePlan::Update(_) => VoteOutcome::Updated,
        }
    }

    pub fn deltas(&self) -> ProviderSet<CounterDelta> {
        match self {
            VotePlan::Create(judgements) => {
                judgements.map(|_, judgement| CounterDelta::first(*judgement))
            }
            VotePlan::Unchanged => ProviderSet::from_fn(|_| CounterDelta::ZERO),
            VotePlan::Update(transitions) => transitions.map(|_, transition| transition.delta()),
        }
    }

    /// Increment to the phrase's annotation count.
    pub fn annotation_increment(&self) -> u64 {
        match self {
            VotePlan::Create(_) => 1,
            _ => 0,
        }
    }

    /// Whether the ledger entry must be written.
    pub fn writes_ledger(&self) -> bool {
        !matches!(self, VotePlan::Unchanged)
    }

    /// Compute the counters after this vote without touching `records`.
    ///
    /// Either every provider's delta applies or the error is returned and
    /// nothing is committed.
    pub fn applied(&self, records: &LanguageRecords) -> Result<LanguageRecords, CounterUnderflow> {
        let mut updated = records.clone();
        for (provider, delta) in self.deltas().iter() {
            delta.apply_to(updated.get_mut(provider))?;
        }
        Ok(updated)
    }
}

/// Classify a vote against the user's prior judgements.
pub fn plan_vote(prior: Option<&Judgements>, next: &Judgements) -> VotePlan {
    match prior {
        None => VotePlan::Create(*next),
        Some(prior) if prior == next => VotePlan::Unchanged,
        Some(prior) => VotePlan::Update(
            prior.map(|provider, before| Transition::between(*before, *next.get(provider))),
        ),
    }
}

/// What the store reports back after reconciling a vote.
#[derive(Debug, Clone)]
pub struct VoteReceipt {
    pub outcome: VoteOutcome,
    pub phrase: String,
    /// Counters for the (phrase, language) pair after the vote
    pub records: LanguageRecords,
}

/// Entry point for vote submission.
///
/// Validation has already happened at the edge: `language` is a supported
/// language and all three judgements are present. Persistence of the
/// reconciliation is delegated to the store, which applies it atomically;
/// the monitoring sink is notified afterwards on a best-effort basis.
#[derive(Clone)]
pub struct AnnotationEngine {
    store: Arc<dyn PhraseStore>,
    sink: Arc<dyn EventSink>,
}

impl AnnotationEngine {
    pub fn new(store: Arc<dyn PhraseStore>, sink: Arc<dyn EventSink>) -> Self {
        Self { store, sink }
    }

    pub async fn submit_vote(
        &self,
        user: &UserIdentity,
        identity: &str,
        language: Language,
        judgements: Judgements,
    ) -> Result<VoteOutcome, AppError> {
        let receipt = self
            .store
            .reconcile_vote(&user.username, identity, language, &judgements)
            .await?;

        match receipt.outcome {
            VoteOutcome::Unchanged => {
                debug!(
                    "{} resubmitted an identical vote for {} ({})",
                    user.username, identity, language
                );
            }
            outcome => {
                info!(
                    "Vote {:?} by {} for {} ({})",
                    outcome, user.username, identity, language
                );
                let summary = VoteSummary::new(user, identity, language, &receipt, &judgements);
                if let Err(e) = self.sink.publish(&summary) {
                    warn!("Failed to publish vote summary: {}", e);
                }
            }
        }

        Ok(receipt.outcome)
    }
}
