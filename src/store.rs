//! Persistence collaborator interfaces.
//!
//! Two implementations exist: [`crate::db::Database`] on PostgreSQL and
//! [`crate::memory::MemoryStore`] in process. Both must apply a vote's counter
//! deltas and ledger write as one unit, serialized per (phrase, language).

use crate::engine::{CounterUnderflow, VoteReceipt};
use crate::i18n::Language;
use crate::model::{Judgements, LedgerEntry, PhraseHeader, ProviderSet, SourcePhrase};
use crate::security::IssuedToken;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write
    #[error("{0}")]
    DuplicateKey(String),

    #[error("{0}")]
    NotFound(String),

    /// Stored state violates an invariant (e.g. ledger and counters disagree)
    #[error("Inconsistent state: {0}")]
    Inconsistent(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<CounterUnderflow> for StoreError {
    fn from(err: CounterUnderflow) -> Self {
        StoreError::Inconsistent(err.to_string())
    }
}

/// Whether translations were newly recorded for a language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    Attached,
    AlreadyPresent,
}

#[async_trait]
pub trait PhraseStore: Send + Sync {
    async fn find_phrase(&self, identity: &str) -> Result<Option<SourcePhrase>, StoreError>;

    /// Insert a new phrase; `DuplicateKey` if its identity already exists.
    async fn insert_phrase(&self, phrase: &SourcePhrase) -> Result<(), StoreError>;

    /// Record zeroed counters and translations for a language unless present.
    ///
    /// `NotFound` if the phrase does not exist.
    async fn attach_language(
        &self,
        identity: &str,
        language: Language,
        texts: &ProviderSet<String>,
    ) -> Result<Attachment, StoreError>;

    /// Classify and apply a vote atomically.
    ///
    /// `NotFound` if the phrase has no translations for `language`.
    async fn reconcile_vote(
        &self,
        username: &str,
        identity: &str,
        language: Language,
        judgements: &Judgements,
    ) -> Result<VoteReceipt, StoreError>;

    async fn phrase_count(&self) -> Result<u64, StoreError>;

    /// Candidates for the next stored phrase: every phrase whose annotation
    /// count is at most the `k`-th lowest count, lowest first.
    ///
    /// Phrases tied at the cut-off are all returned, so more than `k` entries
    /// come back when counts tie.
    async fn least_annotated(&self, k: usize) -> Result<Vec<PhraseHeader>, StoreError>;

    async fn list_phrases(&self, limit: usize) -> Result<Vec<PhraseHeader>, StoreError>;

    async fn user_ledger(&self, username: &str) -> Result<Vec<LedgerEntry>, StoreError>;
}

/// A registered user and their current credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub access_token: IssuedToken,
    pub refresh_token: IssuedToken,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// `DuplicateKey` if the username is taken.
    async fn create_account(&self, account: &Account) -> Result<(), StoreError>;

    async fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError>;

    /// `NotFound` if the username does not exist.
    async fn update_tokens(
        &self,
        username: &str,
        access_token: &IssuedToken,
        refresh_token: Option<&IssuedToken>,
    ) -> Result<(), StoreError>;
}
