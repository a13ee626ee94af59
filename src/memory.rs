//! In-process implementation of the persistence collaborators.
//!
//! Used when no `DATABASE_URL` is configured and throughout the tests. Every
//! operation runs inside short, non-suspending sections under the map locks,
//! so a vote's classification and its counter update see one snapshot. No
//! per-key state is kept beyond the phrases, ledgers and accounts.

use crate::engine::{plan_vote, VoteReceipt};
use crate::i18n::Language;
use crate::model::{Judgements, LedgerEntry, PhraseHeader, ProviderSet, SourcePhrase};
use crate::security::IssuedToken;
use crate::store::{Account, AccountStore, Attachment, PhraseStore, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

type VoteKey = (String, Language);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct MemoryStore {
    phrases: Mutex<HashMap<String, SourcePhrase>>,
    /// username -> (identity, language) -> last accepted judgements
    ledgers: Mutex<HashMap<String, BTreeMap<VoteKey, Judgements>>>,
    accounts: Mutex<HashMap<String, Account>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn header_order(a: &PhraseHeader, b: &PhraseHeader) -> std::cmp::Ordering {
    a.annotation_count
        .cmp(&b.annotation_count)
        .then_with(|| a.identity.cmp(&b.identity))
}

#[async_trait]
impl PhraseStore for MemoryStore {
    async fn find_phrase(&self, identity: &str) -> Result<Option<SourcePhrase>, StoreError> {
        Ok(lock(&self.phrases).get(identity).cloned())
    }

    async fn insert_phrase(&self, phrase: &SourcePhrase) -> Result<(), StoreError> {
        let mut phrases = lock(&self.phrases);
        if phrases.contains_key(&phrase.identity) {
            return Err(StoreError::DuplicateKey(format!(
                "Phrase {} already exists",
                phrase.identity
            )));
        }
        phrases.insert(phrase.identity.clone(), phrase.clone());
        Ok(())
    }

    async fn attach_language(
        &self,
        identity: &str,
        language: Language,
        texts: &ProviderSet<String>,
    ) -> Result<Attachment, StoreError> {
        let mut phrases = lock(&self.phrases);
        let phrase = phrases
            .get_mut(identity)
            .ok_or_else(|| StoreError::NotFound(format!("Unknown phrase {}", identity)))?;

        if phrase.attach(language, texts) {
            Ok(Attachment::Attached)
        } else {
            Ok(Attachment::AlreadyPresent)
        }
    }

    async fn reconcile_vote(
        &self,
        username: &str,
        identity: &str,
        language: Language,
        judgements: &Judgements,
    ) -> Result<VoteReceipt, StoreError> {
        let key: VoteKey = (identity.to_string(), language);
        // Held together for the whole reconciliation
        let mut phrases = lock(&self.phrases);
        let mut ledgers = lock(&self.ledgers);

        let phrase = phrases
            .get_mut(identity)
            .ok_or_else(|| StoreError::NotFound(format!("Unknown phrase {}", identity)))?;
        let records = phrase.translations.get(&language).ok_or_else(|| {
            StoreError::NotFound(format!("Phrase {} has no {} translations", identity, language))
        })?;

        let prior = ledgers
            .get(username)
            .and_then(|entries| entries.get(&key))
            .copied();
        let plan = plan_vote(prior.as_ref(), judgements);
        let updated = plan.applied(records)?;

        phrase.translations.insert(language, updated.clone());
        phrase.annotation_count += plan.annotation_increment();
        if plan.writes_ledger() {
            ledgers
                .entry(username.to_string())
                .or_default()
                .insert(key, *judgements);
        }

        Ok(VoteReceipt {
            outcome: plan.outcome(),
            phrase: phrase.phrase.clone(),
            records: updated,
        })
    }

    async fn phrase_count(&self) -> Result<u64, StoreError> {
        Ok(lock(&self.phrases).len() as u64)
    }

    async fn least_annotated(&self, k: usize) -> Result<Vec<PhraseHeader>, StoreError> {
        let mut headers: Vec<PhraseHeader> =
            lock(&self.phrases).values().map(PhraseHeader::from).collect();
        headers.sort_by(header_order);

        let index = k.max(1).min(headers.len()).saturating_sub(1);
        let Some(cutoff) = headers.get(index).map(|h| h.annotation_count) else {
            return Ok(headers);
        };
        headers.retain(|header| header.annotation_count <= cutoff);
        Ok(headers)
    }

    async fn list_phrases(&self, limit: usize) -> Result<Vec<PhraseHeader>, StoreError> {
        let mut headers: Vec<PhraseHeader> =
            lock(&self.phrases).values().map(PhraseHeader::from).collect();
        headers.sort_by(|a, b| a.identity.cmp(&b.identity));
        headers.truncate(limit);
        Ok(headers)
    }

    async fn user_ledger(&self, username: &str) -> Result<Vec<LedgerEntry>, StoreError> {
        let ledgers = lock(&self.ledgers);
        let entries = ledgers
            .get(username)
            .map(|entries| {
                entries
                    .iter()
                    .map(|((identity, language), judgements)| LedgerEntry {
                        identity: identity.clone(),
                        language: *language,
                        judgements: *judgements,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(entries)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut accounts = lock(&self.accounts);
        if accounts.contains_key(&account.username) {
            return Err(StoreError::DuplicateKey(format!(
                "User {} already exists",
                account.username
            )));
        }
        accounts.insert(account.username.clone(), account.clone());
        Ok(())
    }

    async fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError> {
        Ok(lock(&self.accounts).get(username).cloned())
    }

    async fn update_tokens(
        &self,
        username: &str,
        access_token: &IssuedToken,
        refresh_token: Option<&IssuedToken>,
    ) -> Result<(), StoreError> {
        let mut accounts = lock(&self.accounts);
        let account = accounts
            .get_mut(username)
            .ok_or_else(|| StoreError::NotFound(format!("Unknown user {}", username)))?;

        account.access_token = access_token.clone();
        if let Some(refresh_token) = refresh_token {
            account.refresh_token = refresh_token.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::VoteOutcome;
    use crate::security::{generate_token, TokenKind};
    use std::sync::Arc;

    fn texts() -> ProviderSet<String> {
        ProviderSet::from_fn(|p| format!("{}-bonjour", p))
    }

    fn judgements(azure: bool, google: bool, yandex: bool) -> Judgements {
        ProviderSet {
            azure,
            google,
            yandex,
        }
    }

    async fn store_with_phrase(text: &str) -> (Arc<MemoryStore>, String) {
        let store = Arc::new(MemoryStore::new());
        let phrase = SourcePhrase::new(text);
        store.insert_phrase(&phrase).await.unwrap();
        store
            .attach_language(&phrase.identity, Language::FRENCH, &texts())
            .await
            .unwrap();
        (store, phrase.identity)
    }

    // ==================== Phrases ====================

    #[tokio::test]
    async fn test_insert_duplicate_identity() {
        let store = MemoryStore::new();
        store.insert_phrase(&SourcePhrase::new("Hello!")).await.unwrap();

        let result = store.insert_phrase(&SourcePhrase::new("hello")).await;
        assert!(matches!(result, Err(StoreError::DuplicateKey(_))));
        assert_eq!(store.phrase_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_attach_language_once() {
        let (store, identity) = store_with_phrase("hello").await;

        let other = ProviderSet::from_fn(|_| "autre".to_string());
        let second = store
            .attach_language(&identity, Language::FRENCH, &other)
            .await
            .unwrap();
        assert_eq!(second, Attachment::AlreadyPresent);

        let phrase = store.find_phrase(&identity).await.unwrap().unwrap();
        assert_eq!(phrase.translations[&Language::FRENCH].azure.translation, "azure-bonjour");
    }

    #[tokio::test]
    async fn test_attach_language_unknown_phrase() {
        let store = MemoryStore::new();
        let result = store.attach_language("nope", Language::FRENCH, &texts()).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_least_annotated_orders_by_count() {
        let (store, busy) = store_with_phrase("busy").await;
        store.insert_phrase(&SourcePhrase::new("quiet")).await.unwrap();
        store
            .reconcile_vote("u1", &busy, Language::FRENCH, &judgements(true, true, true))
            .await
            .unwrap();

        let headers = store.least_annotated(5).await.unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].phrase, "quiet");
        assert_eq!(headers[1].annotation_count, 1);

        assert_eq!(store.least_annotated(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_least_annotated_keeps_every_tied_phrase() {
        let (store, busy) = store_with_phrase("busy").await;
        for i in 0..6 {
            store
                .insert_phrase(&SourcePhrase::new(format!("quiet {}", i)))
                .await
                .unwrap();
        }
        store
            .reconcile_vote("u1", &busy, Language::FRENCH, &judgements(true, true, true))
            .await
            .unwrap();

        // Six phrases tie at zero, more than k
        let headers = store.least_annotated(2).await.unwrap();
        assert_eq!(headers.len(), 6);
        assert!(headers.iter().all(|h| h.annotation_count == 0));

        // The cut-off count includes the busy phrase once k reaches it
        assert_eq!(store.least_annotated(7).await.unwrap().len(), 7);
        assert_eq!(store.least_annotated(50).await.unwrap().len(), 7);
    }

    // ==================== Votes ====================

    #[tokio::test]
    async fn test_vote_unknown_phrase_or_language() {
        let (store, identity) = store_with_phrase("hello").await;
        let vote = judgements(true, true, true);

        let unknown_phrase = store.reconcile_vote("u1", "nope", Language::FRENCH, &vote).await;
        assert!(matches!(unknown_phrase, Err(StoreError::NotFound(_))));

        let unknown_language = store
            .reconcile_vote("u1", &identity, Language::SPANISH, &vote)
            .await;
        assert!(matches!(unknown_language, Err(StoreError::NotFound(_))));
        assert!(store.user_ledger("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vote_lifecycle_and_ledger() {
        let (store, identity) = store_with_phrase("hello").await;

        let first = store
            .reconcile_vote("u1", &identity, Language::FRENCH, &judgements(true, false, true))
            .await
            .unwrap();
        assert_eq!(first.outcome, VoteOutcome::Created);
        assert_eq!(first.phrase, "hello");

        let again = store
            .reconcile_vote("u1", &identity, Language::FRENCH, &judgements(true, false, true))
            .await
            .unwrap();
        assert_eq!(again.outcome, VoteOutcome::Unchanged);

        let changed = store
            .reconcile_vote("u1", &identity, Language::FRENCH, &judgements(true, true, true))
            .await
            .unwrap();
        assert_eq!(changed.outcome, VoteOutcome::Updated);
        assert_eq!((changed.records.google.correct, changed.records.google.incorrect), (1, 0));

        let ledger = store.user_ledger("u1").await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].judgements, judgements(true, true, true));

        let phrase = store.find_phrase(&identity).await.unwrap().unwrap();
        assert_eq!(phrase.annotation_count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_votes_are_all_counted() {
        let (store, identity) = store_with_phrase("hello").await;

        let mut handles = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            let identity = identity.clone();
            handles.push(tokio::spawn(async move {
                store
                    .reconcile_vote(
                        &format!("user{}", i),
                        &identity,
                        Language::FRENCH,
                        &judgements(i % 2 == 0, true, false),
                    )
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().outcome, VoteOutcome::Created);
        }

        let phrase = store.find_phrase(&identity).await.unwrap().unwrap();
        let records = &phrase.translations[&Language::FRENCH];
        assert_eq!(phrase.annotation_count, 50);
        assert_eq!((records.azure.correct, records.azure.incorrect), (25, 25));
        assert_eq!((records.google.correct, records.google.incorrect), (50, 0));
        assert_eq!((records.yandex.correct, records.yandex.incorrect), (0, 50));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_revotes_by_one_user_count_once() {
        let (store, identity) = store_with_phrase("hello").await;

        let mut handles = Vec::new();
        for i in 0..40 {
            let store = Arc::clone(&store);
            let identity = identity.clone();
            handles.push(tokio::spawn(async move {
                let flip = i % 3 == 0;
                let vote = judgements(flip, !flip, true);
                store
                    .reconcile_vote("same-user", &identity, Language::FRENCH, &vote)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let phrase = store.find_phrase(&identity).await.unwrap().unwrap();
        let records = &phrase.translations[&Language::FRENCH];
        assert_eq!(phrase.annotation_count, 1);
        for (_, record) in records.iter() {
            assert_eq!(record.total(), 1);
        }

        let ledger = store.user_ledger("same-user").await.unwrap();
        assert_eq!(records.azure.correct == 1, ledger[0].judgements.azure);
        assert_eq!(records.google.correct == 1, ledger[0].judgements.google);
    }

    // ==================== Accounts ====================

    fn account(username: &str) -> Account {
        Account {
            username: username.to_string(),
            password_hash: "salt$digest".to_string(),
            is_admin: false,
            access_token: generate_token(TokenKind::Access),
            refresh_token: generate_token(TokenKind::Refresh),
        }
    }

    #[tokio::test]
    async fn test_account_lifecycle() {
        let store = MemoryStore::new();
        store.create_account(&account("alice")).await.unwrap();

        let duplicate = store.create_account(&account("alice")).await;
        assert!(matches!(duplicate, Err(StoreError::DuplicateKey(_))));

        let fresh = generate_token(TokenKind::Access);
        store.update_tokens("alice", &fresh, None).await.unwrap();
        let stored = store.find_account("alice").await.unwrap().unwrap();
        assert_eq!(stored.access_token, fresh);

        let missing = store.update_tokens("bob", &fresh, None).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
        assert!(store.find_account("bob").await.unwrap().is_none());
    }
}
