//! Source phrase catalog: translation reuse and upsert-on-translate.

use crate::error::AppError;
use crate::i18n::Language;
use crate::metrics::TranslationMetrics;
use crate::model::{ProviderSet, SourcePhrase};
use crate::security::phrase_identity;
use crate::store::{Attachment, PhraseStore, StoreError};
use crate::translation::Translator;
use std::sync::Arc;
use tracing::{debug, info};

/// A phrase ready to be shown for annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedPhrase {
    pub phrase: String,
    pub identity: String,
    pub language: Language,
    pub translations: ProviderSet<String>,
}

#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn PhraseStore>,
    translator: Translator,
}

impl Catalog {
    pub fn new(store: Arc<dyn PhraseStore>, translator: Translator) -> Self {
        Self { store, translator }
    }

    /// Stored translations for `language`, translating and recording them on
    /// first sight of the (phrase, language) pair.
    pub async fn translations_for(
        &self,
        phrase: &str,
        language: Language,
    ) -> Result<TranslatedPhrase, AppError> {
        let metrics = TranslationMetrics::global();
        let identity = phrase_identity(phrase);

        if let Some(stored) = self.store.find_phrase(&identity).await? {
            if let Some(records) = stored.translations.get(&language) {
                metrics.record_stored_hit();
                debug!("Reusing stored {} translations for {}", language, identity);
                return Ok(TranslatedPhrase {
                    phrase: stored.phrase,
                    identity,
                    language,
                    translations: records.texts(),
                });
            }
        }

        metrics.record_stored_miss();
        let texts = self.translator.translate_all(phrase, language).await?;
        self.attach_translations(phrase, language, &texts).await
    }

    /// Record translations for a (phrase, language) pair unless already present.
    ///
    /// Creates the phrase if needed. A concurrent creator winning the insert
    /// is not an error. Returns the translations that ended up stored, which
    /// are a concurrent winner's when this call lost the race.
    pub async fn attach_translations(
        &self,
        phrase: &str,
        language: Language,
        texts: &ProviderSet<String>,
    ) -> Result<TranslatedPhrase, AppError> {
        let candidate = SourcePhrase::new(phrase);
        let identity = candidate.identity.clone();

        if self.store.find_phrase(&identity).await?.is_none() {
            match self.store.insert_phrase(&candidate).await {
                Ok(()) => info!("Added source phrase {}", identity),
                Err(StoreError::DuplicateKey(_)) => {
                    debug!("Phrase {} was created concurrently", identity);
                }
                Err(e) => return Err(e.into()),
            }
        }

        match self.store.attach_language(&identity, language, texts).await? {
            Attachment::Attached => info!("Recorded {} translations for {}", language, identity),
            Attachment::AlreadyPresent => {
                debug!("{} translations for {} already recorded", language, identity)
            }
        }

        let stored = self
            .store
            .find_phrase(&identity)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Phrase {} disappeared", identity)))?;
        let translations = stored
            .translations
            .get(&language)
            .map(|records| records.texts())
            .ok_or_else(|| {
                AppError::NotFound(format!("Phrase {} has no {} translations", identity, language))
            })?;

        Ok(TranslatedPhrase {
            phrase: stored.phrase,
            identity,
            language,
            translations,
        })
    }

    /// Explicitly add a phrase with no translations.
    pub async fn add_phrase(&self, phrase: &str) -> Result<SourcePhrase, AppError> {
        let phrase = phrase.trim();
        if phrase.is_empty() {
            return Err(AppError::BadRequest("Request must contain a phrase".to_string()));
        }

        let source = SourcePhrase::new(phrase);
        match self.store.insert_phrase(&source).await {
            Ok(()) => {
                info!("Added source phrase {}", source.identity);
                Ok(source)
            }
            Err(StoreError::DuplicateKey(_)) => Err(AppError::Conflict(
                "Cannot add source text already in database".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }
}
