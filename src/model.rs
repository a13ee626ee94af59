//! Domain model: source phrases, per-provider vote counters and user ledgers.

use crate::i18n::Language;
use crate::security::phrase_identity;
use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One of the three translation engines whose output is voted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Azure,
    Google,
    Yandex,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Azure, Provider::Google, Provider::Yandex];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Azure => "azure",
            Provider::Google => "google",
            Provider::Yandex => "yandex",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "azure" => Ok(Provider::Azure),
            "google" => Ok(Provider::Google),
            "yandex" => Ok(Provider::Yandex),
            other => bail!("Unknown translation provider: '{}'", other),
        }
    }
}

/// Exactly one value per provider.
///
/// Replaces loosely keyed provider maps: a `ProviderSet` cannot be missing a
/// provider or carry an unknown one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderSet<T> {
    pub azure: T,
    pub google: T,
    pub yandex: T,
}

impl<T> ProviderSet<T> {
    pub fn from_fn(mut f: impl FnMut(Provider) -> T) -> Self {
        Self {
            azure: f(Provider::Azure),
            google: f(Provider::Google),
            yandex: f(Provider::Yandex),
        }
    }

    pub fn get(&self, provider: Provider) -> &T {
        match provider {
            Provider::Azure => &self.azure,
            Provider::Google => &self.google,
            Provider::Yandex => &self.yandex,
        }
    }

    pub fn get_mut(&mut self, provider: Provider) -> &mut T {
        match provider {
            Provider::Azure => &mut self.azure,
            Provider::Google => &mut self.google,
            Provider::Yandex => &mut self.yandex,
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(Provider, &T) -> U) -> ProviderSet<U> {
        ProviderSet::from_fn(|provider| f(provider, self.get(provider)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Provider, &T)> {
        Provider::ALL.into_iter().map(move |provider| (provider, self.get(provider)))
    }
}

/// A user's correctness judgement for each provider's translation.
pub type Judgements = ProviderSet<bool>;

/// One provider's translation of a phrase plus its vote counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub translation: String,
    pub correct: u64,
    pub incorrect: u64,
}

impl ProviderRecord {
    pub fn new(translation: impl Into<String>) -> Self {
        Self {
            translation: translation.into(),
            correct: 0,
            incorrect: 0,
        }
    }

    /// Number of users whose final vote covers this record.
    pub fn total(&self) -> u64 {
        self.correct + self.incorrect
    }
}

/// Translations and counters for one language of a phrase.
pub type LanguageRecords = ProviderSet<ProviderRecord>;

impl LanguageRecords {
    pub fn from_texts(texts: &ProviderSet<String>) -> Self {
        texts.map(|_, text| ProviderRecord::new(text.clone()))
    }

    pub fn texts(&self) -> ProviderSet<String> {
        self.map(|_, record| record.translation.clone())
    }
}

/// An English phrase and everything recorded about its translations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePhrase {
    pub phrase: String,
    #[serde(rename = "hash")]
    pub identity: String,
    /// First-time (user, language) annotations across all languages
    pub annotation_count: u64,
    pub translations: BTreeMap<Language, LanguageRecords>,
}

impl SourcePhrase {
    /// A never-annotated phrase with no translations yet.
    pub fn new(phrase: impl Into<String>) -> Self {
        let phrase = phrase.into();
        Self {
            identity: phrase_identity(&phrase),
            phrase,
            annotation_count: 0,
            translations: BTreeMap::new(),
        }
    }

    pub fn has_language(&self, language: Language) -> bool {
        self.translations.contains_key(&language)
    }

    /// Record translations for a language the first time it is seen.
    ///
    /// Returns `false` and leaves the phrase untouched when the language is
    /// already present: recorded translations and their counters are immutable.
    pub fn attach(&mut self, language: Language, texts: &ProviderSet<String>) -> bool {
        if self.has_language(language) {
            return false;
        }
        self.translations
            .insert(language, LanguageRecords::from_texts(texts));
        true
    }
}

/// Lightweight view of a phrase used for selection and listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhraseHeader {
    #[serde(rename = "hash")]
    pub identity: String,
    pub phrase: String,
    pub annotation_count: u64,
}

impl From<&SourcePhrase> for PhraseHeader {
    fn from(phrase: &SourcePhrase) -> Self {
        Self {
            identity: phrase.identity.clone(),
            phrase: phrase.phrase.clone(),
            annotation_count: phrase.annotation_count,
        }
    }
}

/// A user's last accepted vote for one (phrase, language) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    #[serde(rename = "hash")]
    pub identity: String,
    pub language: Language,
    pub judgements: Judgements,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub username: String,
    pub is_admin: bool,
}
