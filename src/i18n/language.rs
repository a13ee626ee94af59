use crate::i18n::registry::{LanguageRegistry, SOURCE};
use anyhow::{bail, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A supported target language.
///
/// Only codes listed in the registry parse, so holding a `Language` is proof
/// it can be translated into. Ordering and hashing follow the ISO code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Language {
    code: &'static str,
    name: &'static str,
}

impl Language {
    pub const FRENCH: Language = Language { code: "fr", name: "French" };
    pub const SPANISH: Language = Language { code: "es", name: "Spanish" };

    pub fn from_code(code: &str) -> Result<Language> {
        if code == SOURCE.code {
            bail!("Language '{}' is the source language, not a translation target", code);
        }
        match LanguageRegistry::get().target(code) {
            Some(config) => Ok(Language {
                code: config.code,
                name: config.name,
            }),
            None => bail!("Unsupported language code: '{}'", code),
        }
    }

    /// ISO 639-1 code
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// English name, e.g. "French"
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code)
    }
}

impl Serialize for Language {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code)
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Language::from_code(&code).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_match_registry() {
        assert_eq!(Language::from_code("fr").unwrap(), Language::FRENCH);
        assert_eq!(Language::from_code("es").unwrap(), Language::SPANISH);
        assert_eq!(Language::FRENCH.name(), "French");
    }

    #[test]
    fn test_from_code() {
        let japanese = Language::from_code("ja").unwrap();
        assert_eq!(japanese.code(), "ja");
        assert_eq!(japanese.name(), "Japanese");

        assert!(Language::from_code("xx").unwrap_err().to_string().contains("Unsupported"));
        assert!(Language::from_code("").is_err());
        // Codes are case-sensitive
        assert!(Language::from_code("FR").is_err());
    }

    #[test]
    fn test_english_is_rejected() {
        let err = Language::from_code("en").unwrap_err();
        assert!(err.to_string().contains("source language"));
    }

    #[test]
    fn test_serde_uses_code() {
        assert_eq!(serde_json::to_string(&Language::SPANISH).unwrap(), "\"es\"");

        let parsed: Language = serde_json::from_str("\"fr\"").unwrap();
        assert_eq!(parsed, Language::FRENCH);
        assert!(serde_json::from_str::<Language>("\"klingon\"").is_err());
    }

    #[test]
    fn test_ordering_follows_code() {
        let german = Language::from_code("de").unwrap();
        let mut languages = vec![Language::SPANISH, Language::FRENCH, german];
        languages.sort();
        let codes: Vec<_> = languages.iter().map(Language::code).collect();
        assert_eq!(codes, vec!["de", "es", "fr"]);
    }
}
