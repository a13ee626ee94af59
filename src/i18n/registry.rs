//! Closed set of target languages.
//!
//! Every phrase is written in English; only the languages listed in
//! `TARGETS` can be requested, translated into or voted on.

use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageConfig {
    /// ISO 639-1 code sent to every provider
    pub code: &'static str,
    pub name: &'static str,
}

/// Source language of every phrase; never a translation target.
pub const SOURCE: LanguageConfig = LanguageConfig { code: "en", name: "English" };

const TARGETS: &[LanguageConfig] = &[
    LanguageConfig { code: "af", name: "Afrikaans" },
    LanguageConfig { code: "ar", name: "Arabic" },
    LanguageConfig { code: "bs", name: "Bosnian" },
    LanguageConfig { code: "bg", name: "Bulgarian" },
    LanguageConfig { code: "ca", name: "Catalan" },
    LanguageConfig { code: "hr", name: "Croatian" },
    LanguageConfig { code: "cs", name: "Czech" },
    LanguageConfig { code: "da", name: "Danish" },
    LanguageConfig { code: "nl", name: "Dutch" },
    LanguageConfig { code: "et", name: "Estonian" },
    LanguageConfig { code: "fi", name: "Finnish" },
    LanguageConfig { code: "fr", name: "French" },
    LanguageConfig { code: "de", name: "German" },
    LanguageConfig { code: "el", name: "Greek" },
    LanguageConfig { code: "ht", name: "Haitian Creole" },
    LanguageConfig { code: "hi", name: "Hindi" },
    LanguageConfig { code: "hu", name: "Hungarian" },
    LanguageConfig { code: "is", name: "Icelandic" },
    LanguageConfig { code: "id", name: "Indonesian" },
    LanguageConfig { code: "it", name: "Italian" },
    LanguageConfig { code: "ja", name: "Japanese" },
    LanguageConfig { code: "ko", name: "Korean" },
    LanguageConfig { code: "lv", name: "Latvian" },
    LanguageConfig { code: "lt", name: "Lithuanian" },
    LanguageConfig { code: "mg", name: "Malagasy" },
    LanguageConfig { code: "ms", name: "Malay" },
    LanguageConfig { code: "mt", name: "Maltese" },
    LanguageConfig { code: "no", name: "Norwegian" },
    LanguageConfig { code: "fa", name: "Persian" },
    LanguageConfig { code: "pl", name: "Polish" },
    LanguageConfig { code: "pt", name: "Portuguese" },
    LanguageConfig { code: "ro", name: "Romanian" },
    LanguageConfig { code: "sk", name: "Slovak" },
    LanguageConfig { code: "sl", name: "Slovenian" },
    LanguageConfig { code: "es", name: "Spanish" },
    LanguageConfig { code: "sv", name: "Swedish" },
    LanguageConfig { code: "te", name: "Telugu" },
    LanguageConfig { code: "th", name: "Thai" },
    LanguageConfig { code: "tr", name: "Turkish" },
    LanguageConfig { code: "uk", name: "Ukrainian" },
    LanguageConfig { code: "ur", name: "Urdu" },
    LanguageConfig { code: "vi", name: "Vietnamese" },
    LanguageConfig { code: "cy", name: "Welsh" },
];

pub struct LanguageRegistry {
    by_code: HashMap<&'static str, &'static LanguageConfig>,
}

static REGISTRY: OnceLock<LanguageRegistry> = OnceLock::new();

impl LanguageRegistry {
    pub fn get() -> &'static LanguageRegistry {
        REGISTRY.get_or_init(|| LanguageRegistry {
            by_code: TARGETS.iter().map(|lang| (lang.code, lang)).collect(),
        })
    }

    /// Look up a target language; `None` for the source language too.
    pub fn target(&self, code: &str) -> Option<&'static LanguageConfig> {
        self.by_code.get(code).copied()
    }

    pub fn targets(&self) -> &'static [LanguageConfig] {
        TARGETS
    }
}
