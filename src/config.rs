use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub environment: String,
    pub port: u16,

    // Storage (in-memory when unset)
    pub database_url: Option<String>,

    // Credentials
    pub client_id: String,
    pub admin_secret: String,

    // Google Cloud Translation
    pub google_api_key: String,
    pub google_translate_url: String,

    // Azure Translator
    pub azure_translator_key: String,
    pub azure_translator_region: Option<String>,
    pub azure_translator_url: String,

    // Yandex Translate
    pub yandex_api_key: String,
    pub yandex_translate_url: String,

    // WordsAPI
    pub words_api_key: String,
    pub words_api_url: String,

    // Phrase selection
    pub selection_top_k: usize,

    // Monitoring
    pub monitor_buffer: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` uses the process environment.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| var(key).with_context(|| format!("{} not set", key));
        let optional = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            // Server
            environment: var("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            port: var("PORT").and_then(|v| v.parse().ok()).unwrap_or(8080),

            // Storage
            database_url: optional("DATABASE_URL"),

            // Credentials
            client_id: required("CLIENT_ID")?,
            admin_secret: required("ADMIN_SECRET")?,

            // Google
            google_api_key: required("GOOGLE_API_KEY")?,
            google_translate_url: var("GOOGLE_TRANSLATE_URL").unwrap_or_else(|| {
                "https://translation.googleapis.com/language/translate/v2".to_string()
            }),

            // Azure
            azure_translator_key: required("AZURE_TRANSLATOR_KEY")?,
            azure_translator_region: optional("AZURE_TRANSLATOR_REGION"),
            azure_translator_url: var("AZURE_TRANSLATOR_URL").unwrap_or_else(|| {
                "https://api.cognitive.microsofttranslator.com".to_string()
            }),

            // Yandex
            yandex_api_key: required("YANDEX_API_KEY")?,
            yandex_translate_url: var("YANDEX_TRANSLATE_URL")
                .unwrap_or_else(|| "https://translate.yandex.net".to_string()),

            // WordsAPI
            words_api_key: required("WORDS_API_KEY")?,
            words_api_url: var("WORDS_API_URL")
                .unwrap_or_else(|| "https://wordsapiv1.p.rapidapi.com".to_string()),

            // Selection
            selection_top_k: var("SELECTION_TOP_K")
                .and_then(|v| v.parse().ok())
                .filter(|k| *k > 0)
                .unwrap_or(5),

            // Monitoring
            monitor_buffer: var("MONITOR_BUFFER")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(100),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 7] = [
        ("CLIENT_ID", "client"),
        ("ADMIN_SECRET", "secret"),
        ("GOOGLE_API_KEY", "g"),
        ("AZURE_TRANSLATOR_KEY", "a"),
        ("YANDEX_API_KEY", "y"),
        ("WORDS_API_KEY", "w"),
        ("PORT", "9090"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.environment, "development");
        assert!(config.database_url.is_none());
        assert!(config.azure_translator_region.is_none());
        assert_eq!(config.selection_top_k, 5);
        assert_eq!(config.yandex_translate_url, "https://translate.yandex.net");
        assert!(!config.is_production());
    }

    #[test]
    fn test_monitor_buffer_override() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MONITOR_BUFFER", "16"));

        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.monitor_buffer, 16);
    }

    #[test]
    fn test_missing_required_value() {
        let pairs: Vec<_> = REQUIRED
            .iter()
            .copied()
            .filter(|(k, _)| *k != "CLIENT_ID")
            .collect();

        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert_eq!(err.to_string(), "CLIENT_ID not set");
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("ENVIRONMENT", "production"),
            ("DATABASE_URL", "postgres://localhost/phrases"),
            ("SELECTION_TOP_K", "0"),
            ("MONITOR_BUFFER", "0"),
            ("AZURE_TRANSLATOR_REGION", "westeurope"),
        ]);

        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert!(config.is_production());
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/phrases"));
        // Zero falls back to the default
        assert_eq!(config.selection_top_k, 5);
        assert_eq!(config.monitor_buffer, 100);
        // A zero-capacity broadcast channel would panic here
        crate::monitor::BroadcastSink::new(config.monitor_buffer);
        assert_eq!(config.azure_translator_region.as_deref(), Some("westeurope"));
    }
}
