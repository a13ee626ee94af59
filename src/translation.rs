//! Machine translation providers.
//!
//! Each provider translates English text into one target language. Transient
//! failures are retried here; callers see either a translation or a final
//! [`ProviderError`].

use crate::config::Config;
use crate::i18n::Language;
use crate::metrics::TranslationMetrics;
use crate::model::{Provider, ProviderSet};
use crate::retry::{with_retry_if, RetryConfig};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} request failed: {source}")]
    Transport {
        provider: Provider,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} API error ({status}): {body}")]
    Status {
        provider: Provider,
        status: StatusCode,
        body: String,
    },

    #[error("{provider} returned no translation")]
    EmptyResponse { provider: Provider },

    #[error("Failed to parse {provider} response: {source}")]
    Decode {
        provider: Provider,
        #[source]
        source: reqwest::Error,
    },
}

impl ProviderError {
    /// Rate limits, 5xx responses and transport failures are worth retrying.
    /// Other 4xx responses and malformed bodies are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport { .. } => true,
            ProviderError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            ProviderError::EmptyResponse { .. } | ProviderError::Decode { .. } => false,
        }
    }

    pub fn provider(&self) -> Provider {
        match self {
            ProviderError::Transport { provider, .. }
            | ProviderError::Status { provider, .. }
            | ProviderError::EmptyResponse { provider }
            | ProviderError::Decode { provider, .. } => *provider,
        }
    }
}

#[async_trait]
pub trait TranslationProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Translate English `text` into `target`.
    async fn translate(&self, text: &str, target: Language) -> Result<String, ProviderError>;
}

/// Send a request and turn non-success statuses into [`ProviderError::Status`].
async fn send_checked(
    provider: Provider,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|source| ProviderError::Transport { provider, source })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
        return Err(ProviderError::Status {
            provider,
            status,
            body,
        });
    }

    Ok(response)
}

async fn decode<T: for<'de> Deserialize<'de>>(
    provider: Provider,
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    response
        .json()
        .await
        .map_err(|source| ProviderError::Decode { provider, source })
}

fn non_empty(provider: Provider, text: Option<String>) -> Result<String, ProviderError> {
    text.filter(|t| !t.trim().is_empty())
        .ok_or(ProviderError::EmptyResponse { provider })
}

/// Retry a provider call and record the outcome in the global metrics.
async fn tracked_call<F, Fut>(
    provider: Provider,
    retry: &RetryConfig,
    target: Language,
    operation: F,
) -> Result<String, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<String, ProviderError>>,
{
    let metrics = TranslationMetrics::global();
    metrics.record_api_call(provider);

    let result = with_retry_if(
        retry,
        &format!("{} translation to {}", provider, target.name()),
        operation,
        ProviderError::is_retryable,
    )
    .await;

    match &result {
        Ok(text) => debug!("{} translated into {}: {}", provider, target, text),
        Err(_) => metrics.record_api_failure(provider),
    }
    result
}

// ==================== Azure Translator v3 ====================

#[derive(Serialize)]
struct AzureRequestItem<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct AzureResponseItem {
    translations: Vec<AzureTranslation>,
}

#[derive(Deserialize)]
struct AzureTranslation {
    text: String,
}

pub struct AzureTranslator {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    region: Option<String>,
    retry: RetryConfig,
}

impl AzureTranslator {
    pub fn new(
        client: reqwest::Client,
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        region: Option<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
            region,
            retry: RetryConfig::translation_call(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl TranslationProvider for AzureTranslator {
    fn provider(&self) -> Provider {
        Provider::Azure
    }

    async fn translate(&self, text: &str, target: Language) -> Result<String, ProviderError> {
        let provider = self.provider();
        let url = format!("{}/translate", self.api_url.trim_end_matches('/'));
        let body = [AzureRequestItem { text }];

        tracked_call(provider, &self.retry, target, || async {
            let mut request = self
                .client
                .post(&url)
                .query(&[("api-version", "3.0"), ("from", "en"), ("to", target.code())])
                .header("Ocp-Apim-Subscription-Key", &self.api_key)
                .header("X-ClientTraceId", uuid::Uuid::new_v4().to_string())
                .json(&body);
            if let Some(region) = &self.region {
                request = request.header("Ocp-Apim-Subscription-Region", region);
            }

            let response = send_checked(provider, request).await?;
            let items: Vec<AzureResponseItem> = decode(provider, response).await?;

            let text = items
                .into_iter()
                .next()
                .and_then(|item| item.translations.into_iter().next())
                .map(|t| t.text);
            non_empty(provider, text)
        })
        .await
    }
}

// ==================== Google Cloud Translation v2 ====================

#[derive(Serialize)]
struct GoogleRequest<'a> {
    q: &'a str,
    source: &'static str,
    target: &'static str,
    format: &'static str,
}

#[derive(Deserialize)]
struct GoogleResponse {
    data: GoogleData,
}

#[derive(Deserialize)]
struct GoogleData {
    translations: Vec<GoogleTranslation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleTranslation {
    translated_text: String,
}

pub struct GoogleTranslator {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    retry: RetryConfig,
}

impl GoogleTranslator {
    pub fn new(
        client: reqwest::Client,
        api_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
            retry: RetryConfig::translation_call(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl TranslationProvider for GoogleTranslator {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn translate(&self, text: &str, target: Language) -> Result<String, ProviderError> {
        let provider = self.provider();
        let body = GoogleRequest {
            q: text,
            source: "en",
            target: target.code(),
            format: "text",
        };

        tracked_call(provider, &self.retry, target, || async {
            let request = self
                .client
                .post(&self.api_url)
                .query(&[("key", self.api_key.as_str())])
                .json(&body);

            let response = send_checked(provider, request).await?;
            let parsed: GoogleResponse = decode(provider, response).await?;

            let text = parsed
                .data
                .translations
                .into_iter()
                .next()
                .map(|t| t.translated_text);
            non_empty(provider, text)
        })
        .await
    }
}

// ==================== Yandex Translate v1.5 ====================

#[derive(Deserialize)]
struct YandexResponse {
    #[serde(default)]
    text: Vec<String>,
}

pub struct YandexTranslator {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    retry: RetryConfig,
}

impl YandexTranslator {
    pub fn new(
        client: reqwest::Client,
        api_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
            retry: RetryConfig::translation_call(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl TranslationProvider for YandexTranslator {
    fn provider(&self) -> Provider {
        Provider::Yandex
    }

    async fn translate(&self, text: &str, target: Language) -> Result<String, ProviderError> {
        let provider = self.provider();
        let url = format!(
            "{}/api/v1.5/tr.json/translate",
            self.api_url.trim_end_matches('/')
        );
        let lang = format!("en-{}", target.code());

        tracked_call(provider, &self.retry, target, || async {
            let request = self.client.post(&url).query(&[
                ("key", self.api_key.as_str()),
                ("text", text),
                ("lang", lang.as_str()),
            ]);

            let response = send_checked(provider, request).await?;
            let parsed: YandexResponse = decode(provider, response).await?;

            non_empty(provider, parsed.text.into_iter().next())
        })
        .await
    }
}

// ==================== Translator ====================

/// The three providers used together.
#[derive(Clone)]
pub struct Translator {
    providers: ProviderSet<Arc<dyn TranslationProvider>>,
}

impl Translator {
    pub fn new(
        azure: Arc<dyn TranslationProvider>,
        google: Arc<dyn TranslationProvider>,
        yandex: Arc<dyn TranslationProvider>,
    ) -> Self {
        Self {
            providers: ProviderSet {
                azure,
                google,
                yandex,
            },
        }
    }

    pub fn from_config(config: &Config, client: reqwest::Client) -> Self {
        Self::new(
            Arc::new(AzureTranslator::new(
                client.clone(),
                &config.azure_translator_url,
                &config.azure_translator_key,
                config.azure_translator_region.clone(),
            )),
            Arc::new(GoogleTranslator::new(
                client.clone(),
                &config.google_translate_url,
                &config.google_api_key,
            )),
            Arc::new(YandexTranslator::new(
                client,
                &config.yandex_translate_url,
                &config.yandex_api_key,
            )),
        )
    }

    /// Translate with all three providers concurrently.
    ///
    /// Fails as a whole if any provider fails, so no partial set is ever
    /// recorded.
    pub async fn translate_all(
        &self,
        text: &str,
        target: Language,
    ) -> Result<ProviderSet<String>, ProviderError> {
        let (azure, google, yandex) = futures::try_join!(
            self.providers.azure.translate(text, target),
            self.providers.google.translate(text, target),
            self.providers.yandex.translate(text, target),
        )?;

        Ok(ProviderSet {
            azure,
            google,
            yandex,
        })
    }
}
