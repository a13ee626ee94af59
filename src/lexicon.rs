//! External source of fresh English phrases (WordsAPI via RapidAPI).

use crate::retry::{with_retry_if, RetryConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::Deserialize;
use tracing::debug;

#[async_trait]
pub trait LexicalSource: Send + Sync {
    /// A dictionary definition of a random word.
    async fn random_definition(&self) -> Result<String>;

    /// An example sentence using a random word.
    async fn random_example(&self) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct WordResponse {
    #[serde(default)]
    word: String,
    #[serde(default)]
    results: Vec<WordSense>,
}

#[derive(Debug, Deserialize)]
struct WordSense {
    definition: Option<String>,
    #[serde(default)]
    examples: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum Detail {
    Definitions,
    Examples,
}

impl Detail {
    fn as_str(self) -> &'static str {
        match self {
            Detail::Definitions => "definitions",
            Detail::Examples => "examples",
        }
    }
}

/// Uniformly pick one non-blank candidate.
fn pick(candidates: Vec<String>) -> Option<String> {
    let candidates: Vec<String> = candidates
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    candidates.choose(&mut rand::thread_rng()).cloned()
}

/// Only transport failures and 429/5xx responses are retried.
fn is_retryable(error: &anyhow::Error) -> bool {
    match error.downcast_ref::<reqwest::Error>() {
        Some(e) => match e.status() {
            Some(status) => status.as_u16() == 429 || status.is_server_error(),
            None => !e.is_decode(),
        },
        None => false,
    }
}

pub struct WordsApiClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    retry: RetryConfig,
}

impl WordsApiClient {
    pub fn new(
        client: reqwest::Client,
        api_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
            retry: RetryConfig::lexicon_call(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn rapidapi_host(&self) -> String {
        reqwest::Url::parse(&self.api_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_default()
    }

    async fn random_word(&self, detail: Detail) -> Result<WordResponse> {
        let url = format!("{}/words/", self.api_url.trim_end_matches('/'));
        let host = self.rapidapi_host();

        with_retry_if(
            &self.retry,
            &format!("WordsAPI random word with {}", detail.as_str()),
            || async {
                let response = self
                    .client
                    .get(&url)
                    .query(&[
                        ("random", "true"),
                        ("hasDetails", detail.as_str()),
                        ("limit", "1"),
                        ("page", "1"),
                    ])
                    .header("X-RapidAPI-Key", &self.api_key)
                    .header("X-RapidAPI-Host", &host)
                    .send()
                    .await?
                    .error_for_status()?;

                let word: WordResponse = response.json().await?;
                Ok::<_, anyhow::Error>(word)
            },
            is_retryable,
        )
        .await
        .context("Failed to fetch a random word from WordsAPI")
    }
}

#[async_trait]
impl LexicalSource for WordsApiClient {
    async fn random_definition(&self) -> Result<String> {
        let word = self.random_word(Detail::Definitions).await?;
        debug!("WordsAPI returned '{}' with {} senses", word.word, word.results.len());

        let definitions = word.results.into_iter().filter_map(|s| s.definition).collect();
        pick(definitions)
            .with_context(|| format!("WordsAPI returned no definition for '{}'", word.word))
    }

    async fn random_example(&self) -> Result<String> {
        let word = self.random_word(Detail::Examples).await?;
        debug!("WordsAPI returned '{}' with {} senses", word.word, word.results.len());

        let examples = word.results.into_iter().flat_map(|s| s.examples).collect();
        pick(examples).with_context(|| format!("WordsAPI returned no example for '{}'", word.word))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::{
        matchers::{header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn client_for(server: &MockServer) -> WordsApiClient {
        WordsApiClient::new(reqwest::Client::new(), server.uri(), "words-key")
            .with_retry(RetryConfig::new(2, Duration::from_millis(10)))
    }

    #[test]
    fn test_pick_skips_blank_candidates() {
        assert_eq!(pick(vec!["  ".into(), " only one ".into()]), Some("only one".to_string()));
        assert_eq!(pick(vec![]), None);
    }

    #[tokio::test]
    async fn test_random_definition() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/words/"))
            .and(query_param("random", "true"))
            .and(query_param("hasDetails", "definitions"))
            .and(header("X-RapidAPI-Key", "words-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "word": "lantern",
                "results": [
                    { "definition": "light enclosed in a protective case", "partOfSpeech": "noun" }
                ]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let definition = client_for(&mock_server).random_definition().await.unwrap();
        assert_eq!(definition, "light enclosed in a protective case");
    }

    #[tokio::test]
    async fn test_random_example_flattens_senses() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(query_param("hasDetails", "examples"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "word": "run",
                "results": [
                    { "definition": "move fast", "examples": ["she runs every morning"] },
                    { "definition": "operate", "examples": ["run the program", "run a shop"] }
                ]
            })))
            .mount(&mock_server)
            .await;

        let example = client_for(&mock_server).random_example().await.unwrap();
        assert!(["she runs every morning", "run the program", "run a shop"]
            .contains(&example.as_str()));
    }

    #[tokio::test]
    async fn test_empty_result_is_an_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "word": "xyzzy",
                "results": []
            })))
            .mount(&mock_server)
            .await;

        let err = client_for(&mock_server).random_example().await.unwrap_err();
        assert!(err.to_string().contains("no example"));
    }

    #[tokio::test]
    async fn test_retries_server_errors_but_not_client_errors() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(query_param("hasDetails", "definitions"))
            .respond_with(ResponseTemplate::new(502))
            .expect(2)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(query_param("hasDetails", "examples"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        assert!(client.random_definition().await.is_err());
        assert!(client.random_example().await.is_err());
    }
}
