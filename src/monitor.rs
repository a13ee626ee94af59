//! Monitoring sink for accepted votes.
//!
//! Delivery is at-most-once: a summary published while no monitor is
//! connected, or one a slow monitor lags past, is simply dropped.

use crate::engine::{VoteOutcome, VoteReceipt};
use crate::i18n::Language;
use crate::model::{Judgements, ProviderSet, UserIdentity};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

/// One provider's line in a vote summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderLine {
    pub translation: String,
    pub is_correct: bool,
    pub correct: u64,
    pub incorrect: u64,
}

/// Human-readable account of one accepted vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSummary {
    pub username: String,
    #[serde(rename = "hash")]
    pub identity: String,
    pub phrase: String,
    pub language: Language,
    pub outcome: VoteOutcome,
    pub providers: ProviderSet<ProviderLine>,
}

impl VoteSummary {
    pub fn new(
        user: &UserIdentity,
        identity: &str,
        language: Language,
        receipt: &VoteReceipt,
        judgements: &Judgements,
    ) -> Self {
        Self {
            username: user.username.clone(),
            identity: identity.to_string(),
            phrase: receipt.phrase.clone(),
            language,
            outcome: receipt.outcome,
            providers: receipt.records.map(|provider, record| ProviderLine {
                translation: record.translation.clone(),
                is_correct: *judgements.get(provider),
                correct: record.correct,
                incorrect: record.incorrect,
            }),
        }
    }
}

impl fmt::Display for VoteSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} annotated \"{}\" in {} ({:?})",
            self.username,
            self.phrase,
            self.language.name(),
            self.outcome
        )?;
        for (provider, line) in self.providers.iter() {
            let verdict = if line.is_correct { "correct" } else { "incorrect" };
            write!(
                f,
                "\n  {}: \"{}\" marked {} [{} correct / {} incorrect]",
                provider, line.translation, verdict, line.correct, line.incorrect
            )?;
        }
        Ok(())
    }
}

/// Receiver of vote summaries.
///
/// Called after the vote has been committed; an error is logged by the caller
/// and never fails the vote.
pub trait EventSink: Send + Sync {
    fn publish(&self, summary: &VoteSummary) -> anyhow::Result<()>;
}

/// Fans summaries out to connected monitors over a broadcast channel.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<VoteSummary>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        info!("Monitoring sink initialized with capacity {}", capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoteSummary> {
        self.tx.subscribe()
    }

    pub fn monitor_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Server-sent event stream for one monitor connection.
    pub fn sse_stream(&self) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        let stream = BroadcastStream::new(self.subscribe()).filter_map(|result| async move {
            match result {
                Ok(summary) => Event::default()
                    .event("vote")
                    .json_data(&summary)
                    .map_err(|e| warn!("Failed to serialize vote summary: {}", e))
                    .ok()
                    .map(Ok),
                Err(e) => {
                    warn!("Monitor stream lagged: {:?}", e);
                    None
                }
            }
        });

        info!("Monitor connected, total monitors: {}", self.monitor_count() + 1);

        Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, summary: &VoteSummary) -> anyhow::Result<()> {
        match self.tx.send(summary.clone()) {
            Ok(count) => debug!("Vote summary delivered to {} monitors", count),
            Err(_) => debug!("No monitors connected, vote summary dropped"),
        }
        Ok(())
    }
}

/// Writes summaries to the log.
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, summary: &VoteSummary) -> anyhow::Result<()> {
        info!("{}", summary);
        Ok(())
    }
}

/// Publishes to several sinks; one failing does not stop the others.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn publish(&self, summary: &VoteSummary) -> anyhow::Result<()> {
        let mut failures = 0;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(summary) {
                warn!("Monitoring sink failed: {}", e);
                failures += 1;
            }
        }
        if failures > 0 {
            anyhow::bail!("{} of {} monitoring sinks failed", failures, self.sinks.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProviderRecord;

    struct BrokenSink;

    impl EventSink for BrokenSink {
        fn publish(&self, _: &VoteSummary) -> anyhow::Result<()> {
            anyhow::bail!("socket closed")
        }
    }

    #[tokio::test]
    async fn test_fanout_reaches_healthy_sinks_despite_failure() {
        let broadcast = BroadcastSink::new(8);
        let mut rx = broadcast.subscribe();
        let fanout = FanoutSink::new(vec![Arc::new(BrokenSink), Arc::new(broadcast.clone())]);

        let result = fanout.publish(&summary());

        assert!(result.is_err());
        assert_eq!(rx.recv().await.unwrap(), summary());
    }

    fn summary() -> VoteSummary {
        let receipt = VoteReceipt {
            outcome: VoteOutcome::Created,
            phrase: "hello".to_string(),
            records: ProviderSet {
                azure: ProviderRecord { translation: "bonjour".into(), correct: 1, incorrect: 0 },
                google: ProviderRecord { translation: "salut".into(), correct: 0, incorrect: 1 },
                yandex: ProviderRecord { translation: "allô".into(), correct: 1, incorrect: 0 },
            },
        };
        let user = UserIdentity { username: "alice".into(), is_admin: false };
        let judgements = ProviderSet { azure: true, google: false, yandex: true };
        VoteSummary::new(&user, "abc123", Language::FRENCH, &receipt, &judgements)
    }

    #[test]
    fn test_summary_carries_judgements_and_counters() {
        let summary = summary();
        assert_eq!(summary.phrase, "hello");
        assert!(summary.providers.azure.is_correct);
        assert!(!summary.providers.google.is_correct);
        assert_eq!(summary.providers.google.incorrect, 1);
    }

    #[test]
    fn test_summary_display_is_readable() {
        let text = summary().to_string();
        assert!(text.starts_with("alice annotated \"hello\" in French (Created)"));
        assert!(text.contains("google: \"salut\" marked incorrect [0 correct / 1 incorrect]"));
    }

    #[test]
    fn test_summary_serialization() {
        let json = serde_json::to_value(summary()).unwrap();
        assert_eq!(json["hash"], "abc123");
        assert_eq!(json["language"], "fr");
        assert_eq!(json["outcome"], "created");
        assert_eq!(json["providers"]["yandex"]["isCorrect"], true);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();

        sink.publish(&summary()).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received, summary());
    }

    #[test]
    fn test_broadcast_without_monitors_is_ok() {
        let sink = BroadcastSink::new(8);
        assert_eq!(sink.monitor_count(), 0);
        assert!(sink.publish(&summary()).is_ok());
    }
}
