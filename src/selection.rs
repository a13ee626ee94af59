//! Chooses which phrase a user annotates next.
//!
//! A draw in `[0, 100)` above 50 asks the lexical source for a fresh phrase
//! (above 75 a definition, otherwise an example sentence). Lower draws serve
//! one of the `top_k` least-annotated stored phrases, chosen uniformly. Every
//! phrase tied with the `top_k`-th lowest count is a candidate, so ties never
//! starve a phrase.
//! With an empty corpus a second draw in `[51, 100)` picks the external kind.

use crate::error::AppError;
use crate::lexicon::LexicalSource;
use crate::store::PhraseStore;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, info};

const EXTERNAL_ABOVE: u32 = 50;
const DEFINITION_ABOVE: u32 = 75;

/// Where the next phrase comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhraseSource {
    Stored,
    Definition,
    Example,
}

impl PhraseSource {
    pub fn from_draw(draw: u32) -> Self {
        if draw > DEFINITION_ABOVE {
            PhraseSource::Definition
        } else if draw > EXTERNAL_ABOVE {
            PhraseSource::Example
        } else {
            PhraseSource::Stored
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPhrase {
    pub text: String,
    /// The phrase came from the lexical source and may not be stored yet
    pub is_new_external: bool,
}

#[derive(Clone)]
pub struct PhraseSelector {
    store: Arc<dyn PhraseStore>,
    lexicon: Arc<dyn LexicalSource>,
    top_k: usize,
}

impl PhraseSelector {
    pub fn new(store: Arc<dyn PhraseStore>, lexicon: Arc<dyn LexicalSource>, top_k: usize) -> Self {
        Self {
            store,
            lexicon,
            top_k: top_k.max(1),
        }
    }

    pub async fn select_phrase(&self) -> Result<SelectedPhrase, AppError> {
        let mut rng = StdRng::from_entropy();
        self.select_phrase_with(&mut rng).await
    }

    /// Read-only: nothing is persisted until translations are attached.
    pub async fn select_phrase_with<R: Rng + Send>(
        &self,
        rng: &mut R,
    ) -> Result<SelectedPhrase, AppError> {
        let mut source = PhraseSource::from_draw(rng.gen_range(0..100));

        if source == PhraseSource::Stored {
            let candidates = if self.store.phrase_count().await? == 0 {
                Vec::new()
            } else {
                self.store.least_annotated(self.top_k).await?
            };

            if let Some(chosen) = candidates.choose(rng) {
                debug!(
                    "Serving stored phrase {} ({} annotations) from {} candidates",
                    chosen.identity,
                    chosen.annotation_count,
                    candidates.len()
                );
                return Ok(SelectedPhrase {
                    text: chosen.phrase.clone(),
                    is_new_external: false,
                });
            }

            source = PhraseSource::from_draw(rng.gen_range(EXTERNAL_ABOVE + 1..100));
            info!("Phrase corpus is empty, falling back to the lexical source");
        }

        let text = match source {
            PhraseSource::Definition => self.lexicon.random_definition().await,
            _ => self.lexicon.random_example().await,
        }
        .map_err(AppError::Upstream)?;

        debug!("Serving external phrase ({:?}): {}", source, text);
        Ok(SelectedPhrase {
            text,
            is_new_external: true,
        })
    }
}
