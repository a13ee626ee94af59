use anyhow::Result;
use phrase_annotator::config::Config;
use phrase_annotator::db::Database;
use phrase_annotator::i18n::LanguageRegistry;
use phrase_annotator::lexicon::WordsApiClient;
use phrase_annotator::memory::MemoryStore;
use phrase_annotator::server::{self, AppState};
use phrase_annotator::store::{AccountStore, PhraseStore};
use phrase_annotator::translation::Translator;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("phrase_annotator=info".parse()?),
        )
        .init();

    let config = Config::from_env()?;
    info!(
        "Starting phrase annotation server ({}) with {} target languages",
        config.environment,
        LanguageRegistry::get().targets().len()
    );

    let (phrases, accounts): (Arc<dyn PhraseStore>, Arc<dyn AccountStore>) =
        match &config.database_url {
            Some(url) => {
                let db = Arc::new(Database::new(url).await?);
                (db.clone() as Arc<dyn PhraseStore>, db as Arc<dyn AccountStore>)
            }
            None => {
                if config.is_production() {
                    anyhow::bail!("DATABASE_URL must be set in production");
                }
                warn!("DATABASE_URL not set, using in-memory storage (data is lost on exit)");
                let store = Arc::new(MemoryStore::new());
                (store.clone() as Arc<dyn PhraseStore>, store as Arc<dyn AccountStore>)
            }
        };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()?;
    let translator = Translator::from_config(&config, client.clone());
    let lexicon = Arc::new(WordsApiClient::new(
        client,
        &config.words_api_url,
        &config.words_api_key,
    ));

    let state = AppState::new(&config, phrases, accounts, translator, lexicon);
    server::run(&config, state).await?;

    info!("Server stopped");
    Ok(())
}
