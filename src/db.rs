use crate::engine::{plan_vote, VoteReceipt};
use crate::i18n::Language;
use crate::model::{
    Judgements, LanguageRecords, LedgerEntry, PhraseHeader, Provider, ProviderRecord, ProviderSet,
    SourcePhrase,
};
use crate::security::IssuedToken;
use crate::store::{Account, AccountStore, Attachment, PhraseStore, StoreError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::BTreeMap;
use tracing::info;

/// (provider, translation, correct, incorrect)
type TranslationRow = (String, String, i64, i64);

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL and create tables
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        let db = Self { pool };
        db.create_tables().await?;
        info!("Database schema ready");

        Ok(db)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS phrases (
                identity TEXT PRIMARY KEY,
                phrase TEXT NOT NULL,
                annotation_count BIGINT NOT NULL DEFAULT 0 CHECK (annotation_count >= 0),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create phrases table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_phrases_annotation_count
             ON phrases (annotation_count)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create annotation count index")?;

        // One row per (phrase, language, provider)
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS phrase_translations (
                identity TEXT NOT NULL REFERENCES phrases (identity),
                language TEXT NOT NULL,
                provider TEXT NOT NULL,
                translation TEXT NOT NULL,
                correct BIGINT NOT NULL DEFAULT 0 CHECK (correct >= 0),
                incorrect BIGINT NOT NULL DEFAULT 0 CHECK (incorrect >= 0),
                PRIMARY KEY (identity, language, provider)
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create phrase_translations table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                is_admin BOOLEAN NOT NULL DEFAULT FALSE,
                access_token TEXT NOT NULL,
                access_expires_at TIMESTAMPTZ NOT NULL,
                refresh_token TEXT NOT NULL,
                refresh_expires_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create users table")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_votes (
                username TEXT NOT NULL REFERENCES users (username),
                identity TEXT NOT NULL REFERENCES phrases (identity),
                language TEXT NOT NULL,
                azure BOOLEAN NOT NULL,
                google BOOLEAN NOT NULL,
                yandex BOOLEAN NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (username, identity, language)
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create user_votes table")?;

        Ok(())
    }
}

fn duplicate_or_database(err: sqlx::Error, what: String) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StoreError::DuplicateKey(what)
        }
        _ => StoreError::Database(err),
    }
}

fn to_count(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::Inconsistent(format!("negative vote counter {}", value)))
}

/// Assemble one language's records from its three provider rows.
fn records_from_rows(rows: Vec<TranslationRow>) -> Result<LanguageRecords, StoreError> {
    let mut found: ProviderSet<Option<ProviderRecord>> = ProviderSet::default();

    for (provider, translation, correct, incorrect) in rows {
        let provider: Provider = provider
            .parse()
            .map_err(|e: anyhow::Error| StoreError::Inconsistent(e.to_string()))?;
        *found.get_mut(provider) = Some(ProviderRecord {
            translation,
            correct: to_count(correct)?,
            incorrect: to_count(incorrect)?,
        });
    }

    let missing: Vec<_> = found
        .iter()
        .filter(|(_, record)| record.is_none())
        .map(|(provider, _)| provider.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(StoreError::Inconsistent(format!(
            "missing translation rows for {}",
            missing.join(", ")
        )));
    }

    Ok(ProviderSet {
        azure: found.azure.unwrap_or_else(|| ProviderRecord::new("")),
        google: found.google.unwrap_or_else(|| ProviderRecord::new("")),
        yandex: found.yandex.unwrap_or_else(|| ProviderRecord::new("")),
    })
}

fn parse_language(code: &str) -> Result<Language, StoreError> {
    Language::from_code(code).map_err(|e| StoreError::Inconsistent(e.to_string()))
}

fn header_from_row(
    (identity, phrase, annotation_count): (String, String, i64),
) -> Result<PhraseHeader, StoreError> {
    Ok(PhraseHeader {
        identity,
        phrase,
        annotation_count: to_count(annotation_count)?,
    })
}

#[async_trait]
impl PhraseStore for Database {
    async fn find_phrase(&self, identity: &str) -> Result<Option<SourcePhrase>, StoreError> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT phrase, annotation_count FROM phrases WHERE identity = $1")
                .bind(identity)
                .fetch_optional(&self.pool)
                .await?;

        let Some((phrase, annotation_count)) = row else {
            return Ok(None);
        };

        let rows: Vec<(String, String, String, i64, i64)> = sqlx::query_as(
            "SELECT language, provider, translation, correct, incorrect
             FROM phrase_translations
             WHERE identity = $1
             ORDER BY language, provider",
        )
        .bind(identity)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: BTreeMap<String, Vec<TranslationRow>> = BTreeMap::new();
        for (language, provider, translation, correct, incorrect) in rows {
            grouped
                .entry(language)
                .or_default()
                .push((provider, translation, correct, incorrect));
        }

        let mut translations = BTreeMap::new();
        for (code, rows) in grouped {
            translations.insert(parse_language(&code)?, records_from_rows(rows)?);
        }

        Ok(Some(SourcePhrase {
            phrase,
            identity: identity.to_string(),
            annotation_count: to_count(annotation_count)?,
            translations,
        }))
    }

    async fn insert_phrase(&self, phrase: &SourcePhrase) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO phrases (identity, phrase, annotation_count) VALUES ($1, $2, $3)",
        )
        .bind(&phrase.identity)
        .bind(&phrase.phrase)
        .bind(phrase.annotation_count as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            duplicate_or_database(e, format!("Phrase {} already exists", phrase.identity))
        })?;

        Ok(())
    }

    async fn attach_language(
        &self,
        identity: &str,
        language: Language,
        texts: &ProviderSet<String>,
    ) -> Result<Attachment, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Attachments for one phrase serialize on its row
        let exists: Option<(String,)> =
            sqlx::query_as("SELECT identity FROM phrases WHERE identity = $1 FOR UPDATE")
                .bind(identity)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!("Unknown phrase {}", identity)));
        }

        let mut inserted = 0;
        for (provider, text) in texts.iter() {
            inserted += sqlx::query(
                "INSERT INTO phrase_translations (identity, language, provider, translation)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (identity, language, provider) DO NOTHING",
            )
            .bind(identity)
            .bind(language.code())
            .bind(provider.as_str())
            .bind(text)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;

        match inserted {
            0 => Ok(Attachment::AlreadyPresent),
            3 => Ok(Attachment::Attached),
            n => Err(StoreError::Inconsistent(format!(
                "phrase {} had {} of 3 provider rows for {}",
                identity,
                3 - n,
                language
            ))),
        }
    }

    async fn reconcile_vote(
        &self,
        username: &str,
        identity: &str,
        language: Language,
        judgements: &Judgements,
    ) -> Result<VoteReceipt, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Locking the three counter rows serializes votes per (phrase, language)
        let rows: Vec<TranslationRow> = sqlx::query_as(
            "SELECT provider, translation, correct, incorrect
             FROM phrase_translations
             WHERE identity = $1 AND language = $2
             ORDER BY provider
             FOR UPDATE",
        )
        .bind(identity)
        .bind(language.code())
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            return Err(StoreError::NotFound(format!(
                "Phrase {} has no {} translations",
                identity, language
            )));
        }
        let records = records_from_rows(rows)?;

        let prior: Option<(bool, bool, bool)> = sqlx::query_as(
            "SELECT azure, google, yandex FROM user_votes
             WHERE username = $1 AND identity = $2 AND language = $3",
        )
        .bind(username)
        .bind(identity)
        .bind(language.code())
        .fetch_optional(&mut *tx)
        .await?;
        let prior = prior.map(|(azure, google, yandex)| ProviderSet {
            azure,
            google,
            yandex,
        });

        let plan = plan_vote(prior.as_ref(), judgements);
        let updated = plan.applied(&records)?;

        for (provider, delta) in plan.deltas().iter() {
            if delta.is_zero() {
                continue;
            }
            let record = updated.get(provider);
            sqlx::query(
                "UPDATE phrase_translations SET correct = $1, incorrect = $2
                 WHERE identity = $3 AND language = $4 AND provider = $5",
            )
            .bind(record.correct as i64)
            .bind(record.incorrect as i64)
            .bind(identity)
            .bind(language.code())
            .bind(provider.as_str())
            .execute(&mut *tx)
            .await?;
        }

        if plan.writes_ledger() {
            sqlx::query(
                "INSERT INTO user_votes
                    (username, identity, language, azure, google, yandex, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, NOW())
                 ON CONFLICT (username, identity, language) DO UPDATE SET
                    azure = EXCLUDED.azure,
                    google = EXCLUDED.google,
                    yandex = EXCLUDED.yandex,
                    updated_at = NOW()",
            )
            .bind(username)
            .bind(identity)
            .bind(language.code())
            .bind(judgements.azure)
            .bind(judgements.google)
            .bind(judgements.yandex)
            .execute(&mut *tx)
            .await?;
        }

        let increment = plan.annotation_increment();
        let (phrase,): (String,) = if increment > 0 {
            sqlx::query_as(
                "UPDATE phrases SET annotation_count = annotation_count + $1
                 WHERE identity = $2
                 RETURNING phrase",
            )
            .bind(increment as i64)
            .bind(identity)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query_as("SELECT phrase FROM phrases WHERE identity = $1")
                .bind(identity)
                .fetch_one(&mut *tx)
                .await?
        };

        tx.commit().await?;

        Ok(VoteReceipt {
            outcome: plan.outcome(),
            phrase,
            records: updated,
        })
    }

    async fn phrase_count(&self) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM phrases")
            .fetch_one(&self.pool)
            .await?;
        to_count(count)
    }

    async fn least_annotated(&self, k: usize) -> Result<Vec<PhraseHeader>, StoreError> {
        // The k-th lowest count, or the highest when fewer than k phrases exist
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT identity, phrase, annotation_count FROM phrases
             WHERE annotation_count <= COALESCE(
                 (SELECT annotation_count FROM phrases
                  ORDER BY annotation_count ASC
                  OFFSET $1 LIMIT 1),
                 (SELECT MAX(annotation_count) FROM phrases))
             ORDER BY annotation_count ASC, identity ASC",
        )
        .bind(k.max(1) as i64 - 1)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(header_from_row).collect()
    }

    async fn list_phrases(&self, limit: usize) -> Result<Vec<PhraseHeader>, StoreError> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT identity, phrase, annotation_count FROM phrases
             ORDER BY identity ASC
             LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(header_from_row).collect()
    }

    async fn user_ledger(&self, username: &str) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows: Vec<(String, String, bool, bool, bool)> = sqlx::query_as(
            "SELECT identity, language, azure, google, yandex FROM user_votes
             WHERE username = $1
             ORDER BY identity, language",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(identity, language, azure, google, yandex)| {
                Ok(LedgerEntry {
                    identity,
                    language: parse_language(&language)?,
                    judgements: ProviderSet {
                        azure,
                        google,
                        yandex,
                    },
                })
            })
            .collect()
    }
}

type AccountRow = (String, String, bool, String, DateTime<Utc>, String, DateTime<Utc>);

fn account_from_row(
    (username, password_hash, is_admin, access, access_exp, refresh, refresh_exp): AccountRow,
) -> Account {
    Account {
        username,
        password_hash,
        is_admin,
        access_token: IssuedToken {
            token: access,
            expiration: access_exp,
        },
        refresh_token: IssuedToken {
            token: refresh,
            expiration: refresh_exp,
        },
    }
}

#[async_trait]
impl AccountStore for Database {
    async fn create_account(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (username, password_hash, is_admin,
                                access_token, access_expires_at,
                                refresh_token, refresh_expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&account.username)
        .bind(&account.password_hash)
        .bind(account.is_admin)
        .bind(&account.access_token.token)
        .bind(account.access_token.expiration)
        .bind(&account.refresh_token.token)
        .bind(account.refresh_token.expiration)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            duplicate_or_database(e, format!("User {} already exists", account.username))
        })?;

        Ok(())
    }

    async fn find_account(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(
            "SELECT username, password_hash, is_admin,
                    access_token, access_expires_at,
                    refresh_token, refresh_expires_at
             FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(account_from_row))
    }

    async fn update_tokens(
        &self,
        username: &str,
        access_token: &IssuedToken,
        refresh_token: Option<&IssuedToken>,
    ) -> Result<(), StoreError> {
        let result = match refresh_token {
            Some(refresh_token) => {
                sqlx::query(
                    "UPDATE users SET access_token = $1, access_expires_at = $2,
                                      refresh_token = $3, refresh_expires_at = $4
                     WHERE username = $5",
                )
                .bind(&access_token.token)
                .bind(access_token.expiration)
                .bind(&refresh_token.token)
                .bind(refresh_token.expiration)
                .bind(username)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE users SET access_token = $1, access_expires_at = $2
                     WHERE username = $3",
                )
                .bind(&access_token.token)
                .bind(access_token.expiration)
                .bind(username)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Unknown user {}", username)));
        }
        Ok(())
    }
}
