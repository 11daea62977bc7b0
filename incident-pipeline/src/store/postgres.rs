use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use interfaces::{
    AdvisoryStore, Incident, NewRawDocument, ProviderKind, RawDocument, SummaryProjection, SummaryRun,
};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Pool, Postgres, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Postgres error code for an unknown column.
const UNDEFINED_COLUMN: &str = "42703";

const RAW_COLUMNS: &str = "id, url, source, fetched_at, title, body_markdown, content_hash, metadata";

const INCIDENT_COLUMNS: &str = "id, canonical_key, title, kev, cvss_base, last_summarized_at, \
     last_summary_provider, last_summary_model, updated_at";

const SUMMARY_COLUMNS: &str =
    "id, incident_id, tl_dr, summary_md, citations, provider, model, fallback_from, ran_at, triggered_by";

pub struct PgStore {
    db: Pool<Postgres>,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db = PgPool::connect(database_url)
            .await
            .context("connecting to Postgres")?;
        Ok(Self { db })
    }

    pub fn from_pool(db: PgPool) -> Self {
        Self { db }
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("running migrations")?;
        info!("Database migrations applied");
        Ok(())
    }

    async fn latest_source_by(&self, incident_id: Uuid, order: &str) -> sqlx::Result<Option<Uuid>> {
        let query = format!(
            "SELECT raw_id FROM incident_sources WHERE incident_id = $1 ORDER BY {} LIMIT 1",
            order
        );
        let row = sqlx::query(&query)
            .bind(incident_id)
            .fetch_optional(&self.db)
            .await?;
        row.map(|r| r.try_get("raw_id")).transpose()
    }
}

fn parse_provider(value: Option<String>) -> Option<ProviderKind> {
    value.and_then(|s| match s.parse() {
        Ok(kind) => Some(kind),
        Err(e) => {
            warn!("Ignoring stored provider: {}", e);
            None
        }
    })
}

fn raw_from_row(row: &PgRow) -> Result<RawDocument> {
    let metadata = match row.try_get::<Value, _>("metadata")? {
        Value::Object(map) => map,
        _ => Default::default(),
    };
    Ok(RawDocument {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        source: row.try_get("source")?,
        fetched_at: row.try_get("fetched_at")?,
        title: row.try_get("title")?,
        body_text: row.try_get("body_markdown")?,
        content_hash: row.try_get("content_hash")?,
        metadata,
    })
}

fn incident_from_row(row: &PgRow) -> Result<Incident> {
    Ok(Incident {
        id: row.try_get("id")?,
        canonical_key: row.try_get("canonical_key")?,
        title: row.try_get("title")?,
        kev: row.try_get("kev")?,
        cvss_base: row.try_get("cvss_base")?,
        last_summarized_at: row.try_get("last_summarized_at")?,
        last_summary_provider: parse_provider(row.try_get("last_summary_provider")?),
        last_summary_model: row.try_get("last_summary_model")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn summary_from_row(row: &PgRow) -> Result<SummaryRun> {
    let provider: String = row.try_get("provider")?;
    Ok(SummaryRun {
        id: row.try_get("id")?,
        incident_id: row.try_get("incident_id")?,
        tl_dr: row.try_get("tl_dr")?,
        summary_md: row.try_get("summary_md")?,
        citations: row.try_get("citations")?,
        provider: provider.parse().map_err(|e| anyhow!("summary row: {}", e))?,
        model: row.try_get("model")?,
        fallback_from: parse_provider(row.try_get("fallback_from")?),
        ran_at: row.try_get("ran_at")?,
        triggered_by: row.try_get("triggered_by")?,
    })
}

#[async_trait]
impl AdvisoryStore for PgStore {
    async fn find_raw_by_hash(&self, content_hash: &str) -> Result<Option<RawDocument>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM raw_items WHERE content_hash = $1",
            RAW_COLUMNS
        ))
        .bind(content_hash)
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(raw_from_row).transpose()
    }

    async fn upsert_raw(&self, doc: NewRawDocument) -> Result<RawDocument> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO raw_items (id, url, source, fetched_at, title, body_markdown, content_hash, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (content_hash)
            DO UPDATE SET metadata = raw_items.metadata || EXCLUDED.metadata
            RETURNING {}
            "#,
            RAW_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&doc.url)
        .bind(&doc.source)
        .bind(doc.fetched_at)
        .bind(&doc.title)
        .bind(&doc.body_text)
        .bind(&doc.content_hash)
        .bind(Value::Object(doc.metadata))
        .fetch_one(&self.db)
        .await?;

        let raw = raw_from_row(&row)?;
        debug!("Upserted raw item {} ({})", raw.id, raw.content_hash);
        Ok(raw)
    }

    async fn get_raw(&self, id: Uuid) -> Result<Option<RawDocument>> {
        let row = sqlx::query(&format!("SELECT {} FROM raw_items WHERE id = $1", RAW_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(raw_from_row).transpose()
    }

    async fn find_or_create_incident(&self, canonical_key: &str, title: &str) -> Result<Incident> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO incidents (id, canonical_key, title, kev, updated_at)
            VALUES ($1, $2, $3, false, now())
            ON CONFLICT (canonical_key)
            DO UPDATE SET updated_at = now(),
                title = CASE WHEN incidents.title = '' THEN EXCLUDED.title ELSE incidents.title END
            RETURNING {}
            "#,
            INCIDENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(canonical_key)
        .bind(title)
        .fetch_one(&self.db)
        .await?;
        incident_from_row(&row)
    }

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>> {
        let row = sqlx::query(&format!("SELECT {} FROM incidents WHERE id = $1", INCIDENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(incident_from_row).transpose()
    }

    async fn recent_incidents(&self, limit: usize) -> Result<Vec<Incident>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM incidents ORDER BY updated_at DESC LIMIT $1",
            INCIDENT_COLUMNS
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(incident_from_row).collect()
    }

    async fn link_source(&self, incident_id: Uuid, raw_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO incident_sources (incident_id, raw_id)
            VALUES ($1, $2)
            ON CONFLICT (incident_id, raw_id) DO NOTHING
            "#,
        )
        .bind(incident_id)
        .bind(raw_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn is_raw_linked(&self, raw_id: Uuid) -> Result<bool> {
        let linked: bool =
            sqlx::query("SELECT EXISTS (SELECT 1 FROM incident_sources WHERE raw_id = $1) AS linked")
                .bind(raw_id)
                .fetch_one(&self.db)
                .await?
                .try_get("linked")?;
        Ok(linked)
    }

    async fn latest_source(&self, incident_id: Uuid) -> Result<Option<Uuid>> {
        match self.latest_source_by(incident_id, "created_at DESC").await {
            Ok(raw_id) => Ok(raw_id),
            // Older schemas have no created_at on the link table.
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNDEFINED_COLUMN) => {
                warn!("incident_sources.created_at missing; ordering by raw_id");
                Ok(self.latest_source_by(incident_id, "raw_id DESC").await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_summary(&self, run: &SummaryRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO summaries (id, incident_id, tl_dr, summary_md, citations, provider, model,
                                   fallback_from, ran_at, triggered_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(run.id)
        .bind(run.incident_id)
        .bind(&run.tl_dr)
        .bind(&run.summary_md)
        .bind(&run.citations)
        .bind(run.provider.as_str())
        .bind(&run.model)
        .bind(run.fallback_from.map(|p| p.as_str()))
        .bind(run.ran_at)
        .bind(&run.triggered_by)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn get_summary(&self, id: Uuid) -> Result<Option<SummaryRun>> {
        let row = sqlx::query(&format!("SELECT {} FROM summaries WHERE id = $1", SUMMARY_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(summary_from_row).transpose()
    }

    async fn list_summaries(&self, incident_id: Uuid) -> Result<Vec<SummaryRun>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM summaries WHERE incident_id = $1 ORDER BY ran_at DESC, seq DESC",
            SUMMARY_COLUMNS
        ))
        .bind(incident_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(summary_from_row).collect()
    }

    async fn delete_summary(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM summaries WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_projection(&self, incident_id: Uuid, projection: &SummaryProjection) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE incidents
            SET last_summarized_at = $1, last_summary_provider = $2, last_summary_model = $3
            WHERE id = $4
            "#,
        )
        .bind(projection.last_summarized_at)
        .bind(projection.provider.map(|p| p.as_str()))
        .bind(&projection.model)
        .bind(incident_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(|r| r.try_get::<Value, _>("value")).transpose()?)
    }

    async fn put_setting(&self, key: &str, value: Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
