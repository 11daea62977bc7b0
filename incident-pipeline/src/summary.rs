use crate::config::FallbackPolicy;
use crate::providers::{Providers, SummaryInput};
use crate::types::{PipelineError, Result, SummaryBatchReport, SummaryProjection, SummaryRun};
use chrono::Utc;
use interfaces::state::{coerce_provider, provider_setting_value};
use interfaces::{AdvisoryStore, ProviderKind, SUMMARIZER_SETTING_KEY};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Explicit override, then the stored default, then `rule_based`.
pub fn resolve_provider(provider_override: Option<ProviderKind>, default: Option<ProviderKind>) -> ProviderKind {
    provider_override.or(default).unwrap_or_default()
}

/// Produces summary runs and keeps each incident's projection in step with its history.
///
/// The projection is always re-derived from the stored runs after an insert or delete.
/// Concurrent runs for one incident are allowed; the last projection write wins.
pub struct SummaryOrchestrator<S: AdvisoryStore + ?Sized> {
    store: Arc<S>,
    providers: Providers,
    fallback: FallbackPolicy,
}

impl<S: AdvisoryStore + ?Sized> SummaryOrchestrator<S> {
    pub fn new(store: Arc<S>, providers: Providers, fallback: FallbackPolicy) -> Self {
        Self {
            store,
            providers,
            fallback,
        }
    }

    /// Stored default provider. Unreadable or unknown values fall back to `rule_based`.
    pub async fn default_provider(&self) -> ProviderKind {
        match self.store.get_setting(SUMMARIZER_SETTING_KEY).await {
            Ok(Some(value)) => coerce_provider(&value).unwrap_or_default(),
            Ok(None) => ProviderKind::default(),
            Err(e) => {
                warn!("Failed to load summarizer preference: {}", e);
                ProviderKind::default()
            }
        }
    }

    pub async fn set_default_provider(&self, provider: ProviderKind) -> Result<()> {
        self.store
            .put_setting(SUMMARIZER_SETTING_KEY, provider_setting_value(provider))
            .await?;
        info!("Default summarizer set to {}", provider);
        Ok(())
    }

    /// Summarize one incident and record the run.
    ///
    /// `default_provider` is the caller's view of the stored preference; it is only
    /// consulted when there is no override. Precondition failures write nothing.
    pub async fn summarize(
        &self,
        incident_id: Uuid,
        provider_override: Option<ProviderKind>,
        default_provider: Option<ProviderKind>,
        triggered_by: Option<&str>,
    ) -> Result<SummaryRun> {
        let incident = self
            .store
            .get_incident(incident_id)
            .await?
            .ok_or(PipelineError::NotFound {
                entity: "incident",
                id: incident_id,
            })?;

        let raw_id = self
            .store
            .latest_source(incident_id)
            .await?
            .ok_or(PipelineError::NoSourceMaterial { incident_id })?;
        let raw = self
            .store
            .get_raw(raw_id)
            .await?
            .ok_or(PipelineError::NoSourceMaterial { incident_id })?;

        let body = raw.source_text();
        if body.is_empty() {
            return Err(PipelineError::EmptySource { incident_id, raw_id });
        }

        let title = Some(incident.title.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| raw.title.clone());
        let input = SummaryInput { title, body };

        let provider = resolve_provider(provider_override, default_provider);
        debug!("Summarizing incident {} with {}", incident_id, provider);

        let (result, fallback_from) = match self.providers.summarize(provider, &input).await {
            Ok(result) => (result, None),
            Err(e) if self.fallback == FallbackPolicy::RuleBased && provider != ProviderKind::RuleBased => {
                warn!("{}; falling back to rule_based for incident {}", e, incident_id);
                let result = self.providers.summarize(ProviderKind::RuleBased, &input).await?;
                (result, Some(provider))
            }
            Err(e) => return Err(e),
        };

        let run = SummaryRun {
            id: Uuid::new_v4(),
            incident_id,
            tl_dr: result.tl_dr,
            summary_md: result.summary_md,
            citations: result.citations,
            provider: result.provider,
            model: result.model,
            fallback_from,
            ran_at: Utc::now(),
            triggered_by: triggered_by.map(str::to_string),
        };

        self.store.insert_summary(&run).await?;
        self.refresh_projection(incident_id).await?;

        info!("Stored summary run {} for incident {} ({})", run.id, incident_id, run.provider);
        Ok(run)
    }

    /// Single-incident entry point. Errors propagate to the caller.
    pub async fn summarize_incident_now(
        &self,
        incident_id: Uuid,
        provider: Option<ProviderKind>,
        triggered_by: &str,
    ) -> Result<SummaryRun> {
        let default = self.default_provider().await;
        self.summarize(incident_id, provider, Some(default), Some(triggered_by))
            .await
    }

    /// Summarize the `limit` most recently updated incidents. One failing incident is
    /// logged and skipped.
    pub async fn run_batch(
        &self,
        limit: usize,
        provider_override: Option<ProviderKind>,
    ) -> Result<SummaryBatchReport> {
        let default = self.default_provider().await;
        let provider = resolve_provider(provider_override, Some(default));
        let incidents = self.store.recent_incidents(limit).await?;

        info!("Summarizing {} incidents with {}", incidents.len(), provider);

        let mut report = SummaryBatchReport {
            provider,
            ..Default::default()
        };

        for incident in incidents {
            match self
                .summarize(incident.id, Some(provider), Some(default), Some("pipeline"))
                .await
            {
                Ok(_) => report.changed_incident_ids.push(incident.id),
                Err(e) => {
                    warn!("Summary failed for incident {}: {}", incident.id, e);
                    report.failed_incident_ids.push(incident.id);
                }
            }
        }

        Ok(report)
    }

    /// History for an incident, newest first.
    pub async fn list_summary_runs(&self, incident_id: Uuid) -> Result<Vec<SummaryRun>> {
        Ok(self.store.list_summaries(incident_id).await?)
    }

    /// Remove a run and rewrite the projection from what remains. Returns the new latest
    /// run, if any.
    pub async fn delete_summary_run(&self, summary_id: Uuid) -> Result<Option<SummaryRun>> {
        let run = self
            .store
            .get_summary(summary_id)
            .await?
            .ok_or(PipelineError::NotFound {
                entity: "summary run",
                id: summary_id,
            })?;

        if !self.store.delete_summary(summary_id).await? {
            return Err(PipelineError::NotFound {
                entity: "summary run",
                id: summary_id,
            });
        }

        let latest = self.refresh_projection(run.incident_id).await?;
        info!("Deleted summary run {} from incident {}", summary_id, run.incident_id);
        Ok(latest)
    }

    async fn refresh_projection(&self, incident_id: Uuid) -> Result<Option<SummaryRun>> {
        let latest = self.store.list_summaries(incident_id).await?.into_iter().next();
        let projection = SummaryProjection::from_latest(latest.as_ref());
        self.store.set_projection(incident_id, &projection).await?;
        Ok(latest)
    }
}
