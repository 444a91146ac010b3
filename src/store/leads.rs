//! Lead access: dedup-by-email upserts, status transitions, visit logs.

use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::warn;

use crate::types::{Lead, LeadSource, LeadStatus, NormalizedLead, QualificationDecision};

use super::{parse_ts, ts, Store, StoreError};

/// Outcome of a lead upsert.
#[derive(Debug, Clone)]
pub struct LeadUpsert {
    /// The persisted lead after insert or merge.
    pub lead: Lead,
    /// Whether a new row was created (as opposed to merged).
    pub created: bool,
}

impl Store {
    /// Fetch a lead by id, scoped to a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such lead exists.
    pub async fn get_lead(&self, tenant_id: i64, lead_id: i64) -> Result<Lead, StoreError> {
        let row = sqlx::query("SELECT * FROM leads WHERE id = ?1 AND tenant_id = ?2")
            .bind(lead_id)
            .bind(tenant_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or(StoreError::NotFound {
                entity: "lead",
                id: lead_id,
            })?;
        lead_from_row(&row)
    }

    /// Lookup by the (tenant, email) dedup key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn find_lead_by_email(
        &self,
        tenant_id: i64,
        email: &str,
    ) -> Result<Option<Lead>, StoreError> {
        let row = sqlx::query("SELECT * FROM leads WHERE tenant_id = ?1 AND email = ?2")
            .bind(tenant_id)
            .bind(email)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(lead_from_row).transpose()
    }

    /// Insert a new lead or merge into the existing row for
    /// (tenant, email).
    ///
    /// Merge semantics: missing fields fill in from the incoming record,
    /// `source` upgrades only along the priority chain, `visit_count`
    /// increments only for pixel-sourced records, `last_seen_at` advances.
    /// A unique-violation race on insert falls back to the merge path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn upsert_lead(
        &self,
        tenant_id: i64,
        campaign_id: Option<i64>,
        record: &NormalizedLead,
        source: LeadSource,
        now: DateTime<Utc>,
    ) -> Result<LeadUpsert, StoreError> {
        let email = record.email.as_deref().unwrap_or_default();

        if let Some(existing) = self.find_lead_by_email(tenant_id, email).await? {
            let lead = self.merge_lead(&existing, record, source, now).await?;
            return Ok(LeadUpsert {
                lead,
                created: false,
            });
        }

        let first_visit = i64::from(source == LeadSource::Pixel);
        let insert = sqlx::query(
            "INSERT INTO leads (tenant_id, campaign_id, email, first_name, last_name, \
             job_title, linkedin_url, phone, company_name, company_domain, \
             company_industry, company_employee_count, company_revenue, source, \
             visit_count, first_seen_at, last_seen_at, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, 'ingested')",
        )
        .bind(tenant_id)
        .bind(campaign_id)
        .bind(email)
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(&record.job_title)
        .bind(&record.linkedin_url)
        .bind(&record.phone)
        .bind(&record.company_name)
        .bind(&record.company_domain)
        .bind(&record.company_industry)
        .bind(record.company_employee_count.map(i64::from))
        .bind(&record.company_revenue)
        .bind(source.as_str())
        .bind(first_visit)
        .bind(ts(now))
        .bind(ts(now))
        .execute(self.pool())
        .await;

        match insert {
            Ok(_) => {
                let lead = self
                    .find_lead_by_email(tenant_id, email)
                    .await?
                    .ok_or(StoreError::NotFound {
                        entity: "lead",
                        id: 0,
                    })?;
                Ok(LeadUpsert {
                    lead,
                    created: true,
                })
            }
            Err(err) if StoreError::is_unique_violation(&err) => {
                // Lost the insert race; re-read and merge instead.
                let existing = self
                    .find_lead_by_email(tenant_id, email)
                    .await?
                    .ok_or(StoreError::Conflict { entity: "lead" })?;
                let lead = self.merge_lead(&existing, record, source, now).await?;
                Ok(LeadUpsert {
                    lead,
                    created: false,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn merge_lead(
        &self,
        existing: &Lead,
        record: &NormalizedLead,
        source: LeadSource,
        now: DateTime<Utc>,
    ) -> Result<Lead, StoreError> {
        let upgraded = existing.source.upgraded(source);
        let visit_count = if source == LeadSource::Pixel {
            existing.visit_count.saturating_add(1)
        } else {
            existing.visit_count
        };

        let result = sqlx::query(
            "UPDATE leads SET \
             first_name = COALESCE(first_name, ?1), \
             last_name = COALESCE(last_name, ?2), \
             job_title = COALESCE(job_title, ?3), \
             linkedin_url = COALESCE(linkedin_url, ?4), \
             phone = COALESCE(phone, ?5), \
             company_name = COALESCE(company_name, ?6), \
             company_domain = COALESCE(company_domain, ?7), \
             company_industry = COALESCE(company_industry, ?8), \
             company_employee_count = COALESCE(company_employee_count, ?9), \
             company_revenue = COALESCE(company_revenue, ?10), \
             source = ?11, visit_count = ?12, last_seen_at = ?13, \
             version = version + 1, updated_at = ?13 \
             WHERE id = ?14 AND version = ?15",
        )
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(&record.job_title)
        .bind(&record.linkedin_url)
        .bind(&record.phone)
        .bind(&record.company_name)
        .bind(&record.company_domain)
        .bind(&record.company_industry)
        .bind(record.company_employee_count.map(i64::from))
        .bind(&record.company_revenue)
        .bind(upgraded.as_str())
        .bind(i64::from(visit_count))
        .bind(ts(now))
        .bind(existing.id)
        .bind(existing.version)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict { entity: "lead" });
        }
        self.get_lead(existing.tenant_id, existing.id).await
    }

    /// Transition a lead's status. Logs a warning (and still writes) when
    /// the transition is not in the legal successor set; the invariant is
    /// enforced by tests and surfaced operationally here.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn update_lead_status(
        &self,
        tenant_id: i64,
        lead_id: i64,
        status: LeadStatus,
    ) -> Result<(), StoreError> {
        let current = self.get_lead(tenant_id, lead_id).await?;
        if !current.status.allowed_next().contains(&status) {
            warn!(
                lead = lead_id,
                from = current.status.as_str(),
                to = status.as_str(),
                "irregular lead status transition"
            );
        }
        sqlx::query(
            "UPDATE leads SET status = ?1, version = version + 1, \
             updated_at = datetime('now') WHERE id = ?2 AND tenant_id = ?3",
        )
        .bind(status.as_str())
        .bind(lead_id)
        .bind(tenant_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Persist the qualifier's verdict.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn set_qualification(
        &self,
        tenant_id: i64,
        lead_id: i64,
        decision: QualificationDecision,
        confidence: f64,
        reasoning: &str,
        icp_fit: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE leads SET qualification_decision = ?1, qualification_confidence = ?2, \
             qualification_reasoning = ?3, icp_fit = ?4, version = version + 1, \
             updated_at = datetime('now') WHERE id = ?5 AND tenant_id = ?6",
        )
        .bind(decision.as_str())
        .bind(confidence)
        .bind(reasoning)
        .bind(icp_fit)
        .bind(lead_id)
        .bind(tenant_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Persist a computed intent score and tier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn set_intent(
        &self,
        tenant_id: i64,
        lead_id: i64,
        score: u32,
        tier: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE leads SET intent_score = ?1, intent_tier = ?2, version = version + 1, \
             updated_at = datetime('now') WHERE id = ?3 AND tenant_id = ?4",
        )
        .bind(i64::from(score))
        .bind(tier)
        .bind(lead_id)
        .bind(tenant_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Update external-system presence flags when the relationship probe
    /// observes a change.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn set_presence_flags(
        &self,
        tenant_id: i64,
        lead_id: i64,
        in_email_system: bool,
        in_linkedin_system: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE leads SET in_email_system = ?1, in_linkedin_system = ?2, \
             version = version + 1, updated_at = datetime('now') \
             WHERE id = ?3 AND tenant_id = ?4",
        )
        .bind(i64::from(in_email_system))
        .bind(i64::from(in_linkedin_system))
        .bind(lead_id)
        .bind(tenant_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Append a pixel visit row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn record_pixel_visit(
        &self,
        tenant_id: i64,
        lead_id: i64,
        page: Option<&str>,
        dwell_ms: Option<u64>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO pixel_visits (tenant_id, lead_id, page, dwell_ms, visited_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(tenant_id)
        .bind(lead_id)
        .bind(page)
        .bind(dwell_ms.map(|v| i64::try_from(v).unwrap_or(i64::MAX)))
        .bind(ts(at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Recent pixel visits for a lead, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn list_pixel_visits(
        &self,
        tenant_id: i64,
        lead_id: i64,
    ) -> Result<Vec<PixelVisit>, StoreError> {
        let rows = sqlx::query(
            "SELECT page, dwell_ms, visited_at FROM pixel_visits \
             WHERE tenant_id = ?1 AND lead_id = ?2 ORDER BY visited_at DESC",
        )
        .bind(tenant_id)
        .bind(lead_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|row| {
                Ok(PixelVisit {
                    page: row.try_get("page")?,
                    dwell_ms: row
                        .try_get::<Option<i64>, _>("dwell_ms")?
                        .and_then(|v| u64::try_from(v).ok()),
                    visited_at: parse_ts("visited_at", row.try_get("visited_at")?)?,
                })
            })
            .collect()
    }

    /// Append a generic per-lead engagement-log row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn append_engagement_log(
        &self,
        tenant_id: i64,
        lead_id: i64,
        kind: &str,
        detail: &serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO engagement_log (tenant_id, lead_id, kind, detail) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(tenant_id)
        .bind(lead_id)
        .bind(kind)
        .bind(detail.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Distinct company names of tenant leads already present in an
    /// external system, with their presence flags. Feeds the
    /// existing-relationship probe.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn list_company_presence(
        &self,
        tenant_id: i64,
    ) -> Result<Vec<CompanyPresence>, StoreError> {
        let rows = sqlx::query(
            "SELECT company_name, MAX(in_email_system) AS in_email, \
             MAX(in_linkedin_system) AS in_linkedin \
             FROM leads WHERE tenant_id = ?1 AND company_name IS NOT NULL \
             AND (in_email_system = 1 OR in_linkedin_system = 1) \
             GROUP BY company_name",
        )
        .bind(tenant_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|row| {
                Ok(CompanyPresence {
                    company_name: row.try_get("company_name")?,
                    in_email_system: row.try_get::<i64, _>("in_email")? != 0,
                    in_linkedin_system: row.try_get::<i64, _>("in_linkedin")? != 0,
                })
            })
            .collect()
    }

    /// Engagement-log kinds recorded for a lead, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn list_engagement_log_kinds(
        &self,
        tenant_id: i64,
        lead_id: i64,
    ) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT kind FROM engagement_log WHERE tenant_id = ?1 AND lead_id = ?2 ORDER BY id",
        )
        .bind(tenant_id)
        .bind(lead_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("kind").map_err(StoreError::from))
            .collect()
    }
}

/// A company already present in an external system.
#[derive(Debug, Clone)]
pub struct CompanyPresence {
    /// Stored company name.
    pub company_name: String,
    /// Present in the email delivery system.
    pub in_email_system: bool,
    /// Present in the LinkedIn automation system.
    pub in_linkedin_system: bool,
}

/// One recorded pixel visit.
#[derive(Debug, Clone)]
pub struct PixelVisit {
    /// Visited page path.
    pub page: Option<String>,
    /// Dwell time in milliseconds.
    pub dwell_ms: Option<u64>,
    /// Visit time.
    pub visited_at: DateTime<Utc>,
}

fn lead_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Lead, StoreError> {
    let source: &str = row.try_get("source")?;
    let status: &str = row.try_get("status")?;
    let decision: Option<&str> = row.try_get("qualification_decision")?;
    let visit_count: i64 = row.try_get("visit_count")?;
    let employee_count: Option<i64> = row.try_get("company_employee_count")?;
    let intent_score: Option<i64> = row.try_get("intent_score")?;
    Ok(Lead {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        campaign_id: row.try_get("campaign_id")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        job_title: row.try_get("job_title")?,
        linkedin_url: row.try_get("linkedin_url")?,
        phone: row.try_get("phone")?,
        company_name: row.try_get("company_name")?,
        company_domain: row.try_get("company_domain")?,
        company_industry: row.try_get("company_industry")?,
        company_employee_count: employee_count.and_then(|v| u32::try_from(v).ok()),
        company_revenue: row.try_get("company_revenue")?,
        source: LeadSource::parse(source)?,
        visit_count: u32::try_from(visit_count).unwrap_or(0),
        first_seen_at: parse_ts("first_seen_at", row.try_get("first_seen_at")?)?,
        last_seen_at: parse_ts("last_seen_at", row.try_get("last_seen_at")?)?,
        in_email_system: row.try_get::<i64, _>("in_email_system")? != 0,
        in_linkedin_system: row.try_get::<i64, _>("in_linkedin_system")? != 0,
        status: LeadStatus::parse(status)?,
        qualification_decision: decision.map(QualificationDecision::parse).transpose()?,
        qualification_confidence: row.try_get("qualification_confidence")?,
        qualification_reasoning: row.try_get("qualification_reasoning")?,
        icp_fit: row.try_get("icp_fit")?,
        intent_score: intent_score.and_then(|v| u32::try_from(v).ok()),
        intent_tier: row.try_get("intent_tier")?,
        version: row.try_get("version")?,
    })
}
