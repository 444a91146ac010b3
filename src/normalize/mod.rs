//! Source-dispatched lead normalization.
//!
//! `normalize` maps heterogeneous source records into the one canonical
//! [`NormalizedLead`] shape. Deterministic and idempotent: feeding a
//! normalized record back through produces the same result. Missing
//! required fields log a warning; nothing here throws.

use serde_json::Value;
use tracing::warn;

use crate::types::{LeadSource, NormalizedLead};

/// Normalize one raw source record.
pub fn normalize(raw: &Value, source: LeadSource) -> NormalizedLead {
    let mut lead = NormalizedLead {
        email: string_field(raw, &["email", "Email", "contact_email"]),
        first_name: string_field(raw, &["first_name", "firstName", "First Name"]),
        last_name: string_field(raw, &["last_name", "lastName", "Last Name"]),
        job_title: string_field(raw, &["job_title", "title", "jobTitle"]),
        linkedin_url: string_field(raw, &["linkedin_url", "linkedin", "profile_url"]),
        phone: string_field(raw, &["phone", "phone_number"]),
        company_name: string_field(raw, &["company_name", "company", "organization_name"]),
        company_domain: string_field(raw, &["company_domain", "domain", "website"]),
        company_industry: string_field(
            raw,
            &["company_industry", "industry", "organization_industry"],
        ),
        company_employee_count: employee_field(
            raw,
            &[
                "company_employee_count",
                "employee_count",
                "employees",
                "estimated_num_employees",
            ],
        ),
        company_revenue: string_field(raw, &["company_revenue", "revenue", "annual_revenue"])
            .and_then(|v| normalize_revenue(&v)),
        page: string_field(raw, &["page", "page_url", "path"]),
        dwell_ms: raw
            .get("dwell_ms")
            .or_else(|| raw.get("time_on_page"))
            .and_then(Value::as_u64),
        site_event: string_field(raw, &["site_event", "event"]),
        source: Some(source),
    };

    // Apollo records carry a combined name when the split fields are
    // absent.
    if source == LeadSource::Apollo && lead.first_name.is_none() {
        if let Some(name) = string_field(raw, &["name"]) {
            let mut parts = name.splitn(2, ' ');
            lead.first_name = parts.next().map(str::to_owned);
            lead.last_name = lead.last_name.or_else(|| parts.next().map(str::to_owned));
        }
    }

    if !lead.has_required_fields() {
        warn!(
            source = source.as_str(),
            has_email = lead.email.is_some(),
            has_company = lead.company_name.is_some(),
            "normalized record is missing required fields"
        );
    }
    lead
}

/// First non-empty string under any of the candidate keys.
fn string_field(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        raw.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    })
}

fn employee_field(raw: &Value, keys: &[&str]) -> Option<u32> {
    keys.iter().find_map(|key| {
        let value = raw.get(key)?;
        if let Some(n) = value.as_u64() {
            return u32::try_from(n).ok();
        }
        value.as_str().and_then(parse_employee_count)
    })
}

/// Parse an employee count from free text: plain numbers, "50-100"
/// ranges (midpoint), and "1.2k"-style suffixes.
pub fn parse_employee_count(raw: &str) -> Option<u32> {
    let cleaned = raw.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }

    if let Some((low, high)) = cleaned.split_once('-') {
        let low = parse_count_token(low)?;
        let high = parse_count_token(high)?;
        return Some(low.midpoint(high));
    }
    parse_count_token(&cleaned)
}

fn parse_count_token(token: &str) -> Option<u32> {
    let token = token.trim().trim_end_matches('+');
    if token.is_empty() {
        return None;
    }
    let lower = token.to_lowercase();
    let (digits, multiplier) = if let Some(stripped) = lower.strip_suffix('k') {
        (stripped, 1_000.0)
    } else if let Some(stripped) = lower.strip_suffix('m') {
        (stripped, 1_000_000.0)
    } else {
        (lower.as_str(), 1.0)
    };
    let value: f64 = digits.trim().parse().ok()?;
    let scaled = value * multiplier;
    if !(0.0..=f64::from(u32::MAX)).contains(&scaled) {
        return None;
    }
    // Bounds checked above.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rounded = scaled.round() as u32;
    Some(rounded)
}

/// Normalize a revenue string into canonical `$NNK|M|B` form.
/// Range inputs ("$10M-$50M") collapse to their midpoint. Returns `None`
/// for unparseable input.
pub fn normalize_revenue(raw: &str) -> Option<String> {
    let millions = crate::scoring::parse_revenue_millions(raw)?;
    Some(format_revenue(millions))
}

fn format_revenue(millions: f64) -> String {
    if millions >= 1000.0 {
        let billions = millions / 1000.0;
        return format!("${}B", trim_number(billions));
    }
    if millions >= 1.0 {
        return format!("${}M", trim_number(millions));
    }
    let thousands = millions * 1000.0;
    format!("${}K", trim_number(thousands))
}

fn trim_number(value: f64) -> String {
    if (value - value.round()).abs() < 0.05 {
        format!("{}", value.round())
    } else {
        format!("{value:.1}")
    }
}
