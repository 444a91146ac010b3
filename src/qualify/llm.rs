//! The LLM qualifier: prompt rendering and verdict parsing.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::store::rag::RagDocument;
use crate::types::{Lead, QualificationDecision, Tenant};

/// System prompt for the qualifier call.
pub const QUALIFIER_SYSTEM: &str = "You are a B2B lead qualification analyst. Judge whether the \
lead fits the ideal customer profile. Respond with JSON only: \
{\"decision\": \"YES\"|\"NO\"|\"REVIEW\", \"confidence\": 0.0-1.0, \
\"reasoning\": string, \"icp_fit\": string}";

/// Parsed (and policy-coerced) qualifier verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualificationVerdict {
    /// YES / NO / REVIEW after coercion.
    pub decision: QualificationDecision,
    /// Confidence in [0,1].
    pub confidence: f64,
    /// Reasoning text.
    pub reasoning: String,
    /// ICP-fit summary.
    pub icp_fit: Option<String>,
}

/// Render the qualifier prompt over the lead, its signals, and the ICP.
pub fn build_qualifier_prompt(
    lead: &Lead,
    tenant: &Tenant,
    docs: &[RagDocument],
    intent_total: u32,
    intent_tier: &str,
) -> String {
    let mut prompt = String::new();

    prompt.push_str("## Lead\n");
    prompt.push_str(&format!(
        "Name: {} {}\nTitle: {}\nCompany: {} ({})\nEmployees: {}\nRevenue: {}\n",
        lead.first_name.as_deref().unwrap_or("?"),
        lead.last_name.as_deref().unwrap_or("?"),
        lead.job_title.as_deref().unwrap_or("unknown"),
        lead.company_name.as_deref().unwrap_or("unknown"),
        lead.company_industry.as_deref().unwrap_or("unknown industry"),
        lead.company_employee_count
            .map_or_else(|| "unknown".to_owned(), |n| n.to_string()),
        lead.company_revenue.as_deref().unwrap_or("unknown"),
    ));

    prompt.push_str(&format!(
        "\n## Signals\nVisits: {}\nIntent score: {intent_total} ({intent_tier})\n",
        lead.visit_count,
    ));
    if lead.in_email_system || lead.in_linkedin_system {
        prompt.push_str("Existing relationship: the company already appears in our outreach systems.\n");
    }

    if let Some(icp) = &tenant.icp {
        prompt.push_str("\n## Account criteria\n");
        for criterion in &icp.account_criteria {
            prompt.push_str(&format!(
                "- {} ({}): {}\n",
                criterion.field,
                criterion.priority,
                criterion.values.join(", ")
            ));
        }
        if !icp.disqualifiers.is_empty() {
            prompt.push_str("\n## Disqualifiers\n");
            for rule in &icp.disqualifiers {
                prompt.push_str(&format!("- {rule}\n"));
            }
        }
    }

    if !docs.is_empty() {
        prompt.push_str("\n## ICP context\n");
        for doc in docs {
            prompt.push_str(&format!("### {}\n{}\n", doc.title, doc.content));
        }
    }

    prompt.push_str("\nRespond with the JSON verdict only.");
    prompt
}

/// Parse the qualifier's JSON verdict.
///
/// Code fences are stripped first. A parse failure is terminal for the
/// call and coerces to REVIEW at confidence 0.5; a parsed verdict with
/// confidence below 0.5 coerces the decision to NO.
pub fn parse_qualification(content: &str) -> QualificationVerdict {
    let stripped = strip_code_fences(content);
    let parsed: Option<Value> = serde_json::from_str(stripped.trim()).ok();

    let Some(parsed) = parsed else {
        warn!("qualifier returned unparseable JSON; coercing to REVIEW");
        return QualificationVerdict {
            decision: QualificationDecision::Review,
            confidence: 0.5,
            reasoning: "qualifier response was not valid JSON".to_owned(),
            icp_fit: None,
        };
    };

    let decision = parsed
        .get("decision")
        .and_then(Value::as_str)
        .and_then(|s| QualificationDecision::parse(s).ok())
        .unwrap_or(QualificationDecision::Review);
    let confidence = parsed
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);
    let reasoning = parsed
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or("no reasoning provided")
        .to_owned();
    let icp_fit = parsed
        .get("icp_fit")
        .and_then(Value::as_str)
        .map(str::to_owned);

    // Low-confidence YES/REVIEW is unsafe to deploy.
    let decision = if confidence < 0.5 {
        QualificationDecision::No
    } else {
        decision
    };

    QualificationVerdict {
        decision,
        confidence,
        reasoning,
        icp_fit,
    }
}

/// Drop markdown code fences around a JSON payload.
pub fn strip_code_fences(content: &str) -> String {
    let fence = Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```")
        .ok()
        .and_then(|re| {
            re.captures(content)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_owned())
        });
    fence.unwrap_or_else(|| content.to_owned())
}
