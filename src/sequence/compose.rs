//! Generation prompt composition and response parsing.

use serde::{Deserialize, Serialize};

use crate::qualify::llm::strip_code_fences;
use crate::research::ContextProfile;
use crate::types::{Brand, Campaign, EmailStep, IcpProfile, Lead, LinkedInStep, SequenceStrategy};

use super::timeline;

/// Messaging guidance appended to every generation prompt.
const GUIDELINES: &str = "\
## Messaging guidelines
- Every email under 120 words; connection notes under 280 characters.
- Lead with the recipient's world, not the product.
- One clear call to action per touch; vary it across the sequence.
- Reference the research trigger in the opener when one exists.

## Anti-patterns
- No \"just checking in\" or \"quick question\" openers.
- No feature dumps, no exclamation marks, no fake urgency.
- Never mention being an AI or using automation.

## Cross-channel coordination
- Email and LinkedIn must never repeat the same sentence.
- Every email step needs body_linkedin_connected and
  body_linkedin_replied variants; every LinkedIn message needs
  body_email_opened and body_email_replied variants. Variants are
  swapped at send time, so each must stand alone.
- Connection notes that use personalization variables need a
  connection_note_fallback without them.";

/// The exact response schema demanded from the generator.
const RESPONSE_SCHEMA: &str = r#"Respond with JSON only, matching exactly:
{
  "email_steps": [{
    "step_number": 1, "day": 1, "step_type": "initial",
    "subject": "...", "body": "...",
    "body_linkedin_connected": "...", "body_linkedin_replied": "...",
    "word_count": 0
  }],
  "linkedin_steps": [{
    "step_number": 1, "day": 1, "step_type": "connection_request",
    "connection_note": "...", "connection_note_fallback": "...",
    "body": "...", "body_fallback": "...",
    "body_email_opened": "...", "body_email_replied": "...",
    "requires_connection": false
  }],
  "strategy": {
    "primary_angle": "...", "cross_channel_triggers": [], "tone": "...",
    "linkedin_first": false, "wait_for_connection": false,
    "connection_timeout_hours": 0
  }
}"#;

/// Everything the composer needs for one generation call.
#[derive(Debug, Clone)]
pub struct GenerationInput<'a> {
    /// The lead.
    pub lead: &'a Lead,
    /// Research profile.
    pub profile: &'a ContextProfile,
    /// The campaign (mode, counts, custom instructions).
    pub campaign: &'a Campaign,
    /// The brand (voice, value prop).
    pub brand: &'a Brand,
    /// Effective ICP.
    pub icp: Option<&'a IcpProfile>,
    /// Concatenated fundamentals documents.
    pub fundamentals: &'a str,
    /// Evolved prompt body from the active `sequence-writer` version.
    pub prompt_body: Option<&'a str>,
    /// Revision context when re-generating.
    pub revision: Option<RevisionContext<'a>>,
}

/// Reviewer feedback carried into a revision run.
#[derive(Debug, Clone)]
pub struct RevisionContext<'a> {
    /// The reviewer's revision instructions.
    pub instructions: &'a str,
    /// The previous sequence, serialized.
    pub previous: &'a str,
}

/// The parsed generator output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedSequence {
    /// Ordered email steps.
    #[serde(default)]
    pub email_steps: Vec<EmailStep>,
    /// Ordered LinkedIn steps.
    #[serde(default)]
    pub linkedin_steps: Vec<LinkedInStep>,
    /// Generation strategy.
    #[serde(default)]
    pub strategy: SequenceStrategy,
}

/// Compose the full generation prompt.
pub fn compose_prompt(input: &GenerationInput<'_>) -> String {
    let mut prompt = String::new();

    if let Some(body) = input.prompt_body {
        prompt.push_str(body);
        prompt.push_str("\n\n");
    }

    prompt.push_str(&format!(
        "## Campaign\nMode: {}\nEmail steps: {}\nLinkedIn steps: {}\n",
        input.campaign.mode.as_str(),
        input.campaign.email_step_count,
        input.campaign.linkedin_step_count,
    ));
    if input.campaign.wait_for_connection {
        prompt.push_str(&format!(
            "Hold LinkedIn messaging until the connection is accepted (timeout {}h).\n",
            input.campaign.connection_timeout_hours
        ));
    }
    if let Some(instructions) = &input.campaign.custom_instructions {
        prompt.push_str(&format!("\n## Campaign instructions\n{instructions}\n"));
    }

    prompt.push_str(&format!(
        "\n## Brand\nVoice: {}\nValue proposition: {}\n",
        input.brand.voice.as_deref().unwrap_or("clear and direct"),
        input
            .brand
            .value_proposition
            .as_deref()
            .unwrap_or("(not provided)"),
    ));
    if !input.brand.differentiators.is_empty() {
        prompt.push_str(&format!(
            "Differentiators: {}\n",
            input.brand.differentiators.join("; ")
        ));
    }

    if let Some(icp) = input.icp {
        if !icp.personas.is_empty() {
            let personas: Vec<&str> = icp.personas.iter().map(|p| p.name.as_str()).collect();
            prompt.push_str(&format!("\n## ICP personas\n{}\n", personas.join(", ")));
        }
    }

    prompt.push_str(&format!(
        "\n## Lead\n{} {}, {} at {}\nRelationship: {}\n",
        input.lead.first_name.as_deref().unwrap_or(""),
        input.lead.last_name.as_deref().unwrap_or(""),
        input.lead.job_title.as_deref().unwrap_or("unknown role"),
        input.lead.company_name.as_deref().unwrap_or("their company"),
        input.profile.relationship.as_str(),
    ));
    for trigger in input.profile.triggers.iter().take(3) {
        prompt.push_str(&format!(
            "- Trigger: {} (confidence {:.2})\n",
            trigger.name, trigger.confidence
        ));
    }
    if !input.profile.angles.is_empty() {
        prompt.push_str(&format!(
            "Suggested angles: {}\n",
            input.profile.angles.join("; ")
        ));
    }

    if !input.fundamentals.is_empty() {
        prompt.push_str(&format!("\n## Fundamentals\n{}\n", input.fundamentals));
    }

    prompt.push_str(&format!(
        "\n## Timeline\n{}",
        timeline::render_timeline(
            input.campaign.mode,
            input.campaign.email_step_count,
            input.campaign.linkedin_step_count,
        )
    ));

    prompt.push('\n');
    prompt.push_str(GUIDELINES);

    if let Some(revision) = &input.revision {
        prompt.push_str(&format!(
            "\n\n## Revision\nThe previous draft was rejected. Apply these instructions:\n{}\n\n\
             Previous draft:\n{}\n",
            revision.instructions, revision.previous
        ));
    }

    prompt.push_str("\n\n");
    prompt.push_str(RESPONSE_SCHEMA);
    prompt
}

/// Parse the generator's JSON response.
///
/// # Errors
///
/// Returns the serde error message when the payload does not match the
/// schema; the caller decides between retry and human escalation.
pub fn parse_generated(content: &str) -> Result<GeneratedSequence, String> {
    let stripped = strip_code_fences(content);
    let mut sequence: GeneratedSequence =
        serde_json::from_str(stripped.trim()).map_err(|e| e.to_string())?;

    if sequence.email_steps.is_empty() && sequence.linkedin_steps.is_empty() {
        return Err("generator returned no steps".to_owned());
    }

    // Step numbers are authoritative for ordering; normalize gaps the
    // model sometimes leaves.
    sequence.email_steps.sort_by_key(|s| s.step_number);
    sequence.linkedin_steps.sort_by_key(|s| s.step_number);
    for (i, step) in sequence.email_steps.iter_mut().enumerate() {
        step.step_number = u32::try_from(i).unwrap_or(u32::MAX).saturating_add(1);
        if step.word_count == 0 {
            step.word_count = u32::try_from(step.body.split_whitespace().count()).unwrap_or(0);
        }
    }
    for (i, step) in sequence.linkedin_steps.iter_mut().enumerate() {
        step.step_number = u32::try_from(i).unwrap_or(u32::MAX).saturating_add(1);
    }
    Ok(sequence)
}
