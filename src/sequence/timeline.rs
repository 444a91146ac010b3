//! Default step calendars per campaign mode.

use crate::types::{CampaignMode, EmailStepType, LinkedInStepType};

/// Email-only default calendar.
const EMAIL_DAYS: &[(u32, EmailStepType)] = &[
    (1, EmailStepType::Initial),
    (3, EmailStepType::ValueAdd),
    (5, EmailStepType::Bump),
    (7, EmailStepType::CaseStudy),
    (12, EmailStepType::ValueAdd),
    (15, EmailStepType::Referral),
    (21, EmailStepType::Bump),
];

/// Multi-channel email days differ from email-only in the back half.
const MULTI_EMAIL_DAYS: &[(u32, EmailStepType)] = &[
    (1, EmailStepType::Initial),
    (3, EmailStepType::ValueAdd),
    (5, EmailStepType::Bump),
    (12, EmailStepType::CaseStudy),
    (15, EmailStepType::ValueAdd),
    (18, EmailStepType::Bump),
    (21, EmailStepType::Referral),
];

/// LinkedIn-only default calendar.
const LINKEDIN_DAYS: &[(u32, LinkedInStepType, bool)] = &[
    (1, LinkedInStepType::ConnectionRequest, false),
    (3, LinkedInStepType::Message, true),
    (7, LinkedInStepType::Message, true),
    (14, LinkedInStepType::Message, true),
];

/// Multi-channel LinkedIn touches interleave with the email calendar.
const MULTI_LINKEDIN_DAYS: &[(u32, LinkedInStepType, bool)] = &[
    (1, LinkedInStepType::ConnectionRequest, false),
    (3, LinkedInStepType::Message, true),
    (7, LinkedInStepType::Message, true),
    (15, LinkedInStepType::Message, true),
];

/// One planned email slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmailSlot {
    /// Day offset from sequence start.
    pub day: u32,
    /// Step archetype.
    pub step_type: EmailStepType,
}

/// One planned LinkedIn slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkedInSlot {
    /// Day offset from sequence start.
    pub day: u32,
    /// Step archetype.
    pub step_type: LinkedInStepType,
    /// Whether the slot needs an accepted connection.
    pub requires_connection: bool,
}

/// Email slots for a mode and step count. Counts beyond the default
/// calendar extend at three-day intervals.
pub fn email_slots(mode: CampaignMode, count: u32) -> Vec<EmailSlot> {
    if !mode.has_email() {
        return Vec::new();
    }
    let table = if mode == CampaignMode::MultiChannel {
        MULTI_EMAIL_DAYS
    } else {
        EMAIL_DAYS
    };
    let mut slots = Vec::new();
    let mut last_day = 0u32;
    for i in 0..count {
        let slot = match table.get(usize::try_from(i).unwrap_or(usize::MAX)) {
            Some(&(day, step_type)) => EmailSlot { day, step_type },
            None => EmailSlot {
                day: last_day.saturating_add(3),
                step_type: EmailStepType::Bump,
            },
        };
        last_day = slot.day;
        slots.push(slot);
    }
    slots
}

/// LinkedIn slots for a mode and step count.
pub fn linkedin_slots(mode: CampaignMode, count: u32) -> Vec<LinkedInSlot> {
    if !mode.has_linkedin() {
        return Vec::new();
    }
    let table = if mode == CampaignMode::MultiChannel {
        MULTI_LINKEDIN_DAYS
    } else {
        LINKEDIN_DAYS
    };
    let mut slots = Vec::new();
    let mut last_day = 0u32;
    for i in 0..count {
        let slot = match table.get(usize::try_from(i).unwrap_or(usize::MAX)) {
            Some(&(day, step_type, requires_connection)) => LinkedInSlot {
                day,
                step_type,
                requires_connection,
            },
            None => LinkedInSlot {
                day: last_day.saturating_add(7),
                step_type: LinkedInStepType::Message,
                requires_connection: true,
            },
        };
        last_day = slot.day;
        slots.push(slot);
    }
    slots
}

/// Render a calendar block for the generation prompt.
pub fn render_timeline(mode: CampaignMode, email_count: u32, linkedin_count: u32) -> String {
    let mut out = String::new();
    for (i, slot) in email_slots(mode, email_count).iter().enumerate() {
        out.push_str(&format!(
            "- Day {}: email {} ({:?})\n",
            slot.day,
            i.saturating_add(1),
            slot.step_type
        ));
    }
    for (i, slot) in linkedin_slots(mode, linkedin_count).iter().enumerate() {
        out.push_str(&format!(
            "- Day {}: linkedin {} ({:?}{})\n",
            slot.day,
            i.saturating_add(1),
            slot.step_type,
            if slot.requires_connection {
                ", requires connection"
            } else {
                ""
            }
        ));
    }
    out
}
