//! Pure, deterministic lead scoring.
//!
//! Two scorers: `intent_score` grades firmographics for intent-feed
//! leads (five bounded components plus tenant preference weights), and
//! `page_intent_score` grades pixel visit history. Both clamp to [0,100].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::tenant::{PreferenceField, TargetingPreferences};
use crate::types::NormalizedLead;

// ── Component bounds ────────────────────────────────────────────

const INDUSTRY_MAX: f64 = 25.0;
const REVENUE_MAX: f64 = 20.0;
const TITLE_MAX: f64 = 20.0;
const SIZE_MAX: f64 = 15.0;
const QUALITY_MAX: f64 = 20.0;

/// Industries scored at full industry points.
const TARGET_INDUSTRIES: &[&str] = &[
    "software",
    "saas",
    "technology",
    "information technology",
    "fintech",
    "financial services",
    "e-commerce",
    "ecommerce",
    "retail",
];

/// Industries scored at adjacent points.
const ADJACENT_INDUSTRIES: &[&str] = &[
    "marketing",
    "advertising",
    "consulting",
    "professional services",
    "logistics",
    "healthcare",
    "insurance",
    "real estate",
];

/// Title rules in priority order; the first match wins.
const TITLE_RULES: &[(&[&str], f64)] = &[
    (&["chief", "ceo", "cto", "cmo", "cro", "coo", "founder"], 20.0),
    (&["vp", "vice president", "head of"], 18.0),
    (&["director"], 14.0),
    (&["manager"], 10.0),
    (&["lead", "senior"], 6.0),
];

/// Titles that force the title component to zero.
const DISQUALIFIER_TITLES: &[&str] = &["student", "intern", "retired", "assistant to"];

// ── Intent score ────────────────────────────────────────────────

/// Score tier thresholds: strong ≥ 70, medium ≥ 40.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentTier {
    /// ≥ 70.
    Strong,
    /// ≥ 40.
    Medium,
    /// Below 40.
    Weak,
}

impl IntentTier {
    /// String stored alongside the score.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strong => "strong",
            Self::Medium => "medium",
            Self::Weak => "weak",
        }
    }

    /// Tier for a clamped total.
    pub fn for_total(total: u32) -> Self {
        if total >= 70 {
            Self::Strong
        } else if total >= 40 {
            Self::Medium
        } else {
            Self::Weak
        }
    }
}

/// Per-component breakdown before clamping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentBreakdown {
    /// Industry component, 0..25.
    pub industry: f64,
    /// Revenue component, 0..20.
    pub revenue: f64,
    /// Title component, 0..20.
    pub title: f64,
    /// Company-size component, 0..15.
    pub company_size: f64,
    /// Data-quality component, 0..20.
    pub data_quality: f64,
    /// Net preference-weight adjustment.
    pub preference_adjustment: f64,
}

impl IntentBreakdown {
    /// Sum of components plus adjustment, before clamping.
    pub fn sum(&self) -> f64 {
        self.industry
            + self.revenue
            + self.title
            + self.company_size
            + self.data_quality
            + self.preference_adjustment
    }
}

/// The scored result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentScore {
    /// Clamped total in [0,100].
    pub total: u32,
    /// Component breakdown.
    pub breakdown: IntentBreakdown,
    /// Tier derived from the total.
    pub tier: IntentTier,
}

/// Grade a lead's firmographics, with optional tenant preference weights.
pub fn intent_score(
    lead: &NormalizedLead,
    preferences: Option<&TargetingPreferences>,
) -> IntentScore {
    let mut breakdown = IntentBreakdown {
        industry: industry_score(lead.company_industry.as_deref()),
        revenue: revenue_score(lead.company_revenue.as_deref()),
        title: title_score(lead.job_title.as_deref()),
        company_size: size_score(lead.company_employee_count),
        data_quality: quality_score(lead),
        preference_adjustment: 0.0,
    };

    if let Some(preferences) = preferences {
        breakdown.preference_adjustment = preference_adjustment(lead, &breakdown, preferences);
    }

    let total = clamp_total(breakdown.sum());
    IntentScore {
        total,
        breakdown,
        tier: IntentTier::for_total(total),
    }
}

fn clamp_total(sum: f64) -> u32 {
    let clamped = sum.clamp(0.0, 100.0).round();
    // Clamped to [0,100] above.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let total = clamped as u32;
    total
}

fn industry_score(industry: Option<&str>) -> f64 {
    let Some(industry) = industry else { return 0.0 };
    let lower = industry.to_lowercase();
    if TARGET_INDUSTRIES.iter().any(|t| lower.contains(t)) {
        return INDUSTRY_MAX;
    }
    if ADJACENT_INDUSTRIES.iter().any(|a| lower.contains(a)) {
        return 12.0;
    }
    5.0
}

fn revenue_score(revenue: Option<&str>) -> f64 {
    let Some(millions) = revenue.and_then(parse_revenue_millions) else {
        return 0.0;
    };
    if (10.0..=500.0).contains(&millions) {
        REVENUE_MAX
    } else if (1.0..10.0).contains(&millions) {
        12.0
    } else if millions > 500.0 {
        8.0
    } else {
        4.0
    }
}

fn title_score(title: Option<&str>) -> f64 {
    let Some(title) = title else { return 0.0 };
    let lower = title.to_lowercase();
    if DISQUALIFIER_TITLES.iter().any(|d| lower.contains(d)) {
        return 0.0;
    }
    for (needles, points) in TITLE_RULES {
        if needles.iter().any(|n| lower.contains(n)) {
            return *points;
        }
    }
    2.0
}

fn size_score(employee_count: Option<u32>) -> f64 {
    match employee_count {
        Some(n) if (50..=500).contains(&n) => SIZE_MAX,
        Some(n) if (11..50).contains(&n) => 10.0,
        Some(n) if (501..=2000).contains(&n) => 8.0,
        Some(n) if n > 2000 => 5.0,
        Some(_) => 4.0,
        None => 0.0,
    }
}

fn quality_score(lead: &NormalizedLead) -> f64 {
    let mut score: f64 = 0.0;
    if lead.email.is_some() {
        score += 4.0;
    }
    if lead.first_name.is_some() && lead.last_name.is_some() {
        score += 4.0;
    }
    if lead.job_title.is_some() {
        score += 4.0;
    }
    if lead.company_industry.is_some() {
        score += 4.0;
    }
    if lead.company_employee_count.is_some() {
        score += 2.0;
    }
    if lead.company_revenue.is_some() {
        score += 2.0;
    }
    score.min(QUALITY_MAX)
}

/// Weight 1.0 is neutral; above adds, below subtracts, a fraction of the
/// matched field's earned base points.
fn preference_adjustment(
    lead: &NormalizedLead,
    breakdown: &IntentBreakdown,
    preferences: &TargetingPreferences,
) -> f64 {
    let mut adjustment = 0.0;
    for weight in &preferences.weights {
        let (value, base) = match weight.field {
            PreferenceField::Industry => (lead.company_industry.as_deref(), breakdown.industry),
            PreferenceField::Title => (lead.job_title.as_deref(), breakdown.title),
            PreferenceField::Revenue => (lead.company_revenue.as_deref(), breakdown.revenue),
            PreferenceField::CompanySize => {
                // Size bands match on the raw count rendered as text.
                let rendered = lead.company_employee_count.map(|n| n.to_string());
                if let Some(rendered) = rendered {
                    if band_matches(&rendered, &weight.matches) {
                        adjustment += (weight.weight - 1.0) * breakdown.company_size;
                    }
                }
                continue;
            }
        };
        if let Some(value) = value {
            if value.to_lowercase().contains(&weight.matches.to_lowercase()) {
                adjustment += (weight.weight - 1.0) * base;
            }
        }
    }
    adjustment
}

fn band_matches(count: &str, band: &str) -> bool {
    let (Ok(count), Some((low, high))) = (count.parse::<u32>(), band.split_once('-')) else {
        return false;
    };
    match (low.trim().parse::<u32>(), high.trim().parse::<u32>()) {
        (Ok(low), Ok(high)) => (low..=high).contains(&count),
        _ => false,
    }
}

/// Parse a revenue string into millions of dollars.
///
/// Handles "$10M-$50M" ranges (midpoint), single values with K/M/B
/// suffixes, and bare numbers (values under 1000 read as millions,
/// larger ones as raw dollars).
pub fn parse_revenue_millions(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(['$', ','], "");
    if cleaned.is_empty() {
        return None;
    }
    if let Some((low, high)) = cleaned.split_once('-') {
        let low = parse_revenue_token(low)?;
        let high = parse_revenue_token(high)?;
        return Some((low + high) / 2.0);
    }
    parse_revenue_token(&cleaned)
}

fn parse_revenue_token(token: &str) -> Option<f64> {
    let lower = token.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    let (digits, multiplier) = if let Some(stripped) = lower.strip_suffix('b') {
        (stripped, 1000.0)
    } else if let Some(stripped) = lower.strip_suffix('m') {
        (stripped, 1.0)
    } else if let Some(stripped) = lower.strip_suffix('k') {
        (stripped, 0.001)
    } else {
        (lower.as_str(), f64::NAN)
    };
    let value: f64 = digits.trim().parse().ok()?;
    if multiplier.is_nan() {
        // Bare number: under 1000 reads as millions, otherwise dollars.
        if value < 1000.0 {
            return Some(value);
        }
        return Some(value / 1_000_000.0);
    }
    Some(value * multiplier)
}

// ── Page intent score ───────────────────────────────────────────

/// One page visit in history (newest last or first; order-insensitive
/// except for sequence matching, which reads oldest → newest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageVisit {
    /// Visited page path.
    pub page: String,
    /// Visit time.
    pub visited_at: DateTime<Utc>,
}

/// Relevance weight per page path prefix (0..1), used by the page-intent
/// relevance component.
const PAGE_WEIGHTS: &[(&str, f64)] = &[
    ("/pricing", 1.0),
    ("/demo", 1.0),
    ("/product", 0.7),
    ("/case-studies", 0.6),
    ("/features", 0.5),
    ("/integrations", 0.4),
    ("/blog", 0.2),
    ("/about", 0.1),
];

/// Multi-page buying sequences; any match grants the full bonus.
const BUYING_SEQUENCES: &[&[&str]] = &[
    &["/product", "/pricing"],
    &["/features", "/pricing"],
    &["/case-studies", "/demo"],
    &["/pricing", "/demo"],
];

/// Page-intent component breakdown; total ≤ 100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PageIntentScore {
    /// Page relevance, 0..40.
    pub page_relevance: f64,
    /// Visit frequency, 0..20.
    pub frequency: f64,
    /// Recency, 0..20.
    pub recency: f64,
    /// Buying-sequence bonus, 0 or 20.
    pub sequence_bonus: f64,
    /// Sum of components.
    pub total: u32,
}

/// Grade a visit history.
pub fn page_intent_score(visits: &[PageVisit], now: DateTime<Utc>) -> PageIntentScore {
    if visits.is_empty() {
        return PageIntentScore::default();
    }

    let page_relevance = {
        let sum: f64 = visits.iter().map(|v| page_weight(&v.page)).sum();
        let count = visits.len();
        #[allow(clippy::cast_precision_loss)]
        let avg = sum / count as f64;
        40.0 * avg
    };

    let frequency = match visits.len() {
        1 => 5.0,
        2..=3 => 10.0,
        4..=6 => 15.0,
        _ => 20.0,
    };

    let last_seen = visits
        .iter()
        .map(|v| v.visited_at)
        .max()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let days_since = now.signed_duration_since(last_seen).num_days();
    let recency = match days_since {
        d if d <= 1 => 20.0,
        d if d <= 3 => 15.0,
        d if d <= 7 => 10.0,
        d if d <= 14 => 5.0,
        _ => 0.0,
    };

    let mut ordered: Vec<&PageVisit> = visits.iter().collect();
    ordered.sort_by_key(|v| v.visited_at);
    let pages: Vec<&str> = ordered.iter().map(|v| v.page.as_str()).collect();
    let sequence_bonus = if BUYING_SEQUENCES.iter().any(|seq| is_subsequence(seq, &pages)) {
        20.0
    } else {
        0.0
    };

    let total = clamp_total(page_relevance + frequency + recency + sequence_bonus);
    PageIntentScore {
        page_relevance,
        frequency,
        recency,
        sequence_bonus,
        total,
    }
}

fn page_weight(page: &str) -> f64 {
    PAGE_WEIGHTS
        .iter()
        .find(|(prefix, _)| page.starts_with(prefix))
        .map_or(0.1, |(_, w)| *w)
}

fn is_subsequence(needle: &[&str], haystack: &[&str]) -> bool {
    let mut iter = haystack.iter();
    needle
        .iter()
        .all(|want| iter.any(|have| have.starts_with(want)))
}

// ── Pixel-visit composite ───────────────────────────────────────

/// Per-page weights for the pixel composite used at qualification time.
const PIXEL_PAGE_POINTS: &[(&str, f64)] = &[
    ("/pricing", 30.0),
    ("/demo", 30.0),
    ("/product", 20.0),
    ("/case-studies", 18.0),
    ("/features", 15.0),
    ("/integrations", 12.0),
];

/// Composite score for one pixel sighting: visit count, page, dwell
/// time, and tracked site event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PixelIntentScore {
    /// Visit-count component, 0..20.
    pub visit: f64,
    /// Page component, 0..30.
    pub page: f64,
    /// Dwell-time component, 0..20.
    pub dwell: f64,
    /// Site-event component, 0..20.
    pub event: f64,
    /// Clamped total.
    pub total: u32,
}

/// Grade one pixel sighting.
pub fn pixel_intent_score(
    visit_count: u32,
    page: Option<&str>,
    dwell_ms: Option<u64>,
    site_event: Option<&str>,
) -> PixelIntentScore {
    let visit = match visit_count {
        0 | 1 => 10.0,
        2..=4 => 15.0,
        _ => 20.0,
    };
    let page_points = page.map_or(5.0, |p| {
        PIXEL_PAGE_POINTS
            .iter()
            .find(|(prefix, _)| p.starts_with(prefix))
            .map_or(5.0, |(_, points)| *points)
    });
    let dwell = match dwell_ms {
        Some(ms) if ms >= 120_000 => 20.0,
        Some(ms) if ms >= 30_000 => 15.0,
        Some(ms) if ms >= 10_000 => 8.0,
        Some(ms) if ms > 0 => 3.0,
        _ => 0.0,
    };
    let event = match site_event {
        Some("form_submit") | Some("demo_request") => 20.0,
        Some("download") => 10.0,
        _ => 0.0,
    };
    let total = clamp_total(visit + page_points + dwell + event);
    PixelIntentScore {
        visit,
        page: page_points,
        dwell,
        event,
        total,
    }
}
