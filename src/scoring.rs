//! Lead scoring engine.
//!
//! Computes, for one lead and the reference data of its batch:
//!
//! 1. `Profile_Score` from the job title seniority ladder.
//! 2. `Industry_Encoded` from the configured relevance table.
//! 3. `Company_Size_Normalized` from the size ladder or employee count.
//! 4. `Engagement_Summary_Score` from weighted, capped counters.
//! 5. `Initial_Lead_Score` = 0.3·P + 0.2·I + 0.2·C + 0.3·E.
//! 6. `Conversion_Probability` through a pluggable [`ConversionCurve`].
//! 7. `Status` from the converted flag and the two scores.
//! 8. `Recommended_Services` from the lead's declared interests.
//!
//! Everything here is pure: the same lead and reference data always yield
//! the same result.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use crate::errors::AppError;
use crate::models::{
    parse_date, split_list, EngagementSummary, LeadRecord, LeadStatus, ReferenceData,
    ScoredLead, ServiceRecord,
};

pub const PROFILE_WEIGHT: f64 = 0.3;
pub const INDUSTRY_WEIGHT: f64 = 0.2;
pub const COMPANY_SIZE_WEIGHT: f64 = 0.2;
pub const ENGAGEMENT_WEIGHT: f64 = 0.3;

/// Both the score and the probability must reach this to count as interested.
pub const INTERESTED_THRESHOLD: f64 = 0.5;

static C_LEVEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(cto|cio|ceo)\b").expect("valid C-level regex"));
static SIZE_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d[\d,]*(?:\.\d+)?)\s*(?:-|–|to)\s*(\d[\d,]*(?:\.\d+)?)").expect("valid range regex")
});
static SIZE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("valid number regex"));

// ============ Configuration ============

/// Relative weight of each engagement counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementWeights {
    pub email_opens: f64,
    pub web_visits: f64,
    pub campaign_clicks: f64,
}

impl Default for EngagementWeights {
    fn default() -> Self {
        Self {
            email_opens: 0.4,
            web_visits: 0.35,
            campaign_clicks: 0.25,
        }
    }
}

/// Counter values treated as full engagement. `None` uses the batch maximum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementCaps {
    pub email_opens: Option<f64>,
    pub web_visits: Option<f64>,
    pub campaign_clicks: Option<f64>,
}

/// Selects the conversion curve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversionCurveConfig {
    /// Probability equals the initial lead score.
    #[default]
    Identity,
    /// Logistic curve around `midpoint`.
    Logistic { midpoint: f64, steepness: f64 },
}

impl ConversionCurveConfig {
    pub fn build(&self) -> Arc<dyn ConversionCurve> {
        match self {
            ConversionCurveConfig::Identity => Arc::new(IdentityCurve),
            ConversionCurveConfig::Logistic {
                midpoint,
                steepness,
            } => Arc::new(LogisticCurve {
                midpoint: *midpoint,
                steepness: *steepness,
            }),
        }
    }
}

/// Tunable inputs of the scoring engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Industry (case-insensitive) -> relevance in [0,1].
    pub industry_relevance: HashMap<String, f64>,
    /// Used when the industry is targeted by an active service but not in the table.
    pub catalog_match_relevance: f64,
    /// Used for everything else.
    pub default_industry_relevance: f64,
    /// Size labels from smallest to largest.
    pub company_size_buckets: Vec<String>,
    /// Employee count mapped to 0.
    pub min_employees: f64,
    /// Employee count mapped to 1.
    pub max_employees: f64,
    pub engagement_weights: EngagementWeights,
    pub engagement_caps: EngagementCaps,
    pub conversion_curve: ConversionCurveConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let industry_relevance = [
            ("technology", 0.9),
            ("saas", 0.9),
            ("software", 0.9),
            ("it services", 0.85),
            ("finance", 0.7),
            ("banking", 0.7),
            ("healthcare", 0.6),
            ("consulting", 0.6),
            ("manufacturing", 0.5),
            ("retail", 0.5),
            ("education", 0.4),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            industry_relevance,
            catalog_match_relevance: 0.8,
            default_industry_relevance: 0.3,
            company_size_buckets: ["Startup", "Small", "Medium", "Large", "Enterprise"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            min_employees: 1.0,
            max_employees: 1000.0,
            engagement_weights: EngagementWeights::default(),
            engagement_caps: EngagementCaps::default(),
            conversion_curve: ConversionCurveConfig::default(),
        }
    }
}

impl ScoringConfig {
    /// Loads a JSON config file. Missing keys keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::InternalError(format!(
                "Unable to read scoring config {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: ScoringConfig = serde_json::from_str(&content).map_err(|e| {
            AppError::InternalError(format!(
                "Invalid scoring config {}: {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;

        tracing::info!("Scoring config loaded from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let weights = &self.engagement_weights;
        if [weights.email_opens, weights.web_visits, weights.campaign_clicks]
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(AppError::InternalError(
                "engagement weights must be non-negative".to_string(),
            ));
        }
        if self.max_employees <= self.min_employees {
            return Err(AppError::InternalError(
                "max_employees must be greater than min_employees".to_string(),
            ));
        }
        if let Some((industry, _)) = self
            .industry_relevance
            .iter()
            .find(|(_, v)| !(0.0..=1.0).contains(*v))
        {
            return Err(AppError::InternalError(format!(
                "industry relevance for '{}' must be within [0,1]",
                industry
            )));
        }
        Ok(())
    }
}

// ============ Conversion curves ============

/// Maps an initial lead score in [0,1] to a conversion probability.
///
/// Implementations should be monotonic; the engine clamps the output.
pub trait ConversionCurve: Send + Sync {
    fn probability(&self, initial_lead_score: f64) -> f64;
}

#[derive(Debug, Clone, Copy)]
pub struct IdentityCurve;

impl ConversionCurve for IdentityCurve {
    fn probability(&self, initial_lead_score: f64) -> f64 {
        initial_lead_score
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LogisticCurve {
    pub midpoint: f64,
    pub steepness: f64,
}

impl ConversionCurve for LogisticCurve {
    fn probability(&self, initial_lead_score: f64) -> f64 {
        1.0 / (1.0 + (-self.steepness * (initial_lead_score - self.midpoint)).exp())
    }
}

// ============ Pure scoring functions ============

/// Seniority of a job title: C-level 1.0, director 0.7, manager 0.4, else 0.1.
///
/// C-level titles are matched as whole words so that "Director" does not
/// count as a CTO. An acronym joined by `_` or letters (`SVP_CTO`) is not a
/// whole word.
pub fn profile_score(job_title: &str) -> f64 {
    let title = job_title.to_lowercase();
    if C_LEVEL.is_match(&title) {
        1.0
    } else if title.contains("director") {
        0.7
    } else if title.contains("manager") {
        0.4
    } else {
        0.1
    }
}

/// Weighted sum of the four sub-scores, clamped to [0,1].
pub fn initial_lead_score(profile: f64, industry: f64, company_size: f64, engagement: f64) -> f64 {
    let score = PROFILE_WEIGHT * profile
        + INDUSTRY_WEIGHT * industry
        + COMPANY_SIZE_WEIGHT * company_size
        + ENGAGEMENT_WEIGHT * engagement;
    clamp_unit(score)
}

/// Converted leads stay converted; otherwise both scores must reach 0.5.
pub fn classify_status(converted: bool, initial_lead_score: f64, probability: f64) -> LeadStatus {
    if converted {
        LeadStatus::Converted
    } else if initial_lead_score >= INTERESTED_THRESHOLD && probability >= INTERESTED_THRESHOLD {
        LeadStatus::Interested
    } else {
        LeadStatus::NotInterested
    }
}

/// Raw counter value; blanks, garbage and negatives read as 0.
pub fn parse_counter(raw: Option<&str>) -> f64 {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(0.0)
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse().ok()
}

// ============ Engine ============

/// All sub-scores of one lead.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadScore {
    pub profile_score: f64,
    pub industry_encoded: f64,
    pub company_size_normalized: f64,
    pub engagement_score: f64,
    pub initial_lead_score: f64,
    pub conversion_probability: f64,
    pub status: LeadStatus,
    pub recommended_services: Vec<String>,
    pub engagement_summary: EngagementSummary,
}

impl LeadScore {
    pub fn into_scored_lead(self, lead_id: &str) -> ScoredLead {
        ScoredLead {
            lead_id: lead_id.to_string(),
            profile_score: self.profile_score,
            initial_lead_score: self.initial_lead_score,
            conversion_probability: self.conversion_probability,
            recommended_services: self.recommended_services,
            status: Some(self.status),
            engagement_summary: self.engagement_summary,
        }
    }
}

/// Scoring configuration plus the conversion curve in use.
#[derive(Clone)]
pub struct ScoringEngine {
    config: ScoringConfig,
    curve: Arc<dyn ConversionCurve>,
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        let curve = config.conversion_curve.build();
        Self { config, curve }
    }

    /// Replaces the conversion curve without touching the other steps.
    pub fn with_curve(mut self, curve: Arc<dyn ConversionCurve>) -> Self {
        self.curve = curve;
        self
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Binds the engine to one batch. Engagement caps not set in the config
    /// are taken from the batch maxima.
    pub fn context<'a>(
        &'a self,
        leads: &[LeadRecord],
        reference: &'a ReferenceData,
    ) -> ScoringContext<'a> {
        let observed = |get: fn(&LeadRecord) -> Option<&str>| {
            leads
                .iter()
                .map(|lead| parse_counter(get(lead)))
                .fold(0.0, f64::max)
        };
        let caps = &self.config.engagement_caps;

        ScoringContext {
            engine: self,
            reference,
            email_cap: caps
                .email_opens
                .unwrap_or_else(|| observed(|l| l.email_opens.as_deref())),
            visit_cap: caps
                .web_visits
                .unwrap_or_else(|| observed(|l| l.web_visits.as_deref())),
            click_cap: caps
                .campaign_clicks
                .unwrap_or_else(|| observed(|l| l.campaign_clicks.as_deref())),
        }
    }

    /// Scores every lead of a batch, in order.
    pub fn score_batch(&self, leads: &[LeadRecord], reference: &ReferenceData) -> Vec<ScoredLead> {
        let ctx = self.context(leads, reference);
        leads
            .iter()
            .map(|lead| ctx.score_lead(lead).into_scored_lead(&lead.lead_id))
            .collect()
    }
}

/// The engine bound to one batch of leads and its reference data.
pub struct ScoringContext<'a> {
    engine: &'a ScoringEngine,
    reference: &'a ReferenceData,
    email_cap: f64,
    visit_cap: f64,
    click_cap: f64,
}

impl ScoringContext<'_> {
    pub fn score_lead(&self, lead: &LeadRecord) -> LeadScore {
        let profile = profile_score(&lead.job_title);
        let industry = self.industry_encoded(&lead.industry);
        let company_size = self.company_size_normalized(&lead.company_size);
        let engagement = self.engagement_score(lead);
        let initial = initial_lead_score(profile, industry, company_size, engagement);
        let probability = clamp_unit(self.engine.curve.probability(initial));
        let status = classify_status(lead.is_converted(), initial, probability);

        LeadScore {
            profile_score: profile,
            industry_encoded: industry,
            company_size_normalized: company_size,
            engagement_score: engagement,
            initial_lead_score: initial,
            conversion_probability: probability,
            status,
            recommended_services: self.recommended_services(lead),
            engagement_summary: engagement_summary(lead),
        }
    }

    pub fn industry_encoded(&self, industry: &str) -> f64 {
        let config = &self.engine.config;
        let key = industry.trim().to_lowercase();
        if key.is_empty() {
            return clamp_unit(config.default_industry_relevance);
        }

        let from_table = config
            .industry_relevance
            .iter()
            .find(|(name, _)| name.to_lowercase() == key)
            .map(|(_, v)| *v);

        let relevance = match from_table {
            Some(v) => v,
            None if self.active_services().any(|s| s.target_industry_list().contains(&key)) => {
                config.catalog_match_relevance
            }
            None => config.default_industry_relevance,
        };
        clamp_unit(relevance)
    }

    pub fn company_size_normalized(&self, company_size: &str) -> f64 {
        let config = &self.engine.config;
        let raw = company_size.trim();
        if raw.is_empty() {
            return 0.0;
        }

        let ladder = &config.company_size_buckets;
        if let Some(idx) = ladder.iter().position(|b| b.trim().eq_ignore_ascii_case(raw)) {
            return if ladder.len() <= 1 {
                1.0
            } else {
                idx as f64 / (ladder.len() - 1) as f64
            };
        }

        let employees = if let Some(caps) = SIZE_RANGE.captures(raw) {
            let low = caps.get(1).and_then(|m| parse_number(m.as_str()));
            let high = caps.get(2).and_then(|m| parse_number(m.as_str()));
            match (low, high) {
                (Some(low), Some(high)) => Some((low + high) / 2.0),
                (low, high) => low.or(high),
            }
        } else {
            SIZE_NUMBER
                .find(raw)
                .and_then(|m| parse_number(m.as_str()))
        };

        match employees {
            Some(n) => {
                let span = config.max_employees - config.min_employees;
                if span <= 0.0 {
                    0.0
                } else {
                    clamp_unit((n - config.min_employees) / span)
                }
            }
            None => 0.0,
        }
    }

    pub fn engagement_score(&self, lead: &LeadRecord) -> f64 {
        let weights = &self.engine.config.engagement_weights;
        let total_weight = weights.email_opens + weights.web_visits + weights.campaign_clicks;
        if total_weight <= 0.0 {
            return 0.0;
        }

        let normalized = |raw: Option<&str>, cap: f64| {
            if cap <= 0.0 {
                0.0
            } else {
                (parse_counter(raw) / cap).min(1.0)
            }
        };

        let weighted = weights.email_opens * normalized(lead.email_opens.as_deref(), self.email_cap)
            + weights.web_visits * normalized(lead.web_visits.as_deref(), self.visit_cap)
            + weights.campaign_clicks
                * normalized(lead.campaign_clicks.as_deref(), self.click_cap);

        clamp_unit(weighted / total_weight)
    }

    /// Active catalog services matching the lead's declared interests, most
    /// relevant first. Services a running account of the same company already
    /// uses are left out.
    pub fn recommended_services(&self, lead: &LeadRecord) -> Vec<String> {
        let interests: Vec<String> = lead
            .interested_services
            .as_deref()
            .map(split_list)
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect();
        if interests.is_empty() {
            return Vec::new();
        }

        let industry = lead.industry.trim().to_lowercase();
        let owned = self.services_owned_by(&lead.company);

        let mut matches: Vec<(f64, &str)> = Vec::new();
        for service in self.active_services() {
            let name = service.service_name.trim();
            let key = name.to_lowercase();
            if key.is_empty()
                || owned.contains(&key)
                || matches.iter().any(|(_, n)| n.eq_ignore_ascii_case(name))
            {
                continue;
            }

            let category = service
                .category
                .as_deref()
                .map(|c| c.trim().to_lowercase())
                .unwrap_or_default();

            let mut relevance = if interests.iter().any(|i| *i == key) {
                1.0
            } else if interests
                .iter()
                .any(|i| key.contains(i.as_str()) || i.contains(key.as_str()))
                || (!category.is_empty()
                    && interests
                        .iter()
                        .any(|i| *i == category || i.contains(category.as_str())))
            {
                0.5
            } else {
                0.0
            };

            if relevance > 0.0 && !industry.is_empty() && service.target_industry_list().contains(&industry) {
                relevance += 0.1;
            }
            if relevance > 0.0 {
                matches.push((relevance, name));
            }
        }

        // Stable: equal relevance keeps catalog order
        matches.sort_by(|a, b| b.0.total_cmp(&a.0));
        matches.into_iter().map(|(_, name)| name.to_string()).collect()
    }

    fn active_services(&self) -> impl Iterator<Item = &ServiceRecord> {
        self.reference.services.iter().filter(|s| s.is_active())
    }

    fn services_owned_by(&self, company: &str) -> Vec<String> {
        let company = company.trim();
        if company.is_empty() {
            return Vec::new();
        }
        self.reference
            .running_accounts
            .iter()
            .filter(|account| account.company.trim().eq_ignore_ascii_case(company))
            .filter_map(|account| account.services.as_deref())
            .flat_map(split_list)
            .map(|s| s.to_lowercase())
            .collect()
    }
}

/// Integer totals of the raw counters plus the last interaction date.
pub fn engagement_summary(lead: &LeadRecord) -> EngagementSummary {
    EngagementSummary {
        total_email_opens: parse_counter(lead.email_opens.as_deref()).round() as u64,
        total_web_visits: parse_counter(lead.web_visits.as_deref()).round() as u64,
        total_campaign_clicks: parse_counter(lead.campaign_clicks.as_deref()).round() as u64,
        last_interaction_date: lead.last_interaction_date.as_deref().and_then(parse_date),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountRecord;

    fn service(name: &str, category: Option<&str>, industries: Option<&str>) -> ServiceRecord {
        ServiceRecord {
            service_id: name.to_lowercase(),
            service_name: name.to_string(),
            category: category.map(str::to_string),
            target_industries: industries.map(str::to_string),
            status: None,
            ..Default::default()
        }
    }

    #[test]
    fn test_profile_ladder() {
        assert_eq!(profile_score("CTO"), 1.0);
        assert_eq!(profile_score("Co-founder & ceo"), 1.0);
        assert_eq!(profile_score("Group CIO, EMEA"), 1.0);
        assert_eq!(profile_score("Sales Director"), 0.7);
        assert_eq!(profile_score("Account Manager"), 0.4);
        assert_eq!(profile_score("Engineer"), 0.1);
        assert_eq!(profile_score(""), 0.1);
    }

    #[test]
    fn test_director_is_not_cto() {
        // "director" contains the letters "cto"
        assert_eq!(profile_score("director"), 0.7);
        assert_eq!(profile_score("Factory Manager"), 0.4);
    }

    #[test]
    fn test_c_level_needs_word_boundaries() {
        assert_eq!(profile_score("SVP/CTO"), 1.0);
        assert_eq!(profile_score("ceo-founder"), 1.0);
        // underscores and letters are word characters
        assert_eq!(profile_score("SVP_CTO"), 0.1);
        assert_eq!(profile_score("CTOffice Manager"), 0.4);
    }

    #[test]
    fn test_status_rules() {
        assert_eq!(classify_status(true, 0.0, 0.0), LeadStatus::Converted);
        assert_eq!(classify_status(false, 0.6, 0.5), LeadStatus::Interested);
        assert_eq!(classify_status(false, 0.49, 0.9), LeadStatus::NotInterested);
        assert_eq!(classify_status(false, 0.9, 0.49), LeadStatus::NotInterested);
    }

    #[test]
    fn test_initial_score_weights() {
        assert!((initial_lead_score(1.0, 1.0, 1.0, 1.0) - 1.0).abs() < 1e-12);
        assert_eq!(initial_lead_score(0.0, 0.0, 0.0, 0.0), 0.0);
        assert!((initial_lead_score(1.0, 0.0, 0.0, 0.0) - 0.3).abs() < 1e-12);
        assert!((initial_lead_score(0.0, 0.0, 0.0, 1.0) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_company_size_ladder_and_numbers() {
        let engine = ScoringEngine::default();
        let reference = ReferenceData::default();
        let ctx = engine.context(&[], &reference);

        assert_eq!(ctx.company_size_normalized("Startup"), 0.0);
        assert_eq!(ctx.company_size_normalized("medium"), 0.5);
        assert_eq!(ctx.company_size_normalized("Enterprise"), 1.0);
        assert_eq!(ctx.company_size_normalized("5000"), 1.0);
        assert_eq!(ctx.company_size_normalized("1"), 0.0);
        // midpoint of the range: 501
        assert!((ctx.company_size_normalized("1-1,001") - 0.5).abs() < 1e-9);
        assert_eq!(ctx.company_size_normalized("unknown"), 0.0);
    }

    #[test]
    fn test_industry_from_table_then_catalog() {
        let engine = ScoringEngine::default();
        let reference = ReferenceData {
            services: vec![service("Fleet Tracking", None, Some("Logistics, Transport"))],
            ..Default::default()
        };
        let ctx = engine.context(&[], &reference);

        assert_eq!(ctx.industry_encoded("Technology"), 0.9);
        assert_eq!(ctx.industry_encoded("logistics"), 0.8);
        assert_eq!(ctx.industry_encoded("Agriculture"), 0.3);
    }

    #[test]
    fn test_engagement_uses_observed_maxima() {
        let engine = ScoringEngine::default();
        let reference = ReferenceData::default();
        let leads = vec![
            LeadRecord {
                lead_id: "a".into(),
                email_opens: Some("10".into()),
                web_visits: Some("20".into()),
                campaign_clicks: Some("4".into()),
                ..Default::default()
            },
            LeadRecord {
                lead_id: "b".into(),
                email_opens: Some("5".into()),
                web_visits: Some("n/a".into()),
                ..Default::default()
            },
        ];
        let ctx = engine.context(&leads, &reference);

        assert!((ctx.engagement_score(&leads[0]) - 1.0).abs() < 1e-12);
        // 0.4 * 0.5 / 1.0
        assert!((ctx.engagement_score(&leads[1]) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_recommendations_ordered_by_relevance_then_catalog() {
        let engine = ScoringEngine::default();
        let mut retired = service("Legacy Hosting", None, None);
        retired.status = Some("inactive".into());
        let reference = ReferenceData {
            services: vec![
                service("Data Analytics", Some("Data"), None),
                retired,
                service("Cloud Migration", Some("Cloud"), None),
                service("API Integration", None, Some("Technology")),
                service("Cloud", None, None),
            ],
            ..Default::default()
        };
        let lead = LeadRecord {
            lead_id: "L1".into(),
            industry: "Technology".into(),
            interested_services: Some("Cloud; API Integration | legacy hosting".into()),
            ..Default::default()
        };
        let ctx = engine.context(std::slice::from_ref(&lead), &reference);

        assert_eq!(
            ctx.recommended_services(&lead),
            vec!["API Integration", "Cloud", "Cloud Migration"]
        );
    }

    #[test]
    fn test_recommendations_skip_services_already_running() {
        let engine = ScoringEngine::default();
        let reference = ReferenceData {
            services: vec![service("Cloud", None, None), service("Security Audit", None, None)],
            running_accounts: vec![AccountRecord {
                account_id: "A1".into(),
                company: "TechNova".into(),
                services: Some("Cloud".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let lead = LeadRecord {
            lead_id: "L1".into(),
            company: "technova".into(),
            interested_services: Some("Cloud, Security Audit".into()),
            ..Default::default()
        };
        let ctx = engine.context(std::slice::from_ref(&lead), &reference);

        assert_eq!(ctx.recommended_services(&lead), vec!["Security Audit"]);
    }

    #[test]
    fn test_custom_curve_changes_only_probability() {
        struct Halving;
        impl ConversionCurve for Halving {
            fn probability(&self, s: f64) -> f64 {
                s / 2.0
            }
        }

        let lead = LeadRecord {
            lead_id: "L1".into(),
            job_title: "CEO".into(),
            industry: "Technology".into(),
            company_size: "Enterprise".into(),
            email_opens: Some("3".into()),
            ..Default::default()
        };
        let reference = ReferenceData::default();
        let base = ScoringEngine::default();
        let halved = ScoringEngine::default().with_curve(Arc::new(Halving));

        let a = base.context(std::slice::from_ref(&lead), &reference).score_lead(&lead);
        let b = halved.context(std::slice::from_ref(&lead), &reference).score_lead(&lead);

        assert_eq!(a.initial_lead_score, b.initial_lead_score);
        assert_eq!(a.conversion_probability, a.initial_lead_score);
        assert!((b.conversion_probability - a.initial_lead_score / 2.0).abs() < 1e-12);
        assert_eq!(a.status, LeadStatus::Interested);
        assert_eq!(b.status, LeadStatus::NotInterested);
    }

    #[test]
    fn test_logistic_curve_is_centered() {
        let curve = LogisticCurve {
            midpoint: 0.5,
            steepness: 10.0,
        };
        assert!((curve.probability(0.5) - 0.5).abs() < 1e-12);
        assert!(curve.probability(0.8) > curve.probability(0.6));
    }

    #[test]
    fn test_config_rejects_bad_weights() {
        let mut config = ScoringConfig::default();
        config.engagement_weights.web_visits = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_json_keeps_defaults() {
        let config: ScoringConfig = serde_json::from_str(
            r#"{"conversion_curve": {"kind": "logistic", "midpoint": 0.4, "steepness": 8.0},
                "engagement_caps": {"email_opens": 20}}"#,
        )
        .unwrap();
        assert_eq!(config.default_industry_relevance, 0.3);
        assert_eq!(config.engagement_caps.email_opens, Some(20.0));
        assert_eq!(
            config.conversion_curve,
            ConversionCurveConfig::Logistic {
                midpoint: 0.4,
                steepness: 8.0
            }
        );
    }
}
