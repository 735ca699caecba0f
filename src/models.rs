use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::AppError;

/// One parsed spreadsheet row: header -> cell value.
pub type Row = BTreeMap<String, String>;

// ============ Upload Models ============

/// Role of an uploaded file, inferred from its filename prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FileRole {
    /// `Leads_data*`
    Leads,
    /// `Services_data*`
    Services,
    /// `PreAccount_data*`
    PreAccounts,
    /// `RunningAccout_data*`
    RunningAccounts,
}

impl FileRole {
    /// Every role the scoring barrier waits for.
    pub const ALL: [FileRole; 4] = [
        FileRole::Leads,
        FileRole::Services,
        FileRole::PreAccounts,
        FileRole::RunningAccounts,
    ];

    /// Filename prefix expected for the role.
    pub fn prefix(&self) -> &'static str {
        match self {
            FileRole::Leads => "Leads_data",
            FileRole::Services => "Services_data",
            FileRole::PreAccounts => "PreAccount_data",
            FileRole::RunningAccounts => "RunningAccout_data",
        }
    }
}

/// A file that was parsed into rows for a known role.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFile {
    /// Role the file was uploaded for.
    pub role: FileRole,
    /// Original filename.
    pub file_name: String,
    /// Non-empty rows, first row used as headers.
    pub rows: Vec<Row>,
}

// ============ Lead Models ============

/// Columns the merge writes onto an [`EnrichedLead`]. An uploaded column with
/// one of these names is kept in `extra` under an `Uploaded_` prefix.
const SCORED_COLUMNS: [&str; 6] = [
    "profile_score",
    "initial_lead_score",
    "conversion_probability",
    "recommended_services",
    "status",
    "engagement_summary",
];

/// One row of the leads file.
///
/// Known columns are typed; everything else lands in `extra` so that nothing
/// uploaded is silently dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    /// Primary key, unique within a dataset.
    #[serde(rename = "Lead_ID")]
    pub lead_id: String,
    /// Contact name.
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Company name.
    #[serde(rename = "Company", default)]
    pub company: String,
    /// Industry of the company.
    #[serde(rename = "Industry", default)]
    pub industry: String,
    /// Sales region.
    #[serde(rename = "Region", default)]
    pub region: String,
    /// Job title, drives the profile score.
    #[serde(rename = "Job_Title", default)]
    pub job_title: String,
    /// Company size bucket or employee count.
    #[serde(rename = "Company_Size", default)]
    pub company_size: String,
    /// Raw email open counter.
    #[serde(rename = "Email_Opens", default, skip_serializing_if = "Option::is_none")]
    pub email_opens: Option<String>,
    /// Raw web visit counter.
    #[serde(rename = "Web_Visits", default, skip_serializing_if = "Option::is_none")]
    pub web_visits: Option<String>,
    /// Raw campaign click counter.
    #[serde(rename = "Campaign_Clicks", default, skip_serializing_if = "Option::is_none")]
    pub campaign_clicks: Option<String>,
    /// Past purchases, free text.
    #[serde(rename = "Past_Purchases", default)]
    pub past_purchases: String,
    /// Raw converted flag.
    #[serde(rename = "Converted", default)]
    pub converted: String,
    /// Services the lead declared interest in, free text list.
    #[serde(rename = "Interested_Services", default, skip_serializing_if = "Option::is_none")]
    pub interested_services: Option<String>,
    /// Lead source (campaign, referral, ...).
    #[serde(rename = "Source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Creation date as uploaded.
    #[serde(rename = "Created_At", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Last interaction date as uploaded.
    #[serde(rename = "Last_Interaction_Date", default, skip_serializing_if = "Option::is_none")]
    pub last_interaction_date: Option<String>,
    /// Columns without a typed field.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl LeadRecord {
    /// Builds a lead from a parsed row. `Lead_ID` is mandatory.
    pub fn from_row(row: &Row) -> Result<Self, AppError> {
        let mut lead = LeadRecord::default();
        for (header, value) in row {
            let value = value.trim().to_string();
            match normalize_header(header).as_str() {
                "lead_id" => lead.lead_id = value,
                "name" => lead.name = value,
                "company" => lead.company = value,
                "industry" => lead.industry = value,
                "region" => lead.region = value,
                "job_title" => lead.job_title = value,
                "company_size" => lead.company_size = value,
                "email_opens" => lead.email_opens = non_empty(value),
                "web_visits" => lead.web_visits = non_empty(value),
                "campaign_clicks" => lead.campaign_clicks = non_empty(value),
                "past_purchases" => lead.past_purchases = value,
                "converted" => lead.converted = value,
                "interested_services" => lead.interested_services = non_empty(value),
                "source" | "lead_source" => lead.source = non_empty(value),
                "created_at" | "createdat" => lead.created_at = non_empty(value),
                "last_interaction_date" => lead.last_interaction_date = non_empty(value),
                key if SCORED_COLUMNS.contains(&key) => {
                    lead.extra.insert(format!("Uploaded_{}", header.trim()), value);
                }
                _ => {
                    lead.extra.insert(header.clone(), value);
                }
            }
        }

        if lead.lead_id.is_empty() {
            return Err(AppError::ParseError(
                "lead row is missing Lead_ID".to_string(),
            ));
        }

        Ok(lead)
    }

    /// Interprets the raw `Converted` flag.
    pub fn is_converted(&self) -> bool {
        parse_flag(&self.converted)
    }

    /// Creation date, when the uploaded value is a recognizable date.
    pub fn created_date(&self) -> Option<NaiveDate> {
        self.created_at.as_deref().and_then(parse_date)
    }
}

/// A service from the catalog file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Catalog identifier.
    #[serde(rename = "Service_ID", default)]
    pub service_id: String,
    /// Display name, matched against lead interests.
    #[serde(rename = "Service_Name", default)]
    pub service_name: String,
    /// Service category.
    #[serde(rename = "Category", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Industries the service targets, free text list.
    #[serde(rename = "Target_Industries", default, skip_serializing_if = "Option::is_none")]
    pub target_industries: Option<String>,
    /// Availability flag. Absent means active.
    #[serde(rename = "Status", default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Columns without a typed field.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl ServiceRecord {
    pub fn from_row(row: &Row) -> Self {
        let mut service = ServiceRecord::default();
        for (header, value) in row {
            let value = value.trim().to_string();
            match normalize_header(header).as_str() {
                "service_id" | "id" => service.service_id = value,
                "service_name" | "service" | "name" => service.service_name = value,
                "category" => service.category = non_empty(value),
                "target_industries" | "target_industry" | "industries" | "industry" => {
                    service.target_industries = non_empty(value)
                }
                "status" | "active" => service.status = non_empty(value),
                _ => {
                    service.extra.insert(header.clone(), value);
                }
            }
        }
        service
    }

    /// Whether the service is currently offered.
    pub fn is_active(&self) -> bool {
        match self.status.as_deref() {
            None => true,
            Some(status) => {
                let status = status.trim().to_lowercase();
                status == "active" || status == "available" || parse_flag(&status)
            }
        }
    }

    /// Target industries, lowercased.
    pub fn target_industry_list(&self) -> Vec<String> {
        self.target_industries
            .as_deref()
            .map(split_list)
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect()
    }
}

/// A pre-existing or running account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Account identifier.
    #[serde(rename = "Account_ID", default)]
    pub account_id: String,
    /// Account company.
    #[serde(rename = "Company", default)]
    pub company: String,
    /// Account industry.
    #[serde(rename = "Industry", default)]
    pub industry: String,
    /// Services the account already uses.
    #[serde(rename = "Services", default, skip_serializing_if = "Option::is_none")]
    pub services: Option<String>,
    /// Columns without a typed field.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl AccountRecord {
    pub fn from_row(row: &Row) -> Self {
        let mut account = AccountRecord::default();
        for (header, value) in row {
            let value = value.trim().to_string();
            match normalize_header(header).as_str() {
                "account_id" | "id" => account.account_id = value,
                "company" | "company_name" | "account_name" => account.company = value,
                "industry" => account.industry = value,
                "services" | "active_services" | "service" => account.services = non_empty(value),
                _ => {
                    account.extra.insert(header.clone(), value);
                }
            }
        }
        account
    }
}

/// Reference data shared by every lead of a scoring run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceData {
    /// Services catalog.
    pub services: Vec<ServiceRecord>,
    /// Accounts that existed before the campaign.
    pub pre_accounts: Vec<AccountRecord>,
    /// Accounts currently running.
    pub running_accounts: Vec<AccountRecord>,
}

// ============ Scoring Models ============

/// Sales-funnel classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadStatus {
    #[serde(rename = "Interested")]
    Interested,
    #[serde(rename = "Converted")]
    Converted,
    #[serde(rename = "Not Interested")]
    NotInterested,
}

impl LeadStatus {
    /// Chart order.
    pub const ALL: [LeadStatus; 3] = [
        LeadStatus::Interested,
        LeadStatus::Converted,
        LeadStatus::NotInterested,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Interested => "Interested",
            LeadStatus::Converted => "Converted",
            LeadStatus::NotInterested => "Not Interested",
        }
    }

    /// Exact match against the display label.
    pub fn parse(label: &str) -> Option<Self> {
        LeadStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == label.trim())
    }
}

/// Aggregated interaction counters for a lead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementSummary {
    #[serde(rename = "Total_Email_Opens", default, deserialize_with = "de_lenient_u64")]
    pub total_email_opens: u64,
    #[serde(rename = "Total_Web_Visits", default, deserialize_with = "de_lenient_u64")]
    pub total_web_visits: u64,
    #[serde(rename = "Total_Campaign_Clicks", default, deserialize_with = "de_lenient_u64")]
    pub total_campaign_clicks: u64,
    #[serde(
        rename = "Last_Interaction_Date",
        default,
        deserialize_with = "de_lenient_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_interaction_date: Option<NaiveDate>,
}

/// Per-lead scoring result, as returned by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoredLead {
    #[serde(rename = "Lead_ID", deserialize_with = "de_lenient_string")]
    pub lead_id: String,
    #[serde(rename = "Profile_Score", default, deserialize_with = "de_lenient_f64")]
    pub profile_score: f64,
    /// 0-1 as produced; rescaled to 0-100 by the merge.
    #[serde(rename = "Initial_Lead_Score", default, deserialize_with = "de_lenient_f64")]
    pub initial_lead_score: f64,
    #[serde(rename = "Conversion_Probability", default, deserialize_with = "de_lenient_f64")]
    pub conversion_probability: f64,
    #[serde(rename = "Recommended_Services", default, deserialize_with = "de_service_list")]
    pub recommended_services: Vec<String>,
    #[serde(
        rename = "Status",
        default,
        deserialize_with = "de_lenient_status",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<LeadStatus>,
    #[serde(rename = "Engagement_Summary", default)]
    pub engagement_summary: EngagementSummary,
}

/// The JSON object the model is asked to return.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerLeadResponse {
    pub per_lead: Vec<ScoredLead>,
}

/// A lead after the AI results were merged in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichedLead {
    /// Original row, raw engagement counters removed when scored.
    #[serde(flatten)]
    pub lead: LeadRecord,
    #[serde(rename = "Profile_Score", default, skip_serializing_if = "Option::is_none")]
    pub profile_score: Option<f64>,
    /// Display scale, 0-100.
    #[serde(rename = "Initial_Lead_Score", default, skip_serializing_if = "Option::is_none")]
    pub initial_lead_score: Option<f64>,
    #[serde(rename = "Conversion_Probability", default, skip_serializing_if = "Option::is_none")]
    pub conversion_probability: Option<f64>,
    #[serde(rename = "Recommended_Services", default, skip_serializing_if = "Option::is_none")]
    pub recommended_services: Option<Vec<String>>,
    #[serde(rename = "Status", default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LeadStatus>,
    #[serde(rename = "Engagement_Summary", default, skip_serializing_if = "Option::is_none")]
    pub engagement_summary: Option<EngagementSummary>,
}

impl EnrichedLead {
    /// Lead that had no matching AI result.
    pub fn unscored(lead: LeadRecord) -> Self {
        Self {
            lead,
            ..Default::default()
        }
    }

    pub fn lead_id(&self) -> &str {
        &self.lead.lead_id
    }

    /// Display score with missing treated as 0.
    pub fn display_score(&self) -> f64 {
        self.initial_lead_score.unwrap_or(0.0)
    }

    pub fn is_scored(&self) -> bool {
        self.initial_lead_score.is_some()
    }
}

// ============ Aggregate Models ============

/// Dashboard stat cards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub total_leads: usize,
    pub interested_leads: usize,
    pub converted_leads: usize,
    pub not_interested_leads: usize,
    /// Percentage, 0-100.
    pub conversion_rate: f64,
    /// Mean display score over all leads, missing scores counted as 0.
    pub average_score: f64,
}

/// One slice of the status chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartBucket {
    pub name: String,
    pub value: usize,
    pub color: String,
}

/// A facet value and how many leads carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetCount {
    pub name: String,
    pub count: usize,
}

/// Values available to the dashboard filter panel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterFacets {
    pub industries: Vec<FacetCount>,
    pub sources: Vec<FacetCount>,
    pub company_sizes: Vec<FacetCount>,
    pub regions: Vec<FacetCount>,
    pub statuses: Vec<FacetCount>,
}

// ============ API Request/Response Models ============

/// Query parameters for lead listing.
///
/// List-valued filters are comma separated, e.g. `status=Interested,Converted`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadFilter {
    /// Free-text search over id, name, company, industry and job title.
    pub search: Option<String>,
    /// Status labels.
    pub status: Option<String>,
    /// Industries.
    pub industry: Option<String>,
    /// Company sizes.
    pub company_size: Option<String>,
    /// Lead sources.
    pub source: Option<String>,
    /// Regions.
    pub region: Option<String>,
    /// Lower bound of the display score, inclusive.
    pub min_score: Option<f64>,
    /// Upper bound of the display score, inclusive.
    pub max_score: Option<f64>,
    /// Created-at lower bound, inclusive.
    pub from: Option<NaiveDate>,
    /// Created-at upper bound, inclusive.
    pub to: Option<NaiveDate>,
}

/// Query parameters for the top-N endpoint.
#[derive(Debug, Deserialize)]
pub struct TopLeadsQuery {
    /// Number of leads to return.
    pub limit: Option<usize>,
}

/// Lead list response.
#[derive(Debug, Serialize)]
pub struct LeadListResponse {
    /// Leads after filtering.
    pub leads: Vec<EnrichedLead>,
    /// Leads matching the filter.
    pub showing: usize,
    /// Leads in the dataset.
    pub total: usize,
    /// Number of active facet filters.
    pub active_filters: usize,
}

/// Metadata of the last completed scoring cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMeta {
    pub batch_id: Uuid,
    pub processed_at: DateTime<Utc>,
    pub scorer: String,
    pub lead_count: usize,
    pub scored_count: usize,
}

/// Outcome of an upload request.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Files parsed and staged by this request.
    pub accepted: Vec<String>,
    /// Files skipped because of an unknown prefix.
    pub ignored: Vec<String>,
    /// Files rejected with their error.
    pub rejected: Vec<RejectedFile>,
    /// Roles still missing before scoring can start.
    pub missing_roles: Vec<FileRole>,
    /// Present when this request completed the batch.
    pub summary: Option<ProcessingSummary>,
}

/// A file that failed to parse.
#[derive(Debug, Serialize)]
pub struct RejectedFile {
    pub file_name: String,
    pub error: String,
}

/// Result of a full scoring cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingSummary {
    pub batch_id: Uuid,
    pub lead_count: usize,
    pub scored_count: usize,
    /// `"scored"` when the reply parsed, `"no_data"` otherwise.
    pub ai_status: String,
    pub message: String,
}

/// Staging state of the current upload cycle.
#[derive(Debug, Serialize)]
pub struct UploadStatus {
    pub staged: Vec<StagedFile>,
    pub missing_roles: Vec<FileRole>,
    pub last_batch: Option<BatchMeta>,
}

/// A parsed file waiting for the rest of the batch.
#[derive(Debug, Serialize)]
pub struct StagedFile {
    pub role: FileRole,
    pub file_name: String,
    pub rows: usize,
}

/// Raw and cleaned model output of the last cycle.
#[derive(Debug, Serialize)]
pub struct AiOutputResponse {
    pub raw: Option<String>,
    pub cleaned: Option<PerLeadResponse>,
}

/// Engagement email suggested for a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedEmail {
    pub subject: String,
    pub body: String,
    pub call_to_action: String,
}

impl GeneratedEmail {
    /// Plain-text rendering shown to the user and kept as the last email.
    pub fn render(&self) -> String {
        format!(
            "Subject: {}\n\n{}\n\nCall to Action: {}",
            self.subject, self.body, self.call_to_action
        )
    }
}

/// Response of the email endpoints.
#[derive(Debug, Serialize)]
pub struct EmailResponse {
    pub lead_id: String,
    pub content: String,
    /// True when the content is the previously generated email.
    pub cached: bool,
}

// ============ Helpers ============

/// Lowercases a header and unifies separators, `"Lead ID"` -> `"lead_id"`.
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// Truthy spreadsheet flag: "1", "true", "yes", "y".
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y"
    )
}

/// Parses `YYYY-MM-DD`, RFC 3339 timestamps, `YYYY/MM/DD` and `DD/MM/YYYY`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.date_naive());
    }
    let head = raw.get(..10).unwrap_or(raw);
    ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(head, fmt).ok())
}

/// Splits a free-text list on `,`, `;`, `|` and `/`.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split([',', ';', '|', '/'])
        .map(|s| s.trim().trim_matches(|c| c == '[' || c == ']' || c == '"'))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

// Model replies are loosely typed: numbers arrive as strings and vice versa.

fn de_lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

fn de_lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let as_float = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    Ok(if as_float.is_finite() && as_float > 0.0 {
        as_float.round() as u64
    } else {
        0
    })
}

fn de_lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn de_lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => parse_date(&s),
        _ => None,
    })
}

fn de_lenient_status<'de, D>(deserializer: D) -> Result<Option<LeadStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => {
            let status = LeadStatus::parse(&s);
            if status.is_none() {
                tracing::warn!("Ignoring unknown status in AI reply: {}", s);
            }
            status
        }
        _ => None,
    })
}

fn de_service_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Object(map) => ["Service_Name", "service_name", "name", "Service"]
                    .iter()
                    .find_map(|key| map.get(*key).and_then(Value::as_str))
                    .map(str::to_string),
                _ => None,
            })
            .collect(),
        Value::String(s) => split_list(&s),
        _ => Vec::new(),
    })
}
