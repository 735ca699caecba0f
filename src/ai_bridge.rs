//! Contract between the upload pipeline and whatever produces lead scores.
//!
//! A [`Scorer`] turns a batch into raw reply text, either by prompting a
//! [`TextModel`] or by running the local [`ScoringEngine`]. The reply is
//! then cleaned into an [`AiReply`], which never fails: anything unusable
//! becomes [`AiReply::NoData`].

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::errors::AppError;
use crate::models::{LeadRecord, PerLeadResponse, ReferenceData, ScoredLead};
use crate::scoring::ScoringEngine;

const SCORING_INSTRUCTIONS: &str = r#"You are a lead scoring assistant. Score every lead of the "leads" array using the reference data that follows.

For each lead compute:
1. Profile_Score: 1.0 if the job title is CTO, CIO or CEO; 0.7 for a Director; 0.4 for a Manager; 0.1 otherwise.
2. Industry_Encoded: relevance of the lead's industry to the services catalog, between 0 and 1.
3. Company_Size_Normalized: company size scaled to 0..1.
4. Engagement_Summary_Score: Email_Opens, Web_Visits and Campaign_Clicks normalized to 0..1.
5. Initial_Lead_Score = 0.3 * Profile_Score + 0.2 * Industry_Encoded + 0.2 * Company_Size_Normalized + 0.3 * Engagement_Summary_Score
6. Conversion_Probability between 0 and 1.
7. Status: "Converted" when the lead's Converted flag is set, otherwise "Interested" when Initial_Lead_Score >= 0.5 and Conversion_Probability >= 0.5, otherwise "Not Interested".
8. Recommended_Services: names of active services from the catalog matching the lead's Interested_Services, most relevant first.
9. Engagement_Summary: Total_Email_Opens, Total_Web_Visits, Total_Campaign_Clicks as integers and Last_Interaction_Date as YYYY-MM-DD.

Return only a JSON object of this shape, without commentary:
{
  "per_lead": [
    {
      "Lead_ID": "L-001",
      "Profile_Score": 1.0,
      "Initial_Lead_Score": 0.72,
      "Conversion_Probability": 0.68,
      "Recommended_Services": ["Cloud Infrastructure"],
      "Status": "Interested",
      "Engagement_Summary": {
        "Total_Email_Opens": 12,
        "Total_Web_Visits": 5,
        "Total_Campaign_Clicks": 3,
        "Last_Interaction_Date": "2024-01-20"
      }
    }
  ]
}"#;

/// Outcome of cleaning a model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum AiReply {
    Parsed(PerLeadResponse),
    NoData { reason: String },
}

impl AiReply {
    pub fn no_data(reason: impl Into<String>) -> Self {
        AiReply::NoData {
            reason: reason.into(),
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, AiReply::Parsed(_))
    }
}

/// A generative text model: prompt in, raw text out.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Short identifier used in logs and batch metadata.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, AppError>;
}

/// Produces the raw scoring reply for one batch.
#[async_trait]
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;

    async fn score(
        &self,
        leads: &[LeadRecord],
        reference: &ReferenceData,
    ) -> Result<String, AppError>;
}

/// Scores by prompting a text model.
#[derive(Clone)]
pub struct ModelScorer {
    model: Arc<dyn TextModel>,
}

impl ModelScorer {
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Scorer for ModelScorer {
    fn name(&self) -> &str {
        self.model.name()
    }

    async fn score(
        &self,
        leads: &[LeadRecord],
        reference: &ReferenceData,
    ) -> Result<String, AppError> {
        let prompt = build_scoring_prompt(leads, reference)?;
        tracing::debug!(
            "Sending scoring prompt to {} ({} chars, {} leads)",
            self.model.name(),
            prompt.len(),
            leads.len()
        );
        self.model.generate(&prompt).await
    }
}

/// Scores with the deterministic engine, producing the same reply shape a
/// model would.
#[derive(Clone, Default)]
pub struct LocalScorer {
    engine: ScoringEngine,
}

impl LocalScorer {
    pub fn new(engine: ScoringEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Scorer for LocalScorer {
    fn name(&self) -> &str {
        "local"
    }

    async fn score(
        &self,
        leads: &[LeadRecord],
        reference: &ReferenceData,
    ) -> Result<String, AppError> {
        let reply = PerLeadResponse {
            per_lead: self.engine.score_batch(leads, reference),
        };
        Ok(serde_json::to_string(&reply)?)
    }
}

/// Builds the scoring prompt: instructions followed by the batch as JSON.
pub fn build_scoring_prompt(
    leads: &[LeadRecord],
    reference: &ReferenceData,
) -> Result<String, AppError> {
    let payload = json!({
        "leads": leads,
        "services": reference.services,
        "pre_accounts": reference.pre_accounts,
        "running_accounts": reference.running_accounts,
    });
    let data = serde_json::to_string_pretty(&payload)?;
    Ok(format!("{}\n\nInput data:\n{}", SCORING_INSTRUCTIONS, data))
}

/// Cleans a scoring reply. Entries of `per_lead` that do not deserialize, or
/// whose scores fall outside [0,1], are dropped with a warning; a reply
/// without a `per_lead` array is NoData.
pub fn clean_ai_response(raw: &str) -> AiReply {
    let value = match parse_json_relaxed(raw) {
        Ok(value) => value,
        Err(reason) => {
            tracing::warn!("AI reply is not JSON: {}", reason);
            return AiReply::NoData { reason };
        }
    };

    let Some(entries) = value.get("per_lead").and_then(Value::as_array) else {
        let error = AppError::SchemaError("reply has no per_lead array".to_string());
        tracing::warn!("{}", error);
        return AiReply::no_data(error.to_string());
    };

    let mut per_lead = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        match serde_json::from_value::<ScoredLead>(entry.clone()) {
            Ok(scored) => match check_score_ranges(&scored) {
                Ok(()) => per_lead.push(scored),
                Err(reason) => tracing::warn!(
                    "Skipping per_lead[{}] ({}): {}",
                    idx,
                    scored.lead_id,
                    reason
                ),
            },
            Err(e) => tracing::warn!("Skipping per_lead[{}]: {}", idx, e),
        }
    }

    tracing::debug!(
        "AI reply cleaned: {}/{} entries usable",
        per_lead.len(),
        entries.len()
    );
    AiReply::Parsed(PerLeadResponse { per_lead })
}

/// Scores in a reply must be finite and within [0,1]. A reply on the
/// percent scale is rejected rather than rescaled twice.
fn check_score_ranges(scored: &ScoredLead) -> Result<(), String> {
    for (field, value) in [
        ("Profile_Score", scored.profile_score),
        ("Initial_Lead_Score", scored.initial_lead_score),
        ("Conversion_Probability", scored.conversion_probability),
    ] {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(format!("{} out of range: {}", field, value));
        }
    }
    Ok(())
}

/// Parses JSON out of a model reply that may carry markdown fences or
/// surrounding prose.
pub fn parse_json_relaxed(raw: &str) -> Result<Value, String> {
    let text = strip_code_fences(raw);
    if text.is_empty() {
        return Err("empty reply".to_string());
    }
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }
    match first_balanced_object(text) {
        Some(block) => {
            serde_json::from_str(block).map_err(|e| format!("invalid JSON object: {}", e))
        }
        None => Err("no JSON object found".to_string()),
    }
}

fn strip_code_fences(raw: &str) -> &str {
    let text = raw.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```JSON"))
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    let text = text.trim();
    text.strip_suffix("```").unwrap_or(text).trim()
}

/// First `{...}` block with balanced braces, ignoring braces inside strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = r#"{"per_lead":[{"Lead_ID":"L1","Initial_Lead_Score":0.61,"Status":"Interested"}]}"#;

    #[test]
    fn test_clean_plain_json() {
        match clean_ai_response(REPLY) {
            AiReply::Parsed(reply) => {
                assert_eq!(reply.per_lead.len(), 1);
                assert_eq!(reply.per_lead[0].lead_id, "L1");
            }
            other => panic!("expected parsed reply, got {:?}", other),
        }
    }

    #[test]
    fn test_clean_fenced_json() {
        let fenced = format!("```json\n{}\n```", REPLY);
        assert!(clean_ai_response(&fenced).is_parsed());

        let bare = format!("```\n{}\n```\n", REPLY);
        assert!(clean_ai_response(&bare).is_parsed());

        assert_eq!(
            clean_ai_response("```json\n{\"per_lead\":[]}\n```"),
            AiReply::Parsed(PerLeadResponse::default())
        );
    }

    #[test]
    fn test_clean_json_with_prose() {
        let chatty = format!("Sure! Here are the scores:\n{}\nLet me know.", REPLY);
        assert!(clean_ai_response(&chatty).is_parsed());
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_extraction() {
        let text = r#"note {"per_lead":[{"Lead_ID":"a}b"}]} trailing"#;
        match clean_ai_response(text) {
            AiReply::Parsed(reply) => assert_eq!(reply.per_lead[0].lead_id, "a}b"),
            other => panic!("expected parsed reply, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_no_data() {
        assert!(matches!(
            clean_ai_response("the model is overloaded"),
            AiReply::NoData { .. }
        ));
        assert!(matches!(clean_ai_response(""), AiReply::NoData { .. }));
        assert!(matches!(
            clean_ai_response("```json\n{\"per_lead\": [\n```"),
            AiReply::NoData { .. }
        ));
    }

    #[test]
    fn test_missing_per_lead_is_no_data() {
        assert!(matches!(
            clean_ai_response(r#"{"leads": []}"#),
            AiReply::NoData { .. }
        ));
    }

    #[test]
    fn test_bad_entries_are_skipped() {
        let reply = r#"{"per_lead":[{"Lead_ID":"L1"},{"Profile_Score":1.0},"nope"]}"#;
        match clean_ai_response(reply) {
            AiReply::Parsed(reply) => assert_eq!(reply.per_lead.len(), 1),
            other => panic!("expected parsed reply, got {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_scores_are_dropped() {
        let reply = r#"{"per_lead":[
            {"Lead_ID":"L1","Profile_Score":7,"Initial_Lead_Score":85,"Conversion_Probability":-2},
            {"Lead_ID":"L2","Initial_Lead_Score":"NaN"},
            {"Lead_ID":"L3","Profile_Score":1,"Initial_Lead_Score":0,"Conversion_Probability":1.0}
        ]}"#;
        match clean_ai_response(reply) {
            AiReply::Parsed(reply) => {
                let ids: Vec<&str> = reply.per_lead.iter().map(|s| s.lead_id.as_str()).collect();
                assert_eq!(ids, vec!["L3"]);
            }
            other => panic!("expected parsed reply, got {:?}", other),
        }
    }

    #[test]
    fn test_percent_scale_reply_keeps_no_entries() {
        let reply = r#"{"per_lead":[{"Lead_ID":"L1","Initial_Lead_Score":72,"Conversion_Probability":0.6}]}"#;
        assert_eq!(
            clean_ai_response(reply),
            AiReply::Parsed(PerLeadResponse::default())
        );
    }

    #[test]
    fn test_prompt_embeds_batch() {
        let leads = vec![LeadRecord {
            lead_id: "L-42".into(),
            ..Default::default()
        }];
        let prompt = build_scoring_prompt(&leads, &ReferenceData::default()).unwrap();
        assert!(prompt.contains("Initial_Lead_Score = 0.3 * Profile_Score"));
        assert!(prompt.contains("\"L-42\""));
        assert!(prompt.contains("\"running_accounts\""));
    }

    #[tokio::test]
    async fn test_local_scorer_reply_cleans_back() {
        let leads = vec![LeadRecord {
            lead_id: "L1".into(),
            job_title: "CEO".into(),
            converted: "yes".into(),
            ..Default::default()
        }];
        let raw = LocalScorer::default()
            .score(&leads, &ReferenceData::default())
            .await
            .unwrap();

        match clean_ai_response(&raw) {
            AiReply::Parsed(reply) => {
                assert_eq!(reply.per_lead[0].lead_id, "L1");
                assert_eq!(reply.per_lead[0].profile_score, 1.0);
                assert_eq!(
                    reply.per_lead[0].status,
                    Some(crate::models::LeadStatus::Converted)
                );
            }
            other => panic!("expected parsed reply, got {:?}", other),
        }
    }
}
