//! Reconciles model results with the uploaded lead rows.

use std::collections::HashMap;

use crate::models::{EnrichedLead, LeadRecord, ScoredLead};
use crate::scoring::classify_status;

/// Joins `per_lead` results onto the leads by exact `Lead_ID`.
///
/// Output has one entry per input lead, in input order. Matched leads lose
/// their raw engagement counters and get the scored fields, with
/// `Initial_Lead_Score` rescaled to 0-100; unmatched leads pass through
/// unscored. When several results share a `Lead_ID` the last one wins.
pub fn enrich(leads: &[LeadRecord], per_lead: &[ScoredLead]) -> Vec<EnrichedLead> {
    let mut by_id: HashMap<&str, &ScoredLead> = HashMap::with_capacity(per_lead.len());
    for scored in per_lead {
        if by_id.insert(scored.lead_id.as_str(), scored).is_some() {
            tracing::warn!(
                "Duplicate Lead_ID {} in AI reply, keeping the last result",
                scored.lead_id
            );
        }
    }

    let mut unmatched = 0usize;
    let enriched: Vec<EnrichedLead> = leads
        .iter()
        .map(|lead| match by_id.get(lead.lead_id.as_str()) {
            Some(scored) => merge_one(lead, scored),
            None => {
                unmatched += 1;
                EnrichedLead::unscored(lead.clone())
            }
        })
        .collect();

    if unmatched > 0 {
        tracing::debug!("{} lead(s) had no AI result", unmatched);
    }
    enriched
}

fn merge_one(lead: &LeadRecord, scored: &ScoredLead) -> EnrichedLead {
    let mut record = lead.clone();
    record.email_opens = None;
    record.web_visits = None;
    record.campaign_clicks = None;

    let status = scored.status.unwrap_or_else(|| {
        classify_status(
            lead.is_converted(),
            scored.initial_lead_score,
            scored.conversion_probability,
        )
    });

    EnrichedLead {
        lead: record,
        profile_score: Some(scored.profile_score),
        initial_lead_score: Some(scored.initial_lead_score * 100.0),
        conversion_probability: Some(scored.conversion_probability),
        recommended_services: Some(scored.recommended_services.clone()),
        status: Some(status),
        engagement_summary: Some(scored.engagement_summary.clone()),
    }
}
