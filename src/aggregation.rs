//! Read-only views over the merged leads: stat cards, status chart, top
//! leads, filter facets and filtering.

use std::collections::HashMap;

use crate::models::{
    AggregateStats, ChartBucket, EnrichedLead, FacetCount, FilterFacets, LeadFilter,
    LeadStatus,
};

pub const DEFAULT_TOP_N: usize = 5;

/// Chart color of a status.
pub fn status_color(status: LeadStatus) -> &'static str {
    match status {
        LeadStatus::Interested => "#10B981",
        LeadStatus::Converted => "#6366F1",
        LeadStatus::NotInterested => "#EF4444",
    }
}

/// Counts by status, conversion rate and average display score.
///
/// The average divides by the total number of leads, so unscored leads pull
/// it down as zeros. An empty dataset yields all zeros.
pub fn compute_stats(leads: &[EnrichedLead]) -> AggregateStats {
    let total = leads.len();
    if total == 0 {
        return AggregateStats::default();
    }

    let count = |status: LeadStatus| leads.iter().filter(|l| l.status == Some(status)).count();
    let converted = count(LeadStatus::Converted);
    let score_sum: f64 = leads.iter().map(EnrichedLead::display_score).sum();

    AggregateStats {
        total_leads: total,
        interested_leads: count(LeadStatus::Interested),
        converted_leads: converted,
        not_interested_leads: count(LeadStatus::NotInterested),
        conversion_rate: converted as f64 / total as f64 * 100.0,
        average_score: score_sum / total as f64,
    }
}

/// Exactly three buckets, in chart order.
pub fn chart_buckets(stats: &AggregateStats) -> Vec<ChartBucket> {
    LeadStatus::ALL
        .into_iter()
        .map(|status| ChartBucket {
            name: status.as_str().to_string(),
            value: match status {
                LeadStatus::Interested => stats.interested_leads,
                LeadStatus::Converted => stats.converted_leads,
                LeadStatus::NotInterested => stats.not_interested_leads,
            },
            color: status_color(status).to_string(),
        })
        .collect()
}

/// Highest display scores first; ties keep dataset order.
pub fn top_n(leads: &[EnrichedLead], n: usize) -> Vec<EnrichedLead> {
    let mut ranked: Vec<&EnrichedLead> = leads.iter().collect();
    ranked.sort_by(|a, b| b.display_score().total_cmp(&a.display_score()));
    ranked.into_iter().take(n).cloned().collect()
}

/// Distinct non-empty values per filterable field with their counts.
pub fn filter_facets(leads: &[EnrichedLead]) -> FilterFacets {
    FilterFacets {
        industries: facet(leads, |l| Some(l.lead.industry.as_str())),
        sources: facet(leads, |l| l.lead.source.as_deref()),
        company_sizes: facet(leads, |l| Some(l.lead.company_size.as_str())),
        regions: facet(leads, |l| Some(l.lead.region.as_str())),
        statuses: facet(leads, |l| l.status.map(|s| s.as_str())),
    }
}

fn facet<'a, F>(leads: &'a [EnrichedLead], value: F) -> Vec<FacetCount>
where
    F: Fn(&'a EnrichedLead) -> Option<&'a str>,
{
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for lead in leads {
        if let Some(v) = value(lead).map(str::trim).filter(|v| !v.is_empty()) {
            *counts.entry(v).or_default() += 1;
        }
    }

    let mut facets: Vec<FacetCount> = counts
        .into_iter()
        .map(|(name, count)| FacetCount {
            name: name.to_string(),
            count,
        })
        .collect();
    facets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    facets
}

/// Applies search, facet, score and date filters. Every constraint must hold.
pub fn filter_leads(leads: &[EnrichedLead], filter: &LeadFilter) -> Vec<EnrichedLead> {
    let search = filter
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());
    let statuses = values(&filter.status);
    let industries = values(&filter.industry);
    let sizes = values(&filter.company_size);
    let sources = values(&filter.source);
    let regions = values(&filter.region);
    let date_range = filter.from.zip(filter.to);

    leads
        .iter()
        .filter(|lead| {
            if let Some(term) = &search {
                let record = &lead.lead;
                let hit = [
                    record.lead_id.as_str(),
                    record.name.as_str(),
                    record.company.as_str(),
                    record.industry.as_str(),
                    record.job_title.as_str(),
                ]
                .iter()
                .any(|field| field.to_lowercase().contains(term.as_str()));
                if !hit {
                    return false;
                }
            }

            let status = lead.status.map(|s| s.as_str());
            matches_any(&statuses, status)
                && matches_any(&industries, Some(lead.lead.industry.as_str()))
                && matches_any(&sizes, Some(lead.lead.company_size.as_str()))
                && matches_any(&sources, lead.lead.source.as_deref())
                && matches_any(&regions, Some(lead.lead.region.as_str()))
        })
        .filter(|lead| {
            let score = lead.display_score();
            filter.min_score.map_or(true, |min| score >= min)
                && filter.max_score.map_or(true, |max| score <= max)
        })
        .filter(|lead| match date_range {
            Some((from, to)) => lead
                .lead
                .created_date()
                .is_some_and(|created| created >= from && created <= to),
            None => true,
        })
        .cloned()
        .collect()
}

/// Number of selected facet values, plus one for a complete date range.
pub fn active_filter_count(filter: &LeadFilter) -> usize {
    let listed = [
        &filter.status,
        &filter.industry,
        &filter.company_size,
        &filter.source,
        &filter.region,
    ]
    .iter()
    .map(|field| values(field).len())
    .sum::<usize>();

    listed + usize::from(filter.from.is_some() && filter.to.is_some())
}

fn values(raw: &Option<String>) -> Vec<String> {
    raw.as_deref()
        .map(|s| {
            s.split(',')
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

// An empty selection does not constrain.
fn matches_any(selected: &[String], value: Option<&str>) -> bool {
    if selected.is_empty() {
        return true;
    }
    match value {
        Some(v) => {
            let v = v.trim().to_lowercase();
            selected.iter().any(|s| *s == v)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LeadRecord;
    use chrono::NaiveDate;

    fn enriched(id: &str, score: Option<f64>, status: Option<LeadStatus>) -> EnrichedLead {
        EnrichedLead {
            lead: LeadRecord {
                lead_id: id.to_string(),
                ..Default::default()
            },
            initial_lead_score: score,
            status,
            ..Default::default()
        }
    }

    #[test]
    fn test_stats_on_empty_dataset() {
        let stats = compute_stats(&[]);
        assert_eq!(stats, AggregateStats::default());
        assert_eq!(stats.conversion_rate, 0.0);
    }

    #[test]
    fn test_stats_count_missing_scores_as_zero() {
        let leads = vec![
            enriched("1", Some(80.0), Some(LeadStatus::Converted)),
            enriched("2", Some(40.0), Some(LeadStatus::Interested)),
            enriched("3", None, None),
            enriched("4", Some(20.0), Some(LeadStatus::NotInterested)),
        ];
        let stats = compute_stats(&leads);

        assert_eq!(stats.total_leads, 4);
        assert_eq!(stats.converted_leads, 1);
        assert_eq!(stats.interested_leads, 1);
        assert_eq!(stats.not_interested_leads, 1);
        assert_eq!(stats.conversion_rate, 25.0);
        assert_eq!(stats.average_score, 35.0);
    }

    #[test]
    fn test_chart_has_three_buckets_in_order() {
        let buckets = chart_buckets(&AggregateStats {
            interested_leads: 2,
            converted_leads: 1,
            ..Default::default()
        });

        let names: Vec<&str> = buckets.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Interested", "Converted", "Not Interested"]);
        assert_eq!(buckets[0].color, "#10B981");
        assert_eq!(buckets[1].color, "#6366F1");
        assert_eq!(buckets[2].color, "#EF4444");
        assert_eq!(buckets[2].value, 0);
    }

    #[test]
    fn test_top_n_is_stable() {
        let leads = vec![
            enriched("a", Some(50.0), None),
            enriched("b", None, None),
            enriched("c", Some(90.0), None),
            enriched("d", Some(50.0), None),
        ];
        let ids: Vec<String> = top_n(&leads, 3)
            .iter()
            .map(|l| l.lead_id().to_string())
            .collect();
        assert_eq!(ids, vec!["c", "a", "d"]);
        assert!(top_n(&leads, 0).is_empty());
        assert_eq!(top_n(&leads, 10).len(), 4);
    }

    #[test]
    fn test_facets_sorted_by_count_then_name() {
        let mut leads = Vec::new();
        for (id, industry) in [("1", "Retail"), ("2", "Finance"), ("3", "Retail"), ("4", ""), ("5", "Energy")] {
            let mut lead = enriched(id, None, None);
            lead.lead.industry = industry.to_string();
            leads.push(lead);
        }
        let facets = filter_facets(&leads);

        let names: Vec<(&str, usize)> = facets
            .industries
            .iter()
            .map(|f| (f.name.as_str(), f.count))
            .collect();
        assert_eq!(names, vec![("Retail", 2), ("Energy", 1), ("Finance", 1)]);
        assert!(facets.statuses.is_empty());
    }

    #[test]
    fn test_filter_by_search_status_and_score() {
        let mut a = enriched("L1", Some(80.0), Some(LeadStatus::Interested));
        a.lead.company = "TechNova".to_string();
        let b = enriched("L2", Some(30.0), Some(LeadStatus::Interested));
        let c = enriched("L3", Some(90.0), Some(LeadStatus::Converted));
        let leads = vec![a, b, c];

        let filter = LeadFilter {
            search: Some("technova".to_string()),
            ..Default::default()
        };
        assert_eq!(filter_leads(&leads, &filter).len(), 1);

        let filter = LeadFilter {
            status: Some("Interested, Converted".to_string()),
            min_score: Some(50.0),
            ..Default::default()
        };
        let ids: Vec<String> = filter_leads(&leads, &filter)
            .iter()
            .map(|l| l.lead_id().to_string())
            .collect();
        assert_eq!(ids, vec!["L1", "L3"]);
    }

    #[test]
    fn test_date_range_needs_both_bounds() {
        let mut early = enriched("L1", None, None);
        early.lead.created_at = Some("2024-01-05".to_string());
        let mut late = enriched("L2", None, None);
        late.lead.created_at = Some("2024-03-01".to_string());
        let undated = enriched("L3", None, None);
        let leads = vec![early, late, undated];

        let only_from = LeadFilter {
            from: NaiveDate::from_ymd_opt(2024, 2, 1),
            ..Default::default()
        };
        assert_eq!(filter_leads(&leads, &only_from).len(), 3);
        assert_eq!(active_filter_count(&only_from), 0);

        let both = LeadFilter {
            from: NaiveDate::from_ymd_opt(2024, 1, 1),
            to: NaiveDate::from_ymd_opt(2024, 1, 31),
            ..Default::default()
        };
        let ids: Vec<String> = filter_leads(&leads, &both)
            .iter()
            .map(|l| l.lead_id().to_string())
            .collect();
        assert_eq!(ids, vec!["L1"]);
        assert_eq!(active_filter_count(&both), 1);
    }

    #[test]
    fn test_active_filter_count_counts_values() {
        let filter = LeadFilter {
            status: Some("Interested,Converted".to_string()),
            industry: Some("Retail".to_string()),
            source: Some(" ".to_string()),
            search: Some("ignored".to_string()),
            ..Default::default()
        };
        assert_eq!(active_filter_count(&filter), 3);
    }
}
