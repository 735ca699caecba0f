/// Scoring engine tests over realistic batches
/// Covers the full local path: score -> serialize -> clean -> merge
use lead_score_api::ai_bridge::{clean_ai_response, AiReply, LocalScorer, Scorer};
use lead_score_api::merge::enrich;
use lead_score_api::models::{
    AccountRecord, LeadRecord, LeadStatus, ReferenceData, ServiceRecord,
};
use lead_score_api::scoring::{
    ConversionCurveConfig, EngagementCaps, ScoringConfig, ScoringEngine,
};

/// Helper: lead with the fields the engine reads
fn lead(
    id: &str,
    title: &str,
    industry: &str,
    size: &str,
    counters: (&str, &str, &str),
    converted: &str,
) -> LeadRecord {
    LeadRecord {
        lead_id: id.to_string(),
        name: format!("Contact {}", id),
        company: format!("Company {}", id),
        industry: industry.to_string(),
        job_title: title.to_string(),
        company_size: size.to_string(),
        email_opens: Some(counters.0.to_string()),
        web_visits: Some(counters.1.to_string()),
        campaign_clicks: Some(counters.2.to_string()),
        converted: converted.to_string(),
        ..Default::default()
    }
}

fn reference() -> ReferenceData {
    ReferenceData {
        services: vec![
            ServiceRecord {
                service_id: "S1".to_string(),
                service_name: "Cloud".to_string(),
                category: Some("Infrastructure".to_string()),
                target_industries: Some("Technology".to_string()),
                status: Some("Active".to_string()),
                ..Default::default()
            },
            ServiceRecord {
                service_id: "S2".to_string(),
                service_name: "Security Audit".to_string(),
                category: Some("Security".to_string()),
                target_industries: Some("Finance, Insurance".to_string()),
                status: Some("Active".to_string()),
                ..Default::default()
            },
        ],
        pre_accounts: vec![AccountRecord {
            account_id: "P1".to_string(),
            company: "OldCo".to_string(),
            ..Default::default()
        }],
        running_accounts: Vec::new(),
    }
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn test_batch_scores_follow_the_formula() {
    let leads = vec![
        lead("L1", "CTO", "Technology", "Enterprise", ("10", "20", "4"), "No"),
        lead("L2", "Marketing Manager", "Agriculture", "51-200", ("5", "0", "2"), "No"),
    ];
    let engine = ScoringEngine::default();
    let reference = reference();
    let ctx = engine.context(&leads, &reference);

    let first = ctx.score_lead(&leads[0]);
    assert_eq!(first.profile_score, 1.0);
    assert_eq!(first.industry_encoded, 0.9);
    assert_eq!(first.company_size_normalized, 1.0);
    assert!(approx(first.engagement_score, 1.0));
    assert!(approx(first.initial_lead_score, 0.98));
    assert!(approx(first.conversion_probability, 0.98));
    assert_eq!(first.status, LeadStatus::Interested);

    let second = ctx.score_lead(&leads[1]);
    assert_eq!(second.profile_score, 0.4);
    assert_eq!(second.industry_encoded, 0.3);
    // midpoint 125.5 over [1, 1000]
    assert!(approx(second.company_size_normalized, 124.5 / 999.0));
    // 0.4 * 5/10 + 0.25 * 2/4
    assert!(approx(second.engagement_score, 0.325));
    assert_eq!(second.status, LeadStatus::NotInterested);
}

#[test]
fn test_converted_flag_overrides_scores() {
    let leads = vec![lead("L1", "Intern", "", "", ("0", "0", "0"), "TRUE")];
    let engine = ScoringEngine::default();
    let reference = reference();
    let score = engine.context(&leads, &reference).score_lead(&leads[0]);

    assert!(score.initial_lead_score < 0.5);
    assert_eq!(score.status, LeadStatus::Converted);
}

#[test]
fn test_configured_caps_replace_batch_maxima() {
    let leads = vec![lead("L1", "CEO", "Technology", "Startup", ("10", "10", "10"), "No")];
    let config = ScoringConfig {
        engagement_caps: EngagementCaps {
            email_opens: Some(20.0),
            web_visits: Some(20.0),
            campaign_clicks: Some(20.0),
        },
        ..Default::default()
    };
    let engine = ScoringEngine::new(config);
    let reference = reference();
    let score = engine.context(&leads, &reference).score_lead(&leads[0]);

    assert!(approx(score.engagement_score, 0.5));
}

#[test]
fn test_config_file_selects_logistic_curve() {
    let path = std::env::temp_dir().join(format!(
        "lead-score-config-{}.json",
        std::process::id()
    ));
    std::fs::write(
        &path,
        r#"{
            "industry_relevance": {"Agriculture": 1.0},
            "conversion_curve": {"kind": "logistic", "midpoint": 0.5, "steepness": 12.0}
        }"#,
    )
    .unwrap();

    let config = ScoringConfig::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(
        config.conversion_curve,
        ConversionCurveConfig::Logistic {
            midpoint: 0.5,
            steepness: 12.0
        }
    );

    let leads = vec![lead("L1", "CEO", "agriculture", "Startup", ("1", "1", "1"), "No")];
    let engine = ScoringEngine::new(config);
    let reference = reference();
    let score = engine.context(&leads, &reference).score_lead(&leads[0]);

    assert_eq!(score.industry_encoded, 1.0);
    // 0.3 + 0.2 + 0.0 + 0.3
    assert!(approx(score.initial_lead_score, 0.8));
    assert!(score.conversion_probability > score.initial_lead_score);
}

#[test]
fn test_missing_config_file_is_an_error() {
    assert!(ScoringConfig::load("/definitely/not/here.json").is_err());
}

#[tokio::test]
async fn test_local_scorer_round_trip_through_merge() {
    let mut cloud_lead = lead("L1", "CIO", "Technology", "Large", ("3", "8", "1"), "No");
    cloud_lead.interested_services = Some("cloud, Security".to_string());
    cloud_lead.last_interaction_date = Some("2024-01-20".to_string());
    let leads = vec![
        cloud_lead,
        lead("L2", "Analyst", "Retail", "Small", ("1", "1", "0"), "No"),
    ];
    let reference = reference();

    let raw = LocalScorer::default().score(&leads, &reference).await.unwrap();
    let AiReply::Parsed(reply) = clean_ai_response(&raw) else {
        panic!("local scorer reply must clean");
    };
    assert_eq!(reply.per_lead.len(), 2);

    let merged = enrich(&leads, &reply.per_lead);
    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].lead_id(), "L1");
    assert_eq!(
        merged[0].recommended_services.as_deref(),
        Some(&["Cloud".to_string(), "Security Audit".to_string()][..])
    );

    let summary = merged[0].engagement_summary.as_ref().unwrap();
    assert_eq!(summary.total_web_visits, 8);
    assert_eq!(
        summary.last_interaction_date,
        chrono::NaiveDate::from_ymd_opt(2024, 1, 20)
    );

    let display = merged[0].initial_lead_score.unwrap();
    assert!((0.0..=100.0).contains(&display));
    assert!(merged[0].lead.email_opens.is_none());
}

#[test]
fn test_scoring_is_deterministic() {
    let leads = vec![
        lead("L1", "VP Sales", "Finance", "200", ("4", "2", "9"), "no"),
        lead("L2", "CEO", "SaaS", "Medium", ("7", "1", "0"), "0"),
    ];
    let engine = ScoringEngine::default();
    let reference = reference();

    assert_eq!(
        engine.score_batch(&leads, &reference),
        engine.score_batch(&leads, &reference)
    );
}
