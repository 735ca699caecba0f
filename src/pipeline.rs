//! Upload-to-dashboard processing.
//!
//! An upload cycle collects one file per role. Once leads, services,
//! pre-accounts and running accounts are all staged, a scoring cycle runs:
//! 1. Convert rows into typed records
//! 2. Call the scorer
//! 3. Clean the reply
//! 4. Merge results onto the leads
//! 5. Rewrite the handoff store

use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::ai_bridge::{clean_ai_response, AiReply, Scorer};
use crate::errors::{AppError, ResultExt};
use crate::ingest::parse_upload;
use crate::merge::enrich;
use crate::models::{
    AccountRecord, BatchMeta, EnrichedLead, FileRole, LeadRecord, ParsedFile, ProcessingSummary,
    ReferenceData, RejectedFile, Row, ServiceRecord, StagedFile, UploadResponse, UploadStatus,
};
use crate::store::{BlobKey, HandoffStore};

pub const AI_STATUS_SCORED: &str = "scored";
pub const AI_STATUS_NO_DATA: &str = "no_data";

/// One file from a multipart request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// What happened to one uploaded file.
#[derive(Debug)]
pub enum FileOutcome {
    Accepted(ParsedFile),
    Ignored(String),
    Rejected(RejectedFile),
}

/// Files staged for the current upload cycle, one per role.
#[derive(Debug, Default)]
pub struct PendingUpload {
    files: BTreeMap<FileRole, ParsedFile>,
}

/// A complete set of role files, taken out of staging.
#[derive(Debug)]
pub struct UploadBatch {
    pub leads: ParsedFile,
    pub services: ParsedFile,
    pub pre_accounts: ParsedFile,
    pub running_accounts: ParsedFile,
}

impl PendingUpload {
    /// Stages a file. A later file for the same role replaces the earlier one.
    pub fn stage(&mut self, file: ParsedFile) {
        if let Some(previous) = self.files.insert(file.role, file) {
            tracing::info!(
                "Replacing staged {:?} file {}",
                previous.role,
                previous.file_name
            );
        }
    }

    pub fn missing_roles(&self) -> Vec<FileRole> {
        FileRole::ALL
            .into_iter()
            .filter(|role| !self.files.contains_key(role))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_roles().is_empty()
    }

    pub fn staged(&self) -> Vec<StagedFile> {
        self.files
            .values()
            .map(|file| StagedFile {
                role: file.role,
                file_name: file.file_name.clone(),
                rows: file.rows.len(),
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    /// Takes the staged files when every role is present and empties the
    /// staging area. Leaves staging untouched otherwise.
    pub fn take_batch(&mut self) -> Option<UploadBatch> {
        if !self.is_complete() {
            return None;
        }
        let mut take = |role: FileRole| self.files.remove(&role);
        Some(UploadBatch {
            leads: take(FileRole::Leads)?,
            services: take(FileRole::Services)?,
            pre_accounts: take(FileRole::PreAccounts)?,
            running_accounts: take(FileRole::RunningAccounts)?,
        })
    }
}

impl UploadBatch {
    /// Converts the rows into typed records.
    pub fn into_records(self) -> Result<(Vec<LeadRecord>, ReferenceData), AppError> {
        let leads = lead_records(&self.leads.rows)?;
        let reference = ReferenceData {
            services: self.services.rows.iter().map(ServiceRecord::from_row).collect(),
            pre_accounts: self
                .pre_accounts
                .rows
                .iter()
                .map(AccountRecord::from_row)
                .collect(),
            running_accounts: self
                .running_accounts
                .rows
                .iter()
                .map(AccountRecord::from_row)
                .collect(),
        };
        Ok((leads, reference))
    }
}

/// Converts lead rows; the first row without `Lead_ID` fails the file.
pub fn lead_records(rows: &[Row]) -> Result<Vec<LeadRecord>, AppError> {
    let mut seen = HashSet::new();
    rows.iter()
        .enumerate()
        .map(|(idx, row)| {
            let lead = LeadRecord::from_row(row).map_err(|e| {
                // +2: header line and 1-based numbering
                AppError::ParseError(format!("row {}: {}", idx + 2, e))
            })?;
            if !seen.insert(lead.lead_id.clone()) {
                tracing::warn!("Duplicate Lead_ID {} in leads file", lead.lead_id);
            }
            Ok(lead)
        })
        .collect()
}

/// Parses one file and, for a leads file, checks every row converts.
fn parse_and_validate(file: UploadedFile) -> FileOutcome {
    let reject = |error: AppError| {
        tracing::warn!("✗ Rejected {}: {}", file.file_name, error);
        FileOutcome::Rejected(RejectedFile {
            file_name: file.file_name.clone(),
            error: error.to_string(),
        })
    };

    match parse_upload(&file.file_name, &file.bytes) {
        Ok(Some(parsed)) => {
            if parsed.role == FileRole::Leads {
                if let Err(e) = lead_records(&parsed.rows) {
                    return reject(e);
                }
            }
            FileOutcome::Accepted(parsed)
        }
        Ok(None) => FileOutcome::Ignored(file.file_name.clone()),
        Err(e) => reject(e),
    }
}

/// Parses the files of one request on blocking threads, concurrently.
/// Outcomes come back in request order.
pub async fn parse_files(files: Vec<UploadedFile>) -> Result<Vec<FileOutcome>, AppError> {
    let count = files.len();
    let mut tasks = JoinSet::new();
    for (idx, file) in files.into_iter().enumerate() {
        tasks.spawn_blocking(move || (idx, parse_and_validate(file)));
    }

    let mut outcomes: Vec<Option<FileOutcome>> = (0..count).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        let (idx, outcome) = joined
            .map_err(|e| AppError::InternalError(format!("Parser task failed: {}", e)))?;
        outcomes[idx] = Some(outcome);
    }

    Ok(outcomes.into_iter().flatten().collect())
}

/// Staging area, scorer and store of one dataset.
pub struct Pipeline {
    scorer: Arc<dyn Scorer>,
    store: HandoffStore,
    pending: Mutex<PendingUpload>,
    cycle_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(scorer: Arc<dyn Scorer>, store: HandoffStore) -> Self {
        Self {
            scorer,
            store,
            pending: Mutex::new(PendingUpload::default()),
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &HandoffStore {
        &self.store
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    /// Parses and stages the files of one request, and runs the scoring
    /// cycle when the batch became complete.
    ///
    /// # Returns
    ///
    /// * `Result<UploadResponse, AppError>` - Per-file outcome, missing roles
    ///   and, when a cycle ran, its summary. `Conflict` when another cycle is
    ///   in progress; staged files are kept in that case.
    pub async fn accept_upload(&self, files: Vec<UploadedFile>) -> Result<UploadResponse, AppError> {
        tracing::info!("Step 1: Parsing {} uploaded file(s)", files.len());
        let outcomes = parse_files(files).await?;

        let mut response = UploadResponse {
            accepted: Vec::new(),
            ignored: Vec::new(),
            rejected: Vec::new(),
            missing_roles: Vec::new(),
            summary: None,
        };

        let mut pending = self.pending.lock().await;
        for outcome in outcomes {
            match outcome {
                FileOutcome::Accepted(parsed) => {
                    response.accepted.push(parsed.file_name.clone());
                    pending.stage(parsed);
                }
                FileOutcome::Ignored(name) => response.ignored.push(name),
                FileOutcome::Rejected(rejected) => response.rejected.push(rejected),
            }
        }

        response.missing_roles = pending.missing_roles();
        if !response.missing_roles.is_empty() {
            tracing::info!(
                "Waiting for {} more role(s): {:?}",
                response.missing_roles.len(),
                response.missing_roles
            );
            return Ok(response);
        }

        let _cycle = self.cycle_lock.try_lock().map_err(|_| {
            AppError::Conflict("A scoring cycle is already running".to_string())
        })?;
        let batch = pending.take_batch().ok_or_else(|| {
            AppError::InternalError("Staged batch disappeared".to_string())
        })?;
        drop(pending);

        response.summary = Some(self.process_batch(batch).await?);
        Ok(response)
    }

    /// Runs one scoring cycle over a complete batch. Only one cycle runs at
    /// a time; a concurrent attempt fails with `Conflict`.
    pub async fn run_scoring_cycle(&self, batch: UploadBatch) -> Result<ProcessingSummary, AppError> {
        let _cycle = self.cycle_lock.try_lock().map_err(|_| {
            AppError::Conflict("A scoring cycle is already running".to_string())
        })?;
        self.process_batch(batch).await
    }

    async fn process_batch(&self, batch: UploadBatch) -> Result<ProcessingSummary, AppError> {
        let batch_id = Uuid::new_v4();
        tracing::info!("Starting scoring cycle {}", batch_id);

        tracing::info!("Step 2: Converting rows into records");
        let raw_leads = batch.leads.rows.clone();
        let (leads, reference) = batch
            .into_records()
            .with_context(|| format!("Converting batch {}", batch_id))?;
        tracing::info!(
            "{} lead(s), {} service(s), {} pre-account(s), {} running account(s)",
            leads.len(),
            reference.services.len(),
            reference.pre_accounts.len(),
            reference.running_accounts.len()
        );

        tracing::info!("Step 3: Scoring with {}", self.scorer.name());
        let raw_reply = match self.scorer.score(&leads, &reference).await {
            Ok(raw) => Some(raw),
            Err(e) => {
                tracing::error!("✗ Scorer {} failed: {}", self.scorer.name(), e);
                None
            }
        };

        tracing::info!("Step 4: Cleaning reply");
        let reply = match raw_reply.as_deref() {
            Some(raw) => clean_ai_response(raw),
            None => AiReply::no_data("scorer call failed"),
        };

        tracing::info!("Step 5: Merging results");
        let (merged, message) = match &reply {
            AiReply::Parsed(parsed) => (
                enrich(&leads, &parsed.per_lead),
                format!("{} result(s) received", parsed.per_lead.len()),
            ),
            AiReply::NoData { reason } => {
                tracing::warn!("No AI data for cycle {}: {}", batch_id, reason);
                (
                    leads.into_iter().map(EnrichedLead::unscored).collect(),
                    format!("Leads stored without scores: {}", reason),
                )
            }
        };
        let scored_count = merged.iter().filter(|l| l.is_scored()).count();

        tracing::info!("Step 6: Writing handoff store");
        let meta = BatchMeta {
            batch_id,
            processed_at: Utc::now(),
            scorer: self.scorer.name().to_string(),
            lead_count: merged.len(),
            scored_count,
        };
        self.store.clear().await;
        self.store.write_json(BlobKey::RawLeads, &raw_leads).await?;
        if let Some(raw) = raw_reply {
            self.store.write(BlobKey::RawAiOutput, raw).await;
        }
        if let AiReply::Parsed(parsed) = &reply {
            self.store.write_json(BlobKey::CleanedAiOutput, parsed).await?;
        }
        self.store.write_json(BlobKey::MergedLeads, &merged).await?;
        self.store.write_json(BlobKey::BatchMeta, &meta).await?;

        tracing::info!(
            "✓ Cycle {} done: {}/{} lead(s) scored",
            batch_id,
            scored_count,
            meta.lead_count
        );

        Ok(ProcessingSummary {
            batch_id,
            lead_count: meta.lead_count,
            scored_count,
            ai_status: if reply.is_parsed() {
                AI_STATUS_SCORED
            } else {
                AI_STATUS_NO_DATA
            }
            .to_string(),
            message,
        })
    }

    /// Staged files, missing roles and the last completed cycle.
    pub async fn status(&self) -> UploadStatus {
        let pending = self.pending.lock().await;
        UploadStatus {
            staged: pending.staged(),
            missing_roles: pending.missing_roles(),
            last_batch: self.store.read_json(&BlobKey::BatchMeta).await,
        }
    }

    /// Forgets staged files and every stored blob.
    pub async fn reset(&self) {
        self.pending.lock().await.clear();
        self.store.clear().await;
        tracing::info!("Session reset");
    }

    /// Merged leads of the last cycle; empty before the first one.
    pub async fn merged_leads(&self) -> Vec<EnrichedLead> {
        self.store
            .read_json(&BlobKey::MergedLeads)
            .await
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(role: FileRole, name: &str) -> ParsedFile {
        ParsedFile {
            role,
            file_name: name.to_string(),
            rows: Vec::new(),
        }
    }

    #[test]
    fn test_barrier_waits_for_every_role() {
        let mut pending = PendingUpload::default();
        assert_eq!(pending.missing_roles(), FileRole::ALL.to_vec());

        pending.stage(parsed(FileRole::Leads, "Leads_data.csv"));
        pending.stage(parsed(FileRole::Services, "Services_data.csv"));
        pending.stage(parsed(FileRole::PreAccounts, "PreAccount_data.csv"));
        assert_eq!(pending.missing_roles(), vec![FileRole::RunningAccounts]);
        assert!(pending.take_batch().is_none());
        assert_eq!(pending.staged().len(), 3);

        pending.stage(parsed(FileRole::RunningAccounts, "RunningAccout_data.csv"));
        let batch = pending.take_batch().unwrap();
        assert_eq!(batch.running_accounts.file_name, "RunningAccout_data.csv");
        assert!(pending.staged().is_empty());
    }

    #[test]
    fn test_later_file_replaces_same_role() {
        let mut pending = PendingUpload::default();
        pending.stage(parsed(FileRole::Leads, "Leads_data_v1.csv"));
        pending.stage(parsed(FileRole::Leads, "Leads_data_v2.csv"));

        let staged = pending.staged();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].file_name, "Leads_data_v2.csv");
    }

    #[test]
    fn test_lead_rows_without_id_fail() {
        let mut row = Row::new();
        row.insert("Name".to_string(), "Ana".to_string());
        let err = lead_records(&[row]).unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }

    #[tokio::test]
    async fn test_parse_files_keeps_request_order() {
        let files = vec![
            UploadedFile {
                file_name: "readme.txt".to_string(),
                bytes: b"hello".to_vec(),
            },
            UploadedFile {
                file_name: "Leads_data.csv".to_string(),
                bytes: b"Name\nAna\n".to_vec(),
            },
            UploadedFile {
                file_name: "Services_data.csv".to_string(),
                bytes: b"Service_Name\nCloud\n".to_vec(),
            },
        ];

        let outcomes = parse_files(files).await.unwrap();
        assert!(matches!(outcomes[0], FileOutcome::Ignored(_)));
        assert!(matches!(outcomes[1], FileOutcome::Rejected(_)));
        assert!(matches!(outcomes[2], FileOutcome::Accepted(_)));
    }
}
