//! Ingestion orchestrator
//!
//! One `IngestionSession` per uploaded file:
//! Uploaded -> Parsed -> Mapped -> Validated -> Committing -> Committed | PartiallyFailed.
//!
//! Sessions are plain values owned by `IngestionSessions`. The registry lock
//! is held only around the synchronous transitions; the commit loop runs
//! outside it on the rows handed out by `begin_commit`.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::coercion::coerce_cell;
use crate::services::error_report::{render_error_report, report_file_name};
use crate::services::field_catalog::declared_type_of;
use crate::services::mapping::{self, clear_shadowed_overrides, ColumnMapping, MappingError, TemplateError};
use crate::services::progress::{floor_percent, notify, ProgressPublisher};
use crate::services::spreadsheet::{SheetGrid, SpreadsheetError};
use crate::services::store::{DebtorStore, StoreError};
use crate::services::validator::validate_row;
use crate::types::{
    ColumnOptions, CommitResponse, DebtorInput, ErrorReportResponse, FieldDescriptor, ImportIssue,
    IngestionStage, ProgressKind, RowError, RowErrors, SessionSummary, ValidateResponse,
};

/// Sessions untouched for this long are dropped on the next upload
pub const SESSION_TTL_HOURS: i64 = 12;

/// Issue field used when a commit failure is not tied to one field
pub const ROW_FIELD: &str = "_row";

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("Ingestion session {0} not found")]
    SessionNotFound(Uuid),

    #[error("Cannot {action} while the session is {stage:?}")]
    InvalidState {
        action: &'static str,
        stage: IngestionStage,
    },

    #[error(transparent)]
    Spreadsheet(#[from] SpreadsheetError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// A validated row waiting to be stored
#[derive(Debug, Clone)]
pub struct PendingRow {
    pub index: usize,
    pub payload: Value,
    pub input: DebtorInput,
}

pub struct IngestionSession {
    id: Uuid,
    owner_id: String,
    file_name: String,
    stage: IngestionStage,
    grid: SheetGrid,
    mapping: ColumnMapping,
    defaults: Map<String, Value>,
    overrides: BTreeMap<usize, Map<String, Value>>,
    validated: Vec<PendingRow>,
    errors: RowErrors,
    touched_at: DateTime<Utc>,
}

impl IngestionSession {
    /// New session for a decoded upload. Decoding happens before the session
    /// exists, so it starts out parsed.
    pub fn new(owner_id: &str, file_name: &str, grid: SheetGrid) -> Self {
        let mut session = Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            file_name: file_name.to_string(),
            stage: IngestionStage::Uploaded,
            grid,
            mapping: ColumnMapping::new(),
            defaults: Map::new(),
            overrides: BTreeMap::new(),
            validated: Vec::new(),
            errors: RowErrors::new(),
            touched_at: Utc::now(),
        };
        session.stage = IngestionStage::Parsed;
        session
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id,
            file_name: self.file_name.clone(),
            stage: self.stage,
            headers: self.grid.headers().to_vec(),
            row_count: self.grid.row_count(),
            mapping: self.mapping.to_map(),
            defaults: self.defaults.clone(),
            overrides: self.overrides.clone(),
        }
    }

    fn ensure(&self, action: &'static str, allowed: &[IngestionStage]) -> Result<(), IngestionError> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(IngestionError::InvalidState {
                action,
                stage: self.stage,
            })
        }
    }

    // =========================================================================
    // Mapping
    // =========================================================================

    /// Replace mapping, uniform defaults and per-row overrides
    pub fn set_mapping(
        &mut self,
        pairs: &BTreeMap<usize, String>,
        defaults: Map<String, Value>,
        overrides: BTreeMap<usize, Map<String, Value>>,
        fields: &[FieldDescriptor],
    ) -> Result<(), IngestionError> {
        self.ensure("change the mapping", REMAPPABLE)?;

        let mapping = ColumnMapping::from_pairs(pairs, self.grid.width())?;
        if let Some(unknown) = mapping.unknown_fields(fields).into_iter().next() {
            return Err(MappingError::UnknownField(unknown).into());
        }

        self.install_mapping(mapping, defaults, overrides);
        Ok(())
    }

    /// Re-apply a saved template. On any failure the session is left as it was.
    pub fn apply_template(
        &mut self,
        template_headers: &[String],
        template_mapping: &BTreeMap<usize, String>,
        fields: &[FieldDescriptor],
    ) -> Result<(), IngestionError> {
        self.ensure("apply a template", REMAPPABLE)?;

        let mapping = mapping::apply_template(template_headers, template_mapping, self.grid.headers(), fields)?;

        let defaults = std::mem::take(&mut self.defaults);
        let overrides = std::mem::take(&mut self.overrides);
        self.install_mapping(mapping, defaults, overrides);
        Ok(())
    }

    fn install_mapping(
        &mut self,
        mapping: ColumnMapping,
        defaults: Map<String, Value>,
        mut overrides: BTreeMap<usize, Map<String, Value>>,
    ) {
        let row_count = self.grid.row_count();
        overrides.retain(|row, _| *row < row_count);
        for manual in overrides.values_mut() {
            clear_shadowed_overrides(&mapping, manual);
        }
        overrides.retain(|_, manual| !manual.is_empty());

        self.mapping = mapping;
        self.defaults = defaults;
        self.overrides = overrides;
        self.validated.clear();
        self.errors.clear();
        self.stage = IngestionStage::Mapped;
    }

    /// Choice list per column
    pub fn column_options(&self, fields: &[FieldDescriptor]) -> Vec<ColumnOptions> {
        self.grid
            .headers()
            .iter()
            .enumerate()
            .map(|(column, header)| ColumnOptions {
                column,
                header: header.clone(),
                selected: self.mapping.field_for(column).map(String::from),
                options: self.mapping.options_for(column, fields),
            })
            .collect()
    }

    // =========================================================================
    // Row building and validation
    // =========================================================================

    /// Mapped cells coerced to their declared types. Empty cells are left out;
    /// per-row overrides win over the sheet, defaults only fill gaps.
    pub fn mapped_row(&self, row: usize, fields: &[FieldDescriptor]) -> Map<String, Value> {
        let mut out = Map::new();
        let Some(cells) = self.grid.rows().get(row) else {
            return out;
        };

        for (column, field) in self.mapping.iter() {
            let raw = cells.get(column).map(String::as_str).unwrap_or_default();
            if raw.trim().is_empty() {
                continue;
            }
            out.insert(field.to_string(), coerce_cell(raw, declared_type_of(fields, field)));
        }

        if let Some(manual) = self.overrides.get(&row) {
            for (key, value) in manual {
                out.insert(key.clone(), value.clone());
            }
        }

        for (key, value) in &self.defaults {
            if !out.contains_key(key) {
                out.insert(key.clone(), value.clone());
            }
        }

        out
    }

    /// Validate every row. Rows become eligible for commit only when none fail.
    pub fn validate(&mut self, fields: &[FieldDescriptor], now: DateTime<Utc>) -> Result<ValidateResponse, IngestionError> {
        self.ensure("validate", &[IngestionStage::Mapped, IngestionStage::Validated])?;

        let mut clean = Vec::with_capacity(self.grid.row_count());
        let mut errors = RowErrors::new();

        for index in 0..self.grid.row_count() {
            let row = nest_groups(self.mapped_row(index, fields));
            match validate_row(&row, now) {
                Ok(input) => clean.push(PendingRow {
                    index,
                    payload: Value::Object(row),
                    input,
                }),
                Err(field_errors) => {
                    let payload = Value::Object(row);
                    let issues = field_errors
                        .into_iter()
                        .map(|(field, message)| {
                            let value = value_at(&payload, &field);
                            ImportIssue::error(index, field, message).with_value(value)
                        })
                        .collect();
                    errors.insert(index, RowError { issues, payload });
                }
            }
        }

        if errors.is_empty() {
            self.validated = clean;
            self.stage = IngestionStage::Validated;
        } else {
            self.validated.clear();
            self.stage = IngestionStage::Mapped;
        }
        self.errors = errors;

        debug!(
            "Session {} validated: {} rows, {} failing",
            self.id,
            self.grid.row_count(),
            self.errors.len()
        );

        Ok(ValidateResponse {
            session_id: self.id,
            stage: self.stage,
            row_count: self.grid.row_count(),
            eligible_count: self.validated.len(),
            errors: self.errors.clone(),
        })
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Hand out the rows to store. From `PartiallyFailed` these are only the
    /// rows that failed last time.
    pub fn begin_commit(&mut self) -> Result<Vec<PendingRow>, IngestionError> {
        self.ensure("commit", &[IngestionStage::Validated, IngestionStage::PartiallyFailed])?;
        self.stage = IngestionStage::Committing;
        Ok(self.validated.clone())
    }

    pub fn finish_commit(&mut self, report: CommitReport) -> CommitResponse {
        if report.failed == 0 {
            self.stage = IngestionStage::Committed;
            self.validated.clear();
        } else {
            self.stage = IngestionStage::PartiallyFailed;
            self.validated = report.failed_rows;
        }
        self.errors = report.errors;

        CommitResponse {
            session_id: self.id,
            stage: self.stage,
            succeeded: report.succeeded,
            failed: report.failed,
            errors: self.errors.clone(),
        }
    }

    /// Validation and commit errors as a CSV download
    pub fn error_report(&self) -> anyhow::Result<ErrorReportResponse> {
        let (content, line_count) = render_error_report(&self.errors)?;
        Ok(ErrorReportResponse {
            file_name: report_file_name(&self.file_name),
            content_type: "text/csv".to_string(),
            content,
            line_count,
        })
    }
}

const REMAPPABLE: &[IngestionStage] = &[
    IngestionStage::Parsed,
    IngestionStage::Mapped,
    IngestionStage::Validated,
    IngestionStage::PartiallyFailed,
];

/// Collapse `Group.subField` keys into `Group: [{ subField: value }]`
pub fn nest_groups(row: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    let mut groups: BTreeMap<String, Map<String, Value>> = BTreeMap::new();

    for (key, value) in row {
        match key.split_once('.') {
            Some((group, sub)) if !group.is_empty() && !sub.is_empty() => {
                groups
                    .entry(group.to_string())
                    .or_default()
                    .insert(sub.to_string(), value);
            }
            _ => {
                out.insert(key, value);
            }
        }
    }

    for (group, members) in groups {
        out.insert(group, Value::Array(vec![Value::Object(members)]));
    }
    out
}

/// Text of the value at a dotted path such as `mobilePhones.1`
fn value_at(payload: &Value, path: &str) -> Option<String> {
    let mut current = payload;
    for segment in path.split('.') {
        current = match current {
            Value::Object(obj) => obj.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    match current {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

// =============================================================================
// Commit loop
// =============================================================================

#[derive(Debug, Default)]
pub struct CommitReport {
    pub succeeded: u32,
    pub failed: u32,
    pub errors: RowErrors,
    pub failed_rows: Vec<PendingRow>,
}

/// Store rows one at a time. Failures are recorded per row and do not stop
/// the loop; rows already stored stay stored. Progress is published each
/// time the floored percentage moves.
pub async fn commit_rows(
    store: &dyn DebtorStore,
    progress: &dyn ProgressPublisher,
    uid: &str,
    rows: Vec<PendingRow>,
) -> CommitReport {
    let total = rows.len();
    let mut report = CommitReport::default();
    let mut last_published = None;

    for (i, row) in rows.into_iter().enumerate() {
        match store.create_debtor(&row.input).await {
            Ok(id) => {
                report.succeeded += 1;
                debug!("Row {} stored as debtor {}", row.index, id);
            }
            Err(e) => {
                report.failed += 1;
                warn!("Row {} rejected: {}", row.index, e);

                let issue = match &e {
                    StoreError::Duplicate { field, value } => {
                        ImportIssue::error(row.index, field.clone(), e.to_string()).with_value(Some(value.clone()))
                    }
                    _ => ImportIssue::error(row.index, ROW_FIELD, e.to_string()),
                };
                report.errors.insert(
                    row.index,
                    RowError {
                        issues: vec![issue],
                        payload: row.payload.clone(),
                    },
                );
                report.failed_rows.push(row);
            }
        }

        let percent = floor_percent(i + 1, total);
        if last_published != Some(percent) {
            notify(progress, uid, ProgressKind::Ingestion, percent).await;
            last_published = Some(percent);
        }
    }

    report
}

// =============================================================================
// Session registry
// =============================================================================

/// Live sessions keyed by id. A session is visible only to its owner.
#[derive(Default)]
pub struct IngestionSessions {
    sessions: Mutex<HashMap<Uuid, IngestionSession>>,
}

impl IngestionSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: IngestionSession) -> Uuid {
        let id = session.id;
        let mut sessions = self.sessions.lock();

        let cutoff = Utc::now() - Duration::hours(SESSION_TTL_HOURS);
        let before = sessions.len();
        sessions.retain(|_, s| s.touched_at > cutoff || s.stage == IngestionStage::Committing);
        if sessions.len() < before {
            info!("Dropped {} expired ingestion sessions", before - sessions.len());
        }

        sessions.insert(id, session);
        id
    }

    /// Run a transition on one session under the registry lock
    pub fn with_session<R>(
        &self,
        id: Uuid,
        owner_id: &str,
        f: impl FnOnce(&mut IngestionSession) -> Result<R, IngestionError>,
    ) -> Result<R, IngestionError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(&id)
            .filter(|s| s.owner_id == owner_id)
            .ok_or(IngestionError::SessionNotFound(id))?;
        session.touched_at = Utc::now();
        f(session)
    }

    /// Drop a session, unless a commit is running on it
    pub fn remove(&self, id: Uuid, owner_id: &str) -> Result<(), IngestionError> {
        let mut sessions = self.sessions.lock();
        match sessions.get(&id) {
            Some(s) if s.owner_id == owner_id => {
                if s.stage == IngestionStage::Committing {
                    return Err(IngestionError::InvalidState {
                        action: "discard",
                        stage: s.stage,
                    });
                }
                sessions.remove(&id);
                Ok(())
            }
            _ => Err(IngestionError::SessionNotFound(id)),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }
}

/// Begin, run and finish a commit on a registered session
pub async fn commit_session(
    sessions: &IngestionSessions,
    session_id: Uuid,
    owner_id: &str,
    store: &dyn DebtorStore,
    progress: &dyn ProgressPublisher,
) -> Result<CommitResponse, IngestionError> {
    let rows = sessions.with_session(session_id, owner_id, |s| s.begin_commit())?;
    let report = commit_rows(store, progress, owner_id, rows).await;
    sessions.with_session(session_id, owner_id, |s| Ok(s.finish_commit(report)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::progress::FakeProgressPublisher;
    use crate::services::store::memory::MemoryDebtorStore;
    use crate::types::DeclaredType;
    use chrono::TimeZone;
    use serde_json::json;

    const HEADERS: &str = "Nama;Tgl Lahir;Produk;HP;Outstanding;Pokok;Bayar Terakhir;KTP;Bank;Ukuran";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap()
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("firstName", "First Name", DeclaredType::Text),
            FieldDescriptor::new("dateOfBirth", "Date Of Birth", DeclaredType::Dateonly),
            FieldDescriptor::new("productName", "Product Name", DeclaredType::Enum),
            FieldDescriptor::new("mobilePhones", "Mobile Phones", DeclaredType::Json),
            FieldDescriptor::new("outstandingAmount", "Outstanding Amount", DeclaredType::Decimal),
            FieldDescriptor::new("principalAmount", "Principal Amount", DeclaredType::Decimal),
            FieldDescriptor::new("lastPaymentAmount", "Last Payment Amount", DeclaredType::Decimal),
            FieldDescriptor::new("nationalId", "National Id", DeclaredType::String),
            FieldDescriptor::new("BankAccounts.bankName", "Bank Accounts: Bank Name", DeclaredType::Text),
            FieldDescriptor::new("size", "Size", DeclaredType::String),
            FieldDescriptor::new("collectorId", "Collector Id", DeclaredType::String),
        ]
    }

    fn full_mapping() -> BTreeMap<usize, String> {
        [
            "firstName",
            "dateOfBirth",
            "productName",
            "mobilePhones",
            "outstandingAmount",
            "principalAmount",
            "lastPaymentAmount",
            "nationalId",
            "BankAccounts.bankName",
        ]
        .iter()
        .enumerate()
        .map(|(i, f)| (i, f.to_string()))
        .collect()
    }

    fn row(name: &str, national_id: &str) -> String {
        format!("{};12/04/1985;KTA;081234567890;5.450.000,50;10.000.000;0;{};BCA;", name, national_id)
    }

    fn grid(rows: &[String]) -> SheetGrid {
        let records = std::iter::once(HEADERS.to_string())
            .chain(rows.iter().cloned())
            .map(|line| line.split(';').map(String::from).collect())
            .collect();
        SheetGrid::from_records(records).unwrap()
    }

    fn mapped_session(rows: &[String]) -> IngestionSession {
        let mut session = IngestionSession::new("u1", "debtors.csv", grid(rows));
        session
            .set_mapping(&full_mapping(), Map::new(), BTreeMap::new(), &fields())
            .unwrap();
        session
    }

    fn five_rows_with_bad_third() -> Vec<String> {
        vec![
            row("Budi", "3171000000000001"),
            row("Siti", "3171000000000002"),
            row("J", "3171000000000003"),
            row("Andi", "3171000000000004"),
            row("Dewi", "3171000000000005"),
        ]
    }

    #[test]
    fn test_new_session_is_parsed() {
        let session = IngestionSession::new("u1", "debtors.csv", grid(&[row("Budi", "1")]));
        assert_eq!(session.stage, IngestionStage::Parsed);
        assert_eq!(session.summary().row_count, 1);
        assert_eq!(session.summary().headers.len(), 10);
    }

    #[test]
    fn test_mapped_row_coerces_and_omits_empty_cells() {
        let session = mapped_session(&[row("Budi", "")]);
        let mapped = session.mapped_row(0, &fields());

        assert_eq!(mapped["dateOfBirth"], json!("1985-04-12"));
        assert_eq!(mapped["outstandingAmount"].as_f64(), Some(5_450_000.5));
        assert_eq!(mapped["mobilePhones"], json!(["081234567890"]));
        assert!(!mapped.contains_key("nationalId"));
    }

    #[test]
    fn test_unmapped_columns_are_excluded() {
        let mut session = IngestionSession::new("u1", "debtors.csv", grid(&[row("Budi", "1")]));
        let pairs = BTreeMap::from([(0, "firstName".to_string())]);
        session.set_mapping(&pairs, Map::new(), BTreeMap::new(), &fields()).unwrap();

        let mapped = session.mapped_row(0, &fields());
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped["firstName"], json!("Budi"));
    }

    #[test]
    fn test_defaults_fill_gaps_and_overrides_win() {
        let mut session = IngestionSession::new("u1", "debtors.csv", grid(&[row("Budi", "1"), row("Siti", "2")]));
        let defaults = json!({ "collectorId": "c7", "firstName": "ignored" }).as_object().unwrap().clone();
        let overrides = BTreeMap::from([(1, json!({ "size": "L" }).as_object().unwrap().clone())]);
        session.set_mapping(&full_mapping(), defaults, overrides, &fields()).unwrap();

        let first = session.mapped_row(0, &fields());
        assert_eq!(first["collectorId"], json!("c7"));
        assert_eq!(first["firstName"], json!("Budi"));
        assert!(!first.contains_key("size"));

        let second = session.mapped_row(1, &fields());
        assert_eq!(second["size"], json!("L"));
    }

    #[test]
    fn test_size_override_cleared_when_size_is_mapped() {
        let mut session = IngestionSession::new("u1", "debtors.csv", grid(&[row("Budi", "1")]));
        let overrides = BTreeMap::from([(0, json!({ "size": "L" }).as_object().unwrap().clone())]);
        let mut pairs = full_mapping();
        pairs.insert(9, "size".to_string());

        session.set_mapping(&pairs, Map::new(), overrides, &fields()).unwrap();
        assert!(session.summary().overrides.is_empty());
    }

    #[test]
    fn test_set_mapping_rejects_duplicates_and_unknown_fields() {
        let mut session = IngestionSession::new("u1", "debtors.csv", grid(&[row("Budi", "1")]));

        let pairs = BTreeMap::from([(0, "firstName".to_string()), (1, "firstName".to_string())]);
        let err = session.set_mapping(&pairs, Map::new(), BTreeMap::new(), &fields()).unwrap_err();
        assert!(matches!(err, IngestionError::Mapping(MappingError::FieldTaken { .. })));

        let pairs = BTreeMap::from([(0, "nickname".to_string())]);
        let err = session.set_mapping(&pairs, Map::new(), BTreeMap::new(), &fields()).unwrap_err();
        assert!(matches!(err, IngestionError::Mapping(MappingError::UnknownField(_))));

        assert_eq!(session.stage, IngestionStage::Parsed);
    }

    #[test]
    fn test_nest_groups() {
        let row = json!({ "firstName": "Budi", "BankAccounts.bankName": "BCA", "BankAccounts.accountNumber": "123" })
            .as_object()
            .unwrap()
            .clone();
        let nested = nest_groups(row);
        assert_eq!(nested["BankAccounts"], json!([{ "bankName": "BCA", "accountNumber": "123" }]));
        assert_eq!(nested["firstName"], json!("Budi"));
        assert!(!nested.contains_key("BankAccounts.bankName"));
    }

    #[test]
    fn test_batch_gate_rejects_whole_batch() {
        let mut session = mapped_session(&five_rows_with_bad_third());
        let result = session.validate(&fields(), now()).unwrap();

        assert_eq!(result.eligible_count, 0);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors.contains_key(&2));
        assert_eq!(result.errors[&2].issues[0].field, "firstName");
        assert_eq!(result.errors[&2].issues[0].original_value.as_deref(), Some("J"));
        assert_eq!(session.stage, IngestionStage::Mapped);
        assert!(matches!(session.begin_commit(), Err(IngestionError::InvalidState { .. })));
    }

    #[test]
    fn test_clean_batch_becomes_validated() {
        let mut session = mapped_session(&[row("Budi", "1"), row("Siti", "2")]);
        let result = session.validate(&fields(), now()).unwrap();
        assert_eq!(result.eligible_count, 2);
        assert!(result.errors.is_empty());
        assert_eq!(session.stage, IngestionStage::Validated);
    }

    #[test]
    fn test_remapping_clears_validation() {
        let mut session = mapped_session(&[row("Budi", "1")]);
        session.validate(&fields(), now()).unwrap();
        session
            .set_mapping(&full_mapping(), Map::new(), BTreeMap::new(), &fields())
            .unwrap();
        assert_eq!(session.stage, IngestionStage::Mapped);
        assert!(session.begin_commit().is_err());
    }

    #[test]
    fn test_validate_requires_mapping() {
        let mut session = IngestionSession::new("u1", "debtors.csv", grid(&[row("Budi", "1")]));
        assert!(matches!(
            session.validate(&fields(), now()),
            Err(IngestionError::InvalidState { stage: IngestionStage::Parsed, .. })
        ));
    }

    #[test]
    fn test_template_mismatch_leaves_session_untouched() {
        let mut session = mapped_session(&[row("Budi", "1")]);
        let before = session.mapping.clone();

        let mut headers: Vec<String> = HEADERS.split(';').map(String::from).collect();
        headers[1] = "Birthday".to_string();
        let template_mapping = BTreeMap::from([(0, "firstName".to_string())]);

        let err = session.apply_template(&headers, &template_mapping, &fields()).unwrap_err();
        match err {
            IngestionError::Template(TemplateError::HeaderMismatch(diff)) => assert_eq!(diff[0].column, 1),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(session.mapping, before);
    }

    #[test]
    fn test_template_applies_on_matching_headers() {
        let mut session = IngestionSession::new("u1", "debtors.csv", grid(&[row("Budi", "1")]));
        let headers: Vec<String> = HEADERS.split(';').map(String::from).collect();
        session.apply_template(&headers, &full_mapping(), &fields()).unwrap();
        assert_eq!(session.stage, IngestionStage::Mapped);
        assert_eq!(session.mapping.to_map(), full_mapping());
    }

    #[test]
    fn test_column_options_hide_taken_fields() {
        let session = mapped_session(&[row("Budi", "1")]);
        let options = session.column_options(&fields());
        assert_eq!(options.len(), 10);
        assert_eq!(options[0].selected.as_deref(), Some("firstName"));
        assert!(options[0].options.iter().any(|f| f.name == "firstName"));
        assert!(!options[9].options.iter().any(|f| f.name == "firstName"));
        assert!(options[9].options.iter().any(|f| f.name == "size"));
    }

    #[tokio::test]
    async fn test_commit_stores_rows_and_reports_progress() {
        let mut session = mapped_session(&[row("Budi", "1"), row("Siti", "2"), row("Andi", "3")]);
        session.validate(&fields(), now()).unwrap();

        let store = MemoryDebtorStore::new();
        let progress = FakeProgressPublisher::new();
        let rows = session.begin_commit().unwrap();
        assert_eq!(session.stage, IngestionStage::Committing);

        let report = commit_rows(&store, &progress, "u1", rows).await;
        let response = session.finish_commit(report);

        assert_eq!(response.succeeded, 3);
        assert_eq!(response.stage, IngestionStage::Committed);
        assert_eq!(store.created_names(), vec!["Budi", "Siti", "Andi"]);
        assert_eq!(progress.values(), vec![33, 66, 100]);
    }

    #[tokio::test]
    async fn test_progress_ends_with_exactly_one_hundred() {
        for total in [1usize, 3, 7, 199, 250] {
            let rows: Vec<PendingRow> = (0..total)
                .map(|index| PendingRow {
                    index,
                    payload: Value::Null,
                    input: DebtorInput::default(),
                })
                .collect();
            let progress = FakeProgressPublisher::new();
            commit_rows(&MemoryDebtorStore::new(), &progress, "u1", rows).await;

            let values = progress.values();
            assert_eq!(values.last(), Some(&100), "total {}", total);
            assert_eq!(values.iter().filter(|v| **v == 100).count(), 1, "total {}", total);
        }
    }

    #[tokio::test]
    async fn test_duplicate_rows_fail_individually_and_can_be_resubmitted() {
        let mut session = mapped_session(&[row("Budi", "1"), row("Siti", "1"), row("Andi", "3")]);
        session.validate(&fields(), now()).unwrap();

        let store = MemoryDebtorStore::new();
        let progress = FakeProgressPublisher::new();
        let report = commit_rows(&store, &progress, "u1", session.begin_commit().unwrap()).await;
        let response = session.finish_commit(report);

        assert_eq!(response.stage, IngestionStage::PartiallyFailed);
        assert_eq!((response.succeeded, response.failed), (2, 1));
        let issue = &response.errors[&1].issues[0];
        assert_eq!(issue.field, "nationalId");
        assert_eq!(issue.original_value.as_deref(), Some("1"));
        assert_eq!(response.errors[&1].payload["firstName"], json!("Siti"));

        // only the failed row goes out again
        let retry = session.begin_commit().unwrap();
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].index, 1);
    }

    #[tokio::test]
    async fn test_commit_session_through_registry() {
        let sessions = IngestionSessions::new();
        let mut session = mapped_session(&[row("Budi", "1")]);
        session.validate(&fields(), now()).unwrap();
        let id = sessions.insert(session);

        let store = MemoryDebtorStore::new();
        let progress = FakeProgressPublisher::new();

        let other = commit_session(&sessions, id, "someone-else", &store, &progress).await;
        assert!(matches!(other, Err(IngestionError::SessionNotFound(_))));

        let response = commit_session(&sessions, id, "u1", &store, &progress).await.unwrap();
        assert_eq!(response.stage, IngestionStage::Committed);

        let again = commit_session(&sessions, id, "u1", &store, &progress).await;
        assert!(matches!(again, Err(IngestionError::InvalidState { .. })));
    }

    #[test]
    fn test_registry_remove() {
        let sessions = IngestionSessions::new();
        let id = sessions.insert(IngestionSession::new("u1", "a.csv", grid(&[row("Budi", "1")])));
        assert!(sessions.remove(id, "u2").is_err());
        sessions.remove(id, "u1").unwrap();
        assert_eq!(sessions.len(), 0);
    }

    #[test]
    fn test_error_report_from_validation() {
        let mut session = mapped_session(&five_rows_with_bad_third());
        session.validate(&fields(), now()).unwrap();
        let report = session.error_report().unwrap();
        assert_eq!(report.file_name, "debtors-errors.csv");
        assert_eq!(report.line_count, 1);
        assert!(report.content.contains("\"2\",\"firstName\""));
    }
}
