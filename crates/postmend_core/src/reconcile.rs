use serde::Serialize;

use crate::extract::Extractor;
use crate::record::RecordId;
use crate::store::{ContentStore, StoreError};
use crate::template::TemplateStore;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Skipped,
    MissingTemplate,
    NoBodyFound,
    Restored,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::MissingTemplate => "missing_template",
            Self::NoBodyFound => "no_body_found",
            Self::Restored => "restored",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    pub id: RecordId,
    pub outcome: Outcome,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub store: String,
    pub total: usize,
    pub skipped: usize,
    pub restored: usize,
    pub missing_template: usize,
    pub no_body_found: usize,
    /// Every record that was not skipped, in store order.
    pub records: Vec<RecordOutcome>,
}

impl ReconciliationReport {
    fn new(store: String) -> Self {
        Self {
            store,
            total: 0,
            skipped: 0,
            restored: 0,
            missing_template: 0,
            no_body_found: 0,
            records: Vec::new(),
        }
    }

    fn record(&mut self, id: &RecordId, outcome: Outcome, detail: Option<String>) {
        self.total += 1;
        match outcome {
            Outcome::Skipped => {
                self.skipped += 1;
                return;
            }
            Outcome::MissingTemplate => self.missing_template += 1,
            Outcome::NoBodyFound => self.no_body_found += 1,
            Outcome::Restored => self.restored += 1,
        }
        self.records.push(RecordOutcome {
            id: id.clone(),
            outcome,
            detail,
        });
    }

    pub fn changed(&self) -> bool {
        self.restored > 0
    }

    pub fn ids_with(&self, outcome: Outcome) -> Vec<&RecordId> {
        self.records
            .iter()
            .filter(|entry| entry.outcome == outcome)
            .map(|entry| &entry.id)
            .collect()
    }
}

/// Backfills missing bodies from template documents: load a snapshot, mutate it in
/// memory, commit it once.
pub struct Reconciler<E> {
    extractor: E,
}

impl<E: Extractor> Reconciler<E> {
    pub fn new(extractor: E) -> Self {
        Self { extractor }
    }

    /// Only a load or save failure is returned as an error; per-record problems end
    /// up in the report. `save_all` is called exactly once when loading succeeds.
    pub fn reconcile(
        &self,
        content: &dyn ContentStore,
        templates: &dyn TemplateStore,
    ) -> Result<ReconciliationReport, StoreError> {
        let mut records = content.load_all()?;
        let mut report = ReconciliationReport::new(content.describe());

        for record in &mut records {
            if !record.needs_body() {
                report.record(record.id(), Outcome::Skipped, None);
                continue;
            }

            let document = match templates.read(record.id()) {
                Ok(Some(document)) => document,
                Ok(None) => {
                    tracing::warn!(id = %record.id(), "template document missing");
                    report.record(record.id(), Outcome::MissingTemplate, None);
                    continue;
                }
                Err(err) => {
                    tracing::warn!(id = %record.id(), error = %err, "failed to read template document");
                    report.record(
                        record.id(),
                        Outcome::MissingTemplate,
                        Some(format!("read failed: {err}")),
                    );
                    continue;
                }
            };

            match self.extractor.extract(&document) {
                Some(body) => {
                    record.set_body(body);
                    tracing::info!(id = %record.id(), "restored body");
                    report.record(record.id(), Outcome::Restored, None);
                }
                None => {
                    tracing::warn!(id = %record.id(), "no body container in template document");
                    report.record(record.id(), Outcome::NoBodyFound, None);
                }
            }
        }

        content.save_all(&records)?;
        tracing::info!(
            store = %report.store,
            restored = report.restored,
            missing_template = report.missing_template,
            no_body_found = report.no_body_found,
            skipped = report.skipped,
            "reconciliation pass complete"
        );
        Ok(report)
    }
}
