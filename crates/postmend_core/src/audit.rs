use std::collections::HashSet;

use serde::Serialize;

use crate::config::{Collection, ToolConfig};
use crate::extract::Extractor;
use crate::record::RecordId;
use crate::restore::{BatchOutcome, open_content_store, open_template_store, run_each};
use crate::runtime::ResolvedPaths;
use crate::store::{ContentStore, StoreError};
use crate::template::TemplateStore;

#[derive(Debug, Clone, Serialize)]
pub struct TemplateError {
    pub id: RecordId,
    pub error: String,
}

/// Read-only integrity check over one collection. Nothing is written.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub store: String,
    pub records_total: usize,
    pub records_with_body: usize,
    pub restorable: Vec<RecordId>,
    pub missing_template: Vec<RecordId>,
    pub no_body_found: Vec<RecordId>,
    pub orphan_templates: Vec<RecordId>,
    pub template_errors: Vec<TemplateError>,
    pub template_listing_error: Option<String>,
}

impl AuditReport {
    pub fn records_missing_body(&self) -> usize {
        self.records_total - self.records_with_body
    }

    pub fn is_clean(&self) -> bool {
        self.records_missing_body() == 0
            && self.orphan_templates.is_empty()
            && self.template_listing_error.is_none()
    }
}

pub fn audit(
    content: &dyn ContentStore,
    templates: &dyn TemplateStore,
    extractor: &dyn Extractor,
) -> Result<AuditReport, StoreError> {
    let records = content.load_all()?;
    let mut report = AuditReport {
        store: content.describe(),
        records_total: records.len(),
        records_with_body: 0,
        restorable: Vec::new(),
        missing_template: Vec::new(),
        no_body_found: Vec::new(),
        orphan_templates: Vec::new(),
        template_errors: Vec::new(),
        template_listing_error: None,
    };

    for record in &records {
        if !record.needs_body() {
            report.records_with_body += 1;
            continue;
        }
        let id = record.id().clone();
        match templates.read(&id) {
            Ok(Some(document)) => {
                if extractor.extract(&document).is_some() {
                    report.restorable.push(id);
                } else {
                    report.no_body_found.push(id);
                }
            }
            Ok(None) => report.missing_template.push(id),
            Err(err) => {
                report.template_errors.push(TemplateError {
                    id: id.clone(),
                    error: err.to_string(),
                });
                report.missing_template.push(id);
            }
        }
    }

    // Templates are keyed by the id's file-name form, so `7` and `"7"` share one document.
    let known: HashSet<String> = records.iter().map(|record| record.id().to_string()).collect();
    match templates.list_ids() {
        Ok(ids) => {
            report.orphan_templates = ids
                .into_iter()
                .filter(|id| !known.contains(&id.to_string()))
                .collect();
        }
        Err(err) => {
            tracing::warn!(store = %report.store, error = %err, "failed to list template documents");
            report.template_listing_error = Some(err.to_string());
        }
    }

    Ok(report)
}

pub fn audit_collection(
    paths: &ResolvedPaths,
    config: &ToolConfig,
    collection: &Collection,
) -> anyhow::Result<AuditReport> {
    let content = open_content_store(paths, config, collection, false)?;
    let templates = open_template_store(collection)?;
    let extractor = config.build_extractor()?;
    Ok(audit(content.as_ref(), &templates, &extractor)?)
}

pub fn audit_collections(
    paths: &ResolvedPaths,
    config: &ToolConfig,
    collections: &[Collection],
) -> BatchOutcome<(String, AuditReport)> {
    run_each(collections, |collection| {
        Ok((
            collection.name.clone(),
            audit_collection(paths, config, collection)?,
        ))
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::extract::ContainerExtractor;
    use crate::store::JsonFileStore;
    use crate::template::DirTemplateStore;

    #[test]
    fn audit_classifies_records_and_finds_orphans() {
        let temp = tempdir().expect("tempdir");
        let data = temp.path().join("blogs.json");
        let templates_dir = temp.path().join("blogs");
        fs::create_dir_all(&templates_dir).expect("templates dir");
        let original = r#"[
  {"id": 1, "body": "kept"},
  {"id": 2, "body": ""},
  {"id": 3},
  {"id": 4, "body": null}
]"#;
        fs::write(&data, original).expect("write store");
        fs::write(
            templates_dir.join("blog_2.html"),
            "<div class=\"blog-body\">two</div>",
        )
        .expect("write template");
        fs::write(templates_dir.join("blog_4.html"), "<p>no container</p>").expect("write template");
        fs::write(templates_dir.join("blog_99.html"), "<p>stale</p>").expect("write template");

        let store = JsonFileStore::new(&data);
        let templates = DirTemplateStore::new(&templates_dir, "blog_{id}.html").expect("templates");
        let report = audit(&store, &templates, &ContainerExtractor::default()).expect("audit");

        assert_eq!(report.records_total, 4);
        assert_eq!(report.records_with_body, 1);
        assert_eq!(report.records_missing_body(), 3);
        assert_eq!(report.restorable, vec![RecordId::Int(2)]);
        assert_eq!(report.missing_template, vec![RecordId::Int(3)]);
        assert_eq!(report.no_body_found, vec![RecordId::Int(4)]);
        assert_eq!(report.orphan_templates, vec![RecordId::Int(99)]);
        assert!(!report.is_clean());

        assert_eq!(fs::read_to_string(&data).expect("read store"), original);
    }

    #[test]
    fn text_ids_own_their_numeric_looking_templates() {
        let temp = tempdir().expect("tempdir");
        let data = temp.path().join("blogs.json");
        let templates_dir = temp.path().join("blogs");
        fs::create_dir_all(&templates_dir).expect("templates dir");
        fs::write(&data, r#"[{"id": "7", "body": "done"}, {"id": "intro", "body": "x"}]"#)
            .expect("write store");
        fs::write(templates_dir.join("blog_7.html"), "<p>7</p>").expect("write template");
        fs::write(templates_dir.join("blog_intro.html"), "<p>intro</p>").expect("write template");

        let store = JsonFileStore::new(&data);
        let templates = DirTemplateStore::new(&templates_dir, "blog_{id}.html").expect("templates");
        let report = audit(&store, &templates, &ContainerExtractor::default()).expect("audit");
        assert!(report.orphan_templates.is_empty());
        assert!(report.is_clean());
    }

    #[test]
    fn complete_collection_is_clean() {
        let temp = tempdir().expect("tempdir");
        let data = temp.path().join("news.json");
        let templates_dir = temp.path().join("news");
        fs::create_dir_all(&templates_dir).expect("templates dir");
        fs::write(&data, r#"[{"id": 1, "body": "done"}]"#).expect("write store");
        fs::write(templates_dir.join("news_1.html"), "<p>1</p>").expect("write template");

        let store = JsonFileStore::new(&data);
        let templates = DirTemplateStore::new(&templates_dir, "news_{id}.html").expect("templates");
        let report = audit(&store, &templates, &ContainerExtractor::default()).expect("audit");
        assert!(report.is_clean());
    }
}
