use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::{Collection, StoreBackend, ToolConfig};
use crate::preview::PreviewStore;
use crate::reconcile::{ReconciliationReport, Reconciler};
use crate::runtime::ResolvedPaths;
use crate::sqlite_store::SqliteStore;
use crate::store::{ContentStore, JsonFileStore};
use crate::template::DirTemplateStore;

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub dry_run: bool,
    pub no_backup: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreResult {
    pub collection: String,
    pub backend: &'static str,
    pub dry_run: bool,
    pub report: ReconciliationReport,
    /// Unified diff of the store, only for dry runs.
    pub diff: Option<String>,
}

/// A collection whose pass stopped on a fatal error.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionFailure {
    pub collection: String,
    pub error: String,
}

/// Results of running one pass per collection. A failure in one collection does not
/// stop the others; anything already written stays reported.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome<T> {
    pub completed: Vec<T>,
    pub failed: Vec<CollectionFailure>,
}

impl<T> BatchOutcome<T> {
    pub fn failed_names(&self) -> Vec<&str> {
        self.failed
            .iter()
            .map(|failure| failure.collection.as_str())
            .collect()
    }
}

pub fn run_each<T>(
    collections: &[Collection],
    mut run: impl FnMut(&Collection) -> Result<T>,
) -> BatchOutcome<T> {
    let mut outcome = BatchOutcome {
        completed: Vec::with_capacity(collections.len()),
        failed: Vec::new(),
    };
    for collection in collections {
        match run(collection) {
            Ok(value) => outcome.completed.push(value),
            Err(err) => {
                let error = format!("{err:#}");
                tracing::error!(collection = %collection.name, error = %error, "collection pass failed");
                outcome.failed.push(CollectionFailure {
                    collection: collection.name.clone(),
                    error,
                });
            }
        }
    }
    outcome
}

/// Builds the content store a collection is backed by.
pub fn open_content_store(
    paths: &ResolvedPaths,
    config: &ToolConfig,
    collection: &Collection,
    backup: bool,
) -> Result<Box<dyn ContentStore>> {
    match config.store_backend()? {
        StoreBackend::Json => {
            let mut store = JsonFileStore::new(&collection.data_file);
            if backup {
                store = store.with_backup_dir(paths.backups_dir.join(&collection.name));
            }
            Ok(Box::new(store))
        }
        StoreBackend::Sqlite => Ok(Box::new(SqliteStore::new(
            config.db_path(paths),
            &collection.table,
        )?)),
    }
}

pub fn open_template_store(collection: &Collection) -> Result<DirTemplateStore> {
    DirTemplateStore::new(&collection.templates_dir, &collection.template_pattern)
        .with_context(|| format!("invalid templates for collection `{}`", collection.name))
}

pub fn restore_collection(
    paths: &ResolvedPaths,
    config: &ToolConfig,
    collection: &Collection,
    options: &RestoreOptions,
) -> Result<RestoreResult> {
    let backend = config.store_backend()?;
    let backup = config.backup_enabled() && !options.no_backup && !options.dry_run;
    let content = open_content_store(paths, config, collection, backup)?;
    let templates = open_template_store(collection)?;
    let reconciler = Reconciler::new(config.build_extractor()?);

    tracing::debug!(
        collection = %collection.name,
        store = %content.describe(),
        templates = %templates.dir().display(),
        dry_run = options.dry_run,
        "starting reconciliation"
    );

    let (report, diff) = if options.dry_run {
        let preview = PreviewStore::new(content.as_ref());
        let report = reconciler.reconcile(&preview, &templates)?;
        (report, Some(preview.diff()?))
    } else {
        (reconciler.reconcile(content.as_ref(), &templates)?, None)
    };

    Ok(RestoreResult {
        collection: collection.name.clone(),
        backend: backend.as_str(),
        dry_run: options.dry_run,
        report,
        diff,
    })
}

pub fn restore_collections(
    paths: &ResolvedPaths,
    config: &ToolConfig,
    collections: &[Collection],
    options: &RestoreOptions,
) -> BatchOutcome<RestoreResult> {
    run_each(collections, |collection| {
        restore_collection(paths, config, collection, options)
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::*;
    use crate::runtime::{PathOverrides, ResolutionContext, resolve_paths_with_lookup};

    fn project(root: &Path) -> ResolvedPaths {
        fs::create_dir_all(root.join("static/data")).expect("data dir");
        fs::create_dir_all(root.join("templates/blogs")).expect("templates dir");
        let context = ResolutionContext {
            cwd: root.to_path_buf(),
            executable_dir: None,
        };
        let overrides = PathOverrides {
            project_root: Some(root.to_path_buf()),
            ..PathOverrides::default()
        };
        resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve paths")
    }

    fn json_config() -> ToolConfig {
        toml::from_str("[store]\nbackend = \"json\"\n").expect("parse config")
    }

    #[test]
    fn restore_writes_store_and_backup() {
        let temp = tempdir().expect("tempdir");
        let paths = project(temp.path());
        fs::write(
            temp.path().join("static/data/blogs.json"),
            r#"[{"id": 1, "body": ""}]"#,
        )
        .expect("write store");
        fs::write(
            temp.path().join("templates/blogs/blog_1.html"),
            "<div class=\"blog-body\">Hi</div>",
        )
        .expect("write template");

        let config = json_config();
        let collection = config.collection(&paths, "blog").expect("collection");
        let result = restore_collection(&paths, &config, &collection, &RestoreOptions::default())
            .expect("restore");
        assert_eq!(result.report.restored, 1);
        assert!(result.diff.is_none());

        let written =
            fs::read_to_string(temp.path().join("static/data/blogs.json")).expect("read store");
        assert!(written.contains("\"body\": \"Hi\""));
        let backups = fs::read_dir(paths.backups_dir.join("blog"))
            .expect("backup dir")
            .count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn dry_run_leaves_store_and_skips_backup() {
        let temp = tempdir().expect("tempdir");
        let paths = project(temp.path());
        let original = r#"[{"id": 1, "body": ""}]"#;
        fs::write(temp.path().join("static/data/blogs.json"), original).expect("write store");
        fs::write(
            temp.path().join("templates/blogs/blog_1.html"),
            "<div class=\"blog-body\">Hi</div>",
        )
        .expect("write template");

        let config = json_config();
        let collection = config.collection(&paths, "blog").expect("collection");
        let result = restore_collection(
            &paths,
            &config,
            &collection,
            &RestoreOptions {
                dry_run: true,
                no_backup: false,
            },
        )
        .expect("restore");
        assert!(result.dry_run);
        assert!(result.diff.as_deref().is_some_and(|diff| diff.contains("Hi")));
        assert_eq!(
            fs::read_to_string(temp.path().join("static/data/blogs.json")).expect("read store"),
            original
        );
        assert!(!paths.backups_dir.exists());
    }

    #[test]
    fn failing_collection_does_not_hide_completed_ones() {
        let temp = tempdir().expect("tempdir");
        let paths = project(temp.path());
        fs::write(
            temp.path().join("static/data/blogs.json"),
            r#"[{"id": 1, "body": ""}]"#,
        )
        .expect("write store");
        fs::write(
            temp.path().join("templates/blogs/blog_1.html"),
            "<div class=\"blog-body\">Hi</div>",
        )
        .expect("write template");

        let config = json_config();
        let collections = config.collections(&paths).expect("collections");
        let outcome =
            restore_collections(&paths, &config, &collections, &RestoreOptions::default());

        assert_eq!(outcome.completed.len(), 1);
        assert_eq!(outcome.completed[0].collection, "blog");
        assert_eq!(outcome.completed[0].report.restored, 1);
        assert_eq!(outcome.failed_names(), vec!["news"]);
        assert!(outcome.failed[0].error.contains("unavailable"));
        let written =
            fs::read_to_string(temp.path().join("static/data/blogs.json")).expect("read store");
        assert!(written.contains("\"body\": \"Hi\""));
    }

    #[test]
    fn missing_store_is_fatal() {
        let temp = tempdir().expect("tempdir");
        let paths = project(temp.path());
        let config = json_config();
        let collection = config.collection(&paths, "news").expect("collection");
        let error = restore_collection(&paths, &config, &collection, &RestoreOptions::default())
            .expect_err("must fail");
        assert!(error.to_string().contains("unavailable"));
    }
}
