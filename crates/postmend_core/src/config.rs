use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::extract::{ContainerExtractor, DEFAULT_CLOSE_MARKER, DEFAULT_CONTAINER_CLASS};
use crate::runtime::ResolvedPaths;

pub const DEFAULT_COLLECTION: &str = "blog";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ToolConfig {
    #[serde(default)]
    pub extract: ExtractSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ExtractSection {
    pub container_class: Option<String>,
    pub open_marker: Option<String>,
    pub close_marker: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Json,
    Sqlite,
}

impl StoreBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Sqlite => "sqlite",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct StoreSection {
    pub backend: Option<StoreBackend>,
    pub backup: Option<bool>,
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CollectionSection {
    pub data_file: Option<String>,
    pub table: Option<String>,
    pub templates_dir: Option<String>,
    pub template_pattern: Option<String>,
}

/// A collection with every location resolved against the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub name: String,
    pub data_file: PathBuf,
    pub table: String,
    pub templates_dir: PathBuf,
    pub template_pattern: String,
}

const BUILTIN_COLLECTIONS: &[(&str, &str, &str, &str, &str)] = &[
    (
        "blog",
        "static/data/blogs.json",
        "blogs",
        "templates/blogs",
        "blog_{id}.html",
    ),
    (
        "news",
        "static/data/news.json",
        "news",
        "templates/news",
        "news_{id}.html",
    ),
];

impl ToolConfig {
    /// Env POSTMEND_CONTAINER_CLASS > config > DEFAULT_CONTAINER_CLASS.
    pub fn container_class(&self) -> String {
        self.container_class_with_lookup(|key| env::var(key).ok())
    }

    fn container_class_with_lookup<F>(&self, lookup_env: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = non_empty(lookup_env("POSTMEND_CONTAINER_CLASS")) {
            return value;
        }
        self.extract
            .container_class
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTAINER_CLASS.to_string())
    }

    /// Explicit markers win over the class shorthand.
    pub fn build_extractor(&self) -> Result<ContainerExtractor> {
        if let Some(open) = self.extract.open_marker.as_deref() {
            let close = self
                .extract
                .close_marker
                .as_deref()
                .unwrap_or(DEFAULT_CLOSE_MARKER);
            return ContainerExtractor::new(open, close);
        }
        let extractor = ContainerExtractor::for_class(&self.container_class())?;
        match self.extract.close_marker.as_deref() {
            Some(close) => ContainerExtractor::new(extractor.open_marker(), close),
            None => Ok(extractor),
        }
    }

    /// Env POSTMEND_STORE_BACKEND > config > json.
    pub fn store_backend(&self) -> Result<StoreBackend> {
        self.store_backend_with_lookup(|key| env::var(key).ok())
    }

    fn store_backend_with_lookup<F>(&self, lookup_env: F) -> Result<StoreBackend>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = non_empty(lookup_env("POSTMEND_STORE_BACKEND")) {
            return StoreBackend::parse(&value).ok_or_else(|| {
                anyhow::anyhow!("POSTMEND_STORE_BACKEND must be `json` or `sqlite`, got `{value}`")
            });
        }
        Ok(self.store.backend.unwrap_or_default())
    }

    pub fn backup_enabled(&self) -> bool {
        self.store.backup.unwrap_or(true)
    }

    pub fn db_path(&self, paths: &ResolvedPaths) -> PathBuf {
        match self.store.db_path.as_deref() {
            Some(path) => paths.project_path(path),
            None => paths.db_path.clone(),
        }
    }

    /// Built-in `blog` and `news` merged with config overrides, plus any extra
    /// collections the config declares. Sorted by name.
    pub fn collections(&self, paths: &ResolvedPaths) -> Result<Vec<Collection>> {
        let mut merged: BTreeMap<String, CollectionSection> = BUILTIN_COLLECTIONS
            .iter()
            .map(|(name, data_file, table, templates_dir, pattern)| {
                (
                    (*name).to_string(),
                    CollectionSection {
                        data_file: Some((*data_file).to_string()),
                        table: Some((*table).to_string()),
                        templates_dir: Some((*templates_dir).to_string()),
                        template_pattern: Some((*pattern).to_string()),
                    },
                )
            })
            .collect();

        for (name, section) in &self.collections {
            let entry = merged.entry(name.clone()).or_default();
            if section.data_file.is_some() {
                entry.data_file = section.data_file.clone();
            }
            if section.table.is_some() {
                entry.table = section.table.clone();
            }
            if section.templates_dir.is_some() {
                entry.templates_dir = section.templates_dir.clone();
            }
            if section.template_pattern.is_some() {
                entry.template_pattern = section.template_pattern.clone();
            }
        }

        merged
            .into_iter()
            .map(|(name, section)| resolve_collection(paths, name, section))
            .collect()
    }

    pub fn collection(&self, paths: &ResolvedPaths, name: &str) -> Result<Collection> {
        let name = name.trim();
        let collections = self.collections(paths)?;
        let known = collections
            .iter()
            .map(|collection| collection.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        collections
            .into_iter()
            .find(|collection| collection.name == name)
            .ok_or_else(|| anyhow::anyhow!("unknown collection `{name}` (known: {known})"))
    }
}

fn resolve_collection(
    paths: &ResolvedPaths,
    name: String,
    section: CollectionSection,
) -> Result<Collection> {
    let Some(data_file) = section.data_file else {
        bail!("collection `{name}` needs data_file");
    };
    let Some(templates_dir) = section.templates_dir else {
        bail!("collection `{name}` needs templates_dir");
    };
    let template_pattern = section
        .template_pattern
        .unwrap_or_else(|| format!("{name}_{{id}}.html"));
    let table = section.table.unwrap_or_else(|| name.clone());
    Ok(Collection {
        data_file: paths.project_path(&data_file),
        templates_dir: paths.project_path(&templates_dir),
        name,
        table,
        template_pattern,
    })
}

/// Load and parse a ToolConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ToolConfig> {
    if !config_path.exists() {
        return Ok(ToolConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ToolConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;
    use crate::extract::Extractor;
    use crate::runtime::{
        PathOverrides, ResolutionContext, render_materialized_config, resolve_paths_with_lookup,
    };

    fn test_paths(root: &Path) -> ResolvedPaths {
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

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, ToolConfig::default());
        assert!(config.backup_enabled());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[extract\ncontainer_class = 1").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn materialized_config_parses_back() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        fs::create_dir_all(&paths.state_dir).expect("state dir");
        fs::write(&paths.config_path, render_materialized_config(&paths)).expect("write config");

        let config = load_config(&paths.config_path).expect("load config");
        assert_eq!(config.store.backend, Some(StoreBackend::Json));
        assert_eq!(config.extract.container_class.as_deref(), Some("blog-body"));
        let collections = config.collections(&paths).expect("collections");
        assert_eq!(collections.len(), 2);
    }

    #[test]
    fn builtin_collections_resolve_against_project_root() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        let config = ToolConfig::default();

        let blog = config.collection(&paths, DEFAULT_COLLECTION).expect("blog");
        assert_eq!(blog.data_file, temp.path().join("static/data/blogs.json"));
        assert_eq!(blog.templates_dir, temp.path().join("templates/blogs"));
        assert_eq!(blog.template_pattern, "blog_{id}.html");
        assert_eq!(blog.table, "blogs");

        let news = config.collection(&paths, "news").expect("news");
        assert_eq!(news.template_pattern, "news_{id}.html");

        let error = config.collection(&paths, "mypage").expect_err("unknown");
        assert!(error.to_string().contains("known: blog, news"));
    }

    #[test]
    fn config_overrides_and_extends_collections() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        let config: ToolConfig = toml::from_str(
            r#"
[collections.blog]
templates_dir = "legacy/blogs"

[collections.column]
data_file = "static/data/columns.json"
templates_dir = "templates/columns"
"#,
        )
        .expect("parse config");

        let collections = config.collections(&paths).expect("collections");
        let names: Vec<&str> = collections.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["blog", "column", "news"]);

        let blog = &collections[0];
        assert_eq!(blog.templates_dir, temp.path().join("legacy/blogs"));
        assert_eq!(blog.data_file, temp.path().join("static/data/blogs.json"));

        let column = &collections[1];
        assert_eq!(column.template_pattern, "column_{id}.html");
        assert_eq!(column.table, "column");
    }

    #[test]
    fn incomplete_extra_collection_is_rejected() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        let config: ToolConfig =
            toml::from_str("[collections.video]\ntable = \"videos\"\n").expect("parse config");
        let error = config.collections(&paths).expect_err("must fail");
        assert!(error.to_string().contains("needs data_file"));
    }

    #[test]
    fn env_overrides_config_values() {
        let config: ToolConfig = toml::from_str(
            "[extract]\ncontainer_class = \"post-body\"\n[store]\nbackend = \"sqlite\"\n",
        )
        .expect("parse config");

        let env = HashMap::from([
            ("POSTMEND_CONTAINER_CLASS".to_string(), "entry".to_string()),
            ("POSTMEND_STORE_BACKEND".to_string(), "JSON".to_string()),
        ]);
        let lookup = |key: &str| env.get(key).cloned();
        assert_eq!(config.container_class_with_lookup(lookup), "entry");
        assert_eq!(
            config.store_backend_with_lookup(lookup).expect("backend"),
            StoreBackend::Json
        );

        assert_eq!(config.container_class_with_lookup(|_| None), "post-body");
        assert_eq!(
            config.store_backend_with_lookup(|_| None).expect("backend"),
            StoreBackend::Sqlite
        );

        let bad = HashMap::from([("POSTMEND_STORE_BACKEND".to_string(), "csv".to_string())]);
        assert!(
            config
                .store_backend_with_lookup(|key| bad.get(key).cloned())
                .is_err()
        );
    }

    #[test]
    fn explicit_markers_build_extractor() {
        let config: ToolConfig = toml::from_str(
            "[extract]\nopen_marker = \"<section id=\\\"content\\\">\"\nclose_marker = \"</section>\"\n",
        )
        .expect("parse config");
        let extractor = config.build_extractor().expect("extractor");
        assert_eq!(
            extractor.extract("<section id=\"content\">a<br>b</section>"),
            Some("a\nb".to_string())
        );
    }

    #[test]
    fn db_path_defaults_to_state_dir() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        assert_eq!(ToolConfig::default().db_path(&paths), paths.db_path);

        let config: ToolConfig =
            toml::from_str("[store]\ndb_path = \"site.db\"\n").expect("parse config");
        assert_eq!(config.db_path(&paths), temp.path().join("site.db"));
    }
}
