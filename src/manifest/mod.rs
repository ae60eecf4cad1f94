//! Structured manifests
//!
//! A [`Resource`] is one rendered object with its declaration order. The
//! loader here reads plain YAML trees; templating happens upstream.

use crate::error::{KeelError, KeelResult};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Identity of a resource in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub group: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.group.is_empty() {
            write!(f, "{}/", self.group)?;
        }
        write!(f, "{}/", self.kind)?;
        if let Some(ref ns) = self.namespace {
            write!(f, "{}/", ns)?;
        }
        f.write_str(&self.name)
    }
}

/// A rendered manifest
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub annotations: BTreeMap<String, String>,
    /// Full object as rendered
    pub body: Value,
    /// Position in the rendered set
    pub index: usize,
}

impl Resource {
    /// Build from a decoded object. `origin` names the source for errors.
    pub fn from_value(body: Value, index: usize, origin: &Path) -> KeelResult<Self> {
        let parse_err = |reason: &str| KeelError::ManifestParse {
            path: origin.to_path_buf(),
            reason: format!("document {}: {}", index, reason),
        };

        let str_field = |ptr: &str| body.pointer(ptr).and_then(Value::as_str).map(str::to_string);

        let kind = str_field("/kind").ok_or_else(|| parse_err("missing kind"))?;
        let name = str_field("/metadata/name").ok_or_else(|| parse_err("missing metadata.name"))?;
        let api_version = str_field("/apiVersion").unwrap_or_else(|| "v1".to_string());
        let namespace = str_field("/metadata/namespace").filter(|ns| !ns.is_empty());

        let annotations = match body.pointer("/metadata/annotations") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => (k.clone(), s.clone()),
                    other => (k.clone(), other.to_string()),
                })
                .collect(),
            Some(_) => return Err(parse_err("metadata.annotations is not a map")),
        };

        Ok(Self {
            api_version,
            kind,
            namespace,
            name,
            annotations,
            body,
            index,
        })
    }

    /// API group, empty for the core group
    pub fn group(&self) -> &str {
        self.api_version
            .split_once('/')
            .map(|(group, _)| group)
            .unwrap_or("")
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            group: self.group().to_string(),
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// Parse a multi-document YAML string, numbering from `first_index`
pub fn load_str(content: &str, origin: &Path, first_index: usize) -> KeelResult<Vec<Resource>> {
    let mut resources = Vec::new();

    for document in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(document).map_err(|e| KeelError::ManifestParse {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })?;

        if value.is_null() {
            continue;
        }

        let index = first_index + resources.len();
        resources.push(Resource::from_value(value, index, origin)?);
    }

    Ok(resources)
}

/// Load every `*.yaml` / `*.yml` under `dir`, ordered by relative path.
///
/// Hidden files and directories are skipped.
pub fn load_dir(dir: &Path) -> KeelResult<Vec<Resource>> {
    if !dir.is_dir() {
        return Err(KeelError::ManifestParse {
            path: dir.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
    {
        let entry = entry.map_err(|e| KeelError::io(format!("walking {}", dir.display()), e.into()))?;
        let is_manifest = entry
            .path()
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if entry.file_type().is_file() && is_manifest {
            files.push(entry.into_path());
        }
    }

    let mut resources = Vec::new();
    for file in files {
        let content = std::fs::read_to_string(&file)
            .map_err(|e| KeelError::io(format!("reading {}", file.display()), e))?;
        let loaded = load_str(&content, &file, resources.len())?;
        debug!("Loaded {} resource(s) from {}", loaded.len(), file.display());
        resources.extend(loaded);
    }

    Ok(resources)
}
