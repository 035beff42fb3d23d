//! File discovery and document loading.
//!
//! Accepts files and directories; directories are walked recursively and
//! filtered by a glob set (yaml files by default), in deterministic path
//! order. Parsing delegates to the model's document path, so `multi`
//! expansion and reserved-field handling behave identically for files and
//! template output.

use forgesync_core::{Error, Result};
use forgesync_model::{parse_documents, Document};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

pub const DEFAULT_GLOBS: &[&str] = &["*.yml", "*.yaml"];

#[derive(Debug)]
pub struct LoadResult {
    pub documents: Vec<Document>,
    pub files: usize,
}

/// Load all documents under the given paths.
pub fn load_paths(paths: &[PathBuf]) -> Result<LoadResult> {
    load_paths_filtered(paths, DEFAULT_GLOBS)
}

pub fn load_paths_filtered(paths: &[PathBuf], globs: &[&str]) -> Result<LoadResult> {
    let matcher = build_globset(globs)?;

    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            // explicitly named files bypass the glob filter
            files.push(path.clone());
        } else if path.is_dir() {
            files.extend(discover(path, &matcher));
        } else {
            return Err(Error::Config(format!(
                "no such file or directory: {}",
                path.display()
            )));
        }
    }

    let mut documents = Vec::new();
    let file_count = files.len();
    for file in files {
        let text = std::fs::read_to_string(&file)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", file.display(), e)))?;
        let docs = parse_documents(&text, &file)?;
        debug!(file = %file.display(), documents = docs.len(), "loaded");
        documents.extend(docs);
    }

    Ok(LoadResult {
        documents,
        files: file_count,
    })
}

fn build_globset(globs: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for glob in globs {
        builder.add(
            Glob::new(glob)
                .map_err(|e| Error::Config(format!("bad glob `{}`: {}", glob, e)))?,
        );
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("bad glob set: {}", e)))
}

fn discover(root: &Path, matcher: &GlobSet) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| matcher.is_match(entry.file_name()))
        .map(|entry| entry.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn directory_discovery_is_deterministic_and_filtered() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "b.yaml", "type: tag\nname: b\n");
        write(tmp.path(), "a.yaml", "type: tag\nname: a\n");
        write(tmp.path(), "notes.txt", "not yaml");
        write(tmp.path(), "sub/c.yml", "type: tag\nname: c\n");

        let result = load_paths(&[tmp.path().to_path_buf()]).unwrap();
        assert_eq!(result.files, 3);
        let names: Vec<&str> = result.documents.iter().filter_map(|d| d.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn explicit_file_skips_the_glob_filter() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "tags.conf", "type: tag\nname: x\n");
        let result = load_paths(&[tmp.path().join("tags.conf")]).unwrap();
        assert_eq!(result.documents.len(), 1);
    }

    #[test]
    fn missing_path_is_an_error() {
        let err = load_paths(&[PathBuf::from("/no/such/path")]).unwrap_err();
        assert!(err.to_string().contains("no such file"));
    }
}
