//! Local-directory document source.
//!
//! Walks a root directory for bill PDFs. The content version is the
//! SHA-256 of the file bytes, so it changes exactly when the content does,
//! which is the same contract the S3 source gets from ETags.

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::FsSourceConfig;
use crate::error::{Error, Result};
use crate::models::DocumentRef;
use crate::source::DocumentSource;

pub struct FsSource {
    config: FsSourceConfig,
    include_set: GlobSet,
    exclude_set: GlobSet,
}

impl FsSource {
    pub fn new(config: FsSourceConfig) -> Result<Self> {
        let include_set = build_globset(&config.include_globs)?;
        let exclude_set = build_globset(&config.exclude_globs)?;
        Ok(Self {
            config,
            include_set,
            exclude_set,
        })
    }

    fn resolve(&self, document_id: &str) -> std::path::PathBuf {
        self.config.root.join(document_id)
    }
}

#[async_trait]
impl DocumentSource for FsSource {
    fn describe(&self) -> String {
        format!("file://{}", self.config.root.display())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentRef>> {
        let root = &self.config.root;
        if !root.exists() {
            return Err(Error::Config(format!(
                "filesystem source root does not exist: {}",
                root.display()
            )));
        }

        let mut documents = Vec::new();

        for entry in WalkDir::new(root) {
            let entry = entry.map_err(|e| Error::ServiceUnavailable(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if self.exclude_set.is_match(&rel_str) {
                continue;
            }
            if !self.include_set.is_match(&rel_str) {
                continue;
            }

            let bytes = std::fs::read(path).map_err(|e| {
                Error::ServiceUnavailable(format!("failed to read {}: {}", path.display(), e))
            })?;

            documents.push(DocumentRef {
                document_id: rel_str,
                content_version: content_hash(&bytes),
            });
        }

        // Deterministic listing order
        documents.sort_by(|a, b| a.document_id.cmp(&b.document_id));
        Ok(documents)
    }

    async fn get_content(&self, document_id: &str) -> Result<Vec<u8>> {
        let path = self.resolve(document_id);
        std::fs::read(&path).map_err(|e| {
            Error::ServiceUnavailable(format!("failed to read {}: {}", path.display(), e))
        })
    }
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| Error::Config(e.to_string()))?);
    }
    builder.build().map_err(|e| Error::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FsSourceConfig;
    use tempfile::TempDir;

    fn source_for(root: &std::path::Path) -> FsSource {
        FsSource::new(FsSourceConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.pdf".to_string()],
            exclude_globs: vec!["**/drafts/**".to_string()],
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_lists_only_matching_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("acme.pdf"), b"one").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"two").unwrap();
        std::fs::create_dir_all(tmp.path().join("drafts")).unwrap();
        std::fs::write(tmp.path().join("drafts/wip.pdf"), b"three").unwrap();

        let source = source_for(tmp.path());
        let docs = source.list_documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].document_id, "acme.pdf");
    }

    #[tokio::test]
    async fn test_version_tracks_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("acme.pdf");
        std::fs::write(&path, b"march bill").unwrap();

        let source = source_for(tmp.path());
        let v1 = source.list_documents().await.unwrap()[0]
            .content_version
            .clone();
        let v1_again = source.list_documents().await.unwrap()[0]
            .content_version
            .clone();
        assert_eq!(v1, v1_again);

        std::fs::write(&path, b"april bill").unwrap();
        let v2 = source.list_documents().await.unwrap()[0]
            .content_version
            .clone();
        assert_ne!(v1, v2);
    }

    #[tokio::test]
    async fn test_get_content_roundtrip() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("acme.pdf"), b"payload").unwrap();

        let source = source_for(tmp.path());
        let bytes = source.get_content("acme.pdf").await.unwrap();
        assert_eq!(bytes, b"payload");
    }
}
