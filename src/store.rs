//! Storage of signed documents and their metadata records

use crate::error::{Error, Result};
use crate::signing::compositor::AppliedPlacement;
use crate::signing::geometry::DocumentRect;
use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const FILES_DIR: &str = "signed-pdfs";
const RECORDS_DIR: &str = "signed_documents";

/// Final position of one signature in a stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlacementRecord {
    pub requested_page: u32,
    pub page: u32,
    pub rect: DocumentRect,
}

impl From<&AppliedPlacement> for PlacementRecord {
    fn from(p: &AppliedPlacement) -> Self {
        Self {
            requested_page: p.requested_page,
            page: p.page,
            rect: p.rect,
        }
    }
}

/// A signed document to be stored
#[derive(Debug, Clone)]
pub struct SignedDocument {
    pub owner_id: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub placements: Vec<PlacementRecord>,
}

/// Metadata kept for each stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SignedDocumentRecord {
    pub id: String,
    pub owner_id: String,
    pub original_file_name: String,
    pub signed_file_name: String,
    /// Location of the signed PDF inside the store
    pub file_path: String,
    /// RFC 3339, UTC
    pub signed_at: String,
    pub placements: Vec<PlacementRecord>,
    pub file_size: u64,
}

/// Where a document ended up
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct StoredDocument {
    pub document_id: String,
    pub path: String,
}

/// Persistence collaborator for signed documents
pub trait DocumentStore: Send + Sync {
    fn store(&self, document: &SignedDocument) -> Result<StoredDocument>;

    /// Records of one owner, newest first
    fn list(&self, owner_id: &str) -> Result<Vec<SignedDocumentRecord>>;

    /// Remove a record and its file
    fn delete(&self, document_id: &str) -> Result<SignedDocumentRecord>;
}

/// Stores signed PDFs and JSON records under a root directory
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn record_path(&self, document_id: &str) -> Result<PathBuf> {
        let id = uuid::Uuid::parse_str(document_id).map_err(|_| Error::DocumentNotFound {
            id: document_id.to_string(),
        })?;
        Ok(self.root.join(RECORDS_DIR).join(format!("{}.json", id)))
    }

    fn read_record(path: &Path) -> Result<SignedDocumentRecord> {
        let raw = fs::read(path).map_err(persistence)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

fn persistence(e: impl std::fmt::Display) -> Error {
    Error::Persistence {
        reason: e.to_string(),
    }
}

/// Reduce a user-supplied name to a single safe path component
fn sanitize_component(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

impl DocumentStore for FilesystemStore {
    fn store(&self, document: &SignedDocument) -> Result<StoredDocument> {
        let owner = sanitize_component(&document.owner_id)
            .ok_or_else(|| persistence("owner id is empty"))?;
        let file = sanitize_component(&document.file_name)
            .ok_or_else(|| persistence("file name is empty"))?;

        let owner_dir = self.root.join(FILES_DIR).join(&owner);
        fs::create_dir_all(&owner_dir).map_err(persistence)?;
        let records_dir = self.root.join(RECORDS_DIR);
        fs::create_dir_all(&records_dir).map_err(persistence)?;

        let now = Utc::now();
        let mut millis = now.timestamp_millis();
        let (signed_file_name, file_path) = loop {
            let name = format!("signed_{}_{}", millis, file);
            let path = owner_dir.join(&name);
            if !path.exists() {
                break (name, path);
            }
            millis += 1;
        };

        fs::write(&file_path, &document.bytes).map_err(persistence)?;

        let id = uuid::Uuid::new_v4().to_string();
        let relative = format!("{}/{}/{}", FILES_DIR, owner, signed_file_name);
        let record = SignedDocumentRecord {
            id: id.clone(),
            owner_id: document.owner_id.clone(),
            original_file_name: document.file_name.clone(),
            signed_file_name,
            file_path: relative.clone(),
            signed_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            placements: document.placements.clone(),
            file_size: document.bytes.len() as u64,
        };

        let record_json = serde_json::to_vec_pretty(&record)?;
        if let Err(e) = fs::write(records_dir.join(format!("{}.json", id)), record_json) {
            // Keep file and record together
            let _ = fs::remove_file(&file_path);
            return Err(persistence(e));
        }

        tracing::info!(document_id = %id, path = %relative, "Stored signed document");
        Ok(StoredDocument {
            document_id: id,
            path: relative,
        })
    }

    fn list(&self, owner_id: &str) -> Result<Vec<SignedDocumentRecord>> {
        let records_dir = self.root.join(RECORDS_DIR);
        if !records_dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&records_dir).map_err(persistence)? {
            let path = entry.map_err(persistence)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path) {
                Ok(record) if record.owner_id == owner_id => records.push(record),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable record")
                }
            }
        }

        records.sort_by(|a, b| b.signed_at.cmp(&a.signed_at).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    fn delete(&self, document_id: &str) -> Result<SignedDocumentRecord> {
        let path = self.record_path(document_id)?;
        if !path.exists() {
            return Err(Error::DocumentNotFound {
                id: document_id.to_string(),
            });
        }
        let record = Self::read_record(&path)?;

        let file = self.root.join(&record.file_path);
        match fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %file.display(), "Signed file already missing");
            }
            Err(e) => return Err(persistence(e)),
        }
        fs::remove_file(&path).map_err(persistence)?;

        tracing::info!(document_id, "Deleted signed document");
        Ok(record)
    }
}
