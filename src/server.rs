//! MCP Server implementation using rmcp

use crate::error::Error;
use crate::pdf::{PdfEngine, PdfiumEngine};
use crate::render::{EmbeddedFrame, RenderScheduler, RenderStrategy, RenderedPage};
use crate::signing::compositor::{AppliedPlacement, SkippedPlacement};
use crate::signing::geometry::{
    DocumentRect, PageFrame, PageGeometry, ScreenPoint, ScreenRect, Zoom,
};
use crate::signing::ledger::{PagePlacement, PlacementId, PlacementLedger};
use crate::signing::page_geometry::PageGeometryProvider;
use crate::signing::session::{PlaceOutcome, SessionDocument, SigningSession};
use crate::signing::signature::SignatureImage;
use crate::source::{
    resolve_base64, resolve_cache, resolve_path, resolve_url, CacheManager, ResolvedPdf,
};
use crate::store::{
    DocumentStore, FilesystemStore, PlacementRecord, SignedDocument, SignedDocumentRecord,
};
use anyhow::Result;
use base64::Engine;
use lru::LruCache;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Where a PDF document is read from
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum DocumentSource {
    /// File path (absolute or relative)
    Path {
        /// Path to the PDF file
        path: String,
    },
    /// Base64 encoded PDF data
    Base64 {
        /// Base64 encoded PDF content
        base64: String,
    },
    /// URL to download PDF from
    Url {
        /// URL of the PDF file
        url: String,
    },
    /// Reference to a cached PDF
    CacheRef {
        /// Cache key from a previous operation
        cache_key: String,
    },
}

const SOURCE_KEYS: &str = "\"path\", \"base64\", \"url\", or \"cache_key\"";

impl<'de> serde::Deserialize<'de> for DocumentSource {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;

        let Some(obj) = value.as_object() else {
            return Err(serde::de::Error::custom(format!(
                "Invalid source: expected an object with one of {}, but got {}",
                SOURCE_KEYS,
                match &value {
                    serde_json::Value::Array(_) => "an array",
                    serde_json::Value::String(_) => "a string",
                    serde_json::Value::Number(_) => "a number",
                    serde_json::Value::Bool(_) => "a boolean",
                    serde_json::Value::Null => "null",
                    _ => "unknown type",
                }
            )));
        };

        for key in ["path", "base64", "url", "cache_key"] {
            let Some(v) = obj.get(key) else { continue };
            let s = v
                .as_str()
                .ok_or_else(|| {
                    <D::Error as serde::de::Error>::custom(format!("\"{}\" must be a string", key))
                })?
                .to_string();
            return Ok(match key {
                "path" => DocumentSource::Path { path: s },
                "base64" => DocumentSource::Base64 { base64: s },
                "url" => DocumentSource::Url { url: s },
                _ => DocumentSource::CacheRef { cache_key: s },
            });
        }

        let keys: Vec<&String> = obj.keys().collect();
        Err(serde::de::Error::custom(format!(
            "Invalid source: expected an object with one of {}, but got keys: {:?}",
            SOURCE_KEYS, keys
        )))
    }
}

/// Security, resource and storage configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directories path sources and output paths are confined to
    pub resource_dirs: Vec<String>,
    /// Allow URLs that resolve to private/reserved IPs (default: false)
    pub allow_private_urls: bool,
    /// Maximum download size in bytes for URL sources (default: 100MB)
    pub max_download_bytes: u64,
    /// Maximum total bytes in cache (default: 512MB)
    pub cache_max_bytes: usize,
    /// Maximum number of cache entries (default: 100)
    pub cache_max_entries: usize,
    /// Maximum number of open signing sessions. Opening one more closes the
    /// least recently used (default: 32)
    pub max_sessions: usize,
    /// Root of the signed document store. Persistence is off when unset.
    pub storage_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            resource_dirs: Vec::new(),
            allow_private_urls: false,
            max_download_bytes: 100 * 1024 * 1024, // 100MB
            cache_max_bytes: 512 * 1024 * 1024,    // 512MB
            cache_max_entries: 100,
            max_sessions: 32,
            storage_dir: None,
        }
    }
}

impl ServerConfig {
    /// Defaults overlaid with `PDF_SIGN_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dirs) = lookup("PDF_SIGN_RESOURCE_DIRS") {
            config.resource_dirs = dirs
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("PDF_SIGN_ALLOW_PRIVATE_URLS") {
            config.allow_private_urls = matches!(v.trim(), "1" | "true" | "yes");
        }
        if let Some(v) = lookup("PDF_SIGN_MAX_DOWNLOAD_BYTES") {
            match v.trim().parse() {
                Ok(n) => config.max_download_bytes = n,
                Err(_) => tracing::warn!(value = %v, "Ignoring invalid PDF_SIGN_MAX_DOWNLOAD_BYTES"),
            }
        }
        if let Some(v) = lookup("PDF_SIGN_MAX_SESSIONS") {
            match v.trim().parse() {
                Ok(n) if n > 0 => config.max_sessions = n,
                _ => tracing::warn!(value = %v, "Ignoring invalid PDF_SIGN_MAX_SESSIONS"),
            }
        }
        if let Some(dir) = lookup("PDF_SIGN_STORAGE_DIR") {
            if !dir.trim().is_empty() {
                config.storage_dir = Some(PathBuf::from(dir.trim()));
            }
        }

        config
    }
}

struct SessionEntry {
    session: SigningSession,
    renders: RenderScheduler,
}

/// PDF signing MCP server
#[derive(Clone)]
pub struct SignServer {
    cache: Arc<CacheManager>,
    sessions: Arc<RwLock<LruCache<String, SessionEntry>>>,
    engine: Arc<dyn PdfEngine>,
    store: Option<Arc<dyn DocumentStore>>,
    tool_router: ToolRouter<Self>,
    /// Server configuration
    config: Arc<ServerConfig>,
}

// ============================================================================
// Tool parameter and result types
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetPdfInfoParams {
    /// PDF source: {"path": "..."}, {"url": "..."}, {"base64": "..."}, or {"cache_key": "..."}
    pub source: DocumentSource,
    /// Password for encrypted PDFs
    pub password: Option<String>,
    /// Zoom to report logical page sizes at (default: scale 1, device pixel ratio 1)
    pub zoom: Option<Zoom>,
}

/// Size of one page
#[derive(Debug, Serialize, JsonSchema)]
pub struct PageGeometryInfo {
    /// Page number (1-indexed)
    pub page: u32,
    /// Native width in points
    pub width_points: f32,
    /// Native height in points
    pub height_points: f32,
    /// Displayed width at the requested zoom
    pub logical_width: f32,
    /// Displayed height at the requested zoom
    pub logical_height: f32,
}

impl From<&PageGeometry> for PageGeometryInfo {
    fn from(g: &PageGeometry) -> Self {
        let frame = g.logical_frame();
        Self {
            page: g.page_number,
            width_points: g.width_points,
            height_points: g.height_points,
            logical_width: frame.width,
            logical_height: frame.height,
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PdfInfoResult {
    pub source: String,
    pub page_count: u32,
    /// "raster" or "embedded_frame"
    pub render_strategy: String,
    pub pages: Vec<PageGeometryInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One signature placement submitted directly
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PlacementParam {
    /// Target page (1-indexed). Pages past the end land on the last page.
    pub page: u32,
    /// Left edge, measured from the left of the page
    pub x: f32,
    /// Top edge, measured from the top of the page
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Width of the displayed page the coordinates refer to. Omit (with
    /// frame_height) when coordinates are already in PDF points.
    pub frame_width: Option<f32>,
    pub frame_height: Option<f32>,
    /// Signature image for this placement only (PNG/JPEG data URL or base64)
    pub signature: Option<String>,
}

impl PlacementParam {
    fn frame(&self) -> Option<PageFrame> {
        match (self.frame_width, self.frame_height) {
            (Some(width), Some(height)) => Some(PageFrame { width, height }),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SignPdfParams {
    /// PDF source: {"path": "..."}, {"url": "..."}, {"base64": "..."}, or {"cache_key": "..."}
    pub source: DocumentSource,
    /// Password for encrypted PDFs
    pub password: Option<String>,
    /// Signature image applied to every placement without its own (PNG/JPEG data URL or base64)
    pub signature: Option<String>,
    /// Where to draw the signature
    pub placements: Vec<PlacementParam>,
    #[serde(flatten)]
    pub delivery: DeliveryParams,
}

/// Where the signed PDF goes
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct DeliveryParams {
    /// Owner of the signed document. Stored only together with file_name.
    pub owner_id: Option<String>,
    /// Original file name, used to name the stored copy
    pub file_name: Option<String>,
    /// Optional path to also write the signed PDF to
    pub output_path: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PlacedInfo {
    pub id: String,
    pub requested_page: u32,
    /// Page the signature was drawn on
    pub page: u32,
    /// Final rectangle in PDF points, origin bottom-left
    pub rect: DocumentRect,
    pub remapped: bool,
}

impl From<&AppliedPlacement> for PlacedInfo {
    fn from(p: &AppliedPlacement) -> Self {
        Self {
            id: p.id.to_string(),
            requested_page: p.requested_page,
            page: p.page,
            rect: p.rect,
            remapped: p.remapped(),
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct SkippedInfo {
    pub id: String,
    pub requested_page: u32,
    pub reason: String,
}

impl From<&SkippedPlacement> for SkippedInfo {
    fn from(p: &SkippedPlacement) -> Self {
        Self {
            id: p.id.to_string(),
            requested_page: p.requested_page,
            reason: p.reason.clone(),
        }
    }
}

#[derive(Debug, Default, Serialize, JsonSchema)]
pub struct SignPdfResult {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Id of the stored document record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// Location of the stored PDF
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Signed PDF inline, when it was not stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_base64: Option<String>,
    /// Cache key of the signed PDF, usable as a source for other tools
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    pub page_count: u32,
    pub placed: Vec<PlacedInfo>,
    pub skipped: Vec<SkippedInfo>,
    /// Non-fatal problem, e.g. the storage write failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct OpenSessionParams {
    /// PDF source: {"path": "..."}, {"url": "..."}, {"base64": "..."}, or {"cache_key": "..."}
    pub source: DocumentSource,
    /// Password for encrypted PDFs
    pub password: Option<String>,
}

#[derive(Debug, Default, Serialize, JsonSchema)]
pub struct SessionInfo {
    pub session_id: String,
    pub source: String,
    pub page_count: u32,
    pub render_strategy: String,
    pub current_page: u32,
    pub zoom: Option<Zoom>,
    /// Geometry of the current page, once known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<PageGeometryInfo>,
    /// Viewer reference when pages are not rasterized
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<EmbeddedFrame>,
    pub has_signature: bool,
    pub placement_count: usize,
    /// Clicks waiting for page geometry
    pub pending_clicks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SessionParams {
    pub session_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetSignatureParams {
    pub session_id: String,
    /// PNG/JPEG data URL or base64. Omit to clear the signature.
    pub signature: Option<String>,
}

#[derive(Debug, Default, Serialize, JsonSchema)]
pub struct SignatureInfo {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_id: Option<String>,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetViewParams {
    pub session_id: String,
    /// Page to show (1-indexed)
    pub page: Option<u32>,
    /// Display zoom
    pub zoom: Option<Zoom>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PlaceSignatureParams {
    pub session_id: String,
    /// Click position, or left edge when width/height are given
    pub x: f32,
    /// Click position, or top edge when width/height are given
    pub y: f32,
    /// Page for an explicit rectangle (default: current page)
    pub page: Option<u32>,
    /// Explicit rectangle width. Without width/height the signature is
    /// centered on (x, y) at 100x50.
    pub width: Option<f32>,
    pub height: Option<f32>,
}

/// A placement as held by a session
#[derive(Debug, Serialize, JsonSchema)]
pub struct PlacementInfo {
    pub id: String,
    pub page: u32,
    pub rect: ScreenRect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<PageFrame>,
    pub signature_id: String,
}

impl From<&PagePlacement> for PlacementInfo {
    fn from(p: &PagePlacement) -> Self {
        Self {
            id: p.id.to_string(),
            page: p.page_number,
            rect: p.rect,
            frame: p.frame,
            signature_id: p.signature.id().to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, JsonSchema)]
pub struct PlacementResult {
    pub session_id: String,
    /// "placed", "queued", "no_signature", "moved", "resized" or "removed"
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<PlacementInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MoveSignatureParams {
    pub session_id: String,
    /// Placement id, e.g. "sig-1"
    pub placement_id: String,
    /// Relative move
    pub dx: Option<f32>,
    pub dy: Option<f32>,
    /// Absolute drag target for the top-left corner (takes precedence over dx/dy)
    pub x: Option<f32>,
    pub y: Option<f32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ResizeSignatureParams {
    pub session_id: String,
    pub placement_id: String,
    /// New width (minimum 50)
    pub width: f32,
    /// New height (minimum 25)
    pub height: f32,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PlacementRefParams {
    pub session_id: String,
    pub placement_id: String,
}

#[derive(Debug, Default, Serialize, JsonSchema)]
pub struct ListSignaturesResult {
    pub session_id: String,
    pub placements: Vec<PlacementInfo>,
    pub pending_clicks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RenderPageParams {
    pub session_id: String,
    /// Page to render (default: current page)
    pub page: Option<u32>,
}

#[derive(Debug, Default, Serialize, JsonSchema)]
pub struct RenderPageResult {
    pub session_id: String,
    pub page: u32,
    pub render_strategy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<RenderedPage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<EmbeddedFrame>,
    /// Clicks placed now that the page geometry is known
    pub placed_from_queue: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FinalizeSessionParams {
    pub session_id: String,
    #[serde(flatten)]
    pub delivery: DeliveryParams,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListSignedDocumentsParams {
    pub owner_id: String,
}

#[derive(Debug, Default, Serialize, JsonSchema)]
pub struct ListSignedDocumentsResult {
    pub owner_id: String,
    pub documents: Vec<SignedDocumentRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteSignedDocumentParams {
    pub document_id: String,
}

#[derive(Debug, Default, Serialize, JsonSchema)]
pub struct DeleteSignedDocumentResult {
    pub document_id: String,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn to_json<T: Serialize>(result: T) -> String {
    let response = serde_json::json!({ "results": [result] });
    serde_json::to_string_pretty(&response).unwrap_or_default()
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Pdfium {
        reason: format!("Task join error: {}", e),
    }
}

// ============================================================================
// Tools
// ============================================================================

#[tool_router]
impl SignServer {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Server on PDFium, with a filesystem store when `storage_dir` is set
    pub fn with_config(config: ServerConfig) -> Self {
        let store = config
            .storage_dir
            .clone()
            .map(|dir| Arc::new(FilesystemStore::new(dir)) as Arc<dyn DocumentStore>);
        Self::with_services(config, Arc::new(PdfiumEngine), store)
    }

    /// Server with explicitly provided collaborators
    pub fn with_services(
        config: ServerConfig,
        engine: Arc<dyn PdfEngine>,
        store: Option<Arc<dyn DocumentStore>>,
    ) -> Self {
        let cache = CacheManager::new(config.cache_max_entries, config.cache_max_bytes);
        let max_sessions = NonZeroUsize::new(config.max_sessions).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(cache),
            sessions: Arc::new(RwLock::new(LruCache::new(max_sessions))),
            engine,
            store,
            tool_router: Self::tool_router(),
            config: Arc::new(config),
        }
    }

    /// Page count and page sizes
    #[tool(
        description = "Get the page count of a PDF and the size of every page, in PDF points and at an optional display zoom.

Source format: must be one of {\"path\": \"/absolute/path.pdf\"}, {\"url\": \"https://...\"}, {\"base64\": \"...\"}, or {\"cache_key\": \"...\"}"
    )]
    async fn get_pdf_info(&self, Parameters(params): Parameters<GetPdfInfoParams>) -> String {
        let result = self.process_get_pdf_info(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "get_pdf_info failed");
            PdfInfoResult {
                source: Self::source_name(&params.source),
                page_count: 0,
                render_strategy: String::new(),
                pages: vec![],
                error: Some(e.client_message()),
            }
        });
        to_json(result)
    }

    /// Sign a PDF in one call
    #[tool(
        description = "Draw a signature image onto a PDF at the given positions and return the signed PDF.

Coordinates are measured from the top-left of the page. Give frame_width/frame_height when they refer to a displayed (zoomed) page; omit them for PDF points. Pages past the end are signed on the last page. Rectangles are kept inside the page.

When owner_id and file_name are given and storage is configured, the signed PDF is stored and a document_id is returned; otherwise (or if storing fails) the PDF is returned inline as pdf_base64. The output is always cached (output_cache_key).

Source format: must be one of {\"path\": \"/absolute/path.pdf\"}, {\"url\": \"https://...\"}, {\"base64\": \"...\"}, or {\"cache_key\": \"...\"}"
    )]
    async fn sign_pdf(&self, Parameters(params): Parameters<SignPdfParams>) -> String {
        let result = self.process_sign_pdf(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "sign_pdf failed");
            SignPdfResult {
                source: Self::source_name(&params.source),
                error: Some(e.client_message()),
                ..Default::default()
            }
        });
        to_json(result)
    }

    /// Start an interactive signing session
    #[tool(
        description = "Open a PDF for interactive signing. Returns a session_id used by the other session tools. Pages are rasterized when possible; otherwise the session reports an embedded viewer frame for each page.

Source format: must be one of {\"path\": \"/absolute/path.pdf\"}, {\"url\": \"https://...\"}, {\"base64\": \"...\"}, or {\"cache_key\": \"...\"}"
    )]
    async fn open_signing_session(
        &self,
        Parameters(params): Parameters<OpenSessionParams>,
    ) -> String {
        let result = self.process_open_session(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "open_signing_session failed");
            SessionInfo {
                source: Self::source_name(&params.source),
                error: Some(e.client_message()),
                ..Default::default()
            }
        });
        to_json(result)
    }

    /// Set or clear the session's signature image
    #[tool(
        description = "Set the signature image (PNG or JPEG, as a data URL or base64) for a session, or clear it by omitting signature. Placements made earlier keep the image they were made with."
    )]
    async fn set_signature(&self, Parameters(params): Parameters<SetSignatureParams>) -> String {
        let result = self.process_set_signature(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "set_signature failed");
            SignatureInfo {
                session_id: params.session_id.clone(),
                error: Some(e.client_message()),
                ..Default::default()
            }
        });
        to_json(result)
    }

    /// Change page and/or zoom
    #[tool(
        description = "Change the current page and/or zoom of a session. Page geometry is recomputed for the new view; render the page again before placing signatures by click."
    )]
    async fn set_view(&self, Parameters(params): Parameters<SetViewParams>) -> String {
        let result = self.process_set_view(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "set_view failed");
            SessionInfo {
                session_id: params.session_id.clone(),
                error: Some(e.client_message()),
                ..Default::default()
            }
        });
        to_json(result)
    }

    /// Place a signature
    #[tool(
        description = "Place the session's signature. With only x/y, a 100x50 signature is centered on the click on the current page; if the page has not been rendered yet the click is queued until it is. With width/height, the rectangle is placed as given (top-left at x/y), in coordinates of the page as displayed at the current zoom."
    )]
    async fn place_signature(
        &self,
        Parameters(params): Parameters<PlaceSignatureParams>,
    ) -> String {
        let result = self.process_place_signature(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "place_signature failed");
            PlacementResult {
                session_id: params.session_id.clone(),
                error: Some(e.client_message()),
                ..Default::default()
            }
        });
        to_json(result)
    }

    /// Move a placement
    #[tool(
        description = "Move a placed signature, either by dx/dy or to an absolute x/y (top-left corner). Positions never go below zero."
    )]
    async fn move_signature(
        &self,
        Parameters(params): Parameters<MoveSignatureParams>,
    ) -> String {
        let result = self.process_move_signature(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "move_signature failed");
            PlacementResult {
                session_id: params.session_id.clone(),
                error: Some(e.client_message()),
                ..Default::default()
            }
        });
        to_json(result)
    }

    /// Resize a placement
    #[tool(description = "Resize a placed signature. Sizes below 50x25 are raised to the minimum.")]
    async fn resize_signature(
        &self,
        Parameters(params): Parameters<ResizeSignatureParams>,
    ) -> String {
        let result = self
            .process_resize_signature(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "resize_signature failed");
                PlacementResult {
                    session_id: params.session_id.clone(),
                    error: Some(e.client_message()),
                    ..Default::default()
                }
            });
        to_json(result)
    }

    /// Remove a placement
    #[tool(description = "Remove a placed signature from a session.")]
    async fn remove_signature(
        &self,
        Parameters(params): Parameters<PlacementRefParams>,
    ) -> String {
        let result = self
            .process_remove_signature(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "remove_signature failed");
                PlacementResult {
                    session_id: params.session_id.clone(),
                    error: Some(e.client_message()),
                    ..Default::default()
                }
            });
        to_json(result)
    }

    /// List placements
    #[tool(description = "List the signatures placed in a session, in the order they were placed.")]
    async fn list_signatures(&self, Parameters(params): Parameters<SessionParams>) -> String {
        let result = self
            .process_list_signatures(&params)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "list_signatures failed");
                ListSignaturesResult {
                    session_id: params.session_id.clone(),
                    error: Some(e.client_message()),
                    ..Default::default()
                }
            });
        to_json(result)
    }

    /// Render a page of the session's document
    #[tool(
        description = "Render a page of the session's document at the session zoom. Returns a PNG image (base64), or a viewer frame reference when the document cannot be rasterized. A newer render of the same page cancels an older one still in progress."
    )]
    async fn render_page(&self, Parameters(params): Parameters<RenderPageParams>) -> String {
        let result = self.process_render_page(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "render_page failed");
            RenderPageResult {
                session_id: params.session_id.clone(),
                page: params.page.unwrap_or(0),
                error: Some(e.client_message()),
                ..Default::default()
            }
        });
        to_json(result)
    }

    /// Produce the signed PDF
    #[tool(
        description = "Sign the session's document with every placed signature. Requires a signature and at least one placement. Delivery works as in sign_pdf (owner_id + file_name to store, output_path to also write a file)."
    )]
    async fn finalize_session(
        &self,
        Parameters(params): Parameters<FinalizeSessionParams>,
    ) -> String {
        let result = self.process_finalize_session(&params).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "finalize_session failed");
            SignPdfResult {
                session_id: Some(params.session_id.clone()),
                error: Some(e.client_message()),
                ..Default::default()
            }
        });
        to_json(result)
    }

    /// Close a session
    #[tool(description = "Close a signing session and cancel its pending renders.")]
    async fn close_session(&self, Parameters(params): Parameters<SessionParams>) -> String {
        let closed = self.process_close_session(&params.session_id).await;
        to_json(serde_json::json!({
            "session_id": params.session_id,
            "closed": closed,
        }))
    }

    /// Stored documents of one owner
    #[tool(description = "List the signed documents stored for an owner, newest first.")]
    async fn list_signed_documents(
        &self,
        Parameters(params): Parameters<ListSignedDocumentsParams>,
    ) -> String {
        let result = self
            .process_list_signed_documents(&params.owner_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "list_signed_documents failed");
                ListSignedDocumentsResult {
                    owner_id: params.owner_id.clone(),
                    error: Some(e.client_message()),
                    ..Default::default()
                }
            });
        to_json(result)
    }

    /// Delete a stored document
    #[tool(description = "Delete a stored signed document and its record.")]
    async fn delete_signed_document(
        &self,
        Parameters(params): Parameters<DeleteSignedDocumentParams>,
    ) -> String {
        let result = self
            .process_delete_signed_document(&params.document_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "delete_signed_document failed");
                DeleteSignedDocumentResult {
                    document_id: params.document_id.clone(),
                    deleted: false,
                    error: Some(e.client_message()),
                }
            });
        to_json(result)
    }
}

// ============================================================================
// Processing
// ============================================================================

impl SignServer {
    fn source_name(source: &DocumentSource) -> String {
        match source {
            DocumentSource::Path { path } => path.clone(),
            DocumentSource::Base64 { .. } => "<base64>".to_string(),
            DocumentSource::Url { url } => url.clone(),
            DocumentSource::CacheRef { cache_key } => format!("<cache:{}>", cache_key),
        }
    }

    async fn resolve_source(&self, source: &DocumentSource) -> crate::error::Result<ResolvedPdf> {
        match source {
            DocumentSource::Path { path } => {
                let path = self.validate_path_access(path)?;
                resolve_path(path)
            }
            DocumentSource::Base64 { base64 } => resolve_base64(base64),
            DocumentSource::Url { url } => {
                resolve_url(
                    url,
                    self.config.allow_private_urls,
                    self.config.max_download_bytes,
                )
                .await
            }
            DocumentSource::CacheRef { cache_key } => resolve_cache(cache_key, &self.cache),
        }
    }

    /// Validate that a path is within allowed resource directories.
    /// If no resource_dirs are configured, all paths are allowed.
    fn validate_path_access(&self, path: &str) -> crate::error::Result<PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(PathBuf::from(path));
        }

        let canonical = std::fs::canonicalize(path).map_err(|_| Error::PathAccessDenied {
            path: path.to_string(),
        })?;
        self.within_resource_dirs(&canonical, path)
    }

    /// Like [`Self::validate_path_access`] for a file that may not exist yet
    fn validate_output_path_access(&self, path: &str) -> crate::error::Result<PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(PathBuf::from(path));
        }

        let path_obj = Path::new(path);
        let parent = path_obj.parent().unwrap_or(Path::new("."));
        let canonical_parent =
            std::fs::canonicalize(parent).map_err(|_| Error::PathAccessDenied {
                path: path.to_string(),
            })?;
        let target = canonical_parent.join(path_obj.file_name().unwrap_or_default());
        self.within_resource_dirs(&target, path)
    }

    fn within_resource_dirs(&self, canonical: &Path, path: &str) -> crate::error::Result<PathBuf> {
        for dir in &self.config.resource_dirs {
            if let Ok(canonical_dir) = std::fs::canonicalize(dir) {
                if canonical.starts_with(&canonical_dir) {
                    return Ok(canonical.to_path_buf());
                }
            }
        }
        Err(Error::PathAccessDenied {
            path: path.to_string(),
        })
    }

    /// Write output data to a file path, with sandbox validation.
    fn write_output(
        &self,
        output_path: &Option<String>,
        data: &[u8],
    ) -> crate::error::Result<Option<String>> {
        let Some(path_str) = output_path else {
            return Ok(None);
        };
        let path = self.validate_output_path_access(path_str)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(&path, data)?;
        Ok(Some(path_str.clone()))
    }

    fn source_url(source: &DocumentSource) -> Option<String> {
        match source {
            DocumentSource::Url { url } => Some(url.clone()),
            _ => None,
        }
    }

    pub async fn process_get_pdf_info(
        &self,
        params: &GetPdfInfoParams,
    ) -> crate::error::Result<PdfInfoResult> {
        let resolved = self.resolve_source(&params.source).await?;
        let source_name = resolved.source_name.clone();
        let zoom = params.zoom.unwrap_or_default();

        let engine = Arc::clone(&self.engine);
        let password = params.password.clone();
        let source_url = Self::source_url(&params.source);
        let layout = tokio::task::spawn_blocking(move || {
            engine.layout(&resolved.data, password.as_deref(), source_url)
        })
        .await
        .map_err(join_error)??;

        let pages = layout
            .pages
            .all_pages(zoom)?
            .iter()
            .map(PageGeometryInfo::from)
            .collect();

        Ok(PdfInfoResult {
            source: source_name,
            page_count: layout.pages.page_count(),
            render_strategy: layout.strategy.name().to_string(),
            pages,
            error: None,
        })
    }

    pub async fn process_sign_pdf(
        &self,
        params: &SignPdfParams,
    ) -> crate::error::Result<SignPdfResult> {
        if params.placements.is_empty() {
            return Err(Error::SignatureRequired {
                action: "signing (no placements given)".to_string(),
            });
        }

        // Decode each distinct image once so the compositor embeds it once
        let mut images: HashMap<&str, Arc<SignatureImage>> = HashMap::new();
        let mut ledger = PlacementLedger::new();
        for placement in &params.placements {
            let encoded = placement
                .signature
                .as_deref()
                .or(params.signature.as_deref())
                .ok_or_else(|| Error::SignatureRequired {
                    action: "signing".to_string(),
                })?;
            let image = match images.get(encoded) {
                Some(image) => Arc::clone(image),
                None => {
                    let image = Arc::new(SignatureImage::from_data_url(encoded)?);
                    images.insert(encoded, Arc::clone(&image));
                    image
                }
            };
            let rect = ScreenRect::new(placement.x, placement.y, placement.width, placement.height);
            ledger.add(placement.page, rect, placement.frame(), Some(&image));
        }

        let resolved = self.resolve_source(&params.source).await?;
        let document = SessionDocument {
            data: Arc::new(resolved.data),
            source_name: resolved.source_name,
            source_url: Self::source_url(&params.source),
            password: params.password.clone(),
        };

        self.complete_signing(
            document,
            None,
            ledger.as_slice().to_vec(),
            &params.delivery,
        )
        .await
    }

    /// Composite, cache, write and store (or return inline) a signed PDF
    async fn complete_signing(
        &self,
        document: SessionDocument,
        session_id: Option<String>,
        placements: Vec<PagePlacement>,
        delivery: &DeliveryParams,
    ) -> crate::error::Result<SignPdfResult> {
        let engine = Arc::clone(&self.engine);
        let data = Arc::clone(&document.data);
        let password = document.password.clone();
        let output = tokio::task::spawn_blocking(move || {
            engine.composite(&data, password.as_deref(), &placements)
        })
        .await
        .map_err(join_error)??;

        for skipped in &output.skipped {
            tracing::warn!(
                placement = %skipped.id,
                page = skipped.requested_page,
                reason = %skipped.reason,
                "Placement skipped"
            );
        }

        // Cache the output for chaining operations
        let output_cache_key = self.cache.insert(output.bytes.clone());
        if output_cache_key.is_none() {
            tracing::warn!(
                size = output.bytes.len(),
                "Signed PDF exceeds the cache budget, no output_cache_key"
            );
        }

        let output_path = self.write_output(&delivery.output_path, &output.bytes)?;

        let mut result = SignPdfResult {
            source: document.source_name.clone(),
            session_id,
            success: true,
            output_cache_key,
            output_path,
            page_count: output.page_count,
            placed: output.placed.iter().map(PlacedInfo::from).collect(),
            skipped: output.skipped.iter().map(SkippedInfo::from).collect(),
            ..Default::default()
        };

        let target = match (&self.store, &delivery.owner_id, &delivery.file_name) {
            (Some(store), Some(owner_id), Some(file_name)) => {
                Some((Arc::clone(store), owner_id.clone(), file_name.clone()))
            }
            _ => None,
        };

        let Some((store, owner_id, file_name)) = target else {
            result.message = Some("PDF signed successfully".to_string());
            result.pdf_base64 =
                Some(base64::engine::general_purpose::STANDARD.encode(&output.bytes));
            return Ok(result);
        };

        let signed = SignedDocument {
            owner_id,
            file_name,
            bytes: output.bytes.clone(),
            placements: output.placed.iter().map(PlacementRecord::from).collect(),
        };
        let stored = tokio::task::spawn_blocking(move || store.store(&signed))
            .await
            .map_err(|e| Error::Persistence {
                reason: format!("Task join error: {}", e),
            })
            .and_then(|r| r);

        match stored {
            Ok(stored) => {
                result.message = Some("PDF signed and saved successfully".to_string());
                result.document_id = Some(stored.document_id);
                result.file_path = Some(stored.path);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Storing signed PDF failed, returning it inline");
                result.message = Some("PDF signed successfully (storage save failed)".to_string());
                result.warning = Some(e.client_message());
                result.pdf_base64 =
                    Some(base64::engine::general_purpose::STANDARD.encode(&output.bytes));
            }
        }
        Ok(result)
    }

    fn session_info(session: &SigningSession) -> SessionInfo {
        SessionInfo {
            session_id: session.id().to_string(),
            source: session.document().source_name.clone(),
            page_count: session.page_count(),
            render_strategy: session.strategy().name().to_string(),
            current_page: session.current_page(),
            zoom: Some(session.zoom()),
            geometry: session.geometry().map(PageGeometryInfo::from),
            frame: session
                .strategy()
                .embedded_frame(session.current_page(), session.zoom()),
            has_signature: session.signature().is_some(),
            placement_count: session.ledger().len(),
            pending_clicks: session.pending_count(),
            error: None,
        }
    }

    /// Run `f` against a session under the write lock
    async fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SigningSession) -> crate::error::Result<T>,
    ) -> crate::error::Result<T> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound {
                id: session_id.to_string(),
            })?;
        f(&mut entry.session)
    }

    pub async fn process_open_session(
        &self,
        params: &OpenSessionParams,
    ) -> crate::error::Result<SessionInfo> {
        let resolved = self.resolve_source(&params.source).await?;
        let document = SessionDocument {
            data: Arc::new(resolved.data),
            source_name: resolved.source_name,
            source_url: Self::source_url(&params.source),
            password: params.password.clone(),
        };

        let engine = Arc::clone(&self.engine);
        let data = Arc::clone(&document.data);
        let password = document.password.clone();
        let source_url = document.source_url.clone();
        let layout = tokio::task::spawn_blocking(move || {
            engine.layout(&data, password.as_deref(), source_url)
        })
        .await
        .map_err(join_error)??;

        let session_id = uuid::Uuid::new_v4().to_string();
        let embedded = matches!(layout.strategy, RenderStrategy::EmbeddedFrame { .. });
        let mut session =
            SigningSession::new(session_id.clone(), document, layout.strategy, layout.pages);
        if embedded && session.page_count() > 0 {
            // Viewer geometry is fixed, there is nothing to wait for
            session.refresh_geometry()?;
        }

        tracing::info!(
            session = %session_id,
            pages = session.page_count(),
            strategy = session.strategy().name(),
            "Opened signing session"
        );

        let info = Self::session_info(&session);
        let evicted = self.sessions.write().await.push(
            session_id.clone(),
            SessionEntry {
                session,
                renders: RenderScheduler::new(),
            },
        );
        if let Some((evicted_id, entry)) = evicted {
            if evicted_id != session_id {
                entry.renders.cancel_all();
                tracing::info!(
                    session = %evicted_id,
                    "Session limit reached, closed least recently used session"
                );
            }
        }
        Ok(info)
    }

    pub async fn process_set_signature(
        &self,
        params: &SetSignatureParams,
    ) -> crate::error::Result<SignatureInfo> {
        let image = params
            .signature
            .as_deref()
            .map(SignatureImage::from_data_url)
            .transpose()?;

        self.with_session(&params.session_id, |session| {
            let mut info = SignatureInfo {
                session_id: params.session_id.clone(),
                ..Default::default()
            };
            match image {
                Some(image) => {
                    let image = session.set_signature(image);
                    info.signature_id = Some(image.id().to_string());
                    info.width = image.width();
                    info.height = image.height();
                }
                None => session.clear_signature(),
            }
            Ok(info)
        })
        .await
    }

    pub async fn process_set_view(
        &self,
        params: &SetViewParams,
    ) -> crate::error::Result<SessionInfo> {
        self.with_session(&params.session_id, |session| {
            // Zoom first: both setters leave the session untouched on error
            if let Some(zoom) = params.zoom {
                session.set_zoom(zoom)?;
            }
            if let Some(page) = params.page {
                session.set_current_page(page)?;
            }
            if session.geometry().is_none()
                && matches!(session.strategy(), RenderStrategy::EmbeddedFrame { .. })
            {
                session.refresh_geometry()?;
            }
            Ok(Self::session_info(session))
        })
        .await
    }

    pub async fn process_place_signature(
        &self,
        params: &PlaceSignatureParams,
    ) -> crate::error::Result<PlacementResult> {
        self.with_session(&params.session_id, |session| {
            let mut result = PlacementResult {
                session_id: params.session_id.clone(),
                ..Default::default()
            };

            let id = match (params.width, params.height) {
                (Some(width), Some(height)) => {
                    let page = params.page.unwrap_or(session.current_page());
                    let rect = ScreenRect::new(params.x, params.y, width, height);
                    Some(session.place_rect(page, rect)?)
                }
                _ => match session.place_at(ScreenPoint {
                    x: params.x,
                    y: params.y,
                })? {
                    PlaceOutcome::Placed(id) => Some(id),
                    PlaceOutcome::Queued => {
                        result.outcome = "queued".to_string();
                        None
                    }
                    PlaceOutcome::NoSignature => {
                        result.outcome = "no_signature".to_string();
                        None
                    }
                },
            };

            if let Some(id) = id {
                result.outcome = "placed".to_string();
                result.placement = session.ledger().get(id).map(PlacementInfo::from);
            }
            Ok(result)
        })
        .await
    }

    pub async fn process_move_signature(
        &self,
        params: &MoveSignatureParams,
    ) -> crate::error::Result<PlacementResult> {
        let id = PlacementId::parse(&params.placement_id)?;
        self.with_session(&params.session_id, |session| {
            match (params.x, params.y) {
                (Some(x), Some(y)) => {
                    let origin = session
                        .ledger()
                        .get(id)
                        .map(|p| ScreenPoint {
                            x: p.rect.x,
                            y: p.rect.y,
                        })
                        .ok_or_else(|| Error::PlacementNotFound { id: id.to_string() })?;
                    session.begin_drag(id, origin)?;
                    let moved = session.drag_to(ScreenPoint { x, y });
                    session.end_interaction();
                    moved?;
                }
                _ => {
                    session.move_by(id, params.dx.unwrap_or(0.0), params.dy.unwrap_or(0.0))?;
                }
            }
            Ok(PlacementResult {
                session_id: params.session_id.clone(),
                outcome: "moved".to_string(),
                placement: session.ledger().get(id).map(PlacementInfo::from),
                error: None,
            })
        })
        .await
    }

    pub async fn process_resize_signature(
        &self,
        params: &ResizeSignatureParams,
    ) -> crate::error::Result<PlacementResult> {
        let id = PlacementId::parse(&params.placement_id)?;
        self.with_session(&params.session_id, |session| {
            session.resize(id, params.width, params.height)?;
            Ok(PlacementResult {
                session_id: params.session_id.clone(),
                outcome: "resized".to_string(),
                placement: session.ledger().get(id).map(PlacementInfo::from),
                error: None,
            })
        })
        .await
    }

    pub async fn process_remove_signature(
        &self,
        params: &PlacementRefParams,
    ) -> crate::error::Result<PlacementResult> {
        let id = PlacementId::parse(&params.placement_id)?;
        self.with_session(&params.session_id, |session| {
            let removed = session.remove(id)?;
            Ok(PlacementResult {
                session_id: params.session_id.clone(),
                outcome: "removed".to_string(),
                placement: Some(PlacementInfo::from(&removed)),
                error: None,
            })
        })
        .await
    }

    pub async fn process_list_signatures(
        &self,
        params: &SessionParams,
    ) -> crate::error::Result<ListSignaturesResult> {
        self.with_session(&params.session_id, |session| {
            Ok(ListSignaturesResult {
                session_id: params.session_id.clone(),
                placements: session.ledger().iter().map(PlacementInfo::from).collect(),
                pending_clicks: session.pending_count(),
                error: None,
            })
        })
        .await
    }

    pub async fn process_render_page(
        &self,
        params: &RenderPageParams,
    ) -> crate::error::Result<RenderPageResult> {
        let (document, strategy, zoom, page, renders) = {
            let sessions = self.sessions.read().await;
            let entry = sessions
                .peek(&params.session_id)
                .ok_or_else(|| Error::SessionNotFound {
                    id: params.session_id.clone(),
                })?;
            let session = &entry.session;
            let page = params.page.unwrap_or(session.current_page());
            if page < 1 || page > session.page_count() {
                return Err(Error::PageOutOfBounds {
                    page,
                    total: session.page_count(),
                });
            }
            (
                session.document().clone(),
                session.strategy().clone(),
                session.zoom(),
                page,
                entry.renders.clone(),
            )
        };

        let mut result = RenderPageResult {
            session_id: params.session_id.clone(),
            page,
            render_strategy: strategy.name().to_string(),
            ..Default::default()
        };

        if let RenderStrategy::EmbeddedFrame { .. } = strategy {
            result.frame = strategy.embedded_frame(page, zoom);
            return Ok(result);
        }

        let engine = Arc::clone(&self.engine);
        let rendered = renders
            .render(page, move || async move {
                tokio::task::spawn_blocking(move || {
                    engine.render_page(&document.data, document.password.as_deref(), page, zoom)
                })
                .await
                .map_err(join_error)?
            })
            .await?;

        // Geometry is known now, unless the view moved on while rendering
        let placed = self
            .with_session(&params.session_id, |session| {
                if session.current_page() == page && session.zoom() == zoom {
                    session.refresh_geometry()
                } else {
                    tracing::debug!(page, "View changed during render, geometry not applied");
                    Ok(Vec::new())
                }
            })
            .await?;

        result.placed_from_queue = placed.iter().map(ToString::to_string).collect();
        result.image = Some(rendered);
        Ok(result)
    }

    pub async fn process_finalize_session(
        &self,
        params: &FinalizeSessionParams,
    ) -> crate::error::Result<SignPdfResult> {
        let (document, finalized) = self
            .with_session(&params.session_id, |session| {
                Ok((session.document().clone(), session.finalize()?))
            })
            .await?;

        tracing::info!(
            session = %params.session_id,
            placements = finalized.placements.len(),
            signature = %finalized.signature.id(),
            "Finalizing signing session"
        );

        self.complete_signing(
            document,
            Some(params.session_id.clone()),
            finalized.placements,
            &params.delivery,
        )
        .await
    }

    /// Remove a session, cancelling its renders. Returns whether it existed.
    pub async fn process_close_session(&self, session_id: &str) -> bool {
        match self.sessions.write().await.pop(session_id) {
            Some(entry) => {
                entry.renders.cancel_all();
                tracing::info!(session = %session_id, "Closed signing session");
                true
            }
            None => false,
        }
    }

    fn require_store(&self) -> crate::error::Result<Arc<dyn DocumentStore>> {
        self.store.clone().ok_or_else(|| Error::Persistence {
            reason: "no document store configured".to_string(),
        })
    }

    pub async fn process_list_signed_documents(
        &self,
        owner_id: &str,
    ) -> crate::error::Result<ListSignedDocumentsResult> {
        let store = self.require_store()?;
        let owner = owner_id.to_string();
        let documents = tokio::task::spawn_blocking(move || store.list(&owner))
            .await
            .map_err(join_error)??;
        Ok(ListSignedDocumentsResult {
            owner_id: owner_id.to_string(),
            documents,
            error: None,
        })
    }

    pub async fn process_delete_signed_document(
        &self,
        document_id: &str,
    ) -> crate::error::Result<DeleteSignedDocumentResult> {
        let store = self.require_store()?;
        let id = document_id.to_string();
        tokio::task::spawn_blocking(move || store.delete(&id))
            .await
            .map_err(join_error)??;
        Ok(DeleteSignedDocumentResult {
            document_id: document_id.to_string(),
            deleted: true,
            error: None,
        })
    }
}

impl Default for SignServer {
    fn default() -> Self {
        Self::new()
    }
}

#[tool_handler]
impl ServerHandler for SignServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "PDF signing server. Use sign_pdf to stamp a signature image onto a PDF in one call, \
                 or open_signing_session to render pages and place, move and resize signatures \
                 before finalize_session."
                    .into(),
            ),
        }
    }
}

/// Run the MCP server with default configuration
pub async fn run_server() -> Result<()> {
    run_server_with_config(ServerConfig::default()).await
}

/// Run the MCP server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> Result<()> {
    let server = SignServer::with_config(config);

    tracing::info!("PDF signing server ready, waiting for connections...");

    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::signature::test_images;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_source_name() {
        assert_eq!(
            SignServer::source_name(&DocumentSource::Path {
                path: "/test.pdf".to_string()
            }),
            "/test.pdf"
        );
        assert_eq!(
            SignServer::source_name(&DocumentSource::Base64 {
                base64: "...".to_string()
            }),
            "<base64>"
        );
        assert_eq!(
            SignServer::source_name(&DocumentSource::CacheRef {
                cache_key: "abc123".to_string()
            }),
            "<cache:abc123>"
        );
    }

    #[test]
    fn test_document_source_deserialization() {
        let source: DocumentSource = serde_json::from_str(r#"{"path": "/test.pdf"}"#).unwrap();
        assert!(matches!(source, DocumentSource::Path { .. }));

        let source: DocumentSource =
            serde_json::from_str(r#"{"url": "https://example.com/test.pdf"}"#).unwrap();
        assert!(matches!(source, DocumentSource::Url { .. }));

        let source: DocumentSource = serde_json::from_str(r#"{"cache_key": "abc"}"#).unwrap();
        assert!(matches!(source, DocumentSource::CacheRef { .. }));

        let err = serde_json::from_str::<DocumentSource>(r#"{"file": "x"}"#).unwrap_err();
        assert!(err.to_string().contains("got keys"));
        let err = serde_json::from_str::<DocumentSource>(r#""x.pdf""#).unwrap_err();
        assert!(err.to_string().contains("a string"));
        let err = serde_json::from_str::<DocumentSource>(r#"{"path": 3}"#).unwrap_err();
        assert!(err.to_string().contains("must be a string"));
    }

    #[test]
    fn test_sign_params_deserialization() {
        let json = r#"{
            "source": {"url": "https://files.example.com/lease.pdf"},
            "signature": "data:image/png;base64,AAAA",
            "placements": [
                {"page": 2, "x": 10, "y": 20, "width": 120, "height": 60},
                {"page": 9, "x": 0, "y": 0, "width": 10, "height": 10,
                 "frame_width": 1200, "frame_height": 1600}
            ],
            "owner_id": "user-7",
            "file_name": "lease.pdf"
        }"#;
        let params: SignPdfParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.placements.len(), 2);
        assert!(params.placements[0].frame().is_none());
        assert_eq!(
            params.placements[1].frame(),
            Some(PageFrame {
                width: 1200.0,
                height: 1600.0
            })
        );
        assert_eq!(params.delivery.owner_id.as_deref(), Some("user-7"));
        assert!(params.delivery.output_path.is_none());
    }

    #[test]
    fn test_zoom_defaults_device_pixel_ratio() {
        let params: SetViewParams =
            serde_json::from_str(r#"{"session_id": "s", "zoom": {"scale": 1.5}}"#).unwrap();
        assert_eq!(params.zoom, Some(Zoom::new(1.5, 1.0)));
    }

    #[test]
    fn test_config_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("PDF_SIGN_RESOURCE_DIRS", "/srv/pdfs, /tmp/in ,"),
            ("PDF_SIGN_ALLOW_PRIVATE_URLS", "true"),
            ("PDF_SIGN_MAX_DOWNLOAD_BYTES", "not-a-number"),
            ("PDF_SIGN_STORAGE_DIR", "/var/lib/pdf-sign"),
            ("PDF_SIGN_MAX_SESSIONS", "4"),
        ]
        .into_iter()
        .collect();

        let config = ServerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.resource_dirs, vec!["/srv/pdfs", "/tmp/in"]);
        assert!(config.allow_private_urls);
        assert_eq!(
            config.max_download_bytes,
            ServerConfig::default().max_download_bytes
        );
        assert_eq!(config.storage_dir, Some(PathBuf::from("/var/lib/pdf-sign")));
        assert_eq!(config.max_sessions, 4);

        let zero = ServerConfig::from_lookup(|k| {
            (k == "PDF_SIGN_MAX_SESSIONS").then(|| "0".to_string())
        });
        assert_eq!(zero.max_sessions, ServerConfig::default().max_sessions);

        let empty = ServerConfig::from_lookup(|_| None);
        assert!(empty.storage_dir.is_none());
        assert!(!empty.allow_private_urls);
    }

    #[tokio::test]
    async fn test_path_outside_resource_dirs_denied() {
        let allowed = tempfile::TempDir::new().unwrap();
        let outside = tempfile::TempDir::new().unwrap();
        let file = outside.path().join("doc.pdf");
        std::fs::write(&file, b"%PDF-1.4").unwrap();

        let server = SignServer::with_config(ServerConfig {
            resource_dirs: vec![allowed.path().to_string_lossy().to_string()],
            ..ServerConfig::default()
        });
        let result = server
            .resolve_source(&DocumentSource::Path {
                path: file.to_string_lossy().to_string(),
            })
            .await;
        assert!(matches!(result, Err(Error::PathAccessDenied { .. })));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let server = SignServer::new();
        let result = server
            .process_list_signatures(&SessionParams {
                session_id: "missing".to_string(),
            })
            .await;
        assert!(matches!(result, Err(Error::SessionNotFound { .. })));
        assert!(!server.process_close_session("missing").await);
    }

    #[tokio::test]
    async fn test_sign_pdf_requires_signature() {
        let server = SignServer::new();
        let params = SignPdfParams {
            source: DocumentSource::Base64 {
                base64: "JVBERi0xLjQ=".to_string(),
            },
            password: None,
            signature: None,
            placements: vec![PlacementParam {
                page: 1,
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 50.0,
                frame_width: None,
                frame_height: None,
                signature: None,
            }],
            delivery: DeliveryParams::default(),
        };
        let result = server.process_sign_pdf(&params).await;
        assert!(matches!(result, Err(Error::SignatureRequired { .. })));
    }

    #[tokio::test]
    async fn test_sign_pdf_rejects_undecodable_signature() {
        let server = SignServer::new();
        let params = SignPdfParams {
            source: DocumentSource::Base64 {
                base64: "JVBERi0xLjQ=".to_string(),
            },
            password: None,
            signature: Some("data:image/gif;base64,R0lGODlhAQABAAAAACw=".to_string()),
            placements: vec![PlacementParam {
                page: 1,
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 50.0,
                frame_width: None,
                frame_height: None,
                signature: None,
            }],
            delivery: DeliveryParams::default(),
        };
        let result = server.process_sign_pdf(&params).await;
        assert!(matches!(result, Err(Error::ImageDecode { .. })));
    }

    #[tokio::test]
    async fn test_storage_not_configured() {
        let server = SignServer::new();
        let result = server.process_list_signed_documents("u").await;
        assert!(matches!(result, Err(Error::Persistence { .. })));
    }

    #[test]
    fn test_placement_info_from_ledger() {
        let sig = Arc::new(SignatureImage::from_bytes(test_images::png(4, 2)).unwrap());
        let mut ledger = PlacementLedger::new();
        let id = ledger
            .add(3, ScreenRect::new(1.0, 2.0, 80.0, 40.0), None, Some(&sig))
            .unwrap();
        let info = PlacementInfo::from(ledger.get(id).unwrap());
        assert_eq!(info.id, "sig-1");
        assert_eq!(info.page, 3);
        assert_eq!(info.signature_id, sig.id().to_string());
    }
}
