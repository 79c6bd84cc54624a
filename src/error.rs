//! Error types for PDF Sign Server

use thiserror::Error;

/// Result type alias for PDF Sign Server
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for PDF Sign Server
#[derive(Error, Debug)]
pub enum Error {
    /// PDF file not found
    #[error("PDF not found: {path}")]
    PdfNotFound { path: String },

    /// Invalid PDF file
    #[error("Invalid PDF file: {reason}")]
    InvalidPdf { reason: String },

    /// Source document could not be fetched or parsed
    #[error("Failed to load source document: {reason}")]
    SourceLoad { reason: String },

    /// Signature image is neither a readable PNG nor a readable JPEG
    #[error("Signature image could not be decoded: {reason}")]
    ImageDecode { reason: String },

    /// Storage or database write failed
    #[error("Failed to persist signed document: {reason}")]
    Persistence { reason: String },

    /// PDF is password protected and no password was provided
    #[error("PDF is password protected")]
    PasswordRequired,

    /// Incorrect password provided
    #[error("Incorrect password")]
    IncorrectPassword,

    /// Page out of bounds
    #[error("Page {page} out of bounds (total: {total})")]
    PageOutOfBounds { page: u32, total: u32 },

    /// Cache key not found
    #[error("Cache key not found: {key}")]
    CacheKeyNotFound { key: String },

    /// Signing session not found
    #[error("Signing session not found: {id}")]
    SessionNotFound { id: String },

    /// Placement not found in the ledger
    #[error("Placement not found: {id}")]
    PlacementNotFound { id: String },

    /// Signed document record not found in the store
    #[error("Signed document not found: {id}")]
    DocumentNotFound { id: String },

    /// An operation needs a signature that has not been created yet
    #[error("A signature must be created before {action}")]
    SignatureRequired { action: String },

    /// A drag or resize is already active
    #[error("Interaction already in progress: {current}")]
    InteractionInProgress { current: String },

    /// Zoom value rejected at the boundary
    #[error("Invalid zoom: {detail}")]
    InvalidZoom { detail: String },

    /// Page geometry reported for a page or zoom the session has moved away from
    #[error("Stale page geometry: {detail}")]
    StaleGeometry { detail: String },

    /// Render superseded by a newer request for the same page
    #[error("Render of page {page} was cancelled")]
    RenderCancelled { page: u32 },

    /// Source resolution error
    #[error("Failed to resolve source: {reason}")]
    SourceResolution { reason: String },

    /// Base64 decode error
    #[error("Invalid base64 data: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// PDFium error
    #[error("PDFium error: {reason}")]
    Pdfium { reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// qpdf error
    #[error("qpdf error: {reason}")]
    QpdfError { reason: String },

    /// Path access denied (outside allowed resource directories)
    #[error("Path access denied: {path}")]
    PathAccessDenied { path: String },

    /// SSRF blocked (URL resolves to private/reserved IP)
    #[error("SSRF blocked: {url}")]
    SsrfBlocked { url: String },

    /// Download too large
    #[error("Download too large: {size} bytes (max: {max_size} bytes)")]
    DownloadTooLarge { size: u64, max_size: u64 },
}

impl Error {
    /// Return a sanitized error message safe to send to clients.
    /// Internal details (paths, library errors, file sizes) are omitted.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::PdfNotFound { .. } => "PDF not found".to_string(),
            Error::InvalidPdf { .. } => "Invalid PDF file".to_string(),
            Error::SourceLoad { .. } => "Failed to load document".to_string(),
            Error::ImageDecode { .. } => {
                "Signature image could not be read, please redraw it".to_string()
            }
            Error::Persistence { .. } => "Could not save to database".to_string(),
            Error::PasswordRequired => "PDF is password protected".to_string(),
            Error::IncorrectPassword => "Incorrect password".to_string(),
            Error::PageOutOfBounds { page, total } => {
                format!("Page {} out of bounds (total: {})", page, total)
            }
            Error::CacheKeyNotFound { .. } => "Cache key not found".to_string(),
            Error::SessionNotFound { .. } => "Signing session not found".to_string(),
            Error::PlacementNotFound { .. } => "Signature placement not found".to_string(),
            Error::DocumentNotFound { .. } => "Signed document not found".to_string(),
            Error::SignatureRequired { action } => {
                format!("A signature must be created before {}", action)
            }
            Error::InteractionInProgress { current } => {
                format!("Another interaction is in progress: {}", current)
            }
            Error::InvalidZoom { detail } => format!("Invalid zoom: {}", detail),
            Error::StaleGeometry { .. } => {
                "Page geometry is out of date, render the page again".to_string()
            }
            Error::RenderCancelled { page } => {
                format!("Render of page {} was superseded", page)
            }
            Error::SourceResolution { .. } => "Failed to resolve PDF source".to_string(),
            Error::Base64Decode(_) => "Invalid base64 data".to_string(),
            Error::HttpRequest(_) => "HTTP request failed".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::Pdfium { .. } => "PDF processing error".to_string(),
            Error::Serialization(_) => "Serialization error".to_string(),
            Error::QpdfError { .. } => "PDF processing error".to_string(),
            Error::PathAccessDenied { .. } => "Access denied".to_string(),
            Error::SsrfBlocked { .. } => "URL not allowed".to_string(),
            Error::DownloadTooLarge { max_size, .. } => {
                format!("Download exceeds maximum size of {} bytes", max_size)
            }
        }
    }

    /// Whether the error aborts the whole operation. Persistence failures
    /// degrade to returning the composited bytes inline.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Persistence { .. })
    }
}
