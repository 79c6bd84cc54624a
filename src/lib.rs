//! PDF Signing Server Library
//!
//! This crate provides MCP tools for placing handwritten signature images on
//! PDF pages and producing the signed document:
//! - `get_pdf_info`: Page count and page sizes
//! - `sign_pdf`: Stamp a signature at given positions in one call
//! - `open_signing_session` and the session tools: render pages, place,
//!   move and resize signatures interactively, then `finalize_session`
//! - `list_signed_documents` / `delete_signed_document`: Stored results

pub mod error;
pub mod pdf;
pub mod render;
pub mod server;
pub mod signing;
pub mod source;
pub mod store;

pub use error::{Error, Result};
pub use server::{
    run_server, run_server_with_config, DocumentSource, ServerConfig, SignPdfParams,
    SignPdfResult, SignServer,
};
