//! qpdf FFI wrapper
//!
//! Used for structural reads that do not need PDFium: page counts for
//! documents PDFium refuses to open, and a sanity pass over signed output.

use crate::error::{Error, Result};
use qpdf::QPdf;

/// Wrapper for qpdf operations via FFI
pub struct QpdfWrapper;

/// Helper: open a QPdf from memory, optionally with password
fn open_qpdf(data: &[u8], password: Option<&str>) -> Result<QPdf> {
    match password {
        Some(pwd) => QPdf::read_from_memory_encrypted(data, pwd).map_err(map_qpdf_error),
        None => QPdf::read_from_memory(data).map_err(map_qpdf_error),
    }
}

/// Map qpdf crate errors to our error types
fn map_qpdf_error(e: qpdf::QPdfError) -> Error {
    match e.error_code() {
        qpdf::QPdfErrorCode::InvalidPassword => Error::IncorrectPassword,
        _ => Error::QpdfError {
            reason: e.to_string(),
        },
    }
}

impl QpdfWrapper {
    /// Get the page count of a PDF
    pub fn get_page_count(input_data: &[u8], password: Option<&str>) -> Result<u32> {
        let qpdf = open_qpdf(input_data, password)?;
        qpdf.get_num_pages().map_err(map_qpdf_error)
    }

    /// Check that `output` parses and still has `expected_pages` pages
    pub fn verify_page_count(
        output: &[u8],
        password: Option<&str>,
        expected_pages: u32,
    ) -> Result<()> {
        let actual = Self::get_page_count(output, password)?;
        if actual != expected_pages {
            return Err(Error::QpdfError {
                reason: format!(
                    "Signed PDF has {} pages, expected {}",
                    actual, expected_pages
                ),
            });
        }
        Ok(())
    }
}
