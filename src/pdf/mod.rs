//! PDF processing layer
//!
//! [`PdfEngine`] is the seam between the server and the PDF libraries.
//! [`PdfiumEngine`] is the production implementation on PDFium and qpdf.

mod pdfium;
mod qpdf;

pub use self::pdfium::{
    composite_pdf, create_pdfium, get_page_sizes, render_page, PdfiumBackend, PdfiumEditor,
    PdfiumEngine, PdfiumGeometry, MAX_CANVAS_HEIGHT, MAX_CANVAS_WIDTH,
};
pub use self::qpdf::QpdfWrapper;

use crate::error::{Error, Result};
use crate::render::{RenderStrategy, RenderedPage, FALLBACK_PAGE_SIZE};
use crate::signing::compositor::CompositeOutput;
use crate::signing::geometry::{PageSize, Zoom};
use crate::signing::ledger::PagePlacement;
use crate::signing::page_geometry::StaticGeometry;

/// How a loaded document will be shown, and the page sizes to lay it out with
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentLayout {
    pub strategy: RenderStrategy,
    pub pages: StaticGeometry,
}

/// PDF operations the server needs. Implementations are called from
/// blocking threads.
pub trait PdfEngine: Send + Sync {
    /// Native size of every page, from the rendering engine
    fn page_sizes(&self, data: &[u8], password: Option<&str>) -> Result<Vec<PageSize>>;

    /// Page count from a structural read, for documents the rendering engine
    /// cannot open
    fn page_count(&self, data: &[u8], password: Option<&str>) -> Result<u32>;

    fn render_page(
        &self,
        data: &[u8],
        password: Option<&str>,
        page_number: u32,
        zoom: Zoom,
    ) -> Result<RenderedPage>;

    fn composite(
        &self,
        data: &[u8],
        password: Option<&str>,
        placements: &[PagePlacement],
    ) -> Result<CompositeOutput>;

    /// Pick the render strategy for a document. Rasterization is used when
    /// the rendering engine can load it; otherwise pages are shown in an
    /// embedded viewer with fallback geometry. Fails only when neither read
    /// works.
    fn layout(
        &self,
        data: &[u8],
        password: Option<&str>,
        source_url: Option<String>,
    ) -> Result<DocumentLayout> {
        match self.page_sizes(data, password) {
            Ok(sizes) => Ok(DocumentLayout {
                strategy: RenderStrategy::Raster,
                pages: StaticGeometry::new(sizes),
            }),
            Err(e @ (Error::PasswordRequired | Error::IncorrectPassword)) => Err(e),
            Err(render_err) => {
                tracing::warn!(
                    error = %render_err,
                    "Rasterizer could not load document, using embedded viewer"
                );
                let count = self
                    .page_count(data, password)
                    .map_err(|e| Error::SourceLoad {
                        reason: format!("{}; {}", render_err, e),
                    })?;
                Ok(DocumentLayout {
                    strategy: RenderStrategy::EmbeddedFrame { source_url },
                    pages: StaticGeometry::uniform(count, FALLBACK_PAGE_SIZE),
                })
            }
        }
    }
}
