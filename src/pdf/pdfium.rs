//! PDFium adapters: document editing, page geometry, and rasterization

use crate::error::{Error, Result};
use crate::pdf::qpdf::QpdfWrapper;
use crate::pdf::PdfEngine;
use crate::render::RenderedPage;
use crate::signing::compositor::{CompositeOutput, Compositor, DocumentBackend, DocumentEditor};
use crate::signing::geometry::{DocumentRect, PageSize, Zoom};
use crate::signing::ledger::PagePlacement;
use crate::signing::page_geometry::PageGeometryProvider;
use base64::Engine;
use image::DynamicImage;
use pdfium_render::prelude::*;

/// Largest canvas a page is rasterized onto, in device pixels
pub const MAX_CANVAS_WIDTH: i32 = 1600;
pub const MAX_CANVAS_HEIGHT: i32 = 2000;

/// Get PDFium instance (creates new instance each time - PDFium is not thread-safe)
pub fn create_pdfium() -> Result<Pdfium> {
    // Try to bind to system library or use static linking
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "/opt/pdfium/lib",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to initialize PDFium: {}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

/// Map PDFium errors to our error type
fn map_pdfium_error(err: PdfiumError) -> Error {
    match err {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            Error::PasswordRequired
        }
        _ => Error::Pdfium {
            reason: format!("{}", err),
        },
    }
}

fn check_header(data: &[u8]) -> Result<()> {
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::InvalidPdf {
            reason: "Not a valid PDF file".to_string(),
        });
    }
    Ok(())
}

fn load_document<'a>(
    pdfium: &'a Pdfium,
    data: &'a [u8],
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>> {
    check_header(data)?;
    pdfium
        .load_pdf_from_byte_slice(data, password)
        .map_err(map_pdfium_error)
}

fn page_at<'a>(document: &PdfDocument<'a>, page_index: u32) -> Result<PdfPage<'a>> {
    let total = document.pages().len() as u32;
    if page_index >= total {
        return Err(Error::PageOutOfBounds {
            page: page_index + 1,
            total,
        });
    }
    document
        .pages()
        .get(page_index as PdfPageIndex)
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to get page {}: {}", page_index + 1, e),
        })
}

/// Document backend bound to one PDFium instance
pub struct PdfiumBackend {
    pdfium: Pdfium,
}

impl PdfiumBackend {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pdfium: create_pdfium()?,
        })
    }
}

/// A PDF opened for signature compositing
pub struct PdfiumEditor<'a> {
    document: PdfDocument<'a>,
}

impl DocumentBackend for PdfiumBackend {
    type Editor<'a> = PdfiumEditor<'a>;

    fn load<'a>(&'a self, data: &'a [u8], password: Option<&'a str>) -> Result<PdfiumEditor<'a>> {
        Ok(PdfiumEditor {
            document: load_document(&self.pdfium, data, password)?,
        })
    }
}

impl DocumentEditor for PdfiumEditor<'_> {
    type Image = DynamicImage;

    fn page_count(&self) -> u32 {
        self.document.pages().len() as u32
    }

    fn page_size(&self, page_index: u32) -> Result<PageSize> {
        let page = page_at(&self.document, page_index)?;
        Ok(PageSize {
            width: page.width().value,
            height: page.height().value,
        })
    }

    fn embed_png(&mut self, bytes: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory_with_format(bytes, image::ImageFormat::Png).map_err(|e| {
            Error::ImageDecode {
                reason: format!("PNG: {}", e),
            }
        })
    }

    fn embed_jpeg(&mut self, bytes: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg).map_err(|e| {
            Error::ImageDecode {
                reason: format!("JPEG: {}", e),
            }
        })
    }

    fn draw_image(
        &mut self,
        page_index: u32,
        image: &DynamicImage,
        rect: DocumentRect,
    ) -> Result<()> {
        let mut page = page_at(&self.document, page_index)?;
        page.objects_mut()
            .create_image_object(
                PdfPoints::new(rect.x),
                PdfPoints::new(rect.y),
                image,
                Some(PdfPoints::new(rect.width)),
                Some(PdfPoints::new(rect.height)),
            )
            .map_err(|e| Error::Pdfium {
                reason: format!("Failed to draw signature on page {}: {}", page_index + 1, e),
            })?;
        page.regenerate_content().map_err(map_pdfium_error)?;
        Ok(())
    }

    fn save(self) -> Result<Vec<u8>> {
        self.document.save_to_bytes().map_err(|e| Error::Pdfium {
            reason: format!("Failed to save signed PDF: {}", e),
        })
    }
}

/// Page geometry read from a loaded PDFium document
pub struct PdfiumGeometry<'a> {
    document: PdfDocument<'a>,
}

impl<'a> PdfiumGeometry<'a> {
    pub fn load(pdfium: &'a Pdfium, data: &'a [u8], password: Option<&'a str>) -> Result<Self> {
        Ok(Self {
            document: load_document(pdfium, data, password)?,
        })
    }

    /// Native size of every page
    pub fn page_sizes(&self) -> Result<Vec<PageSize>> {
        (1..=self.page_count()).map(|n| self.page_size(n)).collect()
    }

    /// Rasterize one page at a zoom level, clamped to the maximum canvas.
    pub fn render_page(&self, page_number: u32, zoom: Zoom) -> Result<RenderedPage> {
        let total = self.page_count();
        if page_number < 1 || page_number > total {
            return Err(Error::PageOutOfBounds {
                page: page_number,
                total,
            });
        }
        let page = page_at(&self.document, page_number - 1)?;

        let config = PdfRenderConfig::new()
            .scale_page_by_factor(zoom.render_scale())
            .set_maximum_width(MAX_CANVAS_WIDTH)
            .set_maximum_height(MAX_CANVAS_HEIGHT)
            .render_form_data(true)
            .render_annotations(true);

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| Error::Pdfium {
                reason: format!("Failed to render page {}: {}", page_number, e),
            })?;

        let dynamic_image = bitmap.as_image();
        let img_width = dynamic_image.width();
        let img_height = dynamic_image.height();

        // Encode as PNG
        let mut png_bytes = Vec::new();
        dynamic_image
            .write_to(
                &mut std::io::Cursor::new(&mut png_bytes),
                image::ImageFormat::Png,
            )
            .map_err(|e| Error::Pdfium {
                reason: format!("Failed to encode page {} as PNG: {}", page_number, e),
            })?;

        Ok(RenderedPage {
            page: page_number,
            width: img_width,
            height: img_height,
            data_base64: base64::engine::general_purpose::STANDARD.encode(&png_bytes),
            mime_type: "image/png".to_string(),
        })
    }
}

impl PageGeometryProvider for PdfiumGeometry<'_> {
    fn page_count(&self) -> u32 {
        self.document.pages().len() as u32
    }

    fn page_size(&self, page_number: u32) -> Result<PageSize> {
        let index = page_number.checked_sub(1).ok_or(Error::PageOutOfBounds {
            page: page_number,
            total: self.page_count(),
        })?;
        let page = page_at(&self.document, index)?;
        Ok(PageSize {
            width: page.width().value,
            height: page.height().value,
        })
    }
}

/// Read native page sizes of a PDF
pub fn get_page_sizes(data: &[u8], password: Option<&str>) -> Result<Vec<PageSize>> {
    let pdfium = create_pdfium()?;
    let sizes = PdfiumGeometry::load(&pdfium, data, password)?.page_sizes();
    sizes
}

/// Rasterize one page of a PDF
pub fn render_page(
    data: &[u8],
    password: Option<&str>,
    page_number: u32,
    zoom: Zoom,
) -> Result<RenderedPage> {
    let pdfium = create_pdfium()?;
    let rendered = PdfiumGeometry::load(&pdfium, data, password)?.render_page(page_number, zoom);
    rendered
}

/// Composite placements into a PDF with PDFium, then check the output with
/// qpdf before handing it out.
pub fn composite_pdf(
    data: &[u8],
    password: Option<&str>,
    placements: &[PagePlacement],
) -> Result<CompositeOutput> {
    let compositor = Compositor::new(PdfiumBackend::new()?);
    let output = compositor.composite_placements(data, password, placements)?;

    QpdfWrapper::verify_page_count(&output.bytes, password, output.page_count)?;

    tracing::info!(
        size = output.bytes.len(),
        placed = output.placed.len(),
        skipped = output.skipped.len(),
        "PDF signed successfully"
    );
    Ok(output)
}

/// Production engine. A fresh PDFium binding is created per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfiumEngine;

impl PdfEngine for PdfiumEngine {
    fn page_sizes(&self, data: &[u8], password: Option<&str>) -> Result<Vec<PageSize>> {
        get_page_sizes(data, password)
    }

    fn page_count(&self, data: &[u8], password: Option<&str>) -> Result<u32> {
        QpdfWrapper::get_page_count(data, password)
    }

    fn render_page(
        &self,
        data: &[u8],
        password: Option<&str>,
        page_number: u32,
        zoom: Zoom,
    ) -> Result<RenderedPage> {
        render_page(data, password, page_number, zoom)
    }

    fn composite(
        &self,
        data: &[u8],
        password: Option<&str>,
        placements: &[PagePlacement],
    ) -> Result<CompositeOutput> {
        composite_pdf(data, password, placements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::geometry::ScreenRect;
    use crate::signing::ledger::PlacementLedger;
    use crate::signing::signature::{test_images, SignatureImage};
    use std::sync::Arc;

    #[test]
    fn test_invalid_pdf_detection() {
        let result = check_header(b"not a pdf");
        assert!(matches!(result, Err(Error::InvalidPdf { .. })));
        assert!(check_header(b"%PDF-1.7").is_ok());
    }

    fn blank_pdf(pdfium: &Pdfium, pages: u16) -> Vec<u8> {
        let mut document = pdfium.create_new_pdf().unwrap();
        for _ in 0..pages {
            document
                .pages_mut()
                .create_page_at_end(PdfPagePaperSize::a4())
                .unwrap();
        }
        document.save_to_bytes().unwrap()
    }

    #[test]
    #[ignore = "requires the PDFium shared library"]
    fn test_pdfium_page_sizes() {
        let pdfium = create_pdfium().unwrap();
        let data = blank_pdf(&pdfium, 2);
        let sizes = get_page_sizes(&data, None).unwrap();
        assert_eq!(sizes.len(), 2);
        assert!((sizes[0].width - 595.0).abs() < 1.0);
    }

    #[test]
    #[ignore = "requires the PDFium shared library"]
    fn test_pdfium_composite_and_render() {
        let pdfium = create_pdfium().unwrap();
        let data = blank_pdf(&pdfium, 3);
        let sig = Arc::new(SignatureImage::from_bytes(test_images::jpeg(60, 30)).unwrap());

        let mut ledger = PlacementLedger::new();
        ledger.add(5, ScreenRect::new(40.0, 40.0, 120.0, 60.0), None, Some(&sig));

        let output = composite_pdf(&data, None, ledger.as_slice()).unwrap();
        assert_eq!(output.page_count, 3);
        assert_eq!(output.placed[0].page, 3);

        let rendered = render_page(&output.bytes, None, 3, Zoom::new(1.0, 1.0)).unwrap();
        assert_eq!(rendered.mime_type, "image/png");
        assert!(rendered.width as i32 <= MAX_CANVAS_WIDTH);
    }
}
