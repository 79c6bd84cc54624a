//! Burn placed signatures into a PDF

use crate::error::{Error, Result};
use crate::signing::geometry::{place_on_page, DocumentRect, PageSize};
use crate::signing::ledger::{PagePlacement, PlacementId, PlacementLedger};
use std::collections::HashMap;
use uuid::Uuid;

/// A loaded, mutable PDF document
pub trait DocumentEditor {
    /// Handle of an image embedded in the document
    type Image;

    fn page_count(&self) -> u32;

    /// Native size of a page in points (0-indexed)
    fn page_size(&self, page_index: u32) -> Result<PageSize>;

    fn embed_png(&mut self, bytes: &[u8]) -> Result<Self::Image>;

    fn embed_jpeg(&mut self, bytes: &[u8]) -> Result<Self::Image>;

    /// Draw an embedded image on a page (0-indexed) in document space
    fn draw_image(&mut self, page_index: u32, image: &Self::Image, rect: DocumentRect)
        -> Result<()>;

    /// Serialize the document
    fn save(self) -> Result<Vec<u8>>;
}

/// Opens documents for editing
pub trait DocumentBackend {
    type Editor<'a>: DocumentEditor
    where
        Self: 'a;

    fn load<'a>(&'a self, data: &'a [u8], password: Option<&'a str>) -> Result<Self::Editor<'a>>;
}

/// A placement that was drawn
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedPlacement {
    pub id: PlacementId,
    pub requested_page: u32,
    /// Page actually drawn on (1-indexed)
    pub page: u32,
    pub rect: DocumentRect,
}

impl AppliedPlacement {
    pub fn remapped(&self) -> bool {
        self.page != self.requested_page
    }
}

/// A placement that could not be drawn. Other placements still apply.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedPlacement {
    pub id: PlacementId,
    pub requested_page: u32,
    pub reason: String,
}

/// Result of a successful composite
#[derive(Debug)]
pub struct CompositeOutput {
    pub bytes: Vec<u8>,
    pub page_count: u32,
    pub placed: Vec<AppliedPlacement>,
    pub skipped: Vec<SkippedPlacement>,
}

/// Composites signature placements onto documents loaded by `B`
pub struct Compositor<B> {
    backend: B,
}

impl<B: DocumentBackend> Compositor<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Composite every placement in the ledger
    pub fn composite(
        &self,
        data: &[u8],
        password: Option<&str>,
        ledger: &PlacementLedger,
    ) -> Result<CompositeOutput> {
        self.composite_placements(data, password, ledger.as_slice())
    }

    /// Composite placements in order. Either the whole document is produced
    /// or an error is returned and nothing is.
    pub fn composite_placements(
        &self,
        data: &[u8],
        password: Option<&str>,
        placements: &[PagePlacement],
    ) -> Result<CompositeOutput> {
        let mut editor = self
            .backend
            .load(data, password)
            .map_err(|e| match e {
                Error::PasswordRequired | Error::IncorrectPassword => e,
                other => Error::SourceLoad {
                    reason: other.to_string(),
                },
            })?;

        let total_pages = editor.page_count();
        tracing::info!(
            placements = placements.len(),
            total_pages,
            "Compositing signatures"
        );

        let (placed, skipped) = apply_placements(&mut editor, placements)?;
        let bytes = editor.save()?;

        Ok(CompositeOutput {
            bytes,
            page_count: total_pages,
            placed,
            skipped,
        })
    }
}

fn apply_placements<E: DocumentEditor>(
    editor: &mut E,
    placements: &[PagePlacement],
) -> Result<(Vec<AppliedPlacement>, Vec<SkippedPlacement>)> {
    let total_pages = editor.page_count();
    let mut embedded: HashMap<Uuid, E::Image> = HashMap::new();
    let mut placed = Vec::with_capacity(placements.len());
    let mut skipped = Vec::new();

    for placement in placements {
        let target = placement.page_number.min(total_pages);
        if target == 0 {
            tracing::warn!(
                id = %placement.id,
                page = placement.page_number,
                total_pages,
                "Invalid page index for placement, skipping"
            );
            skipped.push(SkippedPlacement {
                id: placement.id,
                requested_page: placement.page_number,
                reason: format!(
                    "Page {} cannot be resolved in a document with {} pages",
                    placement.page_number, total_pages
                ),
            });
            continue;
        }
        if target != placement.page_number {
            tracing::info!(
                id = %placement.id,
                requested = placement.page_number,
                total_pages,
                "Requested page beyond document, using last page"
            );
        }

        let page_index = target - 1;
        let page_size = editor.page_size(page_index)?;
        let rect = place_on_page(placement.rect, placement.frame, page_size);

        let signature = &placement.signature;
        if !embedded.contains_key(&signature.id()) {
            let image = embed_signature(editor, signature.bytes())?;
            tracing::debug!(
                width = signature.width(),
                height = signature.height(),
                "Embedded signature image"
            );
            embedded.insert(signature.id(), image);
        }

        if let Some(image) = embedded.get(&signature.id()) {
            editor.draw_image(page_index, image, rect)?;
        }
        tracing::debug!(
            id = %placement.id,
            page = target,
            x = rect.x,
            y = rect.y,
            width = rect.width,
            height = rect.height,
            "Placed signature"
        );

        placed.push(AppliedPlacement {
            id: placement.id,
            requested_page: placement.page_number,
            page: target,
            rect,
        });
    }

    Ok((placed, skipped))
}

/// Embed as PNG, falling back to JPEG. Both failing is fatal.
fn embed_signature<E: DocumentEditor>(editor: &mut E, bytes: &[u8]) -> Result<E::Image> {
    match editor.embed_png(bytes) {
        Ok(image) => Ok(image),
        Err(png_err) => {
            tracing::debug!(error = %png_err, "PNG embedding failed, trying JPEG");
            editor.embed_jpeg(bytes).map_err(|jpeg_err| Error::ImageDecode {
                reason: format!("PNG: {}; JPEG: {}", png_err, jpeg_err),
            })
        }
    }
}
