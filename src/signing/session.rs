//! Per-user signing session: view state, pointer interaction, placements

use crate::error::{Error, Result};
use crate::render::RenderStrategy;
use crate::signing::geometry::{PageGeometry, ScreenPoint, ScreenRect, Zoom};
use crate::signing::ledger::{PagePlacement, PlacementId, PlacementLedger};
use crate::signing::page_geometry::{PageGeometryProvider, StaticGeometry};
use crate::signing::signature::SignatureImage;
use std::sync::Arc;

/// Size of a signature dropped with a single click
pub const CLICK_PLACEMENT_WIDTH: f32 = 100.0;
pub const CLICK_PLACEMENT_HEIGHT: f32 = 50.0;

/// Outcome of a click placement
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaceOutcome {
    Placed(PlacementId),
    /// Geometry for the current page is not known yet; the click is applied
    /// once it is
    Queued,
    /// No signature has been created
    NoSignature,
}

/// Pointer interaction in progress. Dragging and resizing exclude each other.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Interaction {
    #[default]
    Idle,
    Dragging {
        id: PlacementId,
        /// Pointer offset from the placement origin when the drag started
        offset: ScreenPoint,
    },
    Resizing {
        id: PlacementId,
    },
}

impl Interaction {
    pub fn name(&self) -> &'static str {
        match self {
            Interaction::Idle => "idle",
            Interaction::Dragging { .. } => "dragging",
            Interaction::Resizing { .. } => "resizing",
        }
    }
}

/// The loaded document a session signs
#[derive(Debug, Clone)]
pub struct SessionDocument {
    pub data: Arc<Vec<u8>>,
    pub source_name: String,
    /// Remote location, when the document was fetched over HTTP
    pub source_url: Option<String>,
    pub password: Option<String>,
}

/// Everything needed to composite a finished session
#[derive(Debug, Clone)]
pub struct FinalizedSigning {
    pub placements: Vec<PagePlacement>,
    pub signature: Arc<SignatureImage>,
}

#[derive(Debug, Clone, Copy)]
struct PendingClick {
    page_number: u32,
    point: ScreenPoint,
}

/// Editing state for one document.
///
/// Page geometry is invalidated on every page or zoom change and must be
/// supplied again through [`SigningSession::apply_geometry`]. Clicks made
/// while it is missing are queued rather than placed with a wrong frame.
#[derive(Debug)]
pub struct SigningSession {
    id: String,
    document: SessionDocument,
    strategy: RenderStrategy,
    pages: StaticGeometry,
    current_page: u32,
    zoom: Zoom,
    geometry: Option<PageGeometry>,
    signature: Option<Arc<SignatureImage>>,
    ledger: PlacementLedger,
    interaction: Interaction,
    pending: Vec<PendingClick>,
}

impl SigningSession {
    pub fn new(
        id: impl Into<String>,
        document: SessionDocument,
        strategy: RenderStrategy,
        pages: StaticGeometry,
    ) -> Self {
        Self {
            id: id.into(),
            document,
            strategy,
            pages,
            current_page: 1,
            zoom: Zoom::default(),
            geometry: None,
            signature: None,
            ledger: PlacementLedger::new(),
            interaction: Interaction::Idle,
            pending: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn document(&self) -> &SessionDocument {
        &self.document
    }

    pub fn strategy(&self) -> &RenderStrategy {
        &self.strategy
    }

    pub fn page_count(&self) -> u32 {
        self.pages.page_count()
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn zoom(&self) -> Zoom {
        self.zoom
    }

    /// Geometry of the current page at the current zoom, if known
    pub fn geometry(&self) -> Option<&PageGeometry> {
        self.geometry.as_ref()
    }

    pub fn signature(&self) -> Option<&Arc<SignatureImage>> {
        self.signature.as_ref()
    }

    pub fn ledger(&self) -> &PlacementLedger {
        &self.ledger
    }

    pub fn interaction(&self) -> Interaction {
        self.interaction
    }

    /// Number of clicks waiting for geometry
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Switch page. Out-of-range numbers are rejected and leave the session
    /// untouched.
    pub fn set_current_page(&mut self, page_number: u32) -> Result<()> {
        let total = self.page_count();
        if page_number < 1 || page_number > total {
            return Err(Error::PageOutOfBounds {
                page: page_number,
                total,
            });
        }
        if page_number != self.current_page {
            self.current_page = page_number;
            self.geometry = None;
        }
        Ok(())
    }

    pub fn set_zoom(&mut self, zoom: Zoom) -> Result<()> {
        if !zoom.is_valid() {
            return Err(Error::InvalidZoom {
                detail: format!(
                    "scale {} / device pixel ratio {}",
                    zoom.scale, zoom.device_pixel_ratio
                ),
            });
        }
        if zoom != self.zoom {
            self.zoom = zoom;
            self.geometry = None;
        }
        Ok(())
    }

    /// Accept geometry for the current page and zoom, then place any clicks
    /// queued for that page. Returns the ids placed from the queue.
    pub fn apply_geometry(&mut self, geometry: PageGeometry) -> Result<Vec<PlacementId>> {
        if geometry.page_number != self.current_page || geometry.zoom != self.zoom {
            return Err(Error::StaleGeometry {
                detail: format!(
                    "page {} at scale {} (current: page {} at scale {})",
                    geometry.page_number, geometry.zoom.scale, self.current_page, self.zoom.scale
                ),
            });
        }
        self.geometry = Some(geometry);

        let (ready, waiting): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|c| c.page_number == geometry.page_number);
        self.pending = waiting;

        let mut placed = Vec::with_capacity(ready.len());
        for click in ready {
            if let Some(id) = self.add_click(click.page_number, click.point, &geometry) {
                placed.push(id);
            }
        }
        if !placed.is_empty() {
            tracing::debug!(
                page = geometry.page_number,
                count = placed.len(),
                "Placed queued signatures"
            );
        }
        Ok(placed)
    }

    /// Recompute geometry for the current view from the session's own page
    /// sizes
    pub fn refresh_geometry(&mut self) -> Result<Vec<PlacementId>> {
        let geometry = self.pages.page_geometry(self.current_page, self.zoom)?;
        self.apply_geometry(geometry)
    }

    /// Replace the signature. Placements already made keep the image they
    /// were made with.
    pub fn set_signature(&mut self, signature: SignatureImage) -> Arc<SignatureImage> {
        let signature = Arc::new(signature);
        self.signature = Some(Arc::clone(&signature));
        signature
    }

    pub fn clear_signature(&mut self) {
        self.signature = None;
    }

    /// Drop a signature centered on a click on the current page
    pub fn place_at(&mut self, point: ScreenPoint) -> Result<PlaceOutcome> {
        self.require_idle()?;
        if self.signature.is_none() {
            return Ok(PlaceOutcome::NoSignature);
        }
        match self.geometry {
            Some(geometry) => Ok(self
                .add_click(self.current_page, point, &geometry)
                .map(PlaceOutcome::Placed)
                .unwrap_or(PlaceOutcome::NoSignature)),
            None => {
                self.pending.push(PendingClick {
                    page_number: self.current_page,
                    point,
                });
                Ok(PlaceOutcome::Queued)
            }
        }
    }

    /// Place an explicit rectangle on a page. The rect is taken in the
    /// logical frame of that page at the current zoom, whether or not the page
    /// has been rendered. Pages past the end use the last page's frame, which
    /// is where the placement lands when composited.
    pub fn place_rect(&mut self, page_number: u32, rect: ScreenRect) -> Result<PlacementId> {
        self.require_idle()?;
        let frame_page = page_number.clamp(1, self.pages.page_count().max(1));
        let frame = self
            .pages
            .page_geometry(frame_page, self.zoom)?
            .logical_frame();
        self.ledger
            .add(page_number, rect, Some(frame), self.signature.as_ref())
            .ok_or(Error::SignatureRequired {
                action: "placing it".to_string(),
            })
    }

    pub fn move_by(&mut self, id: PlacementId, dx: f32, dy: f32) -> Result<ScreenRect> {
        self.require_idle()?;
        self.ledger.move_by(id, dx, dy)
    }

    pub fn resize(&mut self, id: PlacementId, width: f32, height: f32) -> Result<ScreenRect> {
        self.require_idle()?;
        self.ledger.resize(id, width, height)
    }

    pub fn remove(&mut self, id: PlacementId) -> Result<PagePlacement> {
        self.require_idle()?;
        self.ledger.remove(id)
    }

    pub fn begin_drag(&mut self, id: PlacementId, pointer: ScreenPoint) -> Result<()> {
        self.require_idle()?;
        let rect = self.placement_rect(id)?;
        self.interaction = Interaction::Dragging {
            id,
            offset: ScreenPoint {
                x: pointer.x - rect.x,
                y: pointer.y - rect.y,
            },
        };
        Ok(())
    }

    pub fn drag_to(&mut self, pointer: ScreenPoint) -> Result<ScreenRect> {
        match self.interaction {
            Interaction::Dragging { id, offset } => {
                self.ledger
                    .move_to(id, pointer.x - offset.x, pointer.y - offset.y)
            }
            other => Err(Error::InteractionInProgress {
                current: other.name().to_string(),
            }),
        }
    }

    pub fn begin_resize(&mut self, id: PlacementId) -> Result<()> {
        self.require_idle()?;
        self.placement_rect(id)?;
        self.interaction = Interaction::Resizing { id };
        Ok(())
    }

    /// Resize so the bottom-right corner follows the pointer
    pub fn resize_to(&mut self, pointer: ScreenPoint) -> Result<ScreenRect> {
        match self.interaction {
            Interaction::Resizing { id } => {
                let rect = self.placement_rect(id)?;
                self.ledger
                    .resize(id, pointer.x - rect.x, pointer.y - rect.y)
            }
            other => Err(Error::InteractionInProgress {
                current: other.name().to_string(),
            }),
        }
    }

    pub fn end_interaction(&mut self) {
        self.interaction = Interaction::Idle;
    }

    /// Snapshot placements for compositing. Requires a signature and at
    /// least one placement.
    pub fn finalize(&self) -> Result<FinalizedSigning> {
        let signature = self
            .signature
            .as_ref()
            .ok_or_else(|| Error::SignatureRequired {
                action: "signing the document".to_string(),
            })?;
        if self.ledger.is_empty() {
            return Err(Error::SignatureRequired {
                action: "signing the document (no placements)".to_string(),
            });
        }
        if !self.pending.is_empty() {
            tracing::warn!(
                session = %self.id,
                pending = self.pending.len(),
                "Finalizing with clicks still waiting for page geometry"
            );
        }
        Ok(FinalizedSigning {
            placements: self.ledger.as_slice().to_vec(),
            signature: Arc::clone(signature),
        })
    }

    fn add_click(
        &mut self,
        page_number: u32,
        point: ScreenPoint,
        geometry: &PageGeometry,
    ) -> Option<PlacementId> {
        let rect = ScreenRect::new(
            point.x - CLICK_PLACEMENT_WIDTH / 2.0,
            point.y - CLICK_PLACEMENT_HEIGHT / 2.0,
            CLICK_PLACEMENT_WIDTH,
            CLICK_PLACEMENT_HEIGHT,
        );
        self.ledger.add(
            page_number,
            rect,
            Some(geometry.logical_frame()),
            self.signature.as_ref(),
        )
    }

    fn placement_rect(&self, id: PlacementId) -> Result<ScreenRect> {
        self.ledger
            .get(id)
            .map(|p| p.rect)
            .ok_or_else(|| Error::PlacementNotFound { id: id.to_string() })
    }

    fn require_idle(&self) -> Result<()> {
        match self.interaction {
            Interaction::Idle => Ok(()),
            other => Err(Error::InteractionInProgress {
                current: other.name().to_string(),
            }),
        }
    }
}
