//! Signature placement and compositing
//!
//! Placements are recorded in screen space against the page as displayed,
//! kept in a [`ledger::PlacementLedger`], and burned into the PDF by the
//! [`compositor::Compositor`] in document space.

pub mod compositor;
pub mod geometry;
pub mod ledger;
pub mod page_geometry;
pub mod session;
pub mod signature;

pub use compositor::{
    AppliedPlacement, CompositeOutput, Compositor, DocumentBackend, DocumentEditor,
    SkippedPlacement,
};
pub use geometry::{
    clamp_to_page, place_on_page, scale_to_points, to_document_space, to_screen_space,
    DocumentRect, PageFrame, PageGeometry, PageSize, ScreenPoint, ScreenRect, Zoom,
};
pub use ledger::{PagePlacement, PlacementId, PlacementLedger};
pub use page_geometry::{PageGeometryProvider, StaticGeometry};
pub use session::{FinalizedSigning, Interaction, PlaceOutcome, SessionDocument, SigningSession};
pub use signature::SignatureImage;
