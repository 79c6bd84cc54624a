//! Ordered ledger of pending signature placements

use crate::error::{Error, Result};
use crate::signing::geometry::{PageFrame, ScreenRect};
use crate::signing::signature::SignatureImage;
use std::fmt;
use std::sync::Arc;

/// Identifier of a placement, unique within one ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlacementId(u64);

impl PlacementId {
    /// Parse the `sig-N` form produced by `Display`
    pub fn parse(s: &str) -> Result<Self> {
        s.strip_prefix("sig-")
            .and_then(|n| n.parse().ok())
            .map(PlacementId)
            .ok_or_else(|| Error::PlacementNotFound { id: s.to_string() })
    }
}

impl fmt::Display for PlacementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sig-{}", self.0)
    }
}

/// One user-placed signature annotation
#[derive(Debug, Clone)]
pub struct PagePlacement {
    pub id: PlacementId,
    /// Target page (1-indexed). May exceed the page count; remapped at
    /// compositing time.
    pub page_number: u32,
    /// Screen-space rectangle at placement time
    pub rect: ScreenRect,
    /// Displayed page size when the placement was made
    pub frame: Option<PageFrame>,
    pub signature: Arc<SignatureImage>,
}

/// Placement records in insertion order
#[derive(Debug, Default)]
pub struct PlacementLedger {
    entries: Vec<PagePlacement>,
    next_id: u64,
}

impl PlacementLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a placement. Returns `None` without touching the ledger when no
    /// signature has been created yet.
    pub fn add(
        &mut self,
        page_number: u32,
        rect: ScreenRect,
        frame: Option<PageFrame>,
        signature: Option<&Arc<SignatureImage>>,
    ) -> Option<PlacementId> {
        let signature = signature?;
        self.next_id += 1;
        let id = PlacementId(self.next_id);
        self.entries.push(PagePlacement {
            id,
            page_number: page_number.max(1),
            rect: rect.with_min_size(),
            frame,
            signature: Arc::clone(signature),
        });
        Some(id)
    }

    /// Translate a placement. The origin is kept non-negative in screen
    /// space; page bounds are applied at compositing time.
    pub fn move_by(&mut self, id: PlacementId, dx: f32, dy: f32) -> Result<ScreenRect> {
        let entry = self.entry_mut(id)?;
        entry.rect.x = (entry.rect.x + dx).max(0.0);
        entry.rect.y = (entry.rect.y + dy).max(0.0);
        Ok(entry.rect)
    }

    /// Move a placement to an absolute origin (drag position)
    pub fn move_to(&mut self, id: PlacementId, x: f32, y: f32) -> Result<ScreenRect> {
        let entry = self.entry_mut(id)?;
        entry.rect.x = x.max(0.0);
        entry.rect.y = y.max(0.0);
        Ok(entry.rect)
    }

    /// Resize a placement, never below 50x25
    pub fn resize(&mut self, id: PlacementId, width: f32, height: f32) -> Result<ScreenRect> {
        let entry = self.entry_mut(id)?;
        entry.rect = ScreenRect {
            width,
            height,
            ..entry.rect
        }
        .with_min_size();
        Ok(entry.rect)
    }

    pub fn remove(&mut self, id: PlacementId) -> Result<PagePlacement> {
        let idx = self
            .entries
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| Error::PlacementNotFound { id: id.to_string() })?;
        Ok(self.entries.remove(idx))
    }

    /// Placements on one page, in insertion order
    pub fn by_page(&self, page_number: u32) -> impl Iterator<Item = &PagePlacement> {
        self.entries
            .iter()
            .filter(move |p| p.page_number == page_number)
    }

    pub fn get(&self, id: PlacementId) -> Option<&PagePlacement> {
        self.entries.iter().find(|p| p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PagePlacement> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[PagePlacement] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn entry_mut(&mut self, id: PlacementId) -> Result<&mut PagePlacement> {
        self.entries
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::PlacementNotFound { id: id.to_string() })
    }
}
