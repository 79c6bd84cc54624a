//! Page geometry providers

use crate::error::{Error, Result};
use crate::signing::geometry::{PageGeometry, PageSize, Zoom};

/// Reports native page sizes and derives zoom-dependent geometry from them.
///
/// Geometry is derived on every call. Callers must re-query after any page
/// or zoom change instead of holding on to an earlier result.
pub trait PageGeometryProvider {
    fn page_count(&self) -> u32;

    /// Native size of a page in points (1-indexed)
    fn page_size(&self, page_number: u32) -> Result<PageSize>;

    fn page_geometry(&self, page_number: u32, zoom: Zoom) -> Result<PageGeometry> {
        if !zoom.is_valid() {
            return Err(Error::InvalidZoom {
                detail: format!(
                    "scale {} / device pixel ratio {}",
                    zoom.scale, zoom.device_pixel_ratio
                ),
            });
        }
        let total = self.page_count();
        if page_number < 1 || page_number > total {
            return Err(Error::PageOutOfBounds {
                page: page_number,
                total,
            });
        }
        let size = self.page_size(page_number)?;
        Ok(PageGeometry::from_points(page_number, size, zoom))
    }

    /// Geometry of every page at one zoom level
    fn all_pages(&self, zoom: Zoom) -> Result<Vec<PageGeometry>> {
        (1..=self.page_count())
            .map(|n| self.page_geometry(n, zoom))
            .collect()
    }
}

/// Geometry from a fixed list of page sizes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticGeometry {
    pages: Vec<PageSize>,
}

impl StaticGeometry {
    pub fn new(pages: Vec<PageSize>) -> Self {
        Self { pages }
    }

    /// `count` pages of the same size
    pub fn uniform(count: u32, size: PageSize) -> Self {
        Self {
            pages: vec![size; count as usize],
        }
    }

    pub fn pages(&self) -> &[PageSize] {
        &self.pages
    }
}

impl PageGeometryProvider for StaticGeometry {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_size(&self, page_number: u32) -> Result<PageSize> {
        page_number
            .checked_sub(1)
            .and_then(|i| self.pages.get(i as usize))
            .copied()
            .ok_or(Error::PageOutOfBounds {
                page: page_number,
                total: self.page_count(),
            })
    }
}
