//! Coordinate frames for signature placement
//!
//! Screen space has its origin at the top-left of the rendered page and is
//! measured in logical pixels at the zoom level the page was displayed at.
//! Document space is the PDF's native frame: origin bottom-left, unit = points.
//! The Y axis flips exactly once, in [`to_document_space`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Minimum placement width in logical units
pub const MIN_PLACEMENT_WIDTH: f32 = 50.0;
/// Minimum placement height in logical units
pub const MIN_PLACEMENT_HEIGHT: f32 = 25.0;

/// Upper bound on the zoom factor used for rasterization
pub const MAX_RENDER_SCALE: f32 = 2.0;

/// Pointer position in screen space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
}

/// Rectangle in screen space (origin top-left)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScreenRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ScreenRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Apply the resize floor to width and height
    pub fn with_min_size(self) -> Self {
        Self {
            width: self.width.max(MIN_PLACEMENT_WIDTH),
            height: self.height.max(MIN_PLACEMENT_HEIGHT),
            ..self
        }
    }
}

/// Rectangle in document space (origin bottom-left, points)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DocumentRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Native page size in points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

/// Logical size of the displayed page a placement was made against.
///
/// Recorded with each placement so compositing scales from the frame the
/// user actually saw, not whatever is displayed at finalize time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PageFrame {
    pub width: f32,
    pub height: f32,
}

/// Display zoom: user scale and the device pixel ratio of the canvas
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Zoom {
    pub scale: f32,
    #[serde(default = "default_device_pixel_ratio")]
    pub device_pixel_ratio: f32,
}

fn default_device_pixel_ratio() -> f32 {
    1.0
}

impl Default for Zoom {
    fn default() -> Self {
        Self {
            scale: 1.0,
            device_pixel_ratio: 1.0,
        }
    }
}

impl Zoom {
    pub fn new(scale: f32, device_pixel_ratio: f32) -> Self {
        Self {
            scale,
            device_pixel_ratio,
        }
    }

    /// Scale actually used for rendering (capped)
    pub fn effective_scale(&self) -> f32 {
        self.scale.min(MAX_RENDER_SCALE)
    }

    /// Scale including the device pixel ratio, i.e. device pixels per point
    pub fn render_scale(&self) -> f32 {
        self.effective_scale() * self.device_pixel_ratio
    }

    pub fn is_valid(&self) -> bool {
        self.scale.is_finite()
            && self.scale > 0.0
            && self.device_pixel_ratio.is_finite()
            && self.device_pixel_ratio > 0.0
    }
}

/// Geometry of one page at one zoom level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, JsonSchema)]
pub struct PageGeometry {
    /// Page number (1-indexed)
    pub page_number: u32,
    /// Native width in points
    pub width_points: f32,
    /// Native height in points
    pub height_points: f32,
    /// Zoom the geometry was derived for
    pub zoom: Zoom,
}

impl PageGeometry {
    /// Derive geometry from native page size. The viewport is measured in
    /// device pixels and the device pixel ratio is divided back out.
    pub fn from_points(page_number: u32, size: PageSize, zoom: Zoom) -> Self {
        Self {
            page_number,
            width_points: size.width,
            height_points: size.height,
            zoom,
        }
    }

    /// Viewport size in device pixels
    pub fn viewport(&self) -> (f32, f32) {
        let s = self.zoom.render_scale();
        (self.width_points * s, self.height_points * s)
    }

    /// Logical (CSS pixel) size of the displayed page
    pub fn logical_frame(&self) -> PageFrame {
        let (w, h) = self.viewport();
        let dpr = self.zoom.device_pixel_ratio;
        PageFrame {
            width: w / dpr,
            height: h / dpr,
        }
    }

    pub fn size(&self) -> PageSize {
        PageSize {
            width: self.width_points,
            height: self.height_points,
        }
    }
}

/// Flip a screen rectangle into document space.
pub fn to_document_space(rect: ScreenRect, page_height: f32) -> DocumentRect {
    DocumentRect {
        x: rect.x,
        y: page_height - rect.y - rect.height,
        width: rect.width,
        height: rect.height,
    }
}

/// Inverse of [`to_document_space`].
pub fn to_screen_space(rect: DocumentRect, page_height: f32) -> ScreenRect {
    ScreenRect {
        x: rect.x,
        y: page_height - rect.y - rect.height,
        width: rect.width,
        height: rect.height,
    }
}

/// Keep a document rectangle inside `[0, W] x [0, H]`.
///
/// The origin is clamped to `[0, page - size]` with the lower bound winning,
/// so an oversize rectangle never gets a negative coordinate. Such a
/// rectangle is then shrunk to the page.
pub fn clamp_to_page(rect: DocumentRect, page: PageSize) -> DocumentRect {
    let x = rect.x.min(page.width - rect.width).max(0.0);
    let y = rect.y.min(page.height - rect.height).max(0.0);
    DocumentRect {
        x,
        y,
        width: rect.width.min(page.width - x).max(0.0),
        height: rect.height.min(page.height - y).max(0.0),
    }
}

/// Convert a rect recorded against `frame` into points of a page of `page`
/// size. Without a frame the rect is already in points.
pub fn scale_to_points(rect: ScreenRect, frame: Option<PageFrame>, page: PageSize) -> ScreenRect {
    match frame {
        Some(f) if f.width > 0.0 && f.height > 0.0 => {
            let sx = page.width / f.width;
            let sy = page.height / f.height;
            ScreenRect {
                x: rect.x * sx,
                y: rect.y * sy,
                width: rect.width * sx,
                height: rect.height * sy,
            }
        }
        _ => rect,
    }
}

/// Full placement pipeline: scale into points, flip, clamp.
pub fn place_on_page(rect: ScreenRect, frame: Option<PageFrame>, page: PageSize) -> DocumentRect {
    let in_points = scale_to_points(rect, frame, page);
    clamp_to_page(to_document_space(in_points, page.height), page)
}
