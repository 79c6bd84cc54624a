//! Page rendering strategy and per-page render scheduling

use crate::error::{Error, Result};
use crate::signing::geometry::{PageSize, Zoom};
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Page size reported when a document can only be shown in an embedded
/// viewer frame and its real geometry is unknown
pub const FALLBACK_PAGE_SIZE: PageSize = PageSize {
    width: 800.0,
    height: 600.0,
};

/// Rendered page image data
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct RenderedPage {
    /// Page number (1-indexed)
    pub page: u32,
    /// Image width in device pixels
    pub width: u32,
    /// Image height in device pixels
    pub height: u32,
    /// Base64-encoded PNG image data
    pub data_base64: String,
    /// MIME type (always "image/png")
    pub mime_type: String,
}

/// Viewer reference used when pages cannot be rasterized
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct EmbeddedFrame {
    pub page: u32,
    /// Viewer URL with page and zoom fragment
    pub src: String,
    /// Logical frame width
    pub width: f32,
    /// Logical frame height
    pub height: f32,
}

/// How pages of a document are shown. Chosen once when the document is
/// loaded and kept for the lifetime of the session.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderStrategy {
    /// Pages are rasterized with PDFium
    Raster,
    /// PDFium could not load the document; pages are shown in an embedded
    /// viewer pointing at the source URL
    EmbeddedFrame { source_url: Option<String> },
}

impl RenderStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            RenderStrategy::Raster => "raster",
            RenderStrategy::EmbeddedFrame { .. } => "embedded_frame",
        }
    }

    /// Viewer reference for a page. Only meaningful for `EmbeddedFrame`.
    pub fn embedded_frame(&self, page: u32, zoom: Zoom) -> Option<EmbeddedFrame> {
        match self {
            RenderStrategy::Raster => None,
            RenderStrategy::EmbeddedFrame { source_url } => {
                let src = match source_url {
                    Some(url) => format!(
                        "{}#page={}&zoom={}",
                        url,
                        page,
                        (zoom.scale * 100.0).round() as i64
                    ),
                    None => format!("#page={}", page),
                };
                Some(EmbeddedFrame {
                    page,
                    src,
                    width: FALLBACK_PAGE_SIZE.width * zoom.scale,
                    height: FALLBACK_PAGE_SIZE.height * zoom.scale,
                })
            }
        }
    }
}

struct InFlight {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Surface {
    generation: u64,
    page: RenderedPage,
    draws: u64,
}

#[derive(Default)]
struct SchedulerInner {
    next_generation: u64,
    in_flight: HashMap<u32, InFlight>,
    surfaces: HashMap<u32, Surface>,
}

/// Keeps at most one render in flight per page.
///
/// A new request for a page aborts the previous task before the new one is
/// spawned. A finished render is committed to the page surface only while it
/// is still the newest request for that page.
#[derive(Clone, Default)]
pub struct RenderScheduler {
    inner: Arc<Mutex<SchedulerInner>>,
}

impl RenderScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` as the current render of `page`. Resolves to
    /// `RenderCancelled` if a newer request for the same page supersedes it.
    pub async fn render<F, Fut>(&self, page: u32, job: F) -> Result<RenderedPage>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<RenderedPage>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        {
            let mut inner = self.inner.lock();

            if let Some(previous) = inner.in_flight.remove(&page) {
                previous.handle.abort();
                tracing::debug!(
                    page,
                    generation = previous.generation,
                    "Cancelled previous render task"
                );
            }

            inner.next_generation += 1;
            let generation = inner.next_generation;
            let shared = Arc::clone(&self.inner);
            let work = job();

            let handle = tokio::spawn(async move {
                let result = work.await;
                let result = match result {
                    Ok(rendered) => {
                        let mut inner = shared.lock();
                        let current = inner
                            .in_flight
                            .get(&page)
                            .map(|f| f.generation == generation)
                            .unwrap_or(false);
                        if current {
                            inner.in_flight.remove(&page);
                            let draws = inner.surfaces.get(&page).map(|s| s.draws).unwrap_or(0);
                            inner.surfaces.insert(
                                page,
                                Surface {
                                    generation,
                                    page: rendered.clone(),
                                    draws: draws + 1,
                                },
                            );
                            Ok(rendered)
                        } else {
                            Err(Error::RenderCancelled { page })
                        }
                    }
                    Err(e) => {
                        let mut inner = shared.lock();
                        if inner
                            .in_flight
                            .get(&page)
                            .map(|f| f.generation == generation)
                            .unwrap_or(false)
                        {
                            inner.in_flight.remove(&page);
                        }
                        Err(e)
                    }
                };
                let _ = tx.send(result);
            });

            inner
                .in_flight
                .insert(page, InFlight { generation, handle });
        }

        rx.await.unwrap_or(Err(Error::RenderCancelled { page }))
    }

    /// Abort every in-flight render
    pub fn cancel_all(&self) {
        let mut inner = self.inner.lock();
        for (page, flight) in inner.in_flight.drain() {
            flight.handle.abort();
            tracing::debug!(page, "Cancelled render task");
        }
    }

    /// Last image committed for a page
    pub fn surface(&self, page: u32) -> Option<RenderedPage> {
        self.inner.lock().surfaces.get(&page).map(|s| s.page.clone())
    }

    /// Number of completed draws onto a page surface
    pub fn draw_count(&self, page: u32) -> u64 {
        self.inner
            .lock()
            .surfaces
            .get(&page)
            .map(|s| s.draws)
            .unwrap_or(0)
    }

    /// Generation of the render currently shown on a page
    pub fn surface_generation(&self, page: u32) -> Option<u64> {
        self.inner.lock().surfaces.get(&page).map(|s| s.generation)
    }

    pub fn in_flight(&self, page: u32) -> bool {
        self.inner.lock().in_flight.contains_key(&page)
    }
}
