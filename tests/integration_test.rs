//! Integration tests for the PDF signing server
//!
//! The PDF engine is replaced with an in-process fake whose "documents" are
//! page-size lists and whose saved output records every draw, so whole
//! signing flows can be checked without a PDFium library.

use base64::Engine;
use pdf_sign_server::pdf::PdfEngine;
use pdf_sign_server::render::RenderedPage;
use pdf_sign_server::server::{
    DeliveryParams, DocumentSource, FinalizeSessionParams, GetPdfInfoParams, OpenSessionParams,
    PlaceSignatureParams, PlacementParam, PlacementRefParams, RenderPageParams,
    ResizeSignatureParams, SessionParams, SetSignatureParams, SetViewParams, SignPdfParams,
    MoveSignatureParams,
};
use pdf_sign_server::signing::{
    CompositeOutput, Compositor, DocumentBackend, DocumentEditor, DocumentRect, PagePlacement,
    PageSize, Zoom,
};
use pdf_sign_server::store::{
    DocumentStore, FilesystemStore, SignedDocument, SignedDocumentRecord, StoredDocument,
};
use pdf_sign_server::{Error, Result, ServerConfig, SignServer};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

const HEADER: &[u8] = b"%PDF-fake\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Draw {
    page_index: u32,
    image: (u32, u32),
    rect: DocumentRect,
}

struct FakeEditor {
    pages: Vec<PageSize>,
    draws: Vec<Draw>,
}

impl DocumentEditor for FakeEditor {
    type Image = (u32, u32);

    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_size(&self, page_index: u32) -> Result<PageSize> {
        self.pages
            .get(page_index as usize)
            .copied()
            .ok_or(Error::PageOutOfBounds {
                page: page_index + 1,
                total: self.page_count(),
            })
    }

    fn embed_png(&mut self, bytes: &[u8]) -> Result<(u32, u32)> {
        decode(bytes, image::ImageFormat::Png)
    }

    fn embed_jpeg(&mut self, bytes: &[u8]) -> Result<(u32, u32)> {
        decode(bytes, image::ImageFormat::Jpeg)
    }

    fn draw_image(&mut self, page_index: u32, image: &(u32, u32), rect: DocumentRect) -> Result<()> {
        self.draws.push(Draw {
            page_index,
            image: *image,
            rect,
        });
        Ok(())
    }

    fn save(self) -> Result<Vec<u8>> {
        let mut out = HEADER.to_vec();
        out.extend(serde_json::to_vec(&self.draws)?);
        Ok(out)
    }
}

fn decode(bytes: &[u8], format: image::ImageFormat) -> Result<(u32, u32)> {
    let img = image::load_from_memory_with_format(bytes, format).map_err(|e| Error::ImageDecode {
        reason: e.to_string(),
    })?;
    Ok((img.width(), img.height()))
}

struct FakeBackend {
    pages: Vec<PageSize>,
}

impl DocumentBackend for FakeBackend {
    type Editor<'a> = FakeEditor;

    fn load<'a>(&'a self, data: &'a [u8], _password: Option<&'a str>) -> Result<FakeEditor> {
        if !data.starts_with(b"%PDF") {
            return Err(Error::InvalidPdf {
                reason: "missing header".to_string(),
            });
        }
        Ok(FakeEditor {
            pages: self.pages.clone(),
            draws: Vec::new(),
        })
    }
}

struct FakeEngine {
    pages: Vec<PageSize>,
    rasterizable: bool,
    render_delay: Duration,
}

impl FakeEngine {
    fn letter(count: usize) -> Self {
        Self {
            pages: vec![
                PageSize {
                    width: 600.0,
                    height: 800.0,
                };
                count
            ],
            rasterizable: true,
            render_delay: Duration::ZERO,
        }
    }
}

impl PdfEngine for FakeEngine {
    fn page_sizes(&self, _data: &[u8], _password: Option<&str>) -> Result<Vec<PageSize>> {
        if self.rasterizable {
            Ok(self.pages.clone())
        } else {
            Err(Error::Pdfium {
                reason: "unsupported document".to_string(),
            })
        }
    }

    fn page_count(&self, _data: &[u8], _password: Option<&str>) -> Result<u32> {
        Ok(self.pages.len() as u32)
    }

    fn render_page(
        &self,
        _data: &[u8],
        _password: Option<&str>,
        page_number: u32,
        zoom: Zoom,
    ) -> Result<RenderedPage> {
        std::thread::sleep(self.render_delay);
        let size = self.pages[page_number as usize - 1];
        Ok(RenderedPage {
            page: page_number,
            width: (size.width * zoom.render_scale()) as u32,
            height: (size.height * zoom.render_scale()) as u32,
            data_base64: String::new(),
            mime_type: "image/png".to_string(),
        })
    }

    fn composite(
        &self,
        data: &[u8],
        password: Option<&str>,
        placements: &[PagePlacement],
    ) -> Result<CompositeOutput> {
        Compositor::new(FakeBackend {
            pages: self.pages.clone(),
        })
        .composite_placements(data, password, placements)
    }
}

struct FailingStore {
    broken_disk: bool,
}

impl DocumentStore for FailingStore {
    fn store(&self, _document: &SignedDocument) -> Result<StoredDocument> {
        if self.broken_disk {
            return Err(Error::Io(std::io::Error::other("device gone")));
        }
        Err(Error::Persistence {
            reason: "quota exceeded".to_string(),
        })
    }

    fn list(&self, _owner_id: &str) -> Result<Vec<SignedDocumentRecord>> {
        Ok(Vec::new())
    }

    fn delete(&self, document_id: &str) -> Result<SignedDocumentRecord> {
        Err(Error::DocumentNotFound {
            id: document_id.to_string(),
        })
    }
}

fn server_with(engine: FakeEngine, store: Option<Arc<dyn DocumentStore>>) -> SignServer {
    SignServer::with_services(ServerConfig::default(), Arc::new(engine), store)
}

fn open_params() -> OpenSessionParams {
    OpenSessionParams {
        source: pdf_source(),
        password: None,
    }
}

fn pdf_source() -> DocumentSource {
    DocumentSource::Base64 {
        base64: base64::engine::general_purpose::STANDARD.encode(b"%PDF-1.7\n%fake"),
    }
}

fn png_data_url(width: u32, height: u32) -> String {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([0, 0, 0, 255]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

fn draws_in(pdf_base64: &str) -> Vec<Draw> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(pdf_base64)
        .unwrap();
    assert!(bytes.starts_with(HEADER));
    serde_json::from_slice(&bytes[HEADER.len()..]).unwrap()
}

fn placement(page: u32, x: f32, y: f32, width: f32, height: f32) -> PlacementParam {
    PlacementParam {
        page,
        x,
        y,
        width,
        height,
        frame_width: None,
        frame_height: None,
        signature: None,
    }
}

fn sign_params(placements: Vec<PlacementParam>, delivery: DeliveryParams) -> SignPdfParams {
    SignPdfParams {
        source: pdf_source(),
        password: None,
        signature: Some(png_data_url(40, 20)),
        placements,
        delivery,
    }
}

fn delivery(owner: &str, file: &str) -> DeliveryParams {
    DeliveryParams {
        owner_id: Some(owner.to_string()),
        file_name: Some(file.to_string()),
        output_path: None,
    }
}

#[tokio::test]
async fn test_get_pdf_info_reports_geometry() {
    let server = server_with(FakeEngine::letter(2), None);
    let info = server
        .process_get_pdf_info(&GetPdfInfoParams {
            source: pdf_source(),
            password: None,
            zoom: Some(Zoom::new(1.5, 2.0)),
        })
        .await
        .unwrap();

    assert_eq!(info.page_count, 2);
    assert_eq!(info.render_strategy, "raster");
    assert_eq!(info.pages[1].width_points, 600.0);
    assert_eq!(info.pages[1].logical_width, 900.0);
}

#[tokio::test]
async fn test_sign_pdf_flips_clamps_and_remaps() {
    let server = server_with(FakeEngine::letter(3), None);
    let result = server
        .process_sign_pdf(&sign_params(
            vec![
                placement(1, 100.0, 50.0, 100.0, 40.0),
                placement(5, 10.0, 10.0, 100.0, 50.0),
                placement(2, 580.0, 790.0, 100.0, 50.0),
            ],
            DeliveryParams::default(),
        ))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.message.as_deref(), Some("PDF signed successfully"));
    assert!(result.document_id.is_none());
    assert!(result.output_cache_key.is_some());
    assert_eq!(result.page_count, 3);
    assert!(result.skipped.is_empty());

    let draws = draws_in(result.pdf_base64.as_deref().unwrap());
    assert_eq!(draws.len(), 3);
    assert_eq!(
        draws[0].rect,
        DocumentRect {
            x: 100.0,
            y: 710.0,
            width: 100.0,
            height: 40.0
        }
    );
    // Page 5 of 3 lands on the last page
    assert_eq!(draws[1].page_index, 2);
    assert!(result.placed[1].remapped);
    // Bottom-right overflow is pulled back inside the page
    assert_eq!(draws[2].rect.x, 500.0);
    assert_eq!(draws[2].rect.y, 0.0);
    assert_eq!(draws[0].image, (40, 20));
}

#[tokio::test]
async fn test_sign_pdf_output_is_chainable_from_cache() {
    let server = server_with(FakeEngine::letter(1), None);
    let first = server
        .process_sign_pdf(&sign_params(
            vec![placement(1, 0.0, 0.0, 100.0, 50.0)],
            DeliveryParams::default(),
        ))
        .await
        .unwrap();

    let info = server
        .process_get_pdf_info(&GetPdfInfoParams {
            source: DocumentSource::CacheRef {
                cache_key: first.output_cache_key.unwrap(),
            },
            password: None,
            zoom: None,
        })
        .await
        .unwrap();
    assert_eq!(info.page_count, 1);
}

#[tokio::test]
async fn test_sign_pdf_stores_when_owner_and_file_given() {
    let dir = tempfile::TempDir::new().unwrap();
    let store: Arc<dyn DocumentStore> = Arc::new(FilesystemStore::new(dir.path()));
    let server = server_with(FakeEngine::letter(2), Some(store));

    let result = server
        .process_sign_pdf(&sign_params(
            vec![placement(2, 10.0, 10.0, 100.0, 50.0)],
            delivery("user-1", "lease.pdf"),
        ))
        .await
        .unwrap();

    assert_eq!(
        result.message.as_deref(),
        Some("PDF signed and saved successfully")
    );
    assert!(result.pdf_base64.is_none());
    let document_id = result.document_id.unwrap();
    let file_path = result.file_path.unwrap();
    assert!(dir.path().join(&file_path).exists());

    let listed = server.process_list_signed_documents("user-1").await.unwrap();
    assert_eq!(listed.documents.len(), 1);
    assert_eq!(listed.documents[0].id, document_id);
    assert_eq!(listed.documents[0].placements[0].page, 2);

    let deleted = server
        .process_delete_signed_document(&document_id)
        .await
        .unwrap();
    assert!(deleted.deleted);
    assert!(!dir.path().join(&file_path).exists());
}

#[tokio::test]
async fn test_sign_pdf_without_file_name_returns_inline() {
    let dir = tempfile::TempDir::new().unwrap();
    let store: Arc<dyn DocumentStore> = Arc::new(FilesystemStore::new(dir.path()));
    let server = server_with(FakeEngine::letter(1), Some(store));

    let result = server
        .process_sign_pdf(&sign_params(
            vec![placement(1, 0.0, 0.0, 100.0, 50.0)],
            DeliveryParams {
                owner_id: Some("user-1".to_string()),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    assert!(result.document_id.is_none());
    assert!(result.pdf_base64.is_some());
    assert!(server
        .process_list_signed_documents("user-1")
        .await
        .unwrap()
        .documents
        .is_empty());
}

#[tokio::test]
async fn test_storage_failure_falls_back_to_inline() {
    let server = server_with(
        FakeEngine::letter(1),
        Some(Arc::new(FailingStore { broken_disk: false })),
    );
    let result = server
        .process_sign_pdf(&sign_params(
            vec![placement(1, 0.0, 0.0, 100.0, 50.0)],
            delivery("user-1", "lease.pdf"),
        ))
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.error.is_none());
    assert_eq!(
        result.message.as_deref(),
        Some("PDF signed successfully (storage save failed)")
    );
    assert_eq!(result.warning.as_deref(), Some("Could not save to database"));
    assert_eq!(draws_in(result.pdf_base64.as_deref().unwrap()).len(), 1);
}

#[tokio::test]
async fn test_non_persistence_store_error_fails_signing() {
    let server = server_with(
        FakeEngine::letter(1),
        Some(Arc::new(FailingStore { broken_disk: true })),
    );
    let result = server
        .process_sign_pdf(&sign_params(
            vec![placement(1, 0.0, 0.0, 100.0, 50.0)],
            delivery("user-1", "lease.pdf"),
        ))
        .await;
    assert!(matches!(result, Err(Error::Io(_))));
}

#[tokio::test]
async fn test_output_larger_than_cache_gets_no_key() {
    let config = ServerConfig {
        cache_max_bytes: 4,
        ..ServerConfig::default()
    };
    let server = SignServer::with_services(config, Arc::new(FakeEngine::letter(1)), None);
    let result = server
        .process_sign_pdf(&sign_params(
            vec![placement(1, 0.0, 0.0, 100.0, 50.0)],
            DeliveryParams::default(),
        ))
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.output_cache_key.is_none());
    assert!(result.pdf_base64.is_some());
}

#[tokio::test]
async fn test_session_limit_closes_least_recently_used() {
    let config = ServerConfig {
        max_sessions: 2,
        ..ServerConfig::default()
    };
    let server = SignServer::with_services(config, Arc::new(FakeEngine::letter(1)), None);

    let first = server.process_open_session(&open_params()).await.unwrap().session_id;
    let second = server.process_open_session(&open_params()).await.unwrap().session_id;
    // Touch the first so the second becomes least recently used
    server
        .process_list_signatures(&SessionParams {
            session_id: first.clone(),
        })
        .await
        .unwrap();
    let third = server.process_open_session(&open_params()).await.unwrap().session_id;

    let evicted = server
        .process_list_signatures(&SessionParams { session_id: second })
        .await;
    assert!(matches!(evicted, Err(Error::SessionNotFound { .. })));
    for session_id in [first, third] {
        assert!(server
            .process_list_signatures(&SessionParams { session_id })
            .await
            .is_ok());
    }
}

#[tokio::test]
async fn test_explicit_rect_uses_zoomed_frame_before_render() {
    let server = server_with(FakeEngine::letter(1), None);
    let session_id = server.process_open_session(&open_params()).await.unwrap().session_id;
    server
        .process_set_signature(&SetSignatureParams {
            session_id: session_id.clone(),
            signature: Some(png_data_url(10, 10)),
        })
        .await
        .unwrap();
    server
        .process_set_view(&SetViewParams {
            session_id: session_id.clone(),
            page: None,
            zoom: Some(Zoom::new(2.0, 1.0)),
        })
        .await
        .unwrap();

    // No render yet: the rect is still read against the 1200x1600 frame
    server
        .process_place_signature(&PlaceSignatureParams {
            session_id: session_id.clone(),
            x: 200.0,
            y: 100.0,
            page: Some(1),
            width: Some(200.0),
            height: Some(100.0),
        })
        .await
        .unwrap();

    let signed = server
        .process_finalize_session(&FinalizeSessionParams {
            session_id,
            delivery: DeliveryParams::default(),
        })
        .await
        .unwrap();
    let draws = draws_in(signed.pdf_base64.as_deref().unwrap());
    assert_eq!(
        draws[0].rect,
        DocumentRect {
            x: 100.0,
            y: 700.0,
            width: 100.0,
            height: 50.0
        }
    );
}

#[tokio::test]
async fn test_sign_pdf_with_unreadable_document() {
    let server = server_with(FakeEngine::letter(1), None);
    let mut params = sign_params(
        vec![placement(1, 0.0, 0.0, 100.0, 50.0)],
        DeliveryParams::default(),
    );
    params.source = DocumentSource::Base64 {
        base64: base64::engine::general_purpose::STANDARD.encode(b"GIF89a"),
    };

    let result = server.process_sign_pdf(&params).await;
    assert!(matches!(result, Err(Error::InvalidPdf { .. })));
}

#[tokio::test]
async fn test_per_placement_signature_images() {
    let server = server_with(FakeEngine::letter(1), None);
    let mut second = placement(1, 0.0, 100.0, 100.0, 50.0);
    second.signature = Some(png_data_url(8, 8));

    let result = server
        .process_sign_pdf(&sign_params(
            vec![placement(1, 0.0, 0.0, 100.0, 50.0), second],
            DeliveryParams::default(),
        ))
        .await
        .unwrap();

    let draws = draws_in(result.pdf_base64.as_deref().unwrap());
    assert_eq!(draws[0].image, (40, 20));
    assert_eq!(draws[1].image, (8, 8));
}

#[tokio::test]
async fn test_interactive_session_flow() {
    let server = server_with(FakeEngine::letter(2), None);

    let opened = server
        .process_open_session(&OpenSessionParams {
            source: pdf_source(),
            password: None,
        })
        .await
        .unwrap();
    let session_id = opened.session_id.clone();
    assert_eq!(opened.render_strategy, "raster");
    assert!(opened.geometry.is_none());

    // Clicking before a signature exists does nothing
    let result = server
        .process_place_signature(&PlaceSignatureParams {
            session_id: session_id.clone(),
            x: 100.0,
            y: 100.0,
            page: None,
            width: None,
            height: None,
        })
        .await
        .unwrap();
    assert_eq!(result.outcome, "no_signature");

    server
        .process_set_signature(&SetSignatureParams {
            session_id: session_id.clone(),
            signature: Some(png_data_url(40, 20)),
        })
        .await
        .unwrap();

    let view = server
        .process_set_view(&SetViewParams {
            session_id: session_id.clone(),
            page: Some(2),
            zoom: Some(Zoom::new(2.0, 1.0)),
        })
        .await
        .unwrap();
    assert_eq!(view.current_page, 2);

    // Page 2 has not been rendered at 2x yet
    let queued = server
        .process_place_signature(&PlaceSignatureParams {
            session_id: session_id.clone(),
            x: 200.0,
            y: 100.0,
            page: None,
            width: None,
            height: None,
        })
        .await
        .unwrap();
    assert_eq!(queued.outcome, "queued");

    let rendered = server
        .process_render_page(&RenderPageParams {
            session_id: session_id.clone(),
            page: None,
        })
        .await
        .unwrap();
    assert_eq!(rendered.image.unwrap().width, 1200);
    assert_eq!(rendered.placed_from_queue, vec!["sig-1".to_string()]);

    let moved = server
        .process_move_signature(&MoveSignatureParams {
            session_id: session_id.clone(),
            placement_id: "sig-1".to_string(),
            dx: None,
            dy: None,
            x: Some(200.0),
            y: Some(200.0),
        })
        .await
        .unwrap();
    assert_eq!(moved.placement.unwrap().rect.x, 200.0);

    let resized = server
        .process_resize_signature(&ResizeSignatureParams {
            session_id: session_id.clone(),
            placement_id: "sig-1".to_string(),
            width: 10.0,
            height: 100.0,
        })
        .await
        .unwrap();
    let rect = resized.placement.unwrap().rect;
    assert_eq!((rect.width, rect.height), (50.0, 100.0));

    let signed = server
        .process_finalize_session(&FinalizeSessionParams {
            session_id: session_id.clone(),
            delivery: DeliveryParams::default(),
        })
        .await
        .unwrap();
    assert_eq!(signed.session_id.as_deref(), Some(session_id.as_str()));

    // Placed against a 1200x1600 frame of a 600x800 page: halved, then flipped
    let draws = draws_in(signed.pdf_base64.as_deref().unwrap());
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].page_index, 1);
    assert_eq!(
        draws[0].rect,
        DocumentRect {
            x: 100.0,
            y: 650.0,
            width: 25.0,
            height: 50.0
        }
    );

    assert!(server.process_close_session(&session_id).await);
    assert!(matches!(
        server
            .process_list_signatures(&SessionParams { session_id })
            .await,
        Err(Error::SessionNotFound { .. })
    ));
}

#[tokio::test]
async fn test_explicit_rect_placement_and_removal() {
    let server = server_with(FakeEngine::letter(1), None);
    let session_id = server
        .process_open_session(&OpenSessionParams {
            source: pdf_source(),
            password: None,
        })
        .await
        .unwrap()
        .session_id;
    server
        .process_set_signature(&SetSignatureParams {
            session_id: session_id.clone(),
            signature: Some(png_data_url(10, 10)),
        })
        .await
        .unwrap();

    for x in [0.0, 200.0] {
        let placed = server
            .process_place_signature(&PlaceSignatureParams {
                session_id: session_id.clone(),
                x,
                y: 0.0,
                page: Some(1),
                width: Some(20.0),
                height: Some(10.0),
            })
            .await
            .unwrap();
        assert_eq!(placed.outcome, "placed");
    }

    server
        .process_remove_signature(&PlacementRefParams {
            session_id: session_id.clone(),
            placement_id: "sig-1".to_string(),
        })
        .await
        .unwrap();

    let listed = server
        .process_list_signatures(&SessionParams {
            session_id: session_id.clone(),
        })
        .await
        .unwrap();
    assert_eq!(listed.placements.len(), 1);
    assert_eq!(listed.placements[0].id, "sig-2");
    // Resize floor applies to explicit rectangles too
    assert_eq!(listed.placements[0].rect.width, 50.0);

    let missing = server
        .process_remove_signature(&PlacementRefParams {
            session_id,
            placement_id: "sig-1".to_string(),
        })
        .await;
    assert!(matches!(missing, Err(Error::PlacementNotFound { .. })));
}

#[tokio::test]
async fn test_finalize_requires_signature() {
    let server = server_with(FakeEngine::letter(1), None);
    let session_id = server
        .process_open_session(&OpenSessionParams {
            source: pdf_source(),
            password: None,
        })
        .await
        .unwrap()
        .session_id;

    let result = server
        .process_finalize_session(&FinalizeSessionParams {
            session_id,
            delivery: DeliveryParams::default(),
        })
        .await;
    assert!(matches!(result, Err(Error::SignatureRequired { .. })));
}

#[tokio::test]
async fn test_invalid_view_leaves_session_unchanged() {
    let server = server_with(FakeEngine::letter(3), None);
    let session_id = server
        .process_open_session(&OpenSessionParams {
            source: pdf_source(),
            password: None,
        })
        .await
        .unwrap()
        .session_id;

    for page in [0, 4] {
        let result = server
            .process_set_view(&SetViewParams {
                session_id: session_id.clone(),
                page: Some(page),
                zoom: None,
            })
            .await;
        assert!(matches!(result, Err(Error::PageOutOfBounds { .. })));
    }
    let result = server
        .process_set_view(&SetViewParams {
            session_id: session_id.clone(),
            page: Some(2),
            zoom: Some(Zoom::new(0.0, 1.0)),
        })
        .await;
    assert!(matches!(result, Err(Error::InvalidZoom { .. })));

    let view = server
        .process_set_view(&SetViewParams {
            session_id,
            page: None,
            zoom: None,
        })
        .await
        .unwrap();
    assert_eq!(view.current_page, 1);
    assert_eq!(view.zoom, Some(Zoom::default()));
}

#[tokio::test]
async fn test_newer_render_cancels_older() {
    let mut engine = FakeEngine::letter(1);
    engine.render_delay = Duration::from_millis(100);
    let server = server_with(engine, None);
    let session_id = server
        .process_open_session(&OpenSessionParams {
            source: pdf_source(),
            password: None,
        })
        .await
        .unwrap()
        .session_id;

    let params = RenderPageParams {
        session_id,
        page: Some(1),
    };
    let (first, second) = tokio::join!(
        server.process_render_page(&params),
        server.process_render_page(&params),
    );

    assert!(matches!(first, Err(Error::RenderCancelled { page: 1 })));
    assert!(second.unwrap().image.is_some());
}

#[tokio::test]
async fn test_embedded_frame_fallback() {
    let mut engine = FakeEngine::letter(2);
    engine.rasterizable = false;
    let server = server_with(engine, None);

    let opened = server
        .process_open_session(&OpenSessionParams {
            source: pdf_source(),
            password: None,
        })
        .await
        .unwrap();
    assert_eq!(opened.render_strategy, "embedded_frame");
    // Fallback geometry is available right away
    assert_eq!(opened.geometry.as_ref().unwrap().logical_width, 800.0);

    let view = server
        .process_set_view(&SetViewParams {
            session_id: opened.session_id.clone(),
            page: Some(2),
            zoom: Some(Zoom::new(1.5, 1.0)),
        })
        .await
        .unwrap();
    let frame = view.frame.unwrap();
    assert_eq!((frame.width, frame.height), (1200.0, 900.0));
    assert_eq!(frame.src, "#page=2");

    let rendered = server
        .process_render_page(&RenderPageParams {
            session_id: opened.session_id.clone(),
            page: None,
        })
        .await
        .unwrap();
    assert!(rendered.image.is_none());
    assert_eq!(rendered.frame.unwrap().page, 2);

    server
        .process_set_signature(&SetSignatureParams {
            session_id: opened.session_id.clone(),
            signature: Some(png_data_url(10, 10)),
        })
        .await
        .unwrap();
    let placed = server
        .process_place_signature(&PlaceSignatureParams {
            session_id: opened.session_id,
            x: 100.0,
            y: 100.0,
            page: None,
            width: None,
            height: None,
        })
        .await
        .unwrap();
    assert_eq!(placed.outcome, "placed");
}

#[test]
fn test_signature_redraw_changes_identity() {
    let url = png_data_url(4, 4);
    let a = pdf_sign_server::signing::SignatureImage::from_data_url(&url).unwrap();
    let b = pdf_sign_server::signing::SignatureImage::from_data_url(&url).unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(a.bytes(), b.bytes());
}

#[test]
fn test_blocking_composite_with_fake_engine() {
    let engine = FakeEngine::letter(1);
    let output = tokio_test::block_on(async {
        tokio::task::spawn_blocking(move || engine.composite(b"%PDF-1.7", None, &[]))
            .await
            .unwrap()
    })
    .unwrap();
    assert_eq!(output.page_count, 1);
    assert!(output.placed.is_empty());
}
