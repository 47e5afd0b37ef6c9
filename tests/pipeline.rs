//! End-to-end tests: real `CanvasClient` against a mock Canvas instance,
//! real image download, fake rasteriser and converter.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use canvas_tables::{
    CanvasClient, CourseOutcome, DocumentConverter, HarvestConfig, HarvestError, Harvester,
    Rasterizer,
};
use mockito::{Matcher, Mock, ServerGuard};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

/// `RUST_LOG=canvas_tables=debug cargo test --test pipeline` shows the pipeline logs.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Fakes ────────────────────────────────────────────────────────────────────

struct UnusedRasterizer;

#[async_trait]
impl Rasterizer for UnusedRasterizer {
    async fn rasterize(&self, _svg: &Path, _png: &Path) -> Result<(), HarvestError> {
        Err(HarvestError::Internal("no SVG in this fixture".into()))
    }
}

/// Copies the intermediate HTML to the output path so tests can inspect it.
struct CopyConverter;

#[async_trait]
impl DocumentConverter for CopyConverter {
    async fn convert(&self, html: &Path, output: &Path) -> Result<(), HarvestError> {
        tokio::fs::copy(html, output)
            .await
            .map(|_| ())
            .map_err(|e| HarvestError::Conversion {
                output: output.to_path_buf(),
                detail: e.to_string(),
            })
    }
}

// ── Fixture ──────────────────────────────────────────────────────────────────

async fn json_mock(server: &mut ServerGuard, path: &str, body: serde_json::Value) -> Mock {
    server
        .mock("GET", path)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await
}

/// Course 42: one week page whose continuation page holds the second table,
/// its note and a remote image.
async fn mount_course(server: &mut ServerGuard) -> Vec<Mock> {
    let base = server.url();
    let week_1 = format!(
        "<link rel=\"stylesheet\" href=\"/theme.css\">\
         <h2>Semana 1</h2>\
         <table><tbody><tr><td>Tabla A</td></tr></tbody></table>\
         <p>Texto entre tablas.</p>\
         <p><a data-api-returntype=\"Page\" data-api-endpoint=\"{base}/api/v1/courses/42/pages/semana-1-continuacion\">Continuar</a></p>\
         <p><a data-api-returntype=\"Page\" data-api-endpoint=\"{base}/api/v1/courses/42/pages/semana-2\">Ir a la Semana 2</a></p>"
    );
    let continuation = format!(
        "<table><thead><tr><th>Año</th></tr></thead><tbody><tr><td>Tabla B <img src=\"{base}/files/grafico.png\"></td></tr></tbody></table>\
         <p>&nbsp;</p>\
         <pre style=\"font-size: 8pt;\">Nota. Tomado de INEC (2020).</pre>\
         <script>track()</script>"
    );

    let mut mocks = vec![
        json_mock(
            server,
            "/api/v1/courses/42",
            json!({"id": 42, "name": "Estadística", "sis_course_id": "EST_2024"}),
        )
        .await,
        json_mock(
            server,
            "/api/v1/courses/42/modules",
            json!([
                {"id": 1, "name": "Unidad 1", "items": [
                    {"id": 10, "type": "Page", "title": "Guía didáctica", "page_url": "guia"},
                    {"id": 11, "type": "Page", "title": "Semana 1", "page_url": "semana-1"},
                    {"id": 12, "type": "Assignment", "title": "Semana 1: tarea"}
                ]}
            ]),
        )
        .await,
        json_mock(
            server,
            "/api/v1/courses/42/pages/semana-1",
            json!({"url": "semana-1", "title": "Semana 1", "body": week_1}),
        )
        .await,
        json_mock(
            server,
            "/api/v1/courses/42/pages/semana-1-continuacion",
            json!({"url": "semana-1-continuacion", "title": "Semana 1 (cont.)", "body": continuation}),
        )
        .await,
    ];
    mocks.push(
        server
            .mock("GET", "/files/grafico.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(PNG_MAGIC)
            .create_async()
            .await,
    );
    mocks
}

fn harvester(server_url: &str, dir: &Path) -> Harvester {
    let config = HarvestConfig::builder()
        .base_url(server_url)
        .auth_token("test-token")
        .image_directory(dir.join("imagenes"))
        .output_dir(dir.join("table_results"))
        .intermediate_file(dir.join("tablas.html"))
        .fetch_timeout_secs(5)
        .build()
        .unwrap();
    let canvas = CanvasClient::new(&config).unwrap();
    Harvester::with_collaborators(
        config,
        Arc::new(canvas),
        Arc::new(UnusedRasterizer),
        Arc::new(CopyConverter),
    )
    .unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn course_with_continuation_page_produces_complete_document() {
    init_tracing();
    let mut server = mockito::Server::new_async().await;
    let _mocks = mount_course(&mut server).await;
    let dir = tempfile::tempdir().unwrap();

    let out = harvester(&server.url(), dir.path())
        .harvest_course(42)
        .await
        .unwrap();

    assert_eq!(
        out.output_path,
        dir.path().join("table_results").join("EST_2024_tablas.docx")
    );
    assert_eq!(out.stats.pages, 1);
    assert_eq!(out.stats.tables, 2);
    assert_eq!(out.stats.notes, 1);
    assert_eq!(out.stats.images_localised, 1);
    assert!(out.image_failures.is_empty());

    let html = std::fs::read_to_string(&out.output_path).unwrap();

    // Both tables, in order, with the note only after the second.
    let a = html.find("Tabla A").expect("first table");
    let b = html.find("Tabla B").expect("second table");
    let note = html.find("<p>Nota. Tomado de INEC (2020).</p>").expect("note as paragraph");
    assert!(a < b && b < note, "got: {html}");
    assert_eq!(html.matches("<p>").count(), 1, "only the note survives extraction: {html}");
    assert!(!html.contains("Texto entre tablas"));
    assert!(!html.contains("<pre"));
    assert!(!html.contains("<script"));

    // Presentation applied.
    assert_eq!(html.matches("border=\"1\"").count(), 2);
    assert!(html.contains("<th><strong>Año</strong></th>"), "got: {html}");

    // Image localised to a file that exists.
    let image = dir.path().join("imagenes").join("imagen_externa_0.png");
    assert!(image.exists());
    assert_eq!(std::fs::read(&image).unwrap(), PNG_MAGIC);
    assert!(html.contains(&format!("src=\"{}\"", image.display())), "got: {html}");
    assert!(!html.contains("/files/grafico.png"));
}

#[tokio::test]
async fn broken_continuation_fails_only_that_course() {
    init_tracing();
    let mut server = mockito::Server::new_async().await;
    let _mocks = mount_course(&mut server).await;
    let base = server.url();

    let broken = format!(
        "<table><tbody><tr><td>x</td></tr></tbody></table>\
         <p><a data-api-returntype=\"Page\" data-api-endpoint=\"{base}/api/v1/courses/7/pages/borrada\">Continuar</a></p>"
    );
    let _course = json_mock(&mut server, "/api/v1/courses/7", json!({"id": 7, "name": "Roto"})).await;
    let _modules = json_mock(
        &mut server,
        "/api/v1/courses/7/modules",
        json!([{"id": 1, "items": [{"type": "Page", "title": "Week 1", "page_url": "week-1"}]}]),
    )
    .await;
    let _page = json_mock(
        &mut server,
        "/api/v1/courses/7/pages/week-1",
        json!({"url": "week-1", "body": broken}),
    )
    .await;
    let _gone = server
        .mock("GET", "/api/v1/courses/7/pages/borrada")
        .with_status(404)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    // The mock server's address contains digits, so locators use a fixed host.
    let locators = vec![
        "https://utpl.instructure.com/courses/7".to_string(),
        "https://utpl.instructure.com/courses/42/modules".to_string(),
    ];
    let report = harvester(&base, dir.path()).harvest_batch(&locators).await;

    assert_eq!(report.total(), 2);
    assert_eq!(report.succeeded(), 1);
    match &report.courses[0].outcome {
        CourseOutcome::Failed { error } => {
            assert!(error.contains("Failed to resolve"), "got: {error}");
        }
        other => panic!("course 7 should fail, got {other:?}"),
    }
    assert!(matches!(report.courses[1].outcome, CourseOutcome::Succeeded(_)));
    assert!(!dir.path().join("table_results/7_tablas.docx").exists());
    assert!(dir.path().join("table_results/EST_2024_tablas.docx").exists());
}
