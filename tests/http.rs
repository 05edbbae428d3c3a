//! End-to-end tests against a live server on a loopback port.
//!
//! Each test binds its own server on `127.0.0.1:0` and talks to it with
//! reqwest multipart forms, the way the browser client does.
//!
//! Run with: cargo test --test http

use image::{DynamicImage, ImageFormat, RgbImage};
use imgforge::config::ServiceConfig;
use imgforge::dispatch::Dispatcher;
use imgforge::imaging::RustBackend;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use std::io::Cursor;
use std::sync::Arc;
use tokio::net::TcpListener;

const ORIGIN: &str = "http://localhost:3000";

async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ServiceConfig::default();
    let dispatcher = Arc::new(Dispatcher::new(RustBackend::new()));
    tokio::spawn(async move {
        imgforge::server::serve_on(listener, dispatcher, &config)
            .await
            .unwrap();
    });
    format!("http://{addr}")
}

fn sample(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 2) as u8, (y * 2) as u8, ((x + y) % 256) as u8])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), format)
        .unwrap();
    out
}

fn image_part(data: Vec<u8>, name: &str, mime: &str) -> Part {
    Part::bytes(data).file_name(name.to_string()).mime_str(mime).unwrap()
}

fn jpeg_form(width: u32, height: u32) -> Form {
    Form::new().part(
        "image",
        image_part(sample(width, height, ImageFormat::Jpeg), "photo.jpg", "image/jpeg"),
    )
}

async fn post(base: &str, route: &str, form: Form) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{base}{route}"))
        .multipart(form)
        .send()
        .await
        .unwrap()
}

async fn error_message(response: reqwest::Response) -> String {
    let body: serde_json::Value = response.json().await.unwrap();
    body["error"].as_str().unwrap_or_default().to_string()
}

fn content_type(response: &reqwest::Response) -> String {
    response.headers()[reqwest::header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn health_probe() {
    let base = spawn_server().await;
    let response = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn resize_jpeg_to_50x50() {
    let base = spawn_server().await;
    let form = jpeg_form(100, 100)
        .text("width", "50")
        .text("height", "50")
        .text("fit", "fill");
    let response = post(&base, "/resize", form).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "image/jpeg");
    let bytes = response.bytes().await.unwrap();
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (50, 50));
}

#[tokio::test]
async fn modulate_changes_pixels_not_size() {
    let base = spawn_server().await;
    let input = sample(40, 30, ImageFormat::Jpeg);
    let form = Form::new()
        .part("image", image_part(input.clone(), "photo.jpg", "image/jpeg"))
        .text("effect", "modulate")
        .text("brightness", "1.5")
        .text("saturation", "0.5")
        .text("hue", "90");
    let response = post(&base, "/effects", form).await;

    assert_eq!(response.status(), StatusCode::OK);
    let output = image::load_from_memory(&response.bytes().await.unwrap()).unwrap();
    let original = image::load_from_memory(&input).unwrap();
    assert_eq!(output.width(), 40);
    assert_eq!(output.height(), 30);
    assert_ne!(output.to_rgb8().as_raw(), original.to_rgb8().as_raw());
}

#[tokio::test]
async fn convert_without_file() {
    let base = spawn_server().await;
    let response = post(&base, "/convert", Form::new().text("format", "png")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "error": "No image file provided" }));
}

#[tokio::test]
async fn non_multipart_bodies_get_json_errors() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let empty = client.post(format!("{base}/convert")).send().await.unwrap();
    let urlencoded = client
        .post(format!("{base}/convert"))
        .header(
            reqwest::header::CONTENT_TYPE,
            "application/x-www-form-urlencoded",
        )
        .body("format=png")
        .send()
        .await
        .unwrap();

    for response in [empty, urlencoded] {
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(content_type(&response), "application/json");
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body, serde_json::json!({ "error": "No image file provided" }));
    }

    let composite = client.post(format!("{base}/composite")).send().await.unwrap();
    assert_eq!(composite.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(composite).await, "No base image provided");
}

#[tokio::test]
async fn composite_without_base() {
    let base = spawn_server().await;
    let response = post(&base, "/composite", Form::new()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await, "No base image provided");
}

#[tokio::test]
async fn oversized_upload_rejected() {
    let base = spawn_server().await;
    let six_mib = vec![0xAB; 6 * 1024 * 1024];
    let form = Form::new().part("image", image_part(six_mib, "huge.jpg", "image/jpeg"));
    let response = post(&base, "/optimize", form).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        error_message(response).await,
        "File upload error: File too large"
    );
}

#[tokio::test]
async fn convert_round_trip_through_webp() {
    let base = spawn_server().await;
    let form = jpeg_form(64, 48).text("format", "webp");
    let response = post(&base, "/convert", form).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "image/webp");
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_DISPOSITION],
        "attachment; filename=photo.webp"
    );
    let webp = response.bytes().await.unwrap().to_vec();
    assert_eq!(image::guess_format(&webp).unwrap(), ImageFormat::WebP);

    let form = Form::new()
        .part("image", image_part(webp, "photo.webp", "image/webp"))
        .text("format", "jpeg");
    let response = post(&base, "/convert", form).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "image/jpeg");
    let back = image::load_from_memory(&response.bytes().await.unwrap()).unwrap();
    assert_eq!((back.width(), back.height()), (64, 48));
}

#[tokio::test]
async fn convert_jpg_uses_canonical_mime() {
    let base = spawn_server().await;
    let form = Form::new()
        .part(
            "image",
            image_part(sample(8, 8, ImageFormat::Png), "icon.png", "image/png"),
        )
        .text("format", "jpg");
    let response = post(&base, "/convert", form).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "image/jpeg");
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_DISPOSITION],
        "attachment; filename=icon.jpg"
    );
}

#[tokio::test]
async fn unsupported_convert_target() {
    let base = spawn_server().await;
    let response = post(&base, "/convert", jpeg_form(10, 10).text("format", "tiff")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await, "Unsupported format: tiff");
}

#[tokio::test]
async fn unknown_effect() {
    let base = spawn_server().await;
    let response = post(&base, "/effects", jpeg_form(10, 10).text("effect", "sparkle")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await, "Invalid effect specified");
}

#[tokio::test]
async fn optimize_is_idempotent() {
    let base = spawn_server().await;
    let first = post(&base, "/optimize", jpeg_form(30, 20)).await;
    assert_eq!(first.status(), StatusCode::OK);
    let once = first.bytes().await.unwrap().to_vec();

    let form = Form::new().part("image", image_part(once.clone(), "once.jpg", "image/jpeg"));
    let second = post(&base, "/optimize", form).await;
    assert_eq!(second.status(), StatusCode::OK);
    let twice = second.bytes().await.unwrap().to_vec();

    for bytes in [&once, &twice] {
        assert_eq!(image::guess_format(bytes).unwrap(), ImageFormat::Jpeg);
        let img = image::load_from_memory(bytes).unwrap();
        assert_eq!((img.width(), img.height()), (30, 20));
    }
}

#[tokio::test]
async fn rotate_quarter_turn_swaps_dimensions() {
    let base = spawn_server().await;
    let form = Form::new()
        .part(
            "image",
            image_part(sample(40, 20, ImageFormat::Png), "wide.png", "image/png"),
        )
        .text("angle", "90");
    let response = post(&base, "/rotate", form).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "image/png");
    let img = image::load_from_memory(&response.bytes().await.unwrap()).unwrap();
    assert_eq!((img.width(), img.height()), (20, 40));
}

#[tokio::test]
async fn composite_with_overlay_keeps_base_size() {
    let base = spawn_server().await;
    let form = jpeg_form(60, 40).part(
        "overlay",
        image_part(sample(10, 10, ImageFormat::Png), "logo.png", "image/png"),
    );
    let response = post(&base, "/composite", form).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "image/jpeg");
    let img = image::load_from_memory(&response.bytes().await.unwrap()).unwrap();
    assert_eq!((img.width(), img.height()), (60, 40));
}

#[tokio::test]
async fn garbage_upload_is_bad_request() {
    let base = spawn_server().await;
    let form = Form::new().part(
        "image",
        image_part(b"not an image at all".to_vec(), "fake.jpg", "image/jpeg"),
    );
    let response = post(&base, "/optimize", form).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(error_message(response).await.starts_with("Invalid image"));
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let base = spawn_server().await;
    let response = post(&base, "/sharpen", jpeg_form(4, 4)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_message(response).await, "Not found");
}

#[tokio::test]
async fn cors_preflight_and_headers() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    let preflight = client
        .request(reqwest::Method::OPTIONS, format!("{base}/resize"))
        .header("Origin", ORIGIN)
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .unwrap();
    assert_eq!(preflight.status(), StatusCode::NO_CONTENT);
    let headers = preflight.headers();
    assert_eq!(headers["access-control-allow-origin"], ORIGIN);
    assert_eq!(headers["access-control-allow-methods"], "POST");
    assert_eq!(headers["access-control-allow-headers"], "Content-Type");

    let response = post(&base, "/optimize", jpeg_form(4, 4)).await;
    assert_eq!(response.headers()["access-control-allow-origin"], ORIGIN);
}
