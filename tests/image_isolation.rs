use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use monthly_report::render::{ImageFetcher, RenderImage, RenderRequest};
use monthly_report::{parse_blocks, DocumentRenderer, ImageOutcome, ResourceFetchError};

fn png(width: u32, height: u32) -> Bytes {
    let img = RgbImage::from_pixel(width, height, Rgb([200, 40, 40]));
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    Bytes::from(out)
}

/// Serves a PNG for every URL except `.../broken`, and answers earlier URLs
/// more slowly so completions arrive out of request order.
struct SlowFetcher;

#[async_trait]
impl ImageFetcher for SlowFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, ResourceFetchError> {
        let delay = match url.rsplit('/').next() {
            Some("a") => 60,
            Some("broken") => 30,
            _ => 5,
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if url.ends_with("/broken") {
            return Err(ResourceFetchError::Status {
                url: url.to_string(),
                status: 404,
            });
        }
        Ok(png(40, 30))
    }
}

fn request(urls: &[&str]) -> RenderRequest {
    let mut request = RenderRequest::new("Photos", "2026-06", parse_blocks("See photos."));
    request.images = urls
        .iter()
        .map(|url| RenderImage {
            url: url.to_string(),
            caption: Some(format!("caption for {url}")),
        })
        .collect();
    request
}

#[tokio::test]
async fn one_failed_image_does_not_abort_the_document() {
    let urls = [
        "https://img.example.com/a",
        "https://img.example.com/broken",
        "https://img.example.com/c",
    ];
    let renderer = DocumentRenderer::new(Arc::new(SlowFetcher)).with_fetch_concurrency(3);
    let doc = renderer.render(&request(&urls)).await;

    assert!(!doc.is_empty());
    let outcome_urls: Vec<&str> = doc
        .image_outcomes
        .iter()
        .map(|outcome| match outcome {
            ImageOutcome::Embedded { url } | ImageOutcome::Placeholder { url, .. } => url.as_str(),
        })
        .collect();
    assert_eq!(outcome_urls, urls);

    assert!(doc.image_outcomes[0].is_embedded());
    assert!(doc.image_outcomes[2].is_embedded());
    match &doc.image_outcomes[1] {
        ImageOutcome::Placeholder { error, .. } => {
            assert_eq!(error.url(), "https://img.example.com/broken")
        }
        other => panic!("expected placeholder, got {other:?}"),
    }

    let pdf = String::from_utf8_lossy(&doc.bytes);
    assert_eq!(pdf.matches("/Subtype /Image").count(), 2);
    assert!(pdf.contains("could not load image:"));
    assert!(pdf.contains("(caption for https://img.example.com/c) Tj"));
}

#[tokio::test]
async fn images_are_placed_in_request_order() {
    let urls = ["https://img.example.com/a", "https://img.example.com/b"];
    let renderer = DocumentRenderer::new(Arc::new(SlowFetcher)).with_fetch_concurrency(2);
    let doc = renderer.render(&request(&urls)).await;

    let pdf = String::from_utf8_lossy(&doc.bytes);
    let first = pdf.find("(caption for https://img.example.com/a) Tj").unwrap();
    let second = pdf.find("(caption for https://img.example.com/b) Tj").unwrap();
    assert!(first < second);
}

#[tokio::test]
async fn undecodable_bytes_become_a_placeholder() {
    struct GarbageFetcher;

    #[async_trait]
    impl ImageFetcher for GarbageFetcher {
        async fn fetch(&self, _url: &str) -> Result<Bytes, ResourceFetchError> {
            Ok(Bytes::from_static(b"<html>not an image</html>"))
        }
    }

    let renderer = DocumentRenderer::new(Arc::new(GarbageFetcher));
    let doc = renderer.render(&request(&["https://img.example.com/x"])).await;
    assert_eq!(doc.page_count, 1);
    assert!(matches!(
        &doc.image_outcomes[0],
        ImageOutcome::Placeholder {
            error: ResourceFetchError::Decode { .. },
            ..
        }
    ));
}
