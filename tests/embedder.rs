use std::io::Cursor;
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};
use mockito::{Matcher, Server};
use prodsim::embedder::{Embedder, HttpEmbedder, ImageSource};
use prodsim::metrics;
use rstest::*;

fn png_bytes() -> Vec<u8> {
    let img = RgbImage::from_fn(32, 24, |x, y| Rgb([x as u8 * 8, y as u8 * 8, 64]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

#[rstest]
#[tokio::test]
async fn embed_batch_drops_failed_download() {
    let mut server = Server::new_async().await;
    for name in ["a", "c"] {
        server
            .mock("GET", format!("/img/{name}.png").as_str())
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(png_bytes())
            .create_async()
            .await;
    }
    server.mock("GET", "/img/b.png").with_status(404).create_async().await;
    let inference = server
        .mock("POST", "/embed")
        .match_header("content-type", "image/png")
        .with_status(200)
        .with_body(r#"{"embedding": [3.0, 4.0]}"#)
        .expect(2)
        .create_async()
        .await;

    let embedder = HttpEmbedder::new(format!("{}/embed", server.url()), Duration::from_secs(5)).unwrap();
    let items = ["a", "b", "c"]
        .into_iter()
        .zip(1..)
        .map(|(name, id)| ImageSource { id, url: format!("{}/img/{name}.png", server.url()) })
        .collect();

    let (ok_before, failed_before) = (metrics::embed_count(true), metrics::embed_count(false));
    let output = embedder.embed_batch(items, (8, 8)).await;

    // the 2nd download is counted as a failure, the others as successes
    assert_eq!(metrics::embed_count(false) - failed_before, 1);
    assert_eq!(metrics::embed_count(true) - ok_before, 2);

    assert_eq!(output.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 3]);
    for item in &output {
        assert!((item.vector[0] - 0.6).abs() < 1e-6);
        assert!((item.vector[1] - 0.8).abs() < 1e-6);
    }
    inference.assert_async().await;
}

#[rstest]
#[case(r#"{"embedding": []}"#)]
#[case(r#"{"embedding": [0.0, 0.0]}"#)]
#[case(r#"{"vector": [1.0]}"#)]
#[case("not json")]
#[tokio::test]
async fn embed_one_rejects_bad_response(#[case] body: &str) {
    let mut server = Server::new_async().await;
    server.mock("GET", "/img.png").with_body(png_bytes()).create_async().await;
    server.mock("POST", "/embed").with_body(body).create_async().await;

    let embedder = HttpEmbedder::new(format!("{}/embed", server.url()), Duration::from_secs(5)).unwrap();
    let result = embedder.embed_one(&format!("{}/img.png", server.url()), (8, 8)).await;
    assert!(result.is_err());
}

#[rstest]
#[tokio::test]
async fn embed_one_sends_resized_png() {
    let mut server = Server::new_async().await;
    server.mock("GET", "/img.png").with_body(png_bytes()).create_async().await;
    let inference = server
        .mock("POST", "/embed")
        .match_header("content-type", "image/png")
        .match_body(Matcher::Any)
        .with_body(r#"{"embedding": [1.0, 0.0, 0.0]}"#)
        .create_async()
        .await;

    let embedder = HttpEmbedder::new(format!("{}/embed", server.url()), Duration::from_secs(5)).unwrap();
    let vector = embedder.embed_one(&format!("{}/img.png", server.url()), (16, 16)).await.unwrap();
    assert_eq!(vector, vec![1.0, 0.0, 0.0]);
    inference.assert_async().await;
}

#[rstest]
#[tokio::test]
async fn embed_one_server_error() {
    let mut server = Server::new_async().await;
    server.mock("GET", "/img.png").with_body(png_bytes()).create_async().await;
    server.mock("POST", "/embed").with_status(500).create_async().await;

    let embedder = HttpEmbedder::new(format!("{}/embed", server.url()), Duration::from_secs(5)).unwrap();
    assert!(embedder.embed_one(&format!("{}/img.png", server.url()), (8, 8)).await.is_err());
}
