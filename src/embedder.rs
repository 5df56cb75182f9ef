use std::io::Cursor;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use image::ImageFormat;
use image::imageops::FilterType;
use log::{debug, warn};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

use crate::metrics;
use crate::similarity::l2_normalize;
use crate::store::EmbeddedProduct;

/// A product image to embed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    pub id: i64,
    pub url: String,
}

/// Turns product images into fixed-size vectors
pub trait Embedder {
    /// Embeds one image. Fails on download, decode or inference errors.
    fn embed_one(
        &self,
        url: &str,
        size: (u32, u32),
    ) -> impl Future<Output = Result<Vec<f32>>> + Send;

    /// Embeds every image in order, one at a time.
    ///
    /// A failing item is logged and dropped, the rest of the batch goes on.
    fn embed_batch(
        &self,
        items: Vec<ImageSource>,
        size: (u32, u32),
    ) -> impl Future<Output = Vec<EmbeddedProduct>> + Send
    where
        Self: Sync,
    {
        async move {
            let mut output = Vec::with_capacity(items.len());
            for item in items {
                let result = self.embed_one(&item.url, size).await;
                metrics::inc_embed(result.is_ok());
                match result {
                    Ok(vector) => output.push(EmbeddedProduct { id: item.id, vector }),
                    Err(e) => warn!("failed to embed product {} ({}): {e:#}", item.id, item.url),
                }
            }
            output
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Embedder backed by an HTTP inference endpoint.
///
/// The image is downloaded and resized here, then posted as PNG to the
/// endpoint, which answers with `{"embedding": [...]}`. Vectors are returned
/// with unit length.
#[derive(Clone)]
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into();
        ensure!(!endpoint.trim().is_empty(), "missing embedder endpoint");
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build embedder HTTP client")?;
        Ok(Self { client, endpoint })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

impl Embedder for HttpEmbedder {
    async fn embed_one(&self, url: &str, size: (u32, u32)) -> Result<Vec<f32>> {
        let bytes = self.download(url).await.context("failed to download image")?;
        let png = preprocess(&bytes, size)?;
        debug!("embedding {url} ({} bytes)", png.len());

        let response: EmbeddingResponse = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "image/png")
            .body(png)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("invalid embedder response")?;

        let mut vector = response.embedding;
        l2_normalize(&mut vector).context("embedder returned an unusable vector")?;
        Ok(vector)
    }
}

/// Decodes an image, resizes it to exactly `size` and encodes it as RGB PNG
pub fn preprocess(bytes: &[u8], (width, height): (u32, u32)) -> Result<Vec<u8>> {
    ensure!(width > 0 && height > 0, "invalid resize dimensions {width}x{height}");
    let img = image::load_from_memory(bytes).context("failed to decode image")?;
    let img = img.resize_exact(width, height, FilterType::Triangle).to_rgb8();
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use image::{GenericImageView, Rgb, RgbImage};
    use rstest::*;

    use super::*;

    /// Fails every url containing `broken`
    struct FakeEmbedder;

    impl Embedder for FakeEmbedder {
        async fn embed_one(&self, url: &str, _size: (u32, u32)) -> Result<Vec<f32>> {
            ensure!(!url.contains("broken"), "404 Not Found");
            Ok(vec![url.len() as f32, 1.])
        }
    }

    fn source(id: i64, url: &str) -> ImageSource {
        ImageSource { id, url: url.to_owned() }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 128]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[rstest]
    #[tokio::test]
    async fn test_embed_batch_skips_failures() {
        let items = vec![
            source(1, "https://cdn/a.jpg"),
            source(2, "https://cdn/broken.jpg"),
            source(3, "https://cdn/ccc.jpg"),
        ];
        let output = FakeEmbedder.embed_batch(items, (224, 224)).await;
        assert_eq!(output.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(output[1].vector, vec!["https://cdn/ccc.jpg".len() as f32, 1.]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_embed_batch_all_failing() {
        let output = FakeEmbedder.embed_batch(vec![source(1, "broken")], (224, 224)).await;
        assert!(output.is_empty());
    }

    #[rstest]
    #[case((4, 4))]
    #[case((224, 224))]
    #[case((16, 8))]
    fn test_preprocess_resizes(#[case] size: (u32, u32)) {
        let png = preprocess(&png_bytes(40, 30), size).unwrap();
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!(img.dimensions(), size);
    }

    #[rstest]
    fn test_preprocess_rejects_garbage() {
        assert!(preprocess(b"not an image", (4, 4)).is_err());
        assert!(preprocess(&png_bytes(4, 4), (0, 4)).is_err());
    }

    #[rstest]
    fn test_new_requires_endpoint() {
        assert!(HttpEmbedder::new(" ", Duration::from_secs(1)).is_err());
    }
}
