use serde::Serialize;

/// Product row as read from the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: i64,
    /// Stored image key, resolved to a URL by [`crate::ImageResolver`]
    pub image: Option<String>,
    /// Sale state, e.g. `SALE`
    pub status: Option<String>,
    pub primary_category_id: Option<i64>,
    pub secondary_category_id: Option<i64>,
}

/// A product id and its image embedding
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedProduct {
    pub id: i64,
    pub vector: Vec<f32>,
}

/// A candidate returned by a nearest-neighbor query
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub id: i64,
    /// Cosine distance, smaller is more similar
    pub distance: f64,
}
