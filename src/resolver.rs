/// Turns stored image keys into CDN URLs
#[derive(Debug, Clone, Default)]
pub struct ImageResolver {
    domain: Option<String>,
}

impl ImageResolver {
    pub fn new(domain: Option<String>) -> Self {
        let domain = domain
            .map(|d| d.trim().trim_end_matches('/').to_owned())
            .filter(|d| !d.is_empty());
        Self { domain }
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Returns `https://{domain}/{image}`, or None if either part is missing
    pub fn resolve(&self, image: Option<&str>) -> Option<String> {
        let domain = self.domain.as_deref()?;
        let image = image.map(|s| s.trim().trim_start_matches('/')).filter(|s| !s.is_empty())?;
        Some(format!("https://{domain}/{image}"))
    }
}
