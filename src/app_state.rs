use std::sync::Arc;

use crate::db::JobStore;
use crate::services::{generation::ImageGenerator, image_ref::ImageResolver, rate_limit::RateLimiter};
use crate::tryout::submission::{ClothingImageSource, SubmissionHandler};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub submissions: Arc<SubmissionHandler>,
    pub extractor: Arc<dyn ClothingImageSource>,
    pub resolver: ImageResolver,
    /// `None` when no model credentials are configured.
    pub generator: Option<Arc<dyn ImageGenerator>>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub voice_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobStore>,
        extractor: Arc<dyn ClothingImageSource>,
        generator: Option<Arc<dyn ImageGenerator>>,
        rate_limiter: Arc<dyn RateLimiter>,
        voice_secret: Option<String>,
    ) -> Self {
        let submissions = Arc::new(SubmissionHandler::new(store.clone(), extractor.clone()));
        Self {
            store,
            submissions,
            extractor,
            resolver: ImageResolver::default(),
            generator,
            rate_limiter,
            voice_secret: voice_secret.filter(|s| !s.is_empty()).map(Arc::from),
        }
    }
}
