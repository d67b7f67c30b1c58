use std::sync::Arc;

use crate::error::{DeployError, Result};
use crate::models::{ImageDetail, ImageRef};
use crate::services::platform::ImageRegistry;
use crate::services::poller::{self, Convergence, PollSettings, ProbeOutcome};
use crate::services::validation;

/// Looks up images in the registry and waits for pushes to land.
pub struct ImageChecker {
    registry: Arc<dyn ImageRegistry>,
}

impl ImageChecker {
    pub fn new(registry: Arc<dyn ImageRegistry>) -> Self {
        Self { registry }
    }

    /// One lookup, no waiting. Fails with `NotFound` when the image is missing.
    pub async fn find(&self, image: &ImageRef) -> Result<Vec<ImageDetail>> {
        validation::validate_image(image)?;
        let found = self.registry.describe_images(image).await?;
        tracing::info!(image = %image.docker_tag(), matches = found.len(), "found image");
        Ok(found)
    }

    pub async fn wait_for_image(
        &self,
        image: &ImageRef,
        settings: PollSettings,
    ) -> Result<Convergence> {
        validation::validate_image(image)?;
        let registry = self.registry.clone();
        let wanted = image.clone();

        poller::poll_until(&image.docker_tag(), settings, move || {
            probe_image(registry.clone(), wanted.clone())
        })
        .await
    }
}

async fn probe_image(registry: Arc<dyn ImageRegistry>, image: ImageRef) -> Result<ProbeOutcome> {
    match registry.describe_images(&image).await {
        Ok(found) if found.is_empty() => Ok(ProbeOutcome::Pending),
        Ok(_) => Ok(ProbeOutcome::Satisfied),
        Err(DeployError::NotFound(_)) => Ok(ProbeOutcome::Absent),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::MemoryPlatform;
    use std::time::Duration;

    fn backend_v1() -> ImageRef {
        "123456789012.dkr.ecr.us-east-1.amazonaws.com/backend:v1"
            .parse()
            .unwrap()
    }

    fn detail(tag: &str) -> ImageDetail {
        ImageDetail {
            registry_id: "123456789012".into(),
            repository_name: "backend".into(),
            image_digest: format!("sha256:{tag}"),
            image_tags: vec![tag.to_string()],
            image_size_in_bytes: Some(1024),
        }
    }

    #[tokio::test]
    async fn find_requires_repository() {
        let checker = ImageChecker::new(Arc::new(MemoryPlatform::new()));
        let err = checker.find(&ImageRef::default()).await.unwrap_err();
        assert!(matches!(err, DeployError::InvalidSpec(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_until_image_is_pushed() {
        let platform = Arc::new(MemoryPlatform::new());
        let checker = ImageChecker::new(platform.clone());

        let pusher = {
            let platform = platform.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(25)).await;
                platform.push_image(detail("v1")).await;
            })
        };

        let convergence = checker
            .wait_for_image(&backend_v1(), PollSettings::from_secs(10, 60))
            .await
            .unwrap();
        pusher.await.unwrap();

        assert!(convergence.elapsed >= Duration::from_secs(30));
        assert!(convergence.elapsed < Duration::from_secs(40));
        assert_eq!(convergence.probes, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_image_times_out() {
        let platform = Arc::new(MemoryPlatform::new());
        platform.push_image(detail("v0")).await;
        let checker = ImageChecker::new(platform);

        let err = checker
            .wait_for_image(&backend_v1(), PollSettings::from_secs(10, 60))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Timeout { .. }));
    }
}
