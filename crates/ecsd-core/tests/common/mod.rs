// Each test binary compiles this module independently and uses a different
// subset of helpers, so unused-function warnings are expected.
#![allow(dead_code)]

use std::sync::Arc;

use ecsd_core::models::container::{KeyValuePair, PortMapping};
use ecsd_core::models::{ContainerSpec, ImageDetail, ServiceSpec, TaskSpec};
use ecsd_core::services::MemoryPlatform;

pub const CLUSTER: &str = "prod";
pub const SERVICE: &str = "api";

/// The `web` container as first registered.
pub fn web_v1() -> ContainerSpec {
    ContainerSpec {
        essential: Some(true),
        memory: Some(512),
        environment: Some(vec![KeyValuePair {
            name: "RUST_LOG".into(),
            value: "info".into(),
        }]),
        port_mappings: Some(vec![PortMapping {
            container_port: Some(8080),
            ..Default::default()
        }]),
        ..ContainerSpec::named("web").with_image("web:1")
    }
}

pub fn sidecar_v1() -> ContainerSpec {
    ContainerSpec {
        essential: Some(false),
        ..ContainerSpec::named("sidecar").with_image("envoy:1")
    }
}

/// Platform with `api:1` (web + sidecar) running as `prod/api` with two tasks.
pub async fn seeded_platform() -> Arc<MemoryPlatform> {
    let platform = Arc::new(MemoryPlatform::new());
    platform
        .seed_task_definition("api", vec![web_v1(), sidecar_v1()])
        .await;
    platform
        .seed_service(Some(CLUSTER), SERVICE, "api:1", 2)
        .await;
    platform
}

pub fn service_spec() -> ServiceSpec {
    ServiceSpec::named(Some(CLUSTER), SERVICE)
}

/// Service override that only swaps images of the named containers.
pub fn image_override(images: &[(&str, &str)]) -> ServiceSpec {
    let mut spec = service_spec();
    spec.task_definition = Some(TaskSpec {
        container_definitions: Some(
            images
                .iter()
                .map(|(name, image)| ContainerSpec::named(*name).with_image(*image))
                .collect(),
        ),
        ..Default::default()
    });
    spec
}

pub fn image_detail(repository: &str, tag: &str) -> ImageDetail {
    ImageDetail {
        registry_id: "123456789012".into(),
        repository_name: repository.into(),
        image_digest: format!("sha256:{repository}-{tag}"),
        image_tags: vec![tag.into()],
        image_size_in_bytes: None,
    }
}
