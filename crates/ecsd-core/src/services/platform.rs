use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    ImageDetail, ImageRef, RegisterTaskDefinition, Service, ServiceUpdate, TaskDefinition,
    TaskStatus,
};

/// The task-orchestration calls the deployer depends on.
#[async_trait]
pub trait ContainerPlatform: Send + Sync {
    /// Latest active revision of a family (or the exact revision when one is given).
    /// Fails with `NotFound` when nothing is registered.
    async fn describe_task_definition(&self, family: &str) -> Result<TaskDefinition>;

    async fn register_task_definition(
        &self,
        input: &RegisterTaskDefinition,
    ) -> Result<TaskDefinition>;

    /// Fails with `NotFound` or `MultipleMatch` unless exactly one service matches.
    async fn describe_service(&self, cluster: Option<&str>, service: &str) -> Result<Service>;

    async fn update_service(&self, update: &ServiceUpdate) -> Result<Service>;

    async fn list_running_tasks(&self, cluster: Option<&str>, service: &str)
        -> Result<Vec<String>>;

    async fn describe_tasks(
        &self,
        cluster: Option<&str>,
        task_arns: &[String],
    ) -> Result<Vec<TaskStatus>>;
}

/// Image registry lookups.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Fails with `NotFound` when the requested image does not exist yet.
    async fn describe_images(&self, image: &ImageRef) -> Result<Vec<ImageDetail>>;
}
