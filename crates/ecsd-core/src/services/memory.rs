//! In-memory platform backend for tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{DeployError, Result};
use crate::models::service::HEALTHY;
use crate::models::{
    ContainerSpec, ImageDetail, ImageRef, RegisterTaskDefinition, Service, ServiceSpec,
    ServiceUpdate, TaskDefinition, TaskDefinitionRef, TaskStatus,
};
use crate::services::platform::{ContainerPlatform, ImageRegistry};

const REGION: &str = "us-east-1";
const ACCOUNT: &str = "123456789012";
const DEFAULT_CLUSTER: &str = "default";

#[derive(Default)]
struct State {
    /// Revisions per family, oldest first.
    task_definitions: BTreeMap<String, Vec<TaskDefinition>>,
    services: BTreeMap<String, Service>,
    tasks: BTreeMap<String, Vec<TaskStatus>>,
    images: Vec<ImageDetail>,
    registrations: Vec<RegisterTaskDefinition>,
    service_updates: Vec<ServiceUpdate>,
    rollout_health: Option<String>,
    task_listing_error: Option<String>,
    stalled_rollout: Option<StalledRollout>,
    next_task: u64,
}

#[derive(Clone, Copy)]
struct StalledRollout {
    started: i64,
    keep_previous: bool,
}

/// A platform that keeps every resource in memory.
///
/// Service updates roll out instantly: the running tasks are replaced by
/// `desiredCount` tasks on the new revision, unless the rollout was stalled
/// with [`MemoryPlatform::stall_rollout`].
#[derive(Default)]
pub struct MemoryPlatform {
    state: RwLock<State>,
}

fn task_definition_arn(family: &str, revision: u32) -> String {
    format!("arn:aws:ecs:{REGION}:{ACCOUNT}:task-definition/{family}:{revision}")
}

fn service_key(cluster: Option<&str>, service: &str) -> String {
    format!("{}/{service}", cluster.unwrap_or(DEFAULT_CLUSTER))
}

impl State {
    fn replace_tasks(&mut self, key: &str, task_definition_arn: &str, count: i64) {
        let tasks = self.start_tasks(task_definition_arn, count);
        self.tasks.insert(key.to_string(), tasks);
    }

    fn roll_out(&mut self, key: &str, task_definition_arn: &str, desired_count: i64) {
        let Some(stall) = self.stalled_rollout else {
            self.replace_tasks(key, task_definition_arn, desired_count);
            return;
        };
        let started = self.start_tasks(task_definition_arn, stall.started);
        let tasks = self.tasks.entry(key.to_string()).or_default();
        if !stall.keep_previous {
            tasks.clear();
        }
        tasks.extend(started);
    }

    fn start_tasks(&mut self, task_definition_arn: &str, count: i64) -> Vec<TaskStatus> {
        let health = self
            .rollout_health
            .clone()
            .unwrap_or_else(|| HEALTHY.to_string());
        let mut tasks = Vec::new();
        for _ in 0..count.max(0) {
            self.next_task += 1;
            tasks.push(TaskStatus {
                task_arn: format!("arn:aws:ecs:{REGION}:{ACCOUNT}:task/{}", self.next_task),
                task_definition_arn: task_definition_arn.to_string(),
                health_status: health.clone(),
                last_status: Some("RUNNING".into()),
            });
        }
        tasks
    }
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a first revision of `family` with the given containers.
    pub async fn seed_task_definition(
        &self,
        family: &str,
        containers: Vec<ContainerSpec>,
    ) -> TaskDefinition {
        let request = RegisterTaskDefinition {
            family: family.to_string(),
            container_definitions: containers,
            task_role_arn: None,
            execution_role_arn: None,
            network_mode: None,
            volumes: None,
            requires_compatibilities: None,
            cpu: None,
            memory: crate::models::task::DEFAULT_TASK_MEMORY.to_string(),
            ipc_mode: None,
            pid_mode: None,
            placement_constraints: None,
            proxy_configuration: None,
            tags: None,
        };
        self.register(&request).await
    }

    /// Create a service running `desired_count` healthy tasks of
    /// `family_revision`.
    pub async fn seed_service(
        &self,
        cluster: Option<&str>,
        service: &str,
        family_revision: &str,
        desired_count: i64,
    ) -> Service {
        let task_definition = match family_revision.parse::<TaskDefinitionRef>() {
            Ok(TaskDefinitionRef::Revision { family, revision }) => {
                task_definition_arn(&family, revision)
            }
            _ => family_revision.to_string(),
        };
        let cluster_name = cluster.unwrap_or(DEFAULT_CLUSTER);
        let live = Service {
            service_name: service.to_string(),
            service_arn: format!("arn:aws:ecs:{REGION}:{ACCOUNT}:service/{cluster_name}/{service}"),
            cluster_arn: format!("arn:aws:ecs:{REGION}:{ACCOUNT}:cluster/{cluster_name}"),
            task_definition: task_definition.clone(),
            desired_count,
            running_count: desired_count,
            status: Some("ACTIVE".into()),
            ..Default::default()
        };

        let key = service_key(cluster, service);
        let mut state = self.state.write().await;
        state.services.insert(key.clone(), live.clone());
        state.replace_tasks(&key, &task_definition, desired_count);
        live
    }

    pub async fn push_image(&self, detail: ImageDetail) {
        self.state.write().await.images.push(detail);
    }

    /// Health status reported by tasks started from now on.
    pub async fn set_rollout_health(&self, health: &str) {
        self.state.write().await.rollout_health = Some(health.to_string());
    }

    /// Start only `started` tasks on each new revision, optionally leaving
    /// the previous tasks running next to them.
    pub async fn stall_rollout(&self, started: i64, keep_previous: bool) {
        self.state.write().await.stalled_rollout = Some(StalledRollout {
            started,
            keep_previous,
        });
    }

    /// Make every task listing fail with the given error code.
    pub async fn fail_task_listing(&self, code: &str) {
        self.state.write().await.task_listing_error = Some(code.to_string());
    }

    pub async fn registrations(&self) -> Vec<RegisterTaskDefinition> {
        self.state.read().await.registrations.clone()
    }

    pub async fn service_updates(&self) -> Vec<ServiceUpdate> {
        self.state.read().await.service_updates.clone()
    }

    async fn register(&self, input: &RegisterTaskDefinition) -> TaskDefinition {
        let mut state = self.state.write().await;
        state.registrations.push(input.clone());
        let revisions = state
            .task_definitions
            .entry(input.family.clone())
            .or_default();
        let revision = revisions.len() as u32 + 1;
        let registered = TaskDefinition {
            task_definition_arn: task_definition_arn(&input.family, revision),
            family: input.family.clone(),
            revision,
            status: Some("ACTIVE".into()),
            container_definitions: input.container_definitions.clone(),
            task_role_arn: input.task_role_arn.clone(),
            execution_role_arn: input.execution_role_arn.clone(),
            network_mode: input.network_mode.clone(),
            volumes: input.volumes.clone(),
            requires_compatibilities: input.requires_compatibilities.clone(),
            cpu: input.cpu.clone(),
            memory: Some(input.memory.clone()),
            ipc_mode: input.ipc_mode.clone(),
            pid_mode: input.pid_mode.clone(),
            placement_constraints: input.placement_constraints.clone(),
            proxy_configuration: input.proxy_configuration.clone(),
            tags: input.tags.clone(),
        };
        revisions.push(registered.clone());
        registered
    }
}

#[async_trait]
impl ContainerPlatform for MemoryPlatform {
    async fn describe_task_definition(&self, family: &str) -> Result<TaskDefinition> {
        let reference: TaskDefinitionRef = family.parse()?;
        let state = self.state.read().await;
        let revisions = state.task_definitions.get(reference.family());
        let found = match reference.revision() {
            Some(revision) => revisions.and_then(|r| r.iter().find(|d| d.revision == revision)),
            None => revisions.and_then(|r| r.last()),
        };
        found
            .cloned()
            .ok_or_else(|| DeployError::NotFound(format!("task definition {family}")))
    }

    async fn register_task_definition(
        &self,
        input: &RegisterTaskDefinition,
    ) -> Result<TaskDefinition> {
        Ok(self.register(input).await)
    }

    async fn describe_service(&self, cluster: Option<&str>, service: &str) -> Result<Service> {
        let state = self.state.read().await;
        state
            .services
            .get(&service_key(cluster, service))
            .cloned()
            .ok_or_else(|| {
                DeployError::NotFound(format!(
                    "service {}",
                    ServiceSpec::named(cluster, service).target()
                ))
            })
    }

    async fn update_service(&self, update: &ServiceUpdate) -> Result<Service> {
        let key = service_key(update.cluster.as_deref(), &update.service);
        let mut state = self.state.write().await;
        state.service_updates.push(update.clone());

        let live = state
            .services
            .get_mut(&key)
            .ok_or_else(|| DeployError::NotFound(format!("service {key}")))?;
        live.task_definition = update.task_definition.clone();
        live.desired_count = update.desired_count;
        live.running_count = update.desired_count;
        if update.platform_version.is_some() {
            live.platform_version = update.platform_version.clone();
        }
        if update.network_configuration.is_some() {
            live.network_configuration = update.network_configuration.clone();
        }
        if update.deployment_configuration.is_some() {
            live.deployment_configuration = update.deployment_configuration.clone();
        }
        if update.health_check_grace_period_seconds.is_some() {
            live.health_check_grace_period_seconds = update.health_check_grace_period_seconds;
        }
        let updated = live.clone();

        state.roll_out(&key, &update.task_definition, update.desired_count);
        Ok(updated)
    }

    async fn list_running_tasks(&self, cluster: Option<&str>, service: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        if let Some(code) = &state.task_listing_error {
            return Err(DeployError::Platform(format!(
                "An error occurred ({code}) when calling the ListTasks operation"
            )));
        }
        Ok(state
            .tasks
            .get(&service_key(cluster, service))
            .map(|tasks| tasks.iter().map(|t| t.task_arn.clone()).collect())
            .unwrap_or_default())
    }

    async fn describe_tasks(
        &self,
        _cluster: Option<&str>,
        task_arns: &[String],
    ) -> Result<Vec<TaskStatus>> {
        let state = self.state.read().await;
        Ok(state
            .tasks
            .values()
            .flatten()
            .filter(|t| task_arns.contains(&t.task_arn))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ImageRegistry for MemoryPlatform {
    async fn describe_images(&self, image: &ImageRef) -> Result<Vec<ImageDetail>> {
        let state = self.state.read().await;
        let found: Vec<ImageDetail> = state
            .images
            .iter()
            .filter(|d| d.repository_name == image.repository_name)
            .filter(|d| match &image.image_tags {
                Some(tags) => tags.iter().any(|t| d.image_tags.contains(t)),
                None => true,
            })
            .filter(|d| match &image.image_digest {
                Some(digest) => &d.image_digest == digest,
                None => true,
            })
            .cloned()
            .collect();
        if found.is_empty() {
            return Err(DeployError::NotFound(format!("image {}", image.docker_tag())));
        }
        Ok(found)
    }
}
