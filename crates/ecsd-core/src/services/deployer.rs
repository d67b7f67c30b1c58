use std::sync::Arc;

use crate::error::{DeployError, Result};
use crate::models::{parse_family, Service, ServiceSpec, TaskDefinition, TaskSpec};
use crate::services::merge::{self, TaskPlan};
use crate::services::platform::ContainerPlatform;
use crate::services::poller::{self, Convergence, PollSettings, ProbeOutcome};
use crate::services::validation;

/// Registers task revisions and rolls services onto them.
pub struct Deployer {
    platform: Arc<dyn ContainerPlatform>,
}

/// What the health probe compares running tasks against.
#[derive(Debug, Clone)]
struct HealthTarget {
    cluster: Option<String>,
    service: String,
    task_definition_arn: String,
    desired_count: i64,
}

impl Deployer {
    pub fn new(platform: Arc<dyn ContainerPlatform>) -> Self {
        Self { platform }
    }

    /// Register a new revision of `spec.family`.
    ///
    /// Unless `overwrite` is set, unset fields are inherited from the latest
    /// registered revision when one exists. Returns the registered revision,
    /// or the existing one when nothing was overridden.
    pub async fn register_task(&self, spec: &TaskSpec) -> Result<TaskDefinition> {
        validation::validate_task(spec)?;

        let existing = if spec.overwrite {
            None
        } else {
            match self.platform.describe_task_definition(&spec.family).await {
                Ok(existing) => Some(existing),
                Err(DeployError::NotFound(_)) => {
                    tracing::info!(
                        family = %spec.family,
                        "no registered revision, registering from scratch"
                    );
                    None
                }
                Err(e) => return Err(e),
            }
        };

        self.apply(spec, existing.as_ref()).await
    }

    /// Like [`Deployer::register_task`], but the family must already exist
    /// and `overwrite` is refused.
    pub async fn update_task(&self, spec: &TaskSpec) -> Result<TaskDefinition> {
        validation::validate_task(spec)?;
        if spec.overwrite {
            return Err(DeployError::InvalidSpec(
                "overwrite is not allowed when updating a task definition".into(),
            ));
        }

        let existing = self.platform.describe_task_definition(&spec.family).await?;
        self.apply(spec, Some(&existing)).await
    }

    async fn apply(
        &self,
        spec: &TaskSpec,
        existing: Option<&TaskDefinition>,
    ) -> Result<TaskDefinition> {
        match merge::plan_task(spec, existing)? {
            TaskPlan::Unchanged(current) => {
                tracing::info!(
                    task_definition = %current.family_revision(),
                    "task definition unchanged, skipping registration"
                );
                Ok(current)
            }
            TaskPlan::Register(request) => {
                let registered = self.platform.register_task_definition(&request).await?;
                tracing::info!(
                    task_definition = %registered.family_revision(),
                    containers = registered.container_definitions.len(),
                    "registered task definition"
                );
                Ok(registered)
            }
        }
    }

    /// Update a service, registering its embedded task override first.
    ///
    /// The task override may name a different family than the one the
    /// service runs; an empty family defaults to the service's current one.
    pub async fn deploy_service(&self, spec: &ServiceSpec) -> Result<Service> {
        validation::validate_service(spec)?;
        let live = self.describe(spec).await?;

        let task_definition_arn = match &spec.task_definition {
            Some(task) => {
                let task = with_default_family(task, &live);
                Some(self.register_task(&task).await?.task_definition_arn)
            }
            None => None,
        };

        self.submit(spec, &live, task_definition_arn).await
    }

    /// Update a service, merging its embedded task override into the
    /// revision the service currently runs.
    ///
    /// Switching families is refused with `ConflictingFamily`.
    pub async fn update_service(&self, spec: &ServiceSpec) -> Result<Service> {
        validation::validate_service(spec)?;
        let live = self.describe(spec).await?;

        let task_definition_arn = match &spec.task_definition {
            Some(task) => {
                if !task.family.is_empty() {
                    let requested = parse_family(&task.family)?;
                    let current = parse_family(&live.task_definition)?;
                    if requested != current {
                        return Err(DeployError::ConflictingFamily { requested, current });
                    }
                }
                let task = with_default_family(task, &live);
                Some(self.update_task(&task).await?.task_definition_arn)
            }
            None => None,
        };

        self.submit(spec, &live, task_definition_arn).await
    }

    async fn describe(&self, spec: &ServiceSpec) -> Result<Service> {
        let live = self
            .platform
            .describe_service(spec.cluster.as_deref(), &spec.service)
            .await?;
        tracing::debug!(
            service = %spec.target(),
            task_definition = %live.task_definition,
            desired_count = live.desired_count,
            running_count = live.running_count,
            "described service"
        );
        Ok(live)
    }

    async fn submit(
        &self,
        spec: &ServiceSpec,
        live: &Service,
        task_definition_arn: Option<String>,
    ) -> Result<Service> {
        let update = merge::resolve_service(spec, live, task_definition_arn.as_deref());
        let updated = self.platform.update_service(&update).await?;
        tracing::info!(
            service = %spec.target(),
            task_definition = %updated.task_definition,
            desired_count = updated.desired_count,
            "updated service"
        );
        Ok(updated)
    }

    /// Wait until `service` runs its desired count of healthy tasks on its
    /// current task definition.
    pub async fn wait_for_rollout(
        &self,
        cluster: Option<&str>,
        service: &Service,
        settings: PollSettings,
    ) -> Result<Convergence> {
        let target = HealthTarget {
            cluster: cluster.map(str::to_string),
            service: service.service_name.clone(),
            task_definition_arn: service.task_definition.clone(),
            desired_count: service.desired_count,
        };
        let label = ServiceSpec::named(cluster, service.service_name.as_str()).target();
        let platform = self.platform.clone();

        poller::poll_until(&label, settings, move || {
            probe_health(platform.clone(), target.clone())
        })
        .await
    }

    /// Update the service and wait for the rollout to converge.
    ///
    /// Failures after the update was submitted come back as `Rollout` or
    /// `Timeout`.
    pub async fn update_service_and_wait(
        &self,
        spec: &ServiceSpec,
        settings: PollSettings,
    ) -> Result<(Service, Convergence)> {
        let updated = self.update_service(spec).await?;
        self.await_rollout(spec, updated, settings).await
    }

    /// [`Deployer::deploy_service`] followed by a rollout wait.
    pub async fn deploy_service_and_wait(
        &self,
        spec: &ServiceSpec,
        settings: PollSettings,
    ) -> Result<(Service, Convergence)> {
        let updated = self.deploy_service(spec).await?;
        self.await_rollout(spec, updated, settings).await
    }

    async fn await_rollout(
        &self,
        spec: &ServiceSpec,
        updated: Service,
        settings: PollSettings,
    ) -> Result<(Service, Convergence)> {
        match self
            .wait_for_rollout(spec.cluster.as_deref(), &updated, settings)
            .await
        {
            Ok(convergence) => Ok((updated, convergence)),
            Err(e @ DeployError::Timeout { .. }) => Err(e),
            Err(e) => Err(DeployError::Rollout {
                target: spec.target(),
                source: Box::new(e),
            }),
        }
    }
}

fn with_default_family(task: &TaskSpec, live: &Service) -> TaskSpec {
    let mut task = task.clone();
    if task.family.is_empty() {
        task.family = live.task_definition.clone();
    }
    task
}

async fn probe_health(
    platform: Arc<dyn ContainerPlatform>,
    target: HealthTarget,
) -> Result<ProbeOutcome> {
    let cluster = target.cluster.as_deref();
    let running = platform.list_running_tasks(cluster, &target.service).await?;
    if running.is_empty() {
        return Ok(if target.desired_count == 0 {
            ProbeOutcome::Satisfied
        } else {
            ProbeOutcome::Absent
        });
    }

    let tasks = platform.describe_tasks(cluster, &running).await?;
    let running_count = tasks.len() as i64;
    let healthy_count = tasks
        .iter()
        .filter(|t| t.task_definition_arn == target.task_definition_arn && t.is_healthy())
        .count() as i64;
    tracing::debug!(
        service = %target.service,
        running_count,
        healthy_count,
        desired_count = target.desired_count,
        "probed service health"
    );

    Ok(if running_count < target.desired_count {
        ProbeOutcome::Absent
    } else if running_count == target.desired_count && healthy_count == target.desired_count {
        ProbeOutcome::Satisfied
    } else {
        ProbeOutcome::Pending
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContainerSpec;
    use crate::services::memory::MemoryPlatform;

    async fn seeded() -> (Arc<MemoryPlatform>, Deployer) {
        let platform = Arc::new(MemoryPlatform::new());
        platform
            .seed_task_definition(
                "api",
                vec![
                    ContainerSpec::named("web").with_image("web:1"),
                    ContainerSpec::named("sidecar").with_image("envoy:1"),
                ],
            )
            .await;
        platform.seed_service(Some("prod"), "api", "api:1", 2).await;
        let deployer = Deployer::new(platform.clone());
        (platform, deployer)
    }

    #[tokio::test]
    async fn register_without_overrides_is_a_noop() {
        let (platform, deployer) = seeded().await;
        let current = deployer.register_task(&TaskSpec::for_family("api")).await.unwrap();
        assert_eq!(current.revision, 1);
        assert_eq!(platform.registrations().await.len(), 1);
    }

    #[tokio::test]
    async fn register_unknown_family_starts_from_scratch() {
        let (_, deployer) = seeded().await;
        let mut spec = TaskSpec::for_family("worker");
        spec.container_definitions = Some(vec![ContainerSpec::named("job").with_image("job:1")]);
        let registered = deployer.register_task(&spec).await.unwrap();
        assert_eq!(registered.family_revision(), "worker:1");
        assert_eq!(registered.memory.as_deref(), Some("1024"));
    }

    #[tokio::test]
    async fn update_task_refuses_overwrite() {
        let (_, deployer) = seeded().await;
        let mut spec = TaskSpec::for_family("api");
        spec.overwrite = true;
        let err = deployer.update_task(&spec).await.unwrap_err();
        assert!(matches!(err, DeployError::InvalidSpec(_)));
    }

    #[tokio::test]
    async fn update_task_requires_existing_family() {
        let (_, deployer) = seeded().await;
        let mut spec = TaskSpec::for_family("worker");
        spec.container_definitions = Some(vec![ContainerSpec::named("job").with_image("job:1")]);
        let err = deployer.update_task(&spec).await.unwrap_err();
        assert!(matches!(err, DeployError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_service_rejects_family_switch() {
        let (platform, deployer) = seeded().await;
        let mut spec = ServiceSpec::named(Some("prod"), "api");
        spec.task_definition = Some(TaskSpec::for_family("other:4"));
        match deployer.update_service(&spec).await.unwrap_err() {
            DeployError::ConflictingFamily { requested, current } => {
                assert_eq!(requested, "other");
                assert_eq!(current, "api");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(platform.service_updates().await.is_empty());
    }

    #[tokio::test]
    async fn deploy_service_allows_family_switch() {
        let (_, deployer) = seeded().await;
        let mut spec = ServiceSpec::named(Some("prod"), "api");
        let mut task = TaskSpec::for_family("api-v2");
        task.container_definitions = Some(vec![ContainerSpec::named("web").with_image("web:9")]);
        spec.task_definition = Some(task);

        let updated = deployer.deploy_service(&spec).await.unwrap();
        assert!(updated.task_definition.ends_with("task-definition/api-v2:1"));
    }

    #[tokio::test]
    async fn healthy_rollout_converges() {
        let (_, deployer) = seeded().await;
        let mut spec = ServiceSpec::named(Some("prod"), "api");
        spec.task_definition = Some(TaskSpec {
            container_definitions: Some(vec![ContainerSpec::named("web").with_image("web:2")]),
            ..Default::default()
        });

        let (service, convergence) = deployer
            .update_service_and_wait(&spec, PollSettings::from_secs(1, 30))
            .await
            .unwrap();
        assert!(service.task_definition.ends_with("task-definition/api:2"));
        assert_eq!(convergence.target, "prod/api");
        assert_eq!(convergence.probes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unhealthy_rollout_times_out() {
        let (platform, deployer) = seeded().await;
        platform.set_rollout_health("UNHEALTHY").await;
        let mut spec = ServiceSpec::named(Some("prod"), "api");
        spec.desired_count = Some(3);

        let err = deployer
            .update_service_and_wait(&spec, PollSettings::from_secs(1, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Timeout { ref target, .. } if target == "prod/api"));
    }

    #[tokio::test]
    async fn probe_failure_after_update_is_a_rollout_error() {
        let (platform, deployer) = seeded().await;
        platform.fail_task_listing("AccessDeniedException").await;
        let spec = ServiceSpec::named(Some("prod"), "api");

        let err = deployer
            .update_service_and_wait(&spec, PollSettings::from_secs(1, 30))
            .await
            .unwrap_err();
        assert!(!err.is_validation());
        match err {
            DeployError::Rollout { target, source } => {
                assert_eq!(target, "prod/api");
                assert!(matches!(*source, DeployError::Platform(_)));
            }
            other => panic!("expected rollout error, got {other:?}"),
        }
    }

    async fn probe_after_update(
        platform: &Arc<MemoryPlatform>,
        deployer: &Deployer,
    ) -> ProbeOutcome {
        let mut spec = ServiceSpec::named(Some("prod"), "api");
        spec.task_definition = Some(TaskSpec {
            container_definitions: Some(vec![ContainerSpec::named("web").with_image("web:2")]),
            ..Default::default()
        });
        let service = deployer.update_service(&spec).await.unwrap();
        let target = HealthTarget {
            cluster: Some("prod".into()),
            service: service.service_name.clone(),
            task_definition_arn: service.task_definition.clone(),
            desired_count: service.desired_count,
        };
        probe_health(platform.clone(), target).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_tasks_on_previous_revision_never_converge() {
        let (platform, deployer) = seeded().await;
        platform.stall_rollout(0, true).await;
        let mut spec = ServiceSpec::named(Some("prod"), "api");
        spec.task_definition = Some(TaskSpec {
            container_definitions: Some(vec![ContainerSpec::named("web").with_image("web:2")]),
            ..Default::default()
        });

        let err = deployer
            .update_service_and_wait(&spec, PollSettings::from_secs(1, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Timeout { ref target, .. } if target == "prod/api"));
    }

    #[tokio::test]
    async fn extra_running_tasks_keep_rollout_pending() {
        let (platform, deployer) = seeded().await;
        platform.stall_rollout(2, true).await;
        assert_eq!(probe_after_update(&platform, &deployer).await, ProbeOutcome::Pending);
    }

    #[tokio::test]
    async fn too_few_running_tasks_is_absent() {
        let (platform, deployer) = seeded().await;
        platform.stall_rollout(1, false).await;
        assert_eq!(probe_after_update(&platform, &deployer).await, ProbeOutcome::Absent);
    }

    #[tokio::test]
    async fn scaled_to_zero_converges_without_tasks() {
        let (_, deployer) = seeded().await;
        let mut spec = ServiceSpec::named(Some("prod"), "api");
        spec.desired_count = Some(0);

        let (service, _) = deployer
            .update_service_and_wait(&spec, PollSettings::from_secs(1, 30))
            .await
            .unwrap();
        assert_eq!(service.desired_count, 0);
    }
}
