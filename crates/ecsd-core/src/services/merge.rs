//! Sparse patch merge: fill every unset field of a desired resource from the
//! registered (or live) resource of the same kind.
//!
//! All functions here are pure. The existing side is only ever borrowed.

use crate::error::{DeployError, Result};
use crate::models::task::DEFAULT_TASK_MEMORY;
use crate::models::{
    parse_family, ContainerSpec, RegisterTaskDefinition, Service, ServiceSpec, ServiceUpdate,
    TaskDefinition, TaskSpec,
};

/// Desired value if set, otherwise a clone of the existing one.
macro_rules! inherit {
    ($desired:expr, $existing:expr, $field:ident) => {
        $desired
            .$field
            .clone()
            .or_else(|| $existing.and_then(|e| e.$field.clone()))
    };
}

/// What to do with a task override once the registered revision is known.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPlan {
    /// Nothing was overridden; keep using the registered revision.
    Unchanged(TaskDefinition),
    /// A new revision has to be registered.
    Register(RegisterTaskDefinition),
}

/// Merge a single container. With no existing container, unset fields stay unset.
pub fn merge_container(desired: &ContainerSpec, existing: Option<&ContainerSpec>) -> ContainerSpec {
    ContainerSpec {
        name: desired.name.clone(),
        image: inherit!(desired, existing, image),
        entry_point: inherit!(desired, existing, entry_point),
        command: inherit!(desired, existing, command),
        depends_on: inherit!(desired, existing, depends_on),
        repository_credentials: inherit!(desired, existing, repository_credentials),
        docker_security_options: inherit!(desired, existing, docker_security_options),
        docker_labels: inherit!(desired, existing, docker_labels),
        essential: inherit!(desired, existing, essential),
        cpu: inherit!(desired, existing, cpu),
        memory: inherit!(desired, existing, memory),
        memory_reservation: inherit!(desired, existing, memory_reservation),
        resource_requirements: inherit!(desired, existing, resource_requirements),
        ulimits: inherit!(desired, existing, ulimits),
        user: inherit!(desired, existing, user),
        working_directory: inherit!(desired, existing, working_directory),
        interactive: inherit!(desired, existing, interactive),
        pseudo_terminal: inherit!(desired, existing, pseudo_terminal),
        readonly_root_filesystem: inherit!(desired, existing, readonly_root_filesystem),
        privileged: inherit!(desired, existing, privileged),
        linux_parameters: inherit!(desired, existing, linux_parameters),
        system_controls: inherit!(desired, existing, system_controls),
        hostname: inherit!(desired, existing, hostname),
        extra_hosts: inherit!(desired, existing, extra_hosts),
        mount_points: inherit!(desired, existing, mount_points),
        volumes_from: inherit!(desired, existing, volumes_from),
        environment: inherit!(desired, existing, environment),
        secrets: inherit!(desired, existing, secrets),
        links: inherit!(desired, existing, links),
        port_mappings: inherit!(desired, existing, port_mappings),
        disable_networking: inherit!(desired, existing, disable_networking),
        dns_search_domains: inherit!(desired, existing, dns_search_domains),
        dns_servers: inherit!(desired, existing, dns_servers),
        health_check: inherit!(desired, existing, health_check),
        start_timeout: inherit!(desired, existing, start_timeout),
        stop_timeout: inherit!(desired, existing, stop_timeout),
        firelens_configuration: inherit!(desired, existing, firelens_configuration),
        log_configuration: inherit!(desired, existing, log_configuration),
    }
}

/// Merge a desired container list into the registered one.
///
/// Desired entries come first, in their own order, each merged with the
/// registered container of the same name. Registered containers that were
/// not mentioned follow in their original order unless `delete_unlisted`.
pub fn merge_containers(
    desired: &[ContainerSpec],
    existing: &[ContainerSpec],
    delete_unlisted: bool,
) -> Vec<ContainerSpec> {
    let mut merged: Vec<ContainerSpec> = desired
        .iter()
        .map(|d| merge_container(d, existing.iter().find(|e| e.name == d.name)))
        .collect();

    if !delete_unlisted {
        merged.extend(
            existing
                .iter()
                .filter(|e| !desired.iter().any(|d| d.name == e.name))
                .cloned(),
        );
    }

    merged
}

/// Resolve a task override against the registered revision.
///
/// With `overwrite` set the registered revision is ignored entirely.
pub fn resolve_task(desired: &TaskSpec, existing: Option<&TaskDefinition>) -> TaskSpec {
    let existing = if desired.overwrite { None } else { existing };
    let registered = existing.map(|e| e.container_definitions.as_slice());

    let container_definitions = match (&desired.container_definitions, registered) {
        (Some(wanted), registered) => Some(merge_containers(
            wanted,
            registered.unwrap_or_default(),
            desired.delete_unlisted,
        )),
        (None, Some(registered)) => Some(registered.to_vec()),
        (None, None) => None,
    };

    TaskSpec {
        family: desired.family.clone(),
        overwrite: desired.overwrite,
        delete_unlisted: desired.delete_unlisted,
        task_role_arn: inherit!(desired, existing, task_role_arn),
        execution_role_arn: inherit!(desired, existing, execution_role_arn),
        network_mode: inherit!(desired, existing, network_mode),
        container_definitions,
        volumes: inherit!(desired, existing, volumes),
        requires_compatibilities: inherit!(desired, existing, requires_compatibilities),
        cpu: inherit!(desired, existing, cpu),
        memory: inherit!(desired, existing, memory),
        ipc_mode: inherit!(desired, existing, ipc_mode),
        pid_mode: inherit!(desired, existing, pid_mode),
        placement_constraints: inherit!(desired, existing, placement_constraints),
        proxy_configuration: inherit!(desired, existing, proxy_configuration),
        tags: inherit!(desired, existing, tags),
    }
}

/// Decide whether a new revision is needed and, if so, build its request.
pub fn plan_task(desired: &TaskSpec, existing: Option<&TaskDefinition>) -> Result<TaskPlan> {
    if let Some(existing) = existing {
        if desired.is_empty() {
            return Ok(TaskPlan::Unchanged(existing.clone()));
        }
    }
    let resolved = resolve_task(desired, existing);
    Ok(TaskPlan::Register(registration(&resolved)?))
}

/// Render a resolved task into a registration request.
pub fn registration(resolved: &TaskSpec) -> Result<RegisterTaskDefinition> {
    let family = parse_family(&resolved.family).map_err(|_| {
        DeployError::InvalidSpec(format!(
            "task family '{}' cannot be parsed",
            resolved.family
        ))
    })?;

    let container_definitions = resolved.container_definitions.clone().unwrap_or_default();
    if container_definitions.is_empty() {
        return Err(DeployError::InvalidSpec(format!(
            "task family '{family}' has no container definitions to register"
        )));
    }

    Ok(RegisterTaskDefinition {
        family,
        container_definitions,
        task_role_arn: resolved.task_role_arn.clone(),
        execution_role_arn: resolved.execution_role_arn.clone(),
        network_mode: resolved.network_mode.clone(),
        volumes: resolved.volumes.clone(),
        requires_compatibilities: resolved.requires_compatibilities.clone(),
        cpu: resolved.cpu.clone(),
        memory: resolved
            .memory
            .clone()
            .unwrap_or_else(|| DEFAULT_TASK_MEMORY.to_string()),
        ipc_mode: resolved.ipc_mode.clone(),
        pid_mode: resolved.pid_mode.clone(),
        placement_constraints: resolved.placement_constraints.clone(),
        proxy_configuration: resolved.proxy_configuration.clone(),
        tags: resolved.tags.clone(),
    })
}

/// Resolve a service override against the live service.
///
/// `task_definition_arn` is the revision to roll out; when `None` the
/// service keeps its current revision.
pub fn resolve_service(
    desired: &ServiceSpec,
    live: &Service,
    task_definition_arn: Option<&str>,
) -> ServiceUpdate {
    ServiceUpdate {
        cluster: desired.cluster.clone(),
        service: desired.service.clone(),
        task_definition: task_definition_arn
            .unwrap_or(&live.task_definition)
            .to_string(),
        desired_count: desired.desired_count.unwrap_or(live.desired_count),
        platform_version: inherit!(desired, Some(live), platform_version),
        network_configuration: inherit!(desired, Some(live), network_configuration),
        deployment_configuration: inherit!(desired, Some(live), deployment_configuration),
        health_check_grace_period_seconds: inherit!(
            desired,
            Some(live),
            health_check_grace_period_seconds
        ),
        force_new_deployment: desired.force_new_deployment.unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::container::{KeyValuePair, PortMapping};
    use crate::models::task::Tag;
    use crate::models::DeploymentConfiguration;

    fn full_container(name: &str, image: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.into(),
            image: Some(image.into()),
            essential: Some(true),
            memory: Some(256),
            command: Some(vec!["serve".into(), "--port=8080".into()]),
            environment: Some(vec![KeyValuePair {
                name: "MODE".into(),
                value: "prod".into(),
            }]),
            port_mappings: Some(vec![PortMapping {
                container_port: Some(8080),
                protocol: Some("tcp".into()),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    fn registered() -> TaskDefinition {
        TaskDefinition {
            task_definition_arn: "arn:aws:ecs:us-east-1:123456789012:task-definition/myapp:7"
                .into(),
            family: "myapp".into(),
            revision: 7,
            status: Some("ACTIVE".into()),
            container_definitions: vec![
                full_container("a", "repo/a:1"),
                full_container("b", "repo/b:1"),
                full_container("c", "repo/c:1"),
            ],
            task_role_arn: Some("arn:aws:iam::123456789012:role/task".into()),
            network_mode: Some("awsvpc".into()),
            requires_compatibilities: Some(vec!["FARGATE".into()]),
            cpu: Some("512".into()),
            memory: Some("2048".into()),
            tags: Some(vec![Tag {
                key: "team".into(),
                value: "core".into(),
            }]),
            ..Default::default()
        }
    }

    fn live_service() -> Service {
        Service {
            service_name: "api".into(),
            service_arn: "arn:aws:ecs:us-east-1:123456789012:service/prod/api".into(),
            cluster_arn: "arn:aws:ecs:us-east-1:123456789012:cluster/prod".into(),
            task_definition: "arn:aws:ecs:us-east-1:123456789012:task-definition/myapp:7".into(),
            desired_count: 3,
            running_count: 3,
            platform_version: Some("LATEST".into()),
            deployment_configuration: Some(DeploymentConfiguration {
                maximum_percent: Some(200),
                minimum_healthy_percent: Some(100),
                ..Default::default()
            }),
            health_check_grace_period_seconds: Some(30),
            ..Default::default()
        }
    }

    fn names(containers: &[ContainerSpec]) -> Vec<&str> {
        containers.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn container_identity() {
        let existing = full_container("web", "repo/web:1");
        assert_eq!(
            merge_container(&ContainerSpec::named("web"), Some(&existing)),
            existing
        );
    }

    #[test]
    fn container_single_override() {
        let existing = full_container("web", "repo/web:1");
        let desired = ContainerSpec::named("web").with_image("repo/web:2");

        let mut expected = existing.clone();
        expected.image = Some("repo/web:2".into());
        assert_eq!(merge_container(&desired, Some(&existing)), expected);
    }

    #[test]
    fn container_explicit_empty_value_wins() {
        let existing = full_container("web", "repo/web:1");
        let desired = ContainerSpec {
            name: "web".into(),
            environment: Some(vec![]),
            ..Default::default()
        };
        let merged = merge_container(&desired, Some(&existing));
        assert_eq!(merged.environment, Some(vec![]));
        assert_eq!(merged.image, existing.image);
    }

    #[test]
    fn container_without_match_inherits_nothing() {
        let desired = ContainerSpec::named("sidecar").with_image("repo/sidecar:1");
        let merged = merge_container(&desired, None);
        assert_eq!(merged, desired);
        assert!(merged.memory.is_none());
        assert!(merged.environment.is_none());
    }

    #[test]
    fn container_list_keeps_unlisted() {
        let existing = registered().container_definitions;
        let desired = vec![ContainerSpec::named("b").with_image("repo/b:2")];

        let merged = merge_containers(&desired, &existing, false);
        assert_eq!(names(&merged), vec!["b", "a", "c"]);
        assert_eq!(merged[0].image.as_deref(), Some("repo/b:2"));
        assert_eq!(merged[0].memory, Some(256));
        assert_eq!(merged[1], existing[0]);
        assert_eq!(merged[2], existing[2]);
    }

    #[test]
    fn container_list_deletes_unlisted() {
        let existing = registered().container_definitions;
        let desired = vec![ContainerSpec::named("b").with_image("repo/b:2")];

        let merged = merge_containers(&desired, &existing, true);
        assert_eq!(names(&merged), vec!["b"]);
        assert_eq!(merged[0].command, existing[1].command);
    }

    #[test]
    fn container_list_new_container_is_not_inherited() {
        let existing = registered().container_definitions;
        let desired = vec![
            ContainerSpec::named("c"),
            ContainerSpec::named("new").with_image("repo/new:1"),
        ];

        let merged = merge_containers(&desired, &existing, false);
        assert_eq!(names(&merged), vec!["c", "new", "a", "b"]);
        assert_eq!(merged[1], ContainerSpec::named("new").with_image("repo/new:1"));
    }

    #[test]
    fn task_identity() {
        let existing = registered();
        let resolved = resolve_task(&TaskSpec::for_family("myapp"), Some(&existing));
        assert_eq!(resolved, TaskSpec::from(&existing));
    }

    #[test]
    fn task_single_override() {
        let existing = registered();
        let mut desired = TaskSpec::for_family("myapp");
        desired.cpu = Some("1024".into());

        let mut expected = TaskSpec::from(&existing);
        expected.cpu = Some("1024".into());
        assert_eq!(resolve_task(&desired, Some(&existing)), expected);
    }

    #[test]
    fn task_overwrite_ignores_registered_revision() {
        let existing = registered();
        let desired = TaskSpec {
            family: "myapp".into(),
            overwrite: true,
            container_definitions: Some(vec![ContainerSpec::named("a").with_image("repo/a:9")]),
            ..Default::default()
        };

        let resolved = resolve_task(&desired, Some(&existing));
        assert_eq!(
            resolved.container_definitions,
            Some(vec![ContainerSpec::named("a").with_image("repo/a:9")])
        );
        assert!(resolved.cpu.is_none());
        assert!(resolved.tags.is_none());
    }

    #[test]
    fn plan_unchanged_when_nothing_is_set() {
        let existing = registered();
        let plan = plan_task(&TaskSpec::for_family("myapp:7"), Some(&existing)).unwrap();
        assert_eq!(plan, TaskPlan::Unchanged(existing));
    }

    #[test]
    fn plan_registers_with_bare_family() {
        let existing = registered();
        let desired = TaskSpec {
            family: "arn:aws:ecs:us-east-1:123456789012:task-definition/myapp:7".into(),
            container_definitions: Some(vec![ContainerSpec::named("a").with_image("repo/a:2")]),
            ..Default::default()
        };

        let TaskPlan::Register(input) = plan_task(&desired, Some(&existing)).unwrap() else {
            panic!("expected a registration");
        };
        assert_eq!(input.family, "myapp");
        assert_eq!(names(&input.container_definitions), vec!["a", "b", "c"]);
        assert_eq!(input.memory, "2048");
        assert_eq!(input.tags, existing.tags);
    }

    #[test]
    fn registration_defaults_task_memory() {
        let desired = TaskSpec {
            family: "fresh".into(),
            container_definitions: Some(vec![ContainerSpec::named("web").with_image("web:1")]),
            ..Default::default()
        };
        let TaskPlan::Register(input) = plan_task(&desired, None).unwrap() else {
            panic!("expected a registration");
        };
        assert_eq!(input.memory, DEFAULT_TASK_MEMORY);
    }

    #[test]
    fn registration_without_containers_is_invalid() {
        let err = plan_task(&TaskSpec::for_family("fresh"), None).unwrap_err();
        assert!(matches!(err, DeployError::InvalidSpec(_)));
    }

    #[test]
    fn service_identity() {
        let live = live_service();
        let update = resolve_service(&ServiceSpec::named(Some("prod"), "api"), &live, None);
        assert_eq!(update.task_definition, live.task_definition);
        assert_eq!(update.desired_count, 3);
        assert_eq!(update.platform_version, live.platform_version);
        assert_eq!(update.deployment_configuration, live.deployment_configuration);
        assert_eq!(update.health_check_grace_period_seconds, Some(30));
        assert_eq!(update.network_configuration, None);
        assert!(!update.force_new_deployment);
    }

    #[test]
    fn service_override_and_new_revision() {
        let live = live_service();
        let mut desired = ServiceSpec::named(Some("prod"), "api");
        desired.desired_count = Some(5);
        desired.force_new_deployment = Some(true);

        let new_arn = "arn:aws:ecs:us-east-1:123456789012:task-definition/myapp:8";
        let update = resolve_service(&desired, &live, Some(new_arn));
        assert_eq!(update.cluster.as_deref(), Some("prod"));
        assert_eq!(update.task_definition, new_arn);
        assert_eq!(update.desired_count, 5);
        assert_eq!(update.deployment_configuration, live.deployment_configuration);
        assert!(update.force_new_deployment);
    }
}
