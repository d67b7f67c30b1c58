//! Platform backend that shells out to the `aws` command line.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{DeployError, Result};
use crate::models::task::Tag;
use crate::models::{
    ImageDetail, ImageRef, RegisterTaskDefinition, Service, ServiceSpec, ServiceUpdate,
    TaskDefinition, TaskStatus,
};
use crate::services::credentials::Credentials;
use crate::services::platform::{ContainerPlatform, ImageRegistry};

static ERROR_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"An error occurred \((\w+)\)").unwrap());

/// Error code from an `aws` failure message, e.g. `ClientException`.
pub fn error_code(stderr: &str) -> Option<&str> {
    ERROR_CODE_RE
        .captures(stderr)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// A failed `aws` invocation.
#[derive(Debug)]
pub(crate) struct CliFailure {
    pub code: Option<String>,
    pub message: String,
}

impl CliFailure {
    fn into_error(self) -> DeployError {
        DeployError::Platform(self.message)
    }

    /// `NotFound(what)` when the code is one of `codes`, `Platform` otherwise.
    fn not_found_on(self, codes: &[&str], what: impl Into<String>) -> DeployError {
        match &self.code {
            Some(code) if codes.contains(&code.as_str()) => DeployError::NotFound(what.into()),
            _ => self.into_error(),
        }
    }
}

pub(crate) async fn run_aws(
    args: &[&str],
    credentials: &Credentials,
) -> std::result::Result<String, CliFailure> {
    let mut cmd = Command::new("aws");
    cmd.args(args).args(["--output", "json"]);
    cmd.envs(credentials.env());
    let operation = args.iter().take(2).copied().collect::<Vec<_>>().join(" ");
    tracing::debug!(%operation, "running aws");

    let output = cmd.output().await.map_err(|e| CliFailure {
        code: None,
        message: format!("failed to run aws: {e}"),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(CliFailure {
            code: error_code(&stderr).map(str::to_string),
            message: format!(
                "aws {operation} failed (exit {}): {stderr}",
                output.status.code().unwrap_or(-1)
            ),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn decode<T: DeserializeOwned>(stdout: &str) -> Result<T> {
    Ok(serde_json::from_str(stdout)?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskDefinitionOutput {
    task_definition: TaskDefinition,
    #[serde(default)]
    tags: Option<Vec<Tag>>,
}

impl TaskDefinitionOutput {
    fn into_definition(self) -> TaskDefinition {
        let mut definition = self.task_definition;
        if self.tags.as_ref().is_some_and(|tags| !tags.is_empty()) {
            definition.tags = self.tags;
        }
        definition
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeServicesOutput {
    #[serde(default)]
    services: Vec<Service>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateServiceOutput {
    service: Service,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTasksOutput {
    #[serde(default)]
    task_arns: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeTasksOutput {
    #[serde(default)]
    tasks: Vec<TaskStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeImagesOutput {
    #[serde(default)]
    image_details: Vec<ImageDetail>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeImagesInput<'a> {
    repository_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    registry_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    image_ids: Vec<ImageId<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageId<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    image_tag: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_digest: Option<&'a str>,
}

impl<'a> DescribeImagesInput<'a> {
    fn new(image: &'a ImageRef) -> Self {
        let mut image_ids: Vec<ImageId<'a>> = image
            .image_tags
            .iter()
            .flatten()
            .map(|tag| ImageId {
                image_tag: Some(tag.as_str()),
                image_digest: None,
            })
            .collect();
        if let Some(digest) = &image.image_digest {
            image_ids.push(ImageId {
                image_tag: None,
                image_digest: Some(digest.as_str()),
            });
        }
        Self {
            repository_name: &image.repository_name,
            registry_id: image.registry_id.as_deref(),
            image_ids,
        }
    }
}

/// ECS and ECR through the `aws` CLI.
pub struct AwsCli {
    credentials: Credentials,
}

impl AwsCli {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    async fn run(&self, args: &[&str]) -> std::result::Result<String, CliFailure> {
        run_aws(args, &self.credentials).await
    }

    async fn call<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        let stdout = self.run(args).await.map_err(CliFailure::into_error)?;
        decode(&stdout)
    }
}

/// `--cluster <name>` when a cluster was given.
fn cluster_args(cluster: Option<&str>) -> Vec<&str> {
    match cluster {
        Some(cluster) => vec!["--cluster", cluster],
        None => Vec::new(),
    }
}

#[async_trait]
impl ContainerPlatform for AwsCli {
    async fn describe_task_definition(&self, family: &str) -> Result<TaskDefinition> {
        let stdout = self
            .run(&[
                "ecs",
                "describe-task-definition",
                "--task-definition",
                family,
                "--include",
                "TAGS",
            ])
            .await
            .map_err(|f| {
                f.not_found_on(&["ClientException"], format!("task definition {family}"))
            })?;
        Ok(decode::<TaskDefinitionOutput>(&stdout)?.into_definition())
    }

    async fn register_task_definition(
        &self,
        input: &RegisterTaskDefinition,
    ) -> Result<TaskDefinition> {
        let body = serde_json::to_string(input)?;
        let output: TaskDefinitionOutput = self
            .call(&["ecs", "register-task-definition", "--cli-input-json", &body])
            .await?;
        Ok(output.into_definition())
    }

    async fn describe_service(&self, cluster: Option<&str>, service: &str) -> Result<Service> {
        let mut args = vec!["ecs", "describe-services"];
        args.extend(cluster_args(cluster));
        args.extend(["--services", service]);
        let output: DescribeServicesOutput = self.call(&args).await?;
        single_service(output.services, &ServiceSpec::named(cluster, service).target())
    }

    async fn update_service(&self, update: &ServiceUpdate) -> Result<Service> {
        let body = serde_json::to_string(update)?;
        let output: UpdateServiceOutput = self
            .call(&["ecs", "update-service", "--cli-input-json", &body])
            .await?;
        Ok(output.service)
    }

    async fn list_running_tasks(&self, cluster: Option<&str>, service: &str) -> Result<Vec<String>> {
        let mut args = vec!["ecs", "list-tasks"];
        args.extend(cluster_args(cluster));
        args.extend(["--service-name", service, "--desired-status", "RUNNING"]);
        let output: ListTasksOutput = self.call(&args).await?;
        Ok(output.task_arns)
    }

    async fn describe_tasks(
        &self,
        cluster: Option<&str>,
        task_arns: &[String],
    ) -> Result<Vec<TaskStatus>> {
        if task_arns.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["ecs", "describe-tasks"];
        args.extend(cluster_args(cluster));
        args.push("--tasks");
        args.extend(task_arns.iter().map(String::as_str));
        let output: DescribeTasksOutput = self.call(&args).await?;
        Ok(output.tasks)
    }
}

#[async_trait]
impl ImageRegistry for AwsCli {
    async fn describe_images(&self, image: &ImageRef) -> Result<Vec<ImageDetail>> {
        let body = serde_json::to_string(&DescribeImagesInput::new(image))?;
        let mut args = vec!["ecr", "describe-images", "--cli-input-json", body.as_str()];
        if let Some(region) = &image.region {
            args.extend(["--region", region.as_str()]);
        }
        let stdout = self
            .run(&args)
            .await
            .map_err(|f| {
                f.not_found_on(
                    &["ImageNotFoundException"],
                    format!("image {}", image.docker_tag()),
                )
            })?;
        Ok(decode::<DescribeImagesOutput>(&stdout)?.image_details)
    }
}

fn single_service(mut services: Vec<Service>, target: &str) -> Result<Service> {
    match services.len() {
        0 => Err(DeployError::NotFound(format!("service {target}"))),
        1 => Ok(services.remove(0)),
        _ => Err(DeployError::MultipleMatch(format!("service {target}"))),
    }
}
