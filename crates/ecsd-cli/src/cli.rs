use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use ecsd_core::models::{
    ContainerSpec, DeploymentConfiguration, ImageRef, ServiceSpec, TaskSpec, WaitSettings,
};
use ecsd_core::services::PollSettings;

#[derive(Debug, Parser)]
#[command(
    name = "ecs-deploy",
    version,
    about = "Register ECS task definitions, roll out services and wait for them to settle"
)]
pub struct Cli {
    #[command(flatten)]
    pub aws: AwsArgs,

    /// YAML spec file; `.ecs-deploy.yaml` in the working directory is used when present
    #[arg(long, global = true, env = "PLUGIN_SPEC_FILE")]
    pub spec_file: Option<PathBuf>,

    /// Write debug logs to this file instead of stderr
    #[arg(long, global = true)]
    pub debug_log: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Variables consulted, in order, when a credential flag and its `PLUGIN_*`
/// variable are both unset.
const ACCESS_KEY_ALIASES: &[&str] = &["ECS_ACCESS_KEY", "AWS_ACCESS_KEY_ID"];
const SECRET_KEY_ALIASES: &[&str] = &["ECS_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"];
const REGION_ALIASES: &[&str] = &["AWS_DEFAULT_REGION"];

#[derive(Debug, Args)]
pub struct AwsArgs {
    #[arg(long, global = true, env = "PLUGIN_ACCESS_KEY", hide_env_values = true)]
    pub access_key: Option<String>,

    #[arg(long, global = true, env = "PLUGIN_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Role to assume before any other call
    #[arg(long, global = true, env = "PLUGIN_ASSUME_ROLE_ARN")]
    pub assume_role_arn: Option<String>,

    #[arg(long, global = true, env = "PLUGIN_AWS_REGION")]
    pub aws_region: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Update a service and wait until its tasks are healthy
    Deploy(DeployArgs),
    /// Register a new task definition revision
    RegisterTask(RegisterTaskArgs),
    /// Register a new revision merged onto the latest one
    UpdateTask(TaskArgs),
    /// Wait until an image is available in ECR
    WaitImage(WaitImageArgs),
    /// Look up an image in ECR once
    FindImage(ImageArgs),
}

#[derive(Debug, Args)]
pub struct TaskArgs {
    /// Task family, `family:revision` or task definition ARN
    #[arg(long, env = "PLUGIN_FAMILY")]
    pub family: Option<String>,

    /// Container whose image is replaced
    #[arg(long, env = "PLUGIN_CONTAINER_NAME")]
    pub container_name: Option<String>,

    #[arg(long, env = "PLUGIN_DOCKER_IMAGE", requires = "container_name")]
    pub docker_image: Option<String>,

    /// Drop registered containers that are not named here
    #[arg(long)]
    pub delete_unlisted: bool,
}

#[derive(Debug, Args)]
pub struct RegisterTaskArgs {
    #[command(flatten)]
    pub task: TaskArgs,

    /// Register only what is given, ignoring the latest revision
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Debug, Args)]
pub struct WaitArgs {
    /// Seconds between probes
    #[arg(long, env = "PLUGIN_INTERVAL")]
    pub check_interval: Option<u64>,

    /// Seconds before giving up
    #[arg(long, env = "PLUGIN_TIMEOUT")]
    pub check_timeout: Option<u64>,
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    #[arg(long, env = "PLUGIN_CLUSTER")]
    pub cluster: Option<String>,

    #[arg(long, env = "PLUGIN_SERVICE")]
    pub service: Option<String>,

    #[arg(long, env = "PLUGIN_DESIRED_COUNT")]
    pub desired_count: Option<i64>,

    /// e.g. `minimumHealthyPercent=50,maximumPercent=200`
    #[arg(
        long,
        env = "PLUGIN_DEPLOYMENT_CONFIGURATION",
        value_parser = parse_deployment_configuration
    )]
    pub deployment_configuration: Option<DeploymentConfiguration>,

    #[arg(long, env = "PLUGIN_HEALTH_CHECK_GRACE_PERIOD")]
    pub health_check_grace_period: Option<i64>,

    #[arg(long)]
    pub force_new_deployment: bool,

    /// Allow the task override to switch the service to another family
    #[arg(long)]
    pub allow_family_change: bool,

    /// Return as soon as the update is submitted
    #[arg(long)]
    pub no_wait: bool,

    #[command(flatten)]
    pub task: TaskArgs,

    #[command(flatten)]
    pub wait: WaitArgs,
}

#[derive(Debug, Args)]
pub struct ImageArgs {
    /// Full ECR reference, e.g. `123456789012.dkr.ecr.us-east-1.amazonaws.com/app:v1`
    #[arg(long, env = "PLUGIN_IMAGE", value_parser = parse_image)]
    pub ecr_image: ImageRef,
}

#[derive(Debug, Args)]
pub struct WaitImageArgs {
    #[command(flatten)]
    pub image: ImageArgs,

    #[command(flatten)]
    pub wait: WaitArgs,
}

fn parse_image(raw: &str) -> Result<ImageRef, String> {
    raw.parse().map_err(|e: ecsd_core::error::DeployError| e.to_string())
}

/// Parse `key=value` pairs separated by commas.
pub fn parse_deployment_configuration(raw: &str) -> Result<DeploymentConfiguration, String> {
    let mut config = DeploymentConfiguration::default();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got '{pair}'"))?;
        let value: i64 = value
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not a number", value.trim()))?;
        match key.trim() {
            "minimumHealthyPercent" => config.minimum_healthy_percent = Some(value),
            "maximumPercent" => config.maximum_percent = Some(value),
            other => return Err(format!("unknown deployment setting '{other}'")),
        }
    }
    Ok(config)
}

fn first_alias(aliases: &[&str], lookup: &impl Fn(&str) -> Option<String>) -> Option<String> {
    aliases
        .iter()
        .find_map(|name| lookup(name).filter(|v| !v.is_empty()))
}

impl AwsArgs {
    /// Fill unset credentials and region from the alias variables.
    pub fn with_env_aliases(self) -> Self {
        self.with_aliases(|name| std::env::var(name).ok())
    }

    fn with_aliases(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.access_key.is_none() {
            self.access_key = first_alias(ACCESS_KEY_ALIASES, &lookup);
        }
        if self.secret_key.is_none() {
            self.secret_key = first_alias(SECRET_KEY_ALIASES, &lookup);
        }
        if self.aws_region.is_none() {
            self.aws_region = first_alias(REGION_ALIASES, &lookup);
        }
        self
    }
}

impl TaskArgs {
    fn is_empty(&self) -> bool {
        self.family.is_none() && self.container_name.is_none() && !self.delete_unlisted
    }

    /// Layer these flags over a task override from the spec file.
    pub fn apply(&self, task: Option<TaskSpec>) -> Option<TaskSpec> {
        if self.is_empty() {
            return task;
        }
        let mut task = task.unwrap_or_default();
        if let Some(family) = &self.family {
            task.family = family.clone();
        }
        if self.delete_unlisted {
            task.delete_unlisted = true;
        }
        if let Some(name) = &self.container_name {
            let containers = task.container_definitions.get_or_insert_with(Vec::new);
            let position = match containers.iter().position(|c| &c.name == name) {
                Some(position) => position,
                None => {
                    containers.push(ContainerSpec::named(name.as_str()));
                    containers.len() - 1
                }
            };
            if let Some(image) = &self.docker_image {
                containers[position].image = Some(image.clone());
            }
        }
        Some(task)
    }
}

impl DeployArgs {
    /// Layer these flags over the service spec from the spec file.
    pub fn apply(&self, mut spec: ServiceSpec) -> ServiceSpec {
        if let Some(cluster) = &self.cluster {
            spec.cluster = Some(cluster.clone());
        }
        if let Some(service) = &self.service {
            spec.service = service.clone();
        }
        if self.desired_count.is_some() {
            spec.desired_count = self.desired_count;
        }
        if self.health_check_grace_period.is_some() {
            spec.health_check_grace_period_seconds = self.health_check_grace_period;
        }
        if self.force_new_deployment {
            spec.force_new_deployment = Some(true);
        }
        if let Some(flags) = &self.deployment_configuration {
            let config = spec.deployment_configuration.get_or_insert_with(Default::default);
            if flags.minimum_healthy_percent.is_some() {
                config.minimum_healthy_percent = flags.minimum_healthy_percent;
            }
            if flags.maximum_percent.is_some() {
                config.maximum_percent = flags.maximum_percent;
            }
        }
        spec.task_definition = self.task.apply(spec.task_definition.take());
        spec
    }
}

impl WaitArgs {
    /// Flags win over the spec file, which wins over `defaults`.
    pub fn settings(&self, file: Option<WaitSettings>, defaults: PollSettings) -> PollSettings {
        let file = file.unwrap_or_default();
        let interval = self
            .check_interval
            .or(file.interval)
            .unwrap_or(defaults.interval.as_secs());
        let timeout = self
            .check_timeout
            .or(file.timeout)
            .unwrap_or(defaults.timeout.as_secs());
        PollSettings::from_secs(interval, timeout)
    }
}
