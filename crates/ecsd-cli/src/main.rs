mod cli;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::WrapErr;
use serde_json::json;

use ecsd_core::models::DeployConfig;
use ecsd_core::services::{
    config_loader, AwsCli, Credentials, Deployer, ImageChecker, PollSettings,
};

use crate::cli::{AwsArgs, Cli, Command};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let _guard = setup_logging(cli.debug_log.as_deref())?;

    run(cli).await
}

/// Log to stderr, or to `path` at debug level when given.
/// The returned guard must be held for the duration of the program.
fn setup_logging(
    path: Option<&Path>,
) -> color_eyre::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(path) = path else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
        return Ok(None);
    };

    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| color_eyre::eyre::eyre!("--debug-log must name a file"))?;
    let file_appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_ansi(false)
        .init();

    Ok(Some(guard))
}

async fn run(cli: Cli) -> color_eyre::Result<()> {
    let aws = cli.aws.with_env_aliases();
    let platform = Arc::new(AwsCli::new(credentials(&aws).await?));

    match cli.command {
        Command::Deploy(args) => {
            let config = load_config(cli.spec_file.as_deref())?;
            let spec = args.apply(config.spec);
            let settings = args.wait.settings(config.wait, PollSettings::service_health());
            let deployer = Deployer::new(platform);

            let report = if args.no_wait {
                let service = if args.allow_family_change {
                    deployer.deploy_service(&spec).await?
                } else {
                    deployer.update_service(&spec).await?
                };
                json!({ "service": service })
            } else {
                let (service, convergence) = if args.allow_family_change {
                    deployer.deploy_service_and_wait(&spec, settings).await?
                } else {
                    deployer.update_service_and_wait(&spec, settings).await?
                };
                json!({ "service": service, "convergence": convergence })
            };
            print_json(&report)
        }
        Command::RegisterTask(args) => {
            let config = load_config(cli.spec_file.as_deref())?;
            let mut task = args
                .task
                .apply(config.spec.task_definition)
                .unwrap_or_default();
            task.overwrite = task.overwrite || args.overwrite;
            let registered = Deployer::new(platform).register_task(&task).await?;
            print_json(&registered)
        }
        Command::UpdateTask(args) => {
            let config = load_config(cli.spec_file.as_deref())?;
            let task = args
                .apply(config.spec.task_definition)
                .unwrap_or_default();
            let registered = Deployer::new(platform).update_task(&task).await?;
            print_json(&registered)
        }
        Command::WaitImage(args) => {
            let config = load_config(cli.spec_file.as_deref())?;
            let settings = args.wait.settings(config.wait, PollSettings::image());
            let convergence = ImageChecker::new(platform)
                .wait_for_image(&args.image.ecr_image, settings)
                .await?;
            print_json(&convergence)
        }
        Command::FindImage(args) => {
            let found = ImageChecker::new(platform).find(&args.ecr_image).await?;
            print_json(&found)
        }
    }
}

async fn credentials(args: &AwsArgs) -> color_eyre::Result<Credentials> {
    let base = Credentials {
        access_key: args.access_key.clone(),
        secret_key: args.secret_key.clone(),
        session_token: None,
        region: None,
    }
    .with_region(args.aws_region.clone());
    tracing::debug!(
        region = ?base.region,
        static_keys = base.access_key.is_some(),
        assume_role = args.assume_role_arn.is_some(),
        "resolved credentials"
    );

    match &args.assume_role_arn {
        Some(role_arn) => Ok(base
            .assume_role(role_arn)
            .await
            .wrap_err_with(|| format!("failed to assume role {role_arn}"))?),
        None => Ok(base),
    }
}

fn load_config(explicit: Option<&Path>) -> color_eyre::Result<DeployConfig> {
    let cwd = std::env::current_dir()?;
    let config = config_loader::load_or_default(explicit, &cwd)?;
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> color_eyre::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
