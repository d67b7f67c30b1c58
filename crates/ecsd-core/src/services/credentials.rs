use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{DeployError, Result};
use crate::services::aws_cli::run_aws;

/// AWS credentials and region handed to every `aws` invocation.
///
/// Unset fields fall through to the CLI's own resolution chain
/// (environment, profile, instance role).
#[derive(Clone, Default)]
pub struct Credentials {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub session_token: Option<String>,
    pub region: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "***"))
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .field("region", &self.region)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AssumeRoleOutput {
    credentials: TemporaryCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TemporaryCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: DateTime<Utc>,
}

impl Credentials {
    pub fn with_region(mut self, region: Option<String>) -> Self {
        if region.is_some() {
            self.region = region;
        }
        self
    }

    /// Environment variables understood by the `aws` CLI.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        let mut env = Vec::new();
        if let (Some(access), Some(secret)) = (&self.access_key, &self.secret_key) {
            env.push(("AWS_ACCESS_KEY_ID", access.clone()));
            env.push(("AWS_SECRET_ACCESS_KEY", secret.clone()));
            if let Some(token) = &self.session_token {
                env.push(("AWS_SESSION_TOKEN", token.clone()));
            }
        }
        if let Some(region) = &self.region {
            env.push(("AWS_REGION", region.clone()));
            env.push(("AWS_DEFAULT_REGION", region.clone()));
        }
        env
    }

    /// Exchange these credentials for temporary ones of `role_arn`.
    pub async fn assume_role(&self, role_arn: &str) -> Result<Credentials> {
        let session_name = format!("ecs-deploy-{}", Utc::now().timestamp());
        let stdout = run_aws(
            &[
                "sts",
                "assume-role",
                "--role-arn",
                role_arn,
                "--role-session-name",
                &session_name,
            ],
            self,
        )
        .await
        .map_err(|f| DeployError::Platform(f.message))?;

        let assumed = parse_assume_role(&stdout)?;
        tracing::info!(
            role = %role_arn,
            expires = %assumed.expiration.to_rfc3339(),
            "assumed role"
        );
        Ok(Credentials {
            access_key: Some(assumed.access_key_id),
            secret_key: Some(assumed.secret_access_key),
            session_token: Some(assumed.session_token),
            region: self.region.clone(),
        })
    }
}

fn parse_assume_role(stdout: &str) -> Result<TemporaryCredentials> {
    let output: AssumeRoleOutput = serde_json::from_str(stdout)?;
    Ok(output.credentials)
}
