use serde::{Deserialize, Serialize};

use super::task::TaskSpec;

/// A sparse service override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default)]
    pub service: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_configuration: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_definition: Option<TaskSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_new_deployment: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_configuration: Option<DeploymentConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_grace_period_seconds: Option<i64>,
}

impl ServiceSpec {
    pub fn named(cluster: Option<&str>, service: impl Into<String>) -> Self {
        Self {
            cluster: cluster.map(str::to_string),
            service: service.into(),
            ..Default::default()
        }
    }

    /// Cluster and service name, for log lines and error messages.
    pub fn target(&self) -> String {
        match &self.cluster {
            Some(cluster) => format!("{cluster}/{}", self.service),
            None => self.service.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_percent: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_healthy_percent: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_circuit_breaker: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarms: Option<serde_json::Value>,
}

/// A live service as described by the platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub service_name: String,
    #[serde(default)]
    pub service_arn: String,
    #[serde(default)]
    pub cluster_arn: String,
    #[serde(default)]
    pub task_definition: String,
    #[serde(default)]
    pub desired_count: i64,
    #[serde(default)]
    pub running_count: i64,
    #[serde(default)]
    pub pending_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_configuration: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_configuration: Option<DeploymentConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_grace_period_seconds: Option<i64>,
}

/// Fully resolved update request for a service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    pub service: String,
    pub task_definition: String,
    pub desired_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_configuration: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_configuration: Option<DeploymentConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_grace_period_seconds: Option<i64>,
    pub force_new_deployment: bool,
}

/// Health of one running task instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    #[serde(default)]
    pub task_arn: String,
    pub task_definition_arn: String,
    #[serde(default = "unknown_health")]
    pub health_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<String>,
}

pub const HEALTHY: &str = "HEALTHY";

fn unknown_health() -> String {
    "UNKNOWN".to_string()
}

impl TaskStatus {
    pub fn is_healthy(&self) -> bool {
        self.health_status == HEALTHY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_includes_cluster_when_set() {
        assert_eq!(ServiceSpec::named(Some("prod"), "api").target(), "prod/api");
        assert_eq!(ServiceSpec::named(None, "api").target(), "api");
    }

    #[test]
    fn task_status_without_health_is_unknown() {
        let status: TaskStatus = serde_json::from_str(
            r#"{"taskArn": "t1", "taskDefinitionArn": "arn:aws:ecs:us-east-1:123456789012:task-definition/a:1", "lastStatus": "RUNNING"}"#,
        )
        .unwrap();
        assert_eq!(status.health_status, "UNKNOWN");
        assert!(!status.is_healthy());
    }

    #[test]
    fn update_skips_unset_fields() {
        let update = ServiceUpdate {
            cluster: None,
            service: "api".into(),
            task_definition: "arn:aws:ecs:us-east-1:123456789012:task-definition/api:3".into(),
            desired_count: 2,
            platform_version: None,
            network_configuration: None,
            deployment_configuration: None,
            health_check_grace_period_seconds: None,
            force_new_deployment: false,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "service": "api",
                "taskDefinition": "arn:aws:ecs:us-east-1:123456789012:task-definition/api:3",
                "desiredCount": 2,
                "forceNewDeployment": false
            })
        );
    }
}
