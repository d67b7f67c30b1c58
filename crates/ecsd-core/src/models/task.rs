use serde::{Deserialize, Serialize};

use super::container::ContainerSpec;

/// Task memory used when neither the override nor the registered revision sets one.
pub const DEFAULT_TASK_MEMORY: &str = "1024";

/// A sparse task definition override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Family in any accepted identifier form. May be left empty inside a
    /// service override, in which case the service's current family is used.
    #[serde(default)]
    pub family: String,
    /// Ignore the registered revision entirely.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub overwrite: bool,
    /// Drop registered containers that the override does not list.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub delete_unlisted: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_role_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_role_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_definitions: Option<Vec<ContainerSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_compatibilities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipc_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_constraints: Option<Vec<PlacementConstraint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_configuration: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Tag>>,
}

impl TaskSpec {
    pub fn for_family(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            ..Default::default()
        }
    }

    /// True when nothing would change relative to the registered revision.
    pub fn is_empty(&self) -> bool {
        !self.overwrite
            && self.task_role_arn.is_none()
            && self.execution_role_arn.is_none()
            && self.network_mode.is_none()
            && self.container_definitions.is_none()
            && self.volumes.is_none()
            && self.requires_compatibilities.is_none()
            && self.cpu.is_none()
            && self.memory.is_none()
            && self.ipc_mode.is_none()
            && self.pid_mode.is_none()
            && self.placement_constraints.is_none()
            && self.proxy_configuration.is_none()
            && self.tags.is_none()
    }
}

impl From<&TaskDefinition> for TaskSpec {
    fn from(definition: &TaskDefinition) -> Self {
        Self {
            family: definition.family.clone(),
            overwrite: false,
            delete_unlisted: false,
            task_role_arn: definition.task_role_arn.clone(),
            execution_role_arn: definition.execution_role_arn.clone(),
            network_mode: definition.network_mode.clone(),
            container_definitions: Some(definition.container_definitions.clone()),
            volumes: definition.volumes.clone(),
            requires_compatibilities: definition.requires_compatibilities.clone(),
            cpu: definition.cpu.clone(),
            memory: definition.memory.clone(),
            ipc_mode: definition.ipc_mode.clone(),
            pid_mode: definition.pid_mode.clone(),
            placement_constraints: definition.placement_constraints.clone(),
            proxy_configuration: definition.proxy_configuration.clone(),
            tags: definition.tags.clone(),
        }
    }
}

/// A registered task definition revision as described by the platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    #[serde(default)]
    pub task_definition_arn: String,
    pub family: String,
    #[serde(default)]
    pub revision: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub container_definitions: Vec<ContainerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_role_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_role_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_compatibilities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipc_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_constraints: Option<Vec<PlacementConstraint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_configuration: Option<serde_json::Value>,
    /// Returned next to the definition rather than inside it; filled in by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Tag>>,
}

impl TaskDefinition {
    pub fn family_revision(&self) -> String {
        format!("{}:{}", self.family, self.revision)
    }
}

/// Request body for registering a new revision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterTaskDefinition {
    pub family: String,
    pub container_definitions: Vec<ContainerSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_role_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_role_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_compatibilities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    pub memory: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipc_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_constraints: Option<Vec<PlacementConstraint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_configuration: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Tag>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementConstraint {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}
