use std::collections::HashSet;

use crate::error::{DeployError, Result};
use crate::models::{parse_family, ImageRef, ServiceSpec, TaskSpec};

/// Check a task override before anything is sent to the platform.
pub fn validate_task(spec: &TaskSpec) -> Result<()> {
    into_result(task_errors(spec, true))
}

/// Check a service override, including its embedded task override.
///
/// An empty family inside the embedded task is allowed here: it is filled
/// in from the live service before the task itself is validated.
pub fn validate_service(spec: &ServiceSpec) -> Result<()> {
    let mut errors = Vec::new();
    if spec.service.is_empty() {
        errors.push("service must have a name".to_string());
    }
    if let Some(task) = &spec.task_definition {
        errors.extend(task_errors(task, false));
    }
    into_result(errors)
}

pub fn validate_image(image: &ImageRef) -> Result<()> {
    if image.repository_name.is_empty() {
        return Err(DeployError::InvalidSpec(
            "image must have a repository".into(),
        ));
    }
    Ok(())
}

fn task_errors(spec: &TaskSpec, require_family: bool) -> Vec<String> {
    let mut errors = Vec::new();

    if spec.family.is_empty() {
        if require_family {
            errors.push("task family is required".to_string());
        }
    } else if parse_family(&spec.family).is_err() {
        errors.push(format!("task family '{}' cannot be parsed", spec.family));
    }

    if let Some(containers) = &spec.container_definitions {
        if containers.is_empty() {
            errors.push("container definitions must have at least 1 container".to_string());
        }
        let mut seen = HashSet::new();
        for (i, container) in containers.iter().enumerate() {
            if container.name.is_empty() {
                errors.push(format!("container {i} has an empty name"));
            } else if !seen.insert(container.name.as_str()) {
                errors.push(format!("container '{}' is listed twice", container.name));
            }
        }
    }

    errors
}

fn into_result(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(DeployError::InvalidSpec(errors.join("; ")))
    }
}
