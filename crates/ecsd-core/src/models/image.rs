use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DeployError;

static ECR_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?-u)^(\d{12})\.dkr\.ecr\.([a-z]{2}(?:-[a-z]+)+-\d{1,2})\.amazonaws\.com/([\w-]+(?:/[\w.-]+)*)(?::([\w.-]+))?$",
    )
    .unwrap()
});

/// An image in a registry repository, optionally pinned to tags or a digest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub repository_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tags: Option<Vec<String>>,
}

impl ImageRef {
    /// Render as a pullable docker reference.
    pub fn docker_tag(&self) -> String {
        let repository = match (&self.registry_id, &self.region) {
            (Some(registry), Some(region)) => format!(
                "{registry}.dkr.ecr.{region}.amazonaws.com/{}",
                self.repository_name
            ),
            _ => self.repository_name.clone(),
        };
        match self.image_tags.as_deref() {
            Some([tag]) => format!("{repository}:{tag}"),
            _ => repository,
        }
    }
}

impl FromStr for ImageRef {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = ECR_IMAGE_RE
            .captures(s)
            .ok_or_else(|| DeployError::InvalidIdentifier(s.to_string()))?;
        Ok(ImageRef {
            registry_id: Some(caps[1].to_string()),
            region: Some(caps[2].to_string()),
            repository_name: caps[3].to_string(),
            image_digest: None,
            image_tags: caps.get(4).map(|tag| vec![tag.as_str().to_string()]),
        })
    }
}

/// An image found in the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDetail {
    #[serde(default)]
    pub registry_id: String,
    #[serde(default)]
    pub repository_name: String,
    #[serde(default)]
    pub image_digest: String,
    #[serde(default)]
    pub image_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size_in_bytes: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_untagged_image() {
        let image: ImageRef = "123456789012.dkr.ecr.ap-southeast-1.amazonaws.com/backend"
            .parse()
            .unwrap();
        assert_eq!(image.registry_id.as_deref(), Some("123456789012"));
        assert_eq!(image.region.as_deref(), Some("ap-southeast-1"));
        assert_eq!(image.repository_name, "backend");
        assert!(image.image_tags.is_none());
    }

    #[test]
    fn parse_tagged_image_round_trips_docker_tag() {
        let raw = "123456789012.dkr.ecr.us-east-1.amazonaws.com/team/backend:v1.2.3";
        let image: ImageRef = raw.parse().unwrap();
        assert_eq!(image.repository_name, "team/backend");
        assert_eq!(image.image_tags, Some(vec!["v1.2.3".to_string()]));
        assert_eq!(image.docker_tag(), raw);
    }

    #[test]
    fn docker_tag_without_registry_is_repository() {
        let image = ImageRef {
            repository_name: "backend".into(),
            image_tags: Some(vec!["a".into(), "b".into()]),
            ..Default::default()
        };
        assert_eq!(image.docker_tag(), "backend");
    }

    #[test]
    fn reject_non_ecr_references() {
        for bad in [
            "nginx:latest",
            "docker.io/library/nginx",
            "12345.dkr.ecr.us-east-1.amazonaws.com/backend",
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/",
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/café:v1",
        ] {
            assert!(
                matches!(bad.parse::<ImageRef>(), Err(DeployError::InvalidIdentifier(_))),
                "{bad} should be rejected"
            );
        }
    }
}
