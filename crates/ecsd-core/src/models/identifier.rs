use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::DeployError;

static ARN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?-u)^arn:aws[\w-]*:ecs:([a-z]{2}(?:-[a-z]+)+-\d{1,2}):(\d{12}):task-definition/([\w-]+):(\d+)$",
    )
    .unwrap()
});

static FAMILY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)^[\w-]+$").unwrap());

static FAMILY_REVISION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)^([\w-]+):(\d+)$").unwrap());

/// A task definition reference in any of the three accepted forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskDefinitionRef {
    Family(String),
    Revision {
        family: String,
        revision: u32,
    },
    Arn {
        region: String,
        account: String,
        family: String,
        revision: u32,
    },
}

impl TaskDefinitionRef {
    pub fn family(&self) -> &str {
        match self {
            TaskDefinitionRef::Family(family)
            | TaskDefinitionRef::Revision { family, .. }
            | TaskDefinitionRef::Arn { family, .. } => family,
        }
    }

    pub fn revision(&self) -> Option<u32> {
        match self {
            TaskDefinitionRef::Family(_) => None,
            TaskDefinitionRef::Revision { revision, .. }
            | TaskDefinitionRef::Arn { revision, .. } => Some(*revision),
        }
    }

    /// `family:revision` when a revision is known, the bare family otherwise.
    pub fn family_revision(&self) -> String {
        match self.revision() {
            Some(revision) => format!("{}:{revision}", self.family()),
            None => self.family().to_string(),
        }
    }
}

impl FromStr for TaskDefinitionRef {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(caps) = ARN_RE.captures(s) {
            return Ok(TaskDefinitionRef::Arn {
                region: caps[1].to_string(),
                account: caps[2].to_string(),
                family: caps[3].to_string(),
                revision: parse_revision(s, &caps[4])?,
            });
        }
        if FAMILY_RE.is_match(s) {
            return Ok(TaskDefinitionRef::Family(s.to_string()));
        }
        if let Some(caps) = FAMILY_REVISION_RE.captures(s) {
            return Ok(TaskDefinitionRef::Revision {
                family: caps[1].to_string(),
                revision: parse_revision(s, &caps[2])?,
            });
        }
        Err(DeployError::InvalidIdentifier(s.to_string()))
    }
}

impl fmt::Display for TaskDefinitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskDefinitionRef::Arn {
                region,
                account,
                family,
                revision,
            } => write!(
                f,
                "arn:aws:ecs:{region}:{account}:task-definition/{family}:{revision}"
            ),
            other => f.write_str(&other.family_revision()),
        }
    }
}

fn parse_revision(input: &str, digits: &str) -> Result<u32, DeployError> {
    digits
        .parse()
        .map_err(|_| DeployError::InvalidIdentifier(input.to_string()))
}

/// Normalise any accepted identifier form to its bare family.
pub fn parse_family(input: &str) -> Result<String, DeployError> {
    Ok(input.parse::<TaskDefinitionRef>()?.family().to_string())
}

/// Normalise any accepted identifier form to `family:revision`
/// (or the bare family when no revision is present).
pub fn parse_family_revision(input: &str) -> Result<String, DeployError> {
    Ok(input.parse::<TaskDefinitionRef>()?.family_revision())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARN: &str = "arn:aws:ecs:us-east-1:123456789012:task-definition/myapp:7";

    #[test]
    fn all_forms_normalise_to_family() {
        assert_eq!(parse_family("myapp").unwrap(), "myapp");
        assert_eq!(parse_family("myapp:7").unwrap(), "myapp");
        assert_eq!(parse_family(ARN).unwrap(), "myapp");
    }

    #[test]
    fn revision_forms_normalise_to_family_revision() {
        assert_eq!(parse_family_revision("myapp:7").unwrap(), "myapp:7");
        assert_eq!(parse_family_revision(ARN).unwrap(), "myapp:7");
        assert_eq!(parse_family_revision("myapp").unwrap(), "myapp");
    }

    #[test]
    fn arn_parts_are_captured() {
        let parsed: TaskDefinitionRef = ARN.parse().unwrap();
        assert_eq!(
            parsed,
            TaskDefinitionRef::Arn {
                region: "us-east-1".into(),
                account: "123456789012".into(),
                family: "myapp".into(),
                revision: 7,
            }
        );
        assert_eq!(parsed.to_string(), ARN);
    }

    #[test]
    fn govcloud_arn_is_accepted() {
        let arn = "arn:aws-us-gov:ecs:us-gov-west-1:123456789012:task-definition/api_v2:12";
        assert_eq!(parse_family_revision(arn).unwrap(), "api_v2:12");
    }

    #[test]
    fn malformed_identifiers_are_rejected() {
        for bad in [
            "",
            "my app",
            "myapp:",
            "myapp:x",
            "café",
            "café:3",
            "myapp:\u{0667}",
            "arn:aws:ecs:us-east-1:123:task-definition/myapp:7",
            "arn:aws:ecs:us-east-1:123456789012:task-definition/myapp",
        ] {
            assert!(
                matches!(parse_family(bad), Err(DeployError::InvalidIdentifier(_))),
                "{bad} should be rejected"
            );
        }
    }
}
