pub mod config;
pub mod container;
pub mod identifier;
pub mod image;
pub mod service;
pub mod task;

pub use config::{DeployConfig, WaitSettings};
pub use container::ContainerSpec;
pub use identifier::{parse_family, parse_family_revision, TaskDefinitionRef};
pub use image::{ImageDetail, ImageRef};
pub use service::{DeploymentConfiguration, Service, ServiceSpec, ServiceUpdate, TaskStatus};
pub use task::{RegisterTaskDefinition, TaskDefinition, TaskSpec};
