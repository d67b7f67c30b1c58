pub mod aws_cli;
pub mod config_loader;
pub mod credentials;
pub mod deployer;
pub mod image_checker;
pub mod memory;
pub mod merge;
pub mod platform;
pub mod poller;
pub mod validation;

pub use aws_cli::AwsCli;
pub use credentials::Credentials;
pub use deployer::Deployer;
pub use image_checker::ImageChecker;
pub use memory::MemoryPlatform;
pub use platform::{ContainerPlatform, ImageRegistry};
pub use poller::{poll_until, Convergence, PollSettings, ProbeOutcome};
