pub mod cli;
pub mod config;
pub mod instance;
pub mod intrinsics;
pub mod network;
pub mod security_group;
pub mod template;

// Convenience re-exports (optional, but nice)
pub use config::{Config, InstanceConfig, NetworkConfig, SecurityGroupConfig};
pub use template::{Output, Parameter, Resource, Tag, Template, TemplateError};
