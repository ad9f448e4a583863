pub mod addon;
pub mod plan;
pub mod provider_event;
pub mod subscription;
