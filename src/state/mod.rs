//! Checkpoint Store: durable per-shop launch progress.

pub mod checkpoint;
pub mod fingerprint;
pub mod store;

pub use checkpoint::{
    LaunchCheckpoint, LaunchStatus, LaunchStep, StepResult, StepStatus, format_checkpoint_status,
    generate_launch_id,
};
pub use fingerprint::hash_config;
pub use store::{CheckpointStore, ResumeInfo, ShopLock};
