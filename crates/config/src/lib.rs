//! Configuration for skylark: `skylark.toml` plus environment overrides.

pub mod loader;
pub mod schema;

pub use {
    loader::{apply_env, default_config_path, load, load_from},
    schema::{AuthConfig, ChatConfig, SkylarkConfig},
};
