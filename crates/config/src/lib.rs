//! Configuration loading for the cluster-mining service.
//!
//! The on-disk format is YAML with kebab-case keys. Loading is lenient:
//! unknown materials, malformed achievements and bad reward strings are
//! reported as [`ConfigWarning`]s and skipped, never fatal.

mod achievement;
mod settings;

pub use achievement::{AchievementDefinition, AchievementKind, BlockFilter};
pub use settings::{ConfigError, ConfigWarning, PluginConfig, StorageSettings};

pub fn crate_info() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("config"));
    }
}
