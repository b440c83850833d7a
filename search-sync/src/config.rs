//! Settings consumed at wiring time.
//!
//! The library itself never reads configuration; callers load [`Settings`]
//! once and hand the values to the repository (ensure-tables flag) and the
//! synchronizer (indexer schedule).

use std::time::Duration;

use serde::Deserialize;
use serde_with::serde_as;

#[derive(Deserialize, Clone)]
pub struct Settings {
    pub storage: StorageSettings,
    pub search: SearchSettings,
}

#[derive(Deserialize, Clone)]
pub struct StorageSettings {
    pub connection_string: String,
    /// Create tables on first use at startup.
    pub ensure_tables: bool,
}

#[serde_as]
#[derive(Deserialize, Clone)]
pub struct SearchSettings {
    pub service_name: String,
    pub query_key: String,
    #[serde_as(as = "serde_with::DisplayFromStr")]
    pub indexer_interval_minutes: u64,
}

impl SearchSettings {
    pub fn indexer_interval(&self) -> Duration {
        Duration::from_secs(self.indexer_interval_minutes * 60)
    }
}

pub fn read_config() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");
    let config_directory = base_path.join("config");

    read_config_from(config::File::from(config_directory.join("base.yaml")).required(false))
}

/// File source layered under `HUB_`-prefixed environment variables;
/// environment wins.
fn read_config_from<S>(file: S) -> Result<Settings, config::ConfigError>
where
    S: config::Source + Send + Sync + 'static,
{
    let settings = config::Config::builder()
        .add_source(file)
        .add_source(
            config::Environment::with_prefix("HUB")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_from_yaml() {
        let yaml = r#"
storage:
  connection_string: "UseDevelopmentStorage=true"
  ensure_tables: true
search:
  service_name: "hub-search"
  query_key: "key"
  indexer_interval_minutes: "5"
"#;
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(settings.storage.ensure_tables);
        assert_eq!(settings.search.service_name, "hub-search");
        assert_eq!(
            settings.search.indexer_interval(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn environment_overrides_file_values() {
        let yaml = r#"
storage:
  connection_string: "UseDevelopmentStorage=true"
  ensure_tables: false
search:
  service_name: "hub-search"
  query_key: "key"
  indexer_interval_minutes: "5"
"#;
        std::env::set_var("HUB_SEARCH__SERVICE_NAME", "hub-search-staging");
        std::env::set_var("HUB_SEARCH__INDEXER_INTERVAL_MINUTES", "1");

        let settings =
            read_config_from(config::File::from_str(yaml, config::FileFormat::Yaml)).unwrap();

        std::env::remove_var("HUB_SEARCH__SERVICE_NAME");
        std::env::remove_var("HUB_SEARCH__INDEXER_INTERVAL_MINUTES");

        assert_eq!(settings.search.service_name, "hub-search-staging");
        assert_eq!(settings.search.indexer_interval(), Duration::from_secs(60));
        // values the environment does not name keep the file's settings
        assert_eq!(settings.search.query_key, "key");
        assert!(!settings.storage.ensure_tables);
    }
}
