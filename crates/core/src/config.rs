use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::numbering::{DocumentType, NumberTemplate};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub numbering: NumberingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// Per-document-type numbering templates. Families without an explicit
/// template fall back to the built-in defaults.
#[derive(Clone, Debug, Default)]
pub struct NumberingConfig {
    templates: BTreeMap<DocumentType, NumberTemplate>,
}

impl NumberingConfig {
    pub fn template_for(&self, doc_type: DocumentType) -> NumberTemplate {
        self.templates
            .get(&doc_type)
            .cloned()
            .unwrap_or_else(|| NumberTemplate::default_for(doc_type))
    }

    pub fn set_template(&mut self, doc_type: DocumentType, template: NumberTemplate) {
        self.templates.insert(doc_type, template);
    }
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("unknown document type in [numbering]: `{0}`")]
    UnknownDocumentType(String),
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    database: RawDatabase,
    #[serde(default)]
    logging: RawLogging,
    #[serde(default)]
    numbering: BTreeMap<String, NumberTemplate>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDatabase {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLogging {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://budgex.db".to_owned(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_owned(), format: LogFormat::Compact },
            numbering: NumberingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `budgex.toml` (or an explicit path), then apply `BUDGEX_*`
    /// environment overrides. A missing file is fine unless `require_file`
    /// is set.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let path =
            options.config_path.clone().unwrap_or_else(|| PathBuf::from("budgex.toml"));

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else if options.require_file {
            return Err(ConfigError::MissingConfigFile(path));
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
        let raw: RawConfig = toml::from_str(&content)
            .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })?;

        let defaults = Self::default();
        let mut numbering = NumberingConfig::default();
        for (key, template) in raw.numbering {
            let doc_type = DocumentType::parse(&key)
                .ok_or_else(|| ConfigError::UnknownDocumentType(key.clone()))?;
            numbering.set_template(doc_type, template);
        }

        Ok(Self {
            database: DatabaseConfig {
                url: raw.database.url.unwrap_or(defaults.database.url),
                max_connections: raw
                    .database
                    .max_connections
                    .unwrap_or(defaults.database.max_connections),
                timeout_secs: raw.database.timeout_secs.unwrap_or(defaults.database.timeout_secs),
            },
            logging: LoggingConfig {
                level: raw.logging.level.unwrap_or(defaults.logging.level),
                format: raw.logging.format.unwrap_or(defaults.logging.format),
            },
            numbering,
        })
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("BUDGEX_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(value) = env::var("BUDGEX_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = value.parse().map_err(|_| {
                ConfigError::InvalidEnvOverride {
                    key: "BUDGEX_DATABASE_MAX_CONNECTIONS".to_owned(),
                    value,
                }
            })?;
        }
        if let Ok(level) = env::var("BUDGEX_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".to_owned()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{AppConfig, ConfigError, LoadOptions, LogFormat};
    use crate::numbering::DocumentType;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write");
        file
    }

    #[test]
    fn defaults_apply_when_file_is_absent() {
        let config = AppConfig::load(LoadOptions {
            config_path: Some("/nonexistent/budgex.toml".into()),
            require_file: false,
        })
        .expect("load defaults");

        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let error = AppConfig::load(LoadOptions {
            config_path: Some("/nonexistent/budgex.toml".into()),
            require_file: true,
        })
        .expect_err("must fail");
        assert!(matches!(error, ConfigError::MissingConfigFile(_)));
    }

    #[test]
    fn file_values_override_defaults_and_templates_parse() {
        let file = write_config(
            r#"
[database]
url = "sqlite://execution.db"
max_connections = 2

[logging]
level = "debug"
format = "json"

[numbering.engagement]
prefix = "ENG"
sequence_width = 5

[numbering.reglement]
prefix = "PAY"
reset_policy = "never"
"#,
        );

        let config = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
        })
        .expect("load");

        assert_eq!(config.database.url, "sqlite://execution.db");
        assert_eq!(config.database.max_connections, 2);
        assert_eq!(config.logging.format, LogFormat::Json);

        let engagement = config.numbering.template_for(DocumentType::Engagement);
        assert_eq!(engagement.sequence_width, 5);
        // Family without an explicit template falls back to defaults.
        let liquidation = config.numbering.template_for(DocumentType::Liquidation);
        assert_eq!(liquidation.prefix, "LIQ");
    }

    #[test]
    fn unknown_numbering_family_is_refused() {
        let file = write_config("[numbering.mandat]\nprefix = \"MAN\"\n");
        let error = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
        })
        .expect_err("unknown family");
        assert!(matches!(error, ConfigError::UnknownDocumentType(_)));
    }
}
