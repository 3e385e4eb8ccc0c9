use std::env;
use std::path::PathBuf;

use keyward_core::{Accountability, AppError};
use keyward_infrastructure::PermissionFixture;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionStoreConfig {
    Fixture,
    Postgres { database_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackendConfig {
    Memory,
    Redis { redis_url: String },
}

#[derive(Debug, Clone)]
pub struct InspectorConfig {
    pub fixture_path: Option<PathBuf>,
    pub permission_store: PermissionStoreConfig,
    pub cache_backend: CacheBackendConfig,
    pub cache_ttl_seconds: u32,
    pub accountability: Accountability,
}

impl InspectorConfig {
    pub fn load() -> Result<Self, AppError> {
        let fixture_path = env::var("KEYWARD_FIXTURE")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        let permission_store = match env::var("KEYWARD_PERMISSION_STORE")
            .unwrap_or_else(|_| "fixture".to_owned())
            .as_str()
        {
            "fixture" => {
                if fixture_path.is_none() {
                    return Err(AppError::Validation(
                        "KEYWARD_FIXTURE is required for the fixture permission store".to_owned(),
                    ));
                }
                PermissionStoreConfig::Fixture
            }
            "postgres" => PermissionStoreConfig::Postgres {
                database_url: required_non_empty_env("DATABASE_URL")?,
            },
            other => {
                return Err(AppError::Validation(format!(
                    "KEYWARD_PERMISSION_STORE must be either 'fixture' or 'postgres', got '{other}'"
                )));
            }
        };

        let cache_backend = match env::var("KEYWARD_CACHE_BACKEND")
            .unwrap_or_else(|_| "memory".to_owned())
            .as_str()
        {
            "memory" => CacheBackendConfig::Memory,
            "redis" => CacheBackendConfig::Redis {
                redis_url: required_non_empty_env("REDIS_URL")?,
            },
            other => {
                return Err(AppError::Validation(format!(
                    "KEYWARD_CACHE_BACKEND must be either 'memory' or 'redis', got '{other}'"
                )));
            }
        };

        let cache_ttl_seconds = env::var("KEYWARD_CACHE_TTL_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(300);

        let accountability = match env::var("KEYWARD_ACCOUNTABILITY") {
            Ok(raw) if !raw.trim().is_empty() => {
                serde_json::from_str(raw.as_str()).map_err(|error| {
                    AppError::Validation(format!("invalid KEYWARD_ACCOUNTABILITY: {error}"))
                })?
            }
            _ => Accountability::public(),
        };

        Ok(Self {
            fixture_path,
            permission_store,
            cache_backend,
            cache_ttl_seconds,
            accountability,
        })
    }

    /// Reads the configured fixture, or an empty one when none is configured.
    pub fn load_fixture(&self) -> Result<PermissionFixture, AppError> {
        let Some(path) = &self.fixture_path else {
            return Ok(PermissionFixture::default());
        };

        let raw = std::fs::read_to_string(path).map_err(|error| {
            AppError::Validation(format!(
                "failed to read KEYWARD_FIXTURE '{}': {error}",
                path.display()
            ))
        })?;
        PermissionFixture::from_json(raw.as_str())
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_non_empty_env(name: &str) -> Result<String, AppError> {
    let value = env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))?;
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{name} must not be empty")));
    }

    Ok(value)
}
