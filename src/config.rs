//! Runtime settings.
//!
//! Every knob is read from the environment once at startup and the resulting
//! `Settings` is handed to the components that need it.

use secrecy::Secret;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug)]
pub struct YoutubeSettings {
    pub api_key: Secret<String>,
    pub search_url: String,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Clone, Debug)]
pub struct IngestSettings {
    pub concurrency: usize,
    pub store_retries: u32,
    pub fetch_retries: u32,
    pub retry_base: Duration,
    pub default_query: String,
    pub default_max_results: u32,
}

#[derive(Clone, Debug)]
pub struct SchedulerSettings {
    /// `None` disables the recurring ingest.
    pub ingest_interval: Option<Duration>,
    /// `None` disables the recurring sweep.
    pub sweep_interval: Option<Duration>,
    pub retention: Duration,
    pub max_concurrent_jobs: usize,
    pub job_history_limit: usize,
}

#[derive(Clone, Debug)]
pub struct PaginationSettings {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub http_addr: String,
    pub youtube: YoutubeSettings,
    pub database: DatabaseSettings,
    pub ingest: IngestSettings,
    pub scheduler: SchedulerSettings,
    pub pagination: PaginationSettings,
}

impl Settings {
    /// Loads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads settings through an arbitrary key lookup, which keeps parsing
    /// testable without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = required(&lookup, "YOUTUBE_API_KEY")?;
        let database_url = required(&lookup, "DATABASE_URL")?;

        let search_url = lookup("YOUTUBE_SEARCH_URL").unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string());
        url::Url::parse(&search_url).map_err(|e| ConfigError::Invalid {
            key: "YOUTUBE_SEARCH_URL",
            value: search_url.clone(),
            reason: e.to_string(),
        })?;

        let concurrency: usize = parse_or(&lookup, "INGEST_CONCURRENCY", 8)?;
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "INGEST_CONCURRENCY",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let default_max_results: u32 = parse_or(&lookup, "DEFAULT_MAX_RESULTS", 10)?;
        if !(1..=50).contains(&default_max_results) {
            return Err(ConfigError::Invalid {
                key: "DEFAULT_MAX_RESULTS",
                value: default_max_results.to_string(),
                reason: "must be between 1 and 50".to_string(),
            });
        }

        let max_page_size: u32 = parse_or(&lookup, "MAX_PAGE_SIZE", 100)?;
        let default_page_size: u32 = parse_or(&lookup, "DEFAULT_PAGE_SIZE", 10)?;
        if max_page_size == 0 || default_page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_PAGE_SIZE",
                value: max_page_size.to_string(),
                reason: "page sizes must be positive".to_string(),
            });
        }

        let retention_days: u64 = parse_or(&lookup, "RETENTION_DAYS", 30)?;
        let retention_secs = retention_days.checked_mul(24 * 60 * 60).ok_or_else(|| ConfigError::Invalid {
            key: "RETENTION_DAYS",
            value: retention_days.to_string(),
            reason: "too large".to_string(),
        })?;

        let timeout_secs: u64 = parse_or(&lookup, "HTTP_TIMEOUT_SECS", 10)?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "HTTP_TIMEOUT_SECS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Settings {
            http_addr: lookup("HTTP_ADDR").unwrap_or_else(|| "0.0.0.0:3001".to_string()),
            youtube: YoutubeSettings {
                api_key: Secret::new(api_key),
                search_url,
                timeout: Duration::from_secs(timeout_secs),
            },
            database: DatabaseSettings {
                url: database_url,
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
            },
            ingest: IngestSettings {
                concurrency,
                store_retries: parse_or(&lookup, "INGEST_STORE_RETRIES", 2)?,
                fetch_retries: parse_or(&lookup, "INGEST_FETCH_RETRIES", 3)?,
                retry_base: Duration::from_millis(parse_or(&lookup, "INGEST_RETRY_BASE_MS", 500)?),
                default_query: lookup("DEFAULT_QUERY").unwrap_or_else(|| "cricket".to_string()),
                default_max_results,
            },
            scheduler: SchedulerSettings {
                ingest_interval: interval(parse_or(&lookup, "INGEST_INTERVAL_SECS", 600)?),
                sweep_interval: interval(parse_or(&lookup, "SWEEP_INTERVAL_SECS", 3600)?),
                retention: Duration::from_secs(retention_secs),
                max_concurrent_jobs: parse_or::<usize, _>(&lookup, "MAX_CONCURRENT_JOBS", 4)?.max(1),
                job_history_limit: parse_or(&lookup, "JOB_HISTORY_LIMIT", 500)?,
            },
            pagination: PaginationSettings {
                default_page_size: default_page_size.min(max_page_size),
                max_page_size,
            },
        })
    }
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

fn interval(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_required_keys_are_set() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("YOUTUBE_API_KEY", "secret-key"),
            ("DATABASE_URL", "sqlite::memory:"),
        ]))
        .unwrap();

        assert_eq!(settings.youtube.api_key.expose_secret(), "secret-key");
        assert_eq!(settings.youtube.search_url, DEFAULT_SEARCH_URL);
        assert_eq!(settings.youtube.timeout, Duration::from_secs(10));
        assert_eq!(settings.ingest.concurrency, 8);
        assert_eq!(settings.ingest.default_query, "cricket");
        assert_eq!(settings.scheduler.retention, Duration::from_secs(30 * 86_400));
        assert_eq!(settings.pagination.max_page_size, 100);
        assert_eq!(settings.pagination.default_page_size, 10);
        assert_eq!(settings.scheduler.ingest_interval, Some(Duration::from_secs(600)));
    }

    #[test]
    fn missing_api_key_is_reported() {
        let err = Settings::from_lookup(lookup_from(&[("DATABASE_URL", "sqlite::memory:")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("YOUTUBE_API_KEY")));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = Settings::from_lookup(lookup_from(&[
            ("YOUTUBE_API_KEY", "k"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("INGEST_CONCURRENCY", "lots"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "INGEST_CONCURRENCY", .. }));

        let err = Settings::from_lookup(lookup_from(&[
            ("YOUTUBE_API_KEY", "k"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("DEFAULT_MAX_RESULTS", "51"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "DEFAULT_MAX_RESULTS", .. }));
    }

    #[test]
    fn out_of_range_timeout_and_retention_are_rejected() {
        let err = Settings::from_lookup(lookup_from(&[
            ("YOUTUBE_API_KEY", "k"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("HTTP_TIMEOUT_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "HTTP_TIMEOUT_SECS", .. }));

        let err = Settings::from_lookup(lookup_from(&[
            ("YOUTUBE_API_KEY", "k"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("RETENTION_DAYS", "300000000000000"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "RETENTION_DAYS", .. }));

        let settings = Settings::from_lookup(lookup_from(&[
            ("YOUTUBE_API_KEY", "k"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("HTTP_TIMEOUT_SECS", "1"),
            ("RETENTION_DAYS", "365"),
        ]))
        .unwrap();
        assert_eq!(settings.youtube.timeout, Duration::from_secs(1));
        assert_eq!(settings.scheduler.retention, Duration::from_secs(365 * 86_400));
    }

    #[test]
    fn zero_interval_disables_recurring_job() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("YOUTUBE_API_KEY", "k"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("INGEST_INTERVAL_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(settings.scheduler.ingest_interval, None);
        assert_eq!(settings.scheduler.sweep_interval, Some(Duration::from_secs(3600)));
    }
}
