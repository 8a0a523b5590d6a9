//! Typed, validated run configuration merged from four sources.
//!
//! Precedence is defaults < file < environment < flags. Scalars follow
//! "last non-empty value wins"; `no_reset` and `local` are logical-OR across
//! every source, so a truthful setting anywhere enables the behaviour. This
//! replaces the global-mutable-flag-state pattern some historical revisions
//! used with a pure merge of four plain structs, each independently
//! testable.

use std::time::Duration;

use camino::Utf8Path;
use serde::Deserialize;
use thiserror::Error;

use crate::cli::Flags;
use crate::load_curve::{LoadCurve, LoadCurveError};

const DEFAULT_CLASSES_PER_RUNNER: usize = 1;
const DEFAULT_DO_REGION: &str = "fra1";
const DEFAULT_DO_SIZE: &str = "s-2vcpu-8gb";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Raised when the `-config` file cannot be read.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Raised when the `-config` file is not valid JSON.
    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        /// Path that failed to parse.
        path: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// Raised when an environment variable holding a numeric/duration value
    /// cannot be parsed.
    #[error("invalid value for environment variable {var}: {message}")]
    InvalidEnvValue {
        /// Name of the offending environment variable.
        var: &'static str,
        /// Human-readable parse failure description.
        message: String,
    },
    /// Raised when `step_size` is not a valid human duration (`"15m"`, `"90s"`).
    #[error("invalid step size {value:?}: {source}")]
    InvalidStepSize {
        /// The offending raw value.
        value: String,
        /// Underlying parse error.
        #[source]
        source: humantime::DurationError,
    },
    /// Raised when `load_levels` does not parse into a valid curve.
    #[error("invalid load levels: {0}")]
    InvalidLoadLevels(#[source] LoadCurveError),
    /// Raised when the system-under-test URL is missing.
    #[error("missing required configuration: url")]
    MissingUrl,
    /// Raised when a DB restore was requested but no Mongo URI was given.
    #[error("db_uri is required unless no_reset is set")]
    MissingDbUri,
    /// Raised when `class_size` is not at least 1.
    #[error("class_size must be at least 1, got {0}")]
    InvalidClassSize(u32),
    /// Raised when `prepared_portion` is outside `[0, 1]`.
    #[error("prepared_portion must be in [0, 1], got {0}")]
    InvalidPreparedPortion(f64),
    /// Raised when `step_size` resolves to zero.
    #[error("step_size must be greater than zero")]
    ZeroStepSize,
}

/// Values loaded from the optional `-config` JSON file. Every field is
/// optional: absence simply means "defer to the next source".
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    /// System-under-test URL.
    pub url: Option<String>,
    /// Mongo URI used for the pre-run reset.
    pub db_uri: Option<String>,
    /// Skips the pre-run DB reset when set.
    pub no_reset: Option<bool>,
    /// Raw, unparsed load curve levels.
    pub load_levels: Option<String>,
    /// Raw, unparsed step duration.
    pub step_size: Option<String>,
    /// Number of classrooms per simulated class.
    pub class_size: Option<u32>,
    /// Fraction of fixtures considered already-prepared.
    pub prepared_portion: Option<f64>,
    /// Runs against a local backend instead of provisioning instances.
    pub local: Option<bool>,
    /// Classrooms assigned to each runner.
    pub classes_per_runner: Option<usize>,
    /// DigitalOcean API key.
    pub do_api_key: Option<String>,
    /// Datadog API key.
    pub dd_api_key: Option<String>,
    /// DigitalOcean region slug.
    pub do_region: Option<String>,
    /// DigitalOcean droplet size slug.
    pub do_size: Option<String>,
}

impl FileConfig {
    /// Reads and parses a `-config` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReadFile`] or [`ConfigError::ParseFile`] on
    /// failure.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::ParseFile {
            path: path.to_string(),
            source,
        })
    }
}

/// Values read directly from the process environment, using the flag names
/// uppercased with underscores (`-doApiKey` → `DO_API_KEY`).
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// System-under-test URL.
    pub url: Option<String>,
    /// Mongo URI used for the pre-run reset.
    pub db_uri: Option<String>,
    /// Skips the pre-run DB reset when set.
    pub no_reset: Option<bool>,
    /// Raw, unparsed load curve levels.
    pub load_levels: Option<String>,
    /// Raw, unparsed step duration.
    pub step_size: Option<String>,
    /// Number of classrooms per simulated class.
    pub class_size: Option<u32>,
    /// Fraction of fixtures considered already-prepared.
    pub prepared_portion: Option<f64>,
    /// Runs against a local backend instead of provisioning instances.
    pub local: Option<bool>,
    /// Classrooms assigned to each runner.
    pub classes_per_runner: Option<usize>,
    /// DigitalOcean API key.
    pub do_api_key: Option<String>,
    /// Datadog API key.
    pub dd_api_key: Option<String>,
    /// DigitalOcean region slug.
    pub do_region: Option<String>,
    /// DigitalOcean droplet size slug.
    pub do_size: Option<String>,
}

impl EnvConfig {
    /// Reads configuration from the current process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnvValue`] when a numeric/boolean
    /// variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_string("URL"),
            db_uri: env_string("DB_URI"),
            no_reset: env_bool("NO_RESET")?,
            load_levels: env_string("LOAD_LEVELS"),
            step_size: env_string("STEP_SIZE"),
            class_size: env_parsed("CLASS_SIZE")?,
            prepared_portion: env_parsed("PREPARED_PORTION")?,
            local: env_bool("LOCAL")?,
            classes_per_runner: env_parsed("CLASSES_PER_RUNNER")?,
            do_api_key: env_string("DO_API_KEY"),
            dd_api_key: env_string("DD_API_KEY"),
            do_region: env_string("DO_REGION"),
            do_size: env_string("DO_SIZE"),
        })
    }
}

fn env_string(var: &'static str) -> Option<String> {
    std::env::var(var).ok().filter(|value| !value.is_empty())
}

fn env_bool(var: &'static str) -> Result<Option<bool>, ConfigError> {
    env_string(var)
        .map(|value| {
            value.parse::<bool>().map_err(|err| ConfigError::InvalidEnvValue {
                var,
                message: err.to_string(),
            })
        })
        .transpose()
}

fn env_parsed<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    env_string(var)
        .map(|value| {
            value.parse::<T>().map_err(|err| ConfigError::InvalidEnvValue {
                var,
                message: err.to_string(),
            })
        })
        .transpose()
}

/// Fully merged, type-checked run configuration.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// System-under-test URL.
    pub url: String,
    /// Mongo URI used for the pre-run reset.
    pub db_uri: Option<String>,
    /// Skips the pre-run DB reset when set.
    pub no_reset: bool,
    /// Raw, unparsed load curve levels.
    pub load_levels: String,
    /// Duration of each load curve step.
    pub step_size: Duration,
    /// Number of classrooms per simulated class.
    pub class_size: u32,
    /// Fraction of fixtures considered already-prepared.
    pub prepared_portion: f64,
    /// Runs against a local backend instead of provisioning instances.
    pub local: bool,
    /// Classrooms assigned to each runner.
    pub classes_per_runner: usize,
    /// DigitalOcean API key.
    pub do_api_key: String,
    /// Datadog API key.
    pub dd_api_key: String,
    /// DigitalOcean region slug.
    pub do_region: String,
    /// DigitalOcean droplet size slug.
    pub do_size: String,
}

impl RunConfig {
    /// Merges `file`, `env`, and `flags` over the built-in defaults, then
    /// validates the result.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a required field is missing or a value
    /// fails validation.
    pub fn merge(file: &FileConfig, env: &EnvConfig, flags: &Flags) -> Result<Self, ConfigError> {
        let url = pick_string(&[&flags.url, &env.url, &file.url]).ok_or(ConfigError::MissingUrl)?;
        let db_uri = pick_string(&[&flags.db_uri, &env.db_uri, &file.db_uri]);
        let no_reset = flags.no_reset || env.no_reset.unwrap_or(false) || file.no_reset.unwrap_or(false);
        let local = flags.local || env.local.unwrap_or(false) || file.local.unwrap_or(false);

        let load_levels = pick_string(&[&flags.load_levels, &env.load_levels, &file.load_levels])
            .ok_or(ConfigError::InvalidLoadLevels(LoadCurveError::Empty))?;

        let step_size_raw = pick_string(&[&flags.step_size, &env.step_size, &file.step_size])
            .unwrap_or_else(|| String::from("1m"));
        let step_size = humantime::parse_duration(&step_size_raw).map_err(|source| ConfigError::InvalidStepSize {
            value: step_size_raw,
            source,
        })?;

        let class_size = flags.class_size.or(env.class_size).or(file.class_size).unwrap_or(1);
        let prepared_portion = flags
            .prepared_portion
            .or(env.prepared_portion)
            .or(file.prepared_portion)
            .unwrap_or(0.0);
        let classes_per_runner = flags
            .classes_per_runner
            .or(env.classes_per_runner)
            .or(file.classes_per_runner)
            .unwrap_or(DEFAULT_CLASSES_PER_RUNNER);
        let do_api_key =
            pick_string(&[&flags.do_api_key, &env.do_api_key, &file.do_api_key]).unwrap_or_default();
        let dd_api_key =
            pick_string(&[&flags.dd_api_key, &env.dd_api_key, &file.dd_api_key]).unwrap_or_default();
        let do_region = pick_string(&[&flags.do_region, &env.do_region, &file.do_region])
            .unwrap_or_else(|| DEFAULT_DO_REGION.to_owned());
        let do_size = pick_string(&[&flags.do_size, &env.do_size, &file.do_size])
            .unwrap_or_else(|| DEFAULT_DO_SIZE.to_owned());

        let config = Self {
            url,
            db_uri,
            no_reset,
            load_levels,
            step_size,
            class_size,
            prepared_portion,
            local,
            classes_per_runner,
            do_api_key,
            dd_api_key,
            do_region,
            do_size,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::MissingUrl);
        }
        if !self.no_reset && self.db_uri.as_deref().unwrap_or("").trim().is_empty() {
            return Err(ConfigError::MissingDbUri);
        }
        if self.class_size < 1 {
            return Err(ConfigError::InvalidClassSize(self.class_size));
        }
        if !(0.0..=1.0).contains(&self.prepared_portion) {
            return Err(ConfigError::InvalidPreparedPortion(self.prepared_portion));
        }
        if self.step_size.is_zero() {
            return Err(ConfigError::ZeroStepSize);
        }
        Ok(())
    }

    /// Parses `load_levels`/`step_size` into a [`LoadCurve`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidLoadLevels`] if the curve is malformed.
    pub fn load_curve(&self) -> Result<LoadCurve, ConfigError> {
        LoadCurve::parse(&self.load_levels, self.step_size).map_err(ConfigError::InvalidLoadLevels)
    }
}

/// Returns the first `Some` non-empty value, in priority order (highest
/// precedence first).
fn pick_string(sources: &[&Option<String>]) -> Option<String> {
    sources
        .iter()
        .find_map(|value| value.as_deref().filter(|s| !s.is_empty()).map(str::to_owned))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags_with_url(url: &str) -> Flags {
        Flags {
            url: Some(url.to_owned()),
            config: None,
            db_uri: Some(String::from("mongodb://localhost/test")),
            no_reset: false,
            load_levels: Some(String::from("1,2,3")),
            step_size: Some(String::from("10s")),
            class_size: Some(2),
            prepared_portion: Some(0.5),
            local: true,
            classes_per_runner: None,
            do_api_key: None,
            dd_api_key: None,
            do_region: None,
            do_size: None,
        }
    }

    #[test]
    fn merge_prefers_flags_over_file_and_env() {
        let file = FileConfig {
            url: Some(String::from("https://file.example")),
            ..FileConfig::default()
        };
        let env = EnvConfig::default();
        let flags = flags_with_url("https://flag.example");

        let config = RunConfig::merge(&file, &env, &flags).expect("should merge");
        assert_eq!(config.url, "https://flag.example");
        assert_eq!(config.do_region, DEFAULT_DO_REGION);
        assert_eq!(config.classes_per_runner, DEFAULT_CLASSES_PER_RUNNER);
    }

    #[test]
    fn merge_ors_no_reset_and_local_across_sources() {
        let file = FileConfig {
            no_reset: Some(true),
            ..FileConfig::default()
        };
        let env = EnvConfig::default();
        let mut flags = flags_with_url("https://flag.example");
        flags.no_reset = false;

        let config = RunConfig::merge(&file, &env, &flags).expect("should merge");
        assert!(config.no_reset);
        assert!(config.local);
    }

    #[test]
    fn merge_rejects_missing_url() {
        let file = FileConfig::default();
        let env = EnvConfig::default();
        let mut flags = flags_with_url("https://flag.example");
        flags.url = None;

        let err = RunConfig::merge(&file, &env, &flags).expect_err("should fail");
        assert!(matches!(err, ConfigError::MissingUrl));
    }

    #[test]
    fn merge_rejects_class_size_zero() {
        let file = FileConfig::default();
        let env = EnvConfig::default();
        let mut flags = flags_with_url("https://flag.example");
        flags.class_size = Some(0);

        let err = RunConfig::merge(&file, &env, &flags).expect_err("should fail");
        assert!(matches!(err, ConfigError::InvalidClassSize(0)));
    }

    #[test]
    fn merge_rejects_out_of_range_prepared_portion() {
        let file = FileConfig::default();
        let env = EnvConfig::default();
        let mut flags = flags_with_url("https://flag.example");
        flags.prepared_portion = Some(1.5);

        let err = RunConfig::merge(&file, &env, &flags).expect_err("should fail");
        assert!(matches!(err, ConfigError::InvalidPreparedPortion(_)));
    }
}
