use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tags::DEFAULT_ALLOW_LIST;

static UID_ROOT_REGEX: OnceLock<Regex> = OnceLock::new();

const UID_ROOT_MAX_LENGTH: usize = 32;

/// Default namespace prefix for generated UIDs.
pub const UID_ROOT_DEFAULT_VALUE: &str = "9999";

#[derive(Error, Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
#[error("{0}")]
pub struct UidRootError(String);

#[derive(Error, Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum ConfigError {
    #[error("invalid UID root: {0}")]
    InvalidUidRoot(String),

    #[error("invalid worker count: {0}")]
    InvalidWorkerCount(String),
}

impl From<UidRootError> for ConfigError {
    fn from(err: UidRootError) -> Self {
        ConfigError::InvalidUidRoot(err.0)
    }
}

/// The [`UidRoot`] struct represents a DICOM UID root used as the namespace
/// prefix for generating surrogate UIDs during de-identification.
///
/// The [`UidRoot`] must follow DICOM UID format rules:
/// - Start with a digit 1-9
/// - Contain only numbers and dots
///
/// It also must not have more than 32 characters.
///
/// # Example
///
/// ```
/// use dicom_deident::config::UidRoot;
///
/// let uid_root = "1.2.840.12345".parse::<UidRoot>().unwrap();
///
/// // Invalid UID root (not starting with 1-9)
/// let invalid = "0.1.2".parse::<UidRoot>();
/// assert!(invalid.is_err());
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct UidRoot(String);

impl UidRoot {
    pub fn new(uid_root: &str) -> Result<Self, UidRootError> {
        let regex = UID_ROOT_REGEX.get_or_init(|| {
            Regex::new(&format!(
                r"^([1-9][0-9.]{{0,{}}})?$",
                UID_ROOT_MAX_LENGTH - 1
            ))
            .unwrap()
        });

        if !regex.is_match(uid_root) {
            return Err(UidRootError(format!(
                "UID root must be empty or start with 1-9, contain only numbers and dots, and be no longer than {UID_ROOT_MAX_LENGTH} characters"
            )));
        }

        Ok(Self(uid_root.into()))
    }

    /// Returns a string representation of the [`UidRoot`] suitable for use as
    /// a UID prefix.
    ///
    /// If the [`UidRoot`] is not empty and does not end with a dot, a dot is
    /// appended. Whitespace is trimmed from both ends in all cases.
    pub fn as_prefix(&self) -> String {
        if !self.0.is_empty() && !self.0.ends_with('.') {
            format!("{}.", self.0.trim())
        } else {
            self.0.trim().into()
        }
    }
}

impl Default for UidRoot {
    fn default() -> Self {
        Self(UID_ROOT_DEFAULT_VALUE.into())
    }
}

impl FromStr for UidRoot {
    type Err = UidRootError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UidRoot::new(s)
    }
}

impl AsRef<str> for UidRoot {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Per-run extraction options.
///
/// Passed explicitly into the extraction call and scoped to one pipeline run,
/// not process-wide.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOptions {
    /// Stop reading each file just before the PixelData element so large
    /// payloads are never pulled into memory during extraction.
    pub stop_before_pixels: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            stop_before_pixels: true,
        }
    }
}

/// Configuration for one de-identification run.
#[derive(Debug, Clone, PartialEq)]
pub struct DeidentConfig {
    pub(crate) uid_root: UidRoot,
    pub(crate) start_patient: u64,
    pub(crate) start_study: u64,
    pub(crate) max_workers: usize,
    pub(crate) allow_list: Vec<String>,
    pub(crate) extract: ExtractOptions,
}

impl DeidentConfig {
    /// Creates a new [`ConfigBuilder`] for building configurations.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn uid_root(&self) -> &UidRoot {
        &self.uid_root
    }

    pub fn allow_list(&self) -> &[String] {
        &self.allow_list
    }
}

impl Default for DeidentConfig {
    fn default() -> Self {
        ConfigBuilder::new().build()
    }
}

/// Builder for [`DeidentConfig`].
///
/// # Example
///
/// ```
/// use dicom_deident::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .uid_root("1.2.840.12345".parse().unwrap())
///     .start_patient(100)
///     .start_study(100)
///     .max_workers(8)
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    uid_root: Option<UidRoot>,
    start_patient: Option<u64>,
    start_study: Option<u64>,
    max_workers: Option<usize>,
    allow_list: Option<Vec<String>>,
    extract: Option<ExtractOptions>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the UID root to use as the prefix for newly generated UIDs.
    pub fn uid_root(mut self, uid_root: UidRoot) -> Self {
        self.uid_root = Some(uid_root);
        self
    }

    /// First value of the sequential surrogate patient counter.
    pub fn start_patient(mut self, start: u64) -> Self {
        self.start_patient = Some(start);
        self
    }

    /// First value of the sequential surrogate study/accession counter.
    pub fn start_study(mut self, start: u64) -> Self {
        self.start_study = Some(start);
        self
    }

    /// Degree of parallelism for extraction and rewriting. `0` uses the
    /// default thread count of the underlying pool.
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    /// Tag names allowed to survive into the de-identified output records.
    pub fn allow_list(mut self, tags: Vec<String>) -> Self {
        self.allow_list = Some(tags);
        self
    }

    pub fn extract_options(mut self, options: ExtractOptions) -> Self {
        self.extract = Some(options);
        self
    }

    pub fn build(self) -> DeidentConfig {
        DeidentConfig {
            uid_root: self.uid_root.unwrap_or_default(),
            start_patient: self.start_patient.unwrap_or(1),
            start_study: self.start_study.unwrap_or(1),
            max_workers: self.max_workers.unwrap_or(0),
            allow_list: self
                .allow_list
                .unwrap_or_else(|| DEFAULT_ALLOW_LIST.iter().map(|s| s.to_string()).collect()),
            extract: self.extract.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_root_valid() {
        assert!("1.2.840.12345".parse::<UidRoot>().is_ok());
        assert!("9999".parse::<UidRoot>().is_ok());
        assert!("".parse::<UidRoot>().is_ok());
    }

    #[test]
    fn test_uid_root_invalid() {
        assert!("0.1.2".parse::<UidRoot>().is_err());
        assert!("abc".parse::<UidRoot>().is_err());
        assert!("1.2.840,12345".parse::<UidRoot>().is_err());
        let too_long = "1".repeat(UID_ROOT_MAX_LENGTH + 1);
        assert!(too_long.parse::<UidRoot>().is_err());
    }

    #[test]
    fn test_uid_root_as_prefix_appends_dot() {
        let uid_root: UidRoot = "1.2.840".parse().unwrap();
        assert_eq!(uid_root.as_prefix(), "1.2.840.");
    }

    #[test]
    fn test_uid_root_as_prefix_keeps_trailing_dot() {
        let uid_root: UidRoot = "1.2.840.".parse().unwrap();
        assert_eq!(uid_root.as_prefix(), "1.2.840.");
    }

    #[test]
    fn test_uid_root_empty_prefix() {
        let uid_root: UidRoot = "".parse().unwrap();
        assert_eq!(uid_root.as_prefix(), "");
    }

    #[test]
    fn test_config_defaults() {
        let config = DeidentConfig::default();
        assert_eq!(config.uid_root.as_ref(), UID_ROOT_DEFAULT_VALUE);
        assert_eq!(config.start_patient, 1);
        assert_eq!(config.start_study, 1);
        assert_eq!(config.max_workers, 0);
        assert!(!config.allow_list.is_empty());
        assert!(config.extract.stop_before_pixels);
    }

    #[test]
    fn test_config_builder_overrides() {
        let config = ConfigBuilder::new()
            .uid_root("1.2.840.12345".parse().unwrap())
            .start_patient(500)
            .start_study(300)
            .max_workers(4)
            .allow_list(vec!["Modality".to_string()])
            .extract_options(ExtractOptions {
                stop_before_pixels: false,
            })
            .build();
        assert_eq!(config.uid_root.as_ref(), "1.2.840.12345");
        assert_eq!(config.start_patient, 500);
        assert_eq!(config.start_study, 300);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.allow_list, vec!["Modality".to_string()]);
        assert!(!config.extract.stop_before_pixels);
    }
}
