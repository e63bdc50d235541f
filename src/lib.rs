//! Hierarchy-preserving de-identification of DICOM file trees.
//!
//! The pipeline has three stages:
//!
//! 1. **Extraction** ([`extract`]): walk a directory, read the identifying
//!    header tags of every DICOM file in parallel, and assemble one table row
//!    per readable file.
//! 2. **Mapping** ([`mapping`]): enrich the table with surrogate identifier
//!    columns. UID-style identifiers get deterministic surrogate UIDs under a
//!    configured UID root; patient and study numbers get sequential integers.
//!    The mapping is injective and computed from the source values alone, so
//!    the patient/study/series/instance relationships between records survive
//!    the rename.
//! 3. **Rewriting** ([`rewrite`]): for each row, build a fresh record holding
//!    only allow-listed tags plus the surrogates and fixed de-identified
//!    constants, and write it to `<output>/<new_study_id>/<new_sop_uid>.dcm`.
//!
//! The enriched table doubles as the audit trail linking original and
//! surrogate identifiers; keep it somewhere safer than the output tree.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use dicom_deident::config::ConfigBuilder;
//! use dicom_deident::Deidentifier;
//!
//! # fn main() -> Result<(), dicom_deident::DeidentError> {
//! let config = ConfigBuilder::new()
//!     .uid_root("1.2.840.12345".parse().unwrap())
//!     .max_workers(8)
//!     .build();
//! let outcome = Deidentifier::new(config).run(Path::new("in"), Path::new("out"))?;
//! println!(
//!     "wrote {} records, next patient {}, next study {}",
//!     outcome.written, outcome.last_patient, outcome.last_study
//! );
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use thiserror::Error;

pub mod age;
pub mod config;
pub mod extract;
mod hashing;
pub mod mapping;
pub mod metrics;
pub mod rewrite;
pub mod table;
pub mod tags;
mod uid;
pub mod values;

use config::DeidentConfig;
use mapping::MappingOutcome;
use table::TagTable;

#[derive(Error, Debug)]
pub enum DeidentError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Extract(#[from] extract::ExtractError),

    #[error(transparent)]
    Mapping(#[from] mapping::MappingError),

    #[error(transparent)]
    Rewrite(#[from] rewrite::RewriteError),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
}

/// Result of one pipeline run: the enriched audit table plus run statistics.
#[derive(Debug)]
pub struct DeidentOutcome {
    /// The extracted table including all surrogate columns, sorted by source
    /// path. This is the original-to-surrogate mapping for the whole run.
    pub table: TagTable,
    /// One past the last assigned patient index; feed it into the next
    /// batch's `start_patient` to continue the numbering.
    pub last_patient: u64,
    /// One past the last assigned study index.
    pub last_study: u64,
    /// Number of records actually written. May be lower than `table.len()`
    /// when individual files failed to re-read or write; compare against the
    /// table to find the gaps.
    pub written: usize,
}

/// The full de-identification pipeline, configured once and run per batch.
#[derive(Debug, Clone, Default)]
pub struct Deidentifier {
    config: DeidentConfig,
}

impl Deidentifier {
    pub fn new(config: DeidentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DeidentConfig {
        &self.config
    }

    /// Run extraction, mapping and rewriting over `input`, writing
    /// de-identified records under `output`.
    ///
    /// The surrogate mapping is fully materialized before the first record is
    /// rewritten, so rewrite workers only ever observe a complete, read-only
    /// mapping. Per-file failures are logged and skipped in both the
    /// extraction and rewrite stages; configuration problems (unknown tag
    /// names, missing columns) abort before any output is written.
    pub fn run(&self, input: &Path, output: &Path) -> Result<DeidentOutcome, DeidentError> {
        if self.config.max_workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.max_workers)
                .build()
                .map_err(|err| DeidentError::WorkerPool(err.to_string()))?;
            pool.install(|| self.run_stages(input, output))
        } else {
            self.run_stages(input, output)
        }
    }

    fn run_stages(&self, input: &Path, output: &Path) -> Result<DeidentOutcome, DeidentError> {
        let phi_tags: Vec<String> = tags::PHI_TAGS.iter().map(|s| s.to_string()).collect();
        let mut table = extract::extract(input, &phi_tags, &self.config.extract)?;

        let MappingOutcome {
            last_patient,
            last_study,
        } = mapping::map_identifiers(
            &mut table,
            &self.config.uid_root,
            self.config.start_patient,
            self.config.start_study,
        )?;

        let written = rewrite::rewrite(&table, &self.config.allow_list, output)?;

        Ok(DeidentOutcome {
            table,
            last_patient,
            last_study,
            written,
        })
    }
}
