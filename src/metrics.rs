use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use chrono::Local;
use log::info;
use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::ExtractOptions;
use crate::extract::{self, ExtractError};
use crate::table::{csv_escape, TableError, TagTable};

const METRIC_TAGS: [&str; 7] = [
    "PatientID",
    "StudyInstanceUID",
    "SeriesInstanceUID",
    "SOPInstanceUID",
    "Modality",
    "PatientSex",
    "PatientAge",
];

const MODALITIES: [&str; 5] = ["MR", "CT", "US", "CR", "DX"];

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Table(#[from] TableError),
}

/// One summary row describing a batch of DICOM files, suitable for appending
/// to a running CSV log across ingestion batches.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub timestamp: String,
    pub files: usize,
    pub batch_size_bytes: u64,
    pub patients: usize,
    pub studies: usize,
    pub series: usize,
    /// Studies per modality, counted once per study.
    pub mr_studies: usize,
    pub ct_studies: usize,
    pub us_studies: usize,
    pub cr_studies: usize,
    pub dx_studies: usize,
    /// Fraction of distinct patients recorded as male.
    pub male_fraction: f64,
}

/// Scan `folder` and compute its batch summary.
pub fn summarize(folder: &Path) -> Result<BatchSummary, MetricsError> {
    let tags: Vec<String> = METRIC_TAGS.iter().map(|s| s.to_string()).collect();
    let table = extract::extract(folder, &tags, &ExtractOptions::default())?;
    let summary = summarize_table(&table, folder_size(folder))?;
    info!(
        "batch: {} files, {} patients, {} studies, {} series",
        summary.files, summary.patients, summary.studies, summary.series
    );
    Ok(summary)
}

/// Compute the summary from an already-extracted table.
pub fn summarize_table(table: &TagTable, batch_size_bytes: u64) -> Result<BatchSummary, TableError> {
    let patients = table.unique_in_order("PatientID")?;
    let studies = table.unique_in_order("StudyInstanceUID")?;
    let series = table.unique_in_order("SeriesInstanceUID")?;

    // Modality is a series-level tag; count each study once, using the
    // modality of its first row.
    let mut seen_studies = HashSet::new();
    let mut modality_counts = [0usize; MODALITIES.len()];
    for row in table.rows() {
        let study = row.get("StudyInstanceUID").map(|c| c.key()).unwrap_or("");
        if !seen_studies.insert(study) {
            continue;
        }
        if let Some(modality) = row.get("Modality").and_then(|c| c.found()) {
            if let Some(idx) = MODALITIES.iter().position(|m| *m == modality) {
                modality_counts[idx] += 1;
            }
        }
    }

    let mut seen_patients = HashSet::new();
    let mut male = 0usize;
    for row in table.rows() {
        let patient = row.get("PatientID").map(|c| c.key()).unwrap_or("");
        if !seen_patients.insert(patient) {
            continue;
        }
        if row.get("PatientSex").and_then(|c| c.found()) == Some("M") {
            male += 1;
        }
    }
    let male_fraction = if patients.is_empty() {
        0.0
    } else {
        male as f64 / patients.len() as f64
    };

    Ok(BatchSummary {
        timestamp: Local::now().format("%m/%d/%Y, %H:%M:%S").to_string(),
        files: table.len(),
        batch_size_bytes,
        patients: patients.len(),
        studies: studies.len(),
        series: series.len(),
        mr_studies: modality_counts[0],
        ct_studies: modality_counts[1],
        us_studies: modality_counts[2],
        cr_studies: modality_counts[3],
        dx_studies: modality_counts[4],
        male_fraction,
    })
}

/// Append the summary to a CSV log, writing the header when the file does not
/// exist yet.
pub fn append_csv(summary: &BatchSummary, path: &Path) -> io::Result<()> {
    let new_file = !path.exists();
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if new_file {
        writeln!(
            file,
            "Timestamp,Files,BatchSizeBytes,Patients,Studies,Series,MRStudies,CTStudies,USStudies,CRStudies,DXStudies,MaleFraction"
        )?;
    }
    writeln!(
        file,
        "{},{},{},{},{},{},{},{},{},{},{},{}",
        csv_escape(&summary.timestamp),
        summary.files,
        summary.batch_size_bytes,
        summary.patients,
        summary.studies,
        summary.series,
        summary.mr_studies,
        summary.ct_studies,
        summary.us_studies,
        summary.cr_studies,
        summary.dx_studies,
        summary.male_fraction,
    )
}

fn folder_size(folder: &Path) -> u64 {
    WalkDir::new(folder)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}
