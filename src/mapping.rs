use std::collections::HashMap;

use log::info;
use rayon::prelude::*;
use thiserror::Error;

use crate::config::UidRoot;
use crate::table::{CellValue, TableError, TagTable, SURROGATE_PREFIX};
use crate::uid::surrogate_uid;

/// Globally-unique identifier columns remapped through surrogate UIDs.
pub const UID_HIERARCHY_COLUMNS: [&str; 3] =
    ["StudyInstanceUID", "SeriesInstanceUID", "SOPInstanceUID"];

/// Column driving the sequential patient counter.
pub const PATIENT_ID_COLUMN: &str = "PatientID";

/// Study-level column driving the shared study/accession counter.
const STUDY_UID_COLUMN: &str = "StudyInstanceUID";

#[derive(Error, Debug, PartialEq)]
pub enum MappingError {
    #[error("column {0} must be present in the table before identifiers can be mapped")]
    MissingColumn(String),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("surrogate generation failed: {0}")]
    Surrogate(String),
}

/// Final counter values after mapping, reported for audit and so a follow-up
/// batch can continue where this one left off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingOutcome {
    /// One past the last assigned patient index.
    pub last_patient: u64,
    /// One past the last assigned study index.
    pub last_study: u64,
}

/// Enrich `table` with surrogate identifier columns.
///
/// For each UID hierarchy column a `fake_<Column>` column is added whose
/// values are surrogate UIDs generated under `uid_root`. The surrogate is a
/// pure function of the source value and distinct sources never collide, so
/// rows that shared a study, series or instance before mapping still share it
/// afterwards, and rows that did not still do not.
///
/// PatientID gets a sequential integer surrogate starting at `start_patient`,
/// assigned in order of first appearance in the table. StudyID and
/// AccessionNumber share one counter starting at `start_study`, keyed on the
/// *study UID* so every row of the same study receives the same value.
///
/// All surrogate maps are fully materialized here, before any record is
/// rewritten; the rewrite stage only ever sees a complete mapping.
///
/// Fails fast with [`MappingError::MissingColumn`] if any required column is
/// absent — that is a configuration bug, not a per-record condition.
pub fn map_identifiers(
    table: &mut TagTable,
    uid_root: &UidRoot,
    start_patient: u64,
    start_study: u64,
) -> Result<MappingOutcome, MappingError> {
    for column in UID_HIERARCHY_COLUMNS.iter().chain(&[PATIENT_ID_COLUMN]) {
        if !table.has_column(column) {
            return Err(MappingError::MissingColumn(column.to_string()));
        }
    }

    // Each column's mapping is independent, so the three UID maps are built in
    // parallel. They are joined before any of them is applied.
    let uid_maps: Vec<(&str, HashMap<String, String>)> = UID_HIERARCHY_COLUMNS
        .par_iter()
        .map(|&column| -> Result<_, MappingError> {
            let unique = table.unique_in_order(column)?;
            let mut map = HashMap::with_capacity(unique.len());
            for value in unique {
                let surrogate = surrogate_uid(uid_root, &value)
                    .map_err(|err| MappingError::Surrogate(err.to_string()))?;
                map.insert(value, surrogate);
            }
            Ok((column, map))
        })
        .collect::<Result<_, _>>()?;

    for (column, map) in &uid_maps {
        info!("reassigning {column} ({} distinct values)", map.len());
        let values: Vec<CellValue> = table
            .column(column)?
            .map(|cell| CellValue::Found(map[cell.key()].clone()))
            .collect();
        table.add_column(format!("{SURROGATE_PREFIX}{column}"), values)?;
    }

    // Sequential counters follow first appearance in the (path-sorted) table,
    // which makes them reproducible regardless of how many workers computed
    // the UID maps above.
    let patients = table.unique_in_order(PATIENT_ID_COLUMN)?;
    let patient_map: HashMap<&str, u64> = patients
        .iter()
        .enumerate()
        .map(|(i, value)| (value.as_str(), start_patient + i as u64))
        .collect();
    let patient_values: Vec<CellValue> = table
        .column(PATIENT_ID_COLUMN)?
        .map(|cell| CellValue::Found(patient_map[cell.key()].to_string()))
        .collect();
    table.add_column(
        format!("{SURROGATE_PREFIX}{PATIENT_ID_COLUMN}"),
        patient_values,
    )?;

    let studies = table.unique_in_order(STUDY_UID_COLUMN)?;
    let study_map: HashMap<&str, u64> = studies
        .iter()
        .enumerate()
        .map(|(i, value)| (value.as_str(), start_study + i as u64))
        .collect();
    let study_values: Vec<CellValue> = table
        .column(STUDY_UID_COLUMN)?
        .map(|cell| CellValue::Found(study_map[cell.key()].to_string()))
        .collect();
    table.add_column(
        format!("{SURROGATE_PREFIX}StudyID"),
        study_values.clone(),
    )?;
    table.add_column(
        format!("{SURROGATE_PREFIX}AccessionNumber"),
        study_values,
    )?;

    let outcome = MappingOutcome {
        last_patient: start_patient + patients.len() as u64,
        last_study: start_study + studies.len() as u64,
    };
    info!(
        "mapped identifiers: last patient {}, last study {}",
        outcome.last_patient, outcome.last_study
    );
    Ok(outcome)
}
