use std::path::{Path, PathBuf};

use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::{open_file, DefaultDicomObject, OpenFileOptions};
use log::{info, warn};
use rayon::prelude::*;
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::ExtractOptions;
use crate::table::{CellValue, TableError, TagTable, FILENAME_COLUMN};
use crate::tags::{resolve_tags, TagError};

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error(transparent)]
    Tag(#[from] TagError),

    #[error(transparent)]
    Table(#[from] TableError),
}

/// Build a [`TagTable`] with the requested tags from every DICOM file found
/// under `root`.
///
/// The directory is walked recursively and every regular file is attempted in
/// parallel. Files that do not parse as DICOM are skipped with a warning and
/// produce no row. Requested tags absent from a record yield the not-found
/// sentinel, never an empty cell. When `options.stop_before_pixels` is set
/// (the default), each file is only read up to the PixelData element so bulk
/// payloads stay on disk.
///
/// Rows are sorted by source path before the table is returned, so the result
/// does not depend on the order in which parallel reads completed.
pub fn extract(
    root: &Path,
    tag_names: &[String],
    options: &ExtractOptions,
) -> Result<TagTable, ExtractError> {
    let resolved = resolve_tags(tag_names)?;

    let files = list_files(root);
    info!("found {} files under {}", files.len(), root.display());

    let rows: Vec<Vec<CellValue>> = files
        .par_iter()
        .filter_map(|path| read_row(path, &resolved, options))
        .collect();

    info!("extracted {} of {} files", rows.len(), files.len());

    let mut columns = Vec::with_capacity(resolved.len() + 1);
    columns.push(FILENAME_COLUMN.to_string());
    columns.extend(resolved.into_iter().map(|(name, _)| name));

    let mut table = TagTable::new(columns);
    for row in rows {
        table.push_row(row)?;
    }
    table.sort_by_filename();
    Ok(table)
}

fn list_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

fn read_row(
    path: &Path,
    resolved: &[(String, Tag)],
    options: &ExtractOptions,
) -> Option<Vec<CellValue>> {
    let result: Result<DefaultDicomObject, _> = if options.stop_before_pixels {
        OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)
    } else {
        open_file(path)
    };

    let obj = match result {
        Ok(obj) => obj,
        Err(err) => {
            warn!("skipping non-DICOM file {}: {}", path.display(), err);
            return None;
        }
    };

    let mut row = Vec::with_capacity(resolved.len() + 1);
    row.push(CellValue::Found(path.display().to_string()));
    for (_, tag) in resolved {
        row.push(cell_for_tag(&obj, *tag));
    }
    Some(row)
}

fn cell_for_tag(obj: &DefaultDicomObject, tag: Tag) -> CellValue {
    match obj.element(tag) {
        // Sequence-valued elements have no string form; they count as not
        // found for tabulation purposes.
        Ok(elem) => match elem.to_str() {
            Ok(value) => CellValue::Found(value.into_owned()),
            Err(_) => CellValue::NotFound,
        },
        Err(_) => CellValue::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_unknown_tag_is_a_config_error() {
        let result = extract(
            Path::new("/nonexistent"),
            &["NoSuchTagName".to_string()],
            &ExtractOptions::default(),
        );
        assert!(matches!(result, Err(ExtractError::Tag(_))));
    }

    #[test]
    fn test_extract_missing_directory_yields_empty_table() {
        let table = extract(
            Path::new("/nonexistent/deident-input"),
            &["PatientID".to_string()],
            &ExtractOptions::default(),
        )
        .unwrap();
        assert!(table.is_empty());
        assert_eq!(table.columns(), &["Filename", "PatientID"]);
    }
}
