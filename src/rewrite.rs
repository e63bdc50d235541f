use std::fs;
use std::path::Path;

use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::meta::FileMetaTableBuilder;
use dicom_object::{open_file, InMemDicomObject};
use log::{info, warn};
use rayon::prelude::*;
use thiserror::Error;

use crate::age::safe_age;
use crate::table::{RowView, TagTable};
use crate::tags::{resolve_tags, TagError};

// Fixed de-identified values written into every output record. These replace
// the real acquisition context wholesale; only relative ordering within the
// remapped hierarchy is meant to survive.
const FIXED_BIRTH_DATE: &str = "19190828";
const FIXED_DATE: &str = "20250228";
const FIXED_TIME: &str = "000000";
const DEFAULT_SEX: &str = "O";
const DEFAULT_AGE: &str = "000Y";

/// Surrogate and demographic columns the enriched table must carry before
/// rewriting can start.
const REQUIRED_COLUMNS: [&str; 7] = [
    "PatientSex",
    "PatientAge",
    "fake_PatientID",
    "fake_AccessionNumber",
    "fake_StudyInstanceUID",
    "fake_SeriesInstanceUID",
    "fake_SOPInstanceUID",
];

#[derive(Error, Debug, PartialEq)]
pub enum RewriteError {
    #[error(transparent)]
    Tag(#[from] TagError),

    #[error("column {0} must be present in the enriched table before rewriting")]
    MissingColumn(String),
}

/// Write a de-identified copy of every record in the enriched table.
///
/// Each row's source file is re-read in full (the table only carries header
/// fields, so payload-bearing elements must come from disk). A fresh dataset
/// is built containing only the allow-listed tags present in the source, then
/// the hierarchy identifiers are overwritten with their surrogates from the
/// table and the fixed de-identified constants are applied unconditionally.
/// The output lands at `<output_root>/<new_study_id>/<new_sop_uid>.dcm`,
/// keeping the transfer syntax of the source (Explicit VR Little Endian when
/// the source has none).
///
/// Rows are processed in parallel and independently: a file that cannot be
/// read or written is logged and skipped without aborting the batch. The
/// number of records actually written is returned, so a shortfall against
/// `table.len()` is detectable by the caller.
pub fn rewrite(
    table: &TagTable,
    allow_list: &[String],
    output_root: &Path,
) -> Result<usize, RewriteError> {
    let allow_tags = resolve_tags(allow_list)?;

    for column in REQUIRED_COLUMNS {
        if !table.has_column(column) {
            return Err(RewriteError::MissingColumn(column.to_string()));
        }
    }

    let written = table
        .rows()
        .par_bridge()
        .filter(|row| rewrite_row(row, &allow_tags, output_root))
        .count();

    info!("wrote {written} of {} records", table.len());
    Ok(written)
}

fn rewrite_row(row: &RowView<'_>, allow_tags: &[(String, Tag)], output_root: &Path) -> bool {
    let source_path = row.filename();
    let src = match open_file(source_path) {
        Ok(obj) => obj,
        Err(err) => {
            warn!("failed to read {source_path}: {err}");
            return false;
        }
    };

    let cell = |name: &str| row.get(name).map(|c| c.key().to_string()).unwrap_or_default();

    let patient_id = zero_pad(&cell("fake_PatientID"));
    let study_id = zero_pad(&cell("fake_AccessionNumber"));
    let study_uid = cell("fake_StudyInstanceUID");
    let series_uid = cell("fake_SeriesInstanceUID");
    let sop_uid = cell("fake_SOPInstanceUID");
    let sex = row
        .get("PatientSex")
        .map(|c| c.found_or(DEFAULT_SEX).to_string())
        .unwrap_or_else(|| DEFAULT_SEX.to_string());
    let age = safe_age(
        row.get("PatientAge")
            .map(|c| c.found_or(DEFAULT_AGE))
            .unwrap_or(DEFAULT_AGE),
    );

    let mut out = InMemDicomObject::new_empty();
    for (_, tag) in allow_tags {
        if let Ok(elem) = src.element(*tag) {
            out.put(elem.clone());
        }
    }

    put_str(&mut out, tags::PATIENT_ID, VR::LO, &patient_id);
    put_str(&mut out, tags::PATIENT_NAME, VR::PN, &patient_id);
    put_str(&mut out, tags::PATIENT_BIRTH_DATE, VR::DA, FIXED_BIRTH_DATE);
    put_str(&mut out, tags::PATIENT_SEX, VR::CS, &sex);
    put_str(&mut out, tags::PATIENT_AGE, VR::AS, &age);
    put_str(&mut out, tags::STUDY_ID, VR::SH, &study_id);
    put_str(&mut out, tags::ACCESSION_NUMBER, VR::SH, &study_id);
    put_str(&mut out, tags::STUDY_INSTANCE_UID, VR::UI, &study_uid);
    put_str(&mut out, tags::SERIES_INSTANCE_UID, VR::UI, &series_uid);
    put_str(&mut out, tags::SOP_INSTANCE_UID, VR::UI, &sop_uid);
    out.put(DataElement::new(
        tags::PROTOCOL_NAME,
        VR::LO,
        PrimitiveValue::Empty,
    ));
    for tag in [
        tags::STUDY_DATE,
        tags::SERIES_DATE,
        tags::CONTENT_DATE,
        tags::ACQUISITION_DATE,
    ] {
        put_str(&mut out, tag, VR::DA, FIXED_DATE);
    }
    for tag in [
        tags::STUDY_TIME,
        tags::SERIES_TIME,
        tags::CONTENT_TIME,
        tags::ACQUISITION_TIME,
    ] {
        put_str(&mut out, tag, VR::TM, FIXED_TIME);
    }

    // Keep the source framing; fall back to the documented default when the
    // source meta carries no transfer syntax. The media storage instance UID
    // must match the remapped SOP instance UID.
    let meta = src.meta();
    let transfer_syntax = {
        let ts = meta.transfer_syntax();
        if ts.is_empty() {
            uids::EXPLICIT_VR_LITTLE_ENDIAN
        } else {
            ts
        }
    };
    let meta_builder = FileMetaTableBuilder::new()
        .transfer_syntax(transfer_syntax)
        .media_storage_sop_class_uid(meta.media_storage_sop_class_uid.trim_end_matches('\0'))
        .media_storage_sop_instance_uid(sop_uid.as_str());

    let file_obj = match out.with_meta(meta_builder) {
        Ok(obj) => obj,
        Err(err) => {
            warn!("no usable file meta for {source_path}: {err}");
            return false;
        }
    };

    let out_dir = output_root.join(&study_id);
    if let Err(err) = fs::create_dir_all(&out_dir) {
        warn!("failed to create {}: {err}", out_dir.display());
        return false;
    }
    let out_path = out_dir.join(format!("{sop_uid}.dcm"));
    match file_obj.write_to_file(&out_path) {
        Ok(()) => true,
        Err(err) => {
            warn!("failed to write {}: {err}", out_path.display());
            false
        }
    }
}

fn put_str(obj: &mut InMemDicomObject, tag: Tag, vr: VR, value: &str) {
    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
}

/// Surrogate patient/study numbers are written zero-padded to six digits,
/// like `000042`.
fn zero_pad(value: &str) -> String {
    format!("{value:0>6}")
}
