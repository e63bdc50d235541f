use std::collections::HashSet;
use std::fs;
use std::path::Path;

use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::meta::FileMetaTableBuilder;
use dicom_object::open_file;
use dicom_object::InMemDicomObject;
use tempfile::TempDir;

use dicom_deident::config::{ConfigBuilder, ExtractOptions};
use dicom_deident::table::CellValue;
use dicom_deident::tags::{resolve_tag, DEFAULT_ALLOW_LIST, PHI_TAGS};
use dicom_deident::{extract, mapping, rewrite, Deidentifier};

struct Instance<'a> {
    patient_id: &'a str,
    study_uid: &'a str,
    series_uid: &'a str,
    sop_uid: &'a str,
    sex: Option<&'a str>,
    age: Option<&'a str>,
}

fn write_instance(path: &Path, instance: &Instance<'_>) {
    let mut obj = InMemDicomObject::new_empty();
    let mut put = |tag: Tag, vr: VR, value: &str| {
        obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
    };

    put(tags::PATIENT_ID, VR::LO, instance.patient_id);
    put(tags::PATIENT_NAME, VR::PN, "Doe^John");
    put(tags::PATIENT_BIRTH_DATE, VR::DA, "19700101");
    if let Some(sex) = instance.sex {
        put(tags::PATIENT_SEX, VR::CS, sex);
    }
    if let Some(age) = instance.age {
        put(tags::PATIENT_AGE, VR::AS, age);
    }
    put(tags::REFERRING_PHYSICIAN_NAME, VR::PN, "Smith^Alice");
    put(tags::STUDY_ID, VR::SH, "ST77");
    put(tags::ACCESSION_NUMBER, VR::SH, "ACC-42");
    put(tags::DEVICE_SERIAL_NUMBER, VR::LO, "SN-0099");
    put(tags::STUDY_INSTANCE_UID, VR::UI, instance.study_uid);
    put(tags::SERIES_INSTANCE_UID, VR::UI, instance.series_uid);
    put(tags::SOP_INSTANCE_UID, VR::UI, instance.sop_uid);
    put(tags::SOP_CLASS_UID, VR::UI, uids::CT_IMAGE_STORAGE);
    put(tags::STUDY_DATE, VR::DA, "20240131");
    put(tags::STUDY_TIME, VR::TM, "101530");
    put(tags::PROTOCOL_NAME, VR::LO, "Chest Routine");
    put(tags::MODALITY, VR::CS, "CT");
    put(tags::INSTANCE_NUMBER, VR::IS, "1");
    put(tags::CONVOLUTION_KERNEL, VR::SH, "STANDARD");

    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file_obj = obj
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
                .media_storage_sop_instance_uid(instance.sop_uid),
        )
        .unwrap();
    file_obj.write_to_file(path).unwrap();
}

/// Three instances: two sharing study A (patient P1), one in study B
/// (patient P2, missing sex and age), plus one non-DICOM file.
fn populate_input(input: &Path) {
    write_instance(
        &input.join("a/file1.dcm"),
        &Instance {
            patient_id: "P1",
            study_uid: "1.2.3.1",
            series_uid: "1.2.3.1.1",
            sop_uid: "1.2.3.1.1.1",
            sex: Some("M"),
            age: Some("92Y"),
        },
    );
    write_instance(
        &input.join("a/file2.dcm"),
        &Instance {
            patient_id: "P1",
            study_uid: "1.2.3.1",
            series_uid: "1.2.3.1.1",
            sop_uid: "1.2.3.1.1.2",
            sex: Some("M"),
            age: Some("92Y"),
        },
    );
    write_instance(
        &input.join("b/file3.dcm"),
        &Instance {
            patient_id: "P2",
            study_uid: "1.2.3.2",
            series_uid: "1.2.3.2.1",
            sop_uid: "1.2.3.2.1.1",
            sex: None,
            age: None,
        },
    );
    fs::write(input.join("notes.txt"), "not a dicom file").unwrap();
}

fn run_pipeline(input: &Path, output: &Path) -> dicom_deident::DeidentOutcome {
    let config = ConfigBuilder::new()
        .uid_root("1.2.840.12345".parse().unwrap())
        .max_workers(2)
        .build();
    Deidentifier::new(config).run(input, output).unwrap()
}

#[test]
fn deident_writes_remapped_tree_and_audit_table() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    populate_input(&input);

    let outcome = run_pipeline(&input, &output);

    // The text file is skipped; all three DICOM files survive.
    assert_eq!(outcome.table.len(), 3);
    assert_eq!(outcome.written, 3);
    assert_eq!(outcome.last_patient, 3);
    assert_eq!(outcome.last_study, 3);

    // Rows are sorted by path, so study A comes first and gets counter 1.
    let study_ids: Vec<&str> = outcome
        .table
        .rows()
        .map(|r| r.get("fake_StudyID").unwrap().key())
        .collect();
    assert_eq!(study_ids, vec!["1", "1", "2"]);

    // Hierarchy preservation in the surrogate UID column.
    let fake_studies: Vec<&str> = outcome
        .table
        .rows()
        .map(|r| r.get("fake_StudyInstanceUID").unwrap().key())
        .collect();
    assert_eq!(fake_studies[0], fake_studies[1]);
    assert_ne!(fake_studies[0], fake_studies[2]);
    assert!(fake_studies[0].starts_with("1.2.840.12345."));

    // Injectivity of instance surrogates.
    let fake_sops: HashSet<&str> = outcome
        .table
        .rows()
        .map(|r| r.get("fake_SOPInstanceUID").unwrap().key())
        .collect();
    assert_eq!(fake_sops.len(), 3);

    // The output tree is organized by the new study id.
    for row in outcome.table.rows() {
        let study = format!("{:0>6}", row.get("fake_AccessionNumber").unwrap().key());
        let sop = row.get("fake_SOPInstanceUID").unwrap().key();
        let path = output.join(study).join(format!("{sop}.dcm"));
        assert!(path.is_file(), "missing {}", path.display());
    }
}

#[test]
fn output_records_carry_surrogates_and_fixed_values() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    populate_input(&input);

    let outcome = run_pipeline(&input, &output);

    let first = outcome.table.row(0);
    let sop = first.get("fake_SOPInstanceUID").unwrap().key();
    let path = output.join("000001").join(format!("{sop}.dcm"));
    let obj = open_file(&path).unwrap();

    let text = |tag: Tag| obj.element(tag).unwrap().to_str().unwrap().to_string();

    assert_eq!(text(tags::PATIENT_ID), "000001");
    assert_eq!(text(tags::PATIENT_NAME), "000001");
    assert_eq!(text(tags::PATIENT_BIRTH_DATE), "19190828");
    assert_eq!(text(tags::PATIENT_SEX), "M");
    // HIPAA cap: 92Y becomes 90Y.
    assert_eq!(text(tags::PATIENT_AGE), "90Y");
    assert_eq!(text(tags::STUDY_ID), "000001");
    assert_eq!(text(tags::ACCESSION_NUMBER), "000001");
    assert_eq!(text(tags::STUDY_DATE), "20250228");
    assert_eq!(text(tags::SERIES_DATE), "20250228");
    assert_eq!(text(tags::STUDY_TIME), "000000");
    assert_eq!(text(tags::CONTENT_TIME), "000000");
    assert_eq!(text(tags::PROTOCOL_NAME), "");
    assert_eq!(
        text(tags::STUDY_INSTANCE_UID),
        first.get("fake_StudyInstanceUID").unwrap().key()
    );
    assert_eq!(text(tags::SOP_INSTANCE_UID), sop);

    // Allow-listed acquisition context survives.
    assert_eq!(text(tags::MODALITY), "CT");
    assert_eq!(text(tags::CONVOLUTION_KERNEL), "STANDARD");

    // The file meta must reference the remapped instance UID.
    assert_eq!(
        obj.meta().media_storage_sop_instance_uid.trim_end_matches('\0'),
        sop
    );
}

#[test]
fn output_records_contain_only_allowed_and_overwritten_tags() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    populate_input(&input);

    let outcome = run_pipeline(&input, &output);

    let mut allowed: HashSet<Tag> = DEFAULT_ALLOW_LIST
        .iter()
        .map(|name| resolve_tag(name).unwrap())
        .collect();
    allowed.extend([
        tags::PATIENT_ID,
        tags::PATIENT_NAME,
        tags::PATIENT_BIRTH_DATE,
        tags::PATIENT_SEX,
        tags::PATIENT_AGE,
        tags::STUDY_ID,
        tags::ACCESSION_NUMBER,
        tags::STUDY_INSTANCE_UID,
        tags::SERIES_INSTANCE_UID,
        tags::SOP_INSTANCE_UID,
        tags::PROTOCOL_NAME,
        tags::STUDY_DATE,
        tags::SERIES_DATE,
        tags::CONTENT_DATE,
        tags::ACQUISITION_DATE,
        tags::STUDY_TIME,
        tags::SERIES_TIME,
        tags::CONTENT_TIME,
        tags::ACQUISITION_TIME,
    ]);

    for row in outcome.table.rows() {
        let study = format!("{:0>6}", row.get("fake_AccessionNumber").unwrap().key());
        let sop = row.get("fake_SOPInstanceUID").unwrap().key();
        let obj = open_file(output.join(study).join(format!("{sop}.dcm"))).unwrap();
        for elem in obj.iter() {
            let tag = elem.header().tag;
            assert!(allowed.contains(&tag), "unexpected tag {tag} leaked through");
        }
        // The identifying free-text tags must be gone entirely.
        assert!(obj.element(tags::REFERRING_PHYSICIAN_NAME).is_err());
        assert!(obj.element(tags::DEVICE_SERIAL_NUMBER).is_err());
    }
}

#[test]
fn missing_sex_and_age_get_safe_defaults() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    populate_input(&input);

    let outcome = run_pipeline(&input, &output);

    // Row 2 (b/file3.dcm) has neither PatientSex nor PatientAge.
    let row = outcome.table.row(2);
    assert_eq!(row.get("PatientSex").unwrap(), &CellValue::NotFound);

    let sop = row.get("fake_SOPInstanceUID").unwrap().key();
    let obj = open_file(output.join("000002").join(format!("{sop}.dcm"))).unwrap();
    assert_eq!(
        obj.element(tags::PATIENT_SEX).unwrap().to_str().unwrap(),
        "O"
    );
    assert_eq!(
        obj.element(tags::PATIENT_AGE).unwrap().to_str().unwrap(),
        "0Y"
    );
}

#[test]
fn extraction_reports_not_found_sentinel() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in");
    populate_input(&input);

    // SliceThickness is not written by the synthesizer above.
    let table = extract::extract(
        &input,
        &["PatientID".to_string(), "SliceThickness".to_string()],
        &ExtractOptions::default(),
    )
    .unwrap();

    assert_eq!(table.len(), 3);
    for row in table.rows() {
        assert!(row.get("PatientID").unwrap().is_found());
        let cell = row.get("SliceThickness").unwrap();
        assert_eq!(cell, &CellValue::NotFound);
        assert_eq!(cell.key(), "Not found");
        assert_eq!(cell.found(), None);
    }
}

#[test]
fn rewrite_skips_rows_whose_source_vanished() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    populate_input(&input);

    let phi_tags: Vec<String> = PHI_TAGS.iter().map(|s| s.to_string()).collect();
    let mut table = extract::extract(&input, &phi_tags, &ExtractOptions::default()).unwrap();
    mapping::map_identifiers(&mut table, &"1.2.840.12345".parse().unwrap(), 1, 1).unwrap();
    assert_eq!(table.len(), 3);

    // One source disappears between extraction and rewriting. Its row must be
    // skipped without aborting the rest of the batch.
    fs::remove_file(input.join("a/file2.dcm")).unwrap();

    let allow_list: Vec<String> = DEFAULT_ALLOW_LIST.iter().map(|s| s.to_string()).collect();
    let written = rewrite::rewrite(&table, &allow_list, &output).unwrap();

    // The shortfall is visible against the audit table, which keeps all rows.
    assert_eq!(written, 2);
    assert_eq!(table.len(), 3);

    // The surviving records made it to disk; the vanished one did not.
    for (index, expected) in [(0, true), (1, false), (2, true)] {
        let row = table.row(index);
        let study = format!("{:0>6}", row.get("fake_AccessionNumber").unwrap().key());
        let sop = row.get("fake_SOPInstanceUID").unwrap().key();
        let path = output.join(study).join(format!("{sop}.dcm"));
        assert_eq!(path.is_file(), expected, "unexpected state for {}", path.display());
    }
}

#[test]
fn reruns_assign_identical_surrogates_for_identical_input() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in");
    populate_input(&input);

    let out1 = dir.path().join("out1");
    let out2 = dir.path().join("out2");
    let first = run_pipeline(&input, &out1);
    let second = run_pipeline(&input, &out2);

    assert_eq!(first.table, second.table);
}
