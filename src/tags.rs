use dicom_core::dictionary::DataDictionary;
use dicom_core::Tag;
use dicom_dictionary_std::StandardDataDictionary;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TagError {
    #[error("{0} is not a known DICOM tag name")]
    UnknownTag(String),
}

/// Tags read during extraction. These carry the identifiers and demographic
/// values the mapper and rewriter need; the extracted table is also the audit
/// trail of what each record originally contained.
pub const PHI_TAGS: [&str; 15] = [
    "PatientID",
    "PatientName",
    "PatientBirthDate",
    "PatientSex",
    "PatientAge",
    "ReferringPhysicianName",
    "StudyID",
    "AccessionNumber",
    "DeviceSerialNumber",
    "StudyInstanceUID",
    "StudyDate",
    "StudyTime",
    "SeriesInstanceUID",
    "SOPInstanceUID",
    "ProtocolName",
];

/// Default allow list: acquisition and pixel-description tags for CT with no
/// identifying content. Adjust when working with other modalities.
pub const DEFAULT_ALLOW_LIST: [&str; 41] = [
    "PixelData",
    "SeriesNumber",
    "AcquisitionNumber",
    "InstanceNumber",
    "Modality",
    "Manufacturer",
    "SliceThickness",
    "SpacingBetweenSlices",
    "KVP",
    "DataCollectionDiameter",
    "SoftwareVersions",
    "ReconstructionDiameter",
    "GantryDetectorTilt",
    "TableHeight",
    "RotationDirection",
    "ExposureTime",
    "XRayTubeCurrent",
    "Exposure",
    "FilterType",
    "GeneratorPower",
    "FocalSpots",
    "ConvolutionKernel",
    "PatientPosition",
    "SliceLocation",
    "ImagePositionPatient",
    "ImageOrientationPatient",
    "SamplesPerPixel",
    "PhotometricInterpretation",
    "Rows",
    "Columns",
    "PixelSpacing",
    "BitsAllocated",
    "BitsStored",
    "HighBit",
    "PixelRepresentation",
    "WindowCenter",
    "WindowWidth",
    "RescaleIntercept",
    "RescaleSlope",
    "SOPClassUID",
    "SpecificCharacterSet",
];

/// Resolve a tag given by keyword (e.g. `StudyInstanceUID`), `(gggg,eeee)`
/// notation or bare hex (`0020000D`) to its [`Tag`].
pub fn resolve_tag(name: &str) -> Result<Tag, TagError> {
    if let Some(tag) = StandardDataDictionary.parse_tag(name) {
        return Ok(tag);
    }

    // Bare 8-digit hex without parentheses is not covered by the dictionary
    // parser.
    if name.len() == 8 {
        if let (Ok(group), Ok(element)) = (
            u16::from_str_radix(&name[0..4], 16),
            u16::from_str_radix(&name[4..8], 16),
        ) {
            return Ok(Tag(group, element));
        }
    }

    Err(TagError::UnknownTag(name.to_string()))
}

/// Resolve a whole list of tag names, failing fast on the first unknown name.
/// A typo in a configured tag list is a run-level error, not something to
/// tolerate per record.
pub fn resolve_tags(names: &[String]) -> Result<Vec<(String, Tag)>, TagError> {
    names
        .iter()
        .map(|name| resolve_tag(name).map(|tag| (name.clone(), tag)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_dictionary_std::tags;

    #[test]
    fn test_resolve_tag_by_keyword() {
        assert_eq!(
            resolve_tag("StudyInstanceUID").unwrap(),
            tags::STUDY_INSTANCE_UID
        );
        assert_eq!(resolve_tag("PatientID").unwrap(), tags::PATIENT_ID);
    }

    #[test]
    fn test_resolve_tag_by_hex() {
        assert_eq!(resolve_tag("0020000D").unwrap(), tags::STUDY_INSTANCE_UID);
    }

    #[test]
    fn test_resolve_tag_by_group_element() {
        assert_eq!(
            resolve_tag("(0008,0018)").unwrap(),
            tags::SOP_INSTANCE_UID
        );
    }

    #[test]
    fn test_resolve_tag_unknown() {
        assert_eq!(
            resolve_tag("NotARealTagName"),
            Err(TagError::UnknownTag("NotARealTagName".to_string()))
        );
    }

    #[test]
    fn test_resolve_tags_fails_fast() {
        let names = vec!["PatientID".to_string(), "Bogus".to_string()];
        assert!(resolve_tags(&names).is_err());
    }

    #[test]
    fn test_phi_tags_all_resolve() {
        for name in PHI_TAGS {
            assert!(resolve_tag(name).is_ok(), "{name} should resolve");
        }
    }

    #[test]
    fn test_default_allow_list_all_resolve() {
        for name in DEFAULT_ALLOW_LIST {
            assert!(resolve_tag(name).is_ok(), "{name} should resolve");
        }
    }
}
