/// HIPAA-safe handling of the DICOM PatientAge value ("NNNY" and friends).
///
/// Ages above 89 identify a patient under HIPAA safe harbor, so anything
/// older is reported as 90.
const HIPAA_MAX_AGE: u32 = 89;

/// Parse an age string of the form `"NNL"` into years.
///
/// A trailing `Y` (any case) is stripped; any other trailing letter makes the
/// value unusable and yields 0. A value with no trailing letter is taken to
/// already be in years. Unparseable digits also yield 0 rather than failing
/// the record.
pub fn age_in_years(age: &str) -> u32 {
    let age = age.trim();
    let Some(last) = age.chars().last() else {
        return 0;
    };

    let digits = if last.is_alphabetic() {
        if !last.eq_ignore_ascii_case(&'Y') {
            return 0;
        }
        &age[..age.len() - 1]
    } else {
        age
    };

    digits.parse().unwrap_or(0)
}

/// Normalize an age string to a HIPAA-compliant `"NNY"` value, capping
/// anything above 89 years at 90.
pub fn safe_age(age: &str) -> String {
    let years = age_in_years(age).min(HIPAA_MAX_AGE + 1);
    format!("{years}Y")
}
