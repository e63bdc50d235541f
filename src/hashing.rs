use num_bigint::{BigInt, ParseBigIntError};
use num_traits::Num;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub(crate) enum Error {
    #[error("Invalid input: {}", .0.to_lowercase())]
    InvalidInput(String),
}

impl From<ParseBigIntError> for Error {
    fn from(err: ParseBigIntError) -> Self {
        Error::InvalidInput(format!("{err}"))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Digest function used to derive surrogate identifiers. The output must be a
/// decimal string so it can be embedded directly in a DICOM UID.
pub(crate) trait Hasher {
    fn hash(&self, input: &str) -> Result<String>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Blake3Hasher;

impl Blake3Hasher {
    pub(crate) fn new() -> Self {
        Self {}
    }
}

impl Hasher for Blake3Hasher {
    fn hash(&self, input: &str) -> Result<String> {
        let hash = blake3::hash(input.as_bytes());
        let hash_as_number = BigInt::from_str_radix(hash.to_hex().as_str(), 16)?;
        Ok(hash_as_number.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_is_decimal() {
        let hasher = Blake3Hasher::new();
        let result = hasher.hash("1.2.840.113619.2.1").unwrap();
        assert!(!result.is_empty());
        assert!(result.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_empty_input_still_hashes() {
        let hasher = Blake3Hasher::new();
        assert!(!hasher.hash("").unwrap().is_empty());
    }

    #[test]
    fn test_deterministic() {
        let hasher = Blake3Hasher::new();
        assert_eq!(hasher.hash("abc").unwrap(), hasher.hash("abc").unwrap());
    }

    #[test]
    fn test_distinct_inputs_yield_distinct_digests() {
        let hasher = Blake3Hasher::new();
        assert_ne!(
            hasher.hash("1.2.3.4").unwrap(),
            hasher.hash("1.2.3.5").unwrap()
        );
    }
}
