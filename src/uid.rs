use crate::config::UidRoot;
use crate::hashing::{Blake3Hasher, Hasher, Result};

// DICOM UI values are limited to 64 characters.
const UID_MAX_LENGTH: usize = 64;

/// Deterministic surrogate UID generator.
///
/// The surrogate is a pure function of the source UID: the digest of the
/// source value rendered as a decimal number under the configured UID root.
/// Equal source UIDs therefore always map to the same surrogate, and distinct
/// source UIDs never collide, which is what keeps the patient/study/series/
/// instance hierarchy intact after remapping.
pub(crate) struct UidSurrogate<'a, H>
where
    H: Hasher,
{
    hasher: &'a H,
    uid_root: &'a UidRoot,
}

impl<'a, H> UidSurrogate<'a, H>
where
    H: Hasher,
{
    pub(crate) fn new(hasher: &'a H, uid_root: &'a UidRoot) -> Self {
        Self { hasher, uid_root }
    }

    pub(crate) fn generate(&self, uid: &str) -> Result<String> {
        let digest = self.hasher.hash(uid)?;
        // A UID component must not start with 0 unless it is exactly "0".
        let extra = if digest.starts_with('0') { "9" } else { "" };
        let new_uid = format!("{}{}{}", self.uid_root.as_prefix(), extra, digest);
        Ok(truncate_to(UID_MAX_LENGTH, &new_uid))
    }
}

/// Generate a surrogate UID for `uid` under `uid_root` using the default
/// digest function.
pub(crate) fn surrogate_uid(uid_root: &UidRoot, uid: &str) -> Result<String> {
    let hasher = Blake3Hasher::new();
    UidSurrogate::new(&hasher, uid_root).generate(uid)
}

fn truncate_to(n: usize, s: &str) -> String {
    s.chars().take(n).collect()
}
