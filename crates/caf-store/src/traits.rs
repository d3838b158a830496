use caf_types::Digest;

/// A value whose identity is a digest derived from its own fields.
///
/// Implementations must be pure: no I/O, and equal field values always
/// yield equal digests.
pub trait ContentAddressed {
    /// Compute the digest this value is stored under.
    fn compute_digest(&self) -> Digest;
}
