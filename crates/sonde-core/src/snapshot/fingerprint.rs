//! State fingerprints.
//!
//! SHA-256 over every fingerprinted region as `(start, length, bytes)` in
//! address order, followed by the `(address, size)` list of live heap blocks.
//! The heap table image and registers are left out: generation counters and
//! scratch registers differ between states that behave the same.

use std::fmt;

use sha2::{Digest, Sha256};

use super::{Region, RegionKind};
use crate::types::Address;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint
{
    pub(crate) fn compute<'a>(regions: impl IntoIterator<Item = &'a Region>, heap_shape: &[(Address, u64)]) -> Self
    {
        let mut hasher = Sha256::new();
        for region in regions {
            if !region.kind.is_fingerprinted() {
                continue;
            }
            hasher.update(region.start.value().to_le_bytes());
            hasher.update((region.bytes.len() as u64).to_le_bytes());
            hasher.update(&region.bytes);
        }
        hasher.update(b"heap");
        hasher.update((heap_shape.len() as u64).to_le_bytes());
        for (address, size) in heap_shape {
            hasher.update(address.value().to_le_bytes());
            hasher.update(size.to_le_bytes());
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        Fingerprint(digest)
    }

    pub fn as_bytes(&self) -> &[u8; 32]
    {
        &self.0
    }

    /// First 8 bytes, for logs.
    pub fn short(&self) -> u64
    {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(head)
    }
}

impl fmt::Display for Fingerprint
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "Fingerprint({:016x})", self.short())
    }
}

impl RegionKind
{
    /// Whether this kind contributes its bytes to the fingerprint.
    pub const fn is_fingerprinted(self) -> bool
    {
        !matches!(self, RegionKind::HeapTable)
    }
}
