//! # Inferior Processes
//!
//! The [`Inferior`] trait is what the snapshot manager needs from a live
//! backend on top of [`AddressSpace`]: writes, registers, stopping, and the
//! set of loaded images. Keeping it a trait lets another OS backend slot in
//! without touching capture, restore or the session code, and lets tests run
//! the snapshot manager against an in-memory fake.

use std::sync::Arc;

use crate::address_space::AddressSpace;
use crate::debuginfo::ObjectInformation;
use crate::error::{SondeError, SondeResult};
use crate::types::{Address, MemoryRegion, ProcessId, ProcessStatus, Registers};

/// An object image mapped into a process.
#[derive(Debug, Clone)]
pub struct LoadedImage
{
    /// Path as recorded by the dynamic linker
    pub name: String,
    /// Load bias: runtime address minus file address
    pub base: Address,
    pub info: Arc<ObjectInformation>,
}

impl LoadedImage
{
    pub fn new(name: impl Into<String>, base: Address, info: Arc<ObjectInformation>) -> Self
    {
        Self {
            name: name.into(),
            base,
            info,
        }
    }

    /// Runtime `[start, end)` spanned by the image's segments.
    pub fn runtime_range(&self) -> Option<(Address, Address)>
    {
        let (start, end) = self.info.address_range()?;
        Some((start + self.base.value(), end + self.base.value()))
    }

    pub fn contains(&self, address: Address) -> bool
    {
        self.runtime_range()
            .is_some_and(|(start, end)| address >= start && address < end)
    }

    /// Translate a runtime address into this image's file addresses.
    pub fn file_address(&self, address: Address) -> Address
    {
        address - self.base.value()
    }

    /// Runtime address of a symbol defined by this image.
    pub fn symbol_address(&self, name: &str) -> Option<Address>
    {
        self.info
            .symbol(name)
            .map(|symbol| symbol.address + self.base.value())
    }

    /// Writable ranges after relocation, at runtime addresses.
    pub fn writable_regions(&self) -> Vec<MemoryRegion>
    {
        self.info
            .writable_ranges()
            .into_iter()
            .map(|(start, end)| {
                MemoryRegion::new(
                    start + self.base.value(),
                    end + self.base.value(),
                    crate::types::Permissions {
                        read: true,
                        write: true,
                        execute: false,
                    },
                    Some(self.name.clone()),
                )
            })
            .collect()
    }
}

/// Loaded images of a process, main executable first.
#[derive(Debug, Clone, Default)]
pub struct ProcessLayout
{
    images: Vec<LoadedImage>,
}

impl ProcessLayout
{
    pub fn new(images: Vec<LoadedImage>) -> Self
    {
        Self { images }
    }

    pub fn images(&self) -> &[LoadedImage]
    {
        &self.images
    }

    pub fn main_image(&self) -> Option<&LoadedImage>
    {
        self.images.first()
    }

    pub fn image_for(&self, address: Address) -> Option<&LoadedImage>
    {
        self.images.iter().find(|image| image.contains(address))
    }

    pub fn image_named(&self, name: &str) -> Option<&LoadedImage>
    {
        self.images
            .iter()
            .find(|image| image.name == name || image.name.rsplit('/').next() == Some(name))
    }

    /// Runtime address of `name`, searched in load order.
    pub fn resolve_symbol(&self, name: &str) -> SondeResult<Address>
    {
        self.images
            .iter()
            .find_map(|image| image.symbol_address(name))
            .ok_or_else(|| SondeError::NotFound(format!("symbol `{name}`")))
    }

    /// Writable data of every image, sorted by address.
    pub fn writable_segments(&self) -> Vec<MemoryRegion>
    {
        let mut regions: Vec<MemoryRegion> = self.images.iter().flat_map(LoadedImage::writable_regions).collect();
        regions.sort_by_key(|region| region.start);
        regions
    }

    /// Check that `other` maps the same images at the same bases with the same
    /// writable regions. The error names the first difference.
    pub fn ensure_compatible(&self, other: &ProcessLayout) -> SondeResult<()>
    {
        if self.images.len() != other.images.len() {
            return Err(SondeError::LayoutMismatch(format!(
                "{} images captured, {} loaded now",
                self.images.len(),
                other.images.len()
            )));
        }
        for (ours, theirs) in self.images.iter().zip(&other.images) {
            if ours.name != theirs.name {
                return Err(SondeError::LayoutMismatch(format!("image `{}` replaced by `{}`", ours.name, theirs.name)));
            }
            if ours.base != theirs.base {
                return Err(SondeError::LayoutMismatch(format!(
                    "image `{}` moved from {} to {}",
                    ours.name, ours.base, theirs.base
                )));
            }
            let ours_regions: Vec<_> = ours.writable_regions().iter().map(|r| (r.start, r.end)).collect();
            let theirs_regions: Vec<_> = theirs.writable_regions().iter().map(|r| (r.start, r.end)).collect();
            if ours_regions != theirs_regions {
                return Err(SondeError::LayoutMismatch(format!("writable regions of `{}` differ", ours.name)));
            }
        }
        Ok(())
    }
}

/// A controllable process.
///
/// Reads come from [`AddressSpace`]. Every method that touches memory or
/// registers requires the process to be stopped; implementations fail with
/// [`SondeError::NotStopped`] otherwise and with
/// [`SondeError::ProcessGone`] once the process no longer exists.
pub trait Inferior: AddressSpace
{
    fn pid(&self) -> ProcessId;

    /// Last known status. Does not wait.
    fn status(&self) -> ProcessStatus;

    /// Stop the process if it is running and wait until it is.
    fn ensure_stopped(&mut self) -> SondeResult<()>;

    fn write_bytes(&mut self, address: Address, bytes: &[u8]) -> SondeResult<()>;

    fn registers(&self) -> SondeResult<Registers>;

    fn set_registers(&mut self, registers: &Registers) -> SondeResult<()>;

    /// Images currently loaded, read from the dynamic linker's bookkeeping.
    fn layout(&mut self) -> SondeResult<ProcessLayout>;

    /// Address of the heap-tracking table, if the process has one.
    fn heap_table_address(&self) -> Option<Address>;

    /// Mapping containing the stack pointer.
    fn stack_region(&self) -> SondeResult<Option<MemoryRegion>>;
}
