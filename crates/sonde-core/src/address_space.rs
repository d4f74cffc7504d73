//! # Address Spaces
//!
//! The uniform read contract over "some process's memory".
//!
//! Two implementations exist: the live backend
//! ([`LinuxProcess`](crate::platform::linux::LinuxProcess)) and the frozen one
//! ([`Snapshot`](crate::snapshot::Snapshot)). Code that only reads, such as
//! the location evaluator, the stack walker and the heap-table decoder, takes
//! `&dyn AddressSpace` and never learns which one it holds.
//!
//! ## Guarantees
//!
//! - A read touching any byte outside a known region fails with
//!   [`SondeError::NotMapped`]; it never panics and never returns partial data.
//! - Reads on a frozen space are idempotent.
//! - Reads on a live space are only stable while the process is stopped.

use crate::error::{SondeError, SondeResult};
use crate::remote::{Opaque, Pointee, Remote, RemoteAddress, RemoteValue};
use crate::types::{Address, Architecture, Endianness};

/// Largest piece [`AddressSpace::read_bytes`] allocates before reading it.
pub const READ_CHUNK: u64 = 1 << 20;

/// Read access to the memory of one target.
pub trait AddressSpace
{
    /// Fill `buffer` with the bytes at `address`.
    fn read_into(&self, address: Address, buffer: &mut [u8]) -> SondeResult<()>;

    /// Read `len` bytes at `address`.
    ///
    /// `len` often comes from target memory (heap records, DWARF sizes), so the
    /// buffer grows one chunk at a time as reads succeed. A bogus length fails
    /// at its first unmapped chunk with `NotMapped` instead of being allocated
    /// up front.
    fn read_bytes(&self, address: Address, len: u64) -> SondeResult<Vec<u8>>
    {
        let not_mapped = || SondeError::NotMapped { address, len };
        if address.checked_add(len).is_none() {
            return Err(not_mapped());
        }

        let mut buffer = Vec::new();
        let mut done = 0u64;
        while done < len {
            let take = (len - done).min(READ_CHUNK) as usize;
            buffer.try_reserve(take).map_err(|_| not_mapped())?;
            let start = buffer.len();
            buffer.resize(start + take, 0);
            self.read_into(address + done, &mut buffer[start..]).map_err(|error| match error {
                SondeError::NotMapped { .. } => not_mapped(),
                other => other,
            })?;
            done += take as u64;
        }
        Ok(buffer)
    }

    /// Runtime address of a named global object or function.
    fn resolve_symbol(&self, name: &str) -> SondeResult<RemoteAddress<Opaque>>;

    fn architecture(&self) -> Architecture;

    fn endianness(&self) -> Endianness
    {
        Endianness::native()
    }
}

/// Typed helpers available on every [`AddressSpace`], including trait objects.
pub trait AddressSpaceExt: AddressSpace
{
    /// Read one `T` at `address`.
    fn read_typed<T: Pointee>(&self, address: RemoteAddress<T>) -> SondeResult<RemoteValue<T>>
    {
        let bytes = self.read_bytes(address.address(), T::REMOTE_SIZE)?;
        Ok(RemoteValue::new(address, bytes, self.endianness()))
    }

    /// Read and decode one `T`.
    fn read_value<T: Remote>(&self, address: RemoteAddress<T>) -> SondeResult<T>
    {
        self.read_typed(address)?.get().ok_or(SondeError::NotMapped {
            address: address.address(),
            len: T::REMOTE_SIZE,
        })
    }

    fn read_u64(&self, address: Address) -> SondeResult<u64>
    {
        self.read_value(RemoteAddress::<u64>::new(address))
    }

    /// Read a pointer-sized word and treat it as an address.
    fn read_pointer(&self, address: Address) -> SondeResult<Address>
    {
        self.read_u64(address).map(Address::from)
    }

    /// Read a NUL-terminated string of at most `max` bytes.
    ///
    /// Reads in small chunks that never cross a 64-byte boundary, so a string
    /// ending just before an unmapped page is still readable.
    fn read_c_string(&self, address: Address, max: usize) -> SondeResult<String>
    {
        const CHUNK: u64 = 64;

        let mut bytes = Vec::new();
        let mut cursor = address;
        while bytes.len() < max {
            let to_boundary = CHUNK - (cursor.value() % CHUNK);
            let want = to_boundary.min((max - bytes.len()) as u64);
            let chunk = self.read_bytes(cursor, want)?;
            if let Some(end) = chunk.iter().position(|byte| *byte == 0) {
                bytes.extend_from_slice(&chunk[..end]);
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            bytes.extend_from_slice(&chunk);
            cursor = cursor + want;
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl<S: AddressSpace + ?Sized> AddressSpaceExt for S {}

/// Read a typed global through its symbol name.
///
/// ```rust,no_run
/// use sonde_core::address_space::{read_global, AddressSpace};
///
/// fn counter(space: &dyn AddressSpace) -> sonde_core::error::SondeResult<u64>
/// {
///     read_global::<u64>(space, "COUNTER")
/// }
/// ```
pub fn read_global<T: Remote>(space: &dyn AddressSpace, name: &str) -> SondeResult<T>
{
    let address = space.resolve_symbol(name)?.cast::<T>();
    space.read_value(address)
}
