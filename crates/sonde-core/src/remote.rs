//! # Remote Addresses and Values
//!
//! Typed handles onto memory of another address space.
//!
//! A [`RemoteAddress<T>`] names "a `T` over there". It is never dereferenced
//! with local memory operations; reading it always goes through an
//! [`AddressSpace`]. Arithmetic on it scales by [`Pointee::REMOTE_SIZE`], the
//! size of `T` *in the target*, which does not have to match
//! `size_of::<T>()` in the checker.
//!
//! A [`RemoteValue<T>`] is the result of such a read: the raw bytes plus the
//! byte order they came in and, for aggregates, the debug-info type that
//! describes them. Primitive values decode straight into local values with
//! [`RemoteValue::get`]; structures, unions and arrays stay a blob until the
//! caller walks them through a [`TypeGraph`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Add, Sub};

use crate::address_space::AddressSpace;
use crate::debuginfo::{TypeGraph, TypeId, TypeKind};
use crate::error::{SondeError, SondeResult};
use crate::types::{Address, Endianness};

/// Anything a [`RemoteAddress`] can point at.
pub trait Pointee
{
    /// Size in bytes of one element in the target address space.
    const REMOTE_SIZE: u64;
}

/// A pointee that can be decoded into a local value.
pub trait Remote: Pointee + Sized
{
    /// Decode from exactly `REMOTE_SIZE` bytes, `None` if `bytes` is too short.
    fn decode(bytes: &[u8], endianness: Endianness) -> Option<Self>;
}

/// Untyped pointee; arithmetic moves by single bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opaque {}

impl Pointee for Opaque
{
    const REMOTE_SIZE: u64 = 1;
}

macro_rules! remote_integer {
    ($($ty:ty),*) => {
        $(
            impl Pointee for $ty
            {
                const REMOTE_SIZE: u64 = std::mem::size_of::<$ty>() as u64;
            }

            impl Remote for $ty
            {
                fn decode(bytes: &[u8], endianness: Endianness) -> Option<Self>
                {
                    let raw: [u8; std::mem::size_of::<$ty>()] = bytes.get(..std::mem::size_of::<$ty>())?.try_into().ok()?;
                    Some(match endianness {
                        Endianness::Little => <$ty>::from_le_bytes(raw),
                        Endianness::Big => <$ty>::from_be_bytes(raw),
                    })
                }
            }
        )*
    };
}

remote_integer!(u8, u16, u32, u64, i8, i16, i32, i64);

impl Pointee for bool
{
    const REMOTE_SIZE: u64 = 1;
}

impl Remote for bool
{
    fn decode(bytes: &[u8], _endianness: Endianness) -> Option<Self>
    {
        bytes.first().map(|byte| *byte != 0)
    }
}

impl Pointee for Address
{
    const REMOTE_SIZE: u64 = 8;
}

impl Remote for Address
{
    fn decode(bytes: &[u8], endianness: Endianness) -> Option<Self>
    {
        u64::decode(bytes, endianness).map(Address::from)
    }
}

impl<T: Pointee> Pointee for RemoteAddress<T>
{
    const REMOTE_SIZE: u64 = 8;
}

impl<T: Pointee> Remote for RemoteAddress<T>
{
    fn decode(bytes: &[u8], endianness: Endianness) -> Option<Self>
    {
        Address::decode(bytes, endianness).map(RemoteAddress::new)
    }
}

/// Address of a `T` inside some [`AddressSpace`]
///
/// ```rust
/// use sonde_core::remote::RemoteAddress;
/// use sonde_core::types::Address;
///
/// let words = RemoteAddress::<u32>::new(Address::from(0x1000));
/// assert_eq!((words + 3).address(), Address::from(0x100c));
/// assert_eq!((words + 3 - 1).address(), Address::from(0x1008));
/// ```
pub struct RemoteAddress<T: Pointee = Opaque>
{
    address: Address,
    _pointee: PhantomData<fn() -> T>,
}

impl<T: Pointee> RemoteAddress<T>
{
    pub const fn new(address: Address) -> Self
    {
        Self {
            address,
            _pointee: PhantomData,
        }
    }

    pub const fn null() -> Self
    {
        Self::new(Address::ZERO)
    }

    pub const fn address(self) -> Address
    {
        self.address
    }

    pub const fn is_null(self) -> bool
    {
        self.address.is_null()
    }

    /// Address of element `index`, scaled by the remote element size.
    pub fn element(self, index: u64) -> Self
    {
        self + index
    }

    /// Address of element `index` for elements whose size is only known at run
    /// time (for instance from a [`TypeGraph`]).
    pub fn element_with_stride(self, index: u64, stride: u64) -> Self
    {
        Self::new(self.address + index.wrapping_mul(stride))
    }

    /// Move by raw bytes, ignoring the element size.
    pub fn offset_bytes(self, bytes: i64) -> Self
    {
        Self::new(self.address.offset(bytes))
    }

    /// Reinterpret as pointing at a different type.
    pub fn cast<U: Pointee>(self) -> RemoteAddress<U>
    {
        RemoteAddress::new(self.address)
    }

    /// Forget the pointee type.
    pub fn erase(self) -> RemoteAddress<Opaque>
    {
        self.cast()
    }
}

impl<T: Pointee> Add<u64> for RemoteAddress<T>
{
    type Output = Self;

    fn add(self, count: u64) -> Self
    {
        Self::new(self.address + count.wrapping_mul(T::REMOTE_SIZE))
    }
}

impl<T: Pointee> Sub<u64> for RemoteAddress<T>
{
    type Output = Self;

    fn sub(self, count: u64) -> Self
    {
        Self::new(self.address - count.wrapping_mul(T::REMOTE_SIZE))
    }
}

// Manual impls: derives would put bounds on `T` that `Opaque` and friends do
// not need to satisfy.
impl<T: Pointee> Clone for RemoteAddress<T>
{
    fn clone(&self) -> Self
    {
        *self
    }
}

impl<T: Pointee> Copy for RemoteAddress<T> {}

impl<T: Pointee> PartialEq for RemoteAddress<T>
{
    fn eq(&self, other: &Self) -> bool
    {
        self.address == other.address
    }
}

impl<T: Pointee> Eq for RemoteAddress<T> {}

impl<T: Pointee> Hash for RemoteAddress<T>
{
    fn hash<H: Hasher>(&self, state: &mut H)
    {
        self.address.hash(state);
    }
}

impl<T: Pointee> fmt::Debug for RemoteAddress<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "RemoteAddress<{}>({})", std::any::type_name::<T>(), self.address)
    }
}

impl<T: Pointee> From<Address> for RemoteAddress<T>
{
    fn from(address: Address) -> Self
    {
        Self::new(address)
    }
}

/// Bytes of a `T` read out of an address space.
pub struct RemoteValue<T: Pointee = Opaque>
{
    address: RemoteAddress<T>,
    bytes: Vec<u8>,
    endianness: Endianness,
    ty: Option<TypeId>,
}

impl<T: Pointee> RemoteValue<T>
{
    pub fn new(address: RemoteAddress<T>, bytes: Vec<u8>, endianness: Endianness) -> Self
    {
        Self {
            address,
            bytes,
            endianness,
            ty: None,
        }
    }

    /// Attach the debug-info type describing these bytes.
    pub fn with_type(mut self, ty: TypeId) -> Self
    {
        self.ty = Some(ty);
        self
    }

    pub fn address(&self) -> RemoteAddress<T>
    {
        self.address
    }

    pub fn bytes(&self) -> &[u8]
    {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8>
    {
        self.bytes
    }

    pub fn endianness(&self) -> Endianness
    {
        self.endianness
    }

    pub fn type_id(&self) -> Option<TypeId>
    {
        self.ty
    }

    /// Forget the local type, keeping bytes and debug-info type.
    pub fn erase(self) -> RemoteValue<Opaque>
    {
        RemoteValue {
            address: self.address.erase(),
            bytes: self.bytes,
            endianness: self.endianness,
            ty: self.ty,
        }
    }

    /// Named member of a structure or union.
    ///
    /// Typedefs and qualifiers on the value's type are looked through.
    pub fn field(&self, name: &str, types: &TypeGraph) -> SondeResult<RemoteValue<Opaque>>
    {
        let ty = self.require_type()?;
        let member = types
            .member(ty, name)
            .ok_or_else(|| SondeError::NotFound(format!("member `{name}` of type {ty}")))?;
        let size = match member.ty {
            Some(member_ty) => types.byte_size(member_ty).unwrap_or(0),
            None => 0,
        };
        let mut value = self.slice(member.offset, size)?;
        value.ty = member.ty;
        Ok(value)
    }

    /// Element `index` of an array value.
    pub fn element(&self, index: u64, types: &TypeGraph) -> SondeResult<RemoteValue<Opaque>>
    {
        let ty = self.require_type()?;
        let node = types
            .resolve(ty)
            .ok_or_else(|| SondeError::NotFound(format!("type {ty}")))?;
        let TypeKind::Array { element, count } = &node.kind else {
            return Err(SondeError::InvalidArgument(format!("type {ty} is not an array")));
        };
        if let Some(count) = count {
            if index >= *count {
                return Err(SondeError::InvalidArgument(format!(
                    "index {index} out of bounds for array of {count}"
                )));
            }
        }
        let element = element.ok_or_else(|| SondeError::NotFound(format!("element type of {ty}")))?;
        let stride = types
            .byte_size(element)
            .ok_or_else(|| SondeError::NotFound(format!("size of type {element}")))?;
        let mut value = self.slice(index.wrapping_mul(stride), stride)?;
        value.ty = Some(element);
        Ok(value)
    }

    /// Follow a pointer or reference value and read its pointee.
    pub fn deref_pointer(&self, types: &TypeGraph, space: &dyn AddressSpace) -> SondeResult<RemoteValue<Opaque>>
    {
        let ty = self.require_type()?;
        let node = types
            .resolve(ty)
            .ok_or_else(|| SondeError::NotFound(format!("type {ty}")))?;
        let pointee = match &node.kind {
            TypeKind::Pointer { pointee } | TypeKind::Reference { pointee } => *pointee,
            _ => return Err(SondeError::InvalidArgument(format!("type {ty} is not a pointer"))),
        };
        let target = self
            .endianness
            .read_uint(self.bytes.get(..8).unwrap_or(&self.bytes))
            .map(Address::from)
            .ok_or_else(|| SondeError::InvalidArgument("pointer value is truncated".into()))?;
        if target.is_null() {
            return Err(SondeError::InvalidArgument("null pointer dereference".into()));
        }
        let pointee = pointee.ok_or_else(|| SondeError::InvalidArgument("cannot dereference a void pointer".into()))?;
        let size = types
            .byte_size(pointee)
            .ok_or_else(|| SondeError::NotFound(format!("size of type {pointee}")))?;
        let bytes = space.read_bytes(target, size)?;
        Ok(RemoteValue::new(RemoteAddress::new(target), bytes, space.endianness()).with_type(pointee))
    }

    fn require_type(&self) -> SondeResult<TypeId>
    {
        self.ty
            .ok_or_else(|| SondeError::InvalidArgument("value carries no debug type".into()))
    }

    fn slice(&self, offset: u64, len: u64) -> SondeResult<RemoteValue<Opaque>>
    {
        let start = usize::try_from(offset).map_err(|_| SondeError::InvalidArgument("offset too large".into()))?;
        let end = start
            .checked_add(usize::try_from(len).map_err(|_| SondeError::InvalidArgument("length too large".into()))?)
            .ok_or_else(|| SondeError::InvalidArgument("range overflows".into()))?;
        let bytes = self.bytes.get(start..end).ok_or_else(|| {
            SondeError::InvalidArgument(format!("range {start}..{end} outside value of {} bytes", self.bytes.len()))
        })?;
        Ok(RemoteValue {
            address: self.address.erase().offset_bytes(offset as i64),
            bytes: bytes.to_vec(),
            endianness: self.endianness,
            ty: None,
        })
    }
}

impl<T: Remote> RemoteValue<T>
{
    /// Decode into the local representation.
    pub fn get(&self) -> Option<T>
    {
        T::decode(&self.bytes, self.endianness)
    }
}

impl<T: Pointee> Clone for RemoteValue<T>
{
    fn clone(&self) -> Self
    {
        Self {
            address: self.address,
            bytes: self.bytes.clone(),
            endianness: self.endianness,
            ty: self.ty,
        }
    }
}

impl<T: Pointee> fmt::Debug for RemoteValue<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("RemoteValue")
            .field("address", &self.address)
            .field("len", &self.bytes.len())
            .field("type", &self.ty)
            .finish()
    }
}
