//! Remote memory address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Address inside some target address space
///
/// A plain `u64` wrapper. It carries no type and no guarantee that anything is
/// mapped there; see [`RemoteAddress`](crate::remote::RemoteAddress) for the
/// typed variant.
///
/// `+` and `-` wrap, matching how the target's own arithmetic behaves. Use the
/// `checked_*` helpers where overflow means a bug.
///
/// ## Example
///
/// ```rust
/// use sonde_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// let next_addr = addr + 0x100;
/// assert_eq!(next_addr.value(), 0x1100);
/// assert_eq!(next_addr.distance_from(addr), Some(0x100));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value (usable in const contexts)
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Raw `u64` value
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// `true` for the null address
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Add an offset, `None` on overflow
    ///
    /// ```rust
    /// use sonde_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None);
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset, `None` on underflow
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Add an offset, saturating at `u64::MAX`
    pub fn saturating_add(self, offset: u64) -> Self
    {
        Address(self.0.saturating_add(offset))
    }

    /// Apply a signed displacement with wraparound.
    pub fn offset(self, displacement: i64) -> Self
    {
        Address(self.0.wrapping_add_signed(displacement))
    }

    /// Bytes from `base` up to `self`, `None` if `self` is below `base`.
    pub fn distance_from(self, base: Address) -> Option<u64>
    {
        self.0.checked_sub(base.0)
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
