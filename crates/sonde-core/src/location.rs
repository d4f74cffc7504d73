//! # Location Expressions
//!
//! A small stack machine over DWARF location bytecode.
//!
//! [`LocationExpression::evaluate`] takes everything it needs from an
//! [`EvalContext`] (registers, frame base, CFA, an optional address space for
//! `DW_OP_deref`) and keeps no state between calls, so the same expression
//! works against a live process and a snapshot alike.
//!
//! ## Numeric model
//!
//! Stack entries are unsigned words of the target's address size. Arithmetic
//! wraps modulo 2^(8 * address_size). `div`, `shra` and the comparisons
//! reinterpret their operands as signed words, as DWARF defines them.
//!
//! ## Unsupported operations
//!
//! Pieces, TLS, entry values, typed stack entries and calls are not modelled.
//! They fail with [`SondeError::UnsupportedOperation`], as does any opcode
//! gimli cannot decode. That only aborts the one variable being resolved.

use std::sync::Arc;

use gimli::{EndianSlice, Encoding, Operation, RunTimeEndian};
use smallvec::SmallVec;

use crate::address_space::{AddressSpace, AddressSpaceExt};
use crate::error::{SondeError, SondeResult};
use crate::remote::{Opaque, RemoteAddress};
use crate::types::{Address, Endianness, Registers};

// Upper bound on executed operations; `DW_OP_bra` can loop.
const MAX_STEPS: usize = 10_000;

/// Where a variable lives, or what its value is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location
{
    /// In memory, at this address
    Address(RemoteAddress<Opaque>),
    /// Not in memory; this is the value itself (`DW_OP_stack_value`, `DW_OP_reg*`)
    Value(u64),
    /// Not in memory; these are the bytes of the value (`DW_OP_implicit_value`)
    Implicit(Vec<u8>),
}

impl Location
{
    /// Bytes of a `size`-byte object at this location.
    pub fn read(&self, space: &dyn AddressSpace, size: u64) -> SondeResult<Vec<u8>>
    {
        match self {
            Location::Address(address) => space.read_bytes(address.address(), size),
            Location::Value(value) => {
                check_value_size(size, 8)?;
                let mut bytes = space.endianness().write_uint(*value, size.min(8) as usize);
                bytes.resize(size as usize, 0);
                Ok(bytes)
            }
            Location::Implicit(bytes) => {
                check_value_size(size, bytes.len() as u64)?;
                let mut bytes = bytes.clone();
                bytes.resize(size as usize, 0);
                Ok(bytes)
            }
        }
    }

    pub fn address(&self) -> Option<Address>
    {
        match self {
            Location::Address(address) => Some(address.address()),
            _ => None,
        }
    }
}

/// Objects held outside memory are zero-padded up to this size at most.
const MAX_PADDED_VALUE: u64 = 64;

fn check_value_size(size: u64, available: u64) -> SondeResult<()>
{
    if size > available.max(MAX_PADDED_VALUE) {
        return Err(SondeError::UnsupportedOperation(format!(
            "{size}-byte object from a {available}-byte value"
        )));
    }
    Ok(())
}

/// Runtime inputs of an evaluation.
#[derive(Clone, Copy, Default)]
pub struct EvalContext<'a>
{
    /// Memory for `DW_OP_deref`; without it dereferences fail
    pub address_space: Option<&'a dyn AddressSpace>,
    pub registers: Option<&'a Registers>,
    /// Value of the enclosing frame's `DW_AT_frame_base`
    pub frame_base: Option<u64>,
    /// Canonical frame address of the current frame
    pub cfa: Option<u64>,
    /// Runtime program counter
    pub pc: Address,
    /// Runtime address minus file address of the object the expression belongs to
    pub load_bias: u64,
}

impl<'a> EvalContext<'a>
{
    pub fn new(pc: Address) -> Self
    {
        Self {
            pc,
            ..Self::default()
        }
    }

    pub fn with_address_space(mut self, space: &'a dyn AddressSpace) -> Self
    {
        self.address_space = Some(space);
        self
    }

    pub fn with_registers(mut self, registers: &'a Registers) -> Self
    {
        self.registers = Some(registers);
        self
    }

    pub fn with_frame_base(mut self, frame_base: u64) -> Self
    {
        self.frame_base = Some(frame_base);
        self
    }

    pub fn with_cfa(mut self, cfa: u64) -> Self
    {
        self.cfa = Some(cfa);
        self
    }

    pub fn with_load_bias(mut self, load_bias: u64) -> Self
    {
        self.load_bias = load_bias;
        self
    }

    /// Program counter as a file address of the owning object.
    pub fn file_pc(&self) -> Address
    {
        self.pc - self.load_bias
    }
}

/// One encoded location program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationExpression
{
    bytes: Arc<[u8]>,
    encoding: Encoding,
    endianness: Endianness,
}

impl LocationExpression
{
    pub fn new(bytes: impl Into<Arc<[u8]>>, encoding: Encoding, endianness: Endianness) -> Self
    {
        Self {
            bytes: bytes.into(),
            encoding,
            endianness,
        }
    }

    pub fn bytes(&self) -> &[u8]
    {
        &self.bytes
    }

    pub fn encoding(&self) -> Encoding
    {
        self.encoding
    }

    pub fn is_empty(&self) -> bool
    {
        self.bytes.is_empty()
    }

    /// Run the program.
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> SondeResult<Location>
    {
        Machine::new(self, ctx).run()
    }
}

/// Entry of a location list; `[start, end)` are file addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationListEntry
{
    pub start: u64,
    pub end: u64,
    pub expression: LocationExpression,
}

/// A location that depends on the program counter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocationList
{
    entries: Vec<LocationListEntry>,
}

impl LocationList
{
    pub fn new(entries: Vec<LocationListEntry>) -> Self
    {
        Self { entries }
    }

    pub fn entries(&self) -> &[LocationListEntry]
    {
        &self.entries
    }

    /// Expression covering the file address `pc`.
    pub fn expression_at(&self, pc: Address) -> SondeResult<&LocationExpression>
    {
        self.entries
            .iter()
            .find(|entry| entry.start <= pc.value() && pc.value() < entry.end)
            .map(|entry| &entry.expression)
            .ok_or(SondeError::NoApplicableLocation { pc })
    }

    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> SondeResult<Location>
    {
        self.expression_at(ctx.file_pc())
            .map_err(|_| SondeError::NoApplicableLocation { pc: ctx.pc })?
            .evaluate(ctx)
    }
}

/// Location attribute of a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableLocation
{
    Expression(LocationExpression),
    List(LocationList),
    /// No location: the compiler dropped the variable
    Optimized,
}

impl VariableLocation
{
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> SondeResult<Location>
    {
        match self {
            VariableLocation::Expression(expression) => expression.evaluate(ctx),
            VariableLocation::List(list) => list.evaluate(ctx),
            VariableLocation::Optimized => Err(SondeError::NotFound("variable is optimized out".into())),
        }
    }
}

struct Machine<'e, 'c>
{
    expression: &'e LocationExpression,
    ctx: &'e EvalContext<'c>,
    stack: SmallVec<[u64; 16]>,
    mask: u64,
    width: u32,
}

fn unsupported(what: impl Into<String>) -> SondeError
{
    SondeError::UnsupportedOperation(what.into())
}

impl<'e, 'c> Machine<'e, 'c>
{
    fn new(expression: &'e LocationExpression, ctx: &'e EvalContext<'c>) -> Self
    {
        let width = u32::from(expression.encoding.address_size.clamp(1, 8)) * 8;
        let mask = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
        Self {
            expression,
            ctx,
            stack: SmallVec::new(),
            mask,
            width,
        }
    }

    fn push(&mut self, value: u64)
    {
        self.stack.push(value & self.mask);
    }

    fn pop(&mut self) -> SondeResult<u64>
    {
        self.stack.pop().ok_or_else(|| unsupported("stack underflow"))
    }

    fn signed(&self, value: u64) -> i64
    {
        let shift = 64 - self.width;
        ((value << shift) as i64) >> shift
    }

    fn register(&self, register: u16) -> SondeResult<u64>
    {
        let registers = self
            .ctx
            .registers
            .ok_or_else(|| SondeError::InvalidArgument("expression reads registers but none were given".into()))?;
        registers
            .dwarf(register)
            .ok_or_else(|| SondeError::NotFound(format!("DWARF register {register}")))
    }

    fn binary(&mut self, op: impl FnOnce(&Self, u64, u64) -> SondeResult<u64>) -> SondeResult<()>
    {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let value = op(self, lhs, rhs)?;
        self.push(value);
        Ok(())
    }

    fn compare(&mut self, op: impl FnOnce(i64, i64) -> bool) -> SondeResult<()>
    {
        self.binary(|machine, lhs, rhs| Ok(u64::from(op(machine.signed(lhs), machine.signed(rhs)))))
    }

    fn deref(&mut self, size: u8) -> SondeResult<()>
    {
        let address = Address::from(self.pop()?);
        let space = self
            .ctx
            .address_space
            .ok_or_else(|| SondeError::InvalidArgument("expression dereferences memory but no address space was given".into()))?;
        let bytes = space.read_bytes(address, u64::from(size))?;
        let value = space
            .endianness()
            .read_uint(&bytes)
            .ok_or_else(|| unsupported(format!("deref of {size} bytes")))?;
        self.push(value);
        Ok(())
    }

    fn run(mut self) -> SondeResult<Location>
    {
        let expression = self.expression;
        let bytes = expression.bytes();
        let endian = match expression.endianness {
            Endianness::Little => RunTimeEndian::Little,
            Endianness::Big => RunTimeEndian::Big,
        };
        let encoding = expression.encoding;
        let mut offset = 0usize;
        let mut in_register = None;
        let mut stack_value = false;

        for _ in 0..MAX_STEPS {
            if offset >= bytes.len() {
                break;
            }
            let mut reader = EndianSlice::new(&bytes[offset..], endian);
            let op = Operation::parse(&mut reader, encoding)
                .map_err(|err| unsupported(format!("undecodable operation at byte {offset}: {err}")))?;
            offset = bytes.len() - reader.len();

            match op {
                Operation::Address { address } => self.push(address.wrapping_add(self.ctx.load_bias)),
                Operation::UnsignedConstant { value } => self.push(value),
                Operation::SignedConstant { value } => self.push(value as u64),
                Operation::Register { register } => {
                    in_register = Some(self.register(register.0)?);
                }
                Operation::RegisterOffset {
                    register,
                    offset: displacement,
                    base_type,
                } => {
                    if base_type.0 != 0 {
                        return Err(unsupported("typed DW_OP_bregx"));
                    }
                    let value = self.register(register.0)?;
                    self.push(value.wrapping_add_signed(displacement));
                }
                Operation::FrameOffset { offset: displacement } => {
                    let base = self
                        .ctx
                        .frame_base
                        .ok_or_else(|| SondeError::InvalidArgument("DW_OP_fbreg without a frame base".into()))?;
                    self.push(base.wrapping_add_signed(displacement));
                }
                Operation::CallFrameCFA => {
                    let cfa = self
                        .ctx
                        .cfa
                        .ok_or_else(|| SondeError::InvalidArgument("DW_OP_call_frame_cfa without a CFA".into()))?;
                    self.push(cfa);
                }
                Operation::Deref { base_type, size, space } => {
                    if space || base_type.0 != 0 {
                        return Err(unsupported("typed or address-space DW_OP_deref"));
                    }
                    self.deref(size)?;
                }
                Operation::Drop => {
                    self.pop()?;
                }
                Operation::Pick { index } => {
                    let index = usize::from(index);
                    let value = self
                        .stack
                        .len()
                        .checked_sub(index + 1)
                        .and_then(|position| self.stack.get(position).copied())
                        .ok_or_else(|| unsupported("DW_OP_pick past the stack bottom"))?;
                    self.push(value);
                }
                Operation::Swap => {
                    let top = self.pop()?;
                    let second = self.pop()?;
                    self.push(top);
                    self.push(second);
                }
                Operation::Rot => {
                    let top = self.pop()?;
                    let second = self.pop()?;
                    let third = self.pop()?;
                    self.push(top);
                    self.push(third);
                    self.push(second);
                }
                Operation::Abs => {
                    let value = self.pop()?;
                    let abs = self.signed(value).unsigned_abs();
                    self.push(abs);
                }
                Operation::Neg => {
                    let value = self.pop()?;
                    self.push(value.wrapping_neg());
                }
                Operation::Not => {
                    let value = self.pop()?;
                    self.push(!value);
                }
                Operation::PlusConstant { value } => {
                    let top = self.pop()?;
                    self.push(top.wrapping_add(value));
                }
                Operation::Plus => self.binary(|_, lhs, rhs| Ok(lhs.wrapping_add(rhs)))?,
                Operation::Minus => self.binary(|_, lhs, rhs| Ok(lhs.wrapping_sub(rhs)))?,
                Operation::Mul => self.binary(|_, lhs, rhs| Ok(lhs.wrapping_mul(rhs)))?,
                Operation::Div => self.binary(|machine, lhs, rhs| {
                    let divisor = machine.signed(rhs);
                    if divisor == 0 {
                        return Err(SondeError::InvalidArgument("DW_OP_div by zero".into()));
                    }
                    Ok(machine.signed(lhs).wrapping_div(divisor) as u64)
                })?,
                Operation::Mod => self.binary(|_, lhs, rhs| {
                    lhs.checked_rem(rhs)
                        .ok_or_else(|| SondeError::InvalidArgument("DW_OP_mod by zero".into()))
                })?,
                Operation::And => self.binary(|_, lhs, rhs| Ok(lhs & rhs))?,
                Operation::Or => self.binary(|_, lhs, rhs| Ok(lhs | rhs))?,
                Operation::Xor => self.binary(|_, lhs, rhs| Ok(lhs ^ rhs))?,
                Operation::Shl => self.binary(|machine, lhs, rhs| {
                    Ok(if rhs >= u64::from(machine.width) { 0 } else { lhs << rhs })
                })?,
                Operation::Shr => self.binary(|machine, lhs, rhs| {
                    Ok(if rhs >= u64::from(machine.width) { 0 } else { lhs >> rhs })
                })?,
                Operation::Shra => self.binary(|machine, lhs, rhs| {
                    let shift = rhs.min(u64::from(machine.width) - 1);
                    Ok((machine.signed(lhs) >> shift) as u64)
                })?,
                Operation::Eq => self.compare(|lhs, rhs| lhs == rhs)?,
                Operation::Ne => self.compare(|lhs, rhs| lhs != rhs)?,
                Operation::Lt => self.compare(|lhs, rhs| lhs < rhs)?,
                Operation::Le => self.compare(|lhs, rhs| lhs <= rhs)?,
                Operation::Gt => self.compare(|lhs, rhs| lhs > rhs)?,
                Operation::Ge => self.compare(|lhs, rhs| lhs >= rhs)?,
                Operation::Skip { target } => {
                    offset = jump(offset, target, bytes.len())?;
                }
                Operation::Bra { target } => {
                    if self.pop()? != 0 {
                        offset = jump(offset, target, bytes.len())?;
                    }
                }
                Operation::Nop => {}
                Operation::StackValue => {
                    stack_value = true;
                }
                Operation::ImplicitValue { data } => {
                    return Ok(Location::Implicit(data.slice().to_vec()));
                }
                other => return Err(unsupported(format!("{other:?}"))),
            }
        }

        if offset < bytes.len() {
            return Err(unsupported("step limit exceeded"));
        }
        if let Some(value) = in_register {
            return Ok(Location::Value(value));
        }
        let top = self
            .stack
            .last()
            .copied()
            .ok_or_else(|| SondeError::NotFound("empty location expression".into()))?;
        if stack_value {
            Ok(Location::Value(top))
        } else {
            Ok(Location::Address(RemoteAddress::new(Address::from(top))))
        }
    }
}

fn jump(offset: usize, target: i16, len: usize) -> SondeResult<usize>
{
    let destination = offset as i64 + i64::from(target);
    if destination < 0 || destination as usize > len {
        return Err(unsupported(format!("branch to byte {destination} outside expression")));
    }
    Ok(destination as usize)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_jump_bounds()
    {
        assert_eq!(jump(4, -4, 10).unwrap(), 0);
        assert_eq!(jump(4, 6, 10).unwrap(), 10);
        assert!(jump(4, -5, 10).is_err());
        assert!(jump(4, 7, 10).is_err());
    }
}
