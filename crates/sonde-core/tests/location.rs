//! Tests for location expression evaluation

mod common;

use common::*;
use gimli::constants::*;
use gimli::{Encoding, Format};
use sonde_core::error::SondeError;
use sonde_core::location::{
    EvalContext, Location, LocationExpression, LocationList, LocationListEntry, VariableLocation,
};
use sonde_core::remote::RemoteAddress;
use sonde_core::types::{Address, Architecture, Endianness, RegisterId, Registers, X86_64Register};

fn encoding(address_size: u8) -> Encoding
{
    Encoding {
        format: Format::Dwarf32,
        version: 4,
        address_size,
    }
}

fn expression(bytes: Vec<u8>) -> LocationExpression
{
    LocationExpression::new(bytes, encoding(8), Endianness::Little)
}

fn addr(address: u64) -> Vec<u8>
{
    let mut bytes = vec![DW_OP_addr.0];
    bytes.extend_from_slice(&address.to_le_bytes());
    bytes
}

fn evaluate(bytes: Vec<u8>) -> Result<Location, SondeError>
{
    expression(bytes).evaluate(&EvalContext::new(Address::from(0x1000)))
}

fn address_of(location: Location) -> u64
{
    location.address().expect("memory location").value()
}

#[test]
fn test_static_address()
{
    let location = evaluate(addr(0x60_0040)).unwrap();
    assert_eq!(location, Location::Address(RemoteAddress::new(Address::from(0x60_0040))));
}

#[test]
fn test_static_address_is_relocated_by_load_bias()
{
    let ctx = EvalContext::new(Address::from(0x7f00_1000)).with_load_bias(0x7f00_0000);
    let location = expression(addr(0x4010)).evaluate(&ctx).unwrap();
    assert_eq!(address_of(location), 0x7f00_4010);
}

#[test]
fn test_location_list_selects_entry_by_pc()
{
    let list = LocationList::new(vec![
        LocationListEntry {
            start: 0x1000,
            end: 0x1100,
            expression: expression(addr(0x60_0000)),
        },
        LocationListEntry {
            start: 0x1100,
            end: 0x1200,
            expression: expression(addr(0x60_0100)),
        },
    ]);

    let first = list.evaluate(&EvalContext::new(Address::from(0x10ff))).unwrap();
    assert_eq!(address_of(first), 0x60_0000);

    let second = list.evaluate(&EvalContext::new(Address::from(0x1100))).unwrap();
    assert_eq!(address_of(second), 0x60_0100);

    // The runtime pc is translated back to a file address before lookup.
    let biased = EvalContext::new(Address::from(0x5_1150)).with_load_bias(0x5_0000);
    assert_eq!(address_of(list.evaluate(&biased).unwrap()), 0x5_0000 + 0x60_0100);

    let error = list.evaluate(&EvalContext::new(Address::from(0x1200))).unwrap_err();
    assert!(matches!(error, SondeError::NoApplicableLocation { pc } if pc == Address::from(0x1200)));
}

#[test]
fn test_arithmetic()
{
    let sum = evaluate(vec![DW_OP_lit5.0, DW_OP_lit7.0, DW_OP_plus.0, DW_OP_lit3.0, DW_OP_mul.0, DW_OP_stack_value.0]);
    assert_eq!(sum.unwrap(), Location::Value(36));

    let uconst = evaluate(vec![DW_OP_lit1.0, DW_OP_plus_uconst.0, 0x80, 0x01, DW_OP_stack_value.0]);
    assert_eq!(uconst.unwrap(), Location::Value(129));

    // -6 / 2, signed
    let quotient = evaluate(vec![DW_OP_const1s.0, 0xfa, DW_OP_lit2.0, DW_OP_div.0, DW_OP_stack_value.0]);
    assert_eq!(quotient.unwrap(), Location::Value(-3i64 as u64));

    let compare = evaluate(vec![DW_OP_const1s.0, 0xff, DW_OP_lit0.0, DW_OP_lt.0, DW_OP_stack_value.0]);
    assert_eq!(compare.unwrap(), Location::Value(1));

    let stack = evaluate(vec![
        DW_OP_lit1.0,
        DW_OP_lit2.0,
        DW_OP_lit3.0,
        DW_OP_rot.0,
        DW_OP_swap.0,
        DW_OP_minus.0,
        DW_OP_stack_value.0,
    ]);
    // [1 2 3] -> rot -> [3 1 2] -> swap -> [3 2 1] -> minus -> [3 1]
    assert_eq!(stack.unwrap(), Location::Value(1));
}

#[test]
fn test_arithmetic_wraps_at_address_size()
{
    let bytes = vec![DW_OP_lit0.0, DW_OP_lit1.0, DW_OP_minus.0, DW_OP_stack_value.0];
    assert_eq!(evaluate(bytes.clone()).unwrap(), Location::Value(u64::MAX));

    let narrow = LocationExpression::new(bytes, encoding(4), Endianness::Little);
    let value = narrow.evaluate(&EvalContext::new(Address::ZERO)).unwrap();
    assert_eq!(value, Location::Value(0xffff_ffff));

    let shifted = LocationExpression::new(
        vec![DW_OP_const4u.0, 0, 0, 0, 0x80, DW_OP_lit4.0, DW_OP_shra.0, DW_OP_stack_value.0],
        encoding(4),
        Endianness::Little,
    );
    let value = shifted.evaluate(&EvalContext::new(Address::ZERO)).unwrap();
    assert_eq!(value, Location::Value(0xf800_0000));
}

#[test]
fn test_division_by_zero_is_an_error()
{
    let error = evaluate(vec![DW_OP_lit4.0, DW_OP_lit0.0, DW_OP_div.0]).unwrap_err();
    assert!(matches!(error, SondeError::InvalidArgument(_)), "{error}");
}

#[test]
fn test_registers_and_frame_base()
{
    let mut registers = Registers::zeroed(Architecture::X86_64);
    registers.set(RegisterId::Sp, 0x7fff_0000).unwrap();
    registers.set(RegisterId::X86_64(X86_64Register::Rax), 42).unwrap();

    let ctx = EvalContext::new(Address::from(0x1000))
        .with_registers(&registers)
        .with_frame_base(0x7fff_0100)
        .with_cfa(0x7fff_0200);

    // DW_OP_breg7 is rsp; -16 as SLEB128
    let spilled = expression(vec![DW_OP_breg7.0, 0x70]).evaluate(&ctx).unwrap();
    assert_eq!(address_of(spilled), 0x7ffe_fff0);

    let in_rax = expression(vec![DW_OP_reg0.0]).evaluate(&ctx).unwrap();
    assert_eq!(in_rax, Location::Value(42));

    let local = expression(vec![DW_OP_fbreg.0, 0x08]).evaluate(&ctx).unwrap();
    assert_eq!(address_of(local), 0x7fff_0108);

    let cfa = expression(vec![DW_OP_call_frame_cfa.0, DW_OP_const1s.0, 0xf8, DW_OP_plus.0])
        .evaluate(&ctx)
        .unwrap();
    assert_eq!(address_of(cfa), 0x7fff_01f8);
}

#[test]
fn test_missing_context_is_reported()
{
    let ctx = EvalContext::new(Address::from(0x1000));
    assert!(matches!(
        expression(vec![DW_OP_breg7.0, 0]).evaluate(&ctx),
        Err(SondeError::InvalidArgument(_))
    ));
    assert!(matches!(
        expression(vec![DW_OP_fbreg.0, 0]).evaluate(&ctx),
        Err(SondeError::InvalidArgument(_))
    ));
    assert!(matches!(
        expression(vec![DW_OP_lit8.0, DW_OP_deref.0]).evaluate(&ctx),
        Err(SondeError::InvalidArgument(_))
    ));
}

#[test]
fn test_deref_reads_through_address_space()
{
    let mut process = FakeProcess::new();
    process.poke(DATA_START + 0x30, &(DATA_START + 0x200).to_ne_bytes());

    let ctx = EvalContext::new(Address::from(0x1000)).with_address_space(&process);
    let mut bytes = addr(DATA_START + 0x30);
    bytes.push(DW_OP_deref.0);
    let location = expression(bytes).evaluate(&ctx).unwrap();
    assert_eq!(address_of(location), DATA_START + 0x200);

    let mut bytes = addr(DATA_END);
    bytes.push(DW_OP_deref.0);
    let error = expression(bytes).evaluate(&ctx).unwrap_err();
    assert!(matches!(error, SondeError::NotMapped { .. }), "{error}");
}

#[test]
fn test_unsupported_operations_are_reported()
{
    let piece = evaluate(vec![DW_OP_lit1.0, DW_OP_piece.0, 0x04]).unwrap_err();
    assert!(matches!(piece, SondeError::UnsupportedOperation(_)), "{piece}");

    let tls = evaluate(vec![DW_OP_lit1.0, DW_OP_form_tls_address.0]).unwrap_err();
    assert!(matches!(tls, SondeError::UnsupportedOperation(_)), "{tls}");

    let garbage = evaluate(vec![0xfe]).unwrap_err();
    assert!(matches!(garbage, SondeError::UnsupportedOperation(_)), "{garbage}");

    let underflow = evaluate(vec![DW_OP_plus.0]).unwrap_err();
    assert!(matches!(underflow, SondeError::UnsupportedOperation(_)), "{underflow}");
}

#[test]
fn test_branch_loops_are_bounded()
{
    // lit1; bra -4: jumps back to the lit1 forever
    let error = evaluate(vec![DW_OP_lit1.0, DW_OP_bra.0, 0xfc, 0xff]).unwrap_err();
    assert!(matches!(error, SondeError::UnsupportedOperation(_)), "{error}");

    // lit0; bra +1 (not taken); lit3; skip +1; lit4
    let value = evaluate(vec![
        DW_OP_lit0.0,
        DW_OP_bra.0,
        0x01,
        0x00,
        DW_OP_lit3.0,
        DW_OP_skip.0,
        0x01,
        0x00,
        DW_OP_lit4.0,
        DW_OP_stack_value.0,
    ]);
    assert_eq!(value.unwrap(), Location::Value(3));
}

#[test]
fn test_implicit_values_and_reads()
{
    let implicit = evaluate(vec![DW_OP_implicit_value.0, 3, 0xaa, 0xbb, 0xcc]).unwrap();
    assert_eq!(implicit, Location::Implicit(vec![0xaa, 0xbb, 0xcc]));

    let process = FakeProcess::new();
    assert_eq!(implicit.read(&process, 4).unwrap(), vec![0xaa, 0xbb, 0xcc, 0]);
    assert_eq!(Location::Value(0x1122_3344).read(&process, 4).unwrap(), 0x1122_3344u32.to_ne_bytes());
    assert!(Location::Value(1).address().is_none());
}

#[test]
fn test_oversized_reads_fail_without_allocating()
{
    let process = FakeProcess::new();
    let huge = 1u64 << 46;

    let in_memory = Location::Address(RemoteAddress::new(Address::from(DATA_START)));
    assert!(matches!(
        in_memory.read(&process, huge),
        Err(SondeError::NotMapped { len, .. }) if len == huge
    ));
    assert!(matches!(
        Location::Value(7).read(&process, huge),
        Err(SondeError::UnsupportedOperation(_))
    ));
    assert!(matches!(
        Location::Implicit(vec![1, 2]).read(&process, huge),
        Err(SondeError::UnsupportedOperation(_))
    ));
}

#[test]
fn test_empty_and_optimized_locations()
{
    assert!(matches!(evaluate(Vec::new()), Err(SondeError::NotFound(_))));

    let optimized = VariableLocation::Optimized.evaluate(&EvalContext::new(Address::ZERO));
    assert!(matches!(optimized, Err(SondeError::NotFound(_))));

    let wrapped = VariableLocation::Expression(expression(addr(0x10)));
    assert_eq!(address_of(wrapped.evaluate(&EvalContext::new(Address::ZERO)).unwrap()), 0x10);
}
