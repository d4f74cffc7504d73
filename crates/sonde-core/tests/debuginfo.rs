//! Tests for object and DWARF loading

mod common;

use std::sync::Arc;

use common::*;
use gimli::write::{AttributeValue, DwarfUnit, EndianVec, Expression, Location, LocationList, Sections};
use gimli::{Encoding, Format, LittleEndian, SectionId};
use object::write::{Object, Symbol, SymbolSection};
use object::{BinaryFormat, SectionKind, SymbolFlags, SymbolScope};
use sonde_core::debuginfo::{FrameKind, ImageCache, ObjectInformation, SymbolKind, TypeKind};
use sonde_core::inferior::{LoadedImage, ProcessLayout};
use sonde_core::error::SondeError;
use sonde_core::location::{EvalContext, VariableLocation};
use sonde_core::types::{Address, Architecture};

const WALK_START: u64 = 0x40_1000;
const HEAD_ADDRESS: u64 = 0x60_1040;
const MANGLED_MAIN: &str = "_ZN5sonde4main17h0123456789abcdefE";

/// Relocatable x86_64 object describing
///
/// ```c
/// struct node { int value; struct node *next; };
/// struct node *head;
/// void walk(struct node *list) { { struct node *cursor; } }
/// ```
///
/// Ways to spoil the generated debug information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Damage
{
    None,
    /// Overwrite the DWARF version in the unit header
    Version(u16),
    /// Put a unit whose root DIE uses an undefined abbreviation first
    BrokenUnitFirst,
    /// Add a global `lost` whose location list is cut off
    TruncatedLocationList,
}

fn linked_list_object(damage: Damage) -> Vec<u8>
{
    let encoding = Encoding {
        format: Format::Dwarf32,
        version: 4,
        address_size: 8,
    };
    let mut dwarf = DwarfUnit::new(encoding);
    let root = dwarf.unit.root();
    dwarf
        .unit
        .get_mut(root)
        .set(gimli::DW_AT_name, AttributeValue::String(b"list.c".to_vec()));

    let int = dwarf.unit.add(root, gimli::DW_TAG_base_type);
    let entry = dwarf.unit.get_mut(int);
    entry.set(gimli::DW_AT_name, AttributeValue::String(b"int".to_vec()));
    entry.set(gimli::DW_AT_encoding, AttributeValue::Encoding(gimli::DW_ATE_signed));
    entry.set(gimli::DW_AT_byte_size, AttributeValue::Udata(4));

    let node = dwarf.unit.add(root, gimli::DW_TAG_structure_type);
    let pointer = dwarf.unit.add(root, gimli::DW_TAG_pointer_type);
    let entry = dwarf.unit.get_mut(node);
    entry.set(gimli::DW_AT_name, AttributeValue::String(b"node".to_vec()));
    entry.set(gimli::DW_AT_byte_size, AttributeValue::Udata(16));
    let entry = dwarf.unit.get_mut(pointer);
    entry.set(gimli::DW_AT_type, AttributeValue::UnitRef(node));
    entry.set(gimli::DW_AT_byte_size, AttributeValue::Udata(8));

    for (name, ty, offset) in [("value", int, 0), ("next", pointer, 8)] {
        let member = dwarf.unit.add(node, gimli::DW_TAG_member);
        let entry = dwarf.unit.get_mut(member);
        entry.set(gimli::DW_AT_name, AttributeValue::String(name.as_bytes().to_vec()));
        entry.set(gimli::DW_AT_type, AttributeValue::UnitRef(ty));
        entry.set(gimli::DW_AT_data_member_location, AttributeValue::Udata(offset));
    }

    let head = dwarf.unit.add(root, gimli::DW_TAG_variable);
    let entry = dwarf.unit.get_mut(head);
    entry.set(gimli::DW_AT_name, AttributeValue::String(b"head".to_vec()));
    entry.set(gimli::DW_AT_type, AttributeValue::UnitRef(pointer));
    let mut location = vec![gimli::DW_OP_addr.0];
    location.extend_from_slice(&HEAD_ADDRESS.to_le_bytes());
    entry.set(gimli::DW_AT_location, AttributeValue::Exprloc(Expression::raw(location)));

    if damage == Damage::TruncatedLocationList {
        let list = dwarf.unit.locations.add(LocationList(vec![Location::StartLength {
            begin: gimli::write::Address::Constant(WALK_START),
            length: 0x40,
            data: Expression::raw(vec![gimli::DW_OP_reg0.0]),
        }]));
        let lost = dwarf.unit.add(root, gimli::DW_TAG_variable);
        let entry = dwarf.unit.get_mut(lost);
        entry.set(gimli::DW_AT_name, AttributeValue::String(b"lost".to_vec()));
        entry.set(gimli::DW_AT_location, AttributeValue::LocationListRef(list));
    }

    let ghost = dwarf.unit.add(root, gimli::DW_TAG_variable);
    dwarf
        .unit
        .get_mut(ghost)
        .set(gimli::DW_AT_name, AttributeValue::String(b"ghost".to_vec()));

    let walk = dwarf.unit.add(root, gimli::DW_TAG_subprogram);
    let entry = dwarf.unit.get_mut(walk);
    entry.set(gimli::DW_AT_name, AttributeValue::String(b"walk".to_vec()));
    entry.set(gimli::DW_AT_low_pc, AttributeValue::Address(gimli::write::Address::Constant(WALK_START)));
    entry.set(gimli::DW_AT_high_pc, AttributeValue::Udata(0x40));
    entry.set(
        gimli::DW_AT_frame_base,
        AttributeValue::Exprloc(Expression::raw(vec![gimli::DW_OP_call_frame_cfa.0])),
    );

    let list = dwarf.unit.add(walk, gimli::DW_TAG_formal_parameter);
    let entry = dwarf.unit.get_mut(list);
    entry.set(gimli::DW_AT_name, AttributeValue::String(b"list".to_vec()));
    entry.set(gimli::DW_AT_type, AttributeValue::UnitRef(pointer));
    entry.set(gimli::DW_AT_location, AttributeValue::Exprloc(Expression::raw(vec![gimli::DW_OP_fbreg.0, 0x68])));

    let block = dwarf.unit.add(walk, gimli::DW_TAG_lexical_block);
    let entry = dwarf.unit.get_mut(block);
    entry.set(gimli::DW_AT_low_pc, AttributeValue::Address(gimli::write::Address::Constant(WALK_START + 0x10)));
    entry.set(gimli::DW_AT_high_pc, AttributeValue::Udata(0x10));

    let cursor = dwarf.unit.add(block, gimli::DW_TAG_variable);
    let entry = dwarf.unit.get_mut(cursor);
    entry.set(gimli::DW_AT_name, AttributeValue::String(b"cursor".to_vec()));
    entry.set(gimli::DW_AT_type, AttributeValue::UnitRef(pointer));
    entry.set(gimli::DW_AT_location, AttributeValue::Exprloc(Expression::raw(vec![gimli::DW_OP_fbreg.0, 0x70])));

    let mut sections = Sections::new(EndianVec::new(LittleEndian));
    dwarf.write(&mut sections).unwrap();

    let mut object = Object::new(BinaryFormat::Elf, object::Architecture::X86_64, object::Endianness::Little);
    let text = object.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
    object.append_section_data(text, &[0xc3; 0x40], 16);
    object.add_symbol(Symbol {
        name: MANGLED_MAIN.as_bytes().to_vec(),
        value: 0,
        size: 0x40,
        kind: object::SymbolKind::Text,
        scope: SymbolScope::Linkage,
        weak: false,
        section: SymbolSection::Section(text),
        flags: SymbolFlags::None,
    });

    sections
        .for_each(|id, data| {
            let mut bytes = data.slice().to_vec();
            if bytes.is_empty() {
                return Ok::<(), gimli::write::Error>(());
            }
            match (id, damage) {
                (SectionId::DebugInfo, Damage::Version(version)) => bytes[4..6].copy_from_slice(&version.to_le_bytes()),
                (SectionId::DebugInfo, Damage::BrokenUnitFirst) => {
                    // length, version 4, abbreviation offset 0, address size 8, code 0x7f
                    let mut broken = vec![8, 0, 0, 0, 4, 0, 0, 0, 0, 0, 8, 0x7f];
                    broken.append(&mut bytes);
                    bytes = broken;
                }
                (SectionId::DebugLoc, Damage::TruncatedLocationList) => bytes.truncate(4),
                _ => {}
            }
            let section = object.add_section(Vec::new(), id.name().as_bytes().to_vec(), SectionKind::Debug);
            object.append_section_data(section, &bytes, 1);
            Ok(())
        })
        .unwrap();

    object.write().unwrap()
}

#[test]
fn test_self_referential_struct_is_one_node()
{
    let info = ObjectInformation::from_bytes("list.o", &linked_list_object(Damage::None)).unwrap();
    assert_eq!(info.architecture(), Architecture::X86_64);
    assert!(info.has_debug_info());
    assert_eq!(info.dwarf_versions(), &[4]);

    let types = info.types().unwrap();
    assert_eq!(types.by_name("node").len(), 1);
    let node = types.find("node").unwrap();
    let TypeKind::Struct { members } = &node.kind else {
        panic!("node is not a struct: {:?}", node.kind);
    };
    assert_eq!(members.len(), 2);

    let next = types.member(node.id, "next").unwrap();
    assert_eq!(next.offset, 8);
    let pointer = next.ty.unwrap();
    assert_eq!(types.pointee(pointer), Some(node.id));
    assert_eq!(types.byte_size(pointer), Some(8));
    assert_eq!(types.display_name(pointer), "node *");

    let value = types.member(node.id, "value").unwrap();
    assert_eq!(value.offset, 0);
    assert_eq!(types.resolve(value.ty.unwrap()).unwrap().name.as_deref(), Some("int"));
}

#[test]
fn test_globals_skip_variables_without_storage()
{
    let info = ObjectInformation::from_bytes("list.o", &linked_list_object(Damage::None)).unwrap();

    let head = info.global("head").unwrap().unwrap();
    let location = head.location.evaluate(&EvalContext::new(Address::ZERO)).unwrap();
    assert_eq!(location.address(), Some(Address::from(HEAD_ADDRESS)));
    assert_eq!(info.types().unwrap().display_name(head.ty.unwrap()), "node *");

    assert!(info.global("ghost").unwrap().is_none());
    assert_eq!(info.globals().unwrap().len(), 1);
}

#[test]
fn test_frames_nest_by_pc()
{
    let info = ObjectInformation::from_bytes("list.o", &linked_list_object(Damage::None)).unwrap();

    let walk = info.function("walk").unwrap().unwrap();
    assert_eq!(walk.low_pc(), Some(WALK_START));
    let list = walk.variable("list").unwrap();
    assert!(list.is_parameter);
    assert!(matches!(list.location, VariableLocation::Expression(_)));

    let chain = info.find_frame(Address::from(WALK_START + 0x18)).unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].kind, FrameKind::Subprogram);
    assert_eq!(chain[1].kind, FrameKind::LexicalBlock);
    assert!(chain[1].variable("cursor").is_some());

    assert_eq!(info.find_frame(Address::from(WALK_START + 0x30)).unwrap().len(), 1);
    assert!(info.find_frame(Address::from(WALK_START + 0x40)).unwrap().is_empty());

    let ctx = EvalContext::new(Address::from(WALK_START)).with_cfa(0x7fff_0000);
    let base = walk.frame_base(&ctx).unwrap().unwrap();
    assert_eq!(base, 0x7fff_0000);
    let list_address = list.location.evaluate(&ctx.with_frame_base(base)).unwrap();
    assert_eq!(list_address.address(), Some(Address::from(0x7fff_0000 - 24)));
}

#[test]
fn test_symbols_are_demangled()
{
    let info = ObjectInformation::from_bytes("list.o", &linked_list_object(Damage::None)).unwrap();

    let main = info.symbol("sonde::main").unwrap();
    assert_eq!(main.name, MANGLED_MAIN);
    assert_eq!(main.kind, SymbolKind::Function);
    assert!(main.display_name().starts_with("sonde::main"));
    assert!(info.symbol(MANGLED_MAIN).is_some());
    assert!(info.symbol("missing").is_none());
}

#[test]
fn test_unknown_dwarf_version_is_unsupported()
{
    let result = ObjectInformation::from_bytes("future.o", &linked_list_object(Damage::Version(9)));
    assert!(matches!(result, Err(SondeError::UnsupportedDebugFormat { .. })));
}

#[test]
fn test_garbage_is_malformed()
{
    let result = ObjectInformation::from_bytes("junk", b"definitely not an object file");
    match result {
        Err(SondeError::MalformedImage { object, .. }) => assert_eq!(object, "junk"),
        other => panic!("expected MalformedImage, got {:?}", other.err()),
    }
}

#[test]
fn test_object_without_debug_info_has_empty_tables()
{
    let info = ObjectInformation::from_bytes("tiny", &tiny_executable(DATA_START, DATA_END)).unwrap();
    assert!(!info.has_debug_info());
    assert!(info.types().unwrap().is_empty());
    assert!(info.frames().unwrap().is_empty());
    assert!(info.globals().unwrap().is_empty());
    assert!(info.symbols().is_empty());
    assert!(info.symbolicate(Address::from(0x40_1000)).is_none());

    assert_eq!(info.entry(), Address::from(0x40_1000));
    assert_eq!(info.segments().len(), 2);
    assert_eq!(
        info.address_range(),
        Some((Address::from(0x40_0000), Address::from(DATA_END)))
    );
    assert_eq!(
        info.writable_ranges(),
        vec![(Address::from(DATA_START), Address::from(DATA_END))]
    );
}

#[test]
fn test_image_cache_parses_once()
{
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, &tiny_executable(DATA_START, DATA_END)).unwrap();

    let cache = ImageCache::new();
    let first = cache.load(file.path()).unwrap();
    let second = cache.load(file.path()).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.len(), 1);

    let missing = cache.load(file.path().with_extension("missing"));
    assert!(matches!(missing, Err(SondeError::Io(_))));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_unusable_dwarf_keeps_segments_and_symbols()
{
    let debug_info = unit_header_with_version(6);
    let data = tiny_executable_with_sections(DATA_START, DATA_END, &[(".debug_info", &debug_info)]);

    let strict = ObjectInformation::from_bytes("dwarf6", &data);
    assert!(matches!(strict, Err(SondeError::UnsupportedDebugFormat { .. })));

    let info = ObjectInformation::from_bytes_best_effort("dwarf6", &data).unwrap();
    assert!(matches!(info.debug_error(), Some(SondeError::UnsupportedDebugFormat { .. })));
    assert!(info.has_debug_info());
    assert!(info.types().unwrap().is_empty());
    assert!(info.globals().unwrap().is_empty());
    assert_eq!(
        info.writable_ranges(),
        vec![(Address::from(DATA_START), Address::from(DATA_END))]
    );

    let layout = ProcessLayout::new(vec![LoadedImage::new("dwarf6", Address::ZERO, Arc::new(info))]);
    let writable = layout.writable_segments();
    assert_eq!(writable.len(), 1);
    assert_eq!(writable[0].start, Address::from(DATA_START));
    assert_eq!(writable[0].end, Address::from(DATA_END));
}

#[test]
fn test_image_cache_loads_unusable_dwarf_best_effort()
{
    let debug_info = unit_header_with_version(6);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let data = tiny_executable_with_sections(DATA_START, DATA_END, &[(".debug_info", &debug_info)]);
    std::io::Write::write_all(&mut file, &data).unwrap();

    let info = ImageCache::new().load(file.path()).unwrap();
    assert!(info.debug_error().is_some());
    assert_eq!(info.writable_ranges().len(), 1);
}

#[test]
fn test_malformed_unit_does_not_hide_the_others()
{
    let info = ObjectInformation::from_bytes("list.o", &linked_list_object(Damage::BrokenUnitFirst)).unwrap();
    assert_eq!(info.dwarf_versions(), &[4, 4]);

    assert!(info.types().unwrap().find("node").is_some());
    assert!(info.global("head").unwrap().is_some());
    assert!(info.function("walk").unwrap().is_some());
    assert_eq!(info.skipped_debug_entries().unwrap(), (1, 0));
}

#[test]
fn test_unreadable_location_list_skips_one_variable()
{
    let info = ObjectInformation::from_bytes("list.o", &linked_list_object(Damage::TruncatedLocationList)).unwrap();

    assert!(info.global("lost").unwrap().is_none());
    assert!(info.global("head").unwrap().is_some());
    assert!(info.types().unwrap().find("node").is_some());
    assert_eq!(info.skipped_debug_entries().unwrap(), (0, 1));
}
