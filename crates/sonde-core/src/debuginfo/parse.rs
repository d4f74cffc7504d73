//! DIE tree walk producing the type graph, frames and global variables.

use std::collections::HashMap;

use gimli::{constants, AttributeValue, DebuggingInformationEntry, EntriesTreeNode, Reader, Unit, UnitOffset};
use tracing::warn;

use super::demangle::{demangle, map_dwarf_error};
use super::frames::{Frame, FrameKind, PcRange, Variable};
use super::types::{Enumerator, Member, Qualifier, TypeGraph, TypeId, TypeKind, TypeNode};
use super::{OwnedDwarf, OwnedReader};
use crate::error::SondeResult;
use crate::location::{LocationExpression, LocationList, LocationListEntry, VariableLocation};
use crate::types::Endianness;

type Entry<'a, 'u> = DebuggingInformationEntry<'a, 'u, OwnedReader>;

/// Everything parsed lazily out of `.debug_info`.
#[derive(Debug, Default)]
pub(crate) struct DebugTables
{
    pub(crate) types: TypeGraph,
    pub(crate) frames: Vec<Frame>,
    pub(crate) globals: Vec<Variable>,
    pub(crate) global_index: HashMap<String, usize>,
    pub(crate) skipped_units: usize,
    pub(crate) skipped_variables: usize,
}

pub(crate) struct DieWalker<'a>
{
    object: &'a str,
    dwarf: &'a OwnedDwarf,
    endianness: Endianness,
    tables: DebugTables,
}

impl<'a> DieWalker<'a>
{
    pub(crate) fn new(object: &'a str, dwarf: &'a OwnedDwarf, endianness: Endianness, address_size: u8) -> Self
    {
        Self {
            object,
            dwarf,
            endianness,
            tables: DebugTables {
                types: TypeGraph::new(address_size),
                ..DebugTables::default()
            },
        }
    }

    /// Walk every unit. A unit that fails to parse is logged and skipped, and
    /// whatever it contributed before the failure is kept.
    pub(crate) fn walk(mut self) -> DebugTables
    {
        let mut headers = self.dwarf.units();
        loop {
            let header = match headers.next() {
                Ok(Some(header)) => header,
                Ok(None) => break,
                // Without a readable header there is no way to find the next unit.
                Err(err) => {
                    let error = map_dwarf_error(self.object, "reading .debug_info unit header", err);
                    warn!(object = %self.object, %error, "ignoring the rest of .debug_info");
                    self.tables.skipped_units += 1;
                    break;
                }
            };
            let offset = header.offset();
            let mut frames = Vec::new();
            let result = self.walk_unit(header, &mut frames);
            self.tables.frames.append(&mut frames);
            if let Err(error) = result {
                warn!(object = %self.object, unit = ?offset, %error, "skipping malformed compilation unit");
                self.tables.skipped_units += 1;
            }
        }
        self.tables
    }

    fn walk_unit(&mut self, header: gimli::UnitHeader<OwnedReader>, frames: &mut Vec<Frame>) -> SondeResult<()>
    {
        let unit = self.dwarf.unit(header).map_err(self.err("parsing compilation unit"))?;
        let mut tree = unit.entries_tree(None).map_err(self.err("building DIE tree"))?;
        let root = tree.root().map_err(self.err("navigating unit root"))?;
        self.visit_children(&unit, root, frames, None)
    }

    fn err(&self, context: &str) -> impl Fn(gimli::Error) -> crate::error::SondeError + '_
    {
        let context = context.to_string();
        move |err| map_dwarf_error(self.object, &context, err)
    }

    fn visit_children(
        &mut self,
        unit: &Unit<OwnedReader>,
        node: EntriesTreeNode<'_, '_, '_, OwnedReader>,
        frames: &mut Vec<Frame>,
        mut locals: Option<&mut Vec<Variable>>,
    ) -> SondeResult<()>
    {
        let mut children = node.children();
        while let Some(child) = children.next().map_err(self.err("iterating DIE children"))? {
            let entry = child.entry().clone();
            match entry.tag() {
                constants::DW_TAG_subprogram | constants::DW_TAG_lexical_block | constants::DW_TAG_inlined_subroutine => {
                    let mut frame = self.frame(unit, &entry)?;
                    let mut nested = Vec::new();
                    self.visit_children(unit, child, &mut nested, Some(&mut frame.variables))?;
                    frame.children = nested;
                    if !frame.ranges.is_empty() {
                        frames.push(frame);
                    }
                }
                constants::DW_TAG_variable | constants::DW_TAG_formal_parameter => {
                    let is_parameter = entry.tag() == constants::DW_TAG_formal_parameter;
                    match locals.as_deref_mut() {
                        Some(locals) => {
                            if let Some(variable) = self.variable_or_skip(unit, &entry, is_parameter) {
                                locals.push(variable);
                            }
                        }
                        None if !is_parameter => {
                            if let Some(variable) = self.variable_or_skip(unit, &entry, false) {
                                if !matches!(variable.location, VariableLocation::Optimized) {
                                    let index = self.tables.globals.len();
                                    self.tables.global_index.entry(variable.name.clone()).or_insert(index);
                                    self.tables.globals.push(variable);
                                }
                            }
                        }
                        None => {}
                    }
                }
                tag => {
                    if let Some(kind) = self.type_kind(unit, &entry, tag)? {
                        let node = TypeNode {
                            id: type_id(unit, entry.offset()),
                            name: self.name(unit, &entry)?,
                            kind,
                            byte_size: entry
                                .attr(constants::DW_AT_byte_size)
                                .map_err(self.err("reading DW_AT_byte_size"))?
                                .and_then(|attr| attr.udata_value()),
                        };
                        self.tables.types.insert(node);
                    }
                    // Namespaces, modules and aggregates can hold further
                    // declarations; frames found there are top level.
                    if matches!(
                        tag,
                        constants::DW_TAG_namespace
                            | constants::DW_TAG_module
                            | constants::DW_TAG_structure_type
                            | constants::DW_TAG_class_type
                            | constants::DW_TAG_union_type
                            | constants::DW_TAG_enumeration_type
                    ) {
                        self.visit_children(unit, child, frames, None)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn type_kind(&self, unit: &Unit<OwnedReader>, entry: &Entry<'_, '_>, tag: constants::DwTag) -> SondeResult<Option<TypeKind>>
    {
        let target = self.type_ref(unit, entry)?;
        Ok(Some(match tag {
            constants::DW_TAG_base_type => TypeKind::Base {
                encoding: entry
                    .attr(constants::DW_AT_encoding)
                    .map_err(self.err("reading DW_AT_encoding"))?
                    .and_then(|attr| attr.udata_value())
                    .unwrap_or(0) as u8,
            },
            constants::DW_TAG_pointer_type | constants::DW_TAG_ptr_to_member_type => TypeKind::Pointer { pointee: target },
            constants::DW_TAG_reference_type | constants::DW_TAG_rvalue_reference_type => {
                TypeKind::Reference { pointee: target }
            }
            constants::DW_TAG_structure_type | constants::DW_TAG_class_type => TypeKind::Struct {
                members: self.members(unit, entry.offset())?,
            },
            constants::DW_TAG_union_type => TypeKind::Union {
                members: self.members(unit, entry.offset())?,
            },
            constants::DW_TAG_enumeration_type => TypeKind::Enum {
                underlying: target,
                enumerators: self.enumerators(unit, entry.offset())?,
            },
            constants::DW_TAG_array_type => TypeKind::Array {
                element: target,
                count: self.array_count(unit, entry.offset())?,
            },
            constants::DW_TAG_typedef => TypeKind::Typedef { target },
            constants::DW_TAG_const_type => TypeKind::Qualified {
                qualifier: Qualifier::Const,
                target,
            },
            constants::DW_TAG_volatile_type => TypeKind::Qualified {
                qualifier: Qualifier::Volatile,
                target,
            },
            constants::DW_TAG_restrict_type => TypeKind::Qualified {
                qualifier: Qualifier::Restrict,
                target,
            },
            constants::DW_TAG_subroutine_type => TypeKind::Function,
            constants::DW_TAG_unspecified_type => TypeKind::Unspecified,
            _ => return Ok(None),
        }))
    }

    fn members(&self, unit: &Unit<OwnedReader>, offset: UnitOffset<usize>) -> SondeResult<Vec<Member>>
    {
        let mut members = Vec::new();
        let mut tree = unit.entries_tree(Some(offset)).map_err(self.err("building aggregate tree"))?;
        let root = tree.root().map_err(self.err("navigating aggregate root"))?;
        let mut children = root.children();
        while let Some(child) = children.next().map_err(self.err("iterating aggregate members"))? {
            let entry = child.entry();
            if entry.tag() != constants::DW_TAG_member {
                continue;
            }
            // Static members are declarations; they have no storage in the aggregate.
            let offset = match self.member_offset(unit, entry)? {
                Some(offset) => offset,
                None if entry
                    .attr(constants::DW_AT_external)
                    .map_err(self.err("reading DW_AT_external"))?
                    .is_some() =>
                {
                    continue;
                }
                // Union members carry no location.
                None => 0,
            };
            members.push(Member {
                name: self.name(unit, entry)?,
                ty: self.type_ref(unit, entry)?,
                offset,
            });
        }
        Ok(members)
    }

    fn member_offset(&self, unit: &Unit<OwnedReader>, entry: &Entry<'_, '_>) -> SondeResult<Option<u64>>
    {
        if let Some(attr) = entry
            .attr(constants::DW_AT_data_bit_offset)
            .map_err(self.err("reading DW_AT_data_bit_offset"))?
        {
            return Ok(attr.udata_value().map(|bits| bits / 8));
        }
        let Some(attr) = entry
            .attr(constants::DW_AT_data_member_location)
            .map_err(self.err("reading DW_AT_data_member_location"))?
        else {
            return Ok(None);
        };
        if let Some(bytes) = attr.udata_value() {
            return Ok(Some(bytes));
        }
        // DWARF 2 style: an expression that is a single `DW_OP_plus_uconst`.
        if let AttributeValue::Exprloc(expression) = attr.value() {
            let mut reader = expression.0;
            if let Ok(gimli::Operation::PlusConstant { value }) = gimli::Operation::parse(&mut reader, unit.encoding()) {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn enumerators(&self, unit: &Unit<OwnedReader>, offset: UnitOffset<usize>) -> SondeResult<Vec<Enumerator>>
    {
        let mut enumerators = Vec::new();
        let mut tree = unit.entries_tree(Some(offset)).map_err(self.err("building enumeration tree"))?;
        let root = tree.root().map_err(self.err("navigating enumeration root"))?;
        let mut children = root.children();
        while let Some(child) = children.next().map_err(self.err("iterating enumerators"))? {
            let entry = child.entry();
            if entry.tag() != constants::DW_TAG_enumerator {
                continue;
            }
            let value = entry
                .attr(constants::DW_AT_const_value)
                .map_err(self.err("reading DW_AT_const_value"))?
                .and_then(|attr| attr.sdata_value().or_else(|| attr.udata_value().map(|value| value as i64)))
                .unwrap_or(0);
            enumerators.push(Enumerator {
                name: self.name(unit, entry)?.unwrap_or_default(),
                value,
            });
        }
        Ok(enumerators)
    }

    fn array_count(&self, unit: &Unit<OwnedReader>, offset: UnitOffset<usize>) -> SondeResult<Option<u64>>
    {
        let mut total: Option<u64> = None;
        let mut tree = unit.entries_tree(Some(offset)).map_err(self.err("building array tree"))?;
        let root = tree.root().map_err(self.err("navigating array root"))?;
        let mut children = root.children();
        while let Some(child) = children.next().map_err(self.err("iterating array dimensions"))? {
            let entry = child.entry();
            if entry.tag() != constants::DW_TAG_subrange_type {
                continue;
            }
            let count = if let Some(attr) = entry.attr(constants::DW_AT_count).map_err(self.err("reading DW_AT_count"))? {
                attr.udata_value()
            } else {
                let lower = entry
                    .attr(constants::DW_AT_lower_bound)
                    .map_err(self.err("reading DW_AT_lower_bound"))?
                    .and_then(|attr| attr.udata_value())
                    .unwrap_or(0);
                entry
                    .attr(constants::DW_AT_upper_bound)
                    .map_err(self.err("reading DW_AT_upper_bound"))?
                    .and_then(|attr| attr.udata_value())
                    .map(|upper| upper.wrapping_sub(lower).wrapping_add(1))
            };
            let Some(count) = count else {
                return Ok(None);
            };
            total = Some(total.unwrap_or(1).saturating_mul(count));
        }
        Ok(total)
    }

    fn frame(&self, unit: &Unit<OwnedReader>, entry: &Entry<'_, '_>) -> SondeResult<Frame>
    {
        let kind = match entry.tag() {
            constants::DW_TAG_subprogram => FrameKind::Subprogram,
            constants::DW_TAG_inlined_subroutine => FrameKind::Inlined,
            _ => FrameKind::LexicalBlock,
        };

        let mut ranges = Vec::new();
        let mut iter = self.dwarf.die_ranges(unit, entry).map_err(self.err("reading scope ranges"))?;
        while let Some(range) = iter.next().map_err(self.err("iterating scope ranges"))? {
            if range.begin < range.end {
                ranges.push(PcRange {
                    start: range.begin,
                    end: range.end,
                });
            }
        }

        let name = match kind {
            FrameKind::LexicalBlock => None,
            _ => self.name_with_origin(unit, entry)?,
        };

        let frame_base = match entry
            .attr_value(constants::DW_AT_frame_base)
            .map_err(self.err("reading DW_AT_frame_base"))?
        {
            Some(AttributeValue::Exprloc(expression)) => Some(self.expression(unit, expression.0)?),
            _ => None,
        };

        Ok(Frame {
            kind,
            name,
            ranges,
            frame_base,
            variables: Vec::new(),
            children: Vec::new(),
        })
    }

    /// One bad variable only costs that variable.
    fn variable_or_skip(&mut self, unit: &Unit<OwnedReader>, entry: &Entry<'_, '_>, is_parameter: bool) -> Option<Variable>
    {
        match self.variable(unit, entry, is_parameter) {
            Ok(variable) => variable,
            Err(error) => {
                warn!(object = %self.object, die = ?entry.offset(), %error, "skipping unreadable variable");
                self.tables.skipped_variables += 1;
                None
            }
        }
    }

    fn variable(&self, unit: &Unit<OwnedReader>, entry: &Entry<'_, '_>, is_parameter: bool) -> SondeResult<Option<Variable>>
    {
        let origin = self.origin(unit, entry)?;
        let name = match self.name(unit, entry)? {
            Some(name) => Some(name),
            None => match &origin {
                Some(origin) => self.name(unit, origin)?,
                None => None,
            },
        };
        let Some(name) = name else {
            return Ok(None);
        };
        let ty = match self.type_ref(unit, entry)? {
            Some(ty) => Some(ty),
            None => match &origin {
                Some(origin) => self.type_ref(unit, origin)?,
                None => None,
            },
        };

        let location = match entry
            .attr_value(constants::DW_AT_location)
            .map_err(self.err("reading DW_AT_location"))?
        {
            None => VariableLocation::Optimized,
            Some(AttributeValue::Exprloc(expression)) => VariableLocation::Expression(self.expression(unit, expression.0)?),
            Some(value) => match self.dwarf.attr_locations(unit, value).map_err(self.err("reading location list"))? {
                Some(mut iter) => {
                    let mut entries = Vec::new();
                    while let Some(item) = iter.next().map_err(self.err("iterating location list"))? {
                        entries.push(LocationListEntry {
                            start: item.range.begin,
                            end: item.range.end,
                            expression: self.expression(unit, item.data.0)?,
                        });
                    }
                    VariableLocation::List(LocationList::new(entries))
                }
                None => VariableLocation::Optimized,
            },
        };

        Ok(Some(Variable {
            name,
            ty,
            location,
            is_parameter,
        }))
    }

    fn expression(&self, unit: &Unit<OwnedReader>, reader: OwnedReader) -> SondeResult<LocationExpression>
    {
        let bytes = reader.to_slice().map_err(self.err("copying expression bytes"))?;
        Ok(LocationExpression::new(bytes.into_owned(), unit.encoding(), self.endianness))
    }

    /// Entry named by `DW_AT_abstract_origin` or `DW_AT_specification`, within the unit.
    fn origin<'u>(&self, unit: &'u Unit<OwnedReader>, entry: &Entry<'_, '_>) -> SondeResult<Option<Entry<'u, 'u>>>
    {
        for attribute in [constants::DW_AT_abstract_origin, constants::DW_AT_specification] {
            if let Some(AttributeValue::UnitRef(offset)) = entry.attr_value(attribute).map_err(self.err("reading origin"))? {
                return Ok(Some(unit.entry(offset).map_err(self.err("resolving origin"))?));
            }
        }
        Ok(None)
    }

    fn name_with_origin(&self, unit: &Unit<OwnedReader>, entry: &Entry<'_, '_>) -> SondeResult<Option<String>>
    {
        if let Some(name) = self.linkage_or_name(unit, entry)? {
            return Ok(Some(name));
        }
        match self.origin(unit, entry)? {
            Some(origin) => self.linkage_or_name(unit, &origin),
            None => Ok(None),
        }
    }

    /// Demangled linkage name if present, the plain name otherwise.
    fn linkage_or_name(&self, unit: &Unit<OwnedReader>, entry: &Entry<'_, '_>) -> SondeResult<Option<String>>
    {
        if let Some(attr) = entry
            .attr(constants::DW_AT_linkage_name)
            .map_err(self.err("reading DW_AT_linkage_name"))?
        {
            let raw = self.string(unit, attr.value())?;
            return Ok(Some(demangle(&raw).unwrap_or(raw)));
        }
        self.name(unit, entry)
    }

    fn name(&self, unit: &Unit<OwnedReader>, entry: &Entry<'_, '_>) -> SondeResult<Option<String>>
    {
        match entry.attr(constants::DW_AT_name).map_err(self.err("reading DW_AT_name"))? {
            Some(attr) => Ok(Some(self.string(unit, attr.value())?)),
            None => Ok(None),
        }
    }

    fn string(&self, unit: &Unit<OwnedReader>, value: AttributeValue<OwnedReader>) -> SondeResult<String>
    {
        let reader = self
            .dwarf
            .attr_string(unit, value)
            .map_err(self.err("resolving DWARF string"))?;
        let owned = match reader.to_string() {
            Ok(cow) => cow.into_owned(),
            Err(_) => reader
                .to_string_lossy()
                .map_err(self.err("decoding DWARF string"))?
                .into_owned(),
        };
        Ok(owned)
    }

    fn type_ref(&self, unit: &Unit<OwnedReader>, entry: &Entry<'_, '_>) -> SondeResult<Option<TypeId>>
    {
        Ok(
            match entry.attr_value(constants::DW_AT_type).map_err(self.err("reading DW_AT_type"))? {
                Some(AttributeValue::UnitRef(offset)) => Some(type_id(unit, offset)),
                Some(AttributeValue::DebugInfoRef(offset)) => Some(TypeId(offset.0 as u64)),
                _ => None,
            },
        )
    }
}

/// Section-relative id of the entry at `offset` in `unit`.
fn type_id(unit: &Unit<OwnedReader>, offset: UnitOffset<usize>) -> TypeId
{
    let base = unit.header.offset().as_debug_info_offset().map(|offset| offset.0).unwrap_or(0);
    TypeId((base + offset.0) as u64)
}
