//! # Type Graph
//!
//! Types of one object file, as a graph of [`TypeNode`]s keyed by their
//! `.debug_info` offset.
//!
//! Edges (pointee, member, element, typedef target) are [`TypeId`]s rather
//! than owned nodes, so self-referential aggregates such as
//!
//! ```c
//! struct node { int value; struct node *next; };
//! ```
//!
//! become one node reachable from itself through a pointer edge. Each offset
//! is parsed once per object; ids are never shared across objects.

use std::collections::HashMap;
use std::fmt;

/// `.debug_info` section offset of a type entry, unique within one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(pub u64);

impl fmt::Display for TypeId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "<0x{:x}>", self.0)
    }
}

/// Type qualifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qualifier
{
    Const,
    Volatile,
    Restrict,
}

/// Member of a structure or union.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member
{
    /// `None` for anonymous members
    pub name: Option<String>,
    pub ty: Option<TypeId>,
    /// Byte offset from the start of the aggregate
    pub offset: u64,
}

/// Enumerator of a C-like enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumerator
{
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind
{
    /// Scalar; `encoding` is the raw `DW_ATE_*` value
    Base
    {
        encoding: u8,
    },
    /// `pointee` is `None` for `void *`
    Pointer
    {
        pointee: Option<TypeId>,
    },
    Reference
    {
        pointee: Option<TypeId>,
    },
    Struct
    {
        members: Vec<Member>,
    },
    Union
    {
        members: Vec<Member>,
    },
    Enum
    {
        underlying: Option<TypeId>,
        enumerators: Vec<Enumerator>,
    },
    /// `count` is the total number of elements (product of all dimensions)
    Array
    {
        element: Option<TypeId>,
        count: Option<u64>,
    },
    Typedef
    {
        target: Option<TypeId>,
    },
    Qualified
    {
        qualifier: Qualifier,
        target: Option<TypeId>,
    },
    Function,
    Unspecified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeNode
{
    pub id: TypeId,
    pub name: Option<String>,
    pub kind: TypeKind,
    /// `DW_AT_byte_size` when present
    pub byte_size: Option<u64>,
}

// Typedef chains longer than this are treated as cycles.
const MAX_CHAIN: usize = 32;

/// All types of one object.
#[derive(Debug, Default)]
pub struct TypeGraph
{
    nodes: HashMap<TypeId, TypeNode>,
    by_name: HashMap<String, Vec<TypeId>>,
    address_size: u64,
}

impl TypeGraph
{
    pub fn new(address_size: u8) -> Self
    {
        Self {
            nodes: HashMap::new(),
            by_name: HashMap::new(),
            address_size: u64::from(address_size),
        }
    }

    /// Add a node. Returns `false` (and keeps the first) if the id is known.
    pub fn insert(&mut self, node: TypeNode) -> bool
    {
        if self.nodes.contains_key(&node.id) {
            return false;
        }
        if let Some(name) = &node.name {
            self.by_name.entry(name.clone()).or_default().push(node.id);
        }
        self.nodes.insert(node.id, node);
        true
    }

    pub fn get(&self, id: TypeId) -> Option<&TypeNode>
    {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: TypeId) -> bool
    {
        self.nodes.contains_key(&id)
    }

    /// Every type with this name, in parse order.
    pub fn by_name(&self, name: &str) -> &[TypeId]
    {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First type with this name that is a complete definition.
    pub fn find(&self, name: &str) -> Option<&TypeNode>
    {
        let ids = self.by_name(name);
        ids.iter()
            .filter_map(|id| self.get(*id))
            .find(|node| node.byte_size.is_some())
            .or_else(|| ids.first().and_then(|id| self.get(*id)))
    }

    pub fn len(&self) -> usize
    {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeNode>
    {
        self.nodes.values()
    }

    /// Follow typedefs and qualifiers down to the underlying type.
    pub fn resolve(&self, id: TypeId) -> Option<&TypeNode>
    {
        let mut current = self.get(id)?;
        for _ in 0..MAX_CHAIN {
            match current.kind {
                TypeKind::Typedef { target: Some(target) } | TypeKind::Qualified { target: Some(target), .. } => {
                    current = self.get(target)?;
                }
                _ => return Some(current),
            }
        }
        None
    }

    /// Size in bytes of a value of type `id`.
    pub fn byte_size(&self, id: TypeId) -> Option<u64>
    {
        self.byte_size_bounded(id, 0)
    }

    fn byte_size_bounded(&self, id: TypeId, depth: usize) -> Option<u64>
    {
        if depth > MAX_CHAIN {
            return None;
        }
        let node = self.get(id)?;
        if let Some(size) = node.byte_size {
            return Some(size);
        }
        match &node.kind {
            TypeKind::Pointer { .. } | TypeKind::Reference { .. } => Some(self.address_size),
            TypeKind::Typedef { target } | TypeKind::Qualified { target, .. } => {
                self.byte_size_bounded((*target)?, depth + 1)
            }
            TypeKind::Enum { underlying, .. } => self.byte_size_bounded((*underlying)?, depth + 1),
            TypeKind::Array { element, count } => {
                let element = self.byte_size_bounded((*element)?, depth + 1)?;
                element.checked_mul((*count)?)
            }
            _ => None,
        }
    }

    /// Member `name` of the (resolved) aggregate `id`.
    pub fn member(&self, id: TypeId, name: &str) -> Option<&Member>
    {
        match &self.resolve(id)?.kind {
            TypeKind::Struct { members } | TypeKind::Union { members } => {
                members.iter().find(|member| member.name.as_deref() == Some(name))
            }
            _ => None,
        }
    }

    /// Pointee of a pointer or reference type.
    pub fn pointee(&self, id: TypeId) -> Option<TypeId>
    {
        match self.resolve(id)?.kind {
            TypeKind::Pointer { pointee } | TypeKind::Reference { pointee } => pointee,
            _ => None,
        }
    }

    /// Human-readable name, synthesised for anonymous pointers and arrays.
    pub fn display_name(&self, id: TypeId) -> String
    {
        self.display_name_bounded(id, 0)
    }

    fn display_name_bounded(&self, id: TypeId, depth: usize) -> String
    {
        let Some(node) = self.get(id) else {
            return format!("{id}");
        };
        if let Some(name) = &node.name {
            return name.clone();
        }
        if depth > MAX_CHAIN {
            return "...".to_string();
        }
        let inner = |target: Option<TypeId>| {
            target
                .map(|target| self.display_name_bounded(target, depth + 1))
                .unwrap_or_else(|| "void".to_string())
        };
        match &node.kind {
            TypeKind::Pointer { pointee } => format!("{} *", inner(*pointee)),
            TypeKind::Reference { pointee } => format!("{} &", inner(*pointee)),
            TypeKind::Array { element, count } => match count {
                Some(count) => format!("{}[{count}]", inner(*element)),
                None => format!("{}[]", inner(*element)),
            },
            TypeKind::Qualified { qualifier, target } => {
                let keyword = match qualifier {
                    Qualifier::Const => "const",
                    Qualifier::Volatile => "volatile",
                    Qualifier::Restrict => "restrict",
                };
                format!("{keyword} {}", inner(*target))
            }
            TypeKind::Typedef { target } => inner(*target),
            TypeKind::Struct { .. } => "struct <anonymous>".to_string(),
            TypeKind::Union { .. } => "union <anonymous>".to_string(),
            TypeKind::Enum { .. } => "enum <anonymous>".to_string(),
            TypeKind::Function => "fn".to_string(),
            TypeKind::Base { .. } | TypeKind::Unspecified => "void".to_string(),
        }
    }
}
