//! Subprograms, lexical scopes and their variables.

use crate::error::SondeResult;
use crate::location::{EvalContext, Location, LocationExpression, VariableLocation};
use crate::types::Address;

use super::types::TypeId;

/// Half-open range of file addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcRange
{
    pub start: u64,
    pub end: u64,
}

impl PcRange
{
    pub fn contains(&self, pc: u64) -> bool
    {
        self.start <= pc && pc < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind
{
    /// A function (`DW_TAG_subprogram`)
    Subprogram,
    /// A nested block (`DW_TAG_lexical_block`)
    LexicalBlock,
    /// A function body inlined into its caller
    Inlined,
}

/// A named variable or parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable
{
    pub name: String,
    pub ty: Option<TypeId>,
    pub location: VariableLocation,
    pub is_parameter: bool,
}

/// A scope with PC ranges, a frame base and local variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame
{
    pub kind: FrameKind,
    /// `None` for lexical blocks
    pub name: Option<String>,
    pub ranges: Vec<PcRange>,
    /// `DW_AT_frame_base` of subprograms
    pub frame_base: Option<LocationExpression>,
    pub variables: Vec<Variable>,
    pub children: Vec<Frame>,
}

impl Frame
{
    pub fn contains(&self, pc: u64) -> bool
    {
        self.ranges.iter().any(|range| range.contains(pc))
    }

    /// Lowest address covered, used as the entry point of subprograms.
    pub fn low_pc(&self) -> Option<u64>
    {
        self.ranges.iter().map(|range| range.start).min()
    }

    pub fn variable(&self, name: &str) -> Option<&Variable>
    {
        self.variables.iter().find(|variable| variable.name == name)
    }

    /// Value of the frame base in the given context.
    pub fn frame_base(&self, ctx: &EvalContext<'_>) -> SondeResult<Option<u64>>
    {
        let Some(expression) = &self.frame_base else {
            return Ok(None);
        };
        Ok(Some(match expression.evaluate(ctx)? {
            Location::Address(address) => address.address().value(),
            Location::Value(value) => value,
            Location::Implicit(_) => {
                return Err(crate::error::SondeError::UnsupportedOperation("implicit frame base".into()));
            }
        }))
    }
}

/// Chain of scopes containing `pc`, outermost first.
pub(crate) fn scope_chain<'a>(frames: &'a [Frame], pc: Address) -> Vec<&'a Frame>
{
    let mut chain = Vec::new();
    let mut level = frames;
    while let Some(frame) = level.iter().find(|frame| frame.contains(pc.value())) {
        chain.push(frame);
        level = &frame.children;
    }
    chain
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn frame(kind: FrameKind, start: u64, end: u64, children: Vec<Frame>) -> Frame
    {
        Frame {
            kind,
            name: None,
            ranges: vec![PcRange { start, end }],
            frame_base: None,
            variables: Vec::new(),
            children,
        }
    }

    #[test]
    fn test_scope_chain_picks_innermost()
    {
        let frames = vec![
            frame(FrameKind::Subprogram, 0x100, 0x200, vec![frame(FrameKind::LexicalBlock, 0x140, 0x180, Vec::new())]),
            frame(FrameKind::Subprogram, 0x200, 0x300, Vec::new()),
        ];

        assert_eq!(scope_chain(&frames, Address::from(0x150)).len(), 2);
        assert_eq!(scope_chain(&frames, Address::from(0x1a0)).len(), 1);
        assert_eq!(scope_chain(&frames, Address::from(0x200))[0].low_pc(), Some(0x200));
        assert!(scope_chain(&frames, Address::from(0x300)).is_empty());
    }
}
