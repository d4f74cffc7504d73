//! `sonde inspect`: a human-readable dump of one object's metadata.

use std::path::Path;

use sonde_core::debuginfo::{FrameKind, ObjectInformation, TypeKind};
use sonde_core::error::SondeResult;
use tracing::{info, warn};

pub fn inspect(path: &Path, list_symbols: bool, list_types: bool) -> SondeResult<()>
{
    info!(object = %path.display(), "loading object");
    let object = ObjectInformation::load_best_effort(path)?;

    println!("Object: {}", object.name());
    println!("  Architecture: {}", object.architecture());
    println!("  Entry: {}", object.entry());
    if let Some((start, end)) = object.address_range() {
        println!("  Address range: {start} - {end}");
    }

    println!("  Segments: {}", object.segments().len());
    for segment in object.segments() {
        println!(
            "    {} - {} {} ({} bytes)",
            segment.start,
            segment.end,
            segment.permissions,
            segment.size()
        );
    }
    for (start, end) in object.writable_ranges() {
        println!("  Writable: {start} - {end}");
    }

    println!("  Symbols: {}", object.symbols().len());
    if list_symbols {
        let mut symbols: Vec<_> = object.symbols().iter().collect();
        symbols.sort_by_key(|symbol| symbol.address);
        for symbol in symbols {
            println!(
                "    {} {:>8} {:?} {}",
                symbol.address,
                symbol.size,
                symbol.kind,
                symbol.display_name()
            );
        }
    }

    if !object.has_debug_info() {
        println!("  Debug info: none");
        return Ok(());
    }
    if let Some(error) = object.debug_error() {
        println!("  Debug info: unusable ({error})");
        return Ok(());
    }

    let versions: Vec<String> = object.dwarf_versions().iter().map(u16::to_string).collect();
    println!("  DWARF versions: {}", versions.join(", "));

    let types = object.types()?;
    println!("  Types: {}", types.len());
    if list_types {
        let mut named: Vec<_> = types
            .iter()
            .filter(|node| node.name.is_some() && !matches!(node.kind, TypeKind::Unspecified))
            .map(|node| (types.display_name(node.id), types.byte_size(node.id)))
            .collect();
        named.sort();
        named.dedup();
        for (name, size) in named {
            match size {
                Some(size) => println!("    {name} ({size} bytes)"),
                None => println!("    {name}"),
            }
        }
    }

    let frames = object.frames()?;
    let functions = frames.iter().filter(|frame| frame.kind == FrameKind::Subprogram).count();
    println!("  Functions with debug info: {functions}");

    let (skipped_units, skipped_variables) = object.skipped_debug_entries()?;
    if skipped_units + skipped_variables > 0 {
        warn!(skipped_units, skipped_variables, "parts of the debug information could not be parsed");
    }

    let globals = object.globals()?;
    println!("  Global variables: {}", globals.len());
    for global in globals {
        let ty = global.ty.map_or_else(|| "?".to_string(), |ty| types.display_name(ty));
        println!("    {}: {ty}", global.name);
    }

    Ok(())
}
