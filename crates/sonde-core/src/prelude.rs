//! Common module for library exports

pub use crate::address_space::{read_global, AddressSpace, AddressSpaceExt};
pub use crate::debuginfo::{ImageCache, ObjectInformation, TypeGraph, TypeId};
pub use crate::error::{ExitCause, SondeError, SondeResult};
pub use crate::heap::{HeapBlock, HeapTable};
pub use crate::inferior::{Inferior, LoadedImage, ProcessLayout};
pub use crate::location::{EvalContext, Location, LocationExpression, LocationList, VariableLocation};
#[cfg(target_os = "linux")]
pub use crate::platform::linux::{KillHandle, LinuxProcess};
pub use crate::remote::{Opaque, Pointee, Remote, RemoteAddress, RemoteValue};
#[cfg(target_os = "linux")]
pub use crate::session::{Session, StepOutcome};
pub use crate::snapshot::{compare, CaptureOptions, CompareMode, Comparison, Snapshot, SnapshotManager, StateStore, Visit};
pub use crate::types::{Address, Architecture, MemoryRegion, ProcessId, ProcessStatus, Registers};
