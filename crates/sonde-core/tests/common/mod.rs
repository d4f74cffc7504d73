//! In-memory stand-ins for a live process, shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use sonde_core::address_space::AddressSpace;
use sonde_core::debuginfo::ObjectInformation;
use sonde_core::error::{SondeError, SondeResult};
use sonde_core::inferior::{Inferior, LoadedImage, ProcessLayout};
use sonde_core::remote::{Opaque, RemoteAddress};
use sonde_core::types::{
    Address, Architecture, MemoryRegion, Permissions, ProcessId, ProcessStatus, RegisterId, Registers,
};
use sonde_protocol::heap::{record_offset, table_size, HeapRecord, TableHeader, HEADER_SIZE, RECORD_SIZE};

pub const DATA_START: u64 = 0x60_0000;
pub const DATA_END: u64 = 0x60_2000;
pub const TABLE_ADDRESS: u64 = 0x60_0100;
pub const TABLE_CAPACITY: u32 = 4;
pub const ARENA_START: u64 = 0x60_1000;
pub const ARENA_SIZE: u64 = 0x1000;
pub const STACK_START: u64 = 0x7f_f000;
pub const STACK_END: u64 = 0x80_0000;

/// A minimal ELF64 x86_64 executable: no sections, one text and one data segment.
pub fn tiny_executable(data_start: u64, data_end: u64) -> Vec<u8>
{
    let mut elf = Vec::new();
    elf.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    elf.extend_from_slice(&[0; 8]);
    elf.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    elf.extend_from_slice(&62u16.to_le_bytes()); // EM_X86_64
    elf.extend_from_slice(&1u32.to_le_bytes());
    elf.extend_from_slice(&0x40_1000u64.to_le_bytes()); // e_entry
    elf.extend_from_slice(&64u64.to_le_bytes()); // e_phoff
    elf.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    elf.extend_from_slice(&0u32.to_le_bytes());
    elf.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
    elf.extend_from_slice(&56u16.to_le_bytes()); // e_phentsize
    elf.extend_from_slice(&2u16.to_le_bytes()); // e_phnum
    elf.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
    elf.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    elf.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx

    let file_size = 64 + 2 * 56;
    let mut segment = |flags: u32, vaddr: u64, filesz: u64, memsz: u64| {
        elf.extend_from_slice(&1u32.to_le_bytes()); // PT_LOAD
        elf.extend_from_slice(&flags.to_le_bytes());
        elf.extend_from_slice(&0u64.to_le_bytes()); // p_offset
        elf.extend_from_slice(&vaddr.to_le_bytes());
        elf.extend_from_slice(&vaddr.to_le_bytes());
        elf.extend_from_slice(&filesz.to_le_bytes());
        elf.extend_from_slice(&memsz.to_le_bytes());
        elf.extend_from_slice(&0x1000u64.to_le_bytes());
    };
    segment(5, 0x40_0000, file_size, 0x2000);
    segment(6, data_start, 0, data_end - data_start);
    elf
}

/// [`tiny_executable`] plus a section header table holding `sections`.
pub fn tiny_executable_with_sections(data_start: u64, data_end: u64, sections: &[(&str, &[u8])]) -> Vec<u8>
{
    let mut elf = tiny_executable(data_start, data_end);

    let mut names = vec![0u8];
    let mut placed = Vec::new();
    for (name, data) in sections {
        let name_offset = names.len() as u32;
        names.extend_from_slice(name.as_bytes());
        names.push(0);
        placed.push((name_offset, elf.len() as u64, data.len() as u64));
        elf.extend_from_slice(data);
    }
    let shstrtab_name = names.len() as u32;
    names.extend_from_slice(b".shstrtab\0");
    let shstrtab_offset = elf.len() as u64;
    elf.extend_from_slice(&names);

    while elf.len() % 8 != 0 {
        elf.push(0);
    }
    let shoff = elf.len() as u64;
    let mut header = |name: u32, kind: u32, offset: u64, size: u64| {
        elf.extend_from_slice(&name.to_le_bytes());
        elf.extend_from_slice(&kind.to_le_bytes());
        elf.extend_from_slice(&0u64.to_le_bytes()); // sh_flags
        elf.extend_from_slice(&0u64.to_le_bytes()); // sh_addr
        elf.extend_from_slice(&offset.to_le_bytes());
        elf.extend_from_slice(&size.to_le_bytes());
        elf.extend_from_slice(&0u32.to_le_bytes()); // sh_link
        elf.extend_from_slice(&0u32.to_le_bytes()); // sh_info
        elf.extend_from_slice(&1u64.to_le_bytes()); // sh_addralign
        elf.extend_from_slice(&0u64.to_le_bytes()); // sh_entsize
    };
    header(0, 0, 0, 0);
    for (name, offset, size) in &placed {
        header(*name, 1, *offset, *size); // SHT_PROGBITS
    }
    header(shstrtab_name, 3, shstrtab_offset, names.len() as u64); // SHT_STRTAB

    let count = sections.len() as u16 + 2;
    elf[40..48].copy_from_slice(&shoff.to_le_bytes());
    elf[60..62].copy_from_slice(&count.to_le_bytes());
    elf[62..64].copy_from_slice(&(count - 1).to_le_bytes());
    elf
}

/// A `.debug_info` holding one unit header that claims DWARF `version`.
pub fn unit_header_with_version(version: u16) -> Vec<u8>
{
    let mut unit = Vec::new();
    unit.extend_from_slice(&7u32.to_le_bytes());
    unit.extend_from_slice(&version.to_le_bytes());
    unit.extend_from_slice(&[0; 5]);
    unit
}

pub fn tiny_image(name: &str, base: u64) -> LoadedImage
{
    let info = ObjectInformation::from_bytes(name, &tiny_executable(DATA_START, DATA_END)).unwrap();
    LoadedImage::new(name, Address::from(base), Arc::new(info))
}

/// A stopped "process" whose memory is a handful of byte vectors.
pub struct FakeProcess
{
    pub pid: ProcessId,
    pub status: ProcessStatus,
    pub mappings: Vec<(Address, Vec<u8>)>,
    pub registers: Registers,
    pub layout: ProcessLayout,
    pub heap_table: Option<Address>,
    pub stops: usize,
}

impl FakeProcess
{
    /// Data segment, an empty heap table and a stack, with SP near the top.
    pub fn new() -> Self
    {
        let mut registers = Registers::zeroed(Architecture::X86_64);
        registers.set(RegisterId::Sp, STACK_END - 0x200).unwrap();
        registers.set(RegisterId::Pc, 0x40_1234).unwrap();

        let mut process = Self {
            pid: ProcessId(4242),
            status: ProcessStatus::Stopped,
            mappings: vec![
                (Address::from(DATA_START), vec![0; (DATA_END - DATA_START) as usize]),
                (Address::from(STACK_START), vec![0; (STACK_END - STACK_START) as usize]),
            ],
            registers,
            layout: ProcessLayout::new(vec![tiny_image("fake", 0)]),
            heap_table: Some(Address::from(TABLE_ADDRESS)),
            stops: 0,
        };

        let mut header = TableHeader::empty(TABLE_CAPACITY);
        header.arena_start = ARENA_START;
        header.arena_size = ARENA_SIZE;
        process.poke(TABLE_ADDRESS, &header.to_bytes());
        process
    }

    fn mapping_mut(&mut self, address: u64, len: usize) -> Option<&mut [u8]>
    {
        self.mappings.iter_mut().find_map(|(start, bytes)| {
            let offset = address.checked_sub(start.value())? as usize;
            bytes.get_mut(offset..offset.checked_add(len)?)
        })
    }

    /// Write without any status checks, as the program itself would.
    pub fn poke(&mut self, address: u64, bytes: &[u8])
    {
        self.mapping_mut(address, bytes.len())
            .expect("poke outside mappings")
            .copy_from_slice(bytes);
    }

    pub fn peek(&self, address: u64, len: usize) -> Vec<u8>
    {
        let mut buffer = vec![0; len];
        self.read_into(Address::from(address), &mut buffer).unwrap();
        buffer
    }

    pub fn header(&self) -> TableHeader
    {
        TableHeader::from_bytes(&self.peek(TABLE_ADDRESS, HEADER_SIZE)).unwrap()
    }

    pub fn records(&self) -> Vec<HeapRecord>
    {
        let header = self.header();
        (0..header.count as usize)
            .map(|index| {
                HeapRecord::from_bytes(&self.peek(TABLE_ADDRESS + record_offset(index) as u64, RECORD_SIZE)).unwrap()
            })
            .collect()
    }

    fn store_records(&mut self, mut header: TableHeader, records: &[HeapRecord])
    {
        header.count = records.len() as u64;
        self.poke(TABLE_ADDRESS, &header.to_bytes());
        let empty = vec![0u8; table_size(TABLE_CAPACITY) - HEADER_SIZE];
        self.poke(TABLE_ADDRESS + HEADER_SIZE as u64, &empty);
        for (index, record) in records.iter().enumerate() {
            self.poke(TABLE_ADDRESS + record_offset(index) as u64, &record.to_bytes());
        }
    }

    /// Record a live block at `address` and fill it with `fill`, as the tracking
    /// allocator and the program would.
    pub fn allocate(&mut self, address: u64, size: u64, fill: u8)
    {
        let mut header = self.header();
        let mut records = self.records();
        records.push(HeapRecord {
            address,
            size,
            generation: header.next_generation,
        });
        records.sort_by_key(|record| record.address);
        header.next_generation += 1;
        self.store_records(header, &records);
        self.poke(address, &vec![fill; size as usize]);
    }

    pub fn free(&mut self, address: u64)
    {
        let header = self.header();
        let records: Vec<_> = self.records().into_iter().filter(|record| record.address != address).collect();
        self.store_records(header, &records);
    }
}

impl AddressSpace for FakeProcess
{
    fn read_into(&self, address: Address, buffer: &mut [u8]) -> SondeResult<()>
    {
        let len = buffer.len();
        let source = self.mappings.iter().find_map(|(start, bytes)| {
            let offset = address.value().checked_sub(start.value())? as usize;
            bytes.get(offset..offset.checked_add(len)?)
        });
        match source {
            Some(source) => {
                buffer.copy_from_slice(source);
                Ok(())
            }
            None => Err(SondeError::NotMapped {
                address,
                len: len as u64,
            }),
        }
    }

    fn resolve_symbol(&self, name: &str) -> SondeResult<RemoteAddress<Opaque>>
    {
        self.layout.resolve_symbol(name).map(RemoteAddress::new)
    }

    fn architecture(&self) -> Architecture
    {
        Architecture::X86_64
    }
}

impl Inferior for FakeProcess
{
    fn pid(&self) -> ProcessId
    {
        self.pid
    }

    fn status(&self) -> ProcessStatus
    {
        self.status
    }

    fn ensure_stopped(&mut self) -> SondeResult<()>
    {
        match self.status {
            ProcessStatus::Gone(cause) => Err(SondeError::ProcessGone(cause)),
            ProcessStatus::Running => {
                self.stops += 1;
                self.status = ProcessStatus::Stopped;
                Ok(())
            }
            ProcessStatus::Stopped => Ok(()),
        }
    }

    fn write_bytes(&mut self, address: Address, bytes: &[u8]) -> SondeResult<()>
    {
        if self.status != ProcessStatus::Stopped {
            return Err(SondeError::NotStopped);
        }
        let target = self.mapping_mut(address.value(), bytes.len()).ok_or(SondeError::NotMapped {
            address,
            len: bytes.len() as u64,
        })?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    fn registers(&self) -> SondeResult<Registers>
    {
        Ok(self.registers.clone())
    }

    fn set_registers(&mut self, registers: &Registers) -> SondeResult<()>
    {
        self.registers = registers.clone();
        Ok(())
    }

    fn layout(&mut self) -> SondeResult<ProcessLayout>
    {
        Ok(self.layout.clone())
    }

    fn heap_table_address(&self) -> Option<Address>
    {
        self.heap_table
    }

    fn stack_region(&self) -> SondeResult<Option<MemoryRegion>>
    {
        Ok(Some(MemoryRegion::new(
            Address::from(STACK_START),
            Address::from(STACK_END),
            Permissions {
                read: true,
                write: true,
                execute: false,
            },
            Some("[stack]".to_string()),
        )))
    }
}
