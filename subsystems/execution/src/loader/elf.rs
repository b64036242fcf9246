//! # ELF64 Images
//!
//! Little-endian ELF64 executables. Only the file header and the program
//! headers are read; every `PT_LOAD` entry becomes one [`Segment`].

use super::{ImageParser, Segment};
use crate::{ExecError, ExecResult};
use core::fmt;
use lattice_hal::VirtAddr;

/// ELF magic number
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// ELF class - 64-bit
pub const ELFCLASS64: u8 = 2;

/// ELF data encoding - little endian
pub const ELFDATA2LSB: u8 = 1;

/// ELF version
pub const EV_CURRENT: u8 = 1;

/// ELF type - executable
pub const ET_EXEC: u16 = 2;

/// Machine type - MIPS
pub const EM_MIPS: u16 = 8;

/// Program header type - loadable segment
pub const PT_LOAD: u32 = 1;

const HEADER_SIZE: usize = 64;
const PROGRAM_HEADER_SIZE: usize = 56;

/// ELF errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// Invalid magic number
    InvalidMagic,
    /// Unsupported class (not 64-bit)
    UnsupportedClass,
    /// Unsupported endianness
    UnsupportedEndian,
    /// Unsupported version
    UnsupportedVersion,
    /// Not an executable
    UnsupportedType,
    /// Built for another machine
    UnsupportedMachine,
    /// Program header table malformed
    InvalidProgramHeader,
    /// Segment bytes lie outside the image
    SegmentOutOfBounds,
    /// Buffer too small
    BufferTooSmall,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ElfError::InvalidMagic => "bad magic",
            ElfError::UnsupportedClass => "not ELF64",
            ElfError::UnsupportedEndian => "not little endian",
            ElfError::UnsupportedVersion => "unknown version",
            ElfError::UnsupportedType => "not an executable",
            ElfError::UnsupportedMachine => "wrong machine",
            ElfError::InvalidProgramHeader => "malformed program headers",
            ElfError::SegmentOutOfBounds => "segment outside image",
            ElfError::BufferTooSmall => "truncated image",
        };
        f.write_str(msg)
    }
}

impl From<ElfError> for ExecError {
    fn from(err: ElfError) -> Self {
        log::warn!("rejecting image: {}", err);
        ExecError::InvalidImage
    }
}

fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// ELF64 file header, the fields the loader needs
#[derive(Debug, Clone, Copy)]
pub struct ElfHeader {
    /// Object file type
    pub e_type: u16,
    /// Target machine
    pub e_machine: u16,
    /// Entry point
    pub e_entry: u64,
    /// Program header table offset
    pub e_phoff: u64,
    /// Program header entry size
    pub e_phentsize: u16,
    /// Number of program headers
    pub e_phnum: u16,
}

impl ElfHeader {
    /// Parse ELF header from bytes
    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        if data.len() < HEADER_SIZE {
            return Err(ElfError::BufferTooSmall);
        }

        // Check magic
        if data[0..4] != ELF_MAGIC {
            return Err(ElfError::InvalidMagic);
        }

        // Check class (64-bit)
        if data[4] != ELFCLASS64 {
            return Err(ElfError::UnsupportedClass);
        }

        // Check endianness (little)
        if data[5] != ELFDATA2LSB {
            return Err(ElfError::UnsupportedEndian);
        }

        // Check version
        if data[6] != EV_CURRENT {
            return Err(ElfError::UnsupportedVersion);
        }

        let header = Self {
            e_type: read_u16(data, 16),
            e_machine: read_u16(data, 18),
            e_entry: read_u64(data, 24),
            e_phoff: read_u64(data, 32),
            e_phentsize: read_u16(data, 54),
            e_phnum: read_u16(data, 56),
        };

        if header.e_type != ET_EXEC {
            return Err(ElfError::UnsupportedType);
        }
        if header.e_phnum > 0 && usize::from(header.e_phentsize) < PROGRAM_HEADER_SIZE {
            return Err(ElfError::InvalidProgramHeader);
        }
        Ok(header)
    }

    /// Get entry point
    pub fn entry_point(&self) -> u64 {
        self.e_entry
    }
}

/// ELF64 Program Header
#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    /// Segment type
    pub p_type: u32,
    /// Segment flags
    pub p_flags: u32,
    /// Offset in file
    pub p_offset: u64,
    /// Virtual address
    pub p_vaddr: u64,
    /// Size in file
    pub p_filesz: u64,
    /// Size in memory
    pub p_memsz: u64,
}

impl ProgramHeader {
    /// Parse program header from bytes
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, ElfError> {
        let end = offset
            .checked_add(PROGRAM_HEADER_SIZE)
            .ok_or(ElfError::InvalidProgramHeader)?;
        if data.len() < end {
            return Err(ElfError::BufferTooSmall);
        }

        let d = &data[offset..end];
        Ok(Self {
            p_type: read_u32(d, 0),
            p_flags: read_u32(d, 4),
            p_offset: read_u64(d, 8),
            p_vaddr: read_u64(d, 16),
            p_filesz: read_u64(d, 32),
            p_memsz: read_u64(d, 40),
        })
    }

    /// Check if segment is loadable
    pub fn is_loadable(&self) -> bool {
        self.p_type == PT_LOAD
    }

    /// Segment bytes within `image`
    pub fn contents<'a>(&self, image: &'a [u8]) -> Result<&'a [u8], ElfError> {
        let start = usize::try_from(self.p_offset).map_err(|_| ElfError::SegmentOutOfBounds)?;
        let len = usize::try_from(self.p_filesz).map_err(|_| ElfError::SegmentOutOfBounds)?;
        let end = start.checked_add(len).ok_or(ElfError::SegmentOutOfBounds)?;
        image.get(start..end).ok_or(ElfError::SegmentOutOfBounds)
    }
}

/// ELF64 image parser
#[derive(Debug, Clone, Copy, Default)]
pub struct ElfParser {
    machine: Option<u16>,
}

impl ElfParser {
    /// Accept executables for any machine
    pub const fn new() -> Self {
        Self { machine: None }
    }

    /// Accept only executables built for `machine`
    pub const fn for_machine(machine: u16) -> Self {
        Self { machine: Some(machine) }
    }

    /// Parse the header and check it against the accepted machine
    pub fn header(&self, image: &[u8]) -> Result<ElfHeader, ElfError> {
        let header = ElfHeader::parse(image)?;
        match self.machine {
            Some(machine) if machine != header.e_machine => Err(ElfError::UnsupportedMachine),
            _ => Ok(header),
        }
    }

    /// Iterate over program headers
    pub fn program_headers<'a>(
        &self,
        image: &'a [u8],
        header: &ElfHeader,
    ) -> impl Iterator<Item = Result<ProgramHeader, ElfError>> + 'a {
        let base = usize::try_from(header.e_phoff).unwrap_or(usize::MAX);
        let stride = usize::from(header.e_phentsize);
        (0..usize::from(header.e_phnum)).map(move |i| {
            let offset = stride
                .checked_mul(i)
                .and_then(|off| off.checked_add(base))
                .ok_or(ElfError::InvalidProgramHeader)?;
            ProgramHeader::parse(image, offset)
        })
    }
}

impl ImageParser for ElfParser {
    fn parse(
        &self,
        image: &[u8],
        map: &mut dyn FnMut(&Segment<'_>) -> ExecResult<()>,
    ) -> ExecResult<VirtAddr> {
        let header = self.header(image)?;
        for ph in self.program_headers(image, &header) {
            let ph = ph?;
            if !ph.is_loadable() {
                continue;
            }
            map(&Segment {
                vaddr: VirtAddr::new(ph.p_vaddr),
                file_size: ph.p_filesz,
                mem_size: ph.p_memsz,
                data: ph.contents(image)?,
            })?;
        }
        Ok(VirtAddr::new(header.entry_point()))
    }
}
