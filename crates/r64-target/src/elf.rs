//! ELF64 relocatable object emission for RISC-V.
//!
//! The writer produces a little-endian `ET_REL` object with the section
//! layout a RISC-V linker expects: a null section, `.strtab`, `.text`,
//! `.rela.text`, `.data` and `.symtab`. Section offsets and sizes are
//! filled in as the file is serialized.

use std::io;
use std::path::Path;

// ELF identification
const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const EV_CURRENT: u8 = 1;

// Header fields
const ET_REL: u16 = 1;
const EM_RISCV: u16 = 243;
/// Double-float ABI flag, reserved by the RISC-V psABI.
const EF_RISCV_FLOAT_ABI_DOUBLE: u32 = 0x4;

// Section types
const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_RELA: u32 = 4;

// Section flags
const SHF_WRITE: u64 = 0x1;
const SHF_ALLOC: u64 = 0x2;
const SHF_EXECINSTR: u64 = 0x4;
const SHF_INFO_LINK: u64 = 0x40;

// Symbol binding and type
const STB_GLOBAL: u8 = 1;
const STT_NOTYPE: u8 = 0;

// Relocation types for future call and absolute-address patching.
pub const R_RISCV_HI20: u32 = 26;
pub const R_RISCV_LO12_I: u32 = 27;
pub const R_RISCV_CALL_PLT: u32 = 19;

const EHDR_SIZE: usize = 64;
const SHDR_SIZE: usize = 64;
const SYM_SIZE: u64 = 24;
const RELA_SIZE: u64 = 24;

// Section indices, fixed by the layout: null, .strtab, .text,
// .rela.text, .data, .symtab.
const SHN_STRTAB: u16 = 1;
const SHN_TEXT: u16 = 2;
const SHN_SYMTAB: u16 = 5;

// The string table is pre-seeded with the section names; `.text` is the
// tail of `.rela.text`, so six names fit in 34 bytes.
const STRTAB_SEED: &[u8] = b"\0.strtab\0.rela.text\0.data\0.symtab\0";
const NAME_STRTAB: u32 = 1;
const NAME_RELA_TEXT: u32 = 9;
const NAME_TEXT: u32 = 14;
const NAME_DATA: u32 = 20;
const NAME_SYMTAB: u32 = 26;

/// A symbol entry: a name in the string table and an offset in `.text`.
#[derive(Debug, Clone)]
struct Symbol {
    name: u32,
    value: u64,
}

/// A `.rela.text` entry.
#[derive(Debug, Clone, Copy)]
pub struct Relocation {
    /// Offset of the patched instruction within `.text`.
    pub offset: u64,
    /// Index of the referenced symbol in the symbol table.
    pub symbol: u32,
    /// Relocation type (`R_RISCV_*`).
    pub kind: u32,
    /// Constant addend.
    pub addend: i64,
}

/// Builds a relocatable ELF64 RISC-V object file.
#[derive(Debug, Default)]
pub struct ElfWriter {
    text: Vec<u8>,
    data: Vec<u8>,
    strtab: Vec<u8>,
    symbols: Vec<Symbol>,
    relocations: Vec<Relocation>,
}

impl ElfWriter {
    /// Create an empty writer with the pre-seeded string table.
    pub fn new() -> Self {
        Self {
            text: Vec::new(),
            data: Vec::new(),
            strtab: STRTAB_SEED.to_vec(),
            symbols: Vec::new(),
            relocations: Vec::new(),
        }
    }

    /// Intern `name` into the string table and return its offset.
    fn add_string(&mut self, name: &str) -> u32 {
        let offset = self.strtab.len() as u32;
        self.strtab.extend_from_slice(name.as_bytes());
        self.strtab.push(0);
        offset
    }

    /// Add a global symbol pointing at the current end of `.text`.
    ///
    /// Returns the symbol's index in the symbol table.
    pub fn add_symbol_at_end(&mut self, name: &str) -> u32 {
        let name = self.add_string(name);
        self.symbols.push(Symbol {
            name,
            value: self.text.len() as u64,
        });
        self.symbols.len() as u32
    }

    /// Append machine code to `.text`.
    pub fn append_code(&mut self, bytes: &[u8]) {
        self.text.extend_from_slice(bytes);
    }

    /// Append raw bytes to `.data`; returns their offset.
    pub fn add_data(&mut self, bytes: &[u8]) -> u64 {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(bytes);
        offset
    }

    /// Record a relocation against `.text`.
    pub fn add_relocation(&mut self, relocation: Relocation) {
        self.relocations.push(relocation);
    }

    /// Current size of `.text` in bytes.
    pub fn text_len(&self) -> usize {
        self.text.len()
    }

    /// The `.text` bytes emitted so far.
    pub fn text(&self) -> &[u8] {
        &self.text
    }

    /// Serialize the object file.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();

        // Section data, placed directly after the ELF header.
        let strtab_offset = EHDR_SIZE as u64;
        let strtab_size = self.strtab.len() as u64;

        let text_offset = align_to(strtab_offset + strtab_size, 4);
        let text_size = self.text.len() as u64;

        let rela_offset = align_to(text_offset + text_size, 8);
        let rela_size = self.relocations.len() as u64 * RELA_SIZE;

        let data_offset = rela_offset + rela_size;
        let data_size = self.data.len() as u64;

        let symtab_offset = align_to(data_offset + data_size, 8);
        let symtab_size = (1 + self.symbols.len() as u64) * SYM_SIZE;

        let shoff = align_to(symtab_offset + symtab_size, 8);

        // ELF header
        out.extend_from_slice(&ELF_MAGIC);
        out.push(ELFCLASS64);
        out.push(ELFDATA2LSB);
        out.push(EV_CURRENT);
        out.push(0); // EI_OSABI
        out.extend_from_slice(&[0; 8]); // EI_PAD
        out.extend_from_slice(&ET_REL.to_le_bytes());
        out.extend_from_slice(&EM_RISCV.to_le_bytes());
        out.extend_from_slice(&(EV_CURRENT as u32).to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
        out.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
        out.extend_from_slice(&shoff.to_le_bytes()); // e_shoff
        out.extend_from_slice(&EF_RISCV_FLOAT_ABI_DOUBLE.to_le_bytes()); // e_flags
        out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes()); // e_ehsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
        out.extend_from_slice(&(SHDR_SIZE as u16).to_le_bytes()); // e_shentsize
        out.extend_from_slice(&6u16.to_le_bytes()); // e_shnum
        out.extend_from_slice(&(SHN_STRTAB).to_le_bytes()); // e_shstrndx

        // Section data
        debug_assert_eq!(out.len() as u64, strtab_offset);
        out.extend_from_slice(&self.strtab);
        pad_to(&mut out, text_offset);
        out.extend_from_slice(&self.text);
        pad_to(&mut out, rela_offset);
        for relocation in &self.relocations {
            out.extend_from_slice(&relocation.offset.to_le_bytes());
            let info = ((relocation.symbol as u64) << 32) | relocation.kind as u64;
            out.extend_from_slice(&info.to_le_bytes());
            out.extend_from_slice(&relocation.addend.to_le_bytes());
        }
        out.extend_from_slice(&self.data);
        pad_to(&mut out, symtab_offset);
        // Null symbol, then the globals.
        out.extend_from_slice(&[0u8; SYM_SIZE as usize]);
        for symbol in &self.symbols {
            out.extend_from_slice(&symbol.name.to_le_bytes());
            out.push((STB_GLOBAL << 4) | STT_NOTYPE); // st_info
            out.push(0); // st_other
            out.extend_from_slice(&(SHN_TEXT).to_le_bytes()); // st_shndx
            out.extend_from_slice(&symbol.value.to_le_bytes());
            out.extend_from_slice(&0u64.to_le_bytes()); // st_size
        }
        pad_to(&mut out, shoff);

        // Section header table
        // [0] null
        out.extend_from_slice(&[0u8; SHDR_SIZE]);
        // [1] .strtab
        write_section_header(
            &mut out,
            NAME_STRTAB,
            SHT_STRTAB,
            0,
            strtab_offset,
            strtab_size,
            0,
            0,
            1,
            0,
        );
        // [2] .text
        write_section_header(
            &mut out,
            NAME_TEXT,
            SHT_PROGBITS,
            SHF_ALLOC | SHF_EXECINSTR,
            text_offset,
            text_size,
            0,
            0,
            4,
            0,
        );
        // [3] .rela.text
        write_section_header(
            &mut out,
            NAME_RELA_TEXT,
            SHT_RELA,
            SHF_INFO_LINK,
            rela_offset,
            rela_size,
            SHN_SYMTAB as u32,
            SHN_TEXT as u32,
            8,
            RELA_SIZE,
        );
        // [4] .data
        write_section_header(
            &mut out,
            NAME_DATA,
            SHT_PROGBITS,
            SHF_ALLOC | SHF_WRITE,
            data_offset,
            data_size,
            0,
            0,
            1,
            0,
        );
        // [5] .symtab; info is the index of the first non-local symbol.
        write_section_header(
            &mut out,
            NAME_SYMTAB,
            SHT_SYMTAB,
            0,
            symtab_offset,
            symtab_size,
            SHN_STRTAB as u32,
            1,
            8,
            SYM_SIZE,
        );

        out
    }

    /// Serialize and write the object file to `path`.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        std::fs::write(path, self.serialize())
    }
}

fn align_to(offset: u64, align: u64) -> u64 {
    (offset + align - 1) & !(align - 1)
}

fn pad_to(out: &mut Vec<u8>, offset: u64) {
    debug_assert!(out.len() as u64 <= offset);
    out.resize(offset as usize, 0);
}

#[allow(clippy::too_many_arguments)]
fn write_section_header(
    out: &mut Vec<u8>,
    name: u32,
    sh_type: u32,
    flags: u64,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
    addralign: u64,
    entsize: u64,
) {
    out.extend_from_slice(&name.to_le_bytes());
    out.extend_from_slice(&sh_type.to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes()); // sh_addr
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&link.to_le_bytes());
    out.extend_from_slice(&info.to_le_bytes());
    out.extend_from_slice(&addralign.to_le_bytes());
    out.extend_from_slice(&entsize.to_le_bytes());
}
