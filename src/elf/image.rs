//! ELF image emission for persisted compiled code.
//!
//! Three image kinds share one emission discipline: every section offset is
//! computed up front, then bytes are written in a fixed order and the
//! writer's position is checked against the computed offset at each
//! boundary. A divergence is a programming error and surfaces as
//! `AotError::Layout`, never as a silently corrupt image.
//!
//! - `ExecutableImage`: standalone `ET_EXEC` with the code in `.text` and a
//!   single RWX load segment; the entry point is the start of the code.
//! - `RelocatableImage`: `ET_REL` object with `.text`, `.data`, and a
//!   relocation section; symbol values are offsets from the code base.
//! - `SharedObjectImage`: `ET_DYN` library holding serialized method
//!   envelopes in `.aotcd`, a SysV `.hash` section over the method symbols,
//!   and a `.dynamic` section, terminated by a trailing sentinel so a
//!   reader can detect truncation.

use std::fs;
use std::path::Path;

use log::debug;

use crate::elf::hash::{SysvHashTable, DEFAULT_BUCKET_LADDER};
use crate::elf::{
    align_up, pad_to, write_dyn32, write_dyn64, write_phdr32, write_phdr64, write_rel32,
    write_rela64, write_shdr32, write_shdr64, write_sym32, write_sym64, StringTable,
};
use crate::elf::constants::*;
use crate::error::AotError;

/// Trailing marker written after the section header table of a shared
/// object; its absence on read-back means the file was truncated.
pub const IMAGE_END_SENTINEL: [u8; 7] = *b"ELFEnd\0";

// ── Configuration ────────────────────────────────────────────────────────────

/// Target parameters for emission. Injected into every builder; nothing in
/// this module consults process-global state.
#[derive(Debug, Clone)]
pub struct ElfConfig {
    pub e_machine: u16,
    pub e_flags: u32,
    /// `ELFCLASS64` or `ELFCLASS32`.
    pub elf_class: u8,
    /// Virtual address of the file's first byte.
    pub base_address: u64,
    /// Load bias applied to the writable segment of shared objects.
    pub load_bias: u64,
    /// Bucket-count ladder for the SysV hash section.
    pub bucket_ladder: Vec<u32>,
}

impl Default for ElfConfig {
    fn default() -> Self {
        Self {
            e_machine: EM_X86_64,
            e_flags: 0,
            elf_class: ELFCLASS64,
            base_address: 0,
            load_bias: 0x20_0000,
            bucket_ladder: DEFAULT_BUCKET_LADDER.to_vec(),
        }
    }
}

impl ElfConfig {
    fn is64(&self) -> bool {
        self.elf_class == ELFCLASS64
    }

    fn ehdr_size(&self) -> usize {
        if self.is64() { ELF64_EHDR_SIZE } else { ELF32_EHDR_SIZE }
    }

    fn shdr_size(&self) -> usize {
        if self.is64() { ELF64_SHDR_SIZE } else { ELF32_SHDR_SIZE }
    }

    fn phdr_size(&self) -> usize {
        if self.is64() { ELF64_PHDR_SIZE } else { ELF32_PHDR_SIZE }
    }

    fn sym_size(&self) -> usize {
        if self.is64() { ELF64_SYM_SIZE } else { ELF32_SYM_SIZE }
    }

    fn dyn_size(&self) -> usize {
        if self.is64() { ELF64_DYN_SIZE } else { ELF32_DYN_SIZE }
    }
}

// ── Inputs ───────────────────────────────────────────────────────────────────

/// One symbol to expose from an image: a name and the extent of its bytes
/// within the code payload.
#[derive(Debug, Clone)]
pub struct MethodSymbol {
    pub name: String,
    pub offset: u64,
    pub size: u64,
}

/// One ELF relocation entry for a relocatable image.
#[derive(Debug, Clone)]
pub struct RelaEntry {
    pub offset: u64,
    pub symbol: u32,
    pub kind: u32,
    pub addend: i64,
}

// ── Builder seam ─────────────────────────────────────────────────────────────

/// Common surface of the three image kinds.
pub trait ElfImageBuilder {
    /// Emit the complete image into a fresh buffer.
    fn build(&self) -> Result<Vec<u8>, AotError>;

    /// Emit and write to `path`.
    fn write_to(&self, path: &Path) -> Result<(), AotError> {
        let bytes = self.build()?;
        fs::write(path, &bytes)?;
        debug!("wrote {} byte ELF image to {}", bytes.len(), path.display());
        Ok(())
    }
}

// ── Shared emission pieces ───────────────────────────────────────────────────

/// Pending section header; emitted for either class at the end.
#[derive(Debug, Clone, Default)]
struct SectionHeader {
    name_off: u32,
    sh_type: u32,
    flags: u64,
    addr: u64,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
    addralign: u64,
    entsize: u64,
}

/// Pending symbol table entry; emitted for either class.
#[derive(Debug, Clone, Default)]
struct SymbolEntry {
    name_off: u32,
    info: u8,
    other: u8,
    shndx: u16,
    value: u64,
    size: u64,
}

fn check_position(buf: &[u8], expected: usize, part: &'static str) -> Result<(), AotError> {
    debug_assert_eq!(buf.len(), expected, "emission diverged at {}", part);
    if buf.len() != expected {
        return Err(AotError::Layout(part));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn write_ehdr(
    buf: &mut Vec<u8>,
    cfg: &ElfConfig,
    e_type: u16,
    e_entry: u64,
    e_phoff: u64,
    e_shoff: u64,
    e_phnum: u16,
    e_shnum: u16,
    e_shstrndx: u16,
) {
    buf.extend_from_slice(&ELF_MAGIC);
    buf.push(cfg.elf_class);
    buf.push(ELFDATA2LSB);
    buf.push(EV_CURRENT);
    buf.push(ELFOSABI_NONE);
    buf.extend_from_slice(&[0u8; 8]);
    buf.extend_from_slice(&e_type.to_le_bytes());
    buf.extend_from_slice(&cfg.e_machine.to_le_bytes());
    buf.extend_from_slice(&(EV_CURRENT as u32).to_le_bytes());
    if cfg.is64() {
        buf.extend_from_slice(&e_entry.to_le_bytes());
        buf.extend_from_slice(&e_phoff.to_le_bytes());
        buf.extend_from_slice(&e_shoff.to_le_bytes());
    } else {
        buf.extend_from_slice(&(e_entry as u32).to_le_bytes());
        buf.extend_from_slice(&(e_phoff as u32).to_le_bytes());
        buf.extend_from_slice(&(e_shoff as u32).to_le_bytes());
    }
    buf.extend_from_slice(&cfg.e_flags.to_le_bytes());
    buf.extend_from_slice(&(cfg.ehdr_size() as u16).to_le_bytes());
    let phentsize = if e_phnum == 0 { 0 } else { cfg.phdr_size() as u16 };
    buf.extend_from_slice(&phentsize.to_le_bytes());
    buf.extend_from_slice(&e_phnum.to_le_bytes());
    buf.extend_from_slice(&(cfg.shdr_size() as u16).to_le_bytes());
    buf.extend_from_slice(&e_shnum.to_le_bytes());
    buf.extend_from_slice(&e_shstrndx.to_le_bytes());
}

fn write_section_headers(buf: &mut Vec<u8>, cfg: &ElfConfig, headers: &[SectionHeader]) {
    for h in headers {
        if cfg.is64() {
            write_shdr64(
                buf, h.name_off, h.sh_type, h.flags, h.addr, h.offset, h.size, h.link,
                h.info, h.addralign, h.entsize,
            );
        } else {
            write_shdr32(
                buf, h.name_off, h.sh_type, h.flags as u32, h.addr as u32, h.offset as u32,
                h.size as u32, h.link, h.info, h.addralign as u32, h.entsize as u32,
            );
        }
    }
}

fn write_symbols(buf: &mut Vec<u8>, cfg: &ElfConfig, symbols: &[SymbolEntry]) {
    for s in symbols {
        if cfg.is64() {
            write_sym64(buf, s.name_off, s.info, s.other, s.shndx, s.value, s.size);
        } else {
            write_sym32(
                buf, s.name_off, s.value as u32, s.size as u32, s.info, s.other, s.shndx,
            );
        }
    }
}

fn sym_info(bind: u8, typ: u8) -> u8 {
    (bind << 4) | (typ & 0xf)
}

// ── Shared object ────────────────────────────────────────────────────────────

/// Builder for the shared-object persistence image.
///
/// `code` is the `.aotcd` payload: serialized method envelopes laid
/// back-to-back. Each entry of `methods` names one envelope and its extent
/// within that payload; the emitted dynamic symbol carries the envelope's
/// virtual address and size, and the `.hash` section makes it resolvable
/// by name.
pub struct SharedObjectImage {
    pub config: ElfConfig,
    pub methods: Vec<MethodSymbol>,
    pub code: Vec<u8>,
    pub data: Vec<u8>,
}

impl SharedObjectImage {
    pub fn new(config: ElfConfig) -> Self {
        Self { config, methods: Vec::new(), code: Vec::new(), data: Vec::new() }
    }
}

// Section indices of the shared-object layout.
const SO_AOTCD: u16 = 1;
const SO_SHSTRTAB: u16 = 2;
const SO_DYNSYM: u16 = 3;
const SO_DYNSTR: u16 = 4;
const SO_HASH: u16 = 5;
const SO_DATA: u16 = 6;
const SO_DYNAMIC: u16 = 7;
const SO_SHNUM: u16 = 8;

impl ElfImageBuilder for SharedObjectImage {
    fn build(&self) -> Result<Vec<u8>, AotError> {
        let cfg = &self.config;

        let mut shstr = StringTable::new();
        for name in [".aotcd", ".shstrtab", ".dynsym", ".dynstr", ".hash", ".data", ".dynamic"] {
            shstr.add(name);
        }
        let mut dynstr = StringTable::new();
        for m in &self.methods {
            dynstr.add(&m.name);
        }
        dynstr.add("_DYNAMIC");

        // Hash covers every symbol after UNDEF, in symbol table order:
        // `_DYNAMIC` first, then the methods.
        let mut hashed_names: Vec<&str> = vec!["_DYNAMIC"];
        hashed_names.extend(self.methods.iter().map(|m| m.name.as_str()));
        let hash = SysvHashTable::build(&hashed_names, &cfg.bucket_ladder)?;

        let nsyms = self.methods.len() + 2;
        let dynsym_size = nsyms * cfg.sym_size();
        let dynamic_size = 6 * cfg.dyn_size();

        // Precompute every offset before a single byte is written.
        let phdrs_off = cfg.ehdr_size();
        let aotcd_off = align_up(phdrs_off + 3 * cfg.phdr_size(), 16);
        let shstrtab_off = aotcd_off + self.code.len();
        let dynsym_off = align_up(shstrtab_off + shstr.len(), 8);
        let dynstr_off = dynsym_off + dynsym_size;
        let hash_off = align_up(dynstr_off + dynstr.len(), 8);
        let data_off = align_up(hash_off + hash.size(), 8);
        let dynamic_off = align_up(data_off + self.data.len(), 8);
        let shoff = align_up(dynamic_off + dynamic_size, 8);
        let file_end = shoff + SO_SHNUM as usize * cfg.shdr_size();

        let base = cfg.base_address;
        let aotcd_addr = base + aotcd_off as u64;
        let dynsym_addr = base + dynsym_off as u64;
        let dynstr_addr = base + dynstr_off as u64;
        let hash_addr = base + hash_off as u64;
        let data_addr = cfg.load_bias + data_off as u64;
        let dynamic_addr = cfg.load_bias + dynamic_off as u64;

        // Locals precede globals: UNDEF and `_DYNAMIC`, then the methods.
        let mut symbols = vec![SymbolEntry::default()];
        symbols.push(SymbolEntry {
            name_off: dynstr.offset_of("_DYNAMIC"),
            info: sym_info(STB_LOCAL, STT_OBJECT),
            other: 0,
            shndx: SO_DYNAMIC,
            value: dynamic_addr,
            size: dynamic_size as u64,
        });
        for m in &self.methods {
            symbols.push(SymbolEntry {
                name_off: dynstr.offset_of(&m.name),
                info: sym_info(STB_GLOBAL, STT_FUNC),
                other: 0,
                shndx: SO_AOTCD,
                value: aotcd_addr + m.offset,
                size: m.size,
            });
        }

        let headers = [
            SectionHeader::default(),
            SectionHeader {
                name_off: shstr.offset_of(".aotcd"),
                sh_type: SHT_PROGBITS,
                flags: SHF_ALLOC | SHF_EXECINSTR,
                addr: aotcd_addr,
                offset: aotcd_off as u64,
                size: self.code.len() as u64,
                addralign: 16,
                ..Default::default()
            },
            SectionHeader {
                name_off: shstr.offset_of(".shstrtab"),
                sh_type: SHT_STRTAB,
                offset: shstrtab_off as u64,
                size: shstr.len() as u64,
                addralign: 1,
                ..Default::default()
            },
            SectionHeader {
                name_off: shstr.offset_of(".dynsym"),
                sh_type: SHT_DYNSYM,
                flags: SHF_ALLOC,
                addr: dynsym_addr,
                offset: dynsym_off as u64,
                size: dynsym_size as u64,
                link: SO_DYNSTR as u32,
                // Two local symbols (UNDEF, _DYNAMIC) precede the globals.
                info: 2,
                addralign: 8,
                entsize: cfg.sym_size() as u64,
                ..Default::default()
            },
            SectionHeader {
                name_off: shstr.offset_of(".dynstr"),
                sh_type: SHT_STRTAB,
                flags: SHF_ALLOC,
                addr: dynstr_addr,
                offset: dynstr_off as u64,
                size: dynstr.len() as u64,
                addralign: 1,
                ..Default::default()
            },
            SectionHeader {
                name_off: shstr.offset_of(".hash"),
                sh_type: SHT_HASH,
                flags: SHF_ALLOC,
                addr: hash_addr,
                offset: hash_off as u64,
                size: hash.size() as u64,
                link: SO_DYNSYM as u32,
                addralign: 8,
                entsize: 4,
                ..Default::default()
            },
            SectionHeader {
                name_off: shstr.offset_of(".data"),
                sh_type: SHT_PROGBITS,
                flags: SHF_ALLOC | SHF_WRITE,
                addr: data_addr,
                offset: data_off as u64,
                size: self.data.len() as u64,
                addralign: 8,
                ..Default::default()
            },
            SectionHeader {
                name_off: shstr.offset_of(".dynamic"),
                sh_type: SHT_DYNAMIC,
                flags: SHF_ALLOC | SHF_WRITE,
                addr: dynamic_addr,
                offset: dynamic_off as u64,
                size: dynamic_size as u64,
                link: SO_DYNSTR as u32,
                addralign: 8,
                entsize: cfg.dyn_size() as u64,
                ..Default::default()
            },
        ];

        let mut buf = Vec::with_capacity(file_end + IMAGE_END_SENTINEL.len());
        write_ehdr(
            &mut buf, cfg, ET_DYN, 0, phdrs_off as u64, shoff as u64, 3, SO_SHNUM, SO_SHSTRTAB,
        );
        check_position(&buf, phdrs_off, "ELF header")?;

        let rw_size = (dynamic_off + dynamic_size - data_off) as u64;
        if cfg.is64() {
            write_phdr64(
                &mut buf, PT_LOAD, PF_R | PF_X, 0, base, base,
                data_off as u64, data_off as u64, 0x1000,
            );
            write_phdr64(
                &mut buf, PT_LOAD, PF_R | PF_W, data_off as u64, data_addr, data_addr,
                rw_size, rw_size, 0x1000,
            );
            write_phdr64(
                &mut buf, PT_DYNAMIC, PF_R | PF_W, dynamic_off as u64, dynamic_addr,
                dynamic_addr, dynamic_size as u64, dynamic_size as u64, 8,
            );
        } else {
            write_phdr32(
                &mut buf, PT_LOAD, PF_R | PF_X, 0, base as u32, base as u32,
                data_off as u32, data_off as u32, 0x1000,
            );
            write_phdr32(
                &mut buf, PT_LOAD, PF_R | PF_W, data_off as u32, data_addr as u32,
                data_addr as u32, rw_size as u32, rw_size as u32, 0x1000,
            );
            write_phdr32(
                &mut buf, PT_DYNAMIC, PF_R | PF_W, dynamic_off as u32, dynamic_addr as u32,
                dynamic_addr as u32, dynamic_size as u32, dynamic_size as u32, 8,
            );
        }

        pad_to(&mut buf, aotcd_off);
        buf.extend_from_slice(&self.code);
        check_position(&buf, shstrtab_off, ".aotcd")?;

        buf.extend_from_slice(shstr.as_bytes());
        pad_to(&mut buf, dynsym_off);
        write_symbols(&mut buf, cfg, &symbols);
        check_position(&buf, dynstr_off, ".dynsym")?;

        buf.extend_from_slice(dynstr.as_bytes());
        pad_to(&mut buf, hash_off);
        hash.write(&mut buf);
        check_position(&buf, hash_off + hash.size(), ".hash")?;

        pad_to(&mut buf, data_off);
        buf.extend_from_slice(&self.data);
        pad_to(&mut buf, dynamic_off);
        let entries = [
            (DT_HASH, hash_addr),
            (DT_STRTAB, dynstr_addr),
            (DT_SYMTAB, dynsym_addr),
            (DT_STRSZ, dynstr.len() as u64),
            (DT_SYMENT, cfg.sym_size() as u64),
            (DT_NULL, 0),
        ];
        for (tag, val) in entries {
            if cfg.is64() {
                write_dyn64(&mut buf, tag, val);
            } else {
                write_dyn32(&mut buf, tag as i32, val as u32);
            }
        }
        check_position(&buf, dynamic_off + dynamic_size, ".dynamic")?;

        pad_to(&mut buf, shoff);
        write_section_headers(&mut buf, cfg, &headers);
        check_position(&buf, file_end, "section header table")?;
        buf.extend_from_slice(&IMAGE_END_SENTINEL);

        debug!(
            "shared object: {} method(s), {} code bytes, {} total",
            self.methods.len(),
            self.code.len(),
            buf.len()
        );
        Ok(buf)
    }
}

// ── Executable ───────────────────────────────────────────────────────────────

/// Builder for a standalone executable image: raw code in `.text`, symbols
/// for navigation, entry point at the code start.
pub struct ExecutableImage {
    pub config: ElfConfig,
    pub symbols: Vec<MethodSymbol>,
    pub code: Vec<u8>,
}

impl ExecutableImage {
    pub fn new(config: ElfConfig) -> Self {
        Self { config, symbols: Vec::new(), code: Vec::new() }
    }
}

const EXE_TEXT: u16 = 1;
const EXE_DYNSYM: u16 = 2;
const EXE_SHSTRTAB: u16 = 3;
const EXE_DYNSTR: u16 = 4;
const EXE_SHNUM: u16 = 5;

impl ElfImageBuilder for ExecutableImage {
    fn build(&self) -> Result<Vec<u8>, AotError> {
        let cfg = &self.config;

        let mut shstr = StringTable::new();
        for name in [".text", ".dynsym", ".shstrtab", ".dynstr"] {
            shstr.add(name);
        }
        let mut dynstr = StringTable::new();
        for s in &self.symbols {
            dynstr.add(&s.name);
        }

        let nsyms = self.symbols.len() + 1;
        let dynsym_size = nsyms * cfg.sym_size();

        let text_off = align_up(cfg.ehdr_size() + cfg.phdr_size(), 16);
        let dynsym_off = align_up(text_off + self.code.len(), 8);
        let shstrtab_off = dynsym_off + dynsym_size;
        let dynstr_off = shstrtab_off + shstr.len();
        let shoff = align_up(dynstr_off + dynstr.len(), 8);
        let file_end = shoff + EXE_SHNUM as usize * cfg.shdr_size();

        let base = cfg.base_address;
        let text_addr = base + text_off as u64;

        let mut symbols = vec![SymbolEntry::default()];
        for s in &self.symbols {
            symbols.push(SymbolEntry {
                name_off: dynstr.offset_of(&s.name),
                info: sym_info(STB_GLOBAL, STT_FUNC),
                other: 0,
                shndx: EXE_TEXT,
                value: text_addr + s.offset,
                size: s.size,
            });
        }

        let headers = [
            SectionHeader::default(),
            SectionHeader {
                name_off: shstr.offset_of(".text"),
                sh_type: SHT_PROGBITS,
                flags: SHF_ALLOC | SHF_EXECINSTR,
                addr: text_addr,
                offset: text_off as u64,
                size: self.code.len() as u64,
                addralign: 16,
                ..Default::default()
            },
            SectionHeader {
                name_off: shstr.offset_of(".dynsym"),
                sh_type: SHT_DYNSYM,
                flags: SHF_ALLOC,
                addr: base + dynsym_off as u64,
                offset: dynsym_off as u64,
                size: dynsym_size as u64,
                link: EXE_DYNSTR as u32,
                info: 1,
                addralign: 8,
                entsize: cfg.sym_size() as u64,
                ..Default::default()
            },
            SectionHeader {
                name_off: shstr.offset_of(".shstrtab"),
                sh_type: SHT_STRTAB,
                offset: shstrtab_off as u64,
                size: shstr.len() as u64,
                addralign: 1,
                ..Default::default()
            },
            SectionHeader {
                name_off: shstr.offset_of(".dynstr"),
                sh_type: SHT_STRTAB,
                flags: SHF_ALLOC,
                addr: base + dynstr_off as u64,
                offset: dynstr_off as u64,
                size: dynstr.len() as u64,
                addralign: 1,
                ..Default::default()
            },
        ];

        let mut buf = Vec::with_capacity(file_end);
        write_ehdr(
            &mut buf, cfg, ET_EXEC, text_addr, cfg.ehdr_size() as u64, shoff as u64, 1,
            EXE_SHNUM, EXE_SHSTRTAB,
        );
        check_position(&buf, cfg.ehdr_size(), "ELF header")?;

        // One segment mapping the whole file; the code needs X, the symbol
        // tables only R, and a single RWX mapping keeps the layout simple.
        if cfg.is64() {
            write_phdr64(
                &mut buf, PT_LOAD, PF_R | PF_W | PF_X, 0, base, base,
                file_end as u64, file_end as u64, 0x1000,
            );
        } else {
            write_phdr32(
                &mut buf, PT_LOAD, PF_R | PF_W | PF_X, 0, base as u32, base as u32,
                file_end as u32, file_end as u32, 0x1000,
            );
        }

        pad_to(&mut buf, text_off);
        buf.extend_from_slice(&self.code);
        pad_to(&mut buf, dynsym_off);
        write_symbols(&mut buf, cfg, &symbols);
        check_position(&buf, shstrtab_off, ".dynsym")?;
        buf.extend_from_slice(shstr.as_bytes());
        buf.extend_from_slice(dynstr.as_bytes());
        pad_to(&mut buf, shoff);
        write_section_headers(&mut buf, cfg, &headers);
        check_position(&buf, file_end, "section header table")?;
        Ok(buf)
    }
}

// ── Relocatable object ───────────────────────────────────────────────────────

/// Builder for a relocatable object image. Symbol values are plain offsets
/// from the code base; a downstream link step assigns addresses.
pub struct RelocatableImage {
    pub config: ElfConfig,
    pub symbols: Vec<MethodSymbol>,
    pub code: Vec<u8>,
    pub data: Vec<u8>,
    pub relocations: Vec<RelaEntry>,
}

impl RelocatableImage {
    pub fn new(config: ElfConfig) -> Self {
        Self {
            config,
            symbols: Vec::new(),
            code: Vec::new(),
            data: Vec::new(),
            relocations: Vec::new(),
        }
    }
}

const REL_TEXT: u16 = 1;
const REL_DATA: u16 = 2;
const REL_RELA: u16 = 3;
const REL_DYNSYM: u16 = 4;
const REL_SHSTRTAB: u16 = 5;
const REL_DYNSTR: u16 = 6;
const REL_SHNUM: u16 = 7;

impl ElfImageBuilder for RelocatableImage {
    fn build(&self) -> Result<Vec<u8>, AotError> {
        let cfg = &self.config;

        // ELF64 carries explicit addends, ELF32 stores them in place.
        let (rela_name, rela_type, rela_entsize) = if cfg.is64() {
            (".rela.text", SHT_RELA, ELF64_RELA_SIZE)
        } else {
            (".rel.text", SHT_REL, ELF32_REL_SIZE)
        };

        let mut shstr = StringTable::new();
        for name in [".text", ".data", rela_name, ".dynsym", ".shstrtab", ".dynstr"] {
            shstr.add(name);
        }
        let mut dynstr = StringTable::new();
        for s in &self.symbols {
            dynstr.add(&s.name);
        }

        let nsyms = self.symbols.len() + 1;
        let dynsym_size = nsyms * cfg.sym_size();
        let rela_size = self.relocations.len() * rela_entsize;

        let text_off = align_up(cfg.ehdr_size(), 16);
        let data_off = align_up(text_off + self.code.len(), 8);
        let rela_off = align_up(data_off + self.data.len(), 8);
        let dynsym_off = align_up(rela_off + rela_size, 8);
        let shstrtab_off = dynsym_off + dynsym_size;
        let dynstr_off = shstrtab_off + shstr.len();
        let shoff = align_up(dynstr_off + dynstr.len(), 8);
        let file_end = shoff + REL_SHNUM as usize * cfg.shdr_size();

        let mut symbols = vec![SymbolEntry::default()];
        for s in &self.symbols {
            symbols.push(SymbolEntry {
                name_off: dynstr.offset_of(&s.name),
                info: sym_info(STB_GLOBAL, STT_FUNC),
                other: 0,
                shndx: REL_TEXT,
                value: s.offset,
                size: s.size,
            });
        }

        let headers = [
            SectionHeader::default(),
            SectionHeader {
                name_off: shstr.offset_of(".text"),
                sh_type: SHT_PROGBITS,
                flags: SHF_ALLOC | SHF_EXECINSTR,
                offset: text_off as u64,
                size: self.code.len() as u64,
                addralign: 16,
                ..Default::default()
            },
            SectionHeader {
                name_off: shstr.offset_of(".data"),
                sh_type: SHT_PROGBITS,
                flags: SHF_ALLOC | SHF_WRITE,
                offset: data_off as u64,
                size: self.data.len() as u64,
                addralign: 8,
                ..Default::default()
            },
            SectionHeader {
                name_off: shstr.offset_of(rela_name),
                sh_type: rela_type,
                flags: SHF_INFO_LINK,
                offset: rela_off as u64,
                size: rela_size as u64,
                link: REL_DYNSYM as u32,
                info: REL_TEXT as u32,
                addralign: 8,
                entsize: rela_entsize as u64,
                ..Default::default()
            },
            SectionHeader {
                name_off: shstr.offset_of(".dynsym"),
                sh_type: SHT_DYNSYM,
                offset: dynsym_off as u64,
                size: dynsym_size as u64,
                link: REL_DYNSTR as u32,
                info: 1,
                addralign: 8,
                entsize: cfg.sym_size() as u64,
                ..Default::default()
            },
            SectionHeader {
                name_off: shstr.offset_of(".shstrtab"),
                sh_type: SHT_STRTAB,
                offset: shstrtab_off as u64,
                size: shstr.len() as u64,
                addralign: 1,
                ..Default::default()
            },
            SectionHeader {
                name_off: shstr.offset_of(".dynstr"),
                sh_type: SHT_STRTAB,
                offset: dynstr_off as u64,
                size: dynstr.len() as u64,
                addralign: 1,
                ..Default::default()
            },
        ];

        let mut buf = Vec::with_capacity(file_end);
        write_ehdr(&mut buf, cfg, ET_REL, 0, 0, shoff as u64, 0, REL_SHNUM, REL_SHSTRTAB);
        check_position(&buf, cfg.ehdr_size(), "ELF header")?;

        pad_to(&mut buf, text_off);
        buf.extend_from_slice(&self.code);
        pad_to(&mut buf, data_off);
        buf.extend_from_slice(&self.data);
        pad_to(&mut buf, rela_off);
        for r in &self.relocations {
            if cfg.is64() {
                write_rela64(&mut buf, r.offset, r.symbol, r.kind, r.addend);
            } else {
                write_rel32(&mut buf, r.offset as u32, r.symbol, r.kind as u8);
            }
        }
        check_position(&buf, rela_off + rela_size, "relocation section")?;

        pad_to(&mut buf, dynsym_off);
        write_symbols(&mut buf, cfg, &symbols);
        check_position(&buf, shstrtab_off, ".dynsym")?;
        buf.extend_from_slice(shstr.as_bytes());
        buf.extend_from_slice(dynstr.as_bytes());
        pad_to(&mut buf, shoff);
        write_section_headers(&mut buf, cfg, &headers);
        check_position(&buf, file_end, "section header table")?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::{read_u16, read_u32, read_u64};

    fn sample_shared_object() -> SharedObjectImage {
        let mut image = SharedObjectImage::new(ElfConfig::default());
        image.code = vec![0xc3; 48];
        image.methods = vec![
            MethodSymbol { name: "bar".to_string(), offset: 0, size: 16 },
            MethodSymbol { name: "foo".to_string(), offset: 16, size: 32 },
        ];
        image
    }

    #[test]
    fn test_shared_object_header_fields() {
        let bytes = sample_shared_object().build().unwrap();
        assert_eq!(&bytes[0..4], &ELF_MAGIC);
        assert_eq!(bytes[4], ELFCLASS64);
        assert_eq!(read_u16(&bytes, 16), ET_DYN);
        assert_eq!(read_u16(&bytes, 18), EM_X86_64);
        // e_shnum and e_shstrndx
        assert_eq!(read_u16(&bytes, 60), SO_SHNUM);
        assert_eq!(read_u16(&bytes, 62), SO_SHSTRTAB);
    }

    #[test]
    fn test_shared_object_ends_with_sentinel() {
        let bytes = sample_shared_object().build().unwrap();
        assert_eq!(&bytes[bytes.len() - 7..], &IMAGE_END_SENTINEL);
    }

    #[test]
    fn test_shared_object_section_offsets_consistent() {
        let bytes = sample_shared_object().build().unwrap();
        let shoff = read_u64(&bytes, 40) as usize;
        // Section 1 is .aotcd; its recorded payload must be the code bytes.
        let shdr = shoff + ELF64_SHDR_SIZE;
        let offset = read_u64(&bytes, shdr + 24) as usize;
        let size = read_u64(&bytes, shdr + 32) as usize;
        assert_eq!(size, 48);
        assert_eq!(&bytes[offset..offset + size], &vec![0xc3u8; 48][..]);
        // Section 5 is .hash; nchain = methods + UNDEF + _DYNAMIC.
        let hash_shdr = shoff + SO_HASH as usize * ELF64_SHDR_SIZE;
        let hash_off = read_u64(&bytes, hash_shdr + 24) as usize;
        assert_eq!(read_u32(&bytes, hash_off + 4), 4);
    }

    #[test]
    fn test_shared_object_local_symbols_precede_globals() {
        let bytes = sample_shared_object().build().unwrap();
        let shoff = read_u64(&bytes, 40) as usize;
        let dynsym_shdr = shoff + SO_DYNSYM as usize * ELF64_SHDR_SIZE;
        // sh_info counts the leading local symbols: UNDEF and _DYNAMIC.
        assert_eq!(read_u32(&bytes, dynsym_shdr + 44), 2);
        let dynsym_off = read_u64(&bytes, dynsym_shdr + 24) as usize;
        // Symbol 1 is the local _DYNAMIC object, symbols 2.. the global
        // method functions. st_info sits at +4 within an ELF64 entry.
        assert_eq!(bytes[dynsym_off + ELF64_SYM_SIZE + 4], sym_info(STB_LOCAL, STT_OBJECT));
        assert_eq!(
            bytes[dynsym_off + 2 * ELF64_SYM_SIZE + 4],
            sym_info(STB_GLOBAL, STT_FUNC)
        );
        // _DYNAMIC points into the .dynamic section.
        let dyn_shdr = shoff + SO_DYNAMIC as usize * ELF64_SHDR_SIZE;
        let dynamic_addr = read_u64(&bytes, dyn_shdr + 16);
        assert_eq!(read_u64(&bytes, dynsym_off + ELF64_SYM_SIZE + 8), dynamic_addr);
    }

    #[test]
    fn test_shared_object_idempotent() {
        let image = sample_shared_object();
        assert_eq!(image.build().unwrap(), image.build().unwrap());
    }

    #[test]
    fn test_shared_object_elf32() {
        let mut image = sample_shared_object();
        image.config.elf_class = ELFCLASS32;
        image.config.e_machine = EM_386;
        let bytes = image.build().unwrap();
        assert_eq!(bytes[4], ELFCLASS32);
        assert_eq!(read_u16(&bytes, 16), ET_DYN);
        // e_shoff is a 32-bit field at offset 32 in the ELF32 header.
        let shoff = read_u32(&bytes, 32) as usize;
        assert!(shoff + SO_SHNUM as usize * ELF32_SHDR_SIZE <= bytes.len());
        assert_eq!(&bytes[bytes.len() - 7..], &IMAGE_END_SENTINEL);
    }

    #[test]
    fn test_executable_entry_points_at_code() {
        let mut image = ExecutableImage::new(ElfConfig::default());
        image.code = vec![0x90; 8];
        image.symbols = vec![MethodSymbol { name: "main".to_string(), offset: 0, size: 8 }];
        let bytes = image.build().unwrap();
        assert_eq!(read_u16(&bytes, 16), ET_EXEC);
        let entry = read_u64(&bytes, 24) as usize;
        // Entry is a vaddr; base address 0 makes it a file offset.
        assert_eq!(&bytes[entry..entry + 8], &[0x90; 8]);
    }

    #[test]
    fn test_relocatable_has_no_program_headers() {
        let mut image = RelocatableImage::new(ElfConfig::default());
        image.code = vec![0x90; 4];
        image.symbols = vec![MethodSymbol { name: "f".to_string(), offset: 0, size: 4 }];
        image.relocations = vec![RelaEntry { offset: 0, symbol: 1, kind: 2, addend: -4 }];
        let bytes = image.build().unwrap();
        assert_eq!(read_u16(&bytes, 16), ET_REL);
        assert_eq!(read_u64(&bytes, 32), 0); // e_phoff
        assert_eq!(read_u16(&bytes, 56), 0); // e_phnum
        assert_eq!(read_u16(&bytes, 58), ELF64_SHDR_SIZE as u16);
    }

    #[test]
    fn test_relocatable_symbol_values_are_offsets() {
        let mut image = RelocatableImage::new(ElfConfig::default());
        image.code = vec![0x90; 32];
        image.symbols = vec![MethodSymbol { name: "g".to_string(), offset: 16, size: 8 }];
        let bytes = image.build().unwrap();
        let shoff = read_u64(&bytes, 40) as usize;
        let dynsym_shdr = shoff + REL_DYNSYM as usize * ELF64_SHDR_SIZE;
        let dynsym_off = read_u64(&bytes, dynsym_shdr + 24) as usize;
        // Symbol 1, st_value at +8 within the entry.
        assert_eq!(read_u64(&bytes, dynsym_off + ELF64_SYM_SIZE + 8), 16);
    }
}
