//! ELF format constants: identification bytes, section types, flags, symbol
//! attributes, program header types, dynamic tags, and structure sizes.
//!
//! Only the subset needed for emitting and reading back compiled-code images
//! is kept. Organized by category matching the ELF specification sections.

// ── ELF identification ───────────────────────────────────────────────────────

pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

// ELF class
pub const ELFCLASS32: u8 = 1;
pub const ELFCLASS64: u8 = 2;

// Data encoding
pub const ELFDATA2LSB: u8 = 1;

// Version
pub const EV_CURRENT: u8 = 1;

// OS/ABI
pub const ELFOSABI_NONE: u8 = 0;

// ── ELF object types ─────────────────────────────────────────────────────────

pub const ET_REL: u16 = 1;
pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;

// ── Machine types ────────────────────────────────────────────────────────────

pub const EM_386: u16 = 3;
pub const EM_X86_64: u16 = 62;
pub const EM_AARCH64: u16 = 183;
pub const EM_RISCV: u16 = 243;

// ── Section header types ─────────────────────────────────────────────────────

pub const SHT_NULL: u32 = 0;
pub const SHT_PROGBITS: u32 = 1;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_RELA: u32 = 4;
pub const SHT_HASH: u32 = 5;
pub const SHT_DYNAMIC: u32 = 6;
pub const SHT_REL: u32 = 9;
pub const SHT_DYNSYM: u32 = 11;

// ── Section header flags ─────────────────────────────────────────────────────

pub const SHF_WRITE: u64 = 0x1;
pub const SHF_ALLOC: u64 = 0x2;
pub const SHF_EXECINSTR: u64 = 0x4;
pub const SHF_INFO_LINK: u64 = 0x40;

// ── Symbol binding ───────────────────────────────────────────────────────────

pub const STB_LOCAL: u8 = 0;
pub const STB_GLOBAL: u8 = 1;

// ── Symbol types ─────────────────────────────────────────────────────────────

pub const STT_NOTYPE: u8 = 0;
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;

// ── Special section indices ──────────────────────────────────────────────────

pub const SHN_UNDEF: u16 = 0;
pub const SHN_ABS: u16 = 0xfff1;

// ── Program header types ─────────────────────────────────────────────────────

pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;

// ── Program header flags ─────────────────────────────────────────────────────

pub const PF_X: u32 = 0x1;
pub const PF_W: u32 = 0x2;
pub const PF_R: u32 = 0x4;

// ── Dynamic section tags ─────────────────────────────────────────────────────

pub const DT_NULL: i64 = 0;
pub const DT_HASH: i64 = 4;
pub const DT_STRTAB: i64 = 5;
pub const DT_SYMTAB: i64 = 6;
pub const DT_STRSZ: i64 = 10;
pub const DT_SYMENT: i64 = 11;

// ── ELF sizes ────────────────────────────────────────────────────────────────

/// Size of ELF64 header in bytes.
pub const ELF64_EHDR_SIZE: usize = 64;
/// Size of ELF32 header in bytes.
pub const ELF32_EHDR_SIZE: usize = 52;
/// Size of ELF64 section header in bytes.
pub const ELF64_SHDR_SIZE: usize = 64;
/// Size of ELF32 section header in bytes.
pub const ELF32_SHDR_SIZE: usize = 40;
/// Size of ELF64 symbol table entry in bytes.
pub const ELF64_SYM_SIZE: usize = 24;
/// Size of ELF32 symbol table entry in bytes.
pub const ELF32_SYM_SIZE: usize = 16;
/// Size of ELF64 RELA relocation entry in bytes.
pub const ELF64_RELA_SIZE: usize = 24;
/// Size of ELF32 REL relocation entry in bytes.
pub const ELF32_REL_SIZE: usize = 8;
/// Size of ELF64 program header in bytes.
pub const ELF64_PHDR_SIZE: usize = 56;
/// Size of ELF32 program header in bytes.
pub const ELF32_PHDR_SIZE: usize = 32;
/// Size of ELF64 dynamic entry in bytes.
pub const ELF64_DYN_SIZE: usize = 16;
/// Size of ELF32 dynamic entry in bytes.
pub const ELF32_DYN_SIZE: usize = 8;
