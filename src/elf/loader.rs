//! Read-back of persisted images.
//!
//! `ImageReader` parses an emitted ELF64 file without mapping it: section
//! headers, names, dynamic symbols, and the SysV hash table, plus the
//! trailing sentinel check for shared objects. It backs the storage side of
//! the load/store driver and the consistency tests.
//!
//! `DynamicImage` is the `dlopen` path for images loaded through the
//! platform loader. A symbol the library does not export is `Ok(None)`;
//! failing to open the library at all is an error. The two cases are
//! deliberately distinguishable.

use std::fs;
use std::path::Path;

use log::debug;

use crate::elf::constants::*;
use crate::elf::hash::elf_hash_sysv;
use crate::elf::image::IMAGE_END_SENTINEL;
use crate::elf::{read_cstr, read_u16, read_u32, read_u64};
use crate::error::AotError;

/// One parsed section header with its resolved name.
#[derive(Debug, Clone)]
pub struct SectionInfo {
    pub name: String,
    pub sh_type: u32,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
}

/// One parsed dynamic symbol with its resolved name.
#[derive(Debug, Clone)]
pub struct LoadedSymbol {
    pub name: String,
    pub value: u64,
    pub size: u64,
    pub shndx: u16,
}

/// In-memory view of a persisted image file.
pub struct ImageReader {
    data: Vec<u8>,
    pub e_type: u16,
    sections: Vec<SectionInfo>,
}

impl ImageReader {
    /// Read and parse the file at `path`.
    pub fn open(path: &Path) -> Result<Self, AotError> {
        let data = fs::read(path)?;
        debug!("parsing {} byte image from {}", data.len(), path.display());
        Self::parse(data)
    }

    /// Parse an image already in memory. Only little-endian ELF64 is
    /// accepted; that is the only format the storage path writes and reads
    /// on the same machine.
    pub fn parse(data: Vec<u8>) -> Result<Self, AotError> {
        if data.len() < ELF64_EHDR_SIZE || data[0..4] != ELF_MAGIC {
            return Err(AotError::MalformedImage("not an ELF file".to_string()));
        }
        if data[4] != ELFCLASS64 || data[5] != ELFDATA2LSB {
            return Err(AotError::MalformedImage(
                "expected little-endian ELF64".to_string(),
            ));
        }
        let e_type = read_u16(&data, 16);
        let shoff = read_u64(&data, 40) as usize;
        let shentsize = read_u16(&data, 58) as usize;
        let shnum = read_u16(&data, 60) as usize;
        let shstrndx = read_u16(&data, 62) as usize;
        if shentsize != ELF64_SHDR_SIZE {
            return Err(AotError::MalformedImage(format!(
                "unexpected section header entry size {}",
                shentsize
            )));
        }
        let table_end = shoff + shnum * ELF64_SHDR_SIZE;
        if shnum == 0 || shstrndx >= shnum || table_end > data.len() {
            return Err(AotError::MalformedImage(
                "section header table out of bounds".to_string(),
            ));
        }
        if e_type == ET_DYN {
            // A shared object carries the sentinel after its section
            // headers; a short file lost its tail.
            let tail = table_end + IMAGE_END_SENTINEL.len();
            if data.len() < tail || data[tail - IMAGE_END_SENTINEL.len()..tail] != IMAGE_END_SENTINEL
            {
                return Err(AotError::MalformedImage(
                    "missing end-of-image sentinel".to_string(),
                ));
            }
        }

        let mut raw = Vec::with_capacity(shnum);
        for i in 0..shnum {
            let at = shoff + i * ELF64_SHDR_SIZE;
            raw.push((
                read_u32(&data, at),      // name offset
                read_u32(&data, at + 4),  // type
                read_u64(&data, at + 16), // addr
                read_u64(&data, at + 24), // offset
                read_u64(&data, at + 32), // size
                read_u32(&data, at + 40), // link
            ));
        }
        let (_, _, _, str_off, str_size, _) = raw[shstrndx];
        if str_off as usize + str_size as usize > data.len() {
            return Err(AotError::MalformedImage(
                ".shstrtab out of bounds".to_string(),
            ));
        }
        let strtab = &data[str_off as usize..(str_off + str_size) as usize];

        let mut sections = Vec::with_capacity(shnum);
        for (name_off, sh_type, addr, offset, size, link) in raw {
            if sh_type != SHT_NULL && offset as usize + size as usize > data.len() {
                return Err(AotError::MalformedImage(format!(
                    "section payload at {:#x}+{:#x} out of bounds",
                    offset, size
                )));
            }
            sections.push(SectionInfo {
                name: read_cstr(strtab, name_off as usize),
                sh_type,
                addr,
                offset,
                size,
                link,
            });
        }
        Ok(Self { data, e_type, sections })
    }

    pub fn sections(&self) -> &[SectionInfo] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&SectionInfo> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Raw bytes of a section, as recorded in its header.
    pub fn section_payload(&self, section: &SectionInfo) -> &[u8] {
        &self.data[section.offset as usize..(section.offset + section.size) as usize]
    }

    fn dynsym_and_strtab(&self) -> Result<(&SectionInfo, &SectionInfo), AotError> {
        let dynsym = self
            .sections
            .iter()
            .find(|s| s.sh_type == SHT_DYNSYM)
            .ok_or_else(|| AotError::MalformedImage("no .dynsym section".to_string()))?;
        let strtab = self
            .sections
            .get(dynsym.link as usize)
            .filter(|s| s.sh_type == SHT_STRTAB)
            .ok_or_else(|| AotError::MalformedImage(".dynsym links to no string table".to_string()))?;
        Ok((dynsym, strtab))
    }

    fn symbol_at(&self, dynsym: &SectionInfo, strtab: &SectionInfo, index: usize) -> LoadedSymbol {
        let entry = dynsym.offset as usize + index * ELF64_SYM_SIZE;
        LoadedSymbol {
            name: read_cstr(self.section_payload(strtab), read_u32(&self.data, entry) as usize),
            shndx: read_u16(&self.data, entry + 6),
            value: read_u64(&self.data, entry + 8),
            size: read_u64(&self.data, entry + 16),
        }
    }

    /// All dynamic symbols in table order, entry 0 (UNDEF) included.
    pub fn symbols(&self) -> Result<Vec<LoadedSymbol>, AotError> {
        let (dynsym, strtab) = self.dynsym_and_strtab()?;
        let count = dynsym.size as usize / ELF64_SYM_SIZE;
        Ok((0..count).map(|i| self.symbol_at(dynsym, strtab, i)).collect())
    }

    /// Resolve a name through the `.hash` section, the way the dynamic
    /// loader would. `Ok(None)` when no symbol matches.
    pub fn lookup(&self, name: &str) -> Result<Option<LoadedSymbol>, AotError> {
        let hash = self
            .sections
            .iter()
            .find(|s| s.sh_type == SHT_HASH)
            .ok_or_else(|| AotError::MalformedImage("no .hash section".to_string()))?;
        let payload = self.section_payload(hash);
        if payload.len() < 8 {
            return Err(AotError::MalformedImage(".hash section truncated".to_string()));
        }
        let nbucket = read_u32(payload, 0) as usize;
        let nchain = read_u32(payload, 4) as usize;
        if payload.len() < (2 + nbucket + nchain) * 4 || nbucket == 0 {
            return Err(AotError::MalformedImage(".hash arrays truncated".to_string()));
        }
        let (dynsym, strtab) = self.dynsym_and_strtab()?;
        let nsyms = dynsym.size as usize / ELF64_SYM_SIZE;
        if nchain != nsyms {
            return Err(AotError::MalformedImage(format!(
                "nchain {} does not match {} symbols",
                nchain, nsyms
            )));
        }
        let bucket_at = |i: usize| read_u32(payload, (2 + i) * 4) as usize;
        let chain_at = |i: usize| read_u32(payload, (2 + nbucket + i) * 4) as usize;

        let mut index = bucket_at(elf_hash_sysv(name) as usize % nbucket);
        while index != 0 {
            if index >= nsyms {
                return Err(AotError::MalformedImage(format!(
                    "hash chain points at symbol {} of {}",
                    index, nsyms
                )));
            }
            let sym = self.symbol_at(dynsym, strtab, index);
            if sym.name == name {
                return Ok(Some(sym));
            }
            index = chain_at(index);
        }
        Ok(None)
    }

    /// Locate a method's serialized envelope inside the section its symbol
    /// points at. `Ok(None)` when the name is absent.
    pub fn method_envelope(&self, name: &str) -> Result<Option<&[u8]>, AotError> {
        let sym = match self.lookup(name)? {
            Some(sym) => sym,
            None => return Ok(None),
        };
        let section = self.sections.get(sym.shndx as usize).ok_or_else(|| {
            AotError::MalformedImage(format!("symbol '{}' points at no section", name))
        })?;
        let start = sym.value.checked_sub(section.addr).ok_or_else(|| {
            AotError::MalformedImage(format!("symbol '{}' below its section", name))
        })?;
        let end = start + sym.size;
        if end > section.size {
            return Err(AotError::MalformedImage(format!(
                "symbol '{}' overruns its section",
                name
            )));
        }
        let payload = self.section_payload(section);
        Ok(Some(&payload[start as usize..end as usize]))
    }
}

// ── Dynamic loading ──────────────────────────────────────────────────────────

/// A shared object opened through the platform dynamic loader.
#[derive(Debug)]
pub struct DynamicImage {
    lib: libloading::Library,
}

impl DynamicImage {
    /// `dlopen` the image. Failure to open is an error, unlike a missing
    /// symbol later.
    pub fn open(path: &Path) -> Result<Self, AotError> {
        let lib = unsafe { libloading::Library::new(path) }
            .map_err(|e| AotError::DynamicLoad(e.to_string()))?;
        debug!("dynamically loaded {}", path.display());
        Ok(Self { lib })
    }

    /// `dlsym` a method entry. A name the image does not export yields
    /// `Ok(None)`.
    pub fn entry_address(&self, name: &str) -> Result<Option<*const u8>, AotError> {
        match unsafe { self.lib.get::<*const u8>(name.as_bytes()) } {
            Ok(sym) => Ok(Some(*sym)),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::AotMethodHeader;
    use crate::elf::image::{ElfConfig, ElfImageBuilder, MethodSymbol, SharedObjectImage};

    fn sample_image() -> Vec<u8> {
        let foo = AotMethodHeader::new(&[0x55, 0x5d, 0xc3], &[]).serialize_to_vec();
        let bar = AotMethodHeader::new(&[0x90, 0xc3], &[]).serialize_to_vec();
        let mut image = SharedObjectImage::new(ElfConfig::default());
        image.methods = vec![
            MethodSymbol { name: "foo".to_string(), offset: 0, size: foo.len() as u64 },
            MethodSymbol {
                name: "bar".to_string(),
                offset: foo.len() as u64,
                size: bar.len() as u64,
            },
        ];
        image.code = foo;
        image.code.extend_from_slice(&bar);
        image.build().unwrap()
    }

    #[test]
    fn test_sections_match_recorded_offsets() {
        let bytes = sample_image();
        let reader = ImageReader::parse(bytes).unwrap();
        let names: Vec<&str> = reader.sections().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            ["", ".aotcd", ".shstrtab", ".dynsym", ".dynstr", ".hash", ".data", ".dynamic"]
        );
        // The recorded .shstrtab payload must itself contain the names.
        let shstrtab = reader.section(".shstrtab").unwrap();
        let payload = reader.section_payload(shstrtab);
        assert!(payload.windows(7).any(|w| w == b".aotcd\0"));
    }

    #[test]
    fn test_nchain_counts_undef_and_dynamic() {
        let bytes = sample_image();
        let reader = ImageReader::parse(bytes).unwrap();
        let hash = reader.section(".hash").unwrap();
        let payload = reader.section_payload(hash);
        // Two methods + UNDEF + _DYNAMIC.
        assert_eq!(read_u32(payload, 4), 4);
        assert_eq!(reader.symbols().unwrap().len(), 4);
    }

    #[test]
    fn test_lookup_resolves_all_methods() {
        let bytes = sample_image();
        let reader = ImageReader::parse(bytes).unwrap();
        for name in ["foo", "bar", "_DYNAMIC"] {
            let sym = reader.lookup(name).unwrap().unwrap_or_else(|| panic!("{} missing", name));
            assert_eq!(sym.name, name);
        }
        assert!(reader.lookup("baz").unwrap().is_none());
    }

    #[test]
    fn test_method_envelope_round_trips() {
        let bytes = sample_image();
        let reader = ImageReader::parse(bytes).unwrap();
        let envelope = reader.method_envelope("foo").unwrap().unwrap();
        let hdr = AotMethodHeader::deserialize(envelope).unwrap();
        assert_eq!(hdr.code, &[0x55, 0x5d, 0xc3]);
        assert!(reader.method_envelope("baz").unwrap().is_none());
    }

    #[test]
    fn test_executable_read_back() {
        use crate::elf::image::ExecutableImage;
        let mut image = ExecutableImage::new(ElfConfig::default());
        image.code = vec![0x90, 0x90, 0xc3];
        image.symbols =
            vec![MethodSymbol { name: "main".to_string(), offset: 0, size: 3 }];
        let reader = ImageReader::parse(image.build().unwrap()).unwrap();
        assert_eq!(reader.e_type, ET_EXEC);
        let text = reader.section(".text").unwrap();
        assert_eq!(reader.section_payload(text), &[0x90, 0x90, 0xc3]);
        let syms = reader.symbols().unwrap();
        assert_eq!(syms.len(), 2);
        assert_eq!(syms[1].name, "main");
    }

    #[test]
    fn test_truncated_image_rejected() {
        let mut bytes = sample_image();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            ImageReader::parse(bytes),
            Err(AotError::MalformedImage(_))
        ));
    }

    #[test]
    fn test_not_an_elf() {
        assert!(ImageReader::parse(b"hello".to_vec()).is_err());
    }

    #[test]
    fn test_dynamic_open_missing_file_is_error() {
        let err = DynamicImage::open(Path::new("/nonexistent/image.so")).unwrap_err();
        assert!(matches!(err, AotError::DynamicLoad(_)));
    }

    fn host_machine() -> u16 {
        if cfg!(target_arch = "x86_64") {
            EM_X86_64
        } else if cfg!(target_arch = "aarch64") {
            EM_AARCH64
        } else if cfg!(target_arch = "riscv64") {
            EM_RISCV
        } else {
            EM_386
        }
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_emitted_image_loads_through_the_platform_loader() {
        let foo_code = [0x55u8, 0x5d, 0xc3];
        let bar_code = [0x90u8, 0xc3];
        let foo = AotMethodHeader::new(&foo_code, &[]).serialize_to_vec();
        let bar = AotMethodHeader::new(&bar_code, &[]).serialize_to_vec();
        let config = ElfConfig { e_machine: host_machine(), ..ElfConfig::default() };
        let mut image = SharedObjectImage::new(config);
        image.methods = vec![
            MethodSymbol { name: "foo".to_string(), offset: 0, size: foo.len() as u64 },
            MethodSymbol {
                name: "bar".to_string(),
                offset: foo.len() as u64,
                size: bar.len() as u64,
            },
        ];
        image.code = foo;
        image.code.extend_from_slice(&bar);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("methods.so");
        image.write_to(&path).unwrap();

        let lib = DynamicImage::open(&path).unwrap();
        assert!(lib.entry_address("baz").unwrap().is_none());

        // The exported addresses point at the mapped envelopes; decode them
        // in place and compare against what was stored.
        for (name, code, len) in [
            ("foo", &foo_code[..], image.methods[0].size as usize),
            ("bar", &bar_code[..], image.methods[1].size as usize),
        ] {
            let addr = lib.entry_address(name).unwrap().unwrap_or_else(|| panic!("{} missing", name));
            let envelope = unsafe { std::slice::from_raw_parts(addr, len) };
            let hdr = AotMethodHeader::deserialize(envelope).unwrap();
            assert_eq!(hdr.code, code);
        }
    }
}
