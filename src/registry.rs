//! The load/store driver: the name-keyed registry of compiled methods and
//! its collaborators.
//!
//! A compiled method enters the registry as a `MethodRecord` (owned code
//! plus relocation group). From there it can be stored into a storage
//! backend, loaded back on demand, relocated in place, and copied into a
//! code cache for execution. The registry is ordered by method name so
//! emission is deterministic: flushing the same set of methods twice
//! produces byte-identical images.
//!
//! Storage is a trait; the in-memory backend serves tests and the ELF
//! backend persists every entry into one shared-object image whose
//! `.aotcd` section holds the serialized envelopes back-to-back.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use crate::codec::AotMethodHeader;
use crate::elf::image::{ElfConfig, ElfImageBuilder, MethodSymbol, SharedObjectImage};
use crate::elf::loader::ImageReader;
use crate::error::AotError;
use crate::reloc::{HeaderSizeTable, RelocationApplier, RelocationRecordGroup};

// ── Method records ───────────────────────────────────────────────────────────

/// Owned form of one compiled method: the registry's unit of storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRecord {
    code: Vec<u8>,
    relocations: Vec<u8>,
}

impl MethodRecord {
    pub fn new(code: Vec<u8>, relocations: Vec<u8>) -> Self {
        Self { code, relocations }
    }

    /// Rebuild a record from a serialized envelope, taking ownership of the
    /// bytes the borrowed header views.
    pub fn from_envelope(envelope: &[u8]) -> Result<Self, AotError> {
        let hdr = AotMethodHeader::deserialize(envelope)?;
        Ok(Self { code: hdr.code.to_vec(), relocations: hdr.relocations.to_vec() })
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn relocations(&self) -> &[u8] {
        &self.relocations
    }

    /// Borrowed header over this record, ready for serialization.
    pub fn header(&self) -> AotMethodHeader<'_> {
        AotMethodHeader::new(&self.code, &self.relocations)
    }
}

// ── Storage backends ─────────────────────────────────────────────────────────

/// Keyed persistence of serialized method envelopes.
pub trait AotStorage {
    fn store_entry(&mut self, name: &str, envelope: &[u8]) -> Result<(), AotError>;
    fn load_entry(&mut self, name: &str) -> Result<Option<Vec<u8>>, AotError>;
}

/// Map-backed storage with no persistence; the default for tests and for
/// single-process use.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: BTreeMap<String, Vec<u8>>,
}

impl AotStorage for InMemoryStorage {
    fn store_entry(&mut self, name: &str, envelope: &[u8]) -> Result<(), AotError> {
        self.entries.insert(name.to_string(), envelope.to_vec());
        Ok(())
    }

    fn load_entry(&mut self, name: &str) -> Result<Option<Vec<u8>>, AotError> {
        Ok(self.entries.get(name).cloned())
    }
}

/// Storage backed by a shared-object image on disk. Stores accumulate in
/// memory until `persist` emits the image; loads resolve against the image
/// already on disk via its hash section.
pub struct ElfStorage {
    path: PathBuf,
    config: ElfConfig,
    pending: BTreeMap<String, Vec<u8>>,
}

impl ElfStorage {
    pub fn new(path: impl AsRef<Path>, config: ElfConfig) -> Self {
        Self { path: path.as_ref().to_path_buf(), config, pending: BTreeMap::new() }
    }

    /// Emit every stored entry into the backing image file.
    pub fn persist(&self) -> Result<(), AotError> {
        let mut image = SharedObjectImage::new(self.config.clone());
        for (name, envelope) in &self.pending {
            image.methods.push(MethodSymbol {
                name: name.clone(),
                offset: image.code.len() as u64,
                size: envelope.len() as u64,
            });
            image.code.extend_from_slice(envelope);
        }
        image.write_to(&self.path)
    }

    fn read_from_image(&self, name: &str) -> Result<Option<Vec<u8>>, AotError> {
        let reader = match ImageReader::open(&self.path) {
            Ok(reader) => reader,
            Err(AotError::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(reader.method_envelope(name)?.map(|bytes| bytes.to_vec()))
    }
}

impl AotStorage for ElfStorage {
    fn store_entry(&mut self, name: &str, envelope: &[u8]) -> Result<(), AotError> {
        self.pending.insert(name.to_string(), envelope.to_vec());
        Ok(())
    }

    fn load_entry(&mut self, name: &str) -> Result<Option<Vec<u8>>, AotError> {
        if let Some(envelope) = self.pending.get(name) {
            return Ok(Some(envelope.clone()));
        }
        self.read_from_image(name)
    }
}

// ── Code cache ───────────────────────────────────────────────────────────────

/// Stable reference to one allocation inside a code cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeHandle(usize);

/// Destination for code copied out of the registry before execution.
pub trait CodeCache {
    /// Reserve `size` bytes. Exhaustion is a capacity error.
    fn allocate(&mut self, size: usize) -> Result<CodeHandle, AotError>;
    fn code(&self, handle: CodeHandle) -> &[u8];
    fn code_mut(&mut self, handle: CodeHandle) -> &mut [u8];
}

/// Bump allocator over heap blocks with a fixed total budget. Stands in for
/// an executable-memory manager; allocations never move once handed out.
pub struct BumpCodeCache {
    capacity: usize,
    used: usize,
    blocks: Vec<Box<[u8]>>,
}

impl BumpCodeCache {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, used: 0, blocks: Vec::new() }
    }
}

impl CodeCache for BumpCodeCache {
    fn allocate(&mut self, size: usize) -> Result<CodeHandle, AotError> {
        if self.used + size > self.capacity {
            return Err(AotError::Capacity(size, self.capacity - self.used));
        }
        self.used += size;
        self.blocks.push(vec![0u8; size].into_boxed_slice());
        Ok(CodeHandle(self.blocks.len() - 1))
    }

    fn code(&self, handle: CodeHandle) -> &[u8] {
        &self.blocks[handle.0]
    }

    fn code_mut(&mut self, handle: CodeHandle) -> &mut [u8] {
        &mut self.blocks[handle.0]
    }
}

// ── Driver ───────────────────────────────────────────────────────────────────

/// Registry of compiled methods plus the operations that move them between
/// compile time, storage, and execution.
pub struct AotLoadStoreDriver<S: AotStorage> {
    methods: BTreeMap<String, MethodRecord>,
    storage: S,
    external_items: BTreeMap<String, u64>,
    loaded_code: BTreeMap<String, CodeHandle>,
    header_sizes: HeaderSizeTable,
}

impl<S: AotStorage> AotLoadStoreDriver<S> {
    pub fn new(storage: S) -> Self {
        Self {
            methods: BTreeMap::new(),
            storage,
            external_items: BTreeMap::new(),
            loaded_code: BTreeMap::new(),
            header_sizes: HeaderSizeTable::default(),
        }
    }

    pub fn with_header_sizes(mut self, sizes: HeaderSizeTable) -> Self {
        self.header_sizes = sizes;
        self
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Put a record into the registry, replacing any previous one of the
    /// same name.
    pub fn register_method_header(&mut self, name: &str, record: MethodRecord) {
        self.methods.insert(name.to_string(), record);
    }

    /// Build a record from compile-time buffers and register it.
    pub fn create_and_register(&mut self, name: &str, code: &[u8], relocations: &[u8]) {
        self.register_method_header(name, MethodRecord::new(code.to_vec(), relocations.to_vec()));
    }

    /// Map a runtime item (helper, data table) to its address for
    /// relocation appliers to resolve against.
    pub fn register_external_item(&mut self, name: &str, address: u64) {
        self.external_items.insert(name.to_string(), address);
    }

    pub fn item_address(&self, name: &str) -> Option<u64> {
        self.external_items.get(name).copied()
    }

    /// Pull a method from storage into the registry if it is not already
    /// present.
    fn ensure_loaded(&mut self, name: &str) -> Result<(), AotError> {
        if self.methods.contains_key(name) {
            return Ok(());
        }
        if let Some(envelope) = self.storage.load_entry(name)? {
            debug!("loaded method '{}' from storage", name);
            self.methods.insert(name.to_string(), MethodRecord::from_envelope(&envelope)?);
        }
        Ok(())
    }

    /// Look up a method, falling back to the storage backend for names the
    /// registry has not seen in this process.
    pub fn registered_method_header(&mut self, name: &str) -> Result<Option<&MethodRecord>, AotError> {
        self.ensure_loaded(name)?;
        Ok(self.methods.get(name))
    }

    /// Serialize a registered method into storage. A name the registry does
    /// not know is a no-op, matching the compile pipeline where storing is
    /// fired unconditionally after an attempt that may have failed.
    pub fn store_header_for_compiled_method(&mut self, name: &str) -> Result<(), AotError> {
        if let Some(record) = self.methods.get(name) {
            let envelope = record.header().serialize_to_vec();
            self.storage.store_entry(name, &envelope)?;
            debug!("stored {} byte envelope for '{}'", envelope.len(), name);
        }
        Ok(())
    }

    /// Apply a method's relocation group to its registered code, in place.
    pub fn relocate_registered_method(
        &mut self,
        name: &str,
        applier: &mut dyn RelocationApplier,
    ) -> Result<(), AotError> {
        self.ensure_loaded(name)?;
        let Self { methods, header_sizes, .. } = self;
        let record = methods
            .get_mut(name)
            .ok_or_else(|| AotError::MissingMethod(name.to_string()))?;
        let MethodRecord { code, relocations } = record;
        let group = RelocationRecordGroup::parse(relocations)?;
        group.apply_relocations(code, applier, header_sizes)
    }

    /// Copy a method's code into the cache and hand back the allocation.
    /// Repeated calls return the same handle. `Ok(None)` when the method is
    /// unknown everywhere or has no code.
    pub fn get_method_code(
        &mut self,
        name: &str,
        cache: &mut dyn CodeCache,
    ) -> Result<Option<CodeHandle>, AotError> {
        if let Some(&handle) = self.loaded_code.get(name) {
            return Ok(Some(handle));
        }
        self.ensure_loaded(name)?;
        let record = match self.methods.get(name) {
            Some(record) => record,
            None => return Ok(None),
        };
        if record.code.is_empty() {
            return Ok(None);
        }
        let handle = cache.allocate(record.code.len())?;
        cache.code_mut(handle).copy_from_slice(&record.code);
        self.loaded_code.insert(name.to_string(), handle);
        debug!("installed '{}' into the code cache", name);
        Ok(Some(handle))
    }

    /// Consolidate every registered method into a shared-object builder:
    /// envelopes serialized back-to-back in registration-name order, one
    /// symbol per method.
    pub fn consolidate(&self, config: ElfConfig) -> SharedObjectImage {
        let mut image = SharedObjectImage::new(config);
        for (name, record) in &self.methods {
            let envelope = record.header().serialize_to_vec();
            image.methods.push(MethodSymbol {
                name: name.clone(),
                offset: image.code.len() as u64,
                size: envelope.len() as u64,
            });
            image.code.extend_from_slice(&envelope);
        }
        image
    }

    /// Consolidate and write the image file.
    pub fn emit_shared_object(&self, path: &Path, config: ElfConfig) -> Result<(), AotError> {
        self.consolidate(config).write_to(path)
    }
}
