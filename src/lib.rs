//! Persistence of ahead-of-time compiled native code in ELF images.
//!
//! Compiled methods enter as raw code plus relocation records, travel
//! through a name-keyed registry and a storage backend, and come back out
//! as executable bytes after relocation. The pieces:
//!
//! - [`elf::image`] — emitters for executable, relocatable, and
//!   shared-object images; the shared-object kind carries serialized method
//!   envelopes in an `.aotcd` section resolvable through a SysV `.hash`
//!   table.
//! - [`elf::loader`] — file read-back and `dlopen`-based loading.
//! - [`codec`] — the per-method envelope wire format with zero-copy
//!   deserialization.
//! - [`reloc`] — relocation record groups and their application through the
//!   `RelocationApplier` seam.
//! - [`registry`] — the load/store driver tying registry, storage, and code
//!   cache together.

// ELF structure writers mirror the on-disk field order; folding their
// parameters into structs would just duplicate the layout definitions.
#![allow(clippy::too_many_arguments)]

pub mod codec;
pub mod elf;
pub mod error;
pub mod registry;
pub mod reloc;

pub use codec::AotMethodHeader;
pub use error::AotError;
pub use registry::AotLoadStoreDriver;
