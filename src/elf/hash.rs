//! SysV `.hash` section construction.
//!
//! The dynamic loader resolves a name by hashing it, indexing `bucket[h %
//! nbucket]`, and following `chain` links until the names match or the chain
//! hits index 0. Each bucket holds the first symbol (in table order) hashing
//! to it; later colliders are appended through `chain`, so a walk visits
//! symbols in emission order. The serialized form is
//! `[nbucket][nchain][buckets...][chains...]`, all u32 little-endian.

use crate::error::AotError;

/// Default bucket-count ladder. The bucket count for a table is the largest
/// entry not exceeding the symbol count; counts above the top rung reuse it
/// (longer chains, still correct).
pub const DEFAULT_BUCKET_LADDER: &[u32] = &[
    0, 1, 3, 17, 37, 67, 97, 131, 197, 263, 521, 1031, 2053, 4099, 8209,
    16411, 32771,
];

/// Classic SysV ELF hash over a symbol name.
pub fn elf_hash_sysv(name: &str) -> u32 {
    let mut h: u32 = 0;
    for &b in name.as_bytes() {
        h = (h << 4).wrapping_add(b as u32);
        let g = h & 0xf000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h &= !g;
    }
    h
}

/// Pick a bucket count for `nsyms` symbols from `ladder`.
///
/// Returns the largest ladder entry `<= nsyms`, or the top rung when the
/// count exceeds every entry. A ladder with no nonzero entry cannot hash
/// anything.
pub fn bucket_count(nsyms: usize, ladder: &[u32]) -> Result<u32, AotError> {
    let mut best = 0u32;
    for &rung in ladder {
        if rung as usize <= nsyms && rung > best {
            best = rung;
        }
    }
    if best == 0 {
        // Every usable table has at least the UNDEF symbol plus one name.
        best = ladder.iter().copied().filter(|&r| r > 0).min().unwrap_or(0);
    }
    if best == 0 {
        return Err(AotError::EmptyHashLadder);
    }
    Ok(best)
}

/// A built SysV hash table, ready for serialization into a `.hash` section.
pub struct SysvHashTable {
    pub nbucket: u32,
    pub buckets: Vec<u32>,
    pub chains: Vec<u32>,
}

impl SysvHashTable {
    /// Build the table for a symbol table whose entry 0 is the UNDEF symbol
    /// and whose remaining entries carry `names` in order. `nchain` equals
    /// the total symbol count (`names.len() + 1`).
    pub fn build(names: &[&str], ladder: &[u32]) -> Result<Self, AotError> {
        let nchain = names.len() + 1;
        let nbucket = bucket_count(nchain, ladder)?;
        let mut buckets = vec![0u32; nbucket as usize];
        let mut chains = vec![0u32; nchain];
        // Last symbol appended to each bucket's chain, 0 for empty.
        let mut tails = vec![0u32; nbucket as usize];
        for (i, name) in names.iter().enumerate() {
            let sym_index = (i + 1) as u32;
            let slot = (elf_hash_sysv(name) % nbucket) as usize;
            if buckets[slot] == 0 {
                buckets[slot] = sym_index;
            } else {
                chains[tails[slot] as usize] = sym_index;
            }
            tails[slot] = sym_index;
        }
        Ok(Self { nbucket, buckets, chains })
    }

    pub fn nchain(&self) -> u32 {
        self.chains.len() as u32
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        (2 + self.buckets.len() + self.chains.len()) * 4
    }

    /// Append the section payload to `buf`.
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.nbucket.to_le_bytes());
        buf.extend_from_slice(&self.nchain().to_le_bytes());
        for &b in &self.buckets {
            buf.extend_from_slice(&b.to_le_bytes());
        }
        for &c in &self.chains {
            buf.extend_from_slice(&c.to_le_bytes());
        }
    }

    /// Resolve `name` to a symbol index the way the dynamic loader would.
    /// `sym_name` maps a symbol index back to its name. Returns `None` when
    /// the chain runs out.
    pub fn lookup(&self, name: &str, sym_name: impl Fn(u32) -> Option<String>) -> Option<u32> {
        let slot = (elf_hash_sysv(name) % self.nbucket) as usize;
        let mut idx = self.buckets[slot];
        while idx != 0 {
            if sym_name(idx).as_deref() == Some(name) {
                return Some(idx);
            }
            idx = self.chains[idx as usize];
        }
        None
    }
}
