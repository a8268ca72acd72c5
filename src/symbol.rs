//! Symbol names and the per-symbol attributes that resolution operates on.

use crate::hash::PreHashed;
use crate::hash::hash_bytes;
use std::fmt::Display;

/// A symbol name as it appears in an input's symbol table. May still contain a version suffix;
/// names with different suffixes are distinct keys in the name index.
#[derive(derive_more::Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolName<'data> {
    #[debug("{}", String::from_utf8_lossy(bytes))]
    bytes: &'data [u8],
}

impl<'data> SymbolName<'data> {
    pub fn new(bytes: &'data [u8]) -> SymbolName<'data> {
        Self { bytes }
    }

    pub fn prehashed(bytes: &'data [u8]) -> PreHashed<SymbolName<'data>> {
        PreHashed::new(Self::new(bytes), hash_bytes(bytes))
    }

    pub fn bytes(&self) -> &'data [u8] {
        self.bytes
    }
}

impl Display for SymbolName<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Ok(s) = std::str::from_utf8(self.bytes) {
            Display::fmt(s, f)
        } else {
            write!(f, "INVALID UTF-8({:?})", self.bytes)
        }
    }
}

/// A name split into its base and optional version parts. Symbols can carry version specifiers,
/// e.g. `foo@1.1` or `foo@@2.0`. The latter, with double-at, marks the default version.
pub struct RawSymbolName<'data> {
    pub base: &'data [u8],
    pub version: Option<&'data [u8]>,
    pub is_default: bool,
}

impl<'data> RawSymbolName<'data> {
    pub fn parse(name: &'data [u8]) -> Self {
        let mut base = name;
        let mut version = None;
        let mut is_default = true;

        if let Some(at_offset) = memchr::memchr(b'@', name) {
            if name[at_offset..].starts_with(b"@@") {
                version = Some(&name[at_offset + 2..]);
            } else {
                version = Some(&name[at_offset + 1..]);
                is_default = false;
            }
            base = &name[..at_offset];
        }

        RawSymbolName {
            base,
            version,
            is_default,
        }
    }
}

impl Display for RawSymbolName<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.base))?;
        if let Some(version) = self.version {
            write!(
                f,
                "{}{}",
                if self.is_default { "@@" } else { "@" },
                String::from_utf8_lossy(version)
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Global,
    Weak,
    Local,
}

/// Declaration order matches the numeric ELF visibility values, so the derived `Ord` gives the
/// ordering that `merge` relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Visibility {
    Default,
    Internal,
    Hidden,
    Protected,
}

impl Visibility {
    /// Combines two visibilities, keeping the stricter one. Non-default always beats default;
    /// between two non-defaults the numerically smaller wins.
    pub fn merge(self, other: Visibility) -> Visibility {
        if self == Visibility::Default {
            return other;
        }
        if other == Visibility::Default {
            return self;
        }
        self.min(other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymType {
    /// No type has been observed for the symbol yet. Lazy records start out like this and pick
    /// the type up from references that target them.
    Unknown,
    NoType,
    Object,
    Func,
    Tls,
    IFunc,
}

impl SymType {
    pub fn is_tls(self) -> bool {
        self == SymType::Tls
    }
}

/// Version ids, as stored in a symbol's envelope. Id 0 is reserved for names whose version
/// couldn't be resolved; user-declared versions count up from [`FIRST_USER_VERSION`]. Non-default
/// versions additionally carry the hidden bit.
pub const VER_NDX_RESERVED: u16 = 0;
pub const VER_NDX_LOCAL: u16 = 1;
pub const VER_NDX_GLOBAL: u16 = 2;
pub const FIRST_USER_VERSION: u16 = 3;
pub const VERSYM_HIDDEN: u16 = 0x8000;
