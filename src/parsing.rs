//! The records that per-format parsers deliver to the core. The core never looks at raw file
//! bytes; by the time an input reaches the symbol table it has been reduced to one of the
//! variants of [`ParsedInput`], each carrying the symbols that format contributes.

use crate::symbol::Binding;
use crate::symbol::SymType;
use crate::symbol::Visibility;

/// Identifies an input file within the registry. IDs are assigned in admission order.
#[derive(derive_more::Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[debug("file-{_0}")]
pub struct FileId(u32);

impl FileId {
    pub(crate) fn from_usize(value: usize) -> FileId {
        FileId(u32::try_from(value).expect("file count overflowed 32 bits"))
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The machine-level identity of an ELF input: class byte, data-encoding byte and machine tag,
/// with values from `object::elf`. Inputs with differing properties can't be linked together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfProps {
    pub class: u8,
    pub data: u8,
    pub machine: u16,
}

impl ElfProps {
    pub fn elf64_x86_64() -> ElfProps {
        ElfProps {
            class: object::elf::ELFCLASS64,
            data: object::elf::ELFDATA2LSB,
            machine: object::elf::EM_X86_64,
        }
    }

    pub fn elf64_aarch64() -> ElfProps {
        ElfProps {
            class: object::elf::ELFCLASS64,
            data: object::elf::ELFDATA2LSB,
            machine: object::elf::EM_AARCH64,
        }
    }
}

/// One symbol from a relocatable object's symbol table.
#[derive(Debug, Clone, Copy)]
pub struct ObjSymbol<'data> {
    pub name: &'data [u8],
    pub binding: Binding,
    pub visibility: Visibility,
    pub sym_type: SymType,
    pub placement: SymPlacement,
}

#[derive(Debug, Clone, Copy)]
pub enum SymPlacement {
    /// A reference to a definition expected elsewhere.
    Undefined,

    /// A definition within one of the object's sections.
    Section { section: u32, value: u64, size: u64 },

    /// A tentative definition, mergeable with others of the same name.
    Common { size: u64, alignment: u64 },

    /// A definition not tied to any section.
    Absolute { value: u64 },
}

#[derive(Debug)]
pub struct ObjectFile<'data> {
    pub name: &'data str,
    pub props: ElfProps,
    pub symbols: Vec<ObjSymbol<'data>>,

    /// Set on objects synthesised by the link-time code generator. Their definitions supersede
    /// the bitcode records they originate from instead of conflicting with them.
    pub produced_by_lto: bool,
}

impl<'data> ObjectFile<'data> {
    pub fn new(name: &'data str, props: ElfProps, symbols: Vec<ObjSymbol<'data>>) -> Self {
        Self {
            name,
            props,
            symbols,
            produced_by_lto: false,
        }
    }

    fn defined_global_names(&self) -> Vec<&'data [u8]> {
        self.symbols
            .iter()
            .filter(|sym| {
                sym.binding != Binding::Local && !matches!(sym.placement, SymPlacement::Undefined)
            })
            .map(|sym| sym.name)
            .collect()
    }
}

/// An entry in an archive's symbol index: the named symbol is defined by the given member.
#[derive(Debug, Clone, Copy)]
pub struct LazyExport<'data> {
    pub name: &'data [u8],
    pub member: u32,
}

/// An archive whose members have been parsed but not yet pulled into the link. Members are
/// surrendered at most once, when a strong reference demands them.
#[derive(Debug)]
pub struct ArchiveFile<'data> {
    pub name: &'data str,
    members: Vec<Option<ObjectFile<'data>>>,
    pub(crate) index: Vec<LazyExport<'data>>,
}

impl<'data> ArchiveFile<'data> {
    /// Builds an archive whose symbol index is derived from the members' defined globals.
    pub fn new(name: &'data str, members: Vec<ObjectFile<'data>>) -> Self {
        let mut index = Vec::new();
        let members = members
            .into_iter()
            .enumerate()
            .map(|(member, object)| {
                for sym_name in object.defined_global_names() {
                    index.push(LazyExport {
                        name: sym_name,
                        member: member as u32,
                    });
                }
                Some(object)
            })
            .collect();
        Self {
            name,
            members,
            index,
        }
    }

    /// Builds an archive with an explicit symbol index. Index entries may name members that are
    /// absent; demanding those is a no-op.
    pub fn with_index(
        name: &'data str,
        members: Vec<Option<ObjectFile<'data>>>,
        index: Vec<LazyExport<'data>>,
    ) -> Self {
        Self {
            name,
            members,
            index,
        }
    }

    pub(crate) fn take_member(&mut self, member: u32) -> Option<ObjectFile<'data>> {
        self.members.get_mut(member as usize).and_then(Option::take)
    }
}

/// A whole object file that participates in the link only if one of its definitions is demanded.
#[derive(Debug)]
pub struct LazyObjectFile<'data> {
    pub name: &'data str,
    pub(crate) defined: Vec<&'data [u8]>,
    object: Option<ObjectFile<'data>>,
}

impl<'data> LazyObjectFile<'data> {
    pub fn new(name: &'data str, object: ObjectFile<'data>) -> Self {
        Self {
            name,
            defined: object.defined_global_names(),
            object: Some(object),
        }
    }

    pub(crate) fn take(&mut self) -> Option<ObjectFile<'data>> {
        self.object.take()
    }
}

/// One symbol exported by a shared object.
#[derive(Debug, Clone, Copy)]
pub struct DynSymbol<'data> {
    pub name: &'data [u8],
    pub visibility: Visibility,
    pub sym_type: SymType,

    /// The name of the version definition the symbol is bound to, if the library versions it.
    pub verdef: Option<&'data [u8]>,
}

#[derive(Debug)]
pub struct SharedFile<'data> {
    pub name: &'data str,
    pub props: ElfProps,
    pub soname: &'data [u8],
    pub symbols: Vec<DynSymbol<'data>>,

    /// Names the library expects the rest of the link to define.
    pub undefined: Vec<&'data [u8]>,

    /// Whether any non-weak reference resolved to this library. Feeds DT_NEEDED emission.
    pub is_needed: bool,
}

impl<'data> SharedFile<'data> {
    pub fn new(
        name: &'data str,
        props: ElfProps,
        soname: &'data [u8],
        symbols: Vec<DynSymbol<'data>>,
        undefined: Vec<&'data [u8]>,
    ) -> Self {
        Self {
            name,
            props,
            soname,
            symbols,
            undefined,
            is_needed: false,
        }
    }
}

/// One symbol from a bitcode unit's symbol list.
#[derive(Debug, Clone, Copy)]
pub struct BitcodeSymbol<'data> {
    pub name: &'data [u8],
    pub is_undefined: bool,
    pub is_weak: bool,
    pub visibility: Visibility,
    pub sym_type: SymType,
    pub can_omit_from_dynsym: bool,
}

#[derive(Debug)]
pub struct BitcodeFile<'data> {
    pub name: &'data str,
    pub symbols: Vec<BitcodeSymbol<'data>>,
}

#[derive(Debug)]
pub enum ParsedInput<'data> {
    Object(ObjectFile<'data>),
    Archive(ArchiveFile<'data>),
    LazyObject(LazyObjectFile<'data>),
    Shared(SharedFile<'data>),
    Bitcode(BitcodeFile<'data>),
}

impl<'data> ParsedInput<'data> {
    pub fn name(&self) -> &'data str {
        match self {
            ParsedInput::Object(f) => f.name,
            ParsedInput::Archive(f) => f.name,
            ParsedInput::LazyObject(f) => f.name,
            ParsedInput::Shared(f) => f.name,
            ParsedInput::Bitcode(f) => f.name,
        }
    }

    pub(crate) fn elf_props(&self) -> Option<ElfProps> {
        match self {
            ParsedInput::Object(f) => Some(f.props),
            ParsedInput::Shared(f) => Some(f.props),
            _ => None,
        }
    }

    pub(crate) fn is_bitcode(&self) -> bool {
        matches!(self, ParsedInput::Bitcode(_))
    }
}
