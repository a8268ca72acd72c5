//! The symbol table at the heart of the link. Every global symbol record from every admitted
//! input funnels through here; the table keeps one envelope per distinct name and applies the
//! precedence rules to decide which definition each envelope ends up holding.
//!
//! Envelopes are allocated append-only and identified by [`SymbolId`], so an id taken early in
//! the link stays valid no matter how many payload replacements happen later. That stability is
//! what the `--wrap` rewiring and the replace-body pattern rely on.

use crate::args::Args;
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::hash::PassThroughHashMap;
use crate::lto::LtoBackend;
use crate::parsing::ElfProps;
use crate::parsing::FileId;
use crate::parsing::ObjSymbol;
use crate::parsing::ParsedInput;
use crate::parsing::SymPlacement;
use crate::symbol::Binding;
use crate::symbol::RawSymbolName;
use crate::symbol::SymType;
use crate::symbol::SymbolName;
use crate::symbol::VER_NDX_GLOBAL;
use crate::symbol::VER_NDX_LOCAL;
use crate::symbol::VER_NDX_RESERVED;
use crate::symbol::VERSYM_HIDDEN;
use crate::symbol::Visibility;
use crate::version_script::VersionScript;
use crate::version_script::VersionScriptData;
use bumpalo::Bump;
use glob::Pattern;
use hashbrown::HashSet;
use std::fmt::Display;
use symbolic_demangle::demangle;

/// An ID for a symbol envelope. Stable for the whole link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(u32);

impl SymbolId {
    pub(crate) fn from_usize(value: usize) -> SymbolId {
        SymbolId(u32::try_from(value).expect("symbol count overflowed 32 bits"))
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl Display for SymbolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The payload slot of an envelope: what the name currently resolves to.
#[derive(Debug, Clone, Copy)]
pub enum SymBody<'data> {
    /// A reference with no definition yet. `file` is absent for linker-injected references.
    Undefined {
        sym_type: SymType,
        file: Option<FileId>,
    },

    /// A concrete definition from a relocatable object. `section` is absent for absolute symbols.
    Regular {
        file: FileId,
        section: Option<u32>,
        value: u64,
        size: u64,
        sym_type: SymType,
    },

    /// A tentative definition. Repeated commons merge by maximum size and alignment.
    Common {
        file: FileId,
        size: u64,
        alignment: u64,
        sym_type: SymType,
    },

    /// A definition provided by a shared object.
    Shared {
        file: FileId,
        sym_type: SymType,
        verdef: Option<&'data [u8]>,
    },

    /// A promise that a specific archive member defines the name.
    LazyArchive {
        file: FileId,
        member: u32,
        sym_type: SymType,
    },

    /// A promise that a not-yet-loaded object file defines the name.
    LazyObject { file: FileId, sym_type: SymType },

    /// A definition carried by a bitcode unit, pending link-time code generation.
    Bitcode { file: FileId, sym_type: SymType },

    /// A linker-introduced definition.
    Synthetic { value: u64, sym_type: SymType },
}

impl<'data> SymBody<'data> {
    pub fn is_undefined(&self) -> bool {
        matches!(self, SymBody::Undefined { .. })
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, SymBody::LazyArchive { .. } | SymBody::LazyObject { .. })
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, SymBody::Shared { .. })
    }

    pub fn is_common(&self) -> bool {
        matches!(self, SymBody::Common { .. })
    }

    pub fn is_bitcode(&self) -> bool {
        matches!(self, SymBody::Bitcode { .. })
    }

    /// Whether the name has an actual definition: neither a bare reference nor a lazy promise.
    pub fn is_defined(&self) -> bool {
        !self.is_undefined() && !self.is_lazy()
    }

    pub fn sym_type(&self) -> SymType {
        match self {
            SymBody::Undefined { sym_type, .. }
            | SymBody::Regular { sym_type, .. }
            | SymBody::Common { sym_type, .. }
            | SymBody::Shared { sym_type, .. }
            | SymBody::LazyArchive { sym_type, .. }
            | SymBody::LazyObject { sym_type, .. }
            | SymBody::Bitcode { sym_type, .. }
            | SymBody::Synthetic { sym_type, .. } => *sym_type,
        }
    }

    /// The file the payload came from, if any.
    pub fn file(&self) -> Option<FileId> {
        match self {
            SymBody::Undefined { file, .. } => *file,
            SymBody::Regular { file, .. }
            | SymBody::Common { file, .. }
            | SymBody::Shared { file, .. }
            | SymBody::LazyArchive { file, .. }
            | SymBody::LazyObject { file, .. }
            | SymBody::Bitcode { file, .. } => Some(*file),
            SymBody::Synthetic { .. } => None,
        }
    }
}

/// The per-name envelope: stable identity plus the attributes that survive payload replacement.
#[derive(Debug)]
pub struct Symbol<'data> {
    name: &'data [u8],
    pub binding: Binding,
    pub visibility: Visibility,
    pub version_id: u16,
    pub exported: bool,
    pub used_in_regular_object: bool,
    pub versioned_name: bool,
    pub(crate) body: SymBody<'data>,
}

impl<'data> Symbol<'data> {
    pub fn name(&self) -> SymbolName<'data> {
        SymbolName::new(self.name)
    }

    pub fn body(&self) -> &SymBody<'data> {
        &self.body
    }

    pub fn is_weak(&self) -> bool {
        self.binding == Binding::Weak
    }

    /// The version id without the hidden bit.
    pub fn version_index(&self) -> u16 {
        self.version_id & !VERSYM_HIDDEN
    }

    pub fn is_hidden_version(&self) -> bool {
        self.version_id & VERSYM_HIDDEN != 0
    }
}

#[derive(Debug)]
pub struct SymbolDb<'data> {
    pub args: &'data Args,
    pub diagnostics: Diagnostics,

    /// Saver for names the linker makes up itself (`__wrap_*`, `__real_*`). Owned by the caller
    /// so the saved bytes share the lifetime of the input data.
    names: &'data Bump,

    name_to_id: PassThroughHashMap<SymbolName<'data>, SymbolId>,
    symbols: Vec<Symbol<'data>>,

    /// The admitted input files. Symbol bodies refer into this by index.
    files: Vec<ParsedInput<'data>>,

    /// Sonames seen so far. At most one shared object per soname contributes to the link.
    sonames: HashSet<&'data [u8]>,

    /// What admitted ELF inputs must look like, and where that expectation came from.
    expected_props: Option<(ElfProps, String)>,

    pub(crate) version_script: VersionScript<'data>,

    /// Names already rewired by `--wrap`. Wrapping the same name twice is refused.
    pub(crate) wrapped: HashSet<&'data [u8]>,
}

impl<'data> SymbolDb<'data> {
    pub fn build(
        args: &'data Args,
        version_script_data: Option<VersionScriptData<'data>>,
        names: &'data Bump,
    ) -> Result<Self> {
        let version_script = version_script_data
            .map(VersionScript::parse)
            .transpose()?
            .unwrap_or_default();

        let expected_props = args
            .emulation
            .as_ref()
            .map(|emulation| (emulation.props, emulation.name.clone()));

        Ok(Self {
            args,
            diagnostics: Diagnostics::default(),
            names,
            name_to_id: PassThroughHashMap::default(),
            symbols: Vec::new(),
            files: Vec::new(),
            sonames: HashSet::new(),
            expected_props,
            version_script,
            wrapped: HashSet::new(),
        })
    }

    /// Admits one parsed input. Archive and lazy-object contents stay latent; everything else has
    /// its symbols run through resolution immediately. Incompatible files are reported and
    /// skipped.
    pub fn add_file(&mut self, file: ParsedInput<'data>) {
        if !self.check_compatible(&file) {
            return;
        }

        let file_id = FileId::from_usize(self.files.len());
        match file {
            ParsedInput::Object(object) => {
                let symbols = object.symbols.clone();
                self.files.push(ParsedInput::Object(object));
                for sym in symbols {
                    self.add_object_symbol(file_id, sym);
                }
            }
            ParsedInput::Archive(archive) => {
                let index = archive.index.clone();
                self.files.push(ParsedInput::Archive(archive));
                for entry in index {
                    self.add_lazy_archive(entry.name, file_id, entry.member);
                }
            }
            ParsedInput::LazyObject(lazy) => {
                let defined = lazy.defined.clone();
                self.files.push(ParsedInput::LazyObject(lazy));
                for name in defined {
                    self.add_lazy_object(name, file_id);
                }
            }
            ParsedInput::Shared(shared) => {
                if !self.sonames.insert(shared.soname) {
                    return;
                }
                let symbols = shared.symbols.clone();
                self.files.push(ParsedInput::Shared(shared));
                for sym in symbols {
                    self.add_shared(sym.name, sym.visibility, sym.sym_type, sym.verdef, file_id);
                }
            }
            ParsedInput::Bitcode(bitcode) => {
                let symbols = bitcode.symbols.clone();
                self.files.push(ParsedInput::Bitcode(bitcode));
                for sym in symbols {
                    let binding = if sym.is_weak {
                        Binding::Weak
                    } else {
                        Binding::Global
                    };
                    if sym.is_undefined {
                        self.add_undefined(
                            sym.name,
                            binding,
                            sym.visibility,
                            sym.sym_type,
                            sym.can_omit_from_dynsym,
                            Some(file_id),
                        );
                    } else {
                        self.add_bitcode(
                            sym.name,
                            sym.is_weak,
                            sym.visibility,
                            sym.sym_type,
                            sym.can_omit_from_dynsym,
                            file_id,
                        );
                    }
                }
            }
        }
    }

    fn add_object_symbol(&mut self, file_id: FileId, sym: ObjSymbol<'data>) {
        // Locals don't participate in resolution.
        if sym.binding == Binding::Local {
            return;
        }
        match sym.placement {
            SymPlacement::Undefined => {
                self.add_undefined(
                    sym.name,
                    sym.binding,
                    sym.visibility,
                    sym.sym_type,
                    false,
                    Some(file_id),
                );
            }
            SymPlacement::Common { size, alignment } => {
                self.add_common(
                    sym.name,
                    size,
                    alignment,
                    sym.binding,
                    sym.visibility,
                    sym.sym_type,
                    file_id,
                );
            }
            SymPlacement::Section {
                section,
                value,
                size,
            } => {
                self.add_regular(
                    sym.name,
                    sym.binding,
                    sym.visibility,
                    sym.sym_type,
                    Some(section),
                    value,
                    size,
                    file_id,
                );
            }
            SymPlacement::Absolute { value } => {
                self.add_regular(
                    sym.name,
                    sym.binding,
                    sym.visibility,
                    sym.sym_type,
                    None,
                    value,
                    0,
                    file_id,
                );
            }
        }
    }

    pub fn add_undefined(
        &mut self,
        name: &'data [u8],
        binding: Binding,
        visibility: Visibility,
        sym_type: SymType,
        can_omit_from_dynsym: bool,
        file: Option<FileId>,
    ) -> SymbolId {
        // Bitcode references don't count as use from a regular object; the code generator's
        // output does, when it re-enters later.
        let used_in_regular_object =
            file.is_none_or(|f| !self.files[f.as_usize()].is_bitcode());

        let (id, was_inserted) = self.insert_with_attrs(
            name,
            sym_type,
            visibility,
            can_omit_from_dynsym,
            used_in_regular_object,
            file,
        );

        if was_inserted {
            let sym = &mut self.symbols[id.as_usize()];
            sym.binding = binding;
            sym.body = SymBody::Undefined { sym_type, file };
            return id;
        }

        if binding != Binding::Weak {
            let body = self.symbols[id.as_usize()].body;
            if body.is_shared() || body.is_lazy() || body.is_undefined() {
                self.symbols[id.as_usize()].binding = binding;
            }
            if let SymBody::Shared { file, .. } = body {
                self.mark_needed(file);
            }
        }

        if self.symbols[id.as_usize()].body.is_lazy() {
            if self.symbols[id.as_usize()].is_weak() {
                // A weak reference must not pull the member in, but its type has to stick so the
                // name surfaces as a weak undefined of that type if nothing stronger ever shows up.
                self.set_lazy_type(id, sym_type);
            } else {
                self.fetch_lazy(id);
            }
        }

        id
    }

    /// An undefined reference injected by the linker itself.
    pub fn add_undefined_ref(&mut self, name: &'data [u8]) -> SymbolId {
        self.add_undefined(
            name,
            Binding::Global,
            Visibility::Default,
            SymType::Unknown,
            false,
            None,
        )
    }

    pub fn add_regular(
        &mut self,
        name: &'data [u8],
        binding: Binding,
        visibility: Visibility,
        sym_type: SymType,
        section: Option<u32>,
        value: u64,
        size: u64,
        file: FileId,
    ) -> SymbolId {
        let replaces_bitcode = matches!(
            &self.files[file.as_usize()],
            ParsedInput::Object(object) if object.produced_by_lto
        );

        let (id, was_inserted) =
            self.insert_with_attrs(name, sym_type, visibility, false, true, Some(file));

        let cmp = self.compare_defined_non_common(id, was_inserted, binding, replaces_bitcode);
        if cmp > 0 {
            self.symbols[id.as_usize()].body = SymBody::Regular {
                file,
                section,
                value,
                size,
                sym_type,
            };
        } else if cmp == 0 {
            self.report_duplicate(id, Some(file));
        }
        id
    }

    pub fn add_common(
        &mut self,
        name: &'data [u8],
        size: u64,
        alignment: u64,
        binding: Binding,
        visibility: Visibility,
        sym_type: SymType,
        file: FileId,
    ) -> SymbolId {
        let (id, was_inserted) =
            self.insert_with_attrs(name, sym_type, visibility, false, true, Some(file));

        let cmp = compare_defined(&self.symbols[id.as_usize()], was_inserted, binding);
        if cmp > 0 {
            let sym = &mut self.symbols[id.as_usize()];
            sym.binding = binding;
            sym.body = SymBody::Common {
                file,
                size,
                alignment,
                sym_type,
            };
        } else if cmp == 0 {
            let is_common = self.symbols[id.as_usize()].body.is_common();
            if self.args.warn_common {
                let display = self.display_name(self.symbols[id.as_usize()].name);
                let message = if is_common {
                    format!("multiple common of {display}")
                } else {
                    format!("common {display} is overridden")
                };
                self.diagnostics.warning(message);
            }
            if is_common {
                if let SymBody::Common {
                    size: merged_size,
                    alignment: merged_alignment,
                    ..
                } = &mut self.symbols[id.as_usize()].body
                {
                    *merged_size = (*merged_size).max(size);
                    *merged_alignment = (*merged_alignment).max(alignment);
                }
            }
        }
        id
    }

    pub fn add_shared(
        &mut self,
        name: &'data [u8],
        visibility: Visibility,
        sym_type: SymType,
        verdef: Option<&'data [u8]>,
        file: FileId,
    ) -> SymbolId {
        // Shared contributions never strengthen visibility in the output, so default is merged
        // in regardless of what the library declares.
        let (id, was_inserted) =
            self.insert_with_attrs(name, sym_type, Visibility::Default, true, false, Some(file));

        if visibility == Visibility::Default {
            self.symbols[id.as_usize()].exported = true;
        }

        if was_inserted || self.symbols[id.as_usize()].body.is_undefined() {
            self.symbols[id.as_usize()].body = SymBody::Shared {
                file,
                sym_type,
                verdef,
            };
            if !self.symbols[id.as_usize()].is_weak() {
                self.mark_needed(file);
            }
        }
        id
    }

    pub fn add_bitcode(
        &mut self,
        name: &'data [u8],
        is_weak: bool,
        visibility: Visibility,
        sym_type: SymType,
        can_omit_from_dynsym: bool,
        file: FileId,
    ) -> SymbolId {
        let (id, was_inserted) = self.insert_with_attrs(
            name,
            sym_type,
            visibility,
            can_omit_from_dynsym,
            false,
            Some(file),
        );

        let binding = if is_weak {
            Binding::Weak
        } else {
            Binding::Global
        };

        let cmp = self.compare_defined_non_common(id, was_inserted, binding, false);
        if cmp > 0 {
            self.symbols[id.as_usize()].body = SymBody::Bitcode { file, sym_type };
        } else if cmp == 0 {
            self.report_duplicate(id, Some(file));
        }
        id
    }

    pub fn add_lazy_archive(
        &mut self,
        name: &'data [u8],
        file: FileId,
        member: u32,
    ) -> SymbolId {
        let (id, was_inserted) = self.insert(name);
        if was_inserted {
            self.symbols[id.as_usize()].body = SymBody::LazyArchive {
                file,
                member,
                sym_type: SymType::Unknown,
            };
            return id;
        }
        if !self.symbols[id.as_usize()].body.is_undefined() {
            return id;
        }

        if self.symbols[id.as_usize()].is_weak() {
            // Keep the promise rather than the weak reference, carrying the reference's type
            // along, so the member remains fetchable should a strong reference arrive later.
            let sym_type = self.symbols[id.as_usize()].body.sym_type();
            self.symbols[id.as_usize()].body = SymBody::LazyArchive {
                file,
                member,
                sym_type,
            };
            return id;
        }

        // A strong reference is already waiting for this definition.
        let fetched = match &mut self.files[file.as_usize()] {
            ParsedInput::Archive(archive) => archive.take_member(member),
            _ => None,
        };
        if let Some(object) = fetched {
            self.add_file(ParsedInput::Object(object));
        }
        id
    }

    pub fn add_lazy_object(&mut self, name: &'data [u8], file: FileId) -> SymbolId {
        let (id, was_inserted) = self.insert(name);
        if was_inserted {
            self.symbols[id.as_usize()].body = SymBody::LazyObject {
                file,
                sym_type: SymType::Unknown,
            };
            return id;
        }
        if !self.symbols[id.as_usize()].body.is_undefined() {
            return id;
        }

        if self.symbols[id.as_usize()].is_weak() {
            let sym_type = self.symbols[id.as_usize()].body.sym_type();
            self.symbols[id.as_usize()].body = SymBody::LazyObject { file, sym_type };
            return id;
        }

        let fetched = match &mut self.files[file.as_usize()] {
            ParsedInput::LazyObject(lazy) => lazy.take(),
            _ => None,
        };
        if let Some(object) = fetched {
            self.add_file(ParsedInput::Object(object));
        }
        id
    }

    /// A linker-introduced hidden definition with the given value.
    pub fn add_synthetic(&mut self, name: &'data [u8], value: u64) -> SymbolId {
        let (id, was_inserted) =
            self.insert_with_attrs(name, SymType::NoType, Visibility::Hidden, false, true, None);
        let cmp = self.compare_defined_non_common(id, was_inserted, Binding::Global, false);
        if cmp > 0 {
            self.symbols[id.as_usize()].body = SymBody::Synthetic {
                value,
                sym_type: SymType::NoType,
            };
        } else if cmp == 0 {
            self.report_duplicate(id, None);
        }
        id
    }

    /// A linker-introduced absolute definition.
    pub fn add_absolute(&mut self, name: &'data [u8], visibility: Visibility) -> SymbolId {
        let (id, was_inserted) =
            self.insert_with_attrs(name, SymType::NoType, visibility, false, true, None);
        let cmp = self.compare_defined_non_common(id, was_inserted, Binding::Global, false);
        if cmp > 0 {
            self.symbols[id.as_usize()].body = SymBody::Synthetic {
                value: 0,
                sym_type: SymType::NoType,
            };
        } else if cmp == 0 {
            self.report_duplicate(id, None);
        }
        id
    }

    /// Defines `name` as an absolute only if something already referenced it.
    pub fn add_ignored(&mut self, name: &'data [u8], visibility: Visibility) -> Option<SymbolId> {
        self.find(name)?;
        Some(self.add_absolute(name, visibility))
    }

    /// Hands the bitcode inputs to the code generator and feeds the resulting native objects
    /// back through resolution.
    #[tracing::instrument(skip_all, name = "Compile bitcode")]
    pub fn compile_bitcode(&mut self, backend: &mut dyn LtoBackend<'data>) -> Result {
        let mut any = false;
        for file in &self.files {
            if let ParsedInput::Bitcode(bitcode) = file {
                backend.add(bitcode);
                any = true;
            }
        }
        if !any {
            return Ok(());
        }

        for mut object in backend.compile()? {
            object.produced_by_lto = true;
            self.add_file(ParsedInput::Object(object));
        }
        Ok(())
    }

    pub fn find(&self, name: &'data [u8]) -> Option<SymbolId> {
        self.name_to_id
            .get(&SymbolName::prehashed(name))
            .copied()
    }

    /// All defined symbols whose name matches the glob pattern. Patterns without wildcard
    /// metacharacters take the exact-lookup fast path.
    pub fn find_all(&self, pattern: &'data str) -> Vec<SymbolId> {
        if !pattern.bytes().any(|b| b"?*[".contains(&b)) {
            return self
                .find(pattern.as_bytes())
                .filter(|id| self.symbols[id.as_usize()].body.is_defined())
                .into_iter()
                .collect();
        }
        let Ok(glob) = Pattern::new(pattern) else {
            return Vec::new();
        };
        self.defined_matching(&glob)
    }

    pub(crate) fn defined_matching(&self, glob: &Pattern) -> Vec<SymbolId> {
        self.defined_symbol_ids()
            .filter(|id| {
                str::from_utf8(self.symbols[id.as_usize()].name)
                    .is_ok_and(|name| glob.matches(name))
            })
            .collect()
    }

    pub(crate) fn defined_symbol_ids(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.symbols
            .iter()
            .enumerate()
            .filter(|(_, sym)| sym.body.is_defined())
            .map(|(i, _)| SymbolId::from_usize(i))
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol<'data> {
        &self.symbols[id.as_usize()]
    }

    pub(crate) fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol<'data> {
        &mut self.symbols[id.as_usize()]
    }

    pub fn num_symbols(&self) -> usize {
        self.symbols.len()
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    pub fn file(&self, id: FileId) -> &ParsedInput<'data> {
        &self.files[id.as_usize()]
    }

    pub fn file_name(&self, id: FileId) -> &'data str {
        self.files[id.as_usize()].name()
    }

    /// Envelope ids in name-lexicographic order, the order the layout writer consumes them in.
    pub fn sorted_symbol_ids(&self) -> Vec<SymbolId> {
        let mut ids: Vec<SymbolId> = (0..self.symbols.len()).map(SymbolId::from_usize).collect();
        ids.sort_by_key(|id| self.symbols[id.as_usize()].name);
        ids
    }

    pub fn check(&self) -> Result {
        self.diagnostics.check()
    }

    /// Saves `prefix` + `name` in the name arena, giving the bytes the lifetime of the link.
    pub(crate) fn save_prefixed(&self, prefix: &str, name: &str) -> &'data [u8] {
        self.names
            .alloc_slice_copy(&[prefix.as_bytes(), name.as_bytes()].concat())
    }

    /// Demands the definition a lazy payload promises. No-op for anything else.
    pub(crate) fn fetch_lazy(&mut self, id: SymbolId) {
        let fetched = match self.symbols[id.as_usize()].body {
            SymBody::LazyArchive { file, member, .. } => match &mut self.files[file.as_usize()] {
                ParsedInput::Archive(archive) => archive.take_member(member),
                _ => None,
            },
            SymBody::LazyObject { file, .. } => match &mut self.files[file.as_usize()] {
                ParsedInput::LazyObject(lazy) => lazy.take(),
                _ => None,
            },
            _ => return,
        };
        if let Some(object) = fetched {
            self.add_file(ParsedInput::Object(object));
        }
    }

    /// Looks up or creates the envelope for `name`. Fresh envelopes start weak with default
    /// visibility and get their version id from the name, which is fixed from then on.
    fn insert(&mut self, name: &'data [u8]) -> (SymbolId, bool) {
        let key = SymbolName::prehashed(name);
        if let Some(id) = self.name_to_id.get(&key) {
            return (*id, false);
        }

        let (version_id, versioned_name) = self.version_id_for_name(name);
        let id = SymbolId::from_usize(self.symbols.len());
        self.name_to_id.insert(key, id);
        self.symbols.push(Symbol {
            name,
            binding: Binding::Weak,
            visibility: Visibility::Default,
            version_id,
            versioned_name,
            exported: false,
            used_in_regular_object: false,
            body: SymBody::Undefined {
                sym_type: SymType::Unknown,
                file: None,
            },
        });
        (id, true)
    }

    /// The shared pre-step of every insertion: look up or create, merge visibility, update the
    /// export and regular-object flags, and police TLS-ness against the existing payload.
    fn insert_with_attrs(
        &mut self,
        name: &'data [u8],
        sym_type: SymType,
        visibility: Visibility,
        can_omit_from_dynsym: bool,
        used_in_regular_object: bool,
        file: Option<FileId>,
    ) -> (SymbolId, bool) {
        let (id, was_inserted) = self.insert(name);
        let export = !can_omit_from_dynsym && self.args.exports_by_default();

        let sym = &mut self.symbols[id.as_usize()];
        sym.visibility = sym.visibility.merge(visibility);
        if export {
            sym.exported = true;
        }
        if used_in_regular_object {
            sym.used_in_regular_object = true;
        }

        let old_type = sym.body.sym_type();
        let tls_mismatch = !was_inserted
            && old_type != SymType::Unknown
            && sym_type != SymType::Unknown
            && (sym_type == SymType::Tls) != old_type.is_tls();
        if tls_mismatch {
            let message = format!(
                "TLS attribute mismatch for symbol: {}",
                self.conflict_msg(id, file)
            );
            self.diagnostics.error(message);
        }

        (id, was_inserted)
    }

    fn version_id_for_name(&mut self, name: &'data [u8]) -> (u16, bool) {
        let raw = RawSymbolName::parse(name);
        let Some(version) = raw.version else {
            let id = if self.args.globals_by_default {
                VER_NDX_GLOBAL
            } else {
                VER_NDX_LOCAL
            };
            return (id, false);
        };

        match self.version_script.id_for_version_name(version) {
            Some(id) if raw.is_default => (id, true),
            Some(id) => (id | VERSYM_HIDDEN, true),
            None => {
                self.diagnostics.error(format!(
                    "symbol {} has undefined version {}",
                    String::from_utf8_lossy(name),
                    String::from_utf8_lossy(version)
                ));
                (VER_NDX_RESERVED, true)
            }
        }
    }

    /// Decides whether a new non-common definition replaces the current payload. Returns +1 to
    /// replace (the envelope binding is updated), -1 to discard, 0 for a genuine conflict.
    fn compare_defined_non_common(
        &mut self,
        id: SymbolId,
        was_inserted: bool,
        binding: Binding,
        replaces_bitcode: bool,
    ) -> i32 {
        let cmp = compare_defined(&self.symbols[id.as_usize()], was_inserted, binding);
        if cmp != 0 {
            if cmp > 0 {
                self.symbols[id.as_usize()].binding = binding;
            }
            return cmp;
        }

        let body = self.symbols[id.as_usize()].body;
        if body.is_common() {
            // Non-common definitions take precedence over common ones.
            if self.args.warn_common {
                let display = self.display_name(self.symbols[id.as_usize()].name);
                self.diagnostics
                    .warning(format!("common {display} is overridden"));
            }
            return 1;
        }
        if body.is_bitcode() && replaces_bitcode {
            // Output of link-time code generation supersedes the bitcode record it came from.
            return 1;
        }
        0
    }

    fn report_duplicate(&mut self, id: SymbolId, new_file: Option<FileId>) {
        let message = format!("duplicate symbol: {}", self.conflict_msg(id, new_file));
        if self.args.allow_multiple_definition {
            self.diagnostics.warning(message);
        } else {
            self.diagnostics.error(message);
        }
    }

    /// "SYM in FILE1 and FILE2", for conflict messages.
    fn conflict_msg(&self, id: SymbolId, new_file: Option<FileId>) -> String {
        let existing = &self.symbols[id.as_usize()];
        let name = self.display_name(existing.name);
        let existing_file = existing
            .body
            .file()
            .map_or("<internal>", |f| self.file_name(f));
        let new_file = new_file.map_or("<internal>", |f| self.file_name(f));
        format!("{name} in {existing_file} and {new_file}")
    }

    fn display_name(&self, name: &[u8]) -> String {
        match str::from_utf8(name) {
            Ok(s) if self.args.demangle => demangle(s).into_owned(),
            Ok(s) => s.to_owned(),
            Err(_) => String::from_utf8_lossy(name).into_owned(),
        }
    }

    fn mark_needed(&mut self, file: FileId) {
        if let ParsedInput::Shared(shared) = &mut self.files[file.as_usize()] {
            shared.is_needed = true;
        }
    }

    fn set_lazy_type(&mut self, id: SymbolId, new_type: SymType) {
        match &mut self.symbols[id.as_usize()].body {
            SymBody::LazyArchive { sym_type, .. } | SymBody::LazyObject { sym_type, .. } => {
                *sym_type = new_type;
            }
            _ => {}
        }
    }

    fn check_compatible(&mut self, file: &ParsedInput<'data>) -> bool {
        let Some(props) = file.elf_props() else {
            return true;
        };
        match &self.expected_props {
            Some((expected, origin)) => {
                if props == *expected {
                    true
                } else {
                    self.diagnostics
                        .error(format!("{} is incompatible with {origin}", file.name()));
                    false
                }
            }
            None => {
                // The first admitted ELF input establishes the baseline when no emulation was
                // configured.
                self.expected_props = Some((props, file.name().to_owned()));
                true
            }
        }
    }
}

/// The core of the precedence lattice: does a new definition with `binding` replace the current
/// payload? +1 replace, -1 discard, 0 both are strong definitions.
fn compare_defined(sym: &Symbol, was_inserted: bool, binding: Binding) -> i32 {
    if was_inserted {
        return 1;
    }
    let body = &sym.body;
    if body.is_lazy() || body.is_undefined() || body.is_shared() {
        return 1;
    }
    if binding == Binding::Weak {
        return -1;
    }
    if sym.is_weak() {
        return 1;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::ObjectFile;

    fn db<'d>(args: &'d Args, names: &'d Bump) -> SymbolDb<'d> {
        SymbolDb::build(args, None, names).unwrap()
    }

    fn empty_object<'d>(db: &mut SymbolDb<'d>, name: &'d str) -> FileId {
        let id = FileId::from_usize(db.num_files());
        db.add_file(ParsedInput::Object(ObjectFile::new(
            name,
            ElfProps::elf64_x86_64(),
            Vec::new(),
        )));
        id
    }

    #[test]
    fn index_size_tracks_distinct_names() {
        let args = Args::default();
        let names = Bump::new();
        let mut db = db(&args, &names);
        let file = empty_object(&mut db, "a.o");

        db.add_undefined_ref(b"one");
        db.add_undefined_ref(b"two");
        db.add_regular(
            b"one",
            Binding::Global,
            Visibility::Default,
            SymType::Func,
            Some(1),
            0x10,
            0,
            file,
        );
        assert_eq!(db.num_symbols(), 2);
    }

    fn add_foo(db: &mut SymbolDb<'_>, binding: Binding, value: u64, file: FileId) {
        db.add_regular(
            b"foo",
            binding,
            Visibility::Default,
            SymType::Func,
            Some(1),
            value,
            0,
            file,
        );
    }

    #[test]
    fn strong_beats_weak_in_either_order() {
        let args = Args::default();
        for weak_first in [true, false] {
            let names = Bump::new();
            let mut db = db(&args, &names);
            let f1 = empty_object(&mut db, "f1.o");
            let f2 = empty_object(&mut db, "f2.o");

            if weak_first {
                add_foo(&mut db, Binding::Weak, 0x10, f1);
                add_foo(&mut db, Binding::Global, 0x20, f2);
            } else {
                add_foo(&mut db, Binding::Global, 0x20, f2);
                add_foo(&mut db, Binding::Weak, 0x10, f1);
            }

            let id = db.find(b"foo").unwrap();
            let sym = db.symbol(id);
            assert!(!sym.is_weak());
            assert!(
                matches!(sym.body(), SymBody::Regular { value: 0x20, file, .. } if *file == f2)
            );
            assert!(!db.diagnostics.has_errors());
        }
    }

    #[test]
    fn first_weak_wins() {
        let args = Args::default();
        let names = Bump::new();
        let mut db = db(&args, &names);
        let f1 = empty_object(&mut db, "f1.o");
        let f2 = empty_object(&mut db, "f2.o");

        db.add_regular(
            b"foo",
            Binding::Weak,
            Visibility::Default,
            SymType::Func,
            Some(1),
            0x10,
            0,
            f1,
        );
        db.add_regular(
            b"foo",
            Binding::Weak,
            Visibility::Default,
            SymType::Func,
            Some(1),
            0x20,
            0,
            f2,
        );

        let id = db.find(b"foo").unwrap();
        assert!(matches!(db.symbol(id).body(), SymBody::Regular { value: 0x10, .. }));
    }

    #[test]
    fn duplicate_strong_reports_conflict() {
        let args = Args::default();
        let names = Bump::new();
        let mut db = db(&args, &names);
        let f1 = empty_object(&mut db, "f1.o");
        let f2 = empty_object(&mut db, "f2.o");

        for file in [f1, f2] {
            db.add_regular(
                b"bar",
                Binding::Global,
                Visibility::Default,
                SymType::Func,
                Some(1),
                0x30,
                0,
                file,
            );
        }

        assert_eq!(db.diagnostics.errors().len(), 1);
        assert!(
            db.diagnostics.errors()[0].contains("duplicate symbol: bar in f1.o and f2.o"),
            "unexpected message: {}",
            db.diagnostics.errors()[0]
        );
    }

    #[test]
    fn duplicate_strong_downgrades_to_warning_when_allowed() {
        let args = Args {
            allow_multiple_definition: true,
            ..Args::default()
        };
        let names = Bump::new();
        let mut db = db(&args, &names);
        let f1 = empty_object(&mut db, "f1.o");
        let f2 = empty_object(&mut db, "f2.o");

        db.add_regular(
            b"bar",
            Binding::Global,
            Visibility::Default,
            SymType::Func,
            Some(1),
            0x30,
            0,
            f1,
        );
        db.add_regular(
            b"bar",
            Binding::Global,
            Visibility::Default,
            SymType::Func,
            Some(1),
            0x40,
            0,
            f2,
        );

        assert!(!db.diagnostics.has_errors());
        assert_eq!(db.diagnostics.warnings().len(), 1);
        // The first definition is retained.
        let id = db.find(b"bar").unwrap();
        assert!(matches!(db.symbol(id).body(), SymBody::Regular { value: 0x30, .. }));
    }

    #[test]
    fn common_merges_size_and_alignment_commutatively() {
        let args = Args::default();
        for flipped in [false, true] {
            let names = Bump::new();
            let mut db = db(&args, &names);
            let file = empty_object(&mut db, "c.o");

            let mut pairs = [(8u64, 4u64), (16u64, 2u64)];
            if flipped {
                pairs.reverse();
            }
            for (size, alignment) in pairs {
                db.add_common(
                    b"tentative",
                    size,
                    alignment,
                    Binding::Global,
                    Visibility::Default,
                    SymType::Object,
                    file,
                );
            }

            let id = db.find(b"tentative").unwrap();
            assert!(matches!(
                db.symbol(id).body(),
                SymBody::Common {
                    size: 16,
                    alignment: 4,
                    ..
                }
            ));
        }
    }

    #[test]
    fn strong_definition_overrides_common() {
        let args = Args {
            warn_common: true,
            ..Args::default()
        };
        let names = Bump::new();
        let mut db = db(&args, &names);
        let file = empty_object(&mut db, "c.o");

        db.add_common(
            b"buf",
            32,
            8,
            Binding::Global,
            Visibility::Default,
            SymType::Object,
            file,
        );
        db.add_regular(
            b"buf",
            Binding::Global,
            Visibility::Default,
            SymType::Object,
            Some(2),
            0x100,
            32,
            file,
        );

        let id = db.find(b"buf").unwrap();
        assert!(matches!(db.symbol(id).body(), SymBody::Regular { .. }));
        assert!(
            db.diagnostics
                .warnings()
                .iter()
                .any(|w| w.contains("common buf is overridden"))
        );
    }

    #[test]
    fn weak_definition_loses_to_common() {
        let args = Args::default();
        let names = Bump::new();
        let mut db = db(&args, &names);
        let file = empty_object(&mut db, "c.o");

        db.add_common(
            b"buf",
            32,
            8,
            Binding::Global,
            Visibility::Default,
            SymType::Object,
            file,
        );
        db.add_regular(
            b"buf",
            Binding::Weak,
            Visibility::Default,
            SymType::Object,
            Some(2),
            0x100,
            32,
            file,
        );

        let id = db.find(b"buf").unwrap();
        assert!(matches!(db.symbol(id).body(), SymBody::Common { .. }));
    }

    #[test]
    fn tls_mismatch_is_reported() {
        let args = Args::default();
        let names = Bump::new();
        let mut db = db(&args, &names);
        let file = empty_object(&mut db, "t.o");

        db.add_regular(
            b"tls_var",
            Binding::Global,
            Visibility::Default,
            SymType::Tls,
            Some(3),
            0,
            8,
            file,
        );
        db.add_undefined(
            b"tls_var",
            Binding::Global,
            Visibility::Default,
            SymType::Object,
            false,
            Some(file),
        );

        assert!(
            db.diagnostics
                .errors()
                .iter()
                .any(|e| e.contains("TLS attribute mismatch for symbol: tls_var"))
        );
    }

    #[test]
    fn visibility_merges_across_insertions() {
        let args = Args::default();
        let names = Bump::new();
        let mut db = db(&args, &names);
        let file = empty_object(&mut db, "v.o");

        db.add_undefined(
            b"sym",
            Binding::Global,
            Visibility::Hidden,
            SymType::Func,
            false,
            Some(file),
        );
        db.add_regular(
            b"sym",
            Binding::Global,
            Visibility::Default,
            SymType::Func,
            Some(1),
            0,
            0,
            file,
        );

        let id = db.find(b"sym").unwrap();
        assert_eq!(db.symbol(id).visibility, Visibility::Hidden);
    }

    #[test]
    fn undefined_version_leaves_reserved_id() {
        let args = Args::default();
        let names = Bump::new();
        let mut db = db(&args, &names);
        let file = empty_object(&mut db, "v.o");

        let id = db.add_regular(
            b"api@MISSING",
            Binding::Global,
            Visibility::Default,
            SymType::Func,
            Some(1),
            0,
            0,
            file,
        );

        assert_eq!(db.symbol(id).version_id, VER_NDX_RESERVED);
        assert!(db.symbol(id).versioned_name);
        assert!(
            db.diagnostics
                .errors()
                .iter()
                .any(|e| e.contains("has undefined version MISSING"))
        );
    }

    #[test]
    fn unversioned_names_follow_policy() {
        let names = Bump::new();
        let global_args = Args::default();
        let mut db_global = db(&global_args, &names);
        let id = db_global.add_undefined_ref(b"plain");
        assert_eq!(db_global.symbol(id).version_id, VER_NDX_GLOBAL);
        assert!(!db_global.symbol(id).versioned_name);

        let local_args = Args {
            globals_by_default: false,
            ..Args::default()
        };
        let mut db_local = db(&local_args, &names);
        let id = db_local.add_undefined_ref(b"plain");
        assert_eq!(db_local.symbol(id).version_id, VER_NDX_LOCAL);
    }

    #[test]
    fn incompatible_file_is_rejected() {
        let args = Args::default();
        let names = Bump::new();
        let mut db = db(&args, &names);
        empty_object(&mut db, "base.o");

        db.add_file(ParsedInput::Object(ObjectFile::new(
            "arm.o",
            ElfProps::elf64_aarch64(),
            Vec::new(),
        )));

        assert_eq!(db.num_files(), 1);
        assert!(
            db.diagnostics
                .errors()
                .iter()
                .any(|e| e.contains("arm.o is incompatible with base.o"))
        );
    }

    #[test]
    fn find_all_globs_and_fast_paths() {
        let args = Args::default();
        let names = Bump::new();
        let mut db = db(&args, &names);
        let file = empty_object(&mut db, "g.o");

        for name in [b"foo1".as_slice(), b"foo2", b"bar"] {
            db.add_regular(
                name,
                Binding::Global,
                Visibility::Default,
                SymType::Func,
                Some(1),
                0,
                0,
                file,
            );
        }
        db.add_undefined_ref(b"foo_undefined");

        assert_eq!(db.find_all("foo?").len(), 2);
        assert_eq!(db.find_all("foo*").len(), 2);
        assert_eq!(db.find_all("bar").len(), 1);
        // Undefined symbols never match, and the fast path filters them too.
        assert_eq!(db.find_all("foo_undefined").len(), 0);
    }

    #[test]
    fn sorted_ids_are_name_lexicographic() {
        let args = Args::default();
        let names = Bump::new();
        let mut db = db(&args, &names);

        db.add_undefined_ref(b"zeta");
        db.add_undefined_ref(b"alpha");
        db.add_undefined_ref(b"mid");

        let sorted: Vec<_> = db
            .sorted_symbol_ids()
            .into_iter()
            .map(|id| db.symbol(id).name().bytes())
            .collect();
        assert_eq!(sorted, [b"alpha".as_slice(), b"mid", b"zeta"]);
    }
}
