//! Link configuration. The command line is parsed by the driver; the core only observes the
//! resulting settings through this struct. Field names follow the flags they come from.

use crate::parsing::ElfProps;

#[derive(Debug)]
pub struct Args {
    pub output_kind: OutputKind,

    /// Whether `--export-dynamic` was passed. Together with `OutputKind::SharedObject`, this
    /// decides which symbols get the export-dynamic flag at insertion time.
    pub export_dynamic: bool,

    /// The target selected with `--emulation`, if any. When absent, the first admitted ELF input
    /// establishes what subsequent inputs must be compatible with.
    pub emulation: Option<Emulation>,

    /// Symbols to rewire via `--wrap`.
    pub wrap: Vec<String>,

    /// Symbols named with `--undefined`.
    pub undefined: Vec<String>,

    /// Symbol names from the `--dynamic-list` file.
    pub dynamic_list: Vec<String>,

    /// Symbols to report on via `--trace-symbol`.
    pub trace_symbol: Vec<String>,

    pub allow_multiple_definition: bool,
    pub warn_common: bool,
    pub no_undefined_version: bool,

    /// Whether unversioned names default to the global version rather than the local one.
    pub globals_by_default: bool,

    /// Whether to demangle symbol names in diagnostics.
    pub demangle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Executable,
    SharedObject,
}

/// A link target named by `--emulation`, with the input properties it implies.
#[derive(Debug, Clone)]
pub struct Emulation {
    pub name: String,
    pub props: ElfProps,
}

impl OutputKind {
    pub fn is_shared_object(self) -> bool {
        self == OutputKind::SharedObject
    }
}

impl Args {
    /// Whether symbols that can't be omitted from the dynamic table should be exported.
    pub(crate) fn exports_by_default(&self) -> bool {
        self.output_kind.is_shared_object() || self.export_dynamic
    }
}

impl Default for Args {
    fn default() -> Self {
        Self {
            output_kind: OutputKind::Executable,
            export_dynamic: false,
            emulation: None,
            wrap: Vec::new(),
            undefined: Vec::new(),
            dynamic_list: Vec::new(),
            trace_symbol: Vec::new(),
            allow_multiple_definition: false,
            warn_common: false,
            no_undefined_version: false,
            globals_by_default: true,
            demangle: true,
        }
    }
}
