//! The symbol resolution core of an ELF linker. Parsed input files go in; out comes a name index
//! in which every externally visible name has been resolved to exactly one definition, with
//! archive members pulled in on demand, bitcode handed off to the link-time code generator, and
//! the versioning, wrapping and export policies applied.
//!
//! File discovery, format parsing and output writing are collaborators: parsers deliver the
//! records in [`parsing`], and the layout writer consumes the finalized [`SymbolDb`].

pub mod args;
pub mod diagnostics;
pub mod error;
pub(crate) mod hash;
pub mod lto;
pub mod parsing;
pub mod passes;
pub mod symbol;
pub mod symbol_db;
pub mod version_script;

pub use args::Args;
pub use args::Emulation;
pub use args::OutputKind;
pub use diagnostics::Diagnostics;
pub use lto::LtoBackend;
pub use parsing::FileId;
pub use parsing::ParsedInput;
pub use symbol_db::SymBody;
pub use symbol_db::Symbol;
pub use symbol_db::SymbolDb;
pub use symbol_db::SymbolId;
pub use version_script::VersionScriptData;

use crate::error::Result;
use bumpalo::Bump;

/// Runs the whole resolution pipeline: ingests `inputs` in order, compiles bitcode if a backend
/// is supplied, applies the policy passes, and fails if any fatal diagnostic was recorded.
///
/// `names` must outlive the returned database; it holds the names the passes invent.
#[tracing::instrument(skip_all, name = "Resolve symbols")]
pub fn resolve<'data>(
    args: &'data Args,
    version_script: Option<VersionScriptData<'data>>,
    inputs: Vec<ParsedInput<'data>>,
    mut lto: Option<&mut dyn LtoBackend<'data>>,
    names: &'data Bump,
) -> Result<SymbolDb<'data>> {
    let mut db = SymbolDb::build(args, version_script, names)?;

    for input in inputs {
        db.add_file(input);
    }

    passes::fetch_forced_undefined(&mut db);

    if let Some(backend) = lto.take() {
        db.compile_bitcode(backend)?;
    }

    passes::scan_shlib_undefined(&mut db);
    passes::scan_dynamic_list(&mut db);
    passes::scan_version_script(&mut db);
    passes::apply_wraps(&mut db);
    passes::trace_defined(&mut db);

    db.check()?;
    Ok(db)
}
