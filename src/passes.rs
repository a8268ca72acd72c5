//! Policy passes that run once all inputs have been ingested. Each operates on the completed
//! name index; none of them creates files, only the `--undefined` pass can still trigger lazy
//! fetches.

use crate::parsing::FileId;
use crate::parsing::ParsedInput;
use crate::symbol::FIRST_USER_VERSION;
use crate::symbol::VER_NDX_GLOBAL;
use crate::symbol::VER_NDX_LOCAL;
use crate::symbol_db::SymbolDb;
use crate::symbol_db::SymbolId;
use crate::version_script::SymbolMatcher;
use std::mem::take;
use symbolic_demangle::demangle;

/// Fetches the file behind any `--undefined` name that currently resolves to a lazy promise.
#[tracing::instrument(skip_all, name = "Fetch --undefined symbols")]
pub fn fetch_forced_undefined(db: &mut SymbolDb<'_>) {
    let args = db.args;
    for name in &args.undefined {
        if let Some(id) = db.find(name.as_bytes()) {
            if db.symbol(id).body().is_lazy() {
                db.fetch_lazy(id);
            }
        }
    }
}

/// Shared libraries may have undefined symbols, expecting the rest of the link to define them.
/// Such definitions have to land in the dynamic symbol table so the library can find them at
/// runtime.
#[tracing::instrument(skip_all, name = "Scan shared-object undefineds")]
pub fn scan_shlib_undefined(db: &mut SymbolDb<'_>) {
    for file_index in 0..db.num_files() {
        let undefined = match db.file(FileId::from_usize(file_index)) {
            ParsedInput::Shared(shared) => shared.undefined.clone(),
            _ => continue,
        };
        for name in undefined {
            if let Some(id) = db.find(name) {
                if db.symbol(id).body().is_defined() {
                    db.symbol_mut(id).exported = true;
                }
            }
        }
    }
}

/// Marks every defined name from the `--dynamic-list` file for export.
#[tracing::instrument(skip_all, name = "Scan dynamic list")]
pub fn scan_dynamic_list(db: &mut SymbolDb<'_>) {
    let args = db.args;
    for name in &args.dynamic_list {
        if let Some(id) = db.find(name.as_bytes()) {
            if db.symbol(id).body().is_defined() {
                db.symbol_mut(id).exported = true;
            }
        }
    }
}

/// Assigns version ids from the version script. Globals of declared versions get that version's
/// id; globals of an anonymous script become plain globals; local patterns demote whatever they
/// match (and nothing else has claimed) to the local version, hiding it from the dynamic table.
#[tracing::instrument(skip_all, name = "Scan version script")]
pub fn scan_version_script(db: &mut SymbolDb<'_>) {
    let script = take(&mut db.version_script);

    // Globals of every declaration first, so a catch-all `local: *` can't hide a name that some
    // version explicitly claims.
    for (index, decl) in script.versions.iter().enumerate() {
        let version_id = script.version_id_for_index(index);
        for matcher in &decl.globals {
            let matches = find_matching(db, matcher);
            if matches.is_empty() {
                if index > 0 && db.args.no_undefined_version {
                    let message = format!(
                        "version script assignment of {} to symbol {matcher} failed: symbol not defined",
                        String::from_utf8_lossy(decl.name)
                    );
                    db.diagnostics.error(message);
                }
                continue;
            }
            for id in matches {
                let current = db.symbol(id).version_index();
                if index > 0 && current >= FIRST_USER_VERSION && current != version_id {
                    db.diagnostics
                        .warning(format!("duplicate symbol {matcher} in version script"));
                }
                db.symbol_mut(id).version_id = version_id;
            }
        }
    }

    for decl in &script.versions {
        for matcher in &decl.locals {
            for id in find_matching(db, matcher) {
                let current = db.symbol(id).version_index();
                if current == VER_NDX_LOCAL || current == VER_NDX_GLOBAL {
                    db.symbol_mut(id).version_id = VER_NDX_LOCAL;
                }
            }
        }
    }

    db.version_script = script;
}

fn find_matching<'data>(db: &SymbolDb<'data>, matcher: &SymbolMatcher<'data>) -> Vec<SymbolId> {
    match matcher {
        SymbolMatcher::Exact(name) => db
            .find(*name)
            .filter(|id| db.symbol(*id).body().is_defined())
            .into_iter()
            .collect(),
        SymbolMatcher::Glob(pattern) => db.defined_matching(pattern),
        SymbolMatcher::MatchesAll => db.defined_symbol_ids().collect(),
        SymbolMatcher::CxxExact(target) => {
            let Ok(target) = str::from_utf8(*target) else {
                return Vec::new();
            };
            db.defined_symbol_ids()
                .filter(|id| {
                    str::from_utf8(db.symbol(*id).name().bytes())
                        .is_ok_and(|name| demangle(name) == target)
                })
                .collect()
        }
        SymbolMatcher::CxxGlob(pattern) => db
            .defined_symbol_ids()
            .filter(|id| {
                str::from_utf8(db.symbol(*id).name().bytes())
                    .is_ok_and(|name| pattern.matches(&demangle(name)))
            })
            .collect(),
    }
}

/// Applies every `--wrap` request.
#[tracing::instrument(skip_all, name = "Apply --wrap")]
pub fn apply_wraps(db: &mut SymbolDb<'_>) {
    let args = db.args;
    for name in &args.wrap {
        wrap(db, name);
    }
}

/// Rewires `name` so references to it land on `__wrap_name`, while `__real_name` takes over the
/// original definition. Only the payload slots move; every envelope keeps its identity, which is
/// what lets pointers taken before the pass see the rewired result.
fn wrap<'data>(db: &mut SymbolDb<'data>, name: &'data str) {
    let Some(id) = db.find(name.as_bytes()) else {
        return;
    };
    if !db.wrapped.insert(name.as_bytes()) {
        // Swapping the same slots twice composes in a way nobody should depend on.
        db.diagnostics
            .error(format!("--wrap {name}: symbol wrapped more than once"));
        return;
    }

    let real_name = db.save_prefixed("__real_", name);
    let wrap_name = db.save_prefixed("__wrap_", name);
    let real = db.add_undefined_ref(real_name);
    let wrapper = db.add_undefined_ref(wrap_name);

    let original = *db.symbol(id).body();
    let wrapper_body = *db.symbol(wrapper).body();
    db.symbol_mut(id).body = wrapper_body;
    db.symbol_mut(real).body = original;
}

/// Prints which file defines each symbol named with `--trace-symbol`.
#[tracing::instrument(skip_all, name = "Trace symbols")]
pub fn trace_defined(db: &mut SymbolDb<'_>) {
    let args = db.args;
    for name in &args.trace_symbol {
        let Some(id) = db.find(name.as_bytes()) else {
            continue;
        };
        if !db.symbol(id).body().is_defined() {
            continue;
        }
        let Some(file) = db.symbol(id).body().file() else {
            continue;
        };
        let message = format!("{}: definition of {name}", db.file_name(file));
        db.diagnostics.message(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Args;
    use crate::parsing::ElfProps;
    use crate::parsing::ObjSymbol;
    use crate::parsing::ObjectFile;
    use crate::parsing::SymPlacement;
    use crate::symbol::Binding;
    use crate::symbol::SymType;
    use crate::symbol::Visibility;
    use crate::symbol_db::SymBody;
    use crate::version_script::VersionScriptData;
    use bumpalo::Bump;

    fn defined(name: &'static [u8], value: u64) -> ObjSymbol<'static> {
        ObjSymbol {
            name,
            binding: Binding::Global,
            visibility: Visibility::Default,
            sym_type: SymType::Func,
            placement: SymPlacement::Section {
                section: 1,
                value,
                size: 0,
            },
        }
    }

    fn object_with(
        name: &'static str,
        symbols: Vec<ObjSymbol<'static>>,
    ) -> ParsedInput<'static> {
        ParsedInput::Object(ObjectFile::new(name, ElfProps::elf64_x86_64(), symbols))
    }

    #[test]
    fn wrap_swaps_payloads_and_keeps_envelopes() {
        let args = Args {
            wrap: vec!["malloc".to_owned()],
            ..Args::default()
        };
        let names = Bump::new();
        let mut db = SymbolDb::build(&args, None, &names).unwrap();

        db.add_file(object_with(
            "alloc.o",
            vec![defined(b"malloc", 0x1000), defined(b"__wrap_malloc", 0x2000)],
        ));

        let malloc = db.find(b"malloc").unwrap();
        apply_wraps(&mut db);

        // The envelope id is unchanged, but its payload is now the wrapper's.
        assert_eq!(db.find(b"malloc").unwrap(), malloc);
        assert!(matches!(
            db.symbol(malloc).body(),
            SymBody::Regular { value: 0x2000, .. }
        ));

        let real = db.find(b"__real_malloc").unwrap();
        assert!(matches!(
            db.symbol(real).body(),
            SymBody::Regular { value: 0x1000, .. }
        ));
    }

    #[test]
    fn wrap_twice_is_refused() {
        let args = Args {
            wrap: vec!["malloc".to_owned(), "malloc".to_owned()],
            ..Args::default()
        };
        let names = Bump::new();
        let mut db = SymbolDb::build(&args, None, &names).unwrap();
        db.add_file(object_with(
            "alloc.o",
            vec![defined(b"malloc", 0x1000), defined(b"__wrap_malloc", 0x2000)],
        ));

        apply_wraps(&mut db);

        assert!(
            db.diagnostics
                .errors()
                .iter()
                .any(|e| e.contains("wrapped more than once"))
        );
        // The first rewiring stands.
        let malloc = db.find(b"malloc").unwrap();
        assert!(matches!(
            db.symbol(malloc).body(),
            SymBody::Regular { value: 0x2000, .. }
        ));
    }

    #[test]
    fn wrap_of_absent_symbol_is_a_no_op() {
        let args = Args {
            wrap: vec!["missing".to_owned()],
            ..Args::default()
        };
        let names = Bump::new();
        let mut db = SymbolDb::build(&args, None, &names).unwrap();
        db.add_file(object_with("a.o", vec![defined(b"present", 0)]));

        apply_wraps(&mut db);

        assert!(db.find(b"__wrap_missing").is_none());
        assert!(!db.diagnostics.has_errors());
    }

    #[test]
    fn version_script_assigns_and_demotes() {
        let args = Args::default();
        let names = Bump::new();
        let script = VersionScriptData {
            raw: b"{ global: foo*; local: *; };",
        };
        let mut db = SymbolDb::build(&args, Some(script), &names).unwrap();
        db.add_file(object_with(
            "lib.o",
            vec![
                defined(b"foo1", 0),
                defined(b"foo2", 0),
                defined(b"foo3", 0),
                defined(b"internal_helper", 0),
            ],
        ));

        scan_version_script(&mut db);

        for name in [b"foo1".as_slice(), b"foo2", b"foo3"] {
            let id = db.find(name).unwrap();
            assert_eq!(db.symbol(id).version_index(), VER_NDX_GLOBAL);
        }
        let hidden = db.find(b"internal_helper").unwrap();
        assert_eq!(db.symbol(hidden).version_index(), VER_NDX_LOCAL);
    }

    #[test]
    fn version_script_named_versions_are_idempotent() {
        let args = Args::default();
        let names = Bump::new();
        let script = VersionScriptData {
            raw: b"V1 { global: api_*; };",
        };
        let mut db = SymbolDb::build(&args, Some(script), &names).unwrap();
        db.add_file(object_with(
            "api.o",
            vec![defined(b"api_open", 0), defined(b"api_close", 0)],
        ));

        scan_version_script(&mut db);
        let first: Vec<u16> = [b"api_open".as_slice(), b"api_close"]
            .iter()
            .map(|n| db.symbol(db.find(n).unwrap()).version_id)
            .collect();
        assert_eq!(first, [FIRST_USER_VERSION, FIRST_USER_VERSION]);

        scan_version_script(&mut db);
        let second: Vec<u16> = [b"api_open".as_slice(), b"api_close"]
            .iter()
            .map(|n| db.symbol(db.find(n).unwrap()).version_id)
            .collect();
        assert_eq!(first, second);
        assert!(db.diagnostics.warnings().is_empty());
    }

    #[test]
    fn version_script_unmatched_pattern_errors_when_configured() {
        let args = Args {
            no_undefined_version: true,
            ..Args::default()
        };
        let names = Bump::new();
        let script = VersionScriptData {
            raw: b"V1 { global: nothing_matches_*; };",
        };
        let mut db = SymbolDb::build(&args, Some(script), &names).unwrap();
        db.add_file(object_with("a.o", vec![defined(b"unrelated", 0)]));

        scan_version_script(&mut db);

        assert!(
            db.diagnostics
                .errors()
                .iter()
                .any(|e| e.contains("version script assignment of V1"))
        );
    }

    #[test]
    fn duplicate_version_assignment_warns() {
        let args = Args::default();
        let names = Bump::new();
        let script = VersionScriptData {
            raw: b"V1 { global: dup; }; V2 { global: dup; } V1;",
        };
        let mut db = SymbolDb::build(&args, Some(script), &names).unwrap();
        db.add_file(object_with("a.o", vec![defined(b"dup", 0)]));

        scan_version_script(&mut db);

        assert!(
            db.diagnostics
                .warnings()
                .iter()
                .any(|w| w.contains("duplicate symbol dup in version script"))
        );
        // The later version wins.
        let id = db.find(b"dup").unwrap();
        assert_eq!(db.symbol(id).version_index(), FIRST_USER_VERSION + 1);
    }

    #[test]
    fn trace_reports_defining_file() {
        let args = Args {
            trace_symbol: vec!["main".to_owned(), "absent".to_owned()],
            ..Args::default()
        };
        let names = Bump::new();
        let mut db = SymbolDb::build(&args, None, &names).unwrap();
        db.add_file(object_with("main.o", vec![defined(b"main", 0)]));

        trace_defined(&mut db);

        assert_eq!(db.diagnostics.messages(), ["main.o: definition of main"]);
    }
}
