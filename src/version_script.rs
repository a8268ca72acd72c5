//! Support for version scripts. Version scripts attach versions to symbols and control which
//! symbols are exported from the dynamic symbol table. They're generally passed via the
//! --version-script flag and can be quite large, so they get their own parser.

use crate::error::Result;
use crate::symbol::FIRST_USER_VERSION;
use crate::symbol::VER_NDX_GLOBAL;
use glob::Pattern;
use winnow::BStr;
use winnow::Parser;
use winnow::error::ContextError;
use winnow::error::FromExternalError;
use winnow::token::take_till;
use winnow::token::take_until;
use winnow::token::take_while;

#[derive(Clone, Copy)]
pub struct VersionScriptData<'data> {
    pub raw: &'data [u8],
}

/// A parsed version script. `versions[0]` is the anonymous base entry holding the patterns of a
/// script without version declarations; named versions follow in declaration order.
#[derive(Debug, Default)]
pub struct VersionScript<'data> {
    pub(crate) versions: Vec<VersionDecl<'data>>,
}

#[derive(Debug, Default)]
pub(crate) struct VersionDecl<'data> {
    pub(crate) name: &'data [u8],
    pub(crate) parent: Option<u16>,
    pub(crate) globals: Vec<SymbolMatcher<'data>>,
    pub(crate) locals: Vec<SymbolMatcher<'data>>,
}

#[derive(Debug)]
pub(crate) enum SymbolMatcher<'data> {
    /// Matches the name exactly.
    Exact(&'data [u8]),
    /// A glob pattern containing at least one wildcard.
    Glob(Pattern),
    /// The catch-all pattern `*`.
    MatchesAll,
    /// From an `extern "C++"` block; compared against the demangled name.
    CxxExact(&'data [u8]),
    /// From an `extern "C++"` block; globbed against the demangled name.
    CxxGlob(Pattern),
}

impl<'data> VersionScript<'data> {
    #[tracing::instrument(skip_all, name = "Parse version script")]
    pub fn parse(data: VersionScriptData<'data>) -> Result<VersionScript<'data>> {
        parse_version_script
            .parse(BStr::new(data.raw))
            .map_err(|err| anyhow::anyhow!("Failed to parse version script:\n{err}"))
    }

    /// The id a symbol named `base@ver` receives when `ver` is declared by this script.
    pub(crate) fn id_for_version_name(&self, name: &[u8]) -> Option<u16> {
        self.versions
            .iter()
            .skip(1)
            .position(|decl| decl.name == name)
            .map(|i| FIRST_USER_VERSION + i as u16)
    }

    /// The id assigned to symbols matched by the declaration at `index`. Matches from the
    /// anonymous base entry become plain globals.
    pub(crate) fn version_id_for_index(&self, index: usize) -> u16 {
        if index == 0 {
            VER_NDX_GLOBAL
        } else {
            FIRST_USER_VERSION + (index - 1) as u16
        }
    }
}

fn parse_version_script<'input>(input: &mut &'input BStr) -> winnow::Result<VersionScript<'input>> {
    skip_comments_and_whitespace(input)?;

    // A simple script only controls symbol visibility and declares no versions.
    if input.starts_with(b"{") {
        let body = parse_version_body(input)?;

        ";".parse_next(input)?;

        skip_comments_and_whitespace(input)?;

        return Ok(VersionScript {
            versions: vec![body],
        });
    }

    let mut script = VersionScript::default();

    // Base entry placeholder so declared versions start at index 1.
    let mut version_names: Vec<&[u8]> = vec![b""];
    script.versions.push(VersionDecl::default());

    while !input.is_empty() {
        let name = parse_token(input)?;

        skip_comments_and_whitespace(input)?;

        let mut decl = parse_version_body(input)?;
        decl.name = name;

        let parent_name = take_until(0.., b';').parse_next(input)?;
        let parent_name = parent_name.trim_ascii();

        if !parent_name.is_empty() {
            // We don't expect many versions, so a linear scan is fine.
            let position = version_names
                .iter()
                .position(|v| *v == parent_name)
                .ok_or_else(|| {
                    ContextError::from_external_error(input, ScriptError::UnknownParentVersion)
                })?;
            decl.parent = Some(position as u16);
        }

        ";".parse_next(input)?;

        skip_comments_and_whitespace(input)?;

        version_names.push(name);
        script.versions.push(decl);
    }

    Ok(script)
}

fn parse_version_body<'input>(input: &mut &'input BStr) -> winnow::Result<VersionDecl<'input>> {
    let mut in_local_section = false;
    let mut out = VersionDecl::default();

    '{'.parse_next(input)?;

    loop {
        skip_comments_and_whitespace(input)?;

        if input.starts_with(b"}") {
            '}'.parse_next(input)?;
            skip_comments_and_whitespace(input)?;
            break;
        }

        if input.starts_with(b"global:") {
            "global:".parse_next(input)?;
            in_local_section = false;
        } else if input.starts_with(b"local:") {
            "local:".parse_next(input)?;
            in_local_section = true;
        } else {
            let matchers = parse_matcher(input)?;
            if in_local_section {
                out.locals.extend(matchers);
            } else {
                out.globals.extend(matchers);
            }
        }
    }

    Ok(out)
}

fn parse_matcher<'input>(input: &mut &'input BStr) -> winnow::Result<Vec<SymbolMatcher<'input>>> {
    if input.starts_with(b"extern \"C++\"") {
        b"extern \"C++\"".parse_next(input)?;
        skip_comments_and_whitespace(input)?;
        '{'.parse_next(input)?;

        let mut matchers = Vec::new();
        loop {
            skip_comments_and_whitespace(input)?;

            if input.starts_with(b"};") {
                b"};".parse_next(input)?;
                skip_comments_and_whitespace(input)?;
                break;
            }

            matchers.push(parse_single_matcher(input)?.into_cxx());
        }
        return Ok(matchers);
    }

    Ok(vec![parse_single_matcher(input)?])
}

fn parse_single_matcher<'input>(
    input: &mut &'input BStr,
) -> winnow::Result<SymbolMatcher<'input>> {
    let token = take_until(1.., b';').parse_next(input)?;

    skip_comments_and_whitespace(input)?;

    if input.starts_with(b";") {
        ";".parse_next(input)?;
    }

    let token = token.trim_ascii_end();

    Ok(
        if let Some(unquoted) = token
            .strip_prefix(b"\"")
            .and_then(|t| t.strip_suffix(b"\""))
        {
            SymbolMatcher::Exact(unquoted)
        } else if token == b"*" {
            SymbolMatcher::MatchesAll
        } else if b"[]?*".iter().any(|c| token.contains(c)) {
            let pattern = str::from_utf8(token)
                .map_err(|_| ContextError::from_external_error(input, ScriptError::InvalidUtf8))
                .and_then(|p| {
                    Pattern::new(p).map_err(|_: glob::PatternError| {
                        ContextError::from_external_error(input, ScriptError::InvalidGlobPattern)
                    })
                })?;
            SymbolMatcher::Glob(pattern)
        } else {
            SymbolMatcher::Exact(token)
        },
    )
}

fn parse_token<'input>(input: &mut &'input BStr) -> winnow::Result<&'input [u8]> {
    take_while(1.., |b| !b" (){}\n\t".contains(&b)).parse_next(input)
}

pub(crate) fn skip_comments_and_whitespace(input: &mut &BStr) -> winnow::Result<()> {
    loop {
        take_while(0.., |b: u8| b.is_ascii_whitespace()).parse_next(input)?;

        if input.starts_with(b"#") {
            take_till(0.., |b| b == b'\n').parse_next(input)?;
        } else if input.starts_with(b"/*") {
            b"/*".parse_next(input)?;
            take_until(0.., b"*/".as_slice()).parse_next(input)?;
            b"*/".parse_next(input)?;
        } else {
            return Ok(());
        }
    }
}

impl<'data> SymbolMatcher<'data> {
    fn into_cxx(self) -> SymbolMatcher<'data> {
        match self {
            SymbolMatcher::Exact(name) => SymbolMatcher::CxxExact(name),
            SymbolMatcher::Glob(pattern) => SymbolMatcher::CxxGlob(pattern),
            other => other,
        }
    }
}

impl std::fmt::Display for SymbolMatcher<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolMatcher::Exact(name) | SymbolMatcher::CxxExact(name) => {
                write!(f, "{}", String::from_utf8_lossy(name))
            }
            SymbolMatcher::Glob(pattern) | SymbolMatcher::CxxGlob(pattern) => {
                write!(f, "{}", pattern.as_str())
            }
            SymbolMatcher::MatchesAll => write!(f, "*"),
        }
    }
}

#[derive(Debug)]
enum ScriptError {
    UnknownParentVersion,
    InvalidUtf8,
    InvalidGlobPattern,
}

impl std::error::Error for ScriptError {}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptError::UnknownParentVersion => write!(f, "Unknown parent version"),
            ScriptError::InvalidUtf8 => write!(f, "Invalid utf-8 string"),
            ScriptError::InvalidGlobPattern => write!(f, "Invalid glob pattern"),
        }
    }
}
