use std::path::{Component, Path, PathBuf};

use crate::config::SourceReader;
use crate::context::IncludeFrame;
use crate::token::{Token, TokenKind};

/// Spelling of an `#include` operand
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncludeForm {
    /// `"name"`: searched next to the including files first
    Quoted,
    /// `<name>`: searched in the include directories only
    Angle,
}

/// A file found by include search
#[derive(Clone, Debug)]
pub struct ResolvedInclude {
    /// Normalized path of the file
    pub path: PathBuf,
    /// File content
    pub content: String,
    /// Include directory the file was found in
    pub dir_index: Option<usize>,
}

/// Read the header name from the tokens following `#include`.
///
/// A `<...>` operand is spelled back from its tokens, inserting a space
/// where the source had one.
#[must_use]
pub fn parse_operand(tokens: &[Token]) -> Option<(String, IncludeForm)> {
    let first = tokens.first()?;
    if first.kind == TokenKind::String {
        let inner = first
            .value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))?;
        return Some((inner.to_string(), IncludeForm::Quoted));
    }
    if !first.is_punct("<") {
        return None;
    }

    let mut name = String::new();
    let mut prev = first;
    for token in &tokens[1..] {
        if token.is_punct(">") {
            return Some((name, IncludeForm::Angle));
        }
        if !name.is_empty() && !prev.is_adjacent_to(token) {
            name.push(' ');
        }
        name.push_str(&token.original);
        prev = token;
    }
    None
}

/// Search for an included file.
///
/// Quoted names are looked up in the directory of the including file, then
/// in the directories of the files further up the stack (innermost first),
/// then in `dirs`. Angle names only use `dirs`. `#include_next` resumes
/// after the directory the current file was found in; when the current file
/// was not found through `dirs` it behaves like a plain include.
#[must_use]
pub fn resolve(
    name: &str,
    form: IncludeForm,
    is_next: bool,
    stack: &[IncludeFrame],
    dirs: &[PathBuf],
    reader: &SourceReader,
) -> Option<ResolvedInclude> {
    let target = Path::new(name);
    if target.is_absolute() {
        return read(reader, target.to_path_buf(), None);
    }

    let next_from = if is_next {
        stack.last().and_then(|frame| frame.found_in).map(|i| i + 1)
    } else {
        None
    };

    if let Some(start) = next_from {
        return search_dirs(name, dirs, start, reader);
    }

    if form == IncludeForm::Quoted {
        for frame in stack.iter().rev() {
            let candidate = frame.directory().join(target);
            if let Some(found) = read(reader, candidate, None) {
                return Some(found);
            }
        }
    }

    search_dirs(name, dirs, 0, reader)
}

fn search_dirs(
    name: &str,
    dirs: &[PathBuf],
    start: usize,
    reader: &SourceReader,
) -> Option<ResolvedInclude> {
    dirs.iter()
        .enumerate()
        .skip(start)
        .find_map(|(i, dir)| read(reader, dir.join(name), Some(i)))
}

fn read(reader: &SourceReader, path: PathBuf, dir_index: Option<usize>) -> Option<ResolvedInclude> {
    let path = normalize(&path);
    log::trace!("include candidate {}", path.display());
    let content = reader(&path)?;
    Some(ResolvedInclude {
        path,
        content,
        dir_index,
    })
}

/// Remove `.` components and fold `..` where possible, without touching
/// the file system
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if can_pop {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::lexer::Lexer;

    fn reader(files: &[&str]) -> SourceReader {
        let files: HashMap<PathBuf, String> = files
            .iter()
            .map(|f| (PathBuf::from(f), format!("// {f}")))
            .collect();
        Arc::new(move |p: &Path| files.get(p).cloned())
    }

    fn frame(path: &str, found_in: Option<usize>) -> IncludeFrame {
        IncludeFrame::new(PathBuf::from(path), found_in, 0)
    }

    #[test]
    fn operand_forms() {
        let lexer = Lexer::raw();
        let quoted = lexer.tokenize_fragment("\"a/b.h\"", 1, 9);
        assert_eq!(
            parse_operand(&quoted),
            Some(("a/b.h".to_string(), IncludeForm::Quoted))
        );
        let angle = lexer.tokenize_fragment("<sys/types.h>", 1, 9);
        assert_eq!(
            parse_operand(&angle),
            Some(("sys/types.h".to_string(), IncludeForm::Angle))
        );
        let open = lexer.tokenize_fragment("<stdio.h", 1, 9);
        assert_eq!(parse_operand(&open), None);
    }

    #[test]
    fn quoted_searches_including_directory_first() {
        let reader = reader(&["src/a.h", "inc/a.h"]);
        let stack = [frame("src/main.c", None)];
        let dirs = [PathBuf::from("inc")];
        let found = resolve("a.h", IncludeForm::Quoted, false, &stack, &dirs, &reader);
        assert_eq!(found.map(|f| f.path), Some(PathBuf::from("src/a.h")));
    }

    #[test]
    fn quoted_walks_up_the_include_stack() {
        let reader = reader(&["src/util.h"]);
        let stack = [frame("src/main.c", None), frame("src/sub/x.h", None)];
        let found = resolve("util.h", IncludeForm::Quoted, false, &stack, &[], &reader);
        assert_eq!(found.map(|f| f.path), Some(PathBuf::from("src/util.h")));
    }

    #[test]
    fn angle_ignores_including_directory() {
        let reader = reader(&["src/a.h"]);
        let stack = [frame("src/main.c", None)];
        assert!(resolve("a.h", IncludeForm::Angle, false, &stack, &[], &reader).is_none());
        assert!(resolve("a.h", IncludeForm::Quoted, false, &stack, &[], &reader).is_some());
    }

    #[test]
    fn include_next_skips_current_directory() {
        let reader = reader(&["one/limits.h", "two/limits.h"]);
        let dirs = [PathBuf::from("one"), PathBuf::from("two")];
        let stack = [frame("main.c", None), frame("one/limits.h", Some(0))];
        let found = resolve("limits.h", IncludeForm::Angle, true, &stack, &dirs, &reader);
        let found = found.unwrap();
        assert_eq!(found.path, PathBuf::from("two/limits.h"));
        assert_eq!(found.dir_index, Some(1));
    }

    #[test]
    fn normalize_folds_dots() {
        assert_eq!(normalize(Path::new("a/./b/../c.h")), PathBuf::from("a/c.h"));
        assert_eq!(normalize(Path::new("../x.h")), PathBuf::from("../x.h"));
    }
}
