//! Combining maps: physical concatenation and stage composition.

use std::path::{Component, Path, PathBuf};

use super::{Mapping, Position, SourceMap};

/// Map of `a` followed by `b` in one generated file.
///
/// `b`'s generated lines shift down by `a`'s line count, its sources are
/// rewritten relative to `a`'s output file, and source/name tables are
/// merged without duplicates.
pub fn concat(a: &SourceMap, b: &SourceMap) -> SourceMap {
    let offset = a.line_count();
    let mut out = a.clone();

    let source_ids: Vec<u32> = b
        .sources
        .iter()
        .map(|source| intern(&mut out.sources, rebase_source(source, &b.file, &a.file)))
        .collect();
    let name_ids: Vec<u32> = b
        .names
        .iter()
        .map(|name| intern(&mut out.names, name.clone()))
        .collect();

    out.mappings.extend(b.mappings.iter().filter_map(|m| {
        Some(Mapping {
            generated: Position::new(m.generated.line + offset, m.generated.column),
            original: m.original,
            source: *source_ids.get(m.source as usize)?,
            name: m.name.and_then(|n| name_ids.get(n as usize).copied()),
        })
    }));
    out.line_count = Some(offset + b.line_count());
    out
}

/// Map of `second` applied on top of `first`.
///
/// `first` maps stage-one output back to the original sources; `second`
/// maps stage-two output back to stage-one output. Each `second` mapping
/// is traced through the closest `first` mapping at or before its
/// original position. Mappings that precede every `first` mapping are
/// dropped.
pub fn compose(first: &SourceMap, second: &SourceMap) -> SourceMap {
    if first.is_empty() {
        return second.clone();
    }
    let mut sorted;
    let first_mappings = if first.mappings.is_sorted_by_key(|m| m.generated) {
        first.mappings.as_slice()
    } else {
        sorted = first.mappings.clone();
        sorted.sort_by_key(|m| m.generated);
        sorted.as_slice()
    };

    let mappings = second
        .mappings
        .iter()
        .filter_map(|m| {
            let origin = bsearch_mappings(first_mappings, m.original)?;
            Some(Mapping {
                generated: m.generated,
                original: origin.original,
                source: origin.source,
                name: origin.name,
            })
        })
        .collect();

    SourceMap {
        version: second.version,
        file: second.file.clone(),
        mappings,
        sources: first.sources.clone(),
        names: first.names.clone(),
        line_count: second.line_count,
    }
}

/// Mapping with the greatest generated position `<= offset`.
///
/// `mappings` must be sorted by generated position.
pub fn bsearch_mappings(mappings: &[Mapping], offset: Position) -> Option<&Mapping> {
    let upper = mappings.partition_point(|m| m.generated <= offset);
    upper.checked_sub(1).map(|i| &mappings[i])
}

fn intern(table: &mut Vec<String>, value: String) -> u32 {
    let index = match table.iter().position(|v| *v == value) {
        Some(i) => i,
        None => {
            table.push(value);
            table.len() - 1
        }
    };
    u32::try_from(index).unwrap_or(u32::MAX)
}

/// Rewrite `source` (relative to `from_file`) to be relative to `to_file`.
fn rebase_source(source: &str, from_file: &str, to_file: &str) -> String {
    let source_path = Path::new(source);
    if source_path.is_absolute() || source.contains("://") {
        return source.to_string();
    }

    let from_dir = Path::new(from_file).parent().unwrap_or(Path::new(""));
    let to_dir = Path::new(to_file).parent().unwrap_or(Path::new(""));
    if from_dir == to_dir {
        return source.to_string();
    }

    let target = normalize(&from_dir.join(source_path));
    relative_to(&target, &normalize(to_dir))
        .to_string_lossy()
        .into_owned()
}

/// Lexically resolve `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn relative_to(target: &Path, base: &Path) -> PathBuf {
    let target: Vec<_> = target.components().collect();
    let base: Vec<_> = base.components().collect();
    let common = target
        .iter()
        .zip(&base)
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for component in &target[common..] {
        out.push(component.as_os_str());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(gl: u32, gc: u32, ol: u32, oc: u32) -> Mapping {
        Mapping {
            generated: Position::new(gl, gc),
            original: Position::new(ol, oc),
            source: 0,
            name: None,
        }
    }

    fn map(file: &str, source: &str, mappings: Vec<Mapping>) -> SourceMap {
        SourceMap::from_mappings(file, mappings, vec![source.to_string()], vec![])
    }

    #[test]
    fn test_concat_shifts_by_first_line_count() {
        let m1 = map("bundle.js", "a.js", vec![m(1, 0, 1, 0), m(2, 0, 2, 0), m(3, 0, 3, 0)])
            .with_line_count(3);
        let m2 = map("bundle.js", "b.js", vec![m(1, 0, 1, 0), m(2, 4, 2, 0)]).with_line_count(2);

        let joined = concat(&m1, &m2);
        assert_eq!(joined.line_count(), 5);
        assert_eq!(joined.sources, vec!["a.js".to_string(), "b.js".to_string()]);

        let tail: Vec<_> = joined.mappings[3..].to_vec();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].generated, Position::new(4, 0));
        assert_eq!(tail[1].generated, Position::new(5, 4));
        assert!(tail.iter().all(|t| t.source == 1));
        // Original positions untouched
        assert_eq!(tail[1].original, Position::new(2, 0));
    }

    #[test]
    fn test_concat_dedups_sources_and_names() {
        let mut a = map("out.js", "shared.js", vec![m(1, 0, 1, 0)]).with_line_count(1);
        a.names = vec!["init".into()];
        let mut b = map("out.js", "shared.js", vec![m(1, 0, 5, 0)]).with_line_count(1);
        b.names = vec!["init".into()];
        b.mappings[0].name = Some(0);

        let joined = concat(&a, &b);
        assert_eq!(joined.sources.len(), 1);
        assert_eq!(joined.names.len(), 1);
        assert_eq!(joined.mappings[1].name, Some(0));
    }

    #[test]
    fn test_concat_rebases_sources() {
        let a = map("assets/app.js", "app.js", vec![m(1, 0, 1, 0)]).with_line_count(1);
        let b = map("assets/vendor/lib.js", "lib.js", vec![m(1, 0, 1, 0)]).with_line_count(1);
        let joined = concat(&a, &b);
        assert_eq!(joined.sources[1], "vendor/lib.js");

        let c = map("assets/vendor/lib.js", "../shared/util.js", vec![m(1, 0, 1, 0)]);
        let joined = concat(&a, &c);
        assert_eq!(joined.sources[1], "shared/util.js");
    }

    #[test]
    fn test_concat_without_line_count_uses_last_line() {
        let a = map("out.js", "a.js", vec![m(1, 0, 1, 0), m(4, 0, 4, 0)]);
        let b = map("out.js", "b.js", vec![m(1, 0, 1, 0)]);
        let joined = concat(&a, &b);
        assert_eq!(joined.mappings[2].generated.line, 5);
    }

    #[test]
    fn test_compose_traces_through_first_stage() {
        // Stage one: app.coffee → app.js (line 10 of source lands on line 2)
        let first = map(
            "app.js",
            "app.coffee",
            vec![m(1, 0, 1, 0), m(2, 0, 10, 0), m(2, 8, 10, 4)],
        );
        // Stage two: app.js → app.min.js (everything on line 1)
        let second = map(
            "app.min.js",
            "app.js",
            vec![m(1, 0, 1, 0), m(1, 12, 2, 0), m(1, 20, 2, 9)],
        );

        let combined = compose(&first, &second);
        assert_eq!(combined.file, "app.min.js");
        assert_eq!(combined.sources, vec!["app.coffee".to_string()]);
        assert_eq!(combined.mappings.len(), 3);
        assert_eq!(combined.mappings[1].generated, Position::new(1, 12));
        assert_eq!(combined.mappings[1].original, Position::new(10, 0));
        // Column 9 on line 2 falls after the (2, 8) mapping
        assert_eq!(combined.mappings[2].original, Position::new(10, 4));
    }

    #[test]
    fn test_compose_drops_unmapped_positions() {
        let first = map("a.js", "a.coffee", vec![m(3, 0, 1, 0)]);
        let second = map("a.min.js", "a.js", vec![m(1, 0, 1, 0), m(1, 5, 3, 2)]);
        let combined = compose(&first, &second);
        assert_eq!(combined.mappings.len(), 1);
        assert_eq!(combined.mappings[0].generated, Position::new(1, 5));
    }

    #[test]
    fn test_compose_with_empty_side() {
        let full = map("a.js", "a.coffee", vec![m(1, 0, 1, 0)]);
        assert_eq!(compose(&SourceMap::new("a.coffee.js"), &full), full);

        // Nothing in the final output maps anywhere
        let combined = compose(&map("a.js", "a.coffee", vec![m(5, 0, 9, 0)]), &SourceMap::new("a.min.js"));
        assert_eq!(combined.file, "a.min.js");
        assert!(combined.mappings.is_empty());
    }

    #[test]
    fn test_bsearch_lower_bound() {
        let mappings = vec![m(1, 0, 1, 0), m(1, 10, 1, 5), m(3, 0, 2, 0)];
        assert_eq!(bsearch_mappings(&mappings, Position::new(1, 10)), Some(&mappings[1]));
        assert_eq!(bsearch_mappings(&mappings, Position::new(2, 99)), Some(&mappings[1]));
        assert_eq!(bsearch_mappings(&mappings, Position::new(9, 0)), Some(&mappings[2]));
        assert!(bsearch_mappings(&mappings[1..], Position::new(1, 0)).is_none());
        assert!(bsearch_mappings(&[], Position::new(1, 0)).is_none());
    }
}
