//
// cross_file/resolve.rs
//
// Source-graph traversal and cross-file resolution
//

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::position::Cursor;
use crate::scope::FileScope;
use crate::script::Script;
use crate::symbols::{Definition, Use};

use super::content_provider::ContentProvider;
use super::path_resolve::{base_dir_of, resolve_source_path};
use super::source_detect::{find_source_statements, SourceStatement};
use super::Env;

/// A file reached through `source`, parsed once per request.
#[derive(Debug)]
pub struct SourcedFile {
    pub path: PathBuf,
    /// `None` when the file is missing, unreadable or does not parse.
    pub parsed: Option<ParsedFile>,
}

#[derive(Debug)]
pub struct ParsedFile {
    pub script: Script,
    pub scope: FileScope,
}

/// A definition together with the file it lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDefinition {
    pub path: PathBuf,
    pub definition: Definition,
}

/// Uses grouped per file. The queried file comes first, then sourced files in
/// traversal order, then workspace files that source the queried file.
pub type FileReferences = IndexMap<PathBuf, Vec<Use>>;

/// Cross-file resolution over a fixed environment snapshot and content
/// source. Nothing is cached between calls.
pub struct Resolver<'a> {
    env: &'a Env,
    provider: &'a dyn ContentProvider,
}

impl<'a> Resolver<'a> {
    pub fn new(env: &'a Env, provider: &'a dyn ContentProvider) -> Self {
        Self { env, provider }
    }

    /// Read and parse `path`. Missing and unparsable files yield `None`.
    pub fn load(&self, path: &Path) -> Option<ParsedFile> {
        let content = self.provider.get_content(path)?;
        match Script::parse(&content) {
            Ok(script) => {
                let scope = FileScope::new(&script);
                Some(ParsedFile { script, scope })
            }
            Err(e) => {
                log::trace!("Skipping {} (parse error at {})", path.display(), e);
                None
            }
        }
    }

    /// Paths reachable from `script` through `source`, depth-first in source
    /// order. A path is listed once; missing files are listed but not followed.
    pub fn find_all_sourced_files(
        &self,
        script: &Script,
        base_dir: &Path,
        visited: &mut HashSet<PathBuf>,
    ) -> Vec<PathBuf> {
        self.source_closure(script, base_dir, visited)
            .into_iter()
            .map(|f| f.path)
            .collect()
    }

    /// Like [`Self::find_all_sourced_files`], keeping each parsed file.
    pub fn source_closure(
        &self,
        script: &Script,
        base_dir: &Path,
        visited: &mut HashSet<PathBuf>,
    ) -> Vec<SourcedFile> {
        let mut out = Vec::new();
        self.collect_closure(script, base_dir, visited, &mut out);
        out
    }

    fn collect_closure(
        &self,
        script: &Script,
        base_dir: &Path,
        visited: &mut HashSet<PathBuf>,
        out: &mut Vec<SourcedFile>,
    ) {
        for statement in find_source_statements(script, self.env) {
            let Some(path) = resolve_source_path(&statement.path, base_dir) else {
                continue;
            };
            if !visited.insert(path.clone()) {
                continue;
            }

            let parsed = self.load(&path);
            let index = out.len();
            out.push(SourcedFile {
                path: path.clone(),
                parsed: None,
            });

            if let Some(parsed) = parsed {
                self.collect_closure(&parsed.script, &base_dir_of(&path), visited, out);
                out[index].parsed = Some(parsed);
            }
        }
    }

    /// Direct `source` statements of `script` whose target does not exist.
    pub fn missing_sources(&self, script: &Script, base_dir: &Path) -> Vec<(SourceStatement, PathBuf)> {
        find_source_statements(script, self.env)
            .into_iter()
            .filter_map(|statement| {
                let path = resolve_source_path(&statement.path, base_dir)?;
                (!self.provider.exists(&path)).then_some((statement, path))
            })
            .collect()
    }

    /// Resolve the identifier under `cursor` in the file at `path`. In-file
    /// scope wins; otherwise the source closure is searched.
    pub fn resolve_definition(&self, path: &Path, script: &Script, cursor: Cursor) -> Option<ResolvedDefinition> {
        let scope = FileScope::new(script);
        let (name, _) = script.identifier_at(cursor)?;
        let closure = self.closure_of(path, script);
        resolve_with(path, &scope, &name, cursor, &closure)
    }

    /// Every use equivalent to the identifier under `cursor`. With
    /// `workspace`, files among it that directly source `path` are searched
    /// as well.
    pub fn find_references(
        &self,
        path: &Path,
        script: &Script,
        cursor: Cursor,
        include_declarations: bool,
        workspace: Option<&[PathBuf]>,
    ) -> FileReferences {
        let mut results = FileReferences::new();
        let Some((name, _)) = script.identifier_at(cursor) else {
            return results;
        };

        let scope = FileScope::new(script);
        let closure = self.closure_of(path, script);
        let resolved = resolve_with(path, &scope, &name, cursor, &closure);
        let query = Query {
            name: &name,
            resolved: resolved.as_ref(),
            include_declarations,
        };

        push_uses(&mut results, path, query.uses_in(path, &scope));
        for file in &closure {
            if let Some(parsed) = &file.parsed {
                push_uses(&mut results, &file.path, query.uses_in(&file.path, &parsed.scope));
            }
        }

        if let Some(workspace) = workspace {
            let known: HashSet<&Path> = std::iter::once(path)
                .chain(closure.iter().map(|f| f.path.as_path()))
                .collect();
            let candidates: Vec<PathBuf> = workspace
                .iter()
                .filter(|c| !known.contains(c.as_path()))
                .cloned()
                .collect();
            for parent in self.files_sourcing(path, &candidates) {
                if let Some(parsed) = &parent.parsed {
                    let uses = query.uses_in(&parent.path, &parsed.scope);
                    push_uses(&mut results, &parent.path, uses);
                }
            }
        }

        log::trace!(
            "References for '{}' from {}: {} file(s)",
            name,
            path.display(),
            results.len()
        );
        results
    }

    /// Files among `candidates` with a `source` statement resolving to
    /// `target`, each parsed once and returned with its parse.
    pub fn files_sourcing(&self, target: &Path, candidates: &[PathBuf]) -> Vec<SourcedFile> {
        candidates
            .iter()
            .filter(|candidate| candidate.as_path() != target)
            .filter_map(|candidate| {
                let parsed = self.load(candidate)?;
                let base = base_dir_of(candidate);
                let sources_target = find_source_statements(&parsed.script, self.env)
                    .iter()
                    .filter_map(|s| resolve_source_path(&s.path, &base))
                    .any(|p| p == target);
                sources_target.then(|| SourcedFile {
                    path: candidate.clone(),
                    parsed: Some(parsed),
                })
            })
            .collect()
    }

    /// Source closure of `path`, without `path` itself when a cycle leads back.
    fn closure_of(&self, path: &Path, script: &Script) -> Vec<SourcedFile> {
        let mut visited = HashSet::new();
        self.source_closure(script, &base_dir_of(path), &mut visited)
            .into_iter()
            .filter(|f| f.path != path)
            .collect()
    }
}

fn push_uses(results: &mut FileReferences, path: &Path, uses: Vec<Use>) {
    if uses.is_empty() {
        return;
    }
    let entry = results.entry(path.to_path_buf()).or_default();
    for u in uses {
        if !entry.iter().any(|existing| existing.span == u.span) {
            entry.push(u);
        }
    }
}

/// In-file resolution first, then the closure: a scoped definition in a
/// function of the same name, then a function, then a global variable with
/// the last-sourced file winning.
fn resolve_with(
    path: &Path,
    scope: &FileScope,
    name: &str,
    cursor: Cursor,
    closure: &[SourcedFile],
) -> Option<ResolvedDefinition> {
    if let Some(definition) = scope.resolve_name(name, cursor) {
        return Some(ResolvedDefinition {
            path: path.to_path_buf(),
            definition: definition.clone(),
        });
    }

    if let Some(function) = scope.enclosing_function(cursor) {
        let hit = find_in(closure.iter(), |d| {
            d.is_scoped && d.name == name && d.owner.as_ref().is_some_and(|o| o.name == function.name)
        });
        if hit.is_some() {
            return hit;
        }
    }

    find_in(closure.iter(), |d| d.is_function() && d.name == name).or_else(|| {
        find_in(closure.iter().rev(), |d| {
            !d.is_scoped && !d.is_function() && d.name == name
        })
    })
}

/// First definition matching `pred`, scanning files in iteration order.
fn find_in<'c>(
    files: impl Iterator<Item = &'c SourcedFile>,
    pred: impl Fn(&Definition) -> bool,
) -> Option<ResolvedDefinition> {
    files
        .filter_map(|f| f.parsed.as_ref().map(|p| (f, p)))
        .find_map(|(file, parsed)| {
            parsed
                .scope
                .definitions()
                .iter()
                .find(|d| pred(d))
                .map(|d| ResolvedDefinition {
                    path: file.path.clone(),
                    definition: d.clone(),
                })
        })
}

/// Whether `candidate`, a use in some file other than the definition's,
/// refers to `definition` under the shared-global-namespace rule.
pub fn resolves_across_files(scope: &FileScope, candidate: &Use, definition: &Definition) -> bool {
    if candidate.name != definition.name {
        return false;
    }

    let function = scope.enclosing_function(candidate.span.start);
    if let Some(function) = &function {
        if scope
            .local_definition(&candidate.name, function, candidate.span.start)
            .is_some()
        {
            return false;
        }
    }

    if definition.is_scoped {
        return match (&function, &definition.owner) {
            (Some(function), Some(owner)) => function.name == owner.name,
            _ => false,
        };
    }
    true
}

struct Query<'q> {
    name: &'q str,
    resolved: Option<&'q ResolvedDefinition>,
    include_declarations: bool,
}

impl<'q> Query<'q> {
    fn uses_in(&self, path: &Path, scope: &FileScope) -> Vec<Use> {
        match self.resolved {
            Some(resolved) if resolved.path == path => {
                scope.find_references(&resolved.definition, self.include_declarations)
            }
            Some(resolved) => scope
                .uses(self.include_declarations)
                .into_iter()
                .filter(|u| resolves_across_files(scope, u, &resolved.definition))
                .collect(),
            None => scope.uses_named(self.name, self.include_declarations),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Position;
    use std::collections::HashMap;

    fn files(entries: &[(&str, &str)]) -> HashMap<PathBuf, String> {
        entries
            .iter()
            .map(|(p, c)| (PathBuf::from(p), c.to_string()))
            .collect()
    }

    fn parse(text: &str) -> Script {
        Script::parse(text).expect("script should parse")
    }

    #[test]
    fn test_closure_is_depth_first_in_source_order() {
        let fs = files(&[
            ("/w/b.sh", "source sub/c.sh\n"),
            ("/w/sub/c.sh", "source d.sh\n"),
            ("/w/sub/d.sh", "d=1\n"),
            ("/w/e.sh", "e=1\n"),
        ]);
        let env = Env::new();
        let resolver = Resolver::new(&env, &fs);
        let main = parse("source b.sh\nsource e.sh\n");

        let found = resolver.find_all_sourced_files(&main, Path::new("/w"), &mut HashSet::new());
        assert_eq!(
            found,
            vec![
                PathBuf::from("/w/b.sh"),
                PathBuf::from("/w/sub/c.sh"),
                PathBuf::from("/w/sub/d.sh"),
                PathBuf::from("/w/e.sh"),
            ]
        );
    }

    #[test]
    fn test_cycle_terminates_and_lists_each_file_once() {
        let fs = files(&[("/w/a.sh", "source b.sh\n"), ("/w/b.sh", "source a.sh\n")]);
        let env = Env::new();
        let resolver = Resolver::new(&env, &fs);
        let a = parse(&fs[Path::new("/w/a.sh")]);

        let found = resolver.find_all_sourced_files(&a, Path::new("/w"), &mut HashSet::new());
        assert_eq!(found, vec![PathBuf::from("/w/b.sh"), PathBuf::from("/w/a.sh")]);
    }

    #[test]
    fn test_self_source_terminates() {
        let fs = files(&[("/w/a.sh", "source ./a.sh\nsource a.sh\n")]);
        let env = Env::new();
        let resolver = Resolver::new(&env, &fs);
        let a = parse(&fs[Path::new("/w/a.sh")]);
        let found = resolver.find_all_sourced_files(&a, Path::new("/w"), &mut HashSet::new());
        assert_eq!(found, vec![PathBuf::from("/w/a.sh")]);
    }

    #[test]
    fn test_missing_files_are_listed_not_followed() {
        let fs = files(&[("/w/b.sh", "b=1\n")]);
        let env = Env::new();
        let resolver = Resolver::new(&env, &fs);
        let main = parse("source gone.sh\nsource b.sh\n");

        let found = resolver.find_all_sourced_files(&main, Path::new("/w"), &mut HashSet::new());
        assert_eq!(found, vec![PathBuf::from("/w/gone.sh"), PathBuf::from("/w/b.sh")]);

        let missing = resolver.missing_sources(&main, Path::new("/w"));
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].1, PathBuf::from("/w/gone.sh"));
        assert_eq!(missing[0].0.span.start, Position::new(1, 1));
    }

    #[test]
    fn test_environment_substitution_in_targets() {
        let fs = files(&[("/opt/lib/x.sh", "x=1\n")]);
        let mut env = Env::new();
        env.insert("LIB".to_string(), "/opt/lib".to_string());
        let resolver = Resolver::new(&env, &fs);
        let main = parse("source \"$LIB/x.sh\"\n");
        let found = resolver.find_all_sourced_files(&main, Path::new("/w"), &mut HashSet::new());
        assert_eq!(found, vec![PathBuf::from("/opt/lib/x.sh")]);
    }

    #[test]
    fn test_last_sourced_global_wins() {
        let fs = files(&[("/w/b.sh", "x=b\n"), ("/w/c.sh", "x=c\n")]);
        let env = Env::new();
        let resolver = Resolver::new(&env, &fs);
        let main_text = "source b.sh\nsource c.sh\necho $x\n";
        let main = parse(main_text);

        let resolved = resolver
            .resolve_definition(Path::new("/w/a.sh"), &main, Position::new(3, 7))
            .unwrap();
        assert_eq!(resolved.path, PathBuf::from("/w/c.sh"));
        assert_eq!(resolved.definition.span.start, Position::new(1, 1));
    }

    #[test]
    fn test_first_function_across_files_wins() {
        let fs = files(&[
            ("/w/b.sh", "helper() { :; }\n"),
            ("/w/c.sh", "helper() { echo c; }\n"),
        ]);
        let env = Env::new();
        let resolver = Resolver::new(&env, &fs);
        let main = parse("source b.sh\nsource c.sh\nhelper\n");

        let resolved = resolver
            .resolve_definition(Path::new("/w/a.sh"), &main, Position::new(3, 2))
            .unwrap();
        assert_eq!(resolved.path, PathBuf::from("/w/b.sh"));
        assert!(resolved.definition.is_function());
    }

    #[test]
    fn test_in_file_definition_beats_sourced() {
        let fs = files(&[("/w/b.sh", "x=b\n")]);
        let env = Env::new();
        let resolver = Resolver::new(&env, &fs);
        let main = parse("source b.sh\nx=a\necho $x\n");

        let resolved = resolver
            .resolve_definition(Path::new("/w/a.sh"), &main, Position::new(3, 7))
            .unwrap();
        assert_eq!(resolved.path, PathBuf::from("/w/a.sh"));
    }

    #[test]
    fn test_scoped_definition_in_same_named_function() {
        let fs = files(&[("/w/b.sh", "run() {\n  local mode=fast\n}\n")]);
        let env = Env::new();
        let resolver = Resolver::new(&env, &fs);
        let main = parse("source b.sh\nrun() {\n  echo $mode\n}\n");

        let resolved = resolver
            .resolve_definition(Path::new("/w/a.sh"), &main, Position::new(3, 9))
            .unwrap();
        assert_eq!(resolved.path, PathBuf::from("/w/b.sh"));
        assert!(resolved.definition.is_scoped);
    }

    #[test]
    fn test_unparsable_sourced_file_is_skipped() {
        let fs = files(&[("/w/bad.sh", "if then fi (\n"), ("/w/good.sh", "x=1\n")]);
        let env = Env::new();
        let resolver = Resolver::new(&env, &fs);
        let main = parse("source bad.sh\nsource good.sh\necho $x\n");

        let resolved = resolver
            .resolve_definition(Path::new("/w/a.sh"), &main, Position::new(3, 7))
            .unwrap();
        assert_eq!(resolved.path, PathBuf::from("/w/good.sh"));
    }

    #[test]
    fn test_references_span_sourced_files() {
        let fs = files(&[(
            "/w/lib.sh",
            "greet() {\n  echo \"hi $name\"\n}\nname=lib\n",
        )]);
        let env = Env::new();
        let resolver = Resolver::new(&env, &fs);
        let main_text = "source lib.sh\ngreet\ngreet\n";
        let main = parse(main_text);

        let refs = resolver.find_references(Path::new("/w/a.sh"), &main, Position::new(2, 1), true, None);
        let keys: Vec<_> = refs.keys().cloned().collect();
        assert_eq!(keys, vec![PathBuf::from("/w/a.sh"), PathBuf::from("/w/lib.sh")]);
        assert_eq!(refs[Path::new("/w/a.sh")].len(), 2);
        assert_eq!(refs[Path::new("/w/lib.sh")].len(), 1);
    }

    #[test]
    fn test_cross_file_local_shadow_blocks_match() {
        let fs = files(&[(
            "/w/lib.sh",
            "f() {\n  local count=0\n  echo $count\n}\necho $count\n",
        )]);
        let env = Env::new();
        let resolver = Resolver::new(&env, &fs);
        let main = parse("count=1\nsource lib.sh\n");

        let refs = resolver.find_references(Path::new("/w/a.sh"), &main, Position::new(1, 1), true, None);
        let lib: Vec<u32> = refs[Path::new("/w/lib.sh")]
            .iter()
            .map(|u| u.span.start.line)
            .collect();
        assert_eq!(lib, vec![5]);
    }

    #[test]
    fn test_workspace_parents_are_candidates() {
        let fs = files(&[
            ("/w/lib.sh", "util() { :; }\n"),
            ("/w/main.sh", "source lib.sh\nutil\n"),
            ("/w/other.sh", "util\n"),
        ]);
        let env = Env::new();
        let resolver = Resolver::new(&env, &fs);
        let lib = parse(&fs[Path::new("/w/lib.sh")]);
        let workspace = vec![
            PathBuf::from("/w/lib.sh"),
            PathBuf::from("/w/main.sh"),
            PathBuf::from("/w/other.sh"),
        ];

        let refs = resolver.find_references(
            Path::new("/w/lib.sh"),
            &lib,
            Position::new(1, 1),
            true,
            Some(&workspace),
        );
        assert!(refs.contains_key(Path::new("/w/main.sh")));
        assert!(!refs.contains_key(Path::new("/w/other.sh")));
    }

    #[test]
    fn test_scoped_cross_file_references_need_same_function_name() {
        let fs = files(&[("/w/b.sh", "run() {\n  local mode=fast\n  echo $mode\n}\n")]);
        let env = Env::new();
        let resolver = Resolver::new(&env, &fs);
        let main = parse(
            "source b.sh\nrun() {\n  echo $mode\n}\nother() {\n  echo $mode\n}\n",
        );

        let refs = resolver.find_references(Path::new("/w/a.sh"), &main, Position::new(3, 9), true, None);
        let lines = |path: &str| -> Vec<u32> {
            refs.get(Path::new(path))
                .map(|uses| uses.iter().map(|u| u.span.start.line).collect())
                .unwrap_or_default()
        };
        assert_eq!(lines("/w/a.sh"), vec![3]);
        assert_eq!(lines("/w/b.sh"), vec![2, 3]);
    }

    /// Counts reads per path on top of an in-memory file set.
    struct CountingProvider {
        files: HashMap<PathBuf, String>,
        reads: std::sync::Mutex<HashMap<PathBuf, usize>>,
    }

    impl ContentProvider for CountingProvider {
        fn get_content(&self, path: &Path) -> Option<String> {
            *self
                .reads
                .lock()
                .unwrap()
                .entry(path.to_path_buf())
                .or_default() += 1;
            self.files.get(path).cloned()
        }
    }

    #[test]
    fn test_workspace_references_read_each_file_once() {
        let provider = CountingProvider {
            files: files(&[
                ("/w/lib.sh", "source helpers.sh\nutil() { :; }\n"),
                ("/w/helpers.sh", "h=1\n"),
                ("/w/main.sh", "source lib.sh\nutil\n"),
                ("/w/tool.sh", "source lib.sh\nutil\n"),
                ("/w/other.sh", "util\n"),
            ]),
            reads: Default::default(),
        };
        let env = Env::new();
        let resolver = Resolver::new(&env, &provider);
        let lib = parse(&provider.files[Path::new("/w/lib.sh")]);
        let workspace: Vec<PathBuf> = ["helpers", "lib", "main", "other", "tool"]
            .iter()
            .map(|n| PathBuf::from(format!("/w/{n}.sh")))
            .collect();

        let refs = resolver.find_references(
            Path::new("/w/lib.sh"),
            &lib,
            Position::new(2, 1),
            true,
            Some(&workspace),
        );
        assert!(refs.contains_key(Path::new("/w/main.sh")));
        assert!(refs.contains_key(Path::new("/w/tool.sh")));

        let reads = provider.reads.lock().unwrap();
        for (path, count) in reads.iter() {
            assert_eq!(*count, 1, "{} read {} times", path.display(), count);
        }
        assert!(!reads.contains_key(Path::new("/w/lib.sh")));
    }

    #[test]
    fn test_unresolved_name_matches_across_closure() {
        let fs = files(&[("/w/b.sh", "echo $UNSET\n")]);
        let env = Env::new();
        let resolver = Resolver::new(&env, &fs);
        let main = parse("source b.sh\necho $UNSET\n");
        let refs = resolver.find_references(Path::new("/w/a.sh"), &main, Position::new(2, 8), false, None);
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn test_unresolved_name_matches_in_sourcing_workspace_files() {
        let fs = files(&[
            ("/w/main.sh", "source lib.sh
echo $UNSET
"),
            ("/w/other.sh", "echo $UNSET
"),
        ]);
        let env = Env::new();
        let resolver = Resolver::new(&env, &fs);
        let lib = parse("echo $UNSET
");
        let workspace = vec![PathBuf::from("/w/main.sh"), PathBuf::from("/w/other.sh")];
        let refs = resolver.find_references(
            Path::new("/w/lib.sh"),
            &lib,
            Position::new(1, 8),
            false,
            Some(&workspace),
        );
        assert_eq!(refs.len(), 2);
        assert!(refs.contains_key(Path::new("/w/main.sh")));
        assert!(!refs.contains_key(Path::new("/w/other.sh")));
    }
}
