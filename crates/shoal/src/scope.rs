//
// scope.rs
//
// In-file scope resolution and reference equivalence
//

use crate::position::{Cursor, Position};
use crate::script::{self, Script};
use crate::symbols::{self, Definition, FunctionRef, Occurrence, Use};

/// Definitions, uses and function scopes of one file, computed in a single
/// walk. Rebuilt from scratch whenever the text changes.
#[derive(Debug, Clone)]
pub struct FileScope {
    functions: Vec<FunctionRef>,
    occurrences: Vec<Occurrence>,
    definitions: Vec<Definition>,
}

impl FileScope {
    pub fn new(script: &Script) -> Self {
        let occurrences = symbols::occurrences(script);
        let definitions = symbols::definitions_from(&occurrences);
        Self {
            functions: script.functions(),
            occurrences,
            definitions,
        }
    }

    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    pub fn uses(&self, include_declarations: bool) -> Vec<Use> {
        symbols::uses_from(&self.occurrences, include_declarations)
    }

    pub fn functions(&self) -> &[FunctionRef] {
        &self.functions
    }

    pub fn enclosing_function(&self, position: Position) -> Option<FunctionRef> {
        script::enclosing_function(&self.functions, position)
    }

    /// The closest scoped definition of `name` owned by `function` that starts
    /// at or before `position`.
    pub fn local_definition(
        &self,
        name: &str,
        function: &FunctionRef,
        position: Position,
    ) -> Option<&Definition> {
        self.definitions
            .iter()
            .filter(|d| {
                d.is_scoped
                    && d.name == name
                    && d.owner.as_ref() == Some(function)
                    && d.span.start <= position
            })
            .max_by_key(|d| d.span.start)
    }

    /// The first unscoped definition of `name` in source order. Function
    /// declarations are part of this pool.
    pub fn first_global(&self, name: &str) -> Option<&Definition> {
        self.definitions
            .iter()
            .find(|d| !d.is_scoped && d.name == name)
    }

    /// Which definition of `name` is visible at `position`: the closest
    /// preceding local in the enclosing function, else the first global.
    pub fn resolve_name(&self, name: &str, position: Position) -> Option<&Definition> {
        if let Some(function) = self.enclosing_function(position) {
            if let Some(local) = self.local_definition(name, &function, position) {
                return Some(local);
            }
        }
        self.first_global(name)
    }

    /// Every use that resolves to `definition` when resolution is simulated
    /// from the use's own position. A definition always matches its own site.
    pub fn find_references(&self, definition: &Definition, include_declarations: bool) -> Vec<Use> {
        self.uses(include_declarations)
            .into_iter()
            .filter(|u| u.name == definition.name)
            .filter(|u| {
                u.span.start == definition.span.start
                    || self
                        .resolve_name(&u.name, u.span.start)
                        .is_some_and(|d| d.is_same(definition))
            })
            .collect()
    }

    /// Uses named `name`, with no resolution. Used when nothing resolves.
    pub fn uses_named(&self, name: &str, include_declarations: bool) -> Vec<Use> {
        self.uses(include_declarations)
            .into_iter()
            .filter(|u| u.name == name)
            .collect()
    }
}

/// Resolve the identifier under `cursor` within this file only.
pub fn resolve_definition(script: &Script, scope: &FileScope, cursor: Cursor) -> Option<Definition> {
    let (name, _) = script.identifier_at(cursor)?;
    scope.resolve_name(&name, cursor).cloned()
}

/// In-file references for the identifier under `cursor`. Falls back to plain
/// name matching when the identifier does not resolve.
pub fn find_references_at(
    script: &Script,
    scope: &FileScope,
    cursor: Cursor,
    include_declarations: bool,
) -> Vec<Use> {
    let Some((name, _)) = script.identifier_at(cursor) else {
        return Vec::new();
    };

    match scope.resolve_name(&name, cursor) {
        Some(definition) => scope.find_references(definition, include_declarations),
        None => scope.uses_named(&name, include_declarations),
    }
}
