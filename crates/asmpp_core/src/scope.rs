use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

/// One-to-one renaming for a single lexical level.
///
/// Defining `(k, v)` evicts whatever `k` pointed at and whatever pointed at
/// `v`, so a name aliases at most one value and a value has at most one name.
#[derive(Clone, Debug, Default)]
pub struct AliasTable {
    forward: FxHashMap<String, String>,
    reverse: FxHashMap<String, String>,
}

impl AliasTable {
    pub fn define(&mut self, key: &str, value: &str) -> &str {
        if let Some(old_value) = self.forward.remove(key) {
            self.reverse.remove(&old_value);
        }
        if let Some(old_key) = self.reverse.remove(value) {
            self.forward.remove(&old_key);
        }

        self.reverse.insert(value.to_string(), key.to_string());
        self.forward
            .entry(key.to_string())
            .insert_entry(value.to_string())
            .into_mut()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.forward.get(key).map(String::as_str)
    }

    pub fn key_for(&self, value: &str) -> Option<&str> {
        self.reverse.get(value).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// Bare local label name to qualified symbol.
#[derive(Clone, Debug, Default)]
pub struct LabelTable {
    map: IndexMap<String, String>,
}

impl LabelTable {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }

    /// Returns `false` when `name` was already defined at this level.
    pub fn define_if_absent(&mut self, name: &str, qualified: String) -> bool {
        if self.map.contains_key(name) {
            return false;
        }
        self.map.insert(name.to_string(), qualified);
        true
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Scope {
    /// `None` only for the root.
    pub qualified: Option<String>,
    pub parent: Option<ScopeId>,
    pub labels: LabelTable,
    pub aliases: AliasTable,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("alias chain starting at `{start}` does not terminate within {hops} hops")]
pub struct AliasCycle {
    pub start: String,
    pub hops: usize,
}

/// Arena of open scopes ordered by nesting. Reads climb the parent chain,
/// writes touch the current level only.
#[derive(Clone, Debug)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
        }
    }

    /// Number of open blocks; zero at the root.
    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    pub fn current_id(&self) -> ScopeId {
        ScopeId(self.scopes.len() - 1)
    }

    pub fn current(&self) -> &Scope {
        &self.scopes[self.scopes.len() - 1]
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0]
    }

    pub fn push(&mut self, qualified: String) -> ScopeId {
        let parent = self.current_id();
        self.scopes.push(Scope {
            qualified: Some(qualified),
            parent: Some(parent),
            ..Scope::default()
        });
        self.current_id()
    }

    /// Discards the innermost block. The root is never popped.
    pub fn pop(&mut self) -> Option<Scope> {
        if self.depth() == 0 {
            return None;
        }
        self.scopes.pop()
    }

    /// Current scope first, root last.
    pub fn chain(&self) -> impl Iterator<Item = &Scope> {
        std::iter::successors(Some(self.current()), |scope| {
            scope.parent.map(|parent| self.get(parent))
        })
    }

    pub fn lookup_label(&self, name: &str) -> Option<&str> {
        self.chain().find_map(|scope| scope.labels.get(name))
    }

    pub fn lookup_alias(&self, key: &str) -> Option<&str> {
        self.chain().find_map(|scope| scope.aliases.get(key))
    }

    pub fn define_alias(&mut self, key: &str, value: &str) -> &str {
        let id = self.current_id();
        self.get_mut(id).aliases.define(key, value)
    }

    /// Follows aliases from `name` to a name that is not itself an alias.
    ///
    /// A chain can visit every visible entry at most once before it must
    /// terminate, which bounds the walk.
    pub fn chase_alias<'a>(&'a self, name: &'a str) -> Result<&'a str, AliasCycle> {
        let hops = self.chain().map(|scope| scope.aliases.len()).sum::<usize>() + 1;
        let mut current = name;
        for _ in 0..hops {
            match self.lookup_alias(current) {
                Some(next) => current = next,
                None => return Ok(current),
            }
        }

        Err(AliasCycle {
            start: name.to_string(),
            hops,
        })
    }
}
