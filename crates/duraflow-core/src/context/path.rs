//! Positional action addressing.
//!
//! Ids are derived from the call position: top-level actions are `"0"`,
//! `"1"`, ...; actions issued inside action `"1"` are `"1.0"`, `"1.1"`, ...
//! Determinism of the workflow body is what makes these ids stable across
//! replays.

#[derive(Debug)]
struct Scope {
    prefix: String,
    next: u32,
}

/// Stack of per-scope counters. The root scope is never popped.
#[derive(Debug)]
pub struct ActionPath {
    scopes: Vec<Scope>,
}

impl Default for ActionPath {
    fn default() -> Self {
        Self {
            scopes: vec![Scope {
                prefix: String::new(),
                next: 0,
            }],
        }
    }
}

impl ActionPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next id in the current scope.
    pub fn next_id(&mut self) -> String {
        let last = self.scopes.len() - 1;
        let scope = &mut self.scopes[last];
        let index = scope.next;
        scope.next += 1;
        if scope.prefix.is_empty() {
            index.to_string()
        } else {
            format!("{}.{index}", scope.prefix)
        }
    }

    /// Open a child scope addressed under `id`.
    pub fn enter(&mut self, id: &str) {
        self.scopes.push(Scope {
            prefix: id.to_string(),
            next: 0,
        });
    }

    /// Close the innermost child scope. No-op at the root.
    pub fn exit(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Nesting depth; 0 at the root.
    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_ids_count_from_zero() {
        let mut path = ActionPath::new();
        assert_eq!(path.next_id(), "0");
        assert_eq!(path.next_id(), "1");
        assert_eq!(path.next_id(), "2");
    }

    #[test]
    fn nested_scopes_prefix_parent_id() {
        let mut path = ActionPath::new();
        let outer = path.next_id();
        assert_eq!(outer, "0");
        path.enter(&outer);
        assert_eq!(path.next_id(), "0.0");
        let inner = path.next_id();
        assert_eq!(inner, "0.1");
        path.enter(&inner);
        assert_eq!(path.next_id(), "0.1.0");
        path.exit();
        assert_eq!(path.next_id(), "0.2");
        path.exit();
        assert_eq!(path.next_id(), "1");
    }

    #[test]
    fn exit_at_root_is_ignored() {
        let mut path = ActionPath::new();
        path.exit();
        assert_eq!(path.depth(), 0);
        assert_eq!(path.next_id(), "0");
    }

    #[test]
    fn reentering_a_scope_restarts_its_counter() {
        let mut path = ActionPath::new();
        let id = path.next_id();
        path.enter(&id);
        assert_eq!(path.next_id(), "0.0");
        path.exit();
        path.enter(&id);
        assert_eq!(path.next_id(), "0.0");
    }
}
