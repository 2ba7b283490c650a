use ahashmap::AHashSet;

/// One level of the lexical scope tree built for a top-level statement.
///
/// The statement's root scope holds the names the statement contributes to
/// the module's top level (`var` declarations hoist there from nested
/// blocks). Function scopes mark the boundary between code that runs while
/// the module loads and code that only runs when something is called.
#[derive(Debug, Default, Clone)]
pub struct Scope {
    pub declarations: AHashSet<String>,
    pub is_function: bool,
    pub children: Vec<Scope>,
}

impl Scope {
    /// A scope that `var` declarations hoist to: a function body, or the
    /// module top level itself.
    pub fn function() -> Self {
        Scope {
            is_function: true,
            ..Default::default()
        }
    }

    pub fn block() -> Self {
        Scope::default()
    }

    /// Declares a name in this scope. Returns false if it was already
    /// present (re-declaration is not an error at this layer).
    pub fn declare(&mut self, name: impl Into<String>) -> bool {
        self.declarations.insert(name.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.declarations.contains(name)
    }

    /// Number of scopes in this subtree, the root included.
    pub fn depth_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(Scope::depth_count)
            .sum::<usize>()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn declare_is_idempotent() {
        let mut scope = Scope::function();
        assert!(scope.declare("a"));
        assert!(!scope.declare("a"));
        assert!(scope.contains("a"));
        assert!(!scope.contains("b"));
    }

    #[test]
    fn counts_nested_scopes() {
        let mut root = Scope::function();
        root.children.push(Scope::block());
        let mut inner = Scope::function();
        inner.children.push(Scope::block());
        root.children.push(inner);
        assert_eq!(root.depth_count(), 4);
    }
}
