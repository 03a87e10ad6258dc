use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::eval::BoxFuture;
use crate::error::EvalResult;
use crate::value::Value;

pub type BuiltinFn = Rc<dyn Fn(Vec<Value>) -> BoxFuture<'static, EvalResult<Value>>>;

/// Top-level bindings of a script, kept in definition order.
///
/// Rebinding a name keeps its original position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Namespace {
    order: Vec<String>,
    values: HashMap<String, Value>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn insert(&mut self, name: String, value: Value) {
        if !self.values.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.values.insert(name, value);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

/// Evaluation scope. The outermost scope's bindings are the namespace.
#[derive(Clone)]
pub struct Env {
    vars: Namespace,
    builtins: HashMap<String, BuiltinFn>,
    parent: Option<Rc<RefCell<Env>>>,
    depth: usize,
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

impl Env {
    pub fn new() -> Self {
        Self::with_namespace(Namespace::new())
    }

    pub fn with_namespace(vars: Namespace) -> Self {
        Self {
            vars,
            builtins: HashMap::new(),
            parent: None,
            depth: 0,
        }
    }

    /// A call scope. It sees a snapshot of this scope; its own assignments stay local.
    pub fn child(&self) -> Self {
        Self {
            vars: Namespace::new(),
            builtins: self.builtins.clone(),
            parent: Some(Rc::new(RefCell::new(self.clone()))),
            depth: self.depth + 1,
        }
    }

    /// Number of call scopes between this one and the global scope.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn get_var(&self, name: &str) -> Option<Value> {
        if let Some(val) = self.vars.get(name).cloned() {
            return Some(val);
        }
        self.parent.as_ref().and_then(|p| p.borrow().get_var(name))
    }

    pub fn set_var(&mut self, name: String, value: Value) {
        self.vars.insert(name, value);
    }

    pub fn get_builtin(&self, name: &str) -> Option<BuiltinFn> {
        self.builtins.get(name).cloned()
    }

    pub fn add_builtin(&mut self, name: &str, f: BuiltinFn) {
        self.builtins.insert(name.to_string(), f);
    }

    pub fn namespace(&self) -> &Namespace {
        &self.vars
    }

    pub fn into_namespace(self) -> Namespace {
        self.vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_keeps_first_definition_order() {
        let mut ns = Namespace::new();
        ns.insert("b".into(), Value::Number(1.0));
        ns.insert("a".into(), Value::Number(2.0));
        ns.insert("b".into(), Value::Number(3.0));
        assert_eq!(ns.names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(ns.get("b"), Some(&Value::Number(3.0)));
        assert_eq!(ns.len(), 2);
    }

    #[test]
    fn child_scope_reads_parent_but_writes_locally() {
        let mut env = Env::new();
        env.set_var("x".into(), Value::Number(1.0));
        let mut local = env.child();
        assert_eq!(local.get_var("x"), Some(Value::Number(1.0)));
        assert_eq!(local.depth(), 1);
        local.set_var("x".into(), Value::Number(2.0));
        assert_eq!(local.get_var("x"), Some(Value::Number(2.0)));
        assert_eq!(env.get_var("x"), Some(Value::Number(1.0)));
    }
}
