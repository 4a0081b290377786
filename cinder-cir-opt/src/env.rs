//! Persistent analysis environments.
//!
//! An environment maps variables to abstract values during a dataflow walk.
//! It is an extend-only association list with a structurally shared tail:
//! `extend` is O(1) and never invalidates the environment it extends, so
//! analysis branches alias a common prefix freely. Lookup is O(depth), which
//! is fine for the short binding chains a method body produces.

use std::rc::Rc;

use cinder_cir::VarId;

#[derive(Debug)]
pub struct Environment<E> {
    head: Option<Rc<Node<E>>>,
}

// Written out by hand: a derive would demand `E: Clone`, but cloning an
// environment only bumps the head refcount and must work for any element.
impl<E> Clone for Environment<E> {
    fn clone(&self) -> Self {
        Environment {
            head: self.head.clone(),
        }
    }
}

#[derive(Debug)]
struct Node<E> {
    var: VarId,
    value: E,
    tail: Option<Rc<Node<E>>>,
}

impl<E> Default for Environment<E> {
    fn default() -> Self {
        Environment { head: None }
    }
}

impl<E> Environment<E> {
    pub fn empty() -> Self {
        Default::default()
    }

    pub fn lookup(&self, var: VarId) -> Option<&E> {
        let mut node = self.head.as_deref();
        while let Some(n) = node {
            if n.var == var {
                return Some(&n.value);
            }
            node = n.tail.as_deref();
        }
        None
    }

    #[must_use]
    pub fn extend(&self, var: VarId, value: E) -> Self {
        Environment {
            head: Some(Rc::new(Node {
                var,
                value,
                tail: self.head.clone(),
            })),
        }
    }

    #[must_use]
    pub fn extend_all(&self, bindings: impl IntoIterator<Item = (VarId, E)>) -> Self {
        let mut env = self.clone();
        for (var, value) in bindings {
            env = env.extend(var, value);
        }
        env
    }
}
