//! State registry: an arena of states forming one or more parent/child trees.

use crate::error::CoreError;
use crate::event::Event;
use crate::machine::{Machine, StateHandler};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::DEFAULT_MAX_DEPTH;

/// Stable handle to a state in a [`StateTree`].
///
/// Handles are only meaningful for the tree that issued them; machine
/// operations validate them against their own tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateId(pub(crate) usize);

impl StateId {
    /// Arena index of this handle.
    pub const fn index(self) -> usize {
        self.0
    }
}

pub(crate) struct StateNode<C> {
    pub(crate) handler: StateHandler<C>,
    pub(crate) parent: Option<StateId>,
    pub(crate) name: String,
    pub(crate) depth: usize,
}

/// Immutable arena of states, shared by every machine built over it.
///
/// The hierarchy is fixed once [`StateTreeBuilder::build`] runs; machines
/// hold an `Arc` to the tree and never mutate it.
pub struct StateTree<C> {
    states: Vec<StateNode<C>>,
    max_depth: usize,
}

impl<C> StateTree<C> {
    /// Creates a builder with the default depth limit.
    pub fn builder() -> StateTreeBuilder<C> {
        StateTreeBuilder::new()
    }

    /// Number of registered states.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True when no states have been registered.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// True when `id` was issued by this tree.
    pub fn contains(&self, id: StateId) -> bool {
        id.0 < self.states.len()
    }

    /// Configured depth limit.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Display name of `id`, or `None` for a foreign handle.
    pub fn name(&self, id: StateId) -> Option<&str> {
        self.states.get(id.0).map(|node| node.name.as_str())
    }

    /// Parent of `id`. `None` for roots and for foreign handles.
    pub fn parent(&self, id: StateId) -> Option<StateId> {
        self.states.get(id.0).and_then(|node| node.parent)
    }

    /// Depth of `id`, where roots sit at depth zero.
    pub fn depth(&self, id: StateId) -> Option<usize> {
        self.states.get(id.0).map(|node| node.depth)
    }

    /// Lowest common ancestor of `a` and `b`.
    ///
    /// Returns `None` when the two states live in disjoint trees of the
    /// forest (or when either handle is foreign): a transition across that
    /// boundary exits the whole source chain and enters the whole target
    /// chain.
    pub fn lowest_common_ancestor(&self, a: StateId, b: StateId) -> Option<StateId> {
        if !self.contains(a) || !self.contains(b) {
            return None;
        }
        let mut walk_a = Some(a);
        let mut walk_b = Some(b);
        let mut depth_a = self.node(a).depth;
        let mut depth_b = self.node(b).depth;

        // Equalize depths, then climb in lockstep until the walks meet.
        while depth_a > depth_b {
            if let Some(id) = walk_a {
                walk_a = self.node(id).parent;
            }
            depth_a -= 1;
        }
        while depth_b > depth_a {
            if let Some(id) = walk_b {
                walk_b = self.node(id).parent;
            }
            depth_b -= 1;
        }
        while walk_a != walk_b {
            walk_a = walk_a.and_then(|id| self.node(id).parent);
            walk_b = walk_b.and_then(|id| self.node(id).parent);
        }
        walk_a
    }

    pub(crate) fn check_id(&self, id: StateId) -> Result<(), CoreError> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(CoreError::UnknownState { id: id.0 })
        }
    }

    pub(crate) fn node(&self, id: StateId) -> &StateNode<C> {
        &self.states[id.0]
    }
}

impl<C> fmt::Debug for StateTree<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateTree")
            .field("states", &self.states.len())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

/// Builder for a [`StateTree`].
///
/// States are registered parent-before-child; the builder computes and
/// stores each state's depth so machines never re-derive it.
pub struct StateTreeBuilder<C> {
    states: Vec<StateNode<C>>,
    max_depth: usize,
}

impl<C> StateTreeBuilder<C> {
    pub fn new() -> Self {
        Self {
            states: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Overrides the depth limit enforced by [`StateTreeBuilder::state`].
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Registers a state.
    ///
    /// `parent` of `None` makes the state a root; a tree may hold several
    /// roots. Fails when `parent` is not a previously registered state or
    /// when the new state's depth would reach the configured limit.
    pub fn state<H>(
        &mut self,
        name: impl Into<String>,
        parent: Option<StateId>,
        handler: H,
    ) -> Result<StateId, CoreError>
    where
        H: Fn(&mut Machine<C>, Event, Option<&dyn Any>) -> Event + Send + Sync + 'static,
    {
        let depth = match parent {
            Some(p) => {
                let parent_node = self
                    .states
                    .get(p.0)
                    .ok_or(CoreError::UnknownState { id: p.0 })?;
                parent_node.depth + 1
            }
            None => 0,
        };
        if depth >= self.max_depth {
            return Err(CoreError::MaxDepthExceeded {
                depth,
                max: self.max_depth,
            });
        }
        let id = StateId(self.states.len());
        self.states.push(StateNode {
            handler: Box::new(handler),
            parent,
            name: name.into(),
            depth,
        });
        Ok(id)
    }

    /// Freezes the registry.
    pub fn build(self) -> Arc<StateTree<C>> {
        Arc::new(StateTree {
            states: self.states,
            max_depth: self.max_depth,
        })
    }
}

impl<C> Default for StateTreeBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}
