//! Machine instances: event dispatch and the transition engine.

use crate::error::CoreError;
use crate::event::Event;
#[cfg(feature = "timer")]
use crate::timer::{TimerBackend, TimerSlot};
use crate::tree::{StateId, StateTree};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Boxed state handler stored in the registry.
///
/// A handler receives the machine, the event, and an optional payload, and
/// returns the residual event: [`Event::NONE`] when it consumed the event,
/// anything else to let the original event propagate to the parent state.
pub type StateHandler<C> =
    Box<dyn Fn(&mut Machine<C>, Event, Option<&dyn Any>) -> Event + Send + Sync>;

/// Hook invoked during a transition, after the exit phase and before the
/// entry phase. Runs at most once per requested transition; deferred
/// transitions run without one.
pub type TransitionHook<C> = dyn FnMut(&mut Machine<C>, Option<&dyn Any>);

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A state in the active chain consumed the event.
    Handled {
        /// The state whose handler consumed it.
        by: StateId,
    },
    /// No state consumed the event; it was dropped.
    Unhandled,
}

/// One running automaton over a shared [`StateTree`].
///
/// A machine owns its user context `C` and tracks a single current state.
/// Many machines may run over the same tree; each keeps independent
/// position, history, and timer state.
pub struct Machine<C> {
    tree: Arc<StateTree<C>>,
    name: String,
    current: StateId,
    initial: StateId,
    deferred: Option<StateId>,
    in_transition: bool,
    depth: usize,
    ctx: C,
    exit_path: Vec<StateId>,
    entry_path: Vec<StateId>,
    #[cfg(feature = "history")]
    history: Option<StateId>,
    #[cfg(feature = "timer")]
    pub(crate) timer: Option<TimerSlot>,
}

impl<C> Machine<C> {
    /// Creates a machine positioned at `initial` and runs the entry actions
    /// for the whole initial chain, root first.
    ///
    /// The initial state's handler sees [`Event::ENTRY`] last, exactly as it
    /// would during a normal transition's entry phase. A transition requested
    /// from inside one of these entry handlers is deferred and performed
    /// before `new` returns.
    pub fn new(
        tree: Arc<StateTree<C>>,
        name: impl Into<String>,
        initial: StateId,
        ctx: C,
    ) -> Result<Self, CoreError> {
        tree.check_id(initial)?;
        let depth = tree.node(initial).depth;
        let buf = tree.max_depth();
        let mut machine = Machine {
            tree,
            name: name.into(),
            current: initial,
            initial,
            deferred: None,
            in_transition: false,
            depth,
            ctx,
            exit_path: Vec::with_capacity(buf),
            entry_path: Vec::with_capacity(buf),
            #[cfg(feature = "history")]
            history: None,
            #[cfg(feature = "timer")]
            timer: None,
        };
        machine.enter_initial();
        Ok(machine)
    }

    /// Creates a machine with a timer backend, then enters the initial chain
    /// like [`Machine::new`]. Entry handlers may already arm the timer.
    #[cfg(feature = "timer")]
    pub fn with_timer(
        tree: Arc<StateTree<C>>,
        name: impl Into<String>,
        initial: StateId,
        ctx: C,
        backend: Box<dyn TimerBackend>,
    ) -> Result<Self, CoreError> {
        tree.check_id(initial)?;
        let depth = tree.node(initial).depth;
        let buf = tree.max_depth();
        let mut machine = Machine {
            tree,
            name: name.into(),
            current: initial,
            initial,
            deferred: None,
            in_transition: false,
            depth,
            ctx,
            exit_path: Vec::with_capacity(buf),
            entry_path: Vec::with_capacity(buf),
            #[cfg(feature = "history")]
            history: None,
            timer: Some(TimerSlot::new(backend)),
        };
        machine.enter_initial();
        Ok(machine)
    }

    /// Dispatches `event` to the current state.
    ///
    /// The event walks the active chain leaf to root: each handler either
    /// consumes it by returning [`Event::NONE`] or lets the original event
    /// move on to the parent. An event no handler consumes falls off the
    /// root and is dropped; that is normal operation, not an error.
    ///
    /// The walk is structural. A handler may transition the machine while
    /// the walk is in progress; the remaining handlers of the old chain
    /// still see the event.
    pub fn dispatch(&mut self, event: Event, data: Option<&dyn Any>) -> DispatchOutcome {
        if event.is_none() {
            return DispatchOutcome::Unhandled;
        }
        let tree = Arc::clone(&self.tree);
        let mut cursor = Some(self.current);
        while let Some(id) = cursor {
            let residual = (tree.node(id).handler)(self, event, data);
            if residual.is_none() {
                tracing::trace!("{}: {:?} handled by {}", self.name, event, tree.node(id).name);
                return DispatchOutcome::Handled { by: id };
            }
            cursor = tree.node(id).parent;
        }
        tracing::trace!("{}: {:?} unhandled, dropped", self.name, event);
        DispatchOutcome::Unhandled
    }

    /// Transitions to `target` with no payload and no hook.
    pub fn transition(&mut self, target: StateId) -> Result<(), CoreError> {
        self.transition_with(target, None, None)
    }

    /// Transitions the machine to `target`.
    ///
    /// Exit actions run child to parent from the current state up to (not
    /// including) the lowest common ancestor of current and target; `hook`
    /// then runs with the old chain fully exited; entry actions run parent
    /// to child down to `target`. A transition to the current state runs no
    /// actions at all. `param` is passed unmodified to every exit and entry
    /// handler of this leg.
    ///
    /// Calling this from inside an entry or exit handler does not recurse:
    /// the request lands in the machine's single deferred slot, overwriting
    /// any earlier deferred target, and is performed without `param` or
    /// `hook` once the in-progress transition completes.
    pub fn transition_with(
        &mut self,
        target: StateId,
        param: Option<&dyn Any>,
        hook: Option<&mut TransitionHook<C>>,
    ) -> Result<(), CoreError> {
        self.tree.check_id(target)?;
        if self.in_transition {
            tracing::debug!(
                "{}: transition to {} deferred (transition in progress)",
                self.name,
                self.tree.node(target).name
            );
            self.deferred = Some(target);
            return Ok(());
        }
        self.run_leg(target, param, hook);
        self.drain_deferred();
        Ok(())
    }

    /// Transitions to the state that was current before the most recent
    /// transition, or to the initial state when nothing has been recorded.
    #[cfg(feature = "history")]
    pub fn transition_to_history(&mut self) -> Result<(), CoreError> {
        let target = self.history.unwrap_or(self.initial);
        self.transition(target)
    }

    /// The state recorded by the most recent transition leg, if any.
    #[cfg(feature = "history")]
    pub fn history(&self) -> Option<StateId> {
        self.history
    }

    /// Currently active state.
    pub fn current(&self) -> StateId {
        self.current
    }

    /// Display name of the currently active state.
    pub fn current_name(&self) -> &str {
        self.tree.node(self.current).name.as_str()
    }

    /// Diagnostic name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// State the machine was initialized at.
    pub fn initial(&self) -> StateId {
        self.initial
    }

    /// Depth of the current state, where roots sit at depth zero.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The shared state tree this machine runs over.
    pub fn tree(&self) -> &Arc<StateTree<C>> {
        &self.tree
    }

    /// True when the machine is in `state` or any of its descendants.
    pub fn is_in(&self, state: StateId) -> bool {
        let mut cursor = Some(self.current);
        while let Some(id) = cursor {
            if id == state {
                return true;
            }
            cursor = self.tree.node(id).parent;
        }
        false
    }

    /// Borrows the user context.
    pub fn ctx(&self) -> &C {
        &self.ctx
    }

    /// Mutably borrows the user context.
    pub fn ctx_mut(&mut self) -> &mut C {
        &mut self.ctx
    }

    /// Consumes the machine, handing the user context back.
    pub fn into_ctx(self) -> C {
        self.ctx
    }

    /// Runs the entry actions for the initial chain, root first, then any
    /// transition an entry handler deferred.
    fn enter_initial(&mut self) {
        let tree = Arc::clone(&self.tree);
        self.entry_path.clear();
        let mut cursor = Some(self.current);
        while let Some(id) = cursor {
            self.entry_path.push(id);
            cursor = tree.node(id).parent;
        }
        self.in_transition = true;
        for i in (0..self.entry_path.len()).rev() {
            let id = self.entry_path[i];
            let _ = (tree.node(id).handler)(self, Event::ENTRY, None);
        }
        self.in_transition = false;
        tracing::debug!("{}: initialized at {}", self.name, tree.node(self.current).name);
        self.drain_deferred();
    }

    /// One transition leg: history, timer release, path collection, exits,
    /// hook, entries, position update. Deferral keeps this non-recursive.
    fn run_leg(
        &mut self,
        target: StateId,
        param: Option<&dyn Any>,
        hook: Option<&mut TransitionHook<C>>,
    ) {
        let tree = Arc::clone(&self.tree);

        #[cfg(feature = "history")]
        {
            self.history = Some(self.current);
        }

        // The timer must be gone before any exit action observes the machine.
        #[cfg(feature = "timer")]
        self.release_timer();

        let lca = tree.lowest_common_ancestor(self.current, target);

        self.exit_path.clear();
        let mut cursor = Some(self.current);
        while let Some(id) = cursor {
            if Some(id) == lca {
                break;
            }
            self.exit_path.push(id);
            cursor = tree.node(id).parent;
        }

        self.entry_path.clear();
        let mut cursor = Some(target);
        while let Some(id) = cursor {
            if Some(id) == lca {
                break;
            }
            self.entry_path.push(id);
            cursor = tree.node(id).parent;
        }

        tracing::debug!(
            "{}: transition {} -> {} ({} exits, {} entries)",
            self.name,
            tree.node(self.current).name,
            tree.node(target).name,
            self.exit_path.len(),
            self.entry_path.len()
        );

        self.in_transition = true;

        for i in 0..self.exit_path.len() {
            let id = self.exit_path[i];
            let _ = (tree.node(id).handler)(self, Event::EXIT, param);
        }

        if let Some(hook) = hook {
            hook(self, param);
        }

        for i in (0..self.entry_path.len()).rev() {
            let id = self.entry_path[i];
            let _ = (tree.node(id).handler)(self, Event::ENTRY, param);
        }

        self.current = target;
        self.depth = tree.node(target).depth;
        self.in_transition = false;
    }

    /// Runs deferred transitions until the slot stays empty. Each deferred
    /// leg may itself defer; the loop keeps the stack flat.
    fn drain_deferred(&mut self) {
        while let Some(next) = self.deferred.take() {
            self.run_leg(next, None, None);
        }
    }
}

impl<C> fmt::Debug for Machine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("name", &self.name)
            .field("current", &self.current_name())
            .field("depth", &self.depth)
            .field("in_transition", &self.in_transition)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::StateTree;

    const GO: Event = Event::user(0);
    const PING: Event = Event::user(2);
    const OTHER: Event = Event::user(7);

    #[derive(Default)]
    struct Ctx {
        log: Vec<String>,
        targets: Vec<StateId>,
    }

    impl Ctx {
        fn take_log(&mut self) -> Vec<String> {
            std::mem::take(&mut self.log)
        }
    }

    fn recorder(name: &'static str) -> impl Fn(&mut Machine<Ctx>, Event, Option<&dyn Any>) -> Event {
        move |machine, event, _| {
            machine.ctx_mut().log.push(format!("{name}:{event:?}"));
            event
        }
    }

    fn consuming(
        name: &'static str,
        what: Event,
    ) -> impl Fn(&mut Machine<Ctx>, Event, Option<&dyn Any>) -> Event {
        move |machine, event, _| {
            machine.ctx_mut().log.push(format!("{name}:{event:?}"));
            if event == what {
                Event::NONE
            } else {
                event
            }
        }
    }

    fn param_recorder(
        name: &'static str,
    ) -> impl Fn(&mut Machine<Ctx>, Event, Option<&dyn Any>) -> Event {
        move |machine, event, data| {
            let param = data.and_then(|d| d.downcast_ref::<u32>()).copied();
            machine.ctx_mut().log.push(format!("{name}:{event:?}:{param:?}"));
            event
        }
    }

    #[test]
    fn init_enters_the_chain_root_first() {
        let mut builder = StateTree::<Ctx>::builder();
        let root = builder.state("root", None, recorder("root")).unwrap();
        let mid = builder.state("mid", Some(root), recorder("mid")).unwrap();
        let leaf = builder.state("leaf", Some(mid), recorder("leaf")).unwrap();
        let tree = builder.build();

        let mut machine = Machine::new(tree, "m", leaf, Ctx::default()).unwrap();
        assert_eq!(
            machine.ctx_mut().take_log(),
            ["root:ENTRY", "mid:ENTRY", "leaf:ENTRY"]
        );
        assert_eq!(machine.current(), leaf);
        assert_eq!(machine.initial(), leaf);
        assert_eq!(machine.depth(), 2);

        let ctx = machine.into_ctx();
        assert!(ctx.log.is_empty());
    }

    #[test]
    fn dispatch_walks_leaf_to_root() {
        let mut builder = StateTree::<Ctx>::builder();
        let root = builder.state("root", None, recorder("root")).unwrap();
        let mid = builder.state("mid", Some(root), recorder("mid")).unwrap();
        let leaf = builder.state("leaf", Some(mid), recorder("leaf")).unwrap();
        let tree = builder.build();

        let mut machine = Machine::new(tree, "m", leaf, Ctx::default()).unwrap();
        machine.ctx_mut().take_log();

        let outcome = machine.dispatch(PING, None);
        assert_eq!(outcome, DispatchOutcome::Unhandled);
        assert_eq!(
            machine.ctx_mut().take_log(),
            ["leaf:USER+2", "mid:USER+2", "root:USER+2"]
        );
    }

    #[test]
    fn dispatch_stops_at_the_consuming_state() {
        let mut builder = StateTree::<Ctx>::builder();
        let root = builder.state("root", None, recorder("root")).unwrap();
        let mid = builder.state("mid", Some(root), consuming("mid", PING)).unwrap();
        let leaf = builder.state("leaf", Some(mid), recorder("leaf")).unwrap();
        let tree = builder.build();

        let mut machine = Machine::new(tree, "m", leaf, Ctx::default()).unwrap();
        machine.ctx_mut().take_log();

        let outcome = machine.dispatch(PING, None);
        assert_eq!(outcome, DispatchOutcome::Handled { by: mid });
        assert_eq!(machine.ctx_mut().take_log(), ["leaf:USER+2", "mid:USER+2"]);
    }

    #[test]
    fn dispatch_forwards_the_original_event_not_the_residual() {
        let mut builder = StateTree::<Ctx>::builder();
        let root = builder.state("root", None, recorder("root")).unwrap();
        let leaf = builder
            .state("leaf", Some(root), move |m: &mut Machine<Ctx>, e, _| {
                m.ctx_mut().log.push(format!("leaf:{e:?}"));
                if e == PING {
                    OTHER
                } else {
                    e
                }
            })
            .unwrap();
        let tree = builder.build();

        let mut machine = Machine::new(tree, "m", leaf, Ctx::default()).unwrap();
        machine.ctx_mut().take_log();

        machine.dispatch(PING, None);
        // The parent must see PING, not the residual the leaf returned.
        assert_eq!(machine.ctx_mut().take_log(), ["leaf:USER+2", "root:USER+2"]);
    }

    #[test]
    fn dispatching_the_null_event_does_nothing() {
        let mut builder = StateTree::<Ctx>::builder();
        let root = builder.state("root", None, recorder("root")).unwrap();
        let tree = builder.build();

        let mut machine = Machine::new(tree, "m", root, Ctx::default()).unwrap();
        machine.ctx_mut().take_log();

        assert_eq!(machine.dispatch(Event::NONE, None), DispatchOutcome::Unhandled);
        assert!(machine.ctx_mut().take_log().is_empty());
    }

    #[test]
    fn transition_exits_then_enters_around_the_lca() {
        let mut builder = StateTree::<Ctx>::builder();
        let root = builder.state("root", None, recorder("root")).unwrap();
        let idle = builder.state("idle", Some(root), recorder("idle")).unwrap();
        let active = builder.state("active", Some(root), recorder("active")).unwrap();
        let tree = builder.build();

        let mut machine = Machine::new(tree, "m", idle, Ctx::default()).unwrap();
        machine.ctx_mut().take_log();

        machine.transition(active).unwrap();
        // The shared root is neither exited nor re-entered.
        assert_eq!(machine.ctx_mut().take_log(), ["idle:EXIT", "active:ENTRY"]);
        assert_eq!(machine.current(), active);
        assert_eq!(machine.depth(), 1);
    }

    #[test]
    fn self_transition_runs_no_actions() {
        let mut builder = StateTree::<Ctx>::builder();
        let root = builder.state("root", None, recorder("root")).unwrap();
        let idle = builder.state("idle", Some(root), recorder("idle")).unwrap();
        let tree = builder.build();

        let mut machine = Machine::new(tree, "m", idle, Ctx::default()).unwrap();
        machine.ctx_mut().take_log();

        machine.transition(idle).unwrap();
        assert!(machine.ctx_mut().take_log().is_empty());
        assert_eq!(machine.current(), idle);
        #[cfg(feature = "history")]
        assert_eq!(machine.history(), Some(idle));
    }

    #[test]
    fn cross_branch_transition_sequences_both_chains() {
        let mut builder = StateTree::<Ctx>::builder();
        let root = builder.state("root", None, recorder("root")).unwrap();
        let a = builder.state("a", Some(root), recorder("a")).unwrap();
        let a1 = builder.state("a1", Some(a), recorder("a1")).unwrap();
        let b = builder.state("b", Some(root), recorder("b")).unwrap();
        let b1 = builder.state("b1", Some(b), recorder("b1")).unwrap();
        let tree = builder.build();

        let mut machine = Machine::new(tree, "m", a1, Ctx::default()).unwrap();
        machine.ctx_mut().take_log();

        machine.transition(b1).unwrap();
        assert_eq!(
            machine.ctx_mut().take_log(),
            ["a1:EXIT", "a:EXIT", "b:ENTRY", "b1:ENTRY"]
        );
        assert_eq!(machine.current(), b1);
        assert_eq!(machine.depth(), 2);
    }

    #[test]
    fn disjoint_roots_exit_and_enter_whole_chains() {
        let mut builder = StateTree::<Ctx>::builder();
        let r1 = builder.state("r1", None, recorder("r1")).unwrap();
        let c1 = builder.state("c1", Some(r1), recorder("c1")).unwrap();
        let r2 = builder.state("r2", None, recorder("r2")).unwrap();
        let c2 = builder.state("c2", Some(r2), recorder("c2")).unwrap();
        let tree = builder.build();

        let mut machine = Machine::new(tree, "m", c1, Ctx::default()).unwrap();
        machine.ctx_mut().take_log();

        machine.transition(c2).unwrap();
        assert_eq!(
            machine.ctx_mut().take_log(),
            ["c1:EXIT", "r1:EXIT", "r2:ENTRY", "c2:ENTRY"]
        );
        assert_eq!(machine.current(), c2);
    }

    #[test]
    fn foreign_handles_are_rejected_without_side_effects() {
        let mut donor = StateTree::<Ctx>::builder();
        for i in 0..5 {
            donor.state(format!("d{i}"), None, recorder("d")).unwrap();
        }
        let foreign = donor.state("d5", None, recorder("d")).unwrap();

        let mut builder = StateTree::<Ctx>::builder();
        let idle = builder.state("idle", None, recorder("idle")).unwrap();
        let tree = builder.build();

        let mut machine = Machine::new(tree, "m", idle, Ctx::default()).unwrap();
        machine.ctx_mut().take_log();

        let err = machine.transition(foreign).unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
        assert_eq!(machine.current(), idle);
        assert!(machine.ctx_mut().take_log().is_empty());
    }

    #[test]
    fn reentrant_requests_defer_and_the_latest_wins() {
        let mut builder = StateTree::<Ctx>::builder();
        let root = builder.state("root", None, recorder("root")).unwrap();
        let idle = builder.state("idle", Some(root), recorder("idle")).unwrap();
        let stage = builder
            .state("stage", Some(root), move |m: &mut Machine<Ctx>, e, _| {
                m.ctx_mut().log.push(format!("stage:{e:?}"));
                if e == Event::ENTRY {
                    let (x, y) = (m.ctx().targets[0], m.ctx().targets[1]);
                    m.transition(x).unwrap();
                    m.transition(y).unwrap();
                }
                e
            })
            .unwrap();
        let x = builder.state("x", Some(root), recorder("x")).unwrap();
        let y = builder.state("y", Some(root), recorder("y")).unwrap();
        let tree = builder.build();

        let ctx = Ctx {
            targets: vec![x, y],
            ..Ctx::default()
        };
        let mut machine = Machine::new(tree, "m", idle, ctx).unwrap();
        machine.ctx_mut().take_log();

        machine.transition(stage).unwrap();
        // x is overwritten in the deferred slot before it ever runs.
        assert_eq!(
            machine.ctx_mut().take_log(),
            ["idle:EXIT", "stage:ENTRY", "stage:EXIT", "y:ENTRY"]
        );
        assert_eq!(machine.current(), y);
        #[cfg(feature = "history")]
        assert_eq!(machine.history(), Some(stage));
    }

    #[test]
    fn deferred_legs_run_without_param_or_hook() {
        let mut builder = StateTree::<Ctx>::builder();
        let root = builder.state("root", None, param_recorder("root")).unwrap();
        let idle = builder.state("idle", Some(root), param_recorder("idle")).unwrap();
        let stage = builder
            .state("stage", Some(root), move |m: &mut Machine<Ctx>, e, data| {
                let param = data.and_then(|d| d.downcast_ref::<u32>()).copied();
                m.ctx_mut().log.push(format!("stage:{e:?}:{param:?}"));
                if e == Event::ENTRY {
                    let x = m.ctx().targets[0];
                    m.transition(x).unwrap();
                }
                e
            })
            .unwrap();
        let x = builder.state("x", Some(root), param_recorder("x")).unwrap();
        let tree = builder.build();

        let ctx = Ctx {
            targets: vec![x],
            ..Ctx::default()
        };
        let mut machine = Machine::new(tree, "m", idle, ctx).unwrap();
        machine.ctx_mut().take_log();

        let mut hook = |m: &mut Machine<Ctx>, _: Option<&dyn Any>| {
            m.ctx_mut().log.push("hook".into());
        };
        machine.transition_with(stage, Some(&7u32), Some(&mut hook)).unwrap();

        assert_eq!(
            machine.ctx_mut().take_log(),
            [
                "idle:EXIT:Some(7)",
                "hook",
                "stage:ENTRY:Some(7)",
                "stage:EXIT:None",
                "x:ENTRY:None",
            ]
        );
        assert_eq!(machine.current(), x);
    }

    #[test]
    fn hook_runs_between_exit_and_entry() {
        let mut builder = StateTree::<Ctx>::builder();
        let root = builder.state("root", None, recorder("root")).unwrap();
        let idle = builder.state("idle", Some(root), recorder("idle")).unwrap();
        let active = builder.state("active", Some(root), recorder("active")).unwrap();
        let tree = builder.build();

        let mut machine = Machine::new(tree, "m", idle, Ctx::default()).unwrap();
        machine.ctx_mut().take_log();

        let mut hook = |m: &mut Machine<Ctx>, _: Option<&dyn Any>| {
            m.ctx_mut().log.push("hook".into());
        };
        machine.transition_with(active, None, Some(&mut hook)).unwrap();
        assert_eq!(
            machine.ctx_mut().take_log(),
            ["idle:EXIT", "hook", "active:ENTRY"]
        );
    }

    #[test]
    fn entry_handler_transition_during_init_is_honored() {
        let mut builder = StateTree::<Ctx>::builder();
        let root = builder.state("root", None, recorder("root")).unwrap();
        let idle = builder
            .state("idle", Some(root), move |m: &mut Machine<Ctx>, e, _| {
                m.ctx_mut().log.push(format!("idle:{e:?}"));
                if e == Event::ENTRY {
                    let target = m.ctx().targets[0];
                    m.transition(target).unwrap();
                }
                e
            })
            .unwrap();
        let active = builder.state("active", Some(root), recorder("active")).unwrap();
        let tree = builder.build();

        let ctx = Ctx {
            targets: vec![active],
            ..Ctx::default()
        };
        let mut machine = Machine::new(tree, "m", idle, ctx).unwrap();
        assert_eq!(
            machine.ctx_mut().take_log(),
            ["root:ENTRY", "idle:ENTRY", "idle:EXIT", "active:ENTRY"]
        );
        assert_eq!(machine.current(), active);
    }

    #[test]
    fn mid_walk_transition_leaves_the_walk_on_the_old_chain() {
        let mut builder = StateTree::<Ctx>::builder();
        let root = builder.state("root", None, recorder("root")).unwrap();
        let leaf = builder
            .state("leaf", Some(root), move |m: &mut Machine<Ctx>, e, _| {
                m.ctx_mut().log.push(format!("leaf:{e:?}"));
                if e == PING {
                    let target = m.ctx().targets[0];
                    m.transition(target).unwrap();
                }
                e
            })
            .unwrap();
        let sibling = builder.state("sibling", Some(root), recorder("sibling")).unwrap();
        let tree = builder.build();

        let ctx = Ctx {
            targets: vec![sibling],
            ..Ctx::default()
        };
        let mut machine = Machine::new(tree, "m", leaf, ctx).unwrap();
        machine.ctx_mut().take_log();

        let outcome = machine.dispatch(PING, None);
        assert_eq!(outcome, DispatchOutcome::Unhandled);
        // The transition runs immediately, but the walk still climbs the
        // chain that was active when dispatch started.
        assert_eq!(
            machine.ctx_mut().take_log(),
            ["leaf:USER+2", "leaf:EXIT", "sibling:ENTRY", "root:USER+2"]
        );
        assert_eq!(machine.current(), sibling);
    }

    #[test]
    fn dispatch_uses_the_new_chain_after_a_transition() {
        let mut builder = StateTree::<Ctx>::builder();
        let root = builder.state("root", None, recorder("root")).unwrap();
        let idle = builder
            .state("idle", Some(root), move |m: &mut Machine<Ctx>, e, _| {
                m.ctx_mut().log.push(format!("idle:{e:?}"));
                if e == GO {
                    let target = m.ctx().targets[0];
                    m.transition(target).unwrap();
                    return Event::NONE;
                }
                e
            })
            .unwrap();
        let active = builder.state("active", Some(root), consuming("active", PING)).unwrap();
        let tree = builder.build();

        let ctx = Ctx {
            targets: vec![active],
            ..Ctx::default()
        };
        let mut machine = Machine::new(tree, "m", idle, ctx).unwrap();
        machine.ctx_mut().take_log();

        assert_eq!(machine.dispatch(GO, None), DispatchOutcome::Handled { by: idle });
        assert_eq!(machine.dispatch(PING, None), DispatchOutcome::Handled { by: active });
    }

    #[test]
    fn is_in_matches_the_active_chain() {
        let mut builder = StateTree::<Ctx>::builder();
        let root = builder.state("root", None, recorder("root")).unwrap();
        let mid = builder.state("mid", Some(root), recorder("mid")).unwrap();
        let leaf = builder.state("leaf", Some(mid), recorder("leaf")).unwrap();
        let sibling = builder.state("sibling", Some(root), recorder("sibling")).unwrap();
        let tree = builder.build();

        let machine = Machine::new(tree, "m", leaf, Ctx::default()).unwrap();
        assert!(machine.is_in(leaf));
        assert!(machine.is_in(mid));
        assert!(machine.is_in(root));
        assert!(!machine.is_in(sibling));
        assert!(machine.tree().contains(root));
    }

    #[cfg(feature = "history")]
    #[test]
    fn history_returns_to_the_previous_state() {
        let mut builder = StateTree::<Ctx>::builder();
        let root = builder.state("root", None, recorder("root")).unwrap();
        let a = builder.state("a", Some(root), recorder("a")).unwrap();
        let b = builder.state("b", Some(root), recorder("b")).unwrap();
        let tree = builder.build();

        let mut machine = Machine::new(tree, "m", a, Ctx::default()).unwrap();
        machine.transition(b).unwrap();
        assert_eq!(machine.history(), Some(a));

        machine.transition_to_history().unwrap();
        assert_eq!(machine.current(), a);
        assert_eq!(machine.history(), Some(b));
    }

    #[cfg(feature = "history")]
    #[test]
    fn history_falls_back_to_the_initial_state() {
        let mut builder = StateTree::<Ctx>::builder();
        let root = builder.state("root", None, recorder("root")).unwrap();
        let idle = builder.state("idle", Some(root), recorder("idle")).unwrap();
        let tree = builder.build();

        let mut machine = Machine::new(tree, "m", idle, Ctx::default()).unwrap();
        machine.ctx_mut().take_log();

        assert_eq!(machine.history(), None);
        machine.transition_to_history().unwrap();
        assert_eq!(machine.current(), idle);
        assert!(machine.ctx_mut().take_log().is_empty());
    }
}
