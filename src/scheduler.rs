//! Phase-based system dispatch (§4.6).
//!
//! Registered systems declare membership in any subset of three persistent
//! hooks — `Start`, `Process`, `End` — and run once per corresponding call
//! for as long as they stay registered. `PreProcess`, `PostProcess`, and
//! `SingleFrame` are not persistent hooks: they are the three dynamic,
//! one-shot closure queues named by the glossary's "single-frame system"
//! entry and by `enqueue_single_frame`/`enqueue_pre_process`/
//! `enqueue_post_process`, each drained FIFO at the point named in §4.6.
//!
//! Notificables are a third, simpler kind of subscription: a plain callback
//! invoked once at the start of every `start()` and once at the end of
//! every `end()`, independent of the hook-bearing systems list. §9 calls
//! out that a deferred restart's `End` followed by `Start` duplicates
//! notificable invocations — that's intended, not a bug to guard against.

use std::any::{Any, TypeId};
use std::collections::VecDeque;

use tracing::debug;

use crate::error::RegistryError;
use crate::registry::Registry;
use crate::view::{Cursor, ViewDescriptor};

type Notificable = Box<dyn FnMut(&mut Registry) + 'static>;

/// Opaque handle returned by `subscribe_*_notificable`, needed to
/// unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificableId(u64);

/// The three persistent lifecycle hooks a registered [`System`] can belong
/// to (any subset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Start,
    Process,
    End,
}

/// A user-supplied behavior bound to a [`ViewDescriptor`]. `each` is called
/// once per matching live entity, every time one of this system's
/// registered hooks runs.
pub trait System: 'static {
    fn descriptor(&self) -> ViewDescriptor;
    fn hooks(&self) -> &[Hook];
    fn each(&mut self, cursor: &mut Cursor);

    /// Lets `get_system` downcast the boxed trait object back to its
    /// concrete type. Implementors provide `{ self }`.
    fn as_any(&self) -> &dyn Any;
}

struct NoopSystem;

impl System for NoopSystem {
    fn descriptor(&self) -> ViewDescriptor {
        ViewDescriptor::new()
    }

    fn hooks(&self) -> &[Hook] {
        &[]
    }

    fn each(&mut self, _cursor: &mut Cursor) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

type OneShot = Box<dyn FnOnce(&mut Registry) + 'static>;

struct Entry {
    type_id: TypeId,
    system: Box<dyn System>,
}

/// What a deferred `restart()` call (made while a phase was mid-flight)
/// should do once that phase finishes naturally.
#[derive(Clone, Copy, PartialEq, Eq)]
enum PendingRestart {
    None,
    /// `restart` was called while `Start` or `Process` was running.
    EndThenStart,
    /// `restart` was called while `End` was already running — no need to
    /// end again, just start back up.
    StartOnly,
}

/// Phase dispatcher: Start / PreProcess / Process / PostProcess /
/// SingleFrame / End. Holds no back-reference to the [`Registry`] it
/// dispatches against — it receives `&mut Registry` as a parameter on every
/// call, avoiding the ownership cycle the design notes call out.
#[derive(Default)]
pub struct Scheduler {
    systems: Vec<Entry>,
    pre_process_queue: VecDeque<OneShot>,
    post_process_queue: VecDeque<OneShot>,
    single_frame_queue: VecDeque<OneShot>,
    start_notificables: Vec<(NotificableId, Notificable)>,
    end_notificables: Vec<(NotificableId, Notificable)>,
    next_notificable_id: u64,
    started: bool,
    starting: bool,
    processing: bool,
    ending: bool,
    pending_restart: PendingRestart,
}

impl Default for PendingRestart {
    fn default() -> Self {
        PendingRestart::None
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn starting(&self) -> bool {
        self.starting
    }

    pub fn processing(&self) -> bool {
        self.processing
    }

    pub fn ending(&self) -> bool {
        self.ending
    }

    pub fn add_system<S: System>(&mut self, system: S) {
        self.systems.push(Entry { type_id: TypeId::of::<S>(), system: Box::new(system) });
    }

    /// Removes every registered system of type `S`. A plain `retain` over
    /// the single systems list — the source's bug was sharing one removal
    /// counter across what were logically several per-hook lists; here
    /// there's one list and one predicate, so the bug has no foothold.
    pub fn remove_system<S: System>(&mut self) {
        self.systems.retain(|entry| entry.type_id != TypeId::of::<S>());
    }

    pub fn has_system<S: System>(&self) -> bool {
        self.systems.iter().any(|e| e.type_id == TypeId::of::<S>())
    }

    pub fn get_system<S: System>(&self) -> Option<&S> {
        self.systems
            .iter()
            .find(|e| e.type_id == TypeId::of::<S>())
            .and_then(|e| e.system.as_any().downcast_ref::<S>())
    }

    /// Subscribe a callback invoked once at the start of every `start()`,
    /// before any `Start`-hook system runs. Returns a handle for
    /// `unsubscribe_start_notificable`.
    pub fn subscribe_start_notificable(&mut self, f: impl FnMut(&mut Registry) + 'static) -> NotificableId {
        let id = self.alloc_notificable_id();
        self.start_notificables.push((id, Box::new(f)));
        id
    }

    pub fn unsubscribe_start_notificable(&mut self, id: NotificableId) {
        self.start_notificables.retain(|(existing, _)| *existing != id);
    }

    /// Subscribe a callback invoked once at the end of every `end()`, after
    /// every `End`-hook system has run. Returns a handle for
    /// `unsubscribe_end_notificable`.
    pub fn subscribe_end_notificable(&mut self, f: impl FnMut(&mut Registry) + 'static) -> NotificableId {
        let id = self.alloc_notificable_id();
        self.end_notificables.push((id, Box::new(f)));
        id
    }

    pub fn unsubscribe_end_notificable(&mut self, id: NotificableId) {
        self.end_notificables.retain(|(existing, _)| *existing != id);
    }

    fn alloc_notificable_id(&mut self) -> NotificableId {
        let id = NotificableId(self.next_notificable_id);
        self.next_notificable_id += 1;
        id
    }

    fn notify_start(&mut self, registry: &mut Registry) {
        for (_, f) in self.start_notificables.iter_mut() {
            f(registry);
        }
    }

    fn notify_end(&mut self, registry: &mut Registry) {
        for (_, f) in self.end_notificables.iter_mut() {
            f(registry);
        }
    }

    pub fn enqueue_single_frame(&mut self, f: impl FnOnce(&mut Registry) + 'static) {
        self.single_frame_queue.push_back(Box::new(f));
    }

    pub fn enqueue_pre_process(&mut self, f: impl FnOnce(&mut Registry) + 'static) {
        self.pre_process_queue.push_back(Box::new(f));
    }

    pub fn enqueue_post_process(&mut self, f: impl FnOnce(&mut Registry) + 'static) {
        self.post_process_queue.push_back(Box::new(f));
    }

    fn drain_single_frame(&mut self, registry: &mut Registry) {
        while let Some(f) = self.single_frame_queue.pop_front() {
            f(registry);
        }
    }

    fn drain_pre_process(&mut self, registry: &mut Registry) {
        while let Some(f) = self.pre_process_queue.pop_front() {
            f(registry);
        }
    }

    fn drain_post_process(&mut self, registry: &mut Registry) {
        while let Some(f) = self.post_process_queue.pop_front() {
            f(registry);
        }
    }

    /// Run every system carrying `hook`, in registration order, draining
    /// the single-frame queue after each one. Iterates by index against the
    /// list's length captured up front, so a system enqueuing a new system
    /// mid-phase doesn't splice it into the phase already running.
    ///
    /// The single-frame queue is guaranteed to drain at least once per call
    /// even when no system in this phase carries `hook` — a phase with zero
    /// hook-bearing systems still has a drain point.
    fn run_hook(&mut self, registry: &mut Registry, hook: Hook) -> Result<(), RegistryError> {
        let count = self.systems.len();
        let mut any_matched = false;
        for i in 0..count {
            if !self.systems[i].system.hooks().contains(&hook) {
                continue;
            }
            any_matched = true;
            let descriptor = self.systems[i].system.descriptor();
            let view = descriptor.build(registry)?;
            // Swap the system out so its `each` closure can hold an
            // exclusive borrow of it while `view.each` separately holds the
            // exclusive borrow of `registry` it needs for mutation.
            let mut system = std::mem::replace(&mut self.systems[i].system, Box::new(NoopSystem));
            view.each(registry, |cursor| system.each(cursor));
            self.systems[i].system = system;
            self.drain_single_frame(registry);
        }
        if !any_matched {
            self.drain_single_frame(registry);
        }
        Ok(())
    }

    pub fn start(&mut self, registry: &mut Registry) -> Result<(), RegistryError> {
        if self.started {
            return Ok(());
        }
        debug!("scheduler: start");
        self.starting = true;
        self.notify_start(registry);
        let result = self.run_hook(registry, Hook::Start);
        self.starting = false;
        result?;
        self.started = true;
        self.finish_phase(registry)
    }

    pub fn process(&mut self, registry: &mut Registry) -> Result<(), RegistryError> {
        if !self.started {
            return Ok(());
        }
        self.processing = true;
        self.drain_pre_process(registry);
        let result = self.run_hook(registry, Hook::Process);
        if result.is_ok() {
            self.drain_post_process(registry);
        }
        self.processing = false;
        result?;
        self.finish_phase(registry)
    }

    pub fn end(&mut self, registry: &mut Registry) -> Result<(), RegistryError> {
        if !self.started {
            return Ok(());
        }
        debug!("scheduler: end");
        self.ending = true;
        let result = self.run_hook(registry, Hook::End);
        if result.is_ok() {
            self.notify_end(registry);
        }
        self.ending = false;
        self.started = false;
        result?;
        self.finish_phase(registry)
    }

    /// If a phase is currently mid-flight, defer: remember whether the
    /// natural exit needs a full End+Start or just a Start (the latter only
    /// when the request arrived during `End` itself), and let that phase's
    /// own completion apply it via `finish_phase`. Otherwise run End then
    /// Start immediately.
    pub fn restart(&mut self, registry: &mut Registry) -> Result<(), RegistryError> {
        if !self.started {
            return Ok(());
        }
        if self.ending {
            self.pending_restart = PendingRestart::StartOnly;
            Ok(())
        } else if self.starting || self.processing {
            self.pending_restart = PendingRestart::EndThenStart;
            Ok(())
        } else {
            self.end(registry)?;
            self.start(registry)
        }
    }

    fn finish_phase(&mut self, registry: &mut Registry) -> Result<(), RegistryError> {
        match std::mem::replace(&mut self.pending_restart, PendingRestart::None) {
            PendingRestart::None => Ok(()),
            PendingRestart::StartOnly => self.start(registry),
            PendingRestart::EndThenStart => {
                self.end(registry)?;
                self.start(registry)
            }
        }
    }
}
