// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::rc::Rc;
use alloc::vec::Vec;

use crate::DEFAULT_BUDGET;
use crate::error::{Error, Span, WithSpan};
use crate::exec::step::{self, Action};
use crate::exec::{AdminInstr, Thread, init};
use crate::module::Module;
use crate::values::Val;
use crate::vm::{ExternVal, FuncInstance, FuncRef, ModuleInstance};

/// Identifies a thread within a [`Config`]: its position in the thread
/// list at spawn time. Threads are never removed, so ids stay stable.
pub type ThreadId = usize;

/// Embedder-supplied execution parameters.
#[derive(Clone, Copy, Debug)]
pub struct Flags {
    /// Initial per-thread call budget. Each nested call frame consumes
    /// one unit; a call with no budget left fails with exhaustion.
    pub budget: u32,
}

/// The observable state of a thread.
#[derive(Clone, Debug)]
pub enum Status {
    /// The thread still has instructions to reduce.
    Running,
    /// The thread finished; these are the values it left behind, in
    /// program order.
    Result(Vec<Val>),
    /// The thread trapped.
    Trap(Error),
}

/// An ordered collection of cooperatively scheduled guest threads.
///
/// The configuration is a purely logical concurrency arena: one thread
/// advances by one reduction per [`Config::step`] call, and the embedder
/// picks the schedule. No host threads or locks are involved.
#[derive(Debug)]
pub struct Config {
    pub(crate) threads: Vec<Thread>,
    pub(crate) flags: Flags,
}

// === impl Flags ===

impl Default for Flags {
    fn default() -> Self {
        Self {
            budget: DEFAULT_BUDGET,
        }
    }
}

// === impl Config ===

impl Config {
    pub fn new(flags: Flags) -> Self {
        Self {
            threads: Vec::new(),
            flags,
        }
    }

    /// Appends a fresh, empty thread and returns its id.
    pub fn spawn(&mut self) -> ThreadId {
        let id = self.threads.len();
        self.threads.push(Thread::new(self.flags.budget));
        tracing::trace!(id, "spawned thread");
        id
    }

    /// The number of threads ever spawned.
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    /// The observable state of thread `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a spawned thread.
    pub fn status(&self, id: ThreadId) -> Status {
        let thread = &self.threads[id];
        match thread.code.instrs.front() {
            None => Status::Result(thread.code.stack.clone()),
            Some(head) => match &head.it {
                AdminInstr::Trapping(kind) => Status::Trap(Error::trap(head.span, *kind)),
                _ => Status::Running,
            },
        }
    }

    /// Is thread `id` runnable, i.e. running and not blocked at a wait
    /// site? Stepping a non-runnable thread is an embedder bug.
    pub fn runnable(&self, id: ThreadId) -> bool {
        matches!(self.status(id), Status::Running) && !step::is_suspended(&self.threads[id].code)
    }

    /// Empties a thread's code; its status becomes an empty `Result`.
    pub fn clear(&mut self, id: ThreadId) {
        let thread = &mut self.threads[id];
        thread.code.stack.clear();
        thread.code.instrs.clear();
    }

    /// Schedules a call to `func` on top of thread `id`'s code. The
    /// arguments are type-checked against the function's signature; the
    /// embedder then drives the call with [`Config::step`] or
    /// [`Config::eval`].
    pub fn invoke(&mut self, id: ThreadId, func: &FuncRef, args: &[Val]) -> crate::Result<()> {
        let ty = func.ty();
        let span = match &**func {
            FuncInstance::Ast { func, .. } => func.span,
            FuncInstance::Host { .. } => Span::default(),
        };
        if args.len() != ty.params.len() {
            return Err(Error::crash(span, "wrong number of arguments").into());
        }
        for (arg, param) in args.iter().zip(ty.params.iter()) {
            if arg.ty() != *param {
                return Err(Error::crash(span, "wrong types of arguments").into());
            }
        }
        let thread = &mut self.threads[id];
        thread.code.stack.extend(args.iter().cloned());
        thread
            .code
            .instrs
            .push_front(AdminInstr::Invoke(func.clone()).at(span));
        tracing::trace!(id, ty = %ty, "scheduled call");
        Ok(())
    }

    /// Advances thread `id` by one reduction. A `notify` reduction walks
    /// all *other* threads in order, wakes up to `count` waiters
    /// suspended on the same memory and address, and plugs the woken
    /// count back into the notifying thread.
    pub fn step(&mut self, id: ThreadId) -> crate::Result<()> {
        if !self.runnable(id) {
            return Err(Error::crash(Span::default(), "cannot step thread").into());
        }
        let action = step::step_thread(&mut self.threads[id])?;
        if let Action::Notify { mem, addr, count } = action {
            let mut woken = 0u32;
            for (other_id, other) in self.threads.iter_mut().enumerate() {
                if woken == count {
                    break;
                }
                if other_id == id {
                    continue;
                }
                if step::try_unsuspend(&mut other.code, &mem, addr) {
                    tracing::trace!(notifier = id, woken = other_id, addr, "thread woken");
                    woken += 1;
                }
            }
            step::plug_result(&mut self.threads[id].code, Val::I32(woken as i32));
        }
        Ok(())
    }

    /// Reduces thread `id` to a fixed point: its results on completion,
    /// an error carrying the original trap message and source position on
    /// a trap. Deadlocks (the thread suspends with nothing left to wake
    /// it) surface as crashes; drive wait/notify schedules with
    /// [`Config::step`] instead.
    pub fn eval(&mut self, id: ThreadId) -> crate::Result<Vec<Val>> {
        loop {
            match self.status(id) {
                Status::Result(vs) => return Ok(vs),
                Status::Trap(e) => return Err(e.into()),
                Status::Running => self.step(id)?,
            }
        }
    }

    /// Instantiates `module` with the given externals, splicing the
    /// bootstrap code (element and data initialization, then the start
    /// function) ahead of thread `id`'s code.
    pub fn init(
        &mut self,
        id: ThreadId,
        module: &Module,
        externals: &[ExternVal],
    ) -> crate::Result<Rc<ModuleInstance>> {
        init::instantiate(self, id, module, externals)
    }
}
