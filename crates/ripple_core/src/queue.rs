//! Run-to-completion event dispatch
//!
//! A FIFO of pending events plus a two-state machine that drains it:
//!
//! | state   | trigger   | action  | next    |
//! |---------|-----------|---------|---------|
//! | idle    | run_queue | drain   | running |
//! | running | run_queue | absorb  | running |
//! | running | end_run   | release | idle    |
//! | running | exception | recover | idle    |
//!
//! Exactly one caller owns a drain at a time: `dispatch` enqueues and then
//! races a compare-and-swap from `Idle` to `Running`; losers return
//! immediately and the owning drainer picks their events up, re-checking the
//! queue after every batch and again after releasing the phase. Events
//! enqueued while a batch is in flight are therefore processed after that
//! batch completes, never interleaved into it.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::cell::AtomicCell;
use crate::pipeline::{self, Context, Event};
use crate::runtime::Runtime;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
}

/// Outcome of one drain pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Trigger {
    /// Events remain; drain again
    RunQueue,
    /// Queue empty; release the machine
    EndRun,
    /// A handler panicked; recover to idle without repumping
    Exception,
}

/// FIFO of pending events and the state machine that drains it.
pub struct DispatchQueue {
    events: AtomicCell<VecDeque<Event>>,
    phase: AtomicCell<Phase>,
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self {
            events: AtomicCell::new(VecDeque::new()),
            phase: AtomicCell::new(Phase::Idle),
        }
    }

    /// Pending event count.
    pub fn len(&self) -> usize {
        self.events.get().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.get().is_empty()
    }

    /// Enqueue `event` and run the machine to completion on this thread if
    /// no other caller is already draining.
    pub(crate) fn dispatch(&self, rt: &Runtime, event: Event) {
        self.events.swap(|q| {
            let mut q = q.clone();
            q.push_back(event.clone());
            q
        });
        self.pump(rt);
    }

    fn pump(&self, rt: &Runtime) {
        loop {
            if !self.phase.compare_and_set(&Phase::Idle, Phase::Running) {
                // run_queue while running: absorbed, the owner re-checks
                return;
            }

            let outcome = loop {
                match self.drain(rt) {
                    Trigger::RunQueue => continue,
                    done => break done,
                }
            };
            self.phase.set(Phase::Idle);

            if outcome == Trigger::Exception {
                return;
            }
            // events enqueued between the last drain and the release
            if self.events.get().is_empty() {
                return;
            }
        }
    }

    /// Process exactly the events pending at entry. Later enqueues are left
    /// for the next pass, which bounds recursion from handlers that
    /// dispatch. An event is popped only after it was processed, so a panic
    /// leaves it (and everything behind it) in the queue.
    fn drain(&self, rt: &Runtime) -> Trigger {
        let batch = self.events.get().len();
        if batch == 0 {
            return Trigger::EndRun;
        }
        tracing::trace!(batch, "draining event batch");

        for _ in 0..batch {
            let Some(event) = self.events.get().front().cloned() else {
                break;
            };
            let result = catch_unwind(AssertUnwindSafe(|| self.process(rt, event.clone())));
            if result.is_err() {
                tracing::error!(
                    event = %event.handler_id,
                    "handler panicked; queue recovering to idle"
                );
                return Trigger::Exception;
            }
            self.events.swap(|q| {
                let mut q = q.clone();
                q.pop_front();
                q
            });
        }

        if self.events.get().is_empty() {
            Trigger::EndRun
        } else {
            Trigger::RunQueue
        }
    }

    fn process(&self, rt: &Runtime, event: Event) {
        match rt.lookup_event_handler(&event.handler_id) {
            Some(chain) => {
                // pipeline failures are reported to the error hook inside
                // run; the queue treats the event as consumed either way
                let _ = pipeline::run(rt, Context::new(event, &chain));
            }
            None => {
                tracing::debug!(event = %event.handler_id, "no handler registered; ignoring");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Interceptor;
    use crate::value::Value;
    use crate::{path, vmap};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_unregistered_handler_is_a_noop() {
        let rt = Runtime::new(vmap! { "count" => 1 });
        let before = rt.read_state();
        rt.dispatch("no-such-handler", path![], Value::Null);
        assert_eq!(rt.read_state(), before);
        assert!(rt.queue().is_empty());
    }

    #[test]
    fn test_reentrant_dispatch_is_deferred_past_the_batch() {
        let rt = Runtime::new(vmap! {});
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner_log = log.clone();
        rt.register_event_handler(
            "inner",
            vec![Interceptor::new("inner").before(move |_, ctx| {
                inner_log.lock().unwrap().push("inner");
                Ok(ctx)
            })],
        )
        .unwrap();

        let outer_log = log.clone();
        rt.register_event_handler(
            "outer",
            vec![Interceptor::new("outer").before(move |rt: &Runtime, ctx| {
                outer_log.lock().unwrap().push("outer-begin");
                rt.dispatch("inner", path![], Value::Null);
                outer_log.lock().unwrap().push("outer-end");
                Ok(ctx)
            })],
        )
        .unwrap();

        rt.dispatch("outer", path![], Value::Null);
        // the nested event ran after the outer handler finished, not inside it
        assert_eq!(*log.lock().unwrap(), ["outer-begin", "outer-end", "inner"]);
        assert!(rt.queue().is_empty());
    }

    #[test]
    fn test_panicking_handler_leaves_event_queued_and_recovers() {
        let rt = Runtime::new(vmap! {});
        rt.register_event_handler(
            "boom",
            vec![Interceptor::new("boom").before(|_, _ctx| panic!("handler blew up"))],
        )
        .unwrap();
        let count_ran = Arc::new(Mutex::new(0));
        let counter = count_ran.clone();
        rt.register_event_handler(
            "fine",
            vec![Interceptor::new("fine").before(move |_, ctx| {
                *counter.lock().unwrap() += 1;
                Ok(ctx)
            })],
        )
        .unwrap();

        rt.dispatch("boom", path![], Value::Null);
        // the panicking event was never popped
        assert_eq!(rt.queue().len(), 1);

        // the machine recovered to idle, so a later dispatch drains again,
        // but the stuck event still heads the queue and panics first
        rt.dispatch("fine", path![], Value::Null);
        assert_eq!(rt.queue().len(), 2);
        assert_eq!(*count_ran.lock().unwrap(), 0);
    }
}
