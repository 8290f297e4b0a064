//! The slice of the scripting engine the glue relies on: promises that
//! settle exactly once and fan out to reaction callbacks, and the FIFO
//! microtask queue those callbacks run on.
//!
//! Reactions take `&mut Runtime`, so everything a reaction can reach goes
//! through the one runtime value; there is no other mutable state.

use std::collections::VecDeque;

use bytes::Bytes;
use slab::Slab;
use tracing::warn;

use crate::error::GeataError;
use crate::message::ResponseId;
use crate::runtime::Runtime;

/// A guest-visible value, as far as the runtime glue needs to distinguish
/// them.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	Undefined,
	Bool(bool),
	String(String),
	Bytes(Bytes),
	Json(serde_json::Value),
	Response(ResponseId),
	/// What a stream read resolves with: a chunk, or `None` for done.
	ReadResult(Option<Bytes>),
	Error(GeataError),
}

impl Value {
	pub(crate) fn error(err: GeataError) -> Self {
		Self::Error(err)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PromiseId(pub(crate) usize);

pub(crate) type Callback = Box<dyn FnOnce(&mut Runtime, Value)>;
pub(crate) type Microtask = Box<dyn FnOnce(&mut Runtime)>;

struct Reaction {
	on_fulfil: Option<Callback>,
	on_reject: Option<Callback>,
}

enum PromiseState {
	Pending(Vec<Reaction>),
	Fulfilled(Value),
	Rejected(Value),
}

struct PromiseRecord {
	state: PromiseState,
	handled: bool,
}

/// Outcome of a promise, for callers that poll instead of react.
#[derive(Debug, Clone, PartialEq)]
pub enum PromiseOutcome {
	Pending,
	Fulfilled(Value),
	Rejected(Value),
}

#[derive(Default)]
pub(crate) struct Engine {
	promises: Slab<PromiseRecord>,
	microtasks: VecDeque<Microtask>,
	unreacted_rejections: Vec<PromiseId>,
}

impl Engine {
	fn insert(&mut self, state: PromiseState) -> PromiseId {
		PromiseId(self.promises.insert(PromiseRecord {
			state,
			handled: false,
		}))
	}
}

impl Runtime {
	pub fn promise_new(&mut self) -> PromiseId {
		self.engine.insert(PromiseState::Pending(Vec::new()))
	}

	pub fn promise_resolved(&mut self, value: Value) -> PromiseId {
		self.engine.insert(PromiseState::Fulfilled(value))
	}

	pub fn promise_rejected(&mut self, reason: Value) -> PromiseId {
		let id = self.engine.insert(PromiseState::Rejected(reason));
		self.engine.unreacted_rejections.push(id);
		id
	}

	pub fn promise_rejected_with(&mut self, err: GeataError) -> PromiseId {
		self.promise_rejected(Value::error(err))
	}

	pub fn promise_outcome(&self, id: PromiseId) -> PromiseOutcome {
		match &self.engine.promises[id.0].state {
			PromiseState::Pending(_) => PromiseOutcome::Pending,
			PromiseState::Fulfilled(v) => PromiseOutcome::Fulfilled(v.clone()),
			PromiseState::Rejected(v) => PromiseOutcome::Rejected(v.clone()),
		}
	}

	/// Settling is one-way: resolving an already-settled promise is a no-op.
	pub fn resolve_promise(&mut self, id: PromiseId, value: Value) {
		let record = &mut self.engine.promises[id.0];
		let reactions = match &mut record.state {
			PromiseState::Pending(reactions) => std::mem::take(reactions),
			_ => return,
		};
		record.state = PromiseState::Fulfilled(value.clone());
		for reaction in reactions {
			if let Some(cb) = reaction.on_fulfil {
				let value = value.clone();
				self.enqueue_microtask(Box::new(move |rt| cb(rt, value)));
			}
		}
	}

	pub fn reject_promise(&mut self, id: PromiseId, reason: Value) {
		let record = &mut self.engine.promises[id.0];
		let reactions = match &mut record.state {
			PromiseState::Pending(reactions) => std::mem::take(reactions),
			_ => return,
		};
		record.state = PromiseState::Rejected(reason.clone());
		let mut reacted = false;
		for reaction in reactions {
			if let Some(cb) = reaction.on_reject {
				reacted = true;
				let reason = reason.clone();
				self.enqueue_microtask(Box::new(move |rt| cb(rt, reason)));
			}
		}
		if !reacted && !record_is_handled(&self.engine.promises, id) {
			self.engine.unreacted_rejections.push(id);
		}
	}

	pub fn reject_promise_with(&mut self, id: PromiseId, err: GeataError) {
		self.reject_promise(id, Value::error(err));
	}

	/// Attach reactions, scheduling immediately if the promise has already
	/// settled. Mirrors the engine's `AddPromiseReactions`.
	pub(crate) fn add_promise_reactions(
		&mut self,
		id: PromiseId,
		on_fulfil: Option<Callback>,
		on_reject: Option<Callback>,
	) {
		if on_reject.is_some() {
			self.mark_promise_handled(id);
		}
		let record = &mut self.engine.promises[id.0];
		match &mut record.state {
			PromiseState::Pending(reactions) => reactions.push(Reaction {
				on_fulfil,
				on_reject,
			}),
			PromiseState::Fulfilled(v) => {
				if let Some(cb) = on_fulfil {
					let value = v.clone();
					self.enqueue_microtask(Box::new(move |rt| cb(rt, value)));
				}
			}
			PromiseState::Rejected(v) => {
				if let Some(cb) = on_reject {
					let reason = v.clone();
					self.enqueue_microtask(Box::new(move |rt| cb(rt, reason)));
				}
			}
		}
	}

	/// Attach a fulfilment reaction, like the guest's `.then`.
	pub fn promise_then(
		&mut self,
		id: PromiseId,
		on_fulfil: impl FnOnce(&mut Runtime, Value) + 'static,
	) {
		self.add_promise_reactions(id, Some(Box::new(on_fulfil)), None);
	}

	/// Attach a rejection reaction, like the guest's `.catch`.
	pub fn promise_catch(
		&mut self,
		id: PromiseId,
		on_reject: impl FnOnce(&mut Runtime, Value) + 'static,
	) {
		self.add_promise_reactions(id, None, Some(Box::new(on_reject)));
	}

	/// Keep a rejection of this promise out of the unhandled report.
	pub fn mark_promise_handled(&mut self, id: PromiseId) {
		self.engine.promises[id.0].handled = true;
		self.engine.unreacted_rejections.retain(|p| *p != id);
	}

	pub(crate) fn enqueue_microtask(&mut self, task: Microtask) {
		self.engine.microtasks.push_back(task);
	}

	/// Run microtasks until the queue is empty. Reactions may enqueue more;
	/// those run in the same drain.
	pub fn drain_microtasks(&mut self) {
		while let Some(task) = self.engine.microtasks.pop_front() {
			task(self);
		}
	}

	/// Report rejections nothing ever reacted to. Called by the pump at the
	/// end of a turn.
	pub(crate) fn report_unhandled_rejections(&mut self) {
		let pending = std::mem::take(&mut self.engine.unreacted_rejections);
		for id in pending {
			let record = &self.engine.promises[id.0];
			if record.handled {
				continue;
			}
			if let PromiseState::Rejected(reason) = &record.state {
				match reason {
					Value::Error(err) => warn!(promise = id.0, %err, "unhandled promise rejection"),
					other => warn!(promise = id.0, ?other, "unhandled promise rejection"),
				}
			}
		}
	}
}

fn record_is_handled(promises: &Slab<PromiseRecord>, id: PromiseId) -> bool {
	promises[id.0].handled
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::memory::MemoryHost;

	fn runtime() -> Runtime {
		Runtime::new(Box::new(MemoryHost::new()))
	}

	#[test]
	fn reactions_run_as_microtasks_in_order() {
		let mut rt = runtime();
		let p = rt.promise_new();
		let order = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));

		for tag in ["first", "second"] {
			let order = order.clone();
			rt.add_promise_reactions(
				p,
				Some(Box::new(move |_, _| order.borrow_mut().push(tag))),
				None,
			);
		}

		rt.resolve_promise(p, Value::Undefined);
		assert!(order.borrow().is_empty(), "reactions must not run synchronously");
		rt.drain_microtasks();
		assert_eq!(*order.borrow(), ["first", "second"]);
	}

	#[test]
	fn settling_is_one_way() {
		let mut rt = runtime();
		let p = rt.promise_new();
		rt.resolve_promise(p, Value::Bool(true));
		rt.reject_promise(p, Value::Undefined);
		rt.resolve_promise(p, Value::Bool(false));
		assert_eq!(rt.promise_outcome(p), PromiseOutcome::Fulfilled(Value::Bool(true)));
	}

	#[test]
	fn late_reactions_still_fire() {
		let mut rt = runtime();
		let p = rt.promise_resolved(Value::String("done".into()));
		let seen = std::rc::Rc::new(std::cell::Cell::new(false));
		let flag = seen.clone();
		rt.add_promise_reactions(
			p,
			Some(Box::new(move |_, value| {
				assert_eq!(value, Value::String("done".into()));
				flag.set(true);
			})),
			None,
		);
		rt.drain_microtasks();
		assert!(seen.get());
	}

	#[test]
	fn rejection_reaches_catch_only() {
		let mut rt = runtime();
		let p = rt.promise_new();
		let outcome = std::rc::Rc::new(std::cell::RefCell::new(String::new()));
		let on_ok = outcome.clone();
		let on_err = outcome.clone();
		rt.add_promise_reactions(
			p,
			Some(Box::new(move |_, _| on_ok.borrow_mut().push_str("fulfil"))),
			Some(Box::new(move |_, _| on_err.borrow_mut().push_str("reject"))),
		);
		rt.reject_promise(p, Value::Undefined);
		rt.drain_microtasks();
		assert_eq!(&*outcome.borrow(), "reject");
	}
}
