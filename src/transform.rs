//! TransformStream: a paired readable and writable with a backpressure
//! gate between them.
//!
//! The readable and writable ends are plain kernel streams whose native
//! source/sink point back at the transform record. Backpressure is a flag
//! plus a change-signal promise: the signal fulfils whenever the flag
//! flips, and the sink's write algorithm waits on it while the readable
//! side has no demand.

use std::rc::Rc;

use bytes::Bytes;

use crate::engine::{PromiseId, Value};
use crate::error::{GeataError, GeataErrorKind};
use crate::message::BodyOwner;
use crate::native::{NativeSink, NativeSource, StreamOwner};
use crate::runtime::Runtime;
use crate::streams::{StreamId, WritableId, WritableStateKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransformId(pub(crate) usize);

/// A guest transform callback: `(chunk, controller)`. Returning
/// `Ok(Some(promise))` defers completion to that promise; `Ok(None)` is a
/// synchronous success; an error becomes a rejection that errors the
/// stream.
pub type TransformFn =
	Rc<dyn Fn(&mut Runtime, TransformId, Bytes) -> Result<Option<PromiseId>, GeataError>>;

/// A guest flush callback, called once the writable side closes.
pub type FlushFn = Rc<dyn Fn(&mut Runtime, TransformId) -> Result<Option<PromiseId>, GeataError>>;

/// What the guest passed to `new TransformStream(...)`. With no `transform`
/// the stream forwards chunks unchanged.
#[derive(Default, Clone)]
pub struct Transformer {
	pub transform: Option<TransformFn>,
	pub flush: Option<FlushFn>,
}

pub(crate) struct TransformState {
	pub(crate) readable: StreamId,
	pub(crate) writable: WritableId,
	/// Cleared (set to `None`) by `ErrorWritableAndUnblockWrite`.
	transformer: Option<Transformer>,
	pub(crate) backpressure: bool,
	pub(crate) backpressure_change: PromiseId,
	/// The Request or Response whose body this stream's readable end is.
	pub(crate) owner: Option<BodyOwner>,
}

impl Runtime {
	pub fn transform_stream_new(&mut self, transformer: Transformer) -> TransformId {
		let id = TransformId(self.transforms.vacant_key());
		let start = self.promise_resolved(Value::Undefined);
		let readable = self.create_readable(NativeSource::for_transform(id, start), 0);
		let writable = self.create_writable(NativeSink::for_transform(id));
		let signal = self.promise_new();
		self.mark_promise_handled(signal);
		let inserted = self.transforms.insert(TransformState {
			readable,
			writable,
			transformer: Some(transformer),
			backpressure: true,
			backpressure_change: signal,
			owner: None,
		});
		debug_assert_eq!(inserted, id.0);
		id
	}

	pub fn transform_readable(&self, id: TransformId) -> StreamId {
		self.transforms[id.0].readable
	}

	pub fn transform_writable(&self, id: TransformId) -> WritableId {
		self.transforms[id.0].writable
	}

	pub(crate) fn transform_readable_used_as_body(&self, id: TransformId) -> bool {
		self.transforms[id.0].owner.is_some()
	}

	pub(crate) fn transform_owner(&self, id: TransformId) -> Option<BodyOwner> {
		self.transforms[id.0].owner
	}

	/// Record `target` as the owner of the transform whose readable end
	/// `readable` is. Lets the body pull short-cut native body to native
	/// body later.
	pub(crate) fn set_readable_used_as_body(&mut self, readable: StreamId, target: BodyOwner) {
		if let StreamOwner::Transform(ts) = self.streams[readable.0].source.owner {
			self.transforms[ts.0].owner = Some(target);
		}
	}

	pub(crate) fn stream_is_transform_readable(&self, readable: StreamId) -> bool {
		matches!(self.streams[readable.0].source.owner, StreamOwner::Transform(_))
	}

	/// Flip the backpressure flag. The prior change signal resolves before
	/// a fresh unresolved one is installed.
	fn transform_set_backpressure(&mut self, id: TransformId, backpressure: bool) {
		debug_assert_ne!(self.transforms[id.0].backpressure, backpressure);
		let prior = self.transforms[id.0].backpressure_change;
		self.resolve_promise(prior, Value::Undefined);
		let fresh = self.promise_new();
		self.mark_promise_handled(fresh);
		let ts = &mut self.transforms[id.0];
		ts.backpressure_change = fresh;
		ts.backpressure = backpressure;
	}

	/// `TransformStreamDefaultControllerEnqueue`.
	pub fn controller_enqueue(&mut self, id: TransformId, chunk: Bytes) -> Result<(), GeataError> {
		let readable = self.transforms[id.0].readable;
		if !self.readable_can_enqueue(readable) {
			return Err(GeataErrorKind::StreamClosed.into());
		}
		if let Err(err) = self.readable_enqueue(readable, chunk) {
			self.error_writable_and_unblock_write(id, err.clone());
			return Err(err);
		}
		let backpressure = !self.readable_should_call_pull(readable);
		if backpressure != self.transforms[id.0].backpressure {
			debug_assert!(backpressure);
			self.transform_set_backpressure(id, true);
		}
		Ok(())
	}

	/// `TransformStreamDefaultControllerTerminate`.
	pub fn controller_terminate(&mut self, id: TransformId) {
		let readable = self.transforms[id.0].readable;
		if self.readable_can_enqueue(readable) {
			let _ = self.readable_close(readable);
		}
		let err = GeataError::new(
			GeataErrorKind::StreamClosed,
			Some("the stream has been terminated"),
		);
		self.error_writable_and_unblock_write(id, err);
	}

	/// `TransformStreamError`: error both ends.
	pub fn transform_error(&mut self, id: TransformId, err: GeataError) {
		let readable = self.transforms[id.0].readable;
		self.readable_error(readable, err.clone());
		self.error_writable_and_unblock_write(id, err);
	}

	/// `TransformStreamErrorWritableAndUnblockWrite`.
	pub(crate) fn error_writable_and_unblock_write(&mut self, id: TransformId, err: GeataError) {
		self.transforms[id.0].transformer = None;
		let writable = self.transforms[id.0].writable;
		if self.writables[writable.0].state == WritableStateKind::Writable {
			self.writables[writable.0].state = WritableStateKind::Errored(err);
		}
		if self.transforms[id.0].backpressure {
			self.transform_set_backpressure(id, false);
		}
	}

	fn perform_transform(&mut self, id: TransformId, chunk: Bytes) -> PromiseId {
		let transform = self.transforms[id.0]
			.transformer
			.as_ref()
			.and_then(|t| t.transform.clone());
		match transform {
			None => match self.controller_enqueue(id, chunk) {
				Ok(()) => self.promise_resolved(Value::Undefined),
				Err(err) => self.promise_rejected_with(err),
			},
			Some(f) => match f(self, id, chunk) {
				Ok(None) => self.promise_resolved(Value::Undefined),
				Ok(Some(p)) => {
					let result = self.promise_new();
					self.add_promise_reactions(
						p,
						Some(Box::new(move |rt, _| {
							rt.resolve_promise(result, Value::Undefined)
						})),
						Some(Box::new(move |rt, reason| {
							let err = crate::streams::reason_to_error(&reason);
							rt.transform_error(id, err);
							rt.reject_promise(result, reason);
						})),
					);
					result
				}
				Err(err) => {
					self.transform_error(id, err.clone());
					self.promise_rejected_with(err)
				}
			},
		}
	}

	pub(crate) fn transform_sink_write(&mut self, writable: WritableId, chunk: Bytes) -> PromiseId {
		let id = self.writables[writable.0].sink.owner;
		if !self.transforms[id.0].backpressure {
			return self.perform_transform(id, chunk);
		}
		// demand is gone: wait for the gate to open, then re-check the
		// writable, since it may have errored while we waited
		let signal = self.transforms[id.0].backpressure_change;
		let result = self.promise_new();
		self.add_promise_reactions(
			signal,
			Some(Box::new(move |rt, _| {
				match rt.writables[writable.0].state.clone() {
					WritableStateKind::Errored(err) => rt.reject_promise_with(result, err),
					_ => {
						let p = rt.perform_transform(id, chunk);
						rt.add_promise_reactions(
							p,
							Some(Box::new(move |rt, v| rt.resolve_promise(result, v))),
							Some(Box::new(move |rt, r| rt.reject_promise(result, r))),
						);
					}
				}
			})),
			None,
		);
		result
	}

	pub(crate) fn transform_sink_close(&mut self, writable: WritableId) -> PromiseId {
		let id = self.writables[writable.0].sink.owner;
		let flush = self.transforms[id.0]
			.transformer
			.as_ref()
			.and_then(|t| t.flush.clone());
		let flushed = match flush {
			None => self.promise_resolved(Value::Undefined),
			Some(f) => match f(self, id) {
				Ok(None) => self.promise_resolved(Value::Undefined),
				Ok(Some(p)) => p,
				Err(err) => self.promise_rejected_with(err),
			},
		};
		self.transforms[id.0].transformer = None;
		let result = self.promise_new();
		self.add_promise_reactions(
			flushed,
			Some(Box::new(move |rt, _| {
				let readable = rt.transforms[id.0].readable;
				if rt.readable_is_errored(readable) {
					rt.reject_promise_with(result, GeataErrorKind::StreamClosed.into());
					return;
				}
				if rt.readable_can_enqueue(readable) {
					let _ = rt.readable_close(readable);
				}
				rt.resolve_promise(result, Value::Undefined);
			})),
			Some(Box::new(move |rt, reason| {
				let err = crate::streams::reason_to_error(&reason);
				rt.transform_error(id, err);
				rt.reject_promise(result, reason);
			})),
		);
		result
	}

	pub(crate) fn transform_sink_abort(&mut self, writable: WritableId, reason: GeataError) -> PromiseId {
		let id = self.writables[writable.0].sink.owner;
		self.transform_error(id, reason);
		self.promise_resolved(Value::Undefined)
	}

	pub(crate) fn transform_source_pull(&mut self, stream: StreamId) -> PromiseId {
		let id = match self.streams[stream.0].source.owner {
			StreamOwner::Transform(id) => id,
			StreamOwner::Body(_) => unreachable!("transform pull on a body source"),
		};
		debug_assert!(self.transforms[id.0].backpressure);
		self.transform_set_backpressure(id, false);
		self.transforms[id.0].backpressure_change
	}

	pub(crate) fn transform_source_cancel(
		&mut self,
		stream: StreamId,
		reason: GeataError,
	) -> PromiseId {
		let id = match self.streams[stream.0].source.owner {
			StreamOwner::Transform(id) => id,
			StreamOwner::Body(_) => unreachable!("transform cancel on a body source"),
		};
		self.error_writable_and_unblock_write(id, reason);
		self.promise_resolved(Value::Undefined)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::PromiseOutcome;
	use crate::host::memory::MemoryHost;

	fn runtime() -> Runtime {
		Runtime::new(Box::new(MemoryHost::new()))
	}

	#[test]
	fn identity_transform_forwards_chunks_in_order() {
		let mut rt = runtime();
		let ts = rt.transform_stream_new(Transformer::default());
		let writable = rt.transform_writable(ts);
		let readable = rt.transform_readable(ts);
		rt.stream_get_reader(readable).unwrap();

		// a pending read opens the gate before the first write lands
		let first = rt.reader_read(readable);
		rt.drain_microtasks();

		let w1 = rt.writable_write(writable, Bytes::from_static(b"one"));
		rt.drain_microtasks();
		assert_eq!(
			rt.promise_outcome(first),
			PromiseOutcome::Fulfilled(Value::ReadResult(Some(Bytes::from_static(b"one"))))
		);
		assert_eq!(rt.promise_outcome(w1), PromiseOutcome::Fulfilled(Value::Undefined));

		let second = rt.reader_read(readable);
		rt.drain_microtasks();
		let w2 = rt.writable_write(writable, Bytes::from_static(b"two"));
		rt.drain_microtasks();
		assert_eq!(
			rt.promise_outcome(second),
			PromiseOutcome::Fulfilled(Value::ReadResult(Some(Bytes::from_static(b"two"))))
		);
		assert_eq!(rt.promise_outcome(w2), PromiseOutcome::Fulfilled(Value::Undefined));
	}

	#[test]
	fn write_waits_while_backpressure_holds() {
		let mut rt = runtime();
		let ts = rt.transform_stream_new(Transformer::default());
		let writable = rt.transform_writable(ts);
		let readable = rt.transform_readable(ts);

		assert!(rt.transforms[ts.0].backpressure);
		let write = rt.writable_write(writable, Bytes::from_static(b"queued"));
		rt.drain_microtasks();
		assert_eq!(rt.promise_outcome(write), PromiseOutcome::Pending);

		// demand appears: the pull flips backpressure and the write lands
		rt.stream_get_reader(readable).unwrap();
		let read = rt.reader_read(readable);
		rt.drain_microtasks();
		assert_eq!(rt.promise_outcome(write), PromiseOutcome::Fulfilled(Value::Undefined));
		assert_eq!(
			rt.promise_outcome(read),
			PromiseOutcome::Fulfilled(Value::ReadResult(Some(Bytes::from_static(b"queued"))))
		);
	}

	#[test]
	fn backpressure_signal_resolves_before_replacement() {
		let mut rt = runtime();
		let ts = rt.transform_stream_new(Transformer::default());
		let before = rt.transforms[ts.0].backpressure_change;
		rt.transform_set_backpressure(ts, false);
		let after = rt.transforms[ts.0].backpressure_change;
		assert_ne!(before, after);
		rt.drain_microtasks();
		assert_eq!(rt.promise_outcome(before), PromiseOutcome::Fulfilled(Value::Undefined));
		assert_eq!(rt.promise_outcome(after), PromiseOutcome::Pending);
	}

	#[test]
	fn user_transform_runs_with_controller_access() {
		let mut rt = runtime();
		let ts = rt.transform_stream_new(Transformer {
			transform: Some(Rc::new(|rt, id, chunk: Bytes| {
				let doubled: Vec<u8> = chunk.iter().flat_map(|b| [*b, *b]).collect();
				rt.controller_enqueue(id, doubled.into())?;
				Ok(None)
			})),
			flush: None,
		});
		let writable = rt.transform_writable(ts);
		let readable = rt.transform_readable(ts);
		rt.stream_get_reader(readable).unwrap();
		let read = rt.reader_read(readable);
		rt.drain_microtasks();
		rt.writable_write(writable, Bytes::from_static(b"ab"));
		rt.drain_microtasks();
		assert_eq!(
			rt.promise_outcome(read),
			PromiseOutcome::Fulfilled(Value::ReadResult(Some(Bytes::from_static(b"aabb"))))
		);
	}

	#[test]
	fn terminate_closes_readable_and_errors_writable() {
		let mut rt = runtime();
		let ts = rt.transform_stream_new(Transformer::default());
		let writable = rt.transform_writable(ts);
		let readable = rt.transform_readable(ts);

		rt.controller_terminate(ts);
		assert!(rt.readable_is_closed(readable));
		let write = rt.writable_write(writable, Bytes::from_static(b"late"));
		rt.drain_microtasks();
		assert!(matches!(rt.promise_outcome(write), PromiseOutcome::Rejected(_)));
	}

	#[test]
	fn closing_the_writable_runs_flush_then_closes_readable() {
		let mut rt = runtime();
		let flushed = std::rc::Rc::new(std::cell::Cell::new(false));
		let seen = flushed.clone();
		let ts = rt.transform_stream_new(Transformer {
			transform: None,
			flush: Some(Rc::new(move |_, _| {
				seen.set(true);
				Ok(None)
			})),
		});
		let writable = rt.transform_writable(ts);
		let readable = rt.transform_readable(ts);
		let close = rt.writable_close(writable);
		rt.drain_microtasks();
		assert!(flushed.get());
		assert!(rt.readable_is_closed(readable));
		assert_eq!(rt.promise_outcome(close), PromiseOutcome::Fulfilled(Value::Undefined));
	}
}
