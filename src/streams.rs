//! A reduced readable/writable stream kernel.
//!
//! Streams carry `Bytes` chunks. Readables follow the standard's pull
//! discipline (`shouldCallPull`, pulling/pull-again), with body streams at
//! a high-water mark of zero so a pull only ever happens on demand.
//! "Cannot close or enqueue" is a result variant here, not an exception.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::engine::{PromiseId, PromiseOutcome, Value};
use crate::error::{GeataError, GeataErrorKind};
use crate::native::{NativeSink, NativeSource};
use crate::runtime::Runtime;
use crate::transform::TransformId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WritableId(pub(crate) usize);

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StreamState {
	Readable,
	Closed,
	Errored(GeataError),
}

pub(crate) struct ReadableState {
	pub(crate) state: StreamState,
	queue: VecDeque<Bytes>,
	hwm: usize,
	pub(crate) source: NativeSource,
	reader: Option<ReaderState>,
	close_requested: bool,
	pub(crate) disturbed: bool,
	pulling: bool,
	pull_again: bool,
}

struct ReaderState {
	read_requests: VecDeque<PromiseId>,
	closed: PromiseId,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WritableStateKind {
	Writable,
	Closed,
	Errored(GeataError),
}

pub(crate) struct WritableState {
	pub(crate) state: WritableStateKind,
	pub(crate) sink: NativeSink,
	pub(crate) locked: bool,
}

impl Runtime {
	pub(crate) fn create_readable(&mut self, source: NativeSource, hwm: usize) -> StreamId {
		StreamId(self.streams.insert(ReadableState {
			state: StreamState::Readable,
			queue: VecDeque::new(),
			hwm,
			source,
			reader: None,
			close_requested: false,
			disturbed: false,
			pulling: false,
			pull_again: false,
		}))
	}

	pub(crate) fn create_writable(&mut self, sink: NativeSink) -> WritableId {
		WritableId(self.writables.insert(WritableState {
			state: WritableStateKind::Writable,
			sink,
			locked: false,
		}))
	}

	pub fn readable_locked(&self, id: StreamId) -> bool {
		self.streams[id.0].reader.is_some()
	}

	pub fn readable_disturbed(&self, id: StreamId) -> bool {
		self.streams[id.0].disturbed
	}

	pub(crate) fn readable_is_closed(&self, id: StreamId) -> bool {
		self.streams[id.0].state == StreamState::Closed
	}

	pub(crate) fn readable_is_errored(&self, id: StreamId) -> bool {
		matches!(self.streams[id.0].state, StreamState::Errored(_))
	}

	/// Acquire the default reader, locking the stream.
	pub fn stream_get_reader(&mut self, id: StreamId) -> Result<(), GeataError> {
		if self.readable_locked(id) {
			return Err(GeataErrorKind::StreamLocked.into());
		}
		let closed = self.promise_new();
		self.mark_promise_handled(closed);
		let stream = &mut self.streams[id.0];
		stream.reader = Some(ReaderState {
			read_requests: VecDeque::new(),
			closed,
		});
		match stream.state.clone() {
			StreamState::Closed => self.resolve_promise(closed, Value::Undefined),
			StreamState::Errored(err) => self.reject_promise_with(closed, err),
			StreamState::Readable => {}
		}
		Ok(())
	}

	/// Drop the reader lock. Outstanding reads must have settled.
	pub fn release_reader(&mut self, id: StreamId) {
		self.streams[id.0].reader = None;
	}

	/// Read one chunk through the acquired reader. Resolves with
	/// `Value::ReadResult`: a chunk, or `None` once the stream is done.
	pub fn reader_read(&mut self, id: StreamId) -> PromiseId {
		let stream = &mut self.streams[id.0];
		debug_assert!(stream.reader.is_some(), "read without an acquired reader");
		stream.disturbed = true;

		if let Some(chunk) = stream.queue.pop_front() {
			let drained = stream.queue.is_empty();
			let close_requested = stream.close_requested;
			let p = self.promise_resolved(Value::ReadResult(Some(chunk)));
			if close_requested && drained {
				self.finalize_close(id);
			} else {
				self.pull_if_needed(id);
			}
			return p;
		}

		match stream.state.clone() {
			StreamState::Closed => self.promise_resolved(Value::ReadResult(None)),
			StreamState::Errored(err) => self.promise_rejected_with(err),
			StreamState::Readable => {
				let p = self.promise_new();
				self.streams[id.0]
					.reader
					.as_mut()
					.expect("reader checked above")
					.read_requests
					.push_back(p);
				self.pull_if_needed(id);
				p
			}
		}
	}

	/// Whether enqueue/close are still allowed.
	pub(crate) fn readable_can_enqueue(&self, id: StreamId) -> bool {
		let stream = &self.streams[id.0];
		stream.state == StreamState::Readable && !stream.close_requested
	}

	/// Hand a chunk to the stream: directly to a waiting read request if
	/// there is one, onto the queue otherwise.
	pub(crate) fn readable_enqueue(&mut self, id: StreamId, chunk: Bytes) -> Result<(), GeataError> {
		if !self.readable_can_enqueue(id) {
			return Err(GeataErrorKind::StreamClosed.into());
		}
		let stream = &mut self.streams[id.0];
		let waiting = stream
			.reader
			.as_mut()
			.and_then(|reader| reader.read_requests.pop_front());
		match waiting {
			Some(read) => self.resolve_promise(read, Value::ReadResult(Some(chunk))),
			None => stream.queue.push_back(chunk),
		}
		self.pull_if_needed(id);
		Ok(())
	}

	pub(crate) fn readable_should_call_pull(&self, id: StreamId) -> bool {
		let stream = &self.streams[id.0];
		if stream.state != StreamState::Readable || stream.close_requested {
			return false;
		}
		// the start promise settles before any pull
		if !matches!(
			self.promise_outcome(stream.source.start_promise),
			PromiseOutcome::Fulfilled(_)
		) {
			return false;
		}
		if let Some(reader) = &stream.reader {
			if !reader.read_requests.is_empty() {
				return true;
			}
		}
		stream.hwm as isize - stream.queue.len() as isize > 0
	}

	pub(crate) fn pull_if_needed(&mut self, id: StreamId) {
		if !self.readable_should_call_pull(id) {
			return;
		}
		{
			let stream = &mut self.streams[id.0];
			if stream.pulling {
				stream.pull_again = true;
				return;
			}
			stream.pulling = true;
		}
		let pull = self.run_source_pull(id);
		self.add_promise_reactions(
			pull,
			Some(Box::new(move |rt, _| {
				let again = {
					let stream = &mut rt.streams[id.0];
					stream.pulling = false;
					std::mem::take(&mut stream.pull_again)
				};
				if again {
					rt.pull_if_needed(id);
				}
			})),
			Some(Box::new(move |rt, reason| {
				rt.streams[id.0].pulling = false;
				let err = match reason {
					Value::Error(err) => err,
					other => GeataError::new(
						GeataErrorKind::Generic,
						Some(format!("pull failed: {other:?}")),
					),
				};
				rt.readable_error(id, err);
			})),
		);
	}

	/// Request close; the stream finishes once the queue drains.
	pub(crate) fn readable_close(&mut self, id: StreamId) -> Result<(), GeataError> {
		if !self.readable_can_enqueue(id) {
			return Err(GeataErrorKind::StreamClosed.into());
		}
		let drained = {
			let stream = &mut self.streams[id.0];
			stream.close_requested = true;
			stream.queue.is_empty()
		};
		if drained {
			self.finalize_close(id);
		}
		Ok(())
	}

	fn finalize_close(&mut self, id: StreamId) {
		let (reads, closed) = {
			let stream = &mut self.streams[id.0];
			if stream.state != StreamState::Readable {
				return;
			}
			stream.state = StreamState::Closed;
			match stream.reader.as_mut() {
				Some(reader) => (
					std::mem::take(&mut reader.read_requests),
					Some(reader.closed),
				),
				None => (VecDeque::new(), None),
			}
		};
		for read in reads {
			self.resolve_promise(read, Value::ReadResult(None));
		}
		if let Some(closed) = closed {
			self.resolve_promise(closed, Value::Undefined);
		}
	}

	pub(crate) fn readable_error(&mut self, id: StreamId, err: GeataError) {
		let (reads, closed) = {
			let stream = &mut self.streams[id.0];
			if stream.state != StreamState::Readable {
				return;
			}
			stream.state = StreamState::Errored(err.clone());
			stream.queue.clear();
			match stream.reader.as_mut() {
				Some(reader) => (
					std::mem::take(&mut reader.read_requests),
					Some(reader.closed),
				),
				None => (VecDeque::new(), None),
			}
		};
		for read in reads {
			self.reject_promise_with(read, err.clone());
		}
		if let Some(closed) = closed {
			self.reject_promise_with(closed, err);
		}
	}

	/// Cancel the stream: close it out, then run the source's cancel
	/// algorithm. The returned promise settles once cancellation is done.
	pub fn readable_cancel(&mut self, id: StreamId, reason: GeataError) -> PromiseId {
		let state = {
			let stream = &mut self.streams[id.0];
			stream.disturbed = true;
			stream.state.clone()
		};
		match state {
			StreamState::Closed => self.promise_resolved(Value::Undefined),
			StreamState::Errored(err) => self.promise_rejected_with(err),
			StreamState::Readable => {
				self.streams[id.0].queue.clear();
				self.streams[id.0].close_requested = true;
				self.finalize_close(id);
				self.run_source_cancel(id, reason)
			}
		}
	}

	pub fn writable_locked(&self, id: WritableId) -> bool {
		self.writables[id.0].locked
	}

	pub(crate) fn writable_write(&mut self, id: WritableId, chunk: Bytes) -> PromiseId {
		match self.writables[id.0].state.clone() {
			WritableStateKind::Errored(err) => self.promise_rejected_with(err),
			WritableStateKind::Closed => {
				self.promise_rejected_with(GeataErrorKind::StreamClosed.into())
			}
			WritableStateKind::Writable => self.run_sink_write(id, chunk),
		}
	}

	pub(crate) fn writable_close(&mut self, id: WritableId) -> PromiseId {
		match self.writables[id.0].state.clone() {
			WritableStateKind::Errored(err) => self.promise_rejected_with(err),
			WritableStateKind::Closed => {
				self.promise_rejected_with(GeataErrorKind::StreamClosed.into())
			}
			WritableStateKind::Writable => {
				self.writables[id.0].state = WritableStateKind::Closed;
				self.run_sink_close(id)
			}
		}
	}

	pub(crate) fn writable_abort(&mut self, id: WritableId, reason: GeataError) -> PromiseId {
		self.run_sink_abort(id, reason)
	}

	/// `pipeTo`: move every chunk of `src` into `dest`.
	///
	/// When `src` is a native body stream and `dest` is the writable end of
	/// a TransformStream, the source is tagged with the destination so the
	/// body pull can take the zero-copy path. Both ends stay locked for the
	/// duration of the pipe.
	pub fn pipe_to(&mut self, src: StreamId, dest: WritableId) -> Result<PromiseId, GeataError> {
		if self.readable_locked(src) {
			return Err(GeataErrorKind::StreamLocked.into());
		}
		if self.writable_locked(dest) {
			return Err(GeataErrorKind::StreamLocked.into());
		}

		if self.streams[src.0].source.is_http_body() {
			let ts = self.writables[dest.0].sink.owner;
			self.streams[src.0].source.piped_to_transform_stream = Some(ts);
		}

		self.stream_get_reader(src)?;
		self.writables[dest.0].locked = true;
		let done = self.promise_new();
		// the loop runs in promise jobs, never synchronously: the caller's
		// turn finishes (and can e.g. hand the transform's readable to a
		// Response) before the first read
		self.enqueue_microtask(Box::new(move |rt| rt.pipe_step(src, dest, done)));
		Ok(done)
	}

	fn pipe_step(&mut self, src: StreamId, dest: WritableId, done: PromiseId) {
		let read = self.reader_read(src);
		self.add_promise_reactions(
			read,
			Some(Box::new(move |rt, value| match value {
				Value::ReadResult(Some(chunk)) => {
					let write = rt.writable_write(dest, chunk);
					rt.add_promise_reactions(
						write,
						Some(Box::new(move |rt, _| rt.pipe_step(src, dest, done))),
						Some(Box::new(move |rt, reason| {
							rt.finish_pipe(src, dest, done, Err(reason));
						})),
					);
				}
				Value::ReadResult(None) => {
					let close = rt.writable_close(dest);
					rt.add_promise_reactions(
						close,
						Some(Box::new(move |rt, _| {
							rt.finish_pipe(src, dest, done, Ok(()));
						})),
						Some(Box::new(move |rt, reason| {
							rt.finish_pipe(src, dest, done, Err(reason));
						})),
					);
				}
				other => {
					let err = GeataError::new(
						GeataErrorKind::Generic,
						Some(format!("unexpected read result: {other:?}")),
					);
					rt.finish_pipe(src, dest, done, Err(Value::error(err)));
				}
			})),
			Some(Box::new(move |rt, reason| {
				// source errored: take the error to the destination too
				let err = reason_to_error(&reason);
				let abort = rt.writable_abort(dest, err);
				rt.mark_promise_handled(abort);
				rt.finish_pipe(src, dest, done, Err(reason));
			})),
		);
	}

	fn finish_pipe(
		&mut self,
		src: StreamId,
		dest: WritableId,
		done: PromiseId,
		outcome: Result<(), Value>,
	) {
		self.release_reader(src);
		self.writables[dest.0].locked = false;
		match outcome {
			Ok(()) => self.resolve_promise(done, Value::Undefined),
			Err(reason) => self.reject_promise(done, reason),
		}
	}

	/// `pipeThrough`: pipe into the transform's writable end, hand back its
	/// readable end. The pipe promise is marked handled.
	pub fn pipe_through(
		&mut self,
		src: StreamId,
		transform: TransformId,
	) -> Result<StreamId, GeataError> {
		let readable = self.transform_readable(transform);
		let writable = self.transform_writable(transform);
		if self.readable_locked(src) {
			return Err(GeataError::new(
				GeataErrorKind::StreamLocked,
				Some("pipeThrough called on a ReadableStream that's already locked"),
			));
		}
		if self.writable_locked(writable) {
			return Err(GeataError::new(
				GeataErrorKind::StreamLocked,
				Some("the writable end of the transform passed to pipeThrough is already locked"),
			));
		}
		let done = self.pipe_to(src, writable)?;
		self.mark_promise_handled(done);
		Ok(readable)
	}
}

pub(crate) fn reason_to_error(reason: &Value) -> GeataError {
	match reason {
		Value::Error(err) => err.clone(),
		other => GeataError::new(GeataErrorKind::Generic, Some(format!("{other:?}"))),
	}
}
