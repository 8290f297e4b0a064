//! Native underlying sources and sinks for engine streams.
//!
//! A source backs a readable whose bytes come from the runtime itself:
//! either an HTTP body handle or the readable end of a TransformStream. A
//! sink always belongs to a TransformStream. Algorithms are dispatched by
//! compact tag through the owning record, not stored as function pointers.

use bytes::Bytes;

use crate::engine::PromiseId;
use crate::error::GeataError;
use crate::message::BodyOwner;
use crate::runtime::Runtime;
use crate::streams::{StreamId, WritableId};
use crate::transform::TransformId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamOwner {
	Body(BodyOwner),
	Transform(TransformId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SourceAlgorithm {
	HttpBody,
	Transform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SinkAlgorithm {
	Transform,
}

pub(crate) struct NativeSource {
	pub(crate) owner: StreamOwner,
	/// Shared with the sink when both ends belong to one TransformStream.
	pub(crate) start_promise: PromiseId,
	pub(crate) pull: SourceAlgorithm,
	pub(crate) cancel: SourceAlgorithm,
	/// Set by `pipe_to` when this source's stream is currently piped into
	/// that TransformStream's writable end.
	pub(crate) piped_to_transform_stream: Option<TransformId>,
}

impl NativeSource {
	pub(crate) fn for_body(owner: BodyOwner, start_promise: PromiseId) -> Self {
		Self {
			owner: StreamOwner::Body(owner),
			start_promise,
			pull: SourceAlgorithm::HttpBody,
			cancel: SourceAlgorithm::HttpBody,
			piped_to_transform_stream: None,
		}
	}

	pub(crate) fn for_transform(owner: TransformId, start_promise: PromiseId) -> Self {
		Self {
			owner: StreamOwner::Transform(owner),
			start_promise,
			pull: SourceAlgorithm::Transform,
			cancel: SourceAlgorithm::Transform,
			piped_to_transform_stream: None,
		}
	}

	pub(crate) fn is_http_body(&self) -> bool {
		matches!(self.owner, StreamOwner::Body(_))
	}

	pub(crate) fn body_owner(&self) -> Option<BodyOwner> {
		match self.owner {
			StreamOwner::Body(owner) => Some(owner),
			StreamOwner::Transform(_) => None,
		}
	}
}

pub(crate) struct NativeSink {
	pub(crate) owner: TransformId,
	pub(crate) write: SinkAlgorithm,
	pub(crate) close: SinkAlgorithm,
	pub(crate) abort: SinkAlgorithm,
}

impl NativeSink {
	pub(crate) fn for_transform(owner: TransformId) -> Self {
		Self {
			owner,
			write: SinkAlgorithm::Transform,
			close: SinkAlgorithm::Transform,
			abort: SinkAlgorithm::Transform,
		}
	}
}

impl Runtime {
	pub(crate) fn run_source_pull(&mut self, stream: StreamId) -> PromiseId {
		match self.streams[stream.0].source.pull {
			SourceAlgorithm::HttpBody => self.body_source_pull(stream),
			SourceAlgorithm::Transform => self.transform_source_pull(stream),
		}
	}

	pub(crate) fn run_source_cancel(&mut self, stream: StreamId, reason: GeataError) -> PromiseId {
		match self.streams[stream.0].source.cancel {
			SourceAlgorithm::HttpBody => self.body_source_cancel(stream, reason),
			SourceAlgorithm::Transform => self.transform_source_cancel(stream, reason),
		}
	}

	pub(crate) fn run_sink_write(&mut self, writable: WritableId, chunk: Bytes) -> PromiseId {
		match self.writables[writable.0].sink.write {
			SinkAlgorithm::Transform => self.transform_sink_write(writable, chunk),
		}
	}

	pub(crate) fn run_sink_close(&mut self, writable: WritableId) -> PromiseId {
		match self.writables[writable.0].sink.close {
			SinkAlgorithm::Transform => self.transform_sink_close(writable),
		}
	}

	pub(crate) fn run_sink_abort(&mut self, writable: WritableId, reason: GeataError) -> PromiseId {
		match self.writables[writable.0].sink.abort {
			SinkAlgorithm::Transform => self.transform_sink_abort(writable, reason),
		}
	}
}
