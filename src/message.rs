//! Common body and metadata model shared by Request and Response.
//!
//! Both kinds carry the same slots: the host handle, a body handle with a
//! one-way used flag, a lazily created body stream, lazily created Headers,
//! and a URL string. Operations that don't care which kind they're on take
//! a [`BodyOwner`].

use bytes::Bytes;

use crate::engine::{PromiseId, Value};
use crate::error::{GeataError, GeataErrorKind};
use crate::headers::HeadersId;
use crate::host::{BodyHandle, HttpHandle};
use crate::native::NativeSource;
use crate::runtime::Runtime;
use crate::streams::StreamId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseId(pub(crate) usize);

/// A Request or a Response, for the operations shared between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyOwner {
	Request(RequestId),
	Response(ResponseId),
}

impl From<RequestId> for BodyOwner {
	fn from(id: RequestId) -> Self {
		Self::Request(id)
	}
}

impl From<ResponseId> for BodyOwner {
	fn from(id: ResponseId) -> Self {
		Self::Response(id)
	}
}

/// What a body can be set from.
pub enum BodyInit {
	Stream(StreamId),
	Bytes(Bytes),
	Text(String),
}

pub(crate) struct HttpMessage {
	pub(crate) http: HttpHandle,
	pub(crate) body: BodyHandle,
	pub(crate) has_body: bool,
	pub(crate) body_used: bool,
	pub(crate) body_stream: Option<StreamId>,
	pub(crate) headers: Option<HeadersId>,
	pub(crate) url: String,
}

impl HttpMessage {
	pub(crate) fn new(http: HttpHandle, body: BodyHandle) -> Self {
		Self {
			http,
			body,
			has_body: false,
			body_used: false,
			body_stream: None,
			headers: None,
			url: String::new(),
		}
	}
}

impl Runtime {
	pub(crate) fn message(&self, owner: BodyOwner) -> &HttpMessage {
		match owner {
			BodyOwner::Request(id) => &self.requests[id.0].msg,
			BodyOwner::Response(id) => &self.responses[id.0].msg,
		}
	}

	pub(crate) fn message_mut(&mut self, owner: BodyOwner) -> &mut HttpMessage {
		match owner {
			BodyOwner::Request(id) => &mut self.requests[id.0].msg,
			BodyOwner::Response(id) => &mut self.responses[id.0].msg,
		}
	}

	pub fn body_used(&self, owner: BodyOwner) -> bool {
		self.message(owner).body_used
	}

	pub fn has_body(&self, owner: BodyOwner) -> bool {
		self.message(owner).has_body
	}

	pub fn url_of(&self, owner: BodyOwner) -> &str {
		&self.message(owner).url
	}

	/// Flip the one-way used flag and lock the body stream, if one exists.
	pub(crate) fn mark_body_used(&mut self, owner: BodyOwner) {
		self.message_mut(owner).body_used = true;
		if let Some(stream) = self.message(owner).body_stream {
			if !self.readable_locked(stream) {
				let locked = self.stream_get_reader(stream);
				debug_assert!(locked.is_ok());
			}
		}
	}

	/// Move the underlying body handle from one message to another, marking
	/// the source as consumed.
	pub(crate) fn move_body_handle(&mut self, from: BodyOwner, to: BodyOwner) {
		let body = self.message(from).body;
		self.message_mut(to).body = body;
		self.mark_body_used(from);
	}

	/// Host-side splice of `src`'s body onto the end of `dest`'s.
	pub(crate) fn append_body(&mut self, dest: BodyOwner, src: BodyOwner) -> Result<(), GeataError> {
		let dest_body = self.message(dest).body;
		let src_body = self.message(src).body;
		dest_body.append(&mut self.io, src_body)
	}

	pub(crate) fn set_body(
		&mut self,
		owner: BodyOwner,
		body: Option<BodyInit>,
	) -> Result<(), GeataError> {
		let Some(body) = body else {
			self.message_mut(owner).has_body = false;
			return Ok(());
		};
		match body {
			BodyInit::Stream(stream) => {
				self.message_mut(owner).body_stream = Some(stream);
				if self.stream_is_transform_readable(stream) {
					self.set_readable_used_as_body(stream, owner);
				}
			}
			BodyInit::Bytes(bytes) => {
				let handle = self.message(owner).body;
				handle.write_all(&mut self.io, &bytes)?;
			}
			BodyInit::Text(text) => {
				let handle = self.message(owner).body;
				handle.write_all(&mut self.io, text.as_bytes())?;
			}
		}
		self.message_mut(owner).has_body = true;
		Ok(())
	}

	/// The `body` getter: the message's ReadableStream, created on first
	/// access. `None` when there is no body at all.
	pub fn body_stream(&mut self, owner: BodyOwner) -> Option<StreamId> {
		if !self.message(owner).has_body {
			return None;
		}
		if let Some(stream) = self.message(owner).body_stream {
			return Some(stream);
		}
		Some(self.create_body_stream(owner))
	}

	/// A readable wrapping this message's body handle, at a high-water mark
	/// of zero so nothing is read until someone asks.
	pub(crate) fn create_body_stream(&mut self, owner: BodyOwner) -> StreamId {
		let start = self.promise_resolved(Value::Undefined);
		let stream = self.create_readable(NativeSource::for_body(owner, start), 0);
		self.message_mut(owner).body_stream = Some(stream);
		stream
	}

	fn body_all(&mut self, owner: BodyOwner) -> Result<Vec<u8>, GeataError> {
		if self.body_used(owner) {
			return Err(GeataErrorKind::BodyUsed.into());
		}
		let handle = self.message(owner).body;
		let bytes = handle.read_all(&mut self.io, true)?;
		self.mark_body_used(owner);
		Ok(bytes)
	}

	/// `arrayBuffer()`: the whole body as bytes.
	pub fn body_bytes(&mut self, owner: BodyOwner) -> PromiseId {
		match self.body_all(owner) {
			Ok(bytes) => self.promise_resolved(Value::Bytes(bytes.into())),
			Err(err) => self.promise_rejected_with(err),
		}
	}

	/// `text()`: the whole body as UTF-8.
	pub fn body_text(&mut self, owner: BodyOwner) -> PromiseId {
		match self.body_all(owner) {
			Ok(bytes) => match String::from_utf8(bytes) {
				Ok(text) => self.promise_resolved(Value::String(text)),
				Err(err) => self.promise_rejected_with(GeataError::new(
					GeataErrorKind::Utf8Parse,
					Some(err.to_string()),
				)),
			},
			Err(err) => self.promise_rejected_with(err),
		}
	}

	/// `json()`: the whole body parsed as JSON.
	pub fn body_json(&mut self, owner: BodyOwner) -> PromiseId {
		match self.body_all(owner) {
			Ok(bytes) => match serde_json::from_slice(&bytes) {
				Ok(value) => self.promise_resolved(Value::Json(value)),
				Err(err) => self.promise_rejected_with(GeataError::new(
					GeataErrorKind::JsonParse,
					Some(err.to_string()),
				)),
			},
			Err(err) => self.promise_rejected_with(err),
		}
	}

	/// Pull algorithm for body-backed streams.
	///
	/// If this stream is piped into a TransformStream whose readable end is
	/// itself some message's body, the whole source body is appended onto
	/// that destination host-side and the stream closes without any bytes
	/// crossing the guest boundary. `pipe_to` holds the destination writable
	/// locked for the duration of the pipe, so at most one source is active
	/// at a time.
	pub(crate) fn body_source_pull(&mut self, stream: StreamId) -> PromiseId {
		let source = &self.streams[stream.0].source;
		let owner = source
			.body_owner()
			.expect("body pull on a non-body source");
		if let Some(ts) = source.piped_to_transform_stream {
			if self.transform_readable_used_as_body(ts) {
				let dest = self
					.transform_owner(ts)
					.expect("transform readable used as body without an owner");
				if let Err(err) = self.append_body(dest, owner) {
					return self.promise_rejected_with(err);
				}
				let closed = self.readable_close(stream);
				debug_assert!(closed.is_ok());
				return self.promise_resolved(Value::Undefined);
			}
		}

		// The actual read has to wait for the IO turn: reading here could
		// block before all pending promises have run, which reorders
		// observable effects and can deadlock when a body read depends on
		// content making another request.
		if !self.pending_body_reads.contains(&stream) {
			self.pending_body_reads.push_back(stream);
		}
		self.promise_resolved(Value::Undefined)
	}

	pub(crate) fn body_source_cancel(
		&mut self,
		_stream: StreamId,
		_reason: GeataError,
	) -> PromiseId {
		// the host keeps draining the handle
		self.promise_resolved(Value::Undefined)
	}
}
