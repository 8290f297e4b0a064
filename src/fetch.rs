//! Outbound fetch and the network IO turn.
//!
//! `fetch` hands a request to the host and parks it on the pending queue
//! with a fresh response promise. The event loop then alternates microtask
//! drains with [`Runtime::process_network_io`], which settles at most one
//! pending request and services at most one deferred body read per turn.

use tracing::warn;

use crate::engine::{PromiseId, Value};
use crate::error::{GeataError, GeataErrorKind};
use crate::host::hostcall;
use crate::message::{BodyOwner, RequestId};
use crate::request::RequestInit;
use crate::runtime::Runtime;

impl Runtime {
	/// `fetch(request)`: dispatch an already-built Request. Returns the
	/// response promise.
	pub fn fetch(&mut self, request: RequestId) -> PromiseId {
		if self.event.is_none() {
			return self.promise_rejected_with(GeataErrorKind::RequestHandlerOnly.into());
		}
		if self.requests[request.0].pending.is_some() {
			return self.promise_rejected_with(GeataError::new(
				GeataErrorKind::Generic,
				Some("request already has an in-flight fetch"),
			));
		}

		let backend = self.requests[request.0]
			.backend
			.clone()
			.or_else(|| self.fastly.default_backend.clone());
		let Some(backend) = backend else {
			let url = self.request_url(request).to_string();
			return self.promise_rejected_with(GeataError::new(
				GeataErrorKind::NoBackend,
				Some(format!(
					"No backend specified for request with url {url}. Must provide a \
					 `backend` property on the `init` object passed to either `new Request()` \
					 or `fetch`"
				)),
			));
		};

		let handle = self.request_handle(request);
		let body = self.requests[request.0].msg.body;
		let pending = match hostcall!(self.io, req_send_async(handle, body, &backend)) {
			Ok(pending) => pending,
			Err(err) => return self.promise_rejected_with(err),
		};

		// the host owns the body now
		self.mark_body_used(BodyOwner::Request(request));

		let promise = self.promise_new();
		let state = &mut self.requests[request.0];
		state.pending = Some(pending);
		state.response_promise = Some(promise);
		self.pending_requests.push(request);
		promise
	}

	/// `fetch(url, init)`.
	pub fn fetch_with(&mut self, url: &str, init: RequestInit) -> PromiseId {
		match self.request_new(url, init) {
			Ok(request) => self.fetch(request),
			Err(err) => self.promise_rejected_with(err),
		}
	}

	/// Wait for one pending request to finish and settle its response
	/// promise.
	pub(crate) fn process_pending_requests(&mut self) -> Result<(), GeataError> {
		if self.pending_requests.is_empty() {
			return Ok(());
		}

		let handles: Vec<_> = self
			.pending_requests
			.iter()
			.map(|request| {
				self.requests[request.0]
					.pending
					.expect("pending queue entry without a pending handle")
			})
			.collect();

		let (index, response_handle, body_handle) =
			hostcall!(self.io, req_pending_select(&handles))?;
		let request = self.pending_requests.remove(index as usize);
		let promise = self.requests[request.0]
			.response_promise
			.take()
			.expect("pending request without a response promise");
		self.requests[request.0].pending = None;

		if !response_handle.is_valid() {
			self.reject_promise_with(promise, GeataErrorKind::Network.into());
			return Ok(());
		}

		let response = self.response_from_upstream(response_handle, body_handle)?;
		let url = self.request_url(request).to_string();
		self.response_set_url(response, url);
		self.resolve_promise(promise, Value::Response(response));
		Ok(())
	}

	/// Service one deferred body read: a single chunk into the stream, or
	/// close on EOF.
	pub(crate) fn process_next_body_read(&mut self) -> Result<(), GeataError> {
		let Some(stream) = self.pending_body_reads.pop_front() else {
			return Ok(());
		};
		let owner = self.streams[stream.0]
			.source
			.body_owner()
			.expect("deferred body read on a non-body source");
		let body = self.message(owner).body;

		let chunk = match body.read_chunk(&mut self.io) {
			Ok(chunk) => chunk,
			Err(err) => {
				self.readable_error(stream, err);
				return Ok(());
			}
		};

		if chunk.is_empty() {
			if let Err(err) = self.readable_close(stream) {
				warn!(%err, "body stream was closed before its read drained");
			}
			return Ok(());
		}

		if let Err(err) = self.readable_enqueue(stream, chunk) {
			warn!(%err, "body stream refused a chunk");
		}
		Ok(())
	}

	/// One IO turn: poll pending requests (at most one completion), then
	/// drain one body read.
	pub fn process_network_io(&mut self) -> Result<(), GeataError> {
		if self.pending_requests.is_empty() && self.pending_body_reads.is_empty() {
			return Ok(());
		}
		self.process_pending_requests()?;
		self.process_next_body_read()
	}

	pub(crate) fn has_pending_io(&self) -> bool {
		!self.pending_requests.is_empty() || !self.pending_body_reads.is_empty()
	}
}
