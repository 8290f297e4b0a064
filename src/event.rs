//! The fetch event: one per invocation, with a monotone response state.
//!
//! `respondWith` may only run synchronously during dispatch, and only once.
//! The response promise's reactions drive the downstream send: a plain
//! response goes out in one call, a response with a live body stream goes
//! out with `streaming = true` and a chunk reader drains the stream into
//! the downstream body.

use std::net::IpAddr;

use tracing::warn;

use crate::engine::{PromiseId, Value};
use crate::error::{GeataError, GeataErrorKind};
use crate::host::hostcall;
use crate::message::{BodyOwner, RequestId, ResponseId};
use crate::runtime::Runtime;
use crate::streams::StreamId;

/// Response progress. Transitions never go backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FetchState {
	Unhandled,
	WaitToRespond,
	ResponseStreaming,
	ResponseDone,
	RespondedWithError,
}

#[derive(Default)]
struct ClientInfo {
	address: Option<Option<IpAddr>>,
	geo: Option<serde_json::Value>,
}

pub(crate) struct FetchEventState {
	pub(crate) request: RequestId,
	client: ClientInfo,
	pub(crate) dispatching: bool,
	pub(crate) state: FetchState,
	pub(crate) pending_promise_count: u32,
}

impl FetchEventState {
	pub(crate) fn new(request: RequestId) -> Self {
		Self {
			request,
			client: ClientInfo::default(),
			dispatching: false,
			state: FetchState::Unhandled,
			pending_promise_count: 0,
		}
	}
}

impl Runtime {
	fn event(&self) -> Result<&FetchEventState, GeataError> {
		self.event.as_ref().ok_or_else(|| GeataErrorKind::RequestHandlerOnly.into())
	}

	fn event_mut(&mut self) -> Result<&mut FetchEventState, GeataError> {
		self.event.as_mut().ok_or_else(|| GeataErrorKind::RequestHandlerOnly.into())
	}

	/// The downstream request this event was dispatched for.
	pub fn event_request(&self) -> Result<RequestId, GeataError> {
		Ok(self.event()?.request)
	}

	pub fn event_state(&self) -> Result<FetchState, GeataError> {
		Ok(self.event()?.state)
	}

	pub(crate) fn set_event_state(&mut self, state: FetchState) {
		let event = self.event.as_mut().expect("no fetch event");
		debug_assert!(event.state <= state, "fetch event state must not regress");
		event.state = state;
	}

	pub fn event_is_active(&self) -> bool {
		match &self.event {
			None => false,
			Some(event) => {
				event.dispatching
					|| event.state == FetchState::ResponseStreaming
					|| event.pending_promise_count > 0
			}
		}
	}

	/// The downstream client address, cached after the first host call.
	pub fn event_client_address(&mut self) -> Result<Option<IpAddr>, GeataError> {
		if let Some(address) = self.event()?.client.address {
			return Ok(address);
		}
		let address = match self.io.downstream_client_ip()? {
			Some(octets) => parse_octets(&octets)?,
			None => None,
		};
		self.event_mut()?.client.address = Some(address);
		Ok(address)
	}

	/// Geolocation data for the downstream client, cached after the first
	/// lookup.
	pub fn event_client_geo(&mut self) -> Result<serde_json::Value, GeataError> {
		if let Some(geo) = &self.event()?.client.geo {
			return Ok(geo.clone());
		}
		let address = self
			.event_client_address()?
			.ok_or_else(|| GeataError::from(GeataErrorKind::InvalidAddress))?;
		let geo = self.lookup_geo(address)?;
		self.event_mut()?.client.geo = Some(geo.clone());
		Ok(geo)
	}

	fn add_pending_promise(&mut self, promise: PromiseId) -> Result<(), GeataError> {
		self.event_mut()?.pending_promise_count += 1;
		let dec = |rt: &mut Runtime, _: Value| {
			if let Some(event) = rt.event.as_mut() {
				debug_assert!(event.pending_promise_count > 0);
				event.pending_promise_count -= 1;
			}
		};
		self.add_promise_reactions(promise, Some(Box::new(dec)), Some(Box::new(dec)));
		Ok(())
	}

	/// `FetchEvent#waitUntil`.
	pub fn wait_until(&mut self, promise: PromiseId) -> Result<(), GeataError> {
		if !self.event_is_active() {
			return Err(GeataErrorKind::InactiveEvent.into());
		}
		self.add_pending_promise(promise)
	}

	/// `FetchEvent#respondWith`. Only valid synchronously during dispatch,
	/// and only once; violations throw without touching the state.
	pub fn respond_with(&mut self, response: PromiseId) -> Result<(), GeataError> {
		let event = self.event()?;
		if !event.dispatching {
			return Err(GeataErrorKind::RespondOutsideDispatch.into());
		}
		if event.state != FetchState::Unhandled {
			return Err(GeataErrorKind::AlreadyResponded.into());
		}

		self.add_pending_promise(response)?;
		self.set_event_state(FetchState::WaitToRespond);

		self.add_promise_reactions(
			response,
			Some(Box::new(move |rt, value| {
				rt.response_promise_then_handler(value);
			})),
			Some(Box::new(move |rt, reason| {
				warn!(?reason, "error while running request handler");
				rt.respond_with_error();
			})),
		);
		Ok(())
	}

	fn response_promise_then_handler(&mut self, value: Value) {
		let response = match value {
			Value::Response(id) => id,
			other => {
				warn!(
					?other,
					"FetchEvent#respondWith must be called with a Response object or a \
					 Promise resolving to a Response object as the first argument"
				);
				self.respond_with_error();
				return;
			}
		};

		// keep header access working after the response has been sent off
		if self.response_is_upstream(response) {
			let delazified = self
				.response_headers(response)
				.and_then(|headers| self.headers_delazify(headers));
			if let Err(err) = delazified {
				warn!(%err, "failed to delazify upstream response headers");
				self.respond_with_error();
				return;
			}
		}

		let outcome = if self.responses[response.0].msg.body_stream.is_some() {
			self.respond_maybe_streaming(response)
		} else {
			self.respond_blocking(response).map(|()| false)
		};
		match outcome {
			Ok(streaming) => self.set_event_state(if streaming {
				FetchState::ResponseStreaming
			} else {
				FetchState::ResponseDone
			}),
			Err(err) => {
				warn!(%err, "failed to send response downstream");
				self.respond_with_error();
			}
		}
	}

	fn start_response(&mut self, response: ResponseId, streaming: bool) -> Result<(), GeataError> {
		let handle = self.response_handle(response);
		let body = self.responses[response.0].msg.body;
		hostcall!(self.io, resp_send_downstream(handle, body, streaming))
	}

	fn respond_blocking(&mut self, response: ResponseId) -> Result<(), GeataError> {
		self.start_response(response, false)
	}

	/// Send the response downstream, streaming its body stream into the
	/// downstream body unless a cheaper path applies.
	fn respond_maybe_streaming(&mut self, response: ResponseId) -> Result<bool, GeataError> {
		let stream = self.responses[response.0]
			.msg
			.body_stream
			.expect("respond_maybe_streaming without a body stream");

		if self.readable_locked(stream) || self.readable_disturbed(stream) {
			return Err(GeataErrorKind::BodyStreamLocked.into());
		}

		// A stream backed by another message's body handle can be moved
		// wholesale: the host sends the entire body from the handle, no
		// chunks pass through the guest.
		if let Some(source_owner) = self.streams[stream.0].source.body_owner() {
			self.move_body_handle(source_owner, BodyOwner::Response(response));
			self.start_response(response, false)?;
			return Ok(false);
		}

		self.stream_get_reader(stream)?;

		// contents may already be fully in the body handle
		if self.readable_is_closed(stream) {
			self.start_response(response, false)?;
			return Ok(false);
		}

		let read = self.reader_read(stream);
		self.attach_body_reader_reactions(read, response, stream);
		self.start_response(response, true)?;
		Ok(true)
	}

	fn attach_body_reader_reactions(
		&mut self,
		read: PromiseId,
		response: ResponseId,
		stream: StreamId,
	) {
		self.add_promise_reactions(
			read,
			Some(Box::new(move |rt, value| {
				rt.body_reader_then_handler(response, stream, value);
			})),
			Some(Box::new(move |rt, reason| {
				rt.body_reader_catch_handler(response, reason);
			})),
		);
	}

	fn body_reader_then_handler(&mut self, response: ResponseId, stream: StreamId, value: Value) {
		let body = self.responses[response.0].msg.body;
		match value {
			Value::ReadResult(Some(chunk)) => {
				if let Err(err) = body.write_all(&mut self.io, &chunk) {
					warn!(%err, "failed to write chunk to downstream body");
					self.set_event_state(FetchState::ResponseDone);
					if let Err(err) = body.close(&mut self.io) {
						warn!(%err, "failed to close downstream body");
					}
					return;
				}
				let read = self.reader_read(stream);
				self.attach_body_reader_reactions(read, response, stream);
			}
			Value::ReadResult(None) => {
				self.set_event_state(FetchState::ResponseDone);
				if let Err(err) = body.close(&mut self.io) {
					warn!(%err, "failed to close downstream body");
				}
			}
			other => {
				warn!(?other, "read on body stream didn't produce a chunk");
				self.set_event_state(FetchState::ResponseDone);
				let _ = body.close(&mut self.io);
			}
		}
	}

	fn body_reader_catch_handler(&mut self, response: ResponseId, reason: Value) {
		// not much to do but close the stream and warn
		warn!(?reason, "body stream errored during streaming response");
		self.set_event_state(FetchState::ResponseDone);
		let body = self.responses[response.0].msg.body;
		if let Err(err) = body.close(&mut self.io) {
			warn!(%err, "failed to close downstream body");
		}
	}

	/// Send a synthetic 500 downstream.
	pub(crate) fn respond_with_error(&mut self) {
		let state = match self.event.as_ref() {
			Some(event) => event.state,
			None => return,
		};
		debug_assert!(
			state == FetchState::Unhandled || state == FetchState::WaitToRespond,
			"respond_with_error from state {state:?}"
		);
		self.set_event_state(FetchState::RespondedWithError);
		let sent = (|| -> Result<(), GeataError> {
			let response = hostcall!(self.io, resp_new())?;
			let body = hostcall!(self.io, body_new())?;
			hostcall!(self.io, resp_status_set(response, 500))?;
			hostcall!(self.io, resp_send_downstream(response, body, false))
		})();
		if let Err(err) = sent {
			warn!(%err, "failed to send synthetic 500 downstream");
		}
	}
}

fn parse_octets(octets: &[u8]) -> Result<Option<IpAddr>, GeataError> {
	match octets.len() {
		0 => Ok(None),
		4 => {
			let mut v4 = [0u8; 4];
			v4.copy_from_slice(octets);
			Ok(Some(IpAddr::from(v4)))
		}
		16 => {
			let mut v6 = [0u8; 16];
			v6.copy_from_slice(octets);
			Ok(Some(IpAddr::from(v6)))
		}
		_ => Err(GeataErrorKind::InvalidAddress.into()),
	}
}
