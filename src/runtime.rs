//! The runtime value threaded through every operation.
//!
//! All mutable state lives here: the host boundary, the engine kernel's
//! arenas, the pending IO queues, the fetch event, and the `fastly`
//! namespace state. The top-level pump alternates microtask drains with
//! network IO turns until the event is no longer active and the queues are
//! empty.

use std::collections::VecDeque;

use slab::Slab;
use tracing::warn;
use url::Url;

use crate::engine::Engine;
use crate::error::GeataError;
use crate::event::{FetchEventState, FetchState};
use crate::fastly::FastlyState;
use crate::headers::Headers;
use crate::host::{hostcall, HostCalls, HostIo};
use crate::message::RequestId;
use crate::request::RequestState;
use crate::response::ResponseState;
use crate::streams::{ReadableState, StreamId, WritableState};
use crate::transform::TransformState;

type Listener = Box<dyn FnMut(&mut Runtime) -> Result<(), GeataError>>;

pub struct Runtime {
	pub(crate) io: HostIo,
	pub(crate) engine: Engine,
	pub(crate) streams: Slab<ReadableState>,
	pub(crate) writables: Slab<WritableState>,
	pub(crate) transforms: Slab<TransformState>,
	pub(crate) requests: Slab<RequestState>,
	pub(crate) responses: Slab<ResponseState>,
	pub(crate) headers: Slab<Headers>,
	pub(crate) pending_requests: Vec<RequestId>,
	pub(crate) pending_body_reads: VecDeque<StreamId>,
	pub(crate) event: Option<FetchEventState>,
	pub(crate) fastly: FastlyState,
	listeners: Vec<Listener>,
}

impl Runtime {
	pub fn new(host: Box<dyn HostCalls>) -> Self {
		Self {
			io: HostIo::new(host),
			engine: Engine::default(),
			streams: Slab::new(),
			writables: Slab::new(),
			transforms: Slab::new(),
			requests: Slab::new(),
			responses: Slab::new(),
			headers: Slab::new(),
			pending_requests: Vec::new(),
			pending_body_reads: VecDeque::new(),
			event: None,
			fastly: FastlyState::default(),
			listeners: Vec::new(),
		}
	}

	/// Register a `fetch` listener. Listeners run synchronously, in
	/// registration order, when the event is dispatched.
	pub fn add_fetch_listener(
		&mut self,
		listener: impl FnMut(&mut Runtime) -> Result<(), GeataError> + 'static,
	) {
		self.listeners.push(Box::new(listener));
	}

	/// Fetch the downstream request from the host and dispatch the fetch
	/// event to the registered listeners.
	pub fn dispatch_fetch_event(&mut self) -> Result<(), GeataError> {
		let (handle, body) = hostcall!(self.io, req_body_downstream_get())?;
		let url = self.io.req_uri(handle)?;

		// `fastly.baseURL` defaults to the origin of the downstream URL
		if self.fastly.base_url.is_none() {
			if let Ok(parsed) = Url::parse(&url) {
				if parsed.has_host() {
					let mut origin = parsed;
					origin.set_path("/");
					origin.set_query(None);
					origin.set_fragment(None);
					self.fastly.base_url = Some(origin);
				}
			}
		}

		let request = self.request_from_downstream(handle, body, url);
		self.event = Some(FetchEventState::new(request));

		self.event.as_mut().expect("event just created").dispatching = true;
		let mut listeners = std::mem::take(&mut self.listeners);
		for listener in &mut listeners {
			if let Err(err) = listener(self) {
				warn!(%err, "fetch listener failed");
			}
		}
		listeners.extend(self.listeners.drain(..));
		self.listeners = listeners;
		self.event.as_mut().expect("event still present").dispatching = false;

		// nothing called respondWith and nothing can anymore
		let event = self.event.as_ref().expect("event still present");
		if event.state == FetchState::Unhandled && event.pending_promise_count == 0 {
			warn!("no respondWith during dispatch; sending a synthetic error response");
			self.respond_with_error();
		}
		Ok(())
	}

	/// Alternate microtask drains with network IO turns until the event is
	/// no longer active and no IO is pending.
	pub fn run_event_loop(&mut self) -> Result<(), GeataError> {
		loop {
			self.drain_microtasks();
			if !self.event_is_active() && !self.has_pending_io() {
				break;
			}
			if !self.has_pending_io() {
				// e.g. a waitUntil promise nobody can settle anymore
				warn!("event loop stalled: event active with no pending work");
				break;
			}
			self.process_network_io()?;
		}
		self.report_unhandled_rejections();
		Ok(())
	}
}
