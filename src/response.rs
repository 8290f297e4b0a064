//! The Response half of the HTTP pair.

use crate::error::GeataError;
use crate::headers::{HeadersId, HeadersMode};
use crate::host::{hostcall, BodyHandle, HttpHandle, ResponseHandle};
use crate::message::{BodyInit, BodyOwner, HttpMessage, ResponseId};
use crate::runtime::Runtime;

pub(crate) struct ResponseState {
	pub(crate) msg: HttpMessage,
	/// Cached at construction.
	pub(crate) status: u16,
	/// Upstream responses delazify their headers from the host.
	pub(crate) upstream: bool,
}

/// What `new Response(body, init)` accepts.
#[derive(Default)]
pub struct ResponseInit {
	pub status: Option<u16>,
	pub headers: Vec<(String, String)>,
}

impl Runtime {
	/// `new Response(body, init)`.
	pub fn response_new(
		&mut self,
		body: Option<BodyInit>,
		init: ResponseInit,
	) -> Result<ResponseId, GeataError> {
		let handle = hostcall!(self.io, resp_new())?;
		let body_handle = hostcall!(self.io, body_new())?;
		let status = init.status.unwrap_or(200);
		if status != 200 {
			hostcall!(self.io, resp_status_set(handle, status))?;
		}

		let msg = HttpMessage::new(HttpHandle::Resp(handle), body_handle);
		let id = ResponseId(self.responses.insert(ResponseState {
			msg,
			status,
			upstream: false,
		}));

		if !init.headers.is_empty() {
			let pairs: Vec<(&str, &str)> = init
				.headers
				.iter()
				.map(|(n, v)| (n.as_str(), v.as_str()))
				.collect();
			let headers =
				self.headers_create(HeadersMode::ProxyToResponse(handle), false, &pairs)?;
			self.responses[id.0].msg.headers = Some(headers);
		}

		self.set_body(BodyOwner::Response(id), body)?;
		Ok(id)
	}

	/// Wrap the response the host handed back for a pending request.
	pub(crate) fn response_from_upstream(
		&mut self,
		handle: ResponseHandle,
		body: BodyHandle,
	) -> Result<ResponseId, GeataError> {
		let status = hostcall!(self.io, resp_status_get(handle))?;
		let mut msg = HttpMessage::new(HttpHandle::Resp(handle), body);
		msg.has_body = true;
		Ok(ResponseId(self.responses.insert(ResponseState {
			msg,
			status,
			upstream: true,
		})))
	}

	pub(crate) fn response_handle(&self, id: ResponseId) -> ResponseHandle {
		match self.responses[id.0].msg.http {
			HttpHandle::Resp(handle) => handle,
			HttpHandle::Req(_) => unreachable!("response with a request handle"),
		}
	}

	pub fn response_status(&self, id: ResponseId) -> u16 {
		self.responses[id.0].status
	}

	pub fn response_is_upstream(&self, id: ResponseId) -> bool {
		self.responses[id.0].upstream
	}

	/// The downstream URL string this response was fetched for, or empty.
	pub fn response_url(&self, id: ResponseId) -> &str {
		&self.responses[id.0].msg.url
	}

	pub(crate) fn response_set_url(&mut self, id: ResponseId, url: String) {
		self.responses[id.0].msg.url = url;
	}

	/// The response's Headers, created on first access. Upstream responses
	/// get a lazy proxy.
	pub fn response_headers(&mut self, id: ResponseId) -> Result<HeadersId, GeataError> {
		if let Some(headers) = self.responses[id.0].msg.headers {
			return Ok(headers);
		}
		let handle = self.response_handle(id);
		let lazy = self.responses[id.0].upstream;
		let headers = self.headers_create(HeadersMode::ProxyToResponse(handle), lazy, &[])?;
		self.responses[id.0].msg.headers = Some(headers);
		Ok(headers)
	}
}
