//! The Request half of the HTTP pair.

use crate::cache_override::CacheOverride;
use crate::engine::PromiseId;
use crate::error::{GeataError, GeataErrorKind};
use crate::headers::{HeadersId, HeadersMode};
use crate::host::{hostcall, HttpHandle, PendingRequestHandle, RequestHandle};
use crate::message::{BodyInit, BodyOwner, HttpMessage, RequestId};
use crate::runtime::Runtime;

/// The six methods that are canonicalized; anything else keeps its casing.
const NORMALIZED_METHODS: [&str; 6] = ["DELETE", "GET", "HEAD", "OPTIONS", "POST", "PUT"];

pub(crate) struct RequestState {
	pub(crate) msg: HttpMessage,
	/// Cached; retrieved from the host once.
	pub(crate) method: Option<String>,
	pub(crate) backend: Option<String>,
	pub(crate) pending: Option<PendingRequestHandle>,
	pub(crate) response_promise: Option<PromiseId>,
	pub(crate) downstream: bool,
}

/// What `new Request(url, init)` and `fetch(url, init)` accept.
#[derive(Default)]
pub struct RequestInit {
	pub method: Option<String>,
	pub headers: Vec<(String, String)>,
	pub body: Option<BodyInit>,
	pub backend: Option<String>,
	pub cache_override: Option<CacheOverride>,
}

/// Canonicalize the well-known methods to uppercase; validate and keep the
/// spelling of anything else.
pub(crate) fn normalize_method(method: &str) -> Result<String, GeataError> {
	for known in NORMALIZED_METHODS {
		if method.eq_ignore_ascii_case(known) {
			return Ok(known.to_string());
		}
	}
	http::Method::from_bytes(method.as_bytes()).map_err(|_| {
		GeataError::new(
			GeataErrorKind::InvalidMethod,
			Some(format!("invalid HTTP method: {method}")),
		)
	})?;
	Ok(method.to_string())
}

impl Runtime {
	/// `new Request(url, init)`.
	pub fn request_new(&mut self, url: &str, init: RequestInit) -> Result<RequestId, GeataError> {
		let resolved = self.resolve_url(url)?;
		let handle = hostcall!(self.io, req_new())?;
		let body = hostcall!(self.io, body_new())?;
		hostcall!(self.io, req_uri_set(handle, resolved.as_str()))?;

		let mut method = None;
		if let Some(m) = init.method {
			let normalized = normalize_method(&m)?;
			if normalized != "GET" {
				hostcall!(self.io, req_method_set(handle, &normalized))?;
			}
			method = Some(normalized);
		}

		let mut msg = HttpMessage::new(HttpHandle::Req(handle), body);
		msg.url = resolved.into();
		let id = RequestId(self.requests.insert(RequestState {
			msg,
			method,
			backend: init.backend,
			pending: None,
			response_promise: None,
			downstream: false,
		}));

		if !init.headers.is_empty() {
			let pairs: Vec<(&str, &str)> = init
				.headers
				.iter()
				.map(|(n, v)| (n.as_str(), v.as_str()))
				.collect();
			let headers =
				self.headers_create(HeadersMode::ProxyToRequest(handle), false, &pairs)?;
			self.requests[id.0].msg.headers = Some(headers);
		}

		self.set_body(BodyOwner::Request(id), init.body)?;

		if let Some(cache_override) = init.cache_override {
			cache_override.apply(&mut self.io, handle)?;
		}

		Ok(id)
	}

	pub(crate) fn request_from_downstream(
		&mut self,
		handle: RequestHandle,
		body: crate::host::BodyHandle,
		url: String,
	) -> RequestId {
		let mut msg = HttpMessage::new(HttpHandle::Req(handle), body);
		msg.url = url;
		msg.has_body = true;
		RequestId(self.requests.insert(RequestState {
			msg,
			method: None,
			backend: None,
			pending: None,
			response_promise: None,
			downstream: true,
		}))
	}

	pub(crate) fn request_handle(&self, id: RequestId) -> RequestHandle {
		match self.requests[id.0].msg.http {
			HttpHandle::Req(handle) => handle,
			HttpHandle::Resp(_) => unreachable!("request with a response handle"),
		}
	}

	pub fn request_is_downstream(&self, id: RequestId) -> bool {
		self.requests[id.0].downstream
	}

	pub fn request_url(&self, id: RequestId) -> &str {
		&self.requests[id.0].msg.url
	}

	/// The method, fetched from the host on first access.
	pub fn request_method(&mut self, id: RequestId) -> Result<String, GeataError> {
		if let Some(method) = &self.requests[id.0].method {
			return Ok(method.clone());
		}
		let handle = self.request_handle(id);
		let method = self.io.req_method(handle)?;
		self.requests[id.0].method = Some(method.clone());
		Ok(method)
	}

	/// The request's Headers, created on first access. Downstream requests
	/// get a lazy proxy.
	pub fn request_headers(&mut self, id: RequestId) -> Result<HeadersId, GeataError> {
		if let Some(headers) = self.requests[id.0].msg.headers {
			return Ok(headers);
		}
		let handle = self.request_handle(id);
		let lazy = self.requests[id.0].downstream;
		let headers = self.headers_create(HeadersMode::ProxyToRequest(handle), lazy, &[])?;
		self.requests[id.0].msg.headers = Some(headers);
		Ok(headers)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::memory::MemoryHost;

	#[test]
	fn known_methods_canonicalize_case_insensitively() {
		for m in ["get", "Get", "GET", "gEt"] {
			assert_eq!(normalize_method(m).unwrap(), "GET");
		}
		assert_eq!(normalize_method("delete").unwrap(), "DELETE");
		assert_eq!(normalize_method("options").unwrap(), "OPTIONS");
	}

	#[test]
	fn unknown_methods_keep_their_casing() {
		assert_eq!(normalize_method("Patch").unwrap(), "Patch");
		assert_eq!(normalize_method("BREW").unwrap(), "BREW");
	}

	#[test]
	fn malformed_methods_are_rejected() {
		assert!(normalize_method("GE T").is_err());
		assert!(normalize_method("").is_err());
	}

	#[test]
	fn request_new_sets_uri_method_and_headers_on_the_host() {
		let host = MemoryHost::new();
		let mut rt = Runtime::new(Box::new(host.clone()));
		let id = rt
			.request_new(
				"https://origin.example/path",
				RequestInit {
					method: Some("post".into()),
					headers: vec![("X-Thing".into(), "yes".into())],
					..Default::default()
				},
			)
			.unwrap();
		assert_eq!(rt.request_method(id).unwrap(), "POST");
		assert_eq!(rt.request_url(id), "https://origin.example/path");
		let headers = rt.request_headers(id).unwrap();
		assert_eq!(rt.headers_get(headers, "x-thing").unwrap(), Some("yes".into()));
	}
}
