//! Typed boundary to the host ABI.
//!
//! Every host resource is named by an opaque 32-bit handle; every host call
//! is a fallible, non-blocking operation returning a numeric error code.
//! [`HostCalls`] states that contract as a trait, [`HostIo`] layers the
//! runtime's conveniences on top: the single reusable scratch buffer, error
//! wrapping that names the failing call, and the cursor loops for
//! multi-value reads.

use std::fmt::{self, Display};

use crate::error::GeataError;

pub mod memory;

pub const HEADER_MAX_LEN: usize = 69000;
pub const METHOD_MAX_LEN: usize = 1024;
pub const URI_MAX_LEN: usize = 8192;
pub const DICTIONARY_ENTRY_MAX_LEN: usize = 8000;

const fn max_len(a: usize, b: usize) -> usize {
	if a > b { a } else { b }
}

/// Size of the reusable hostcall scratch buffer: everything the runtime
/// reads through it has to fit.
pub const HOSTCALL_BUFFER_LEN: usize = max_len(
	max_len(HEADER_MAX_LEN, METHOD_MAX_LEN),
	max_len(URI_MAX_LEN, DICTIONARY_ENTRY_MAX_LEN),
);

/// Sentinel for a handle that doesn't name anything.
pub const INVALID_HANDLE: u32 = u32::MAX - 1;

macro_rules! handle_type {
	($(#[$doc:meta])* $name:ident) => {
		$(#[$doc])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
		pub struct $name(pub u32);

		impl $name {
			pub const INVALID: Self = Self(INVALID_HANDLE);

			pub fn is_valid(self) -> bool {
				self.0 != INVALID_HANDLE
			}
		}
	};
}

handle_type!(RequestHandle);
handle_type!(ResponseHandle);
handle_type!(
	/// A bytes-in, bytes-out channel owned by the host. Operations live in
	/// [`crate::body`].
	BodyHandle
);
handle_type!(PendingRequestHandle);
handle_type!(DictionaryHandle);
handle_type!(EndpointHandle);

/// Wraps a host call so that a nonzero result surfaces as a guest-visible
/// error naming the function and code.
macro_rules! hostcall {
	($io:expr, $call:ident ( $($arg:expr),* $(,)? )) => {
		$io.host
			.$call($($arg),*)
			.map_err(|err| $crate::error::GeataError::hostcall(stringify!($call), err))
	};
}

pub(crate) use hostcall;

/// A handle that can be polled or selected over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsyncHandle(pub u32);

impl From<PendingRequestHandle> for AsyncHandle {
	fn from(h: PendingRequestHandle) -> Self {
		Self(h.0)
	}
}

impl From<BodyHandle> for AsyncHandle {
	fn from(h: BodyHandle) -> Self {
		Self(h.0)
	}
}

impl AsyncHandle {
	pub fn is_ready(self, io: &mut HostIo) -> Result<bool, GeataError> {
		hostcall!(io, async_is_ready(self))
	}

	/// Returns the index of the first ready handle, or `None` when the
	/// timeout expired first. A timeout of zero waits unbounded.
	pub fn select(
		io: &mut HostIo,
		handles: &[AsyncHandle],
		timeout_ms: u32,
	) -> Result<Option<u32>, GeataError> {
		hostcall!(io, async_select(handles, timeout_ms))
	}
}

/// Which end of a body a write lands on. The runtime only ever appends, but
/// the ABI carries both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BodyWriteEnd {
	Front = 0,
	Back = 1,
}

/// Error codes of the host ABI. Zero is success and never constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostError {
	Generic,
	InvalidArgument,
	BadHandle,
	BufferLength,
	Unsupported,
	BadAlignment,
	HttpParse,
	HttpUser,
	HttpIncompleteMessage,
	/// An optional value was missing. Often converted to a null result
	/// locally instead of raised, e.g. by `Dictionary::get`.
	None,
	HttpHeadTooLarge,
	HttpInvalidStatus,
}

impl HostError {
	pub fn code(self) -> u32 {
		match self {
			Self::Generic => 1,
			Self::InvalidArgument => 2,
			Self::BadHandle => 3,
			Self::BufferLength => 4,
			Self::Unsupported => 5,
			Self::BadAlignment => 6,
			Self::HttpParse => 7,
			Self::HttpUser => 8,
			Self::HttpIncompleteMessage => 9,
			Self::None => 10,
			Self::HttpHeadTooLarge => 11,
			Self::HttpInvalidStatus => 12,
		}
	}

	pub fn from_code(code: u32) -> Self {
		match code {
			2 => Self::InvalidArgument,
			3 => Self::BadHandle,
			4 => Self::BufferLength,
			5 => Self::Unsupported,
			6 => Self::BadAlignment,
			7 => Self::HttpParse,
			8 => Self::HttpUser,
			9 => Self::HttpIncompleteMessage,
			10 => Self::None,
			11 => Self::HttpHeadTooLarge,
			12 => Self::HttpInvalidStatus,
			_ => Self::Generic,
		}
	}

	fn message(self) -> &'static str {
		match self {
			Self::Generic => "generic error",
			Self::InvalidArgument => "invalid argument",
			Self::BadHandle => "invalid handle",
			Self::BufferLength => "buffer length error",
			Self::Unsupported => "unsupported operation",
			Self::BadAlignment => "alignment error",
			Self::HttpParse => "HTTP parse error",
			Self::HttpUser => "HTTP user error",
			Self::HttpIncompleteMessage => "incomplete HTTP message",
			Self::None => "optional value missing",
			Self::HttpHeadTooLarge => "HTTP head too large",
			Self::HttpInvalidStatus => "invalid HTTP status",
		}
	}
}

impl Display for HostError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "host error {}: {}", self.code(), self.message())
	}
}

pub type HostResult<T> = Result<T, HostError>;

/// Continuation cursor for multi-value reads: `None` means the enumeration
/// is complete. Entries land in the buffer NUL-separated.
pub type NextCursor = Option<u32>;

/// The host ABI, one method per host call.
///
/// Buffer-taking reads return the number of bytes written. None of these
/// block, with two exceptions: `req_pending_select` blocks cooperatively
/// until one of the given pending requests is ready, and `async_select`
/// blocks up to its timeout.
pub trait HostCalls {
	fn req_new(&mut self) -> HostResult<RequestHandle>;
	fn req_method_get(&mut self, req: RequestHandle, buf: &mut [u8]) -> HostResult<usize>;
	fn req_method_set(&mut self, req: RequestHandle, method: &str) -> HostResult<()>;
	fn req_uri_get(&mut self, req: RequestHandle, buf: &mut [u8]) -> HostResult<usize>;
	fn req_uri_set(&mut self, req: RequestHandle, uri: &str) -> HostResult<()>;
	fn req_version_get(&mut self, req: RequestHandle) -> HostResult<u32>;
	fn req_header_names_get(
		&mut self,
		req: RequestHandle,
		buf: &mut [u8],
		cursor: u32,
	) -> HostResult<(usize, NextCursor)>;
	fn req_header_values_get(
		&mut self,
		req: RequestHandle,
		name: &str,
		buf: &mut [u8],
		cursor: u32,
	) -> HostResult<(usize, NextCursor)>;
	fn req_header_insert(&mut self, req: RequestHandle, name: &str, value: &str)
	-> HostResult<()>;
	fn req_header_append(&mut self, req: RequestHandle, name: &str, value: &str)
	-> HostResult<()>;
	fn req_header_remove(&mut self, req: RequestHandle, name: &str) -> HostResult<()>;
	fn req_send_async(
		&mut self,
		req: RequestHandle,
		body: BodyHandle,
		backend: &str,
	) -> HostResult<PendingRequestHandle>;
	/// Blocks until one of `pending` is ready; returns its index plus the
	/// response and response body handles. An invalid response handle
	/// signals a network error for that request.
	fn req_pending_select(
		&mut self,
		pending: &[PendingRequestHandle],
	) -> HostResult<(u32, ResponseHandle, BodyHandle)>;
	fn req_body_downstream_get(&mut self) -> HostResult<(RequestHandle, BodyHandle)>;
	fn req_downstream_client_ip(&mut self, buf: &mut [u8]) -> HostResult<usize>;
	fn req_cache_override_set(
		&mut self,
		req: RequestHandle,
		tag: u32,
		ttl: u32,
		swr: u32,
		surrogate_key: Option<&str>,
	) -> HostResult<()>;

	fn resp_new(&mut self) -> HostResult<ResponseHandle>;
	fn resp_status_get(&mut self, resp: ResponseHandle) -> HostResult<u16>;
	fn resp_status_set(&mut self, resp: ResponseHandle, status: u16) -> HostResult<()>;
	fn resp_version_get(&mut self, resp: ResponseHandle) -> HostResult<u32>;
	fn resp_header_names_get(
		&mut self,
		resp: ResponseHandle,
		buf: &mut [u8],
		cursor: u32,
	) -> HostResult<(usize, NextCursor)>;
	fn resp_header_values_get(
		&mut self,
		resp: ResponseHandle,
		name: &str,
		buf: &mut [u8],
		cursor: u32,
	) -> HostResult<(usize, NextCursor)>;
	fn resp_header_insert(
		&mut self,
		resp: ResponseHandle,
		name: &str,
		value: &str,
	) -> HostResult<()>;
	fn resp_header_append(
		&mut self,
		resp: ResponseHandle,
		name: &str,
		value: &str,
	) -> HostResult<()>;
	fn resp_header_remove(&mut self, resp: ResponseHandle, name: &str) -> HostResult<()>;
	fn resp_send_downstream(
		&mut self,
		resp: ResponseHandle,
		body: BodyHandle,
		streaming: bool,
	) -> HostResult<()>;

	fn body_new(&mut self) -> HostResult<BodyHandle>;
	fn body_read(&mut self, body: BodyHandle, buf: &mut [u8]) -> HostResult<usize>;
	fn body_write(
		&mut self,
		body: BodyHandle,
		chunk: &[u8],
		end: BodyWriteEnd,
	) -> HostResult<usize>;
	fn body_append(&mut self, dest: BodyHandle, src: BodyHandle) -> HostResult<()>;
	fn body_close(&mut self, body: BodyHandle) -> HostResult<()>;

	fn dictionary_open(&mut self, name: &str) -> HostResult<DictionaryHandle>;
	fn dictionary_get(
		&mut self,
		dict: DictionaryHandle,
		key: &str,
		buf: &mut [u8],
	) -> HostResult<usize>;

	fn log_endpoint_get(&mut self, name: &str) -> HostResult<EndpointHandle>;
	fn log_write(&mut self, endpoint: EndpointHandle, msg: &[u8]) -> HostResult<usize>;

	/// Geolocation data for the given address octets, as a JSON string.
	fn geo_lookup(&mut self, octets: &[u8], buf: &mut [u8]) -> HostResult<usize>;

	fn random_bytes(&mut self, buf: &mut [u8]) -> HostResult<()>;

	fn async_is_ready(&mut self, handle: AsyncHandle) -> HostResult<bool>;
	fn async_select(
		&mut self,
		handles: &[AsyncHandle],
		timeout_ms: u32,
	) -> HostResult<Option<u32>>;
}

/// A request or response handle, for the operations that work on either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpHandle {
	Req(RequestHandle),
	Resp(ResponseHandle),
}

/// The host plus the runtime's scratch buffer.
///
/// The buffer is borrowed exclusively for the duration of one host call;
/// the borrow checker enforces that no two calls can hold it on the same
/// stack.
pub struct HostIo {
	pub(crate) host: Box<dyn HostCalls>,
	scratch: Box<[u8]>,
}

impl HostIo {
	pub fn new(host: Box<dyn HostCalls>) -> Self {
		Self {
			host,
			scratch: vec![0; HOSTCALL_BUFFER_LEN].into_boxed_slice(),
		}
	}

	pub(crate) fn req_uri(&mut self, req: RequestHandle) -> Result<String, GeataError> {
		let n = hostcall!(self, req_uri_get(req, &mut self.scratch))?;
		Ok(String::from_utf8_lossy(&self.scratch[..n]).into_owned())
	}

	pub(crate) fn req_method(&mut self, req: RequestHandle) -> Result<String, GeataError> {
		let n = hostcall!(self, req_method_get(req, &mut self.scratch))?;
		Ok(String::from_utf8_lossy(&self.scratch[..n]).into_owned())
	}

	/// The downstream client address octets, or `None` when the host has
	/// no address for this connection.
	pub(crate) fn downstream_client_ip(&mut self) -> Result<Option<Vec<u8>>, GeataError> {
		match self.host.req_downstream_client_ip(&mut self.scratch) {
			Ok(n) => Ok(Some(self.scratch[..n].to_vec())),
			Err(HostError::None) => Ok(None),
			Err(err) => Err(GeataError::hostcall("req_downstream_client_ip", err)),
		}
	}

	pub(crate) fn geo_lookup(&mut self, octets: &[u8]) -> Result<String, GeataError> {
		let n = hostcall!(self, geo_lookup(octets, &mut self.scratch))?;
		Ok(String::from_utf8_lossy(&self.scratch[..n]).into_owned())
	}

	/// All header names on the given request or response, in host order.
	pub(crate) fn header_names(&mut self, owner: HttpHandle) -> Result<Vec<String>, GeataError> {
		let mut names = Vec::new();
		let mut cursor = 0;
		loop {
			let (n, next) = match owner {
				HttpHandle::Req(req) => {
					hostcall!(self, req_header_names_get(req, &mut self.scratch, cursor))?
				}
				HttpHandle::Resp(resp) => {
					hostcall!(self, resp_header_names_get(resp, &mut self.scratch, cursor))?
				}
			};
			push_nul_separated(&mut names, &self.scratch[..n]);
			match next {
				Some(c) => cursor = c,
				None => break,
			}
		}
		Ok(names)
	}

	/// All values for one header name, or `None` when the header is absent.
	pub(crate) fn header_values(
		&mut self,
		owner: HttpHandle,
		name: &str,
	) -> Result<Option<Vec<String>>, GeataError> {
		let mut values = Vec::new();
		let mut cursor = 0;
		loop {
			let (n, next) = match owner {
				HttpHandle::Req(req) => hostcall!(
					self,
					req_header_values_get(req, name, &mut self.scratch, cursor)
				)?,
				HttpHandle::Resp(resp) => hostcall!(
					self,
					resp_header_values_get(resp, name, &mut self.scratch, cursor)
				)?,
			};
			push_nul_separated(&mut values, &self.scratch[..n]);
			match next {
				Some(c) => cursor = c,
				None => break,
			}
		}
		Ok(if values.is_empty() { None } else { Some(values) })
	}

	pub(crate) fn header_insert(
		&mut self,
		owner: HttpHandle,
		name: &str,
		value: &str,
	) -> Result<(), GeataError> {
		match owner {
			HttpHandle::Req(req) => hostcall!(self, req_header_insert(req, name, value)),
			HttpHandle::Resp(resp) => hostcall!(self, resp_header_insert(resp, name, value)),
		}
	}

	pub(crate) fn header_append(
		&mut self,
		owner: HttpHandle,
		name: &str,
		value: &str,
	) -> Result<(), GeataError> {
		match owner {
			HttpHandle::Req(req) => hostcall!(self, req_header_append(req, name, value)),
			HttpHandle::Resp(resp) => hostcall!(self, resp_header_append(resp, name, value)),
		}
	}

	pub(crate) fn header_remove(
		&mut self,
		owner: HttpHandle,
		name: &str,
	) -> Result<(), GeataError> {
		match owner {
			HttpHandle::Req(req) => hostcall!(self, req_header_remove(req, name)),
			HttpHandle::Resp(resp) => hostcall!(self, resp_header_remove(resp, name)),
		}
	}

	pub(crate) fn dictionary_entry(
		&mut self,
		dict: DictionaryHandle,
		key: &str,
	) -> Result<Option<String>, GeataError> {
		match self.host.dictionary_get(dict, key, &mut self.scratch) {
			Ok(n) => Ok(Some(String::from_utf8_lossy(&self.scratch[..n]).into_owned())),
			Err(HostError::None) => Ok(None),
			Err(err) => Err(GeataError::hostcall("dictionary_get", err)),
		}
	}
}

fn push_nul_separated(out: &mut Vec<String>, buf: &[u8]) {
	for part in buf.split(|b| *b == 0) {
		if !part.is_empty() {
			out.push(String::from_utf8_lossy(part).into_owned());
		}
	}
}
