//! An in-memory host, for tests and local embedding.
//!
//! Implements the whole ABI over plain memory: bodies are byte queues,
//! backends are canned replies, dictionaries are maps, log endpoints
//! capture their lines. Clones share state, so a test can keep a handle on
//! the host while the runtime owns the boxed copy, and inspect what was
//! sent downstream afterwards.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::rc::Rc;

use slab::Slab;

use super::{
	AsyncHandle, BodyHandle, BodyWriteEnd, DictionaryHandle, EndpointHandle, HostCalls,
	HostError, HostResult, NextCursor, PendingRequestHandle, RequestHandle, ResponseHandle,
};

#[derive(Debug, Default)]
struct MemoryBody {
	data: VecDeque<u8>,
	closed: bool,
}

#[derive(Debug, Default, Clone)]
struct MemoryRequest {
	method: String,
	uri: String,
	headers: Vec<(String, String)>,
	cache_override: Option<CacheOverrideRecord>,
}

#[derive(Debug, Default, Clone)]
struct MemoryResponse {
	status: u16,
	headers: Vec<(String, String)>,
}

/// What `req_cache_override_set` received, verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOverrideRecord {
	pub tag: u32,
	pub ttl: u32,
	pub swr: u32,
	pub has_surrogate_key: bool,
}

/// A canned reply for a named backend.
#[derive(Debug, Clone)]
pub struct CannedReply {
	pub status: u16,
	pub headers: Vec<(String, String)>,
	pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
enum BackendBehavior {
	Reply(CannedReply),
	Fail,
}

#[derive(Debug)]
struct PendingState {
	outcome: Option<CannedReply>,
}

/// A request the runtime handed to `req_send_async`, as the host saw it.
#[derive(Debug, Clone)]
pub struct SentRequest {
	pub backend: String,
	pub method: String,
	pub uri: String,
	pub headers: Vec<(String, String)>,
	pub body: Vec<u8>,
}

/// What `resp_send_downstream` delivered.
#[derive(Debug, Clone)]
pub struct DownstreamSummary {
	pub status: u16,
	pub headers: Vec<(String, String)>,
	pub body: Vec<u8>,
	pub streaming: bool,
	pub body_closed: bool,
}

/// Hostcall counters, for asserting on traffic shape.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostStats {
	pub body_reads: u32,
	pub body_writes: u32,
	pub body_appends: u32,
	pub pending_selects: u32,
}

#[derive(Default)]
struct MemoryState {
	bodies: Slab<MemoryBody>,
	requests: Slab<MemoryRequest>,
	responses: Slab<MemoryResponse>,
	pending: Slab<PendingState>,
	pending_order: Vec<u32>,
	downstream_request: Option<(MemoryRequest, Vec<u8>)>,
	downstream: Option<(ResponseHandle, BodyHandle, bool)>,
	backends: HashMap<String, BackendBehavior>,
	dictionaries: HashMap<String, HashMap<String, String>>,
	open_dictionaries: Slab<String>,
	endpoints: Slab<String>,
	log_lines: Vec<(String, String)>,
	geo: HashMap<Vec<u8>, String>,
	client_ip: Option<IpAddr>,
	sent: Vec<SentRequest>,
	stats: HostStats,
	rng: u64,
}

#[derive(Clone)]
pub struct MemoryHost {
	state: Rc<RefCell<MemoryState>>,
}

impl Default for MemoryHost {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryHost {
	pub fn new() -> Self {
		Self {
			state: Rc::new(RefCell::new(MemoryState {
				rng: 0x6765_6174_6121,
				..Default::default()
			})),
		}
	}

	/// Configure the downstream request the next fetch event will see.
	pub fn set_downstream_request(
		&self,
		method: &str,
		uri: &str,
		headers: &[(&str, &str)],
		body: &[u8],
	) {
		let req = MemoryRequest {
			method: method.to_string(),
			uri: uri.to_string(),
			headers: headers
				.iter()
				.map(|(n, v)| (n.to_string(), v.to_string()))
				.collect(),
			cache_override: None,
		};
		self.state.borrow_mut().downstream_request = Some((req, body.to_vec()));
	}

	pub fn add_backend(&self, name: &str, reply: CannedReply) {
		self.state
			.borrow_mut()
			.backends
			.insert(name.to_string(), BackendBehavior::Reply(reply));
	}

	/// A backend whose requests complete as network errors.
	pub fn add_failing_backend(&self, name: &str) {
		self.state
			.borrow_mut()
			.backends
			.insert(name.to_string(), BackendBehavior::Fail);
	}

	pub fn add_dictionary(&self, name: &str, entries: &[(&str, &str)]) {
		self.state.borrow_mut().dictionaries.insert(
			name.to_string(),
			entries
				.iter()
				.map(|(k, v)| (k.to_string(), v.to_string()))
				.collect(),
		);
	}

	pub fn set_client_ip(&self, ip: IpAddr) {
		self.state.borrow_mut().client_ip = Some(ip);
	}

	pub fn add_geo(&self, ip: IpAddr, json: &str) {
		self.state
			.borrow_mut()
			.geo
			.insert(ip_octets(ip), json.to_string());
	}

	/// The response sent downstream so far, if any. Body bytes are whatever
	/// has landed in the response body handle by now.
	pub fn downstream(&self) -> Option<DownstreamSummary> {
		let state = self.state.borrow();
		let (resp, body, streaming) = state.downstream?;
		let response = state.responses.get(resp.0 as usize)?;
		let body = state.bodies.get(body.0 as usize)?;
		Some(DownstreamSummary {
			status: response.status,
			headers: response.headers.clone(),
			body: body.data.iter().copied().collect(),
			streaming,
			body_closed: body.closed,
		})
	}

	pub fn sent_requests(&self) -> Vec<SentRequest> {
		self.state.borrow().sent.clone()
	}

	pub fn log_lines(&self) -> Vec<(String, String)> {
		self.state.borrow().log_lines.clone()
	}

	pub fn stats(&self) -> HostStats {
		self.state.borrow().stats
	}

	pub fn cache_override_for_last_sent(&self) -> Option<CacheOverrideRecord> {
		let state = self.state.borrow();
		let sent = state.sent.last()?;
		state
			.requests
			.iter()
			.rev()
			.find(|(_, r)| r.uri == sent.uri && r.method == sent.method)
			.and_then(|(_, r)| r.cache_override)
	}
}

fn ip_octets(ip: IpAddr) -> Vec<u8> {
	match ip {
		IpAddr::V4(v4) => v4.octets().to_vec(),
		IpAddr::V6(v6) => v6.octets().to_vec(),
	}
}

fn write_bytes(buf: &mut [u8], bytes: &[u8]) -> HostResult<usize> {
	if buf.len() < bytes.len() {
		return Err(HostError::BufferLength);
	}
	buf[..bytes.len()].copy_from_slice(bytes);
	Ok(bytes.len())
}

/// Pack entries NUL-separated into `buf`, starting at entry index `cursor`.
fn write_entries(entries: &[String], buf: &mut [u8], cursor: u32) -> HostResult<(usize, NextCursor)> {
	let mut written = 0;
	let mut index = cursor as usize;
	while index < entries.len() {
		let entry = entries[index].as_bytes();
		if written + entry.len() + 1 > buf.len() {
			if written == 0 {
				return Err(HostError::BufferLength);
			}
			return Ok((written, Some(index as u32)));
		}
		buf[written..written + entry.len()].copy_from_slice(entry);
		buf[written + entry.len()] = 0;
		written += entry.len() + 1;
		index += 1;
	}
	Ok((written, None))
}

fn unique_names(headers: &[(String, String)]) -> Vec<String> {
	let mut names: Vec<String> = Vec::new();
	for (name, _) in headers {
		if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
			names.push(name.clone());
		}
	}
	names
}

impl MemoryState {
	fn body(&mut self, handle: BodyHandle) -> HostResult<&mut MemoryBody> {
		self.bodies
			.get_mut(handle.0 as usize)
			.ok_or(HostError::BadHandle)
	}

	fn request(&mut self, handle: RequestHandle) -> HostResult<&mut MemoryRequest> {
		self.requests
			.get_mut(handle.0 as usize)
			.ok_or(HostError::BadHandle)
	}

	fn response(&mut self, handle: ResponseHandle) -> HostResult<&mut MemoryResponse> {
		self.responses
			.get_mut(handle.0 as usize)
			.ok_or(HostError::BadHandle)
	}

	fn new_body(&mut self, data: &[u8]) -> BodyHandle {
		let key = self.bodies.insert(MemoryBody {
			data: data.iter().copied().collect(),
			closed: false,
		});
		BodyHandle(key as u32)
	}
}

impl HostCalls for MemoryHost {
	fn req_new(&mut self) -> HostResult<RequestHandle> {
		let mut state = self.state.borrow_mut();
		let key = state.requests.insert(MemoryRequest {
			method: "GET".to_string(),
			..Default::default()
		});
		Ok(RequestHandle(key as u32))
	}

	fn req_method_get(&mut self, req: RequestHandle, buf: &mut [u8]) -> HostResult<usize> {
		let mut state = self.state.borrow_mut();
		let method = state.request(req)?.method.clone();
		write_bytes(buf, method.as_bytes())
	}

	fn req_method_set(&mut self, req: RequestHandle, method: &str) -> HostResult<()> {
		let mut state = self.state.borrow_mut();
		state.request(req)?.method = method.to_string();
		Ok(())
	}

	fn req_uri_get(&mut self, req: RequestHandle, buf: &mut [u8]) -> HostResult<usize> {
		let mut state = self.state.borrow_mut();
		let uri = state.request(req)?.uri.clone();
		write_bytes(buf, uri.as_bytes())
	}

	fn req_uri_set(&mut self, req: RequestHandle, uri: &str) -> HostResult<()> {
		let mut state = self.state.borrow_mut();
		state.request(req)?.uri = uri.to_string();
		Ok(())
	}

	fn req_version_get(&mut self, req: RequestHandle) -> HostResult<u32> {
		self.state.borrow_mut().request(req)?;
		Ok(2)
	}

	fn req_header_names_get(
		&mut self,
		req: RequestHandle,
		buf: &mut [u8],
		cursor: u32,
	) -> HostResult<(usize, NextCursor)> {
		let mut state = self.state.borrow_mut();
		let names = unique_names(&state.request(req)?.headers);
		write_entries(&names, buf, cursor)
	}

	fn req_header_values_get(
		&mut self,
		req: RequestHandle,
		name: &str,
		buf: &mut [u8],
		cursor: u32,
	) -> HostResult<(usize, NextCursor)> {
		let mut state = self.state.borrow_mut();
		let values: Vec<String> = state
			.request(req)?
			.headers
			.iter()
			.filter(|(n, _)| n.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.clone())
			.collect();
		write_entries(&values, buf, cursor)
	}

	fn req_header_insert(
		&mut self,
		req: RequestHandle,
		name: &str,
		value: &str,
	) -> HostResult<()> {
		let mut state = self.state.borrow_mut();
		let headers = &mut state.request(req)?.headers;
		headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
		headers.push((name.to_string(), value.to_string()));
		Ok(())
	}

	fn req_header_append(
		&mut self,
		req: RequestHandle,
		name: &str,
		value: &str,
	) -> HostResult<()> {
		let mut state = self.state.borrow_mut();
		state
			.request(req)?
			.headers
			.push((name.to_string(), value.to_string()));
		Ok(())
	}

	fn req_header_remove(&mut self, req: RequestHandle, name: &str) -> HostResult<()> {
		let mut state = self.state.borrow_mut();
		state
			.request(req)?
			.headers
			.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
		Ok(())
	}

	fn req_send_async(
		&mut self,
		req: RequestHandle,
		body: BodyHandle,
		backend: &str,
	) -> HostResult<PendingRequestHandle> {
		let mut state = self.state.borrow_mut();
		let request = state.request(req)?.clone();
		let body_bytes: Vec<u8> = {
			let body = state.body(body)?;
			std::mem::take(&mut body.data).into_iter().collect()
		};
		let behavior = state
			.backends
			.get(backend)
			.cloned()
			.ok_or(HostError::InvalidArgument)?;
		state.sent.push(SentRequest {
			backend: backend.to_string(),
			method: request.method.clone(),
			uri: request.uri.clone(),
			headers: request.headers.clone(),
			body: body_bytes,
		});
		let outcome = match behavior {
			BackendBehavior::Reply(reply) => Some(reply),
			BackendBehavior::Fail => None,
		};
		let key = state.pending.insert(PendingState { outcome });
		state.pending_order.push(key as u32);
		Ok(PendingRequestHandle(key as u32))
	}

	fn req_pending_select(
		&mut self,
		pending: &[PendingRequestHandle],
	) -> HostResult<(u32, ResponseHandle, BodyHandle)> {
		if pending.is_empty() {
			return Err(HostError::InvalidArgument);
		}
		let mut state = self.state.borrow_mut();
		state.stats.pending_selects += 1;
		// Everything in memory is immediately ready; completion follows
		// send order.
		let (index, handle) = pending
			.iter()
			.enumerate()
			.min_by_key(|(_, h)| {
				state
					.pending_order
					.iter()
					.position(|k| *k == h.0)
					.unwrap_or(usize::MAX)
			})
			.map(|(i, h)| (i as u32, *h))
			.ok_or(HostError::InvalidArgument)?;
		let entry = state
			.pending
			.try_remove(handle.0 as usize)
			.ok_or(HostError::BadHandle)?;
		state.pending_order.retain(|k| *k != handle.0);
		match entry.outcome {
			None => Ok((index, ResponseHandle::INVALID, BodyHandle::INVALID)),
			Some(reply) => {
				let resp_key = state.responses.insert(MemoryResponse {
					status: reply.status,
					headers: reply.headers,
				});
				let body = state.new_body(&reply.body);
				Ok((index, ResponseHandle(resp_key as u32), body))
			}
		}
	}

	fn req_body_downstream_get(&mut self) -> HostResult<(RequestHandle, BodyHandle)> {
		let mut state = self.state.borrow_mut();
		let (request, body) = state
			.downstream_request
			.take()
			.ok_or(HostError::Generic)?;
		let req_key = state.requests.insert(request);
		let body = state.new_body(&body);
		Ok((RequestHandle(req_key as u32), body))
	}

	fn req_downstream_client_ip(&mut self, buf: &mut [u8]) -> HostResult<usize> {
		let state = self.state.borrow();
		let ip = state.client_ip.ok_or(HostError::None)?;
		write_bytes(buf, &ip_octets(ip))
	}

	fn req_cache_override_set(
		&mut self,
		req: RequestHandle,
		tag: u32,
		ttl: u32,
		swr: u32,
		surrogate_key: Option<&str>,
	) -> HostResult<()> {
		let mut state = self.state.borrow_mut();
		state.request(req)?.cache_override = Some(CacheOverrideRecord {
			tag,
			ttl,
			swr,
			has_surrogate_key: surrogate_key.is_some(),
		});
		Ok(())
	}

	fn resp_new(&mut self) -> HostResult<ResponseHandle> {
		let mut state = self.state.borrow_mut();
		let key = state.responses.insert(MemoryResponse {
			status: 200,
			headers: Vec::new(),
		});
		Ok(ResponseHandle(key as u32))
	}

	fn resp_status_get(&mut self, resp: ResponseHandle) -> HostResult<u16> {
		let mut state = self.state.borrow_mut();
		Ok(state.response(resp)?.status)
	}

	fn resp_status_set(&mut self, resp: ResponseHandle, status: u16) -> HostResult<()> {
		if status < 100 || status > 999 {
			return Err(HostError::HttpInvalidStatus);
		}
		let mut state = self.state.borrow_mut();
		state.response(resp)?.status = status;
		Ok(())
	}

	fn resp_version_get(&mut self, resp: ResponseHandle) -> HostResult<u32> {
		self.state.borrow_mut().response(resp)?;
		Ok(2)
	}

	fn resp_header_names_get(
		&mut self,
		resp: ResponseHandle,
		buf: &mut [u8],
		cursor: u32,
	) -> HostResult<(usize, NextCursor)> {
		let mut state = self.state.borrow_mut();
		let names = unique_names(&state.response(resp)?.headers);
		write_entries(&names, buf, cursor)
	}

	fn resp_header_values_get(
		&mut self,
		resp: ResponseHandle,
		name: &str,
		buf: &mut [u8],
		cursor: u32,
	) -> HostResult<(usize, NextCursor)> {
		let mut state = self.state.borrow_mut();
		let values: Vec<String> = state
			.response(resp)?
			.headers
			.iter()
			.filter(|(n, _)| n.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.clone())
			.collect();
		write_entries(&values, buf, cursor)
	}

	fn resp_header_insert(
		&mut self,
		resp: ResponseHandle,
		name: &str,
		value: &str,
	) -> HostResult<()> {
		let mut state = self.state.borrow_mut();
		let headers = &mut state.response(resp)?.headers;
		headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
		headers.push((name.to_string(), value.to_string()));
		Ok(())
	}

	fn resp_header_append(
		&mut self,
		resp: ResponseHandle,
		name: &str,
		value: &str,
	) -> HostResult<()> {
		let mut state = self.state.borrow_mut();
		state
			.response(resp)?
			.headers
			.push((name.to_string(), value.to_string()));
		Ok(())
	}

	fn resp_header_remove(&mut self, resp: ResponseHandle, name: &str) -> HostResult<()> {
		let mut state = self.state.borrow_mut();
		state
			.response(resp)?
			.headers
			.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
		Ok(())
	}

	fn resp_send_downstream(
		&mut self,
		resp: ResponseHandle,
		body: BodyHandle,
		streaming: bool,
	) -> HostResult<()> {
		let mut state = self.state.borrow_mut();
		state.response(resp)?;
		state.body(body)?;
		if state.downstream.is_some() {
			return Err(HostError::Generic);
		}
		state.downstream = Some((resp, body, streaming));
		Ok(())
	}

	fn body_new(&mut self) -> HostResult<BodyHandle> {
		Ok(self.state.borrow_mut().new_body(&[]))
	}

	fn body_read(&mut self, body: BodyHandle, buf: &mut [u8]) -> HostResult<usize> {
		let mut state = self.state.borrow_mut();
		state.stats.body_reads += 1;
		let body = state.body(body)?;
		let n = buf.len().min(body.data.len());
		for slot in buf.iter_mut().take(n) {
			*slot = body.data.pop_front().unwrap_or_default();
		}
		Ok(n)
	}

	fn body_write(
		&mut self,
		body: BodyHandle,
		chunk: &[u8],
		_end: BodyWriteEnd,
	) -> HostResult<usize> {
		let mut state = self.state.borrow_mut();
		state.stats.body_writes += 1;
		let body = state.body(body)?;
		if body.closed {
			return Err(HostError::BadHandle);
		}
		body.data.extend(chunk.iter().copied());
		Ok(chunk.len())
	}

	fn body_append(&mut self, dest: BodyHandle, src: BodyHandle) -> HostResult<()> {
		let mut state = self.state.borrow_mut();
		state.stats.body_appends += 1;
		let moved: Vec<u8> = {
			let src = state.body(src)?;
			std::mem::take(&mut src.data).into_iter().collect()
		};
		let dest = state.body(dest)?;
		dest.data.extend(moved);
		Ok(())
	}

	fn body_close(&mut self, body: BodyHandle) -> HostResult<()> {
		let mut state = self.state.borrow_mut();
		state.body(body)?.closed = true;
		Ok(())
	}

	fn dictionary_open(&mut self, name: &str) -> HostResult<DictionaryHandle> {
		let mut state = self.state.borrow_mut();
		let key = state.open_dictionaries.insert(name.to_string());
		Ok(DictionaryHandle(key as u32))
	}

	fn dictionary_get(
		&mut self,
		dict: DictionaryHandle,
		key: &str,
		buf: &mut [u8],
	) -> HostResult<usize> {
		let state = self.state.borrow();
		let name = state
			.open_dictionaries
			.get(dict.0 as usize)
			.ok_or(HostError::BadHandle)?;
		let value = state
			.dictionaries
			.get(name)
			.and_then(|entries| entries.get(key))
			.ok_or(HostError::None)?;
		write_bytes(buf, value.as_bytes())
	}

	fn log_endpoint_get(&mut self, name: &str) -> HostResult<EndpointHandle> {
		let mut state = self.state.borrow_mut();
		let key = state.endpoints.insert(name.to_string());
		Ok(EndpointHandle(key as u32))
	}

	fn log_write(&mut self, endpoint: EndpointHandle, msg: &[u8]) -> HostResult<usize> {
		let mut state = self.state.borrow_mut();
		let name = state
			.endpoints
			.get(endpoint.0 as usize)
			.ok_or(HostError::BadHandle)?
			.clone();
		state
			.log_lines
			.push((name, String::from_utf8_lossy(msg).into_owned()));
		Ok(msg.len())
	}

	fn geo_lookup(&mut self, octets: &[u8], buf: &mut [u8]) -> HostResult<usize> {
		let state = self.state.borrow();
		let json = state.geo.get(octets).ok_or(HostError::None)?;
		write_bytes(buf, json.as_bytes())
	}

	fn random_bytes(&mut self, buf: &mut [u8]) -> HostResult<()> {
		let mut state = self.state.borrow_mut();
		// xorshift64; deterministic so tests can assert on traffic, not values
		for slot in buf.iter_mut() {
			let mut x = state.rng;
			x ^= x << 13;
			x ^= x >> 7;
			x ^= x << 17;
			state.rng = x;
			*slot = x as u8;
		}
		Ok(())
	}

	fn async_is_ready(&mut self, handle: AsyncHandle) -> HostResult<bool> {
		let state = self.state.borrow();
		if state.pending.contains(handle.0 as usize) {
			Ok(true)
		} else if state.bodies.contains(handle.0 as usize) {
			Ok(true)
		} else {
			Err(HostError::BadHandle)
		}
	}

	fn async_select(
		&mut self,
		handles: &[AsyncHandle],
		_timeout_ms: u32,
	) -> HostResult<Option<u32>> {
		if handles.is_empty() {
			return Err(HostError::InvalidArgument);
		}
		Ok(Some(0))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn header_cursor_paginates_small_buffers() {
		let mut host = MemoryHost::new();
		let req = host.req_new().unwrap();
		host.req_header_append(req, "alpha", "1").unwrap();
		host.req_header_append(req, "beta", "2").unwrap();
		host.req_header_append(req, "gamma", "3").unwrap();

		let mut names = Vec::new();
		let mut buf = [0u8; 8];
		let mut cursor = 0;
		loop {
			let (n, next) = host.req_header_names_get(req, &mut buf, cursor).unwrap();
			for part in buf[..n].split(|b| *b == 0) {
				if !part.is_empty() {
					names.push(String::from_utf8(part.to_vec()).unwrap());
				}
			}
			match next {
				Some(c) => cursor = c,
				None => break,
			}
		}
		assert_eq!(names, ["alpha", "beta", "gamma"]);
	}

	#[test]
	fn unknown_backend_is_an_invalid_argument() {
		let mut host = MemoryHost::new();
		let req = host.req_new().unwrap();
		let body = host.body_new().unwrap();
		assert_eq!(
			host.req_send_async(req, body, "nowhere"),
			Err(HostError::InvalidArgument)
		);
	}

	#[test]
	fn failing_backend_selects_to_invalid_handles() {
		let mut host = MemoryHost::new();
		host.add_failing_backend("origin");
		let req = host.req_new().unwrap();
		let body = host.body_new().unwrap();
		let pending = host.req_send_async(req, body, "origin").unwrap();
		let (index, resp, body) = host.req_pending_select(&[pending]).unwrap();
		assert_eq!(index, 0);
		assert!(!resp.is_valid());
		assert!(!body.is_valid());
	}

	#[test]
	fn dictionary_miss_is_error_code_ten() {
		let mut host = MemoryHost::new();
		host.add_dictionary("d", &[("yes", "value")]);
		let dict = host.dictionary_open("d").unwrap();
		let mut buf = [0u8; 64];
		assert_eq!(
			host.dictionary_get(dict, "nope", &mut buf),
			Err(HostError::None)
		);
		let n = host.dictionary_get(dict, "yes", &mut buf).unwrap();
		assert_eq!(&buf[..n], b"value");
	}
}
