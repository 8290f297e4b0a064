//! The Headers container.
//!
//! An ordered, lowercase multi-map where multiple values for one name are
//! combined with `", "`. A Headers object either stands alone or proxies a
//! request/response handle, in which case every mutation is mirrored to the
//! host before the local map changes. Headers for a downstream request or
//! an upstream response start lazy: the map holds the names, and values are
//! fetched from the host on first use.

use http::header::{HeaderName, HeaderValue};

use crate::error::{GeataError, GeataErrorKind};
use crate::host::HttpHandle;
use crate::runtime::Runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeadersId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadersMode {
	Standalone,
	ProxyToRequest(crate::host::RequestHandle),
	ProxyToResponse(crate::host::ResponseHandle),
}

impl HeadersMode {
	fn proxy(self) -> Option<HttpHandle> {
		match self {
			Self::Standalone => None,
			Self::ProxyToRequest(req) => Some(HttpHandle::Req(req)),
			Self::ProxyToResponse(resp) => Some(HttpHandle::Resp(resp)),
		}
	}
}

/// A value slot: either materialized, or still waiting on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
enum HeaderSlot {
	Unfetched,
	Value(String),
}

pub(crate) struct Headers {
	mode: HeadersMode,
	entries: Vec<(String, HeaderSlot)>,
	lazy: bool,
}

/// Lowercase and validate a header name: token characters only, non-empty.
pub(crate) fn normalize_name(name: &str) -> Result<String, GeataError> {
	let parsed = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
		GeataError::new(
			GeataErrorKind::InvalidHeader,
			Some(format!("invalid header name: {name}")),
		)
	})?;
	Ok(parsed.as_str().to_string())
}

/// Trim whitespace from both ends and reject interior CR, LF, or NUL.
pub(crate) fn normalize_value(value: &str) -> Result<String, GeataError> {
	let trimmed = value.trim_matches([' ', '\t', '\r', '\n']);
	HeaderValue::from_str(trimmed).map_err(|_| {
		GeataError::new(
			GeataErrorKind::InvalidHeader,
			Some(format!("invalid header value: {value}")),
		)
	})?;
	Ok(trimmed.to_string())
}

impl Headers {
	fn position(&self, name: &str) -> Option<usize> {
		self.entries.iter().position(|(n, _)| n == name)
	}
}

impl Runtime {
	/// Create a Headers object. Downstream-request and upstream-response
	/// proxies start lazy, with only the names enumerated from the host.
	pub(crate) fn headers_create(
		&mut self,
		mode: HeadersMode,
		lazy: bool,
		init: &[(&str, &str)],
	) -> Result<HeadersId, GeataError> {
		let mut entries = Vec::new();
		if lazy {
			let owner = mode.proxy().expect("lazy headers must proxy a handle");
			for name in self.io.header_names(owner)? {
				let name = normalize_name(&name)?;
				if !entries.iter().any(|(n, _): &(String, HeaderSlot)| *n == name) {
					entries.push((name, HeaderSlot::Unfetched));
				}
			}
		}
		let id = HeadersId(self.headers.insert(Headers {
			mode,
			entries,
			lazy,
		}));
		for (name, value) in init {
			self.headers_append(id, name, value)?;
		}
		Ok(id)
	}

	pub fn headers_standalone(&mut self, init: &[(&str, &str)]) -> Result<HeadersId, GeataError> {
		self.headers_create(HeadersMode::Standalone, false, init)
	}

	fn ensure_value(&mut self, id: HeadersId, name: &str) -> Result<(), GeataError> {
		let (needs_fetch, owner) = {
			let headers = &self.headers[id.0];
			if !headers.lazy {
				return Ok(());
			}
			match headers.position(name) {
				Some(i) if headers.entries[i].1 == HeaderSlot::Unfetched => {
					(true, headers.mode.proxy())
				}
				_ => (false, None),
			}
		};
		if !needs_fetch {
			return Ok(());
		}
		let owner = owner.expect("lazy headers must proxy a handle");
		let combined = self
			.io
			.header_values(owner, name)?
			.map(|values| values.join(", "))
			.unwrap_or_default();
		let headers = &mut self.headers[id.0];
		if let Some(i) = headers.position(name) {
			headers.entries[i].1 = HeaderSlot::Value(combined);
		}
		Ok(())
	}

	pub fn headers_get(&mut self, id: HeadersId, name: &str) -> Result<Option<String>, GeataError> {
		let name = normalize_name(name)?;
		self.ensure_value(id, &name)?;
		let headers = &self.headers[id.0];
		Ok(headers.position(&name).map(|i| match &headers.entries[i].1 {
			HeaderSlot::Value(v) => v.clone(),
			HeaderSlot::Unfetched => String::new(),
		}))
	}

	pub fn headers_has(&mut self, id: HeadersId, name: &str) -> Result<bool, GeataError> {
		let name = normalize_name(name)?;
		Ok(self.headers[id.0].position(&name).is_some())
	}

	pub fn headers_append(
		&mut self,
		id: HeadersId,
		name: &str,
		value: &str,
	) -> Result<(), GeataError> {
		let name = normalize_name(name)?;
		let value = normalize_value(value)?;
		self.ensure_value(id, &name)?;
		if let Some(owner) = self.headers[id.0].mode.proxy() {
			self.io.header_append(owner, &name, &value)?;
		}
		let headers = &mut self.headers[id.0];
		match headers.position(&name) {
			Some(i) => {
				let combined = match &headers.entries[i].1 {
					HeaderSlot::Value(existing) if !existing.is_empty() => {
						format!("{existing}, {value}")
					}
					_ => value,
				};
				headers.entries[i].1 = HeaderSlot::Value(combined);
			}
			None => headers.entries.push((name, HeaderSlot::Value(value))),
		}
		Ok(())
	}

	/// Replace any prior combined value.
	pub fn headers_set(&mut self, id: HeadersId, name: &str, value: &str) -> Result<(), GeataError> {
		let name = normalize_name(name)?;
		let value = normalize_value(value)?;
		if let Some(owner) = self.headers[id.0].mode.proxy() {
			self.io.header_insert(owner, &name, &value)?;
		}
		let headers = &mut self.headers[id.0];
		match headers.position(&name) {
			Some(i) => headers.entries[i].1 = HeaderSlot::Value(value),
			None => headers.entries.push((name, HeaderSlot::Value(value))),
		}
		Ok(())
	}

	pub fn headers_delete(&mut self, id: HeadersId, name: &str) -> Result<(), GeataError> {
		let name = normalize_name(name)?;
		if let Some(owner) = self.headers[id.0].mode.proxy() {
			self.io.header_remove(owner, &name)?;
		}
		let headers = &mut self.headers[id.0];
		if let Some(i) = headers.position(&name) {
			headers.entries.remove(i);
		}
		Ok(())
	}

	/// Materialize every value, then drop the lazy flag for good.
	pub fn headers_delazify(&mut self, id: HeadersId) -> Result<(), GeataError> {
		if !self.headers[id.0].lazy {
			return Ok(());
		}
		let names: Vec<String> = self.headers[id.0]
			.entries
			.iter()
			.map(|(n, _)| n.clone())
			.collect();
		for name in names {
			self.ensure_value(id, &name)?;
		}
		self.headers[id.0].lazy = false;
		Ok(())
	}

	/// All entries in insertion order, fully materialized.
	pub fn headers_entries(&mut self, id: HeadersId) -> Result<Vec<(String, String)>, GeataError> {
		self.headers_delazify(id)?;
		Ok(self.headers[id.0]
			.entries
			.iter()
			.map(|(n, slot)| {
				let value = match slot {
					HeaderSlot::Value(v) => v.clone(),
					HeaderSlot::Unfetched => String::new(),
				};
				(n.clone(), value)
			})
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::memory::MemoryHost;
	use crate::host::HostCalls;

	fn runtime_with(host: MemoryHost) -> Runtime {
		Runtime::new(Box::new(host))
	}

	#[test]
	fn names_are_lowercased_and_values_trimmed() {
		let mut rt = runtime_with(MemoryHost::new());
		let h = rt.headers_standalone(&[]).unwrap();
		rt.headers_append(h, "X-Custom-THING", "  padded\t").unwrap();
		assert_eq!(
			rt.headers_get(h, "x-custom-thing").unwrap(),
			Some("padded".to_string())
		);
		assert_eq!(rt.headers_entries(h).unwrap(), [("x-custom-thing".into(), "padded".into())]);
	}

	#[test]
	fn append_combines_with_comma_space() {
		let mut rt = runtime_with(MemoryHost::new());
		let h = rt.headers_standalone(&[("accept", "text/html")]).unwrap();
		rt.headers_append(h, "Accept", "application/json").unwrap();
		assert_eq!(
			rt.headers_get(h, "accept").unwrap(),
			Some("text/html, application/json".to_string())
		);
	}

	#[test]
	fn invalid_names_and_values_are_rejected() {
		let mut rt = runtime_with(MemoryHost::new());
		let h = rt.headers_standalone(&[]).unwrap();
		assert!(rt.headers_append(h, "", "x").is_err());
		assert!(rt.headers_append(h, "bad name", "x").is_err());
		assert!(rt.headers_append(h, "ok", "bad\r\nvalue").is_err());
		assert!(rt.headers_append(h, "ok", "bad\0value").is_err());
	}

	#[test]
	fn set_replaces_and_delete_removes() {
		let mut rt = runtime_with(MemoryHost::new());
		let h = rt.headers_standalone(&[("a", "1"), ("b", "2")]).unwrap();
		rt.headers_set(h, "a", "replaced").unwrap();
		rt.headers_delete(h, "b").unwrap();
		assert_eq!(rt.headers_entries(h).unwrap(), [("a".into(), "replaced".into())]);
	}

	#[test]
	fn lazy_response_headers_fetch_on_first_get() {
		let host = MemoryHost::new();
		let mut rt = runtime_with(host.clone());
		let resp = {
			let mut boxed = host.clone();
			let resp = boxed.resp_new().unwrap();
			boxed.resp_header_append(resp, "Foo", "a").unwrap();
			boxed.resp_header_append(resp, "Foo", "b").unwrap();
			resp
		};
		let h = rt
			.headers_create(HeadersMode::ProxyToResponse(resp), true, &[])
			.unwrap();
		assert_eq!(rt.headers_get(h, "FOO").unwrap(), Some("a, b".to_string()));
		let entries = rt.headers_entries(h).unwrap();
		assert_eq!(entries, [("foo".into(), "a, b".into())]);
	}

	#[test]
	fn proxy_mutations_round_trip_through_the_host() {
		let host = MemoryHost::new();
		let mut rt = runtime_with(host.clone());
		let req = {
			let mut boxed = host.clone();
			boxed.req_new().unwrap()
		};
		let h = rt
			.headers_create(HeadersMode::ProxyToRequest(req), false, &[])
			.unwrap();
		rt.headers_append(h, "One", "1").unwrap();
		rt.headers_append(h, "Two", "2").unwrap();
		rt.headers_append(h, "two", "22").unwrap();
		rt.headers_set(h, "One", "one").unwrap();
		rt.headers_delete(h, "missing").unwrap();

		let host_names = rt.io.header_names(HttpHandle::Req(req)).unwrap();
		let entries = rt.headers_entries(h).unwrap();
		let local_names: Vec<String> = entries.iter().map(|(n, _)| n.clone()).collect();
		let mut host_sorted = host_names.clone();
		host_sorted.sort();
		let mut local_sorted = local_names.clone();
		local_sorted.sort();
		assert_eq!(host_sorted, local_sorted);
		assert_eq!(
			rt.headers_get(h, "two").unwrap(),
			Some("2, 22".to_string())
		);
	}
}
