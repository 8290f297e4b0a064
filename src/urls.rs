//! URL plumbing. Parsing is the `url` crate's job; this adds base-URL
//! resolution against `fastly.baseURL` and the URLSearchParams surface.

use std::fmt::{self, Display};

use url::form_urlencoded;
use url::Url;

use crate::error::{GeataError, GeataErrorKind};
use crate::runtime::Runtime;

impl Runtime {
	/// Parse `input`, resolving relative references against
	/// `fastly.baseURL` when one is set.
	pub fn resolve_url(&self, input: &str) -> Result<Url, GeataError> {
		Url::options()
			.base_url(self.fastly.base_url.as_ref())
			.parse(input)
			.map_err(|_| {
				GeataError::new(
					GeataErrorKind::InvalidUrl,
					Some(format!("invalid URL: {input}")),
				)
			})
	}
}

/// An ordered name/value list with the URLSearchParams operations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UrlSearchParams {
	pairs: Vec<(String, String)>,
}

impl UrlSearchParams {
	pub fn new() -> Self {
		Self::default()
	}

	/// Parse an `application/x-www-form-urlencoded` string; a leading `?`
	/// is ignored.
	pub fn parse(init: &str) -> Self {
		let init = init.strip_prefix('?').unwrap_or(init);
		Self {
			pairs: form_urlencoded::parse(init.as_bytes())
				.into_owned()
				.collect(),
		}
	}

	pub fn from_url(url: &Url) -> Self {
		Self {
			pairs: url.query_pairs().into_owned().collect(),
		}
	}

	pub fn append(&mut self, name: &str, value: &str) {
		self.pairs.push((name.to_string(), value.to_string()));
	}

	/// Replace the first occurrence and drop the rest, or append.
	pub fn set(&mut self, name: &str, value: &str) {
		match self.pairs.iter().position(|(n, _)| n == name) {
			Some(first) => {
				self.pairs[first].1 = value.to_string();
				let mut i = first + 1;
				while i < self.pairs.len() {
					if self.pairs[i].0 == name {
						self.pairs.remove(i);
					} else {
						i += 1;
					}
				}
			}
			None => self.append(name, value),
		}
	}

	pub fn delete(&mut self, name: &str) {
		self.pairs.retain(|(n, _)| n != name);
	}

	pub fn get(&self, name: &str) -> Option<&str> {
		self.pairs
			.iter()
			.find(|(n, _)| n == name)
			.map(|(_, v)| v.as_str())
	}

	pub fn get_all(&self, name: &str) -> Vec<&str> {
		self.pairs
			.iter()
			.filter(|(n, _)| n == name)
			.map(|(_, v)| v.as_str())
			.collect()
	}

	pub fn has(&self, name: &str) -> bool {
		self.pairs.iter().any(|(n, _)| n == name)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.pairs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
	}
}

impl Display for UrlSearchParams {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut serializer = form_urlencoded::Serializer::new(String::new());
		for (name, value) in &self.pairs {
			serializer.append_pair(name, value);
		}
		f.write_str(&serializer.finish())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::memory::MemoryHost;

	#[test]
	fn parse_and_serialize_round_trip() {
		let params = UrlSearchParams::parse("?a=1&b=two&a=3");
		assert_eq!(params.get("a"), Some("1"));
		assert_eq!(params.get_all("a"), ["1", "3"]);
		assert_eq!(params.to_string(), "a=1&b=two&a=3");
	}

	#[test]
	fn set_replaces_every_occurrence_with_one() {
		let mut params = UrlSearchParams::parse("a=1&b=2&a=3");
		params.set("a", "only");
		assert_eq!(params.to_string(), "a=only&b=2");
		params.set("c", "new");
		assert_eq!(params.get("c"), Some("new"));
	}

	#[test]
	fn relative_urls_resolve_against_the_base() {
		let mut rt = Runtime::new(Box::new(MemoryHost::new()));
		assert!(rt.resolve_url("/echo").is_err());
		rt.set_base_url(Url::parse("https://edge.example/").unwrap());
		assert_eq!(
			rt.resolve_url("/echo").unwrap().as_str(),
			"https://edge.example/echo"
		);
		assert_eq!(
			rt.resolve_url("https://other.example/x").unwrap().as_str(),
			"https://other.example/x"
		);
	}
}
