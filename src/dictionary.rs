//! Read-only dictionaries backed by host handles.

use crate::error::{GeataError, GeataErrorKind};
use crate::host::{hostcall, DictionaryHandle};
use crate::runtime::Runtime;

#[derive(Debug)]
pub struct Dictionary {
	handle: DictionaryHandle,
}

impl Runtime {
	/// `new Dictionary(name)`. Only available while handling a request.
	pub fn dictionary_open(&mut self, name: &str) -> Result<Dictionary, GeataError> {
		if self.event.is_none() {
			return Err(GeataError::new(
				GeataErrorKind::RequestHandlerOnly,
				Some("the Dictionary builtin is only available while handling a request"),
			));
		}
		let handle = hostcall!(self.io, dictionary_open(name))?;
		Ok(Dictionary { handle })
	}

	/// `Dictionary#get`: `None` when the key doesn't exist; every other
	/// host failure is an error.
	pub fn dictionary_get(
		&mut self,
		dictionary: &Dictionary,
		key: &str,
	) -> Result<Option<String>, GeataError> {
		self.io.dictionary_entry(dictionary.handle, key)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::memory::MemoryHost;

	fn request_phase_runtime(host: MemoryHost) -> Runtime {
		host.set_downstream_request("GET", "https://example.test/", &[], b"");
		let mut rt = Runtime::new(Box::new(host));
		rt.dispatch_fetch_event().unwrap();
		rt
	}

	#[test]
	fn missing_keys_are_null_not_errors() {
		let host = MemoryHost::new();
		host.add_dictionary("config", &[("greeting", "hello")]);
		let mut rt = request_phase_runtime(host);
		let dict = rt.dictionary_open("config").unwrap();
		assert_eq!(rt.dictionary_get(&dict, "nope").unwrap(), None);
		assert_eq!(
			rt.dictionary_get(&dict, "greeting").unwrap(),
			Some("hello".to_string())
		);
	}

	#[test]
	fn dictionaries_are_request_phase_only() {
		let mut rt = Runtime::new(Box::new(MemoryHost::new()));
		let err = rt.dictionary_open("config").unwrap_err();
		assert_eq!(err.kind, GeataErrorKind::RequestHandlerOnly);
	}
}
