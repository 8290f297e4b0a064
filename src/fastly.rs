//! State and operations of the guest-visible `fastly` namespace.

use url::Url;

use crate::engine::Value;
use crate::error::{GeataError, GeataErrorKind};
use crate::runtime::Runtime;

#[derive(Default)]
pub(crate) struct FastlyState {
	/// Defaults to the origin of the downstream request's URL.
	pub(crate) base_url: Option<Url>,
	pub(crate) default_backend: Option<String>,
	pub(crate) debug_logging: bool,
}

impl Runtime {
	pub fn base_url(&self) -> Option<&Url> {
		self.fastly.base_url.as_ref()
	}

	pub fn set_base_url(&mut self, url: Url) {
		self.fastly.base_url = Some(url);
	}

	pub fn default_backend(&self) -> Option<&str> {
		self.fastly.default_backend.as_deref()
	}

	pub fn set_default_backend(&mut self, name: &str) {
		self.fastly.default_backend = Some(name.to_string());
	}

	pub fn enable_debug_logging(&mut self, enabled: bool) {
		self.fastly.debug_logging = enabled;
	}

	/// `fastly.env.get`.
	pub fn env_get(&self, name: &str) -> Option<String> {
		std::env::var(name).ok()
	}

	/// `fastly.includeBytes`: read a file into memory. Permitted only
	/// during initialization, before any fetch event exists.
	pub fn include_bytes(&self, path: &str) -> Result<Vec<u8>, GeataError> {
		if self.event.is_some() {
			return Err(GeataError::new(
				GeataErrorKind::InitializationOnly,
				Some("fastly.includeBytes is only available during initialization"),
			));
		}
		std::fs::read(path).map_err(|err| {
			GeataError::new(
				GeataErrorKind::Generic,
				Some(format!("includeBytes failed for {path}: {err}")),
			)
		})
	}

	/// `fastly.dump`: debug-print a guest value to stderr.
	pub fn dump(&self, value: &Value) {
		eprintln!("{value:#?}");
	}
}
