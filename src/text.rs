//! TextEncoder / TextDecoder, UTF-8 only.

use bytes::Bytes;

#[derive(Debug, Default, Clone, Copy)]
pub struct TextEncoder;

impl TextEncoder {
	pub fn new() -> Self {
		Self
	}

	pub fn encoding(&self) -> &'static str {
		"utf-8"
	}

	pub fn encode(&self, input: &str) -> Bytes {
		Bytes::copy_from_slice(input.as_bytes())
	}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TextDecoder;

impl TextDecoder {
	pub fn new() -> Self {
		Self
	}

	pub fn encoding(&self) -> &'static str {
		"utf-8"
	}

	/// Invalid sequences decode to U+FFFD, like the platform decoder.
	pub fn decode(&self, bytes: &[u8]) -> String {
		String::from_utf8_lossy(bytes).into_owned()
	}
}
