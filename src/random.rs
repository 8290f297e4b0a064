//! `crypto.getRandomValues`.

use crate::error::{GeataError, GeataErrorKind};
use crate::host::hostcall;
use crate::runtime::Runtime;

const MAX_BYTE_LENGTH: usize = 65536;

impl Runtime {
	/// Fill `buf` with random bytes from the host. Buffers above 65536
	/// bytes are rejected, as the Web Crypto API requires.
	pub fn get_random_values(&mut self, buf: &mut [u8]) -> Result<(), GeataError> {
		if buf.len() > MAX_BYTE_LENGTH {
			return Err(GeataError::new(
				GeataErrorKind::InvalidRandomBuffer,
				Some(format!(
					"getRandomValues: input byteLength must be at most {MAX_BYTE_LENGTH}, \
					 but is {}",
					buf.len()
				)),
			));
		}
		hostcall!(self.io, random_bytes(buf))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::memory::MemoryHost;

	#[test]
	fn fills_buffers_up_to_the_cap() {
		let mut rt = Runtime::new(Box::new(MemoryHost::new()));
		let mut buf = [0u8; 32];
		rt.get_random_values(&mut buf).unwrap();
		assert!(buf.iter().any(|b| *b != 0));

		let mut huge = vec![0u8; MAX_BYTE_LENGTH + 1];
		let err = rt.get_random_values(&mut huge).unwrap_err();
		assert_eq!(err.kind, GeataErrorKind::InvalidRandomBuffer);
	}
}
