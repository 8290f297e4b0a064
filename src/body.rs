//! Operations on host body handles.

use bytes::Bytes;

use crate::error::GeataError;
use crate::host::{hostcall, BodyHandle, BodyWriteEnd, HostIo};

/// Bodies are read in fixed-size chunks; the host tells us how much of each
/// chunk it filled.
pub(crate) const HANDLE_READ_CHUNK_SIZE: usize = 1024;

impl BodyHandle {
	/// Read a single chunk. An empty result means the body is finished.
	pub(crate) fn read_chunk(self, io: &mut HostIo) -> Result<Bytes, GeataError> {
		let mut buf = [0u8; HANDLE_READ_CHUNK_SIZE];
		let n = hostcall!(io, body_read(self, &mut buf))?;
		Ok(Bytes::copy_from_slice(&buf[..n]))
	}

	/// Read the whole body into one buffer.
	///
	/// With `read_until_zero` the loop only stops on a zero-length read;
	/// without it, a short read is taken as the end of what's currently
	/// available.
	pub(crate) fn read_all(
		self,
		io: &mut HostIo,
		read_until_zero: bool,
	) -> Result<Vec<u8>, GeataError> {
		let mut out = Vec::with_capacity(HANDLE_READ_CHUNK_SIZE);
		loop {
			let mut buf = [0u8; HANDLE_READ_CHUNK_SIZE];
			let n = hostcall!(io, body_read(self, &mut buf))?;
			out.extend_from_slice(&buf[..n]);
			if n == 0 || (!read_until_zero && n < HANDLE_READ_CHUNK_SIZE) {
				break;
			}
		}
		Ok(out)
	}

	/// Append bytes to the end of the body. The host doesn't necessarily
	/// accept all bytes in one call, so this loops until they're in.
	pub(crate) fn write_all(self, io: &mut HostIo, mut bytes: &[u8]) -> Result<(), GeataError> {
		while !bytes.is_empty() {
			let n = hostcall!(io, body_write(self, bytes, BodyWriteEnd::Back))?;
			bytes = &bytes[n.min(bytes.len())..];
		}
		Ok(())
	}

	/// Host-side splice of `other` onto the end of this body.
	pub(crate) fn append(self, io: &mut HostIo, other: BodyHandle) -> Result<(), GeataError> {
		hostcall!(io, body_append(self, other))
	}

	pub(crate) fn close(self, io: &mut HostIo) -> Result<(), GeataError> {
		hostcall!(io, body_close(self))
	}
}
