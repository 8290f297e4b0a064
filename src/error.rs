use std::fmt::{self, Debug, Display};

use crate::host::HostError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeataErrorKind {
	HostCall,
	InvalidHeader,
	InvalidMethod,
	InvalidUrl,
	InvalidCacheOverrideMode,
	InvalidCacheOverrideField,
	InvalidAddress,
	InvalidRandomBuffer,
	InvalidInit,
	BodyUsed,
	BodyStreamLocked,
	StreamClosed,
	StreamLocked,
	RespondOutsideDispatch,
	AlreadyResponded,
	InactiveEvent,
	InitializationOnly,
	RequestHandlerOnly,
	NoBackend,
	Network,
	JsonParse,
	Utf8Parse,
	Generic,
}

/// How an error surfaces inside the guest: as a `TypeError`, a
/// `SyntaxError`, or a plain `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestErrorType {
	TypeError,
	SyntaxError,
	GenericError,
}

impl GeataErrorKind {
	fn default_message(self) -> &'static str {
		match self {
			Self::HostCall => "host call failed",
			Self::InvalidHeader => "invalid header name or value",
			Self::InvalidMethod => "invalid HTTP method",
			Self::InvalidUrl => "invalid URL",
			Self::InvalidCacheOverrideMode => {
				"'mode' has to be \"none\", \"pass\", or \"override\""
			}
			Self::InvalidCacheOverrideField => {
				"can't set override fields on a CacheOverride object whose mode isn't \"override\""
			}
			Self::InvalidAddress => "invalid IP address",
			Self::InvalidRandomBuffer => {
				"getRandomValues: input must be an integer-typed array of at most 65536 bytes"
			}
			Self::InvalidInit => "invalid init object",
			Self::BodyUsed => "Body has already been consumed",
			Self::BodyStreamLocked => {
				"respondWith called with a Response containing a body stream that's locked or disturbed"
			}
			Self::StreamClosed => "stream is closed or closing",
			Self::StreamLocked => "stream is already locked",
			Self::RespondOutsideDispatch => {
				"FetchEvent#respondWith must be called synchronously from within a FetchEvent handler"
			}
			Self::AlreadyResponded => {
				"FetchEvent#respondWith can't be called twice on the same event"
			}
			Self::InactiveEvent => "FetchEvent#waitUntil called on inactive event",
			Self::InitializationOnly => "only available during initialization",
			Self::RequestHandlerOnly => "only available while handling a request",
			Self::NoBackend => "no backend specified",
			Self::Network => "NetworkError when attempting to fetch resource.",
			Self::JsonParse => "invalid json in body",
			Self::Utf8Parse => "invalid utf-8 in body",
			Self::Generic => "runtime error",
		}
	}

	pub fn guest_type(self) -> GuestErrorType {
		match self {
			Self::InvalidHeader
			| Self::InvalidMethod
			| Self::InvalidUrl
			| Self::InvalidCacheOverrideMode
			| Self::InvalidCacheOverrideField
			| Self::InvalidAddress
			| Self::InvalidRandomBuffer
			| Self::InvalidInit
			| Self::BodyUsed
			| Self::BodyStreamLocked
			| Self::StreamClosed
			| Self::StreamLocked => GuestErrorType::TypeError,
			Self::JsonParse | Self::Utf8Parse => GuestErrorType::SyntaxError,
			_ => GuestErrorType::GenericError,
		}
	}
}

impl From<GeataErrorKind> for GeataError {
	fn from(kind: GeataErrorKind) -> Self {
		Self {
			kind,
			message: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeataError {
	pub kind: GeataErrorKind,
	pub message: Option<String>,
}

impl GeataError {
	pub fn new(kind: GeataErrorKind, message: Option<impl Into<String>>) -> Self {
		Self {
			kind,
			message: message.map(|m| m.into()),
		}
	}

	// we make this explicit instead of adding a From<> so that a host error
	// can't lose the name of the call it came from by accident
	pub fn hostcall(call: &'static str, err: HostError) -> Self {
		Self {
			kind: GeataErrorKind::HostCall,
			message: Some(format!("{call}: {err}")),
		}
	}

	pub fn message(&self) -> &str {
		self.message
			.as_deref()
			.unwrap_or_else(|| self.kind.default_message())
	}
}

impl Display for GeataError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}: {}", self.kind, self.message())
	}
}

impl std::error::Error for GeataError {}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn network_error_message_is_verbatim() {
		let err = GeataError::from(GeataErrorKind::Network);
		assert_eq!(err.message(), "NetworkError when attempting to fetch resource.");
	}

	#[test]
	fn hostcall_errors_carry_call_and_code() {
		let err = GeataError::hostcall("body_read", HostError::HttpParse);
		assert_eq!(err.kind, GeataErrorKind::HostCall);
		let msg = err.message().to_string();
		assert!(msg.contains("body_read"), "{msg}");
		assert!(msg.contains('7'), "{msg}");
	}

	#[test]
	fn validation_errors_are_type_errors() {
		assert_eq!(
			GeataErrorKind::InvalidHeader.guest_type(),
			GuestErrorType::TypeError
		);
		assert_eq!(
			GeataErrorKind::JsonParse.guest_type(),
			GuestErrorType::SyntaxError
		);
		assert_eq!(
			GeataErrorKind::Network.guest_type(),
			GuestErrorType::GenericError
		);
	}
}
