//! Named log endpoints and the guest console.

use strum::Display;
use tracing::debug;

use crate::error::{GeataError, GeataErrorKind};
use crate::host::{hostcall, EndpointHandle};
use crate::runtime::Runtime;

pub struct Logger {
	endpoint: EndpointHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConsoleLevel {
	Log,
	Trace,
	Info,
	Warn,
	Error,
}

impl Runtime {
	/// `fastly.getLogger(name)`. Only available while handling a request.
	pub fn get_logger(&mut self, name: &str) -> Result<Logger, GeataError> {
		if self.event.is_none() {
			return Err(GeataError::new(
				GeataErrorKind::RequestHandlerOnly,
				Some("fastly.getLogger is only available while handling a request"),
			));
		}
		let endpoint = hostcall!(self.io, log_endpoint_get(name))?;
		Ok(Logger { endpoint })
	}

	/// `Logger#log`: one message to the endpoint.
	pub fn logger_log(&mut self, logger: &Logger, message: &str) -> Result<(), GeataError> {
		hostcall!(self.io, log_write(logger.endpoint, message.as_bytes()))?;
		Ok(())
	}

	/// `console.log` and friends: prefixed lines on stdout.
	pub fn console(&mut self, level: ConsoleLevel, message: &str) {
		println!("{level}: {message}");
		if self.fastly.debug_logging {
			debug!(%level, message, "console");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::memory::MemoryHost;

	#[test]
	fn logger_writes_reach_the_named_endpoint() {
		let host = MemoryHost::new();
		host.set_downstream_request("GET", "https://example.test/", &[], b"");
		let mut rt = Runtime::new(Box::new(host.clone()));
		rt.dispatch_fetch_event().unwrap();

		let logger = rt.get_logger("my-endpoint").unwrap();
		rt.logger_log(&logger, "first").unwrap();
		rt.logger_log(&logger, "second").unwrap();

		assert_eq!(
			host.log_lines(),
			[
				("my-endpoint".to_string(), "first".to_string()),
				("my-endpoint".to_string(), "second".to_string()),
			]
		);
	}

	#[test]
	fn loggers_are_request_phase_only() {
		let mut rt = Runtime::new(Box::new(MemoryHost::new()));
		assert!(rt.get_logger("nope").is_err());
	}
}
