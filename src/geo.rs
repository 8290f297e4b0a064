//! Geolocation lookups: address octets in, JSON out.

use std::net::IpAddr;

use crate::error::{GeataError, GeataErrorKind};
use crate::runtime::Runtime;

impl Runtime {
	/// `fastly.getGeolocationForIpAddress(address)`. Only available while
	/// handling a request.
	pub fn get_geolocation_for_ip_address(
		&mut self,
		address: &str,
	) -> Result<serde_json::Value, GeataError> {
		if self.event.is_none() {
			return Err(GeataError::new(
				GeataErrorKind::RequestHandlerOnly,
				Some("fastly.getGeolocationForIpAddress is only available while handling a request"),
			));
		}
		let ip: IpAddr = address.trim().parse().map_err(|_| {
			GeataError::new(
				GeataErrorKind::InvalidAddress,
				Some(format!("invalid address: {address}")),
			)
		})?;
		self.lookup_geo(ip)
	}

	pub(crate) fn lookup_geo(&mut self, ip: IpAddr) -> Result<serde_json::Value, GeataError> {
		let octets = match ip {
			IpAddr::V4(v4) => v4.octets().to_vec(),
			IpAddr::V6(v6) => v6.octets().to_vec(),
		};
		let json = self.io.geo_lookup(&octets)?;
		serde_json::from_str(&json).map_err(|err| {
			GeataError::new(GeataErrorKind::JsonParse, Some(err.to_string()))
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::memory::MemoryHost;

	#[test]
	fn lookup_parses_the_host_json() {
		let host = MemoryHost::new();
		host.set_downstream_request("GET", "https://example.test/", &[], b"");
		host.add_geo("203.0.113.7".parse().unwrap(), r#"{"country":"IE"}"#);
		let mut rt = Runtime::new(Box::new(host));
		rt.dispatch_fetch_event().unwrap();
		assert_eq!(
			rt.get_geolocation_for_ip_address("203.0.113.7").unwrap(),
			serde_json::json!({"country": "IE"})
		);
	}

	#[test]
	fn malformed_addresses_are_type_errors() {
		let host = MemoryHost::new();
		host.set_downstream_request("GET", "https://example.test/", &[], b"");
		let mut rt = Runtime::new(Box::new(host));
		rt.dispatch_fetch_event().unwrap();
		let err = rt.get_geolocation_for_ip_address("not-an-ip").unwrap_err();
		assert_eq!(err.kind, GeataErrorKind::InvalidAddress);
	}
}
