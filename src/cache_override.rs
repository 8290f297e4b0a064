//! CacheOverride: per-request caching directives, encoded into the host's
//! one-byte tag.

use std::str::FromStr;

use strum::{Display, EnumString};

use crate::error::{GeataError, GeataErrorKind};
use crate::host::{hostcall, HostIo, RequestHandle};

// Wire bits of the cache-override tag.
const TAG_PASS: u32 = 1 << 0;
const TAG_TTL: u32 = 1 << 1;
const TAG_SWR: u32 = 1 << 2;
const TAG_PCI: u32 = 1 << 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum CacheOverrideMode {
	None,
	Pass,
	Override,
}

/// If the mode isn't `Override`, all other fields are ignored, and setting
/// them fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOverride {
	mode: Option<CacheOverrideMode>,
	ttl: Option<u32>,
	swr: Option<u32>,
	surrogate_key: Option<String>,
	pci: Option<bool>,
}

impl CacheOverride {
	pub fn new(mode: CacheOverrideMode) -> Self {
		Self {
			mode: Some(mode),
			..Default::default()
		}
	}

	pub fn from_mode_str(mode: &str) -> Result<Self, GeataError> {
		let mode = CacheOverrideMode::from_str(mode).map_err(|_| {
			GeataError::new(
				GeataErrorKind::InvalidCacheOverrideMode,
				Some(format!(
					"'mode' has to be \"none\", \"pass\", or \"override\", but got {mode}"
				)),
			)
		})?;
		Ok(Self::new(mode))
	}

	pub fn mode(&self) -> CacheOverrideMode {
		self.mode.unwrap_or(CacheOverrideMode::None)
	}

	fn ensure_override(&self, field: &str) -> Result<(), GeataError> {
		if self.mode() == CacheOverrideMode::Override {
			return Ok(());
		}
		Err(GeataError::new(
			GeataErrorKind::InvalidCacheOverrideField,
			Some(format!(
				"can't set {field} on CacheOverride object whose mode isn't \"override\""
			)),
		))
	}

	pub fn ttl(&self) -> Option<u32> {
		match self.mode() {
			CacheOverrideMode::Override => self.ttl,
			_ => None,
		}
	}

	pub fn set_ttl(&mut self, ttl: Option<u32>) -> Result<(), GeataError> {
		self.ensure_override("a TTL")?;
		self.ttl = ttl;
		Ok(())
	}

	pub fn swr(&self) -> Option<u32> {
		match self.mode() {
			CacheOverrideMode::Override => self.swr,
			_ => None,
		}
	}

	pub fn set_swr(&mut self, swr: Option<u32>) -> Result<(), GeataError> {
		self.ensure_override("a stale-while-revalidate value")?;
		self.swr = swr;
		Ok(())
	}

	pub fn surrogate_key(&self) -> Option<&str> {
		match self.mode() {
			CacheOverrideMode::Override => self.surrogate_key.as_deref(),
			_ => None,
		}
	}

	pub fn set_surrogate_key(&mut self, key: Option<String>) -> Result<(), GeataError> {
		self.ensure_override("a surrogate key")?;
		self.surrogate_key = key;
		Ok(())
	}

	pub fn pci(&self) -> Option<bool> {
		match self.mode() {
			CacheOverrideMode::Override => self.pci,
			_ => None,
		}
	}

	pub fn set_pci(&mut self, pci: Option<bool>) -> Result<(), GeataError> {
		self.ensure_override("a PCI flag")?;
		self.pci = pci;
		Ok(())
	}

	fn tag(&self) -> u32 {
		match self.mode() {
			CacheOverrideMode::None => 0,
			CacheOverrideMode::Pass => TAG_PASS,
			CacheOverrideMode::Override => {
				let mut tag = 0;
				if self.ttl.is_some() {
					tag |= TAG_TTL;
				}
				if self.swr.is_some() {
					tag |= TAG_SWR;
				}
				if self.pci == Some(true) {
					tag |= TAG_PCI;
				}
				tag
			}
		}
	}

	pub(crate) fn apply(&self, io: &mut HostIo, req: RequestHandle) -> Result<(), GeataError> {
		hostcall!(
			io,
			req_cache_override_set(
				req,
				self.tag(),
				self.ttl.unwrap_or(0),
				self.swr.unwrap_or(0),
				self.surrogate_key(),
			)
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn mode_strings_parse_and_everything_else_fails() {
		assert_eq!(
			CacheOverride::from_mode_str("none").unwrap().mode(),
			CacheOverrideMode::None
		);
		assert_eq!(
			CacheOverride::from_mode_str("pass").unwrap().mode(),
			CacheOverrideMode::Pass
		);
		assert_eq!(
			CacheOverride::from_mode_str("override").unwrap().mode(),
			CacheOverrideMode::Override
		);
		let err = CacheOverride::from_mode_str("cache-harder").unwrap_err();
		assert_eq!(err.kind, GeataErrorKind::InvalidCacheOverrideMode);
	}

	#[test]
	fn tag_encodes_the_set_fields() {
		let mut o = CacheOverride::new(CacheOverrideMode::Override);
		assert_eq!(o.tag(), 0);
		o.set_ttl(Some(60)).unwrap();
		assert_eq!(o.tag(), TAG_TTL);
		o.set_swr(Some(10)).unwrap();
		assert_eq!(o.tag(), TAG_TTL | TAG_SWR);
		o.set_pci(Some(true)).unwrap();
		assert_eq!(o.tag(), TAG_TTL | TAG_SWR | TAG_PCI);
		o.set_pci(Some(false)).unwrap();
		assert_eq!(o.tag(), TAG_TTL | TAG_SWR);
	}

	#[test]
	fn pass_and_none_have_fixed_tags() {
		assert_eq!(CacheOverride::new(CacheOverrideMode::Pass).tag(), TAG_PASS);
		assert_eq!(CacheOverride::new(CacheOverrideMode::None).tag(), 0);
	}

	#[test]
	fn override_fields_require_override_mode() {
		let mut o = CacheOverride::new(CacheOverrideMode::Pass);
		assert!(o.set_ttl(Some(60)).is_err());
		assert!(o.set_swr(Some(10)).is_err());
		assert!(o.set_surrogate_key(Some("key".into())).is_err());
		assert!(o.set_pci(Some(true)).is_err());
		assert_eq!(o.ttl(), None);
	}
}
