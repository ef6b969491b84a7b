//! Conversion between bus subscriber addresses and WhatsApp JIDs.
//!
//! The bus addresses subscribers as `+27011112222`; the protocol addresses the
//! same subscriber as `27011112222@s.whatsapp.net`. Both directions are pure.

/// Prefix character carried by bus subscriber addresses.
pub const SUBSCRIBER_PREFIX: char = '+';

/// Default domain suffix for individual WhatsApp accounts.
pub const DEFAULT_DOMAIN: &str = "s.whatsapp.net";

/// Errors from address normalisation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// The address is empty, or empty once the prefix was stripped.
    #[error("invalid address {address:?}: empty after stripping prefix")]
    Empty {
        /// The address as supplied.
        address: String,
    },

    /// The protocol address does not end in the expected domain.
    #[error("invalid address {address:?}: missing @{domain} suffix")]
    MissingSuffix {
        /// The address as supplied.
        address: String,
        /// The domain that was expected.
        domain: String,
    },
}

/// Convert a bus subscriber address into a protocol address.
///
/// A single leading `+` is stripped and `@{domain}` is appended.
///
/// # Errors
///
/// Returns [`AddressError::Empty`] if nothing remains after stripping.
pub fn to_protocol_address(subscriber: &str, domain: &str) -> Result<String, AddressError> {
    let local = subscriber.trim();
    let local = local.strip_prefix(SUBSCRIBER_PREFIX).unwrap_or(local);
    if local.is_empty() {
        return Err(AddressError::Empty {
            address: subscriber.to_owned(),
        });
    }
    Ok(format!("{local}@{domain}"))
}

/// Convert a protocol address back into a bus subscriber address.
///
/// # Errors
///
/// Returns [`AddressError::MissingSuffix`] when `@{domain}` is absent, and
/// [`AddressError::Empty`] when the local part is empty.
pub fn to_subscriber_address(protocol: &str, domain: &str) -> Result<String, AddressError> {
    let local = protocol
        .strip_suffix(domain)
        .and_then(|rest| rest.strip_suffix('@'))
        .ok_or_else(|| AddressError::MissingSuffix {
            address: protocol.to_owned(),
            domain: domain.to_owned(),
        })?;
    if local.is_empty() {
        return Err(AddressError::Empty {
            address: protocol.to_owned(),
        });
    }
    Ok(format!("{SUBSCRIBER_PREFIX}{local}"))
}

/// Address normaliser bound to a single protocol domain.
#[derive(Debug, Clone)]
pub struct AddressNormalizer {
    domain: String,
}

impl AddressNormalizer {
    /// Create a normaliser for the given domain.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }

    /// The domain suffix this normaliser appends.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// See [`to_protocol_address`].
    ///
    /// # Errors
    ///
    /// Propagates [`AddressError`] from the free function.
    pub fn to_protocol(&self, subscriber: &str) -> Result<String, AddressError> {
        to_protocol_address(subscriber, &self.domain)
    }

    /// See [`to_subscriber_address`].
    ///
    /// # Errors
    ///
    /// Propagates [`AddressError`] from the free function.
    pub fn to_subscriber(&self, protocol: &str) -> Result<String, AddressError> {
        to_subscriber_address(protocol, &self.domain)
    }
}

impl Default for AddressNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_DOMAIN)
    }
}
