use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DeliveryFailure;

/// Carrier table used when no overrides are configured.
const DEFAULT_GATEWAYS: &[(&str, &str)] = &[
    ("AT&T", "txt.att.net"),
    ("CRICKET", "mms.cricketwireless.net"),
    ("SPRINT", "pm.sprint.com"),
    ("TMOBILE", "tmomail.net"),
    ("VERIZON", "vtext.com"),
    ("VIRGIN", "vmobl.com"),
];

/// Normalized carrier key, e.g. `AT&T` or `VERIZON`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Carrier(String);

impl Carrier {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Carrier {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<Carrier> for String {
    fn from(value: Carrier) -> Self {
        value.0
    }
}

impl fmt::Display for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Carrier → email-to-SMS gateway domain. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayDirectory {
    entries: BTreeMap<Carrier, String>,
}

impl Default for GatewayDirectory {
    fn default() -> Self {
        Self::with_overrides(std::iter::empty::<(String, String)>())
    }
}

impl GatewayDirectory {
    /// Built-in table extended (or overridden) by `overrides`.
    pub fn with_overrides<I, K, V>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut entries: BTreeMap<Carrier, String> = DEFAULT_GATEWAYS
            .iter()
            .map(|(carrier, domain)| (Carrier::new(carrier), (*domain).to_string()))
            .collect();

        for (carrier, domain) in overrides {
            let carrier = Carrier::new(carrier.as_ref());
            let domain = domain.as_ref().trim().trim_start_matches('@');
            if carrier.is_empty() || domain.is_empty() {
                tracing::warn!(carrier = %carrier, "ignoring empty gateway override");
                continue;
            }
            entries.insert(carrier, domain.to_string());
        }

        Self { entries }
    }

    pub fn domain(&self, carrier: &Carrier) -> Option<&str> {
        self.entries.get(carrier).map(String::as_str)
    }

    pub fn contains(&self, carrier: &Carrier) -> bool {
        self.entries.contains_key(carrier)
    }

    pub fn carriers(&self) -> impl Iterator<Item = &Carrier> {
        self.entries.keys()
    }

    /// `phone_digits@gateway-domain` for the given carrier.
    pub fn resolve_sms_address(
        &self,
        phone_digits: &str,
        carrier: &Carrier,
    ) -> Result<String, DeliveryFailure> {
        let domain = self
            .domain(carrier)
            .ok_or_else(|| DeliveryFailure::UnknownGateway(carrier.to_string()))?;
        Ok(format!("{phone_digits}@{domain}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_carrier() {
        let gateways = GatewayDirectory::default();
        let addr = gateways
            .resolve_sms_address("5551234567", &Carrier::new("AT&T"))
            .expect("AT&T is built in");
        assert_eq!(addr, "5551234567@txt.att.net");
    }

    #[test]
    fn carrier_lookup_is_case_insensitive() {
        let gateways = GatewayDirectory::default();
        assert_eq!(gateways.domain(&Carrier::new(" verizon ")), Some("vtext.com"));
    }

    #[test]
    fn unknown_carrier_is_unknown_gateway() {
        let gateways = GatewayDirectory::default();
        let err = gateways
            .resolve_sms_address("5551234567", &Carrier::new("ACME"))
            .unwrap_err();
        assert_eq!(err, DeliveryFailure::UnknownGateway("ACME".into()));
    }

    #[test]
    fn overrides_extend_and_replace_defaults() {
        let gateways = GatewayDirectory::with_overrides([
            ("us-cellular", "@email.uscc.net"),
            ("TMOBILE", "tmo.example"),
            ("", "ignored.example"),
        ]);

        assert_eq!(gateways.domain(&Carrier::new("US-CELLULAR")), Some("email.uscc.net"));
        assert_eq!(gateways.domain(&Carrier::new("TMOBILE")), Some("tmo.example"));
        assert_eq!(gateways.carriers().count(), DEFAULT_GATEWAYS.len() + 1);
    }
}
