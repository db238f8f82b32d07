use serde::{Deserialize, Serialize};

/// Destination address captured on an offer or order. Stored as JSON; never
/// interpreted by the settlement core beyond presence checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShippingAddress {
    pub full_name: String,
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl ShippingAddress {
    /// Name of the first required field that is blank, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("full_name", &self.full_name),
            ("line1", &self.line1),
            ("city", &self.city),
            ("state", &self.state),
            ("zip", &self.zip),
            ("country", &self.country),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> ShippingAddress {
        ShippingAddress {
            full_name: "Ada Buyer".into(),
            line1: "1 Main St".into(),
            line2: None,
            city: "Springfield".into(),
            state: "IL".into(),
            zip: "62701".into(),
            country: "US".into(),
            phone: None,
        }
    }

    #[test]
    fn complete_address_has_no_missing_field() {
        assert_eq!(address().missing_field(), None);
    }

    #[test]
    fn blank_city_is_reported() {
        let mut a = address();
        a.city = "  ".into();
        assert_eq!(a.missing_field(), Some("city"));
    }
}
