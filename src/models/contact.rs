//! Contact model: a citizen linked to zero or more demands.

use serde::{Deserialize, Serialize};

use super::GeoPoint;

/// Structured postal address.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub complement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub neighborhood: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub postal_code: Option<String>,
}

impl Address {
    /// Single-line form used as the geocoding cache key.
    pub fn one_line(&self) -> String {
        [
            &self.street,
            &self.number,
            &self.neighborhood,
            &self.city,
            &self.state,
            &self.postal_code,
        ]
        .into_iter()
        .filter_map(|part| part.as_deref())
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// A citizen registered with the office.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Address,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<GeoPoint>,
}

impl Contact {
    /// Phone comparison ignores formatting, e.g. "(11) 98765-4321" matches "11987654321".
    pub fn matches_phone(&self, phone: &str) -> bool {
        let wanted = digits(phone);
        if wanted.is_empty() {
            return false;
        }
        self.phone.as_deref().map(digits).is_some_and(|p| p == wanted)
    }

    /// Case-insensitive substring match on the name.
    pub fn matches_name(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        !query.is_empty() && self.name.to_lowercase().contains(&query)
    }
}

fn digits(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}
