//! Custom serde converters for persisted definitions.

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::fmt;

/// Accepts either a single string or a list of strings.
///
/// Older definition files carried one `map` string instead of the `maps` list.
pub fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Missing(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) if value.trim().is_empty() => Vec::new(),
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
        OneOrMany::Missing(()) => Vec::new(),
    })
}

/// Visitor for enums persisted either by name or by their legacy numeric code.
pub(crate) struct NameOrCode<T> {
    pub expecting: &'static str,
    pub from_name: fn(&str) -> Option<T>,
    pub from_code: fn(u64) -> Option<T>,
}

impl<'de, T> Visitor<'de> for NameOrCode<T> {
    type Value = T;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.expecting)
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<T, E> {
        (self.from_name)(value)
            .ok_or_else(|| E::custom(format!("unknown {}: {value}", self.expecting)))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<T, E> {
        (self.from_code)(value)
            .ok_or_else(|| E::custom(format!("unknown {} code: {value}", self.expecting)))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<T, E> {
        let code = u64::try_from(value)
            .map_err(|_| E::custom(format!("negative {} code: {value}", self.expecting)))?;
        self.visit_u64(code)
    }
}
