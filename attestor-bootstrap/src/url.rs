use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::str::FromStr;

use serde::de::{Error, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::ParseError;

/// A url that knows whether it may be written to logs.
///
/// Adapter urls frequently embed api keys, so they are parsed as sensitive and render as
/// `[REDACTED]` in both `Display` and `Debug` output. The raw value stays reachable through
/// `Deref` for the places that actually need it, e.g. rendering an instance config.
#[derive(Hash, PartialEq, Eq, Clone)]
pub struct Url {
    inner: url::Url,
    is_sensitive: bool,
}

impl Deref for Url {
    type Target = url::Url;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Url {
    fn new(url: url::Url, is_sensitive: bool) -> Self {
        Self {
            inner: url,
            is_sensitive,
        }
    }

    pub fn new_sensitive(s: &str) -> Result<Self, ParseError> {
        url::Url::parse(s).map(|url| Self::new(url, true))
    }

    pub fn new_non_sensitive(s: &str) -> Result<Self, ParseError> {
        url::Url::parse(s).map(|url| Self::new(url, false))
    }

    pub fn is_sensitive(&self) -> bool {
        self.is_sensitive
    }

    pub fn deserialize_sensitive<'de, D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_string(UrlVisitor { is_sensitive: true })
    }

    /// Appends `path` to the url, keeping its sensitivity.
    pub fn join(&self, path: &str) -> Result<Self, ParseError> {
        self.inner
            .join(path)
            .map(|url| Self::new(url, self.is_sensitive))
    }
}

impl FromStr for Url {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new_non_sensitive(s)
    }
}

impl Serialize for Url {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.inner.as_str())
    }
}

impl<'de> Deserialize<'de> for Url {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_string(UrlVisitor {
            is_sensitive: false,
        })
    }
}

impl Display for Url {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_sensitive {
            f.write_str("[REDACTED]")
        } else {
            f.write_str(self.inner.as_str())
        }
    }
}

impl Debug for Url {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

struct UrlVisitor {
    is_sensitive: bool,
}

impl Visitor<'_> for UrlVisitor {
    type Value = Url;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a well-formed url string")
    }

    fn visit_str<E>(self, url: &str) -> Result<Self::Value, E>
    where
        E: Error,
    {
        url::Url::parse(url)
            .map(|url| Url::new(url, self.is_sensitive))
            .map_err(|err| E::custom(err.to_string()))
    }
}
