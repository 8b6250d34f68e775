use std::fmt;
use std::str::FromStr;

use compact_str::CompactString;
use serde::{de, Deserialize, Deserializer, Serialize};

pub const MAX_IDENTITY_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityParseError {
    #[error("identity is empty")]
    Empty,
    #[error("identity is longer than 64 characters")]
    TooLong,
    #[error("invalid character {0:?} in identity")]
    InvalidCharacter(char),
}

/// Key of a connecting principal, such as an account name or UUID
///
/// Normalized on parse: surrounding whitespace is trimmed and ASCII letters
/// are lowercased. Only `a-z`, `0-9`, `.`, `_` and `-` are accepted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Identity(CompactString);

impl Identity {
    pub fn parse(input: &str) -> Result<Self, IdentityParseError> {
        let input = input.trim();

        if input.is_empty() {
            return Err(IdentityParseError::Empty);
        }
        if input.len() > MAX_IDENTITY_LEN {
            return Err(IdentityParseError::TooLong);
        }

        let mut identity = CompactString::with_capacity(input.len());

        for c in input.chars().map(|c| c.to_ascii_lowercase()) {
            match c {
                'a'..='z' | '0'..='9' | '.' | '_' | '-' => identity.push(c),
                c => return Err(IdentityParseError::InvalidCharacter(c)),
            }
        }

        Ok(Self(identity))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for Identity {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        Self::parse(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::*;

    #[test]
    fn test_parse_normalizes() {
        assert_eq!(Identity::parse("  Alice ").unwrap().as_str(), "alice");
        assert_eq!(
            Identity::parse("0F8FAD5B-D9CB-469F-A165-70867728950E")
                .unwrap()
                .as_str(),
            "0f8fad5b-d9cb-469f-a165-70867728950e"
        );
        assert_eq!(Identity::parse("bob_the.builder").unwrap().as_str(), "bob_the.builder");
    }

    #[test]
    fn test_parse_rejects() {
        assert_eq!(Identity::parse(""), Err(IdentityParseError::Empty));
        assert_eq!(Identity::parse(" \t "), Err(IdentityParseError::Empty));
        assert_eq!(
            Identity::parse(&"a".repeat(MAX_IDENTITY_LEN + 1)),
            Err(IdentityParseError::TooLong)
        );
        assert!(Identity::parse(&"a".repeat(MAX_IDENTITY_LEN)).is_ok());
        assert_eq!(
            Identity::parse("alice bob"),
            Err(IdentityParseError::InvalidCharacter(' '))
        );
        assert_eq!(
            Identity::parse("björn"),
            Err(IdentityParseError::InvalidCharacter('ö'))
        );
        assert_eq!(
            Identity::parse("#alice"),
            Err(IdentityParseError::InvalidCharacter('#'))
        );
    }

    #[test]
    fn test_deserialize() {
        let identities: Vec<Identity> = serde_json::from_str(r#"["Alice", "bob"]"#).unwrap();

        assert_eq!(identities[0].as_str(), "alice");
        assert_eq!(identities[1].as_str(), "bob");

        assert!(serde_json::from_str::<Vec<Identity>>(r#"["not valid"]"#).is_err());
    }

    #[quickcheck]
    fn quickcheck_parse_is_idempotent(input: String) -> bool {
        match Identity::parse(&input) {
            Ok(identity) => Identity::parse(identity.as_str()) == Ok(identity),
            Err(_) => true,
        }
    }
}
