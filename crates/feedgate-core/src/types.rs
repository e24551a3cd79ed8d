//! Strong type definitions for feedgate.
//!
//! Subjects and resources are newtypes so a resource id can never be passed
//! where a subject id is expected. Both are embedded in `/`-delimited counter
//! keys, so neither may contain `/`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Opaque credential presented by a caller.
///
/// The only validation is that it is non-empty. `Debug` shows a short
/// prefix so credentials do not end up whole in logs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    /// Parse a credential from an optional header value.
    ///
    /// Absent and empty values are both `CredentialMissing`.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw {
            Some(value) if !value.is_empty() => Ok(Self(value.to_string())),
            _ => Err(CoreError::CredentialMissing),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The subject this credential identifies.
    ///
    /// Fails when the credential cannot be embedded in a counter key.
    pub fn subject(&self) -> Result<SubjectId> {
        SubjectId::new(self.0.clone())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown: String = self.0.chars().take(4).collect();
        write!(f, "Credential({}…)", shown)
    }
}

fn validate_segment(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CoreError::InvalidIdentifier {
            value: value.to_string(),
            reason: "empty",
        });
    }
    if value.contains('/') {
        return Err(CoreError::InvalidIdentifier {
            value: value.to_string(),
            reason: "contains '/'",
        });
    }
    Ok(())
}

macro_rules! key_segment_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create an identifier, rejecting empty values and values containing `/`.
            pub fn new(value: impl Into<String>) -> Result<Self> {
                let value = value.into();
                validate_segment(&value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = CoreError;

            fn try_from(value: String) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

key_segment_id!(
    /// Identity of an authenticated caller. Equal to the credential text.
    SubjectId
);

key_segment_id!(
    /// Identifier of a content item (a news article).
    ResourceId
);
