//! Macro for defining typed record ID types.

use crate::IdError;

/// Split and validate a `{prefix}_{ulid}` string, returning the ULID.
///
/// All prefixed ID types funnel through here so the parse rules (and
/// their error shapes) live in exactly one place.
pub fn parse_prefixed(expected_prefix: &'static str, raw: &str) -> Result<ulid::Ulid, IdError> {
    if raw.is_empty() {
        return Err(IdError::Empty);
    }

    let Some((prefix, ulid_str)) = raw.split_once('_') else {
        return Err(IdError::MissingSeparator);
    };

    if prefix != expected_prefix {
        return Err(IdError::InvalidPrefix {
            expected: expected_prefix,
            actual: prefix.to_string(),
        });
    }

    ulid_str
        .parse::<ulid::Ulid>()
        .map_err(|e| IdError::InvalidUlid(e.to_string()))
}

/// Define a typed record ID with canonical form `{prefix}_{ulid}`.
///
/// Parsing delegates to [`parse_prefixed`]; the generated type only
/// carries what the orchestrator actually uses:
/// - a `PREFIX` constant
/// - `new()` for a fresh ID and `ulid()` for the raw value
/// - `parse()` / `FromStr` with strict prefix checking
/// - `Display` in canonical form, and serde as the canonical string
///
/// # Example
///
/// ```ignore
/// define_id!(VmId, "vm");
///
/// let vm_id = VmId::new();
/// let parsed: VmId = "vm_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse()?;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        /// A typed ID for this resource type.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($crate::Ulid);

        impl $name {
            /// The prefix for this ID type.
            pub const PREFIX: &'static str = $prefix;

            /// Creates a new ID with a fresh ULID.
            #[must_use]
            pub fn new() -> Self {
                Self($crate::Ulid::new())
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn ulid(&self) -> $crate::Ulid {
                self.0
            }

            /// Parses an ID from its `{prefix}_{ulid}` form.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                $crate::parse_prefixed(Self::PREFIX, s).map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}_{}", Self::PREFIX, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}
