//! Strongly-typed identifiers used across the domain.

/// Define a UUID-backed identifier newtype.
///
/// Crates invoking this macro must depend on `serde` (derive feature).
///
/// Uses UUIDv7 (time-ordered) for `new()`. Prefer passing IDs explicitly in tests
/// for determinism.
#[macro_export]
macro_rules! define_id {
    ($(#[$meta:meta])* $t:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Copy,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $t($crate::__uuid::Uuid);

        impl $t {
            pub fn new() -> Self {
                Self($crate::__uuid::Uuid::now_v7())
            }

            pub fn from_uuid(uuid: $crate::__uuid::Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &$crate::__uuid::Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$crate::__uuid::Uuid> for $t {
            fn from(value: $crate::__uuid::Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for $crate::__uuid::Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl core::str::FromStr for $t {
            type Err = $crate::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = <$crate::__uuid::Uuid as core::str::FromStr>::from_str(s)
                    .map_err(|e| $crate::DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

define_id!(
    /// Identifier of a company (multi-tenant partition key).
    CompanyId,
    "CompanyId"
);

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;

    #[test]
    fn parses_and_displays_round_trip() {
        let id = CompanyId::new();
        let parsed = CompanyId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn invalid_uuid_is_an_invalid_id_error() {
        let err = CompanyId::from_str("not-a-uuid").unwrap_err();
        match err {
            crate::DomainError::InvalidId(msg) => assert!(msg.starts_with("CompanyId")),
            other => panic!("expected InvalidId, got {other:?}"),
        }
    }
}
