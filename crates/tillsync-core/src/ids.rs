use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// One pass of all four synchronizers.
branded_id!(PassId, "pass");
// Groups the audit entries written while syncing a single row.
branded_id!(TransactionId, "txn");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_id_has_prefix() {
        let id = PassId::new();
        assert!(id.as_str().starts_with("pass_"), "got: {id}");
    }

    #[test]
    fn transaction_id_has_prefix() {
        let id = TransactionId::new();
        assert!(id.as_str().starts_with("txn_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = PassId::from_raw("pass_fixed");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"pass_fixed\"");
    }

    #[test]
    fn transaction_ids_sort_by_creation() {
        let ids: Vec<TransactionId> = (0..50).map(|_| TransactionId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0].as_str() < w[1].as_str(), "not monotonic: {} >= {}", w[0], w[1]);
        }
    }
}
