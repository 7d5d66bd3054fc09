use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates the identifier from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// External payment session reference issued by the payment gateway.
    ///
    /// Doubles as the idempotency key for the commit path and as the
    /// uniqueness key of the order created from the session.
    SessionId
);

string_id!(
    /// Catalog product identifier.
    ProductId
);

string_id!(
    /// Identifier of the buyer owning a checkout session.
    UserId
);

/// Namespace under which order ids are derived from session references.
const ORDER_NAMESPACE: Uuid = Uuid::from_u128(0x6f1d_2c9a_4b3e_5d70_8a91_c4e2_7b0f_3d65);

/// Identifier of the order committed from a checkout session.
///
/// Derived from the session reference (UUID v5), so every commit attempt for
/// a session names the same order and a retried commit cannot mint a second
/// identity for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    /// The order id of the given checkout session.
    pub fn for_session(session_id: &SessionId) -> Self {
        Self(Uuid::new_v5(&ORDER_NAMESPACE, session_id.as_str().as_bytes()))
    }

    /// Rebuilds an order id read back from storage.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_id_is_stable_per_session() {
        let session = SessionId::new("cs_test_abc12345");
        assert_eq!(OrderId::for_session(&session), OrderId::for_session(&session));
        assert_ne!(
            OrderId::for_session(&session),
            OrderId::for_session(&SessionId::new("cs_test_xyz67890"))
        );
    }

    #[test]
    fn order_id_survives_a_storage_round_trip() {
        let id = OrderId::for_session(&SessionId::new("cs_test_abc12345"));
        assert_eq!(OrderId::from_uuid(id.as_uuid()), id);
    }

    #[test]
    fn session_id_serializes_as_plain_string() {
        let id = SessionId::new("cs_test_abc12345");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"cs_test_abc12345\"");
    }

    #[test]
    fn string_ids_display_their_value() {
        assert_eq!(ProductId::from("SKU-001").to_string(), "SKU-001");
        assert_eq!(UserId::new("user-1").as_str(), "user-1");
    }
}
