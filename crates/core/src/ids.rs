use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Mints a fresh id (UUID v4), for handles needed before the
            /// server has answered.
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }
            /// Wraps an existing id string.
            pub fn from_str(s: impl Into<String>) -> Self {
                Self(s.into())
            }
            /// Borrows the raw id.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(UnitId, "Stable identifier of one content unit.");
id_newtype!(DocumentId, "Identifier of a document (an ordered unit collection).");
id_newtype!(JobId, "Identifier of one backend generation job.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = UnitId::new();
        let b = UnitId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_id_serializes_as_plain_string() {
        let id = JobId::from_str("job-123");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"job-123\"");
        let back: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
