use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity the usage governor tracks independently. Chat platforms hand out
/// numeric ids, HTTP callers usually strings; both normalize to this.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallerId(pub String);

impl CallerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for CallerId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<u64> for CallerId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for CallerId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for CallerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::CallerId;

    #[test]
    fn numeric_and_string_ids_address_the_same_caller() {
        assert_eq!(CallerId::from(42_i64), CallerId::from("42"));
        assert_eq!(CallerId::from(7_u64).to_string(), "7");
    }
}
