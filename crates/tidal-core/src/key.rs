//! Record keys and collection membership

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix that marks a key as a collection prefix (e.g. `report_`)
pub const COLLECTION_SUFFIX: char = '_';

/// Address of one record in the store
///
/// A key ending in `_` names a collection; every longer key sharing that
/// prefix is a member (`report_` owns `report_42`). Any other key is scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Key(String);

impl Key {
    /// Create a key, rejecting empty strings, whitespace and control characters
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() || key.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::InvalidKey(key));
        }
        Ok(Self(key))
    }

    /// Build the key of one member of a collection (`report_` + `42`)
    pub fn member(collection: &Key, id: impl fmt::Display) -> Result<Self> {
        if !collection.is_collection() {
            return Err(Error::InvalidKey(collection.0.clone()));
        }
        Key::new(format!("{}{}", collection.0, id))
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether this key names a collection
    pub fn is_collection(&self) -> bool {
        self.0.ends_with(COLLECTION_SUFFIX)
    }

    /// Check whether this key is a member of `collection`
    pub fn is_member_of(&self, collection: &Key) -> bool {
        collection.is_collection()
            && self.0.len() > collection.0.len()
            && self.0.starts_with(&collection.0)
    }

    /// The member id part of this key, relative to `collection`
    pub fn member_id<'a>(&'a self, collection: &Key) -> Option<&'a str> {
        if self.is_member_of(collection) {
            Some(&self.0[collection.0.len()..])
        } else {
            None
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Key {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Key::new(value)
    }
}

impl TryFrom<&str> for Key {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Key::new(value)
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.0
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
