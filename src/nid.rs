use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::str::FromStr;
use std::{fmt::Display, ops::Deref};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct NoteId(String);

impl Display for NoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(NoteId(s.to_string()))
    }
}

impl Deref for NoteId {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for NoteId {
    fn from(fr: &str) -> Self {
        NoteId(fr.to_string())
    }
}

impl From<String> for NoteId {
    fn from(fr: String) -> Self {
        NoteId(fr)
    }
}

impl From<NoteId> for String {
    fn from(fr: NoteId) -> Self {
        fr.0
    }
}

impl NoteId {
    #[inline]
    pub fn new() -> NoteId {
        NoteId(Uuid::new_v4().to_string())
    }
}

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}
