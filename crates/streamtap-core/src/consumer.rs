use std::fmt;

use crate::error::{Error, Result};

/// Identity used for consumer-group reads: the group and the consumer within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerIdentity {
    group: String,
    name: String,
}

impl ConsumerIdentity {
    /// # Errors
    ///
    /// `InvalidConsumer` if either name is empty.
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let group = group.into();
        let name = name.into();

        if group.is_empty() {
            return Err(Error::InvalidConsumer("group name must not be empty".into()));
        }
        if name.is_empty() {
            return Err(Error::InvalidConsumer("consumer name must not be empty".into()));
        }

        Ok(Self { group, name })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ConsumerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.name)
    }
}
