use serde::{Deserialize, Serialize};

pub const DEFAULT_NAMESPACE: &str = "default";

/// Identifies a changefeed within the capture cluster.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeFeedId {
    pub namespace: String,
    pub id: String,
}

impl ChangeFeedId {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    pub fn with_default_namespace(id: impl Into<String>) -> Self {
        Self::new(DEFAULT_NAMESPACE, id)
    }
}

impl std::fmt::Display for ChangeFeedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.id)
    }
}

impl std::str::FromStr for ChangeFeedId {
    type Err = std::convert::Infallible;

    /// Accepts `namespace/id`, or a bare `id` in the default namespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.split_once('/') {
            Some((namespace, id)) => ChangeFeedId::new(namespace, id),
            None => ChangeFeedId::with_default_namespace(s),
        })
    }
}
