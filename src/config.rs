use std::collections::HashSet;

/// Per-connection compiler settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    /// Treat missing columns and collections as migration errors instead of nulls.
    pub enforce_schema: bool,
    /// Collections known to exist. Refreshed from the store on a miss.
    pub cached_collections: HashSet<String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enforce_schema(enforce_schema: bool) -> Self {
        Self {
            enforce_schema,
            ..Self::default()
        }
    }

    pub fn with_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cached_collections.extend(collections.into_iter().map(Into::into));
        self
    }
}
