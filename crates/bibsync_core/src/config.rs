//! Store configuration.

/// Configuration for the object store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether re-parenting a collection is checked for cycles.
    ///
    /// Disabling this is only meant for loading trusted fixtures.
    pub check_collection_cycles: bool,

    /// Whether adding a child item to a collection is rejected.
    pub reject_child_collection_membership: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            check_collection_cycles: true,
            reject_child_collection_membership: true,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether collection re-parenting is checked for cycles.
    #[must_use]
    pub const fn check_collection_cycles(mut self, value: bool) -> Self {
        self.check_collection_cycles = value;
        self
    }

    /// Sets whether child items may be added to collections.
    #[must_use]
    pub const fn reject_child_collection_membership(mut self, value: bool) -> Self {
        self.reject_child_collection_membership = value;
        self
    }
}
