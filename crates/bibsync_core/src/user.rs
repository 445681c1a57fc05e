//! Remote users referenced by group library items.

/// A remote user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Remote user id.
    pub id: i64,
    /// Login name.
    pub username: String,
    /// Display name.
    pub name: String,
}
