//! gsync-directory
//!
//! Directory side of the sync: who is a member of a group, transitively.
//!
//! This crate owns the directory client boundary ([`DirectoryApi`]), how a
//! client is obtained ([`DirectoryConnector`]), the Google Admin Directory
//! implementation of both, and [`GroupResolver`], which expands nested groups
//! into a flat set of member emails.
//! It knows nothing about Grafana.

pub mod google;
mod resolver;

use std::fmt;
use std::sync::Arc;

pub use resolver::GroupResolver;

// ---------------------------------------------------------------------------
// Members
// ---------------------------------------------------------------------------

/// Kind of a group member as reported by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    User,
    Group,
    /// Anything else (e.g. `CUSTOMER`). Treated like a user.
    Other,
}

impl MemberKind {
    /// Google reports `USER | GROUP | CUSTOMER`.
    pub fn from_directory_type(t: &str) -> Self {
        match t {
            "USER" => MemberKind::User,
            "GROUP" => MemberKind::Group,
            _ => MemberKind::Other,
        }
    }
}

/// One entry of a group listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryMember {
    /// `None` for members the directory lists without an address.
    pub email: Option<String>,
    pub kind: MemberKind,
}

impl DirectoryMember {
    pub fn user(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            kind: MemberKind::User,
        }
    }

    pub fn group(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            kind: MemberKind::Group,
        }
    }
}

/// One page of a group listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberPage {
    pub members: Vec<DirectoryMember>,
    pub next_page_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a [`DirectoryApi`] or [`DirectoryConnector`] may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Credentials file missing, unreadable or invalid.
    Config(String),
    /// Token exchange failed.
    Auth(String),
    /// Network or transport failure.
    Transport(String),
    /// The directory answered with a non-success status.
    Api { status: u16, message: String },
    /// A response payload could not be decoded.
    Decode(String),
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryError::Config(msg) => write!(f, "directory config error: {msg}"),
            DirectoryError::Auth(msg) => write!(f, "directory auth error: {msg}"),
            DirectoryError::Transport(msg) => write!(f, "directory transport error: {msg}"),
            DirectoryError::Api { status, message } => {
                write!(f, "directory api error status={status}: {message}")
            }
            DirectoryError::Decode(msg) => write!(f, "directory decode error: {msg}"),
        }
    }
}

impl std::error::Error for DirectoryError {}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

// ---------------------------------------------------------------------------
// Boundary traits
// ---------------------------------------------------------------------------

/// A connected directory client.
///
/// Implementations list exactly one page per call; [`GroupResolver`] drives
/// pagination and nesting.
#[async_trait::async_trait]
pub trait DirectoryApi: Send + Sync {
    async fn list_members_page(
        &self,
        group_key: &str,
        page_token: Option<&str>,
    ) -> DirectoryResult<MemberPage>;
}

/// Produces a connected [`DirectoryApi`].
///
/// Called lazily by [`GroupResolver`] on first use, and again after a failure.
#[async_trait::async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn connect(&self) -> DirectoryResult<Arc<dyn DirectoryApi>>;
}
