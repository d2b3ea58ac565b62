//! Collaborators supplied by the embedding application.
//!
//! The coordinator knows nothing about where resources come from or what
//! indexing one means. A [`Lister`] produces the identifiers of every resource
//! of a type; an [`IndexTask`] indexes one resource and returns a payload that
//! is stored with its success record.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::{ListingError, TaskError};

/// A finite, ordered stream of resource identifiers.
///
/// An `Err` element is a listing fault part-way through; the coordinator
/// stops reading and discards everything already received for that type.
pub type ResourceStream = BoxStream<'static, Result<String, ListingError>>;

/// Lists the resources of one resource type.
#[async_trait]
pub trait Lister: Send + Sync {
    /// Open a listing for `type_name`. Failing here is a listing fault.
    async fn list(&self, type_name: &str) -> Result<ResourceStream, ListingError>;
}

/// Indexes a single resource.
#[async_trait]
pub trait IndexTask: Send + Sync {
    /// Index `resource`, returning a human-readable payload on success.
    async fn index(&self, resource: &str) -> Result<String, TaskError>;
}

/// Wrap an in-memory list of identifiers as a [`ResourceStream`].
pub fn resource_stream<I>(resources: I) -> ResourceStream
where
    I: IntoIterator<Item = String>,
    I::IntoIter: Send + 'static,
{
    stream::iter(resources.into_iter().map(Ok)).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resource_stream_preserves_order() {
        let listed: Vec<String> = resource_stream(vec!["a".to_string(), "b".to_string()])
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(listed, vec!["a", "b"]);
    }
}
