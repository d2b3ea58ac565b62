//! Lister backed by per-type manifest files.
//!
//! `<dir>/<type>.txt` holds one resource identifier per line. Blank lines are
//! skipped and surrounding whitespace is trimmed. The file is streamed, not
//! read up front. A missing manifest is a listing fault for that type.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reindex_core::{ListingError, Lister, ResourceStream};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::debug;

type ManifestLines = Lines<BufReader<File>>;

pub struct ManifestLister {
    dir: PathBuf,
}

impl ManifestLister {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self, type_name: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", type_name))
    }
}

#[async_trait]
impl Lister for ManifestLister {
    async fn list(&self, type_name: &str) -> Result<ResourceStream, ListingError> {
        let path = self.manifest_path(type_name);
        let file = File::open(&path).await.map_err(|e| {
            ListingError::new(format!("cannot open manifest {}: {}", path.display(), e))
        })?;
        debug!(type_name, path = %path.display(), "Streaming manifest");

        let lines = BufReader::new(file).lines();
        Ok(stream::try_unfold(lines, next_resource)
            .map_err(ListingError::from)
            .boxed())
    }
}

async fn next_resource(mut lines: ManifestLines) -> io::Result<Option<(String, ManifestLines)>> {
    while let Some(line) = lines.next_line().await? {
        let resource = line.trim();
        if !resource.is_empty() {
            return Ok(Some((resource.to_string(), lines)));
        }
    }
    Ok(None)
}
