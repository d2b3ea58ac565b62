//! On-disk spool for one type's listing.
//!
//! A listing is drained into an anonymous temporary file, one identifier per
//! line, and replayed synchronously once the insert transaction is open. Memory
//! use stays flat no matter how many resources a type has. The file is
//! unlinked as soon as it is created, so nothing is left behind on a crash.

use std::fs::File as StdFile;
use std::io::{BufRead, BufReader, Lines, Seek, SeekFrom};
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::error::ListingError;

/// Write side of the spool, filled while the listing stream is drained.
pub(crate) struct ListingSpool {
    writer: BufWriter<File>,
    count: u64,
}

impl ListingSpool {
    /// Create a spool in `dir`, or in the system temp directory.
    pub(crate) fn create(dir: Option<&Path>) -> Result<Self, ListingError> {
        let file = match dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        Ok(Self {
            writer: BufWriter::new(File::from_std(file)),
            count: 0,
        })
    }

    pub(crate) async fn push(&mut self, resource: &str) -> Result<(), ListingError> {
        if resource.contains(['\n', '\r']) {
            return Err(ListingError::new(format!(
                "resource identifier contains a line break: {:?}",
                resource
            )));
        }
        self.writer.write_all(resource.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.count += 1;
        Ok(())
    }

    pub(crate) fn len(&self) -> u64 {
        self.count
    }

    /// Flush everything written and rewind for replay.
    pub(crate) async fn finish(mut self) -> Result<SpoolReplay, ListingError> {
        self.writer.flush().await?;
        let mut file = self.writer.into_inner().into_std().await;
        file.seek(SeekFrom::Start(0))?;
        Ok(SpoolReplay {
            lines: BufReader::new(file).lines(),
            remaining: self.count,
        })
    }
}

/// Read side of the spool. Yields identifiers in listing order.
pub(crate) struct SpoolReplay {
    lines: Lines<BufReader<StdFile>>,
    remaining: u64,
}

impl Iterator for SpoolReplay {
    type Item = Result<String, ListingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        match self.lines.next() {
            Some(line) => Some(line.map_err(ListingError::from)),
            None => Some(Err(ListingError::new("listing spool ended early"))),
        }
    }
}
