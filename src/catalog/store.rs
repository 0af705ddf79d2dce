use std::time::SystemTime;

use axum::body::Bytes;
use parking_lot::RwLock;

/// One successful download, kept whole.
#[derive(Debug, Clone)]
pub struct CatalogBlob {
    /// Raw CSV as received. Cloning shares the buffer.
    pub body: Bytes,
    pub records: usize,
    pub fetched_at: SystemTime,
}

impl CatalogBlob {
    /// Seconds since the unix epoch, for status reporting.
    pub fn fetched_at_unix(&self) -> u64 {
        self.fetched_at
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Holds the last successfully fetched catalog, or nothing yet.
///
/// Replacement swaps the whole blob under the lock so readers see either the
/// old or the new payload, never a mix.
#[derive(Debug, Default)]
pub struct InstrumentCatalog {
    current: RwLock<Option<CatalogBlob>>,
}

impl InstrumentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, body: impl Into<Bytes>, records: usize) {
        let blob = CatalogBlob { body: body.into(), records, fetched_at: SystemTime::now() };
        *self.current.write() = Some(blob);
    }

    pub fn get(&self) -> Option<CatalogBlob> {
        self.current.read().clone()
    }

    pub fn body(&self) -> Option<Bytes> {
        self.current.read().as_ref().map(|blob| blob.body.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_until_replaced() {
        let catalog = InstrumentCatalog::new();
        assert!(catalog.body().is_none());
        assert!(catalog.get().is_none());

        catalog.replace("token,symbol\n1,FOO", 1);
        assert_eq!(catalog.body().as_deref(), Some(&b"token,symbol\n1,FOO"[..]));
        let blob = catalog.get().unwrap();
        assert_eq!(blob.records, 1);
        assert!(blob.fetched_at_unix() > 0);
    }

    #[test]
    fn test_readers_keep_their_copy() {
        let catalog = InstrumentCatalog::new();
        catalog.replace("a\n1", 1);
        let held = catalog.body().unwrap();
        catalog.replace("a\n2", 1);
        assert_eq!(&held[..], b"a\n1");
        assert_eq!(catalog.body().as_deref(), Some(&b"a\n2"[..]));
    }
}
