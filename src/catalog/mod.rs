// Instrument catalog: the raw CSV list served verbatim to the front end
pub mod fetcher;    // HTTP download + periodic refresh
pub mod store;      // latest good blob

pub use fetcher::{CatalogFetcher, FetchOutcome};
pub use store::{CatalogBlob, InstrumentCatalog};
