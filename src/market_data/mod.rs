// Market data module entrypoint
pub mod adapters;       // venue-specific streaming transports (Kite ticker)
pub mod index;          // fixed index -> instrument token table
pub mod price_cache;    // latest LTP per index
pub mod router;         // drains ticker events into the cache
