//! Concrete [`ProbeStore`](crate::services::probe_store::ProbeStore) backends.
//!
//! [`CsvProbeStore`] keeps one CSV partition per day table on local disk.
//! [`PgProbeStore`] talks to the PostgreSQL store the probe tables live in.

mod csv_store;
mod pg_store;

pub use csv_store::CsvProbeStore;
pub use pg_store::PgProbeStore;
