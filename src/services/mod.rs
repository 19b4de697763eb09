//! Seams between the pipeline and the storage it reads from and writes to.

pub mod probe_store;
