pub(crate) mod ledger;
pub(crate) mod models;

pub(crate) use ledger::{RegionLedger, StorageError};
pub(crate) use models::{LedgerRow, MetricSet};
