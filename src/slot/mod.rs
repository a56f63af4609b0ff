//! Provider slot availability

pub mod ledger;

pub use ledger::{slot_status_for, SlotLedger};
