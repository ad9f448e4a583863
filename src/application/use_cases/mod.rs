pub mod catalog;
pub mod checkout;
pub mod entitlements;
pub mod reconciliation;
