pub mod audit;
pub mod inbound_events;
pub mod ledger;
pub mod orders;
pub mod payouts;
pub mod refunds;
