pub mod dispatch;
pub mod fanout;
pub mod ledger;
pub mod memory;
pub mod queue;
pub mod receivers;
pub mod reconciler;
pub mod templates;
