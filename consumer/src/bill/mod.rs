pub mod aggregator;
pub mod prices;
pub mod receipt;

pub use aggregator::{visible_items, BillAggregator, BillSnapshot};
pub use prices::{ExclusionList, PriceBook};
pub use receipt::{Receipt, ReceiptError, ReceiptWriter};
