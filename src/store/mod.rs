mod order;
mod quota;

pub use order::{Order, OrderStatus};
pub use quota::{
    AsyncDataStore, FetchQuotaGate, InMemoryQuotaLedger, QuotaEntry, QuotaLedger,
};
