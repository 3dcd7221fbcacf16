mod stream;
mod worker;

pub use stream::{CancelHandle, MultiSourceStream};
pub use worker::{build_client, ResumableFetchWorker};
