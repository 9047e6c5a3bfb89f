pub mod canonical;
pub mod citations;
pub mod extract;
pub mod fetcher;
pub mod rate_limit;
mod robots;
mod text;

pub use canonical::{canonicalize, registrable_domain, Canonical, UrlClass};
pub use citations::extract_citations;
pub use extract::{Extracted, Extractor};
pub use fetcher::{FetchError, FetchedPage, Fetcher, FetcherConfig};
pub use rate_limit::HostGate;
