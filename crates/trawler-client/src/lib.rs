pub mod manifest;
pub mod parser;
pub mod transport;

pub use manifest::{SiteEntry, SiteManifest};
pub use parser::{ParseMode, SelectorParser, SelectorSet};
pub use transport::ReqwestTransport;
