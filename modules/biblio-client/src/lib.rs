pub mod crossref;
pub mod entrez;
pub mod idconv;
pub mod medline;
pub mod pdf;
pub mod unpaywall;

pub use crossref::CrossrefClient;
pub use entrez::EntrezClient;
pub use idconv::IdConverterClient;
pub use pdf::PdfReferenceExtractor;
pub use unpaywall::UnpaywallClient;

use std::time::Duration;

/// Per-call timeout for every bibliographic API request. A hung source call
/// blocks only its own unit, never the pass.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn http_client(contact_email: &str) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(format!("citescope/0.1 (mailto:{contact_email})"))
        .build()
        .expect("reqwest client construction cannot fail with static options")
}
