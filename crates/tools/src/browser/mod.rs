//! Chrome automation over the DevTools protocol: process launch, the CDP
//! client, and the [`crate::PageDriver`] implementation built on them.

pub mod cdp;
pub mod launcher;
pub mod page;

pub use cdp::CdpClient;
pub use launcher::BrowserLauncher;
pub use page::CdpPage;
