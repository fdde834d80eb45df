//! Adapters with site-specific overrides.
//!
//! Descriptors under the `"custom"` section of the descriptor file are
//! matched to an implementation here by name.

pub mod flamecomics;
pub mod hivetoon;
pub mod mangapark;

pub use flamecomics::FlameComics;
pub use hivetoon::Hivetoon;
pub use mangapark::Mangapark;

use super::Scanlator;
use crate::descriptor::SiteDescriptor;
use crate::error::ScanError;
use crate::request::Fetcher;
use std::sync::Arc;

/// Names accepted in the `"custom"` section.
pub const CUSTOM_NAMES: &[&str] = &["flamecomics", "hivetoon", "mangapark"];

pub fn build(
    name: &str,
    site: SiteDescriptor,
    fetcher: Arc<Fetcher>,
) -> Result<Arc<dyn Scanlator>, ScanError> {
    let scanlator: Arc<dyn Scanlator> = match name {
        "flamecomics" => Arc::new(FlameComics::new(name, site, fetcher)),
        "hivetoon" => Arc::new(Hivetoon::new(name, site, fetcher)),
        "mangapark" => Arc::new(Mangapark::new(name, site, fetcher)),
        other => {
            return Err(ScanError::configuration(
                other,
                format!(
                    "no custom adapter with this name (known: {})",
                    CUSTOM_NAMES.join(", ")
                ),
            ))
        }
    };
    Ok(scanlator)
}
