//! Compiled-in archive revisions.

use std::sync::{Arc, OnceLock};

use crate::core::format::ArchiveFormat;

pub mod rpa;

/// Every revision this crate knows about. The same instances are handed
/// out on every call, so registries built from them agree on identity.
pub fn builtin() -> Vec<Arc<dyn ArchiveFormat>> {
    static BUILTIN: OnceLock<Vec<Arc<dyn ArchiveFormat>>> = OnceLock::new();
    BUILTIN
        .get_or_init(|| {
            vec![
                Arc::new(rpa::Rpa1),
                Arc::new(rpa::Rpa2),
                Arc::new(rpa::Rpa3),
                Arc::new(rpa::RpaVariant),
            ]
        })
        .clone()
}
