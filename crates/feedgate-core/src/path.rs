//! Detail-path parsing.
//!
//! Only detail reads are metered. A detail path looks like
//! `<version-prefix>/detail/<resource>[/...]`.

use crate::types::ResourceId;

/// Extract the resource id from a detail path, if `path` is one.
pub fn detail_resource(path: &str, version_prefix: &str) -> Option<ResourceId> {
    let rest = path.strip_prefix(version_prefix)?.strip_prefix("/detail/")?;
    let segment = rest.split('/').next()?;
    ResourceId::new(segment).ok()
}
