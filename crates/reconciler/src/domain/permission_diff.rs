use common::domain::RolePermissionCollection;

/// Entries of `source` that are absent from `exclude`.
///
/// Keys left with no resources are omitted, so the result of diffing identical
/// collections is empty.
pub fn exclude(
    source: &RolePermissionCollection,
    exclude: &RolePermissionCollection,
) -> RolePermissionCollection {
    let mut result = RolePermissionCollection::new();
    for (permission, resources) in source {
        let excluded = exclude.get(permission);
        let remaining: Vec<_> = resources
            .iter()
            .filter(|resource| excluded.is_none_or(|ex| !ex.contains(resource)))
            .cloned()
            .collect();
        if !remaining.is_empty() {
            result.insert(permission.clone(), remaining);
        }
    }
    result
}
