use crate::domain::{Domain, Permission, Resource, Role, User};

/// Casbin RBAC model with tenant domains.
///
/// Request format: (user, domain, resource, permission)
/// Policy format: (role, domain, resource, permission, effect)
/// Role assignment: (user, role, domain)
///
/// Explicit deny rules override allow rules. The placeholder identity that witnesses
/// role existence is never granted anything.
pub const RBAC_MODEL: &str = r#"
[request_definition]
r = sub, dom, obj, act

[policy_definition]
p = sub, dom, obj, act, eft

[role_definition]
g = _, _, _

[policy_effect]
e = some(where (p.eft == allow)) && !some(where (p.eft == deny))

[matchers]
m = g(r.sub, p.sub, r.dom) && r.dom == p.dom && r.obj == p.obj && r.act == p.act && r.sub != "noop"
"#;

pub const ALLOW_EFFECT: &str = "allow";

/// Column positions within stored rules.
pub(crate) const POLICY_ROLE: usize = 0;
pub(crate) const POLICY_RESOURCE: usize = 2;
pub(crate) const POLICY_PERMISSION: usize = 3;
pub(crate) const GROUPING_USER: usize = 0;
pub(crate) const GROUPING_ROLE: usize = 1;
pub(crate) const GROUPING_DOMAIN: usize = 2;

pub(crate) fn grant_rule(
    role: &Role,
    domain: &Domain,
    resource: &Resource,
    permission: &Permission,
) -> Vec<String> {
    vec![
        role.to_string(),
        domain.to_string(),
        resource.to_string(),
        permission.to_string(),
        ALLOW_EFFECT.to_string(),
    ]
}

pub(crate) fn membership_rule(user: &User, role: &Role, domain: &Domain) -> Vec<String> {
    vec![user.to_string(), role.to_string(), domain.to_string()]
}
