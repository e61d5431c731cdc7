/// Role priority used when a token carries several roles and the request
/// context needs a single primary one. Earlier entries win.
pub const ROLE_PRIORITY: &[&str] = &["admin", "user", "viewer"];

/// Deterministic primary-role selection: highest-priority known role, else
/// the first role listed, else empty.
pub fn select_primary_role(roles: &[String]) -> String {
    for candidate in ROLE_PRIORITY {
        if roles.iter().any(|role| role == candidate) {
            return (*candidate).to_string();
        }
    }
    roles.first().cloned().unwrap_or_default()
}

pub fn has_role(roles: &[String], wanted: &str) -> bool {
    roles.iter().any(|role| role == wanted)
}
