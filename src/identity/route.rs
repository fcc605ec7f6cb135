use super::user::Role;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Match,
    Mismatch { correct_route: String },
}

/// First non-empty path segment, ignoring any query string or fragment.
pub fn first_segment(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    path[..end].split('/').find(|s| !s.is_empty()).unwrap_or("")
}

pub fn match_route(role: Role, path: &str) -> RouteDecision {
    if first_segment(path) == role.as_str() {
        RouteDecision::Match
    } else {
        RouteDecision::Mismatch { correct_route: role.route() }
    }
}
