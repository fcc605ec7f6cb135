use super::user::User;

/// Current user, resolved once per request by the session middleware and handed to
/// handlers as a request extension.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user: User,
    pub request_id: String,
}

impl RequestContext {
    pub fn new(user: User) -> Self {
        Self { user, request_id: uuid::Uuid::new_v4().simple().to_string() }
    }

    pub fn is_admin(&self) -> bool {
        self.user.role == super::Role::Admin
    }
}
