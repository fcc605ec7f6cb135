//! Session and role authorization: cookie token -> user -> role route.
//! Keep the public surface thin and split implementation across sub-modules.

mod user;
mod directory;
mod token_store;
mod session;
mod route;
mod login;
mod request_context;

pub use user::{Role, User, UserSummary};
pub use directory::{MemoryDirectory, Observer, SubscriberSet, Subscription, UserDirectory};
pub use token_store::{parse_cookie, TokenStore, SESSION_COOKIE};
pub use session::{Resolution, SessionResolver, SessionState, SessionToken};
pub use route::{first_segment, match_route, RouteDecision};
pub use login::{LoginMachine, LoginOutcome, LoginState};
pub use request_context::RequestContext;
