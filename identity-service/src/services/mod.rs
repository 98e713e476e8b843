pub mod authz;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod notifier;
pub mod token;
pub mod two_factor;

pub use authz::{Decision, Evaluator};
pub use error::ServiceError;
pub use identity::{
    AccountCreated, CodeResent, EmailVerified, IdentityService, InviteCreated, SessionIssued,
};
pub use notifier::{
    Notification, NotificationDispatcher, NotifyError, RecordingNotifier, SmtpNotifier,
};
pub use token::{TokenClaims, TokenError, TokenKind, TokenService};
pub use two_factor::{code_matches, CodeGenerator, IssuedCode};
