pub mod metrics;
pub mod onboarding;
pub mod session;

pub use metrics::*;
pub use onboarding::*;
pub use session::*;
