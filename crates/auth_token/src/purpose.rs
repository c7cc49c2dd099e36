use serde::{Deserialize, Serialize};
use std::fmt;

/// What a token may be used for. A token is only ever accepted for its own purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Purpose {
    /// Emailed after sign-up; activates the account.
    ConfirmRegistration,
    /// Emailed on request; allows setting a new password.
    ForgotPassword,
    /// Returned by sign-in; authenticates API requests.
    AccessResources,
}

impl Purpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfirmRegistration => "CONFIRM_REGISTRATION",
            Self::ForgotPassword => "FORGOT_PASSWORD",
            Self::AccessResources => "ACCESS_RESOURCES",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
