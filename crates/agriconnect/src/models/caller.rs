use serde::{Deserialize, Serialize};

/// Who is talking to the assistant. Tools that read personal data check this
/// themselves rather than trusting the model's arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    pub authenticated: bool,
    pub user_id: Option<String>,
}

impl CallerContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated<S: Into<String>>(user_id: S) -> Self {
        Self {
            authenticated: true,
            user_id: Some(user_id.into()),
        }
    }

    /// The caller's id, only when the caller is actually signed in
    pub fn verified_user_id(&self) -> Option<&str> {
        if self.authenticated {
            self.user_id.as_deref().filter(|id| !id.is_empty())
        } else {
            None
        }
    }
}
