use serde::{Deserialize, Serialize};

/// The User struct is an immutable snapshot of the identity provider's
/// signed-in account, copied when the session is synchronized.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

impl User {
    /// Construct a new User with optional profile fields.
    pub fn new(
        uid: impl Into<String>,
        email: Option<String>,
        display_name: Option<String>,
        photo_url: Option<String>,
    ) -> Self {
        User {
            uid: uid.into(),
            email,
            display_name,
            photo_url,
        }
    }

    /// A short label for logs and the CLI: display name, then email, then uid.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.uid)
    }
}
