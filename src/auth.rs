use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Shared-password check for the startup handshake. Every user name logs in
/// with the configured password; the name then decides the session's role.
#[derive(Debug)]
pub struct SlotwiseAuthSource {
    password: String,
}

impl SlotwiseAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for SlotwiseAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Customer,
}

/// Who is running a statement. For customers `user` is the customer id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: String,
    pub role: Role,
}

impl Identity {
    pub fn resolve(user: &str, admins: &[String]) -> Self {
        let role = if admins.iter().any(|a| a == user) {
            Role::Admin
        } else {
            Role::Customer
        };
        Self {
            user: user.to_string(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admins_come_from_the_list() {
        let admins = vec!["root".to_string(), "ops".to_string()];
        assert!(Identity::resolve("ops", &admins).is_admin());
        let alice = Identity::resolve("alice", &admins);
        assert_eq!(alice.role, Role::Customer);
        assert_eq!(alice.user, "alice");
        // Exact match only.
        assert!(!Identity::resolve("Root", &admins).is_admin());
    }
}
