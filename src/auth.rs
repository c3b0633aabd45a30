use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// One shared password for every user and tenant.
#[derive(Debug)]
pub struct CoversAuthSource {
    password: Vec<u8>,
}

impl CoversAuthSource {
    pub fn new(password: String) -> Self {
        Self {
            password: password.into_bytes(),
        }
    }
}

#[async_trait]
impl AuthSource for CoversAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(
            user = login.user().unwrap_or("-"),
            database = login.database().unwrap_or("-"),
            "password login"
        );
        Ok(Password::new(None, self.password.clone()))
    }
}
