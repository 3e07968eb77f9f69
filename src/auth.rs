use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// One shared cleartext password for every tenant. Per-user credentials are
/// a deployment concern layered in front of this server (pgbouncer, a
/// sidecar proxy), not something the engine distinguishes tenants by.
#[derive(Debug)]
pub struct SharedPassword(Vec<u8>);

impl SharedPassword {
    pub fn new(password: String) -> Self {
        Self(password.into_bytes())
    }
}

#[async_trait]
impl AuthSource for SharedPassword {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.0.clone()))
    }
}
