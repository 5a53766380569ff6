use anyhow::{Context as AnyhowContext, Result};
use std::net::SocketAddr;

pub(crate) const AUTH_TOKEN_ENV: &str = "SCHEMALESS_AUTH_TOKEN";

#[derive(Clone, Debug)]
pub struct AuthToken {
    token: String,
}

impl AuthToken {
    pub fn parse(raw: Option<&str>) -> Result<Option<Self>> {
        let Some(raw) = raw else {
            return Ok(None);
        };

        let token = raw.trim();
        if token.is_empty() {
            anyhow::bail!("auth token must be non-empty")
        }

        Ok(Some(Self {
            token: token.to_string(),
        }))
    }

    pub(crate) fn matches_http_authorization_header(&self, header_value: &str) -> bool {
        let header_value = header_value.trim();
        let Some(rest) = header_value.strip_prefix("Bearer ") else {
            return false;
        };
        constant_time_eq(rest.trim(), &self.token)
    }
}

pub(crate) async fn resolve_guarded_bind_addr(bind: &str, public: bool) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(bind)
        .await
        .with_context(|| format!("Failed to resolve bind address: {bind}"))?
        .collect();
    enforce_bind_guard(bind, &addrs, public)?;
    addrs
        .iter()
        .copied()
        .find(SocketAddr::is_ipv4)
        .or_else(|| addrs.first().copied())
        .ok_or_else(|| anyhow::anyhow!("Bind address resolved to zero socket addrs: {bind}"))
}

fn enforce_bind_guard(bind: &str, addrs: &[SocketAddr], public: bool) -> Result<()> {
    let any_non_loopback = addrs.iter().any(|addr| !addr.ip().is_loopback());
    if any_non_loopback && !public {
        anyhow::bail!(
            "Refusing to bind to non-loopback address without --public: {bind}. To expose the translator, pass --public and set {AUTH_TOKEN_ENV} (or --auth-token)."
        )
    }
    Ok(())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff: u8 = 0;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}
