//! Credentials for private registries

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::RegistryError;

pub const GITHUB_APP_ID: &str = "GITHUB_APP_ID";
pub const GITHUB_PRIVATE_KEY_PEM: &str = "GITHUB_PRIVATE_KEY_PEM";
pub const GITHUB_API_URL: &str = "GITHUB_API_URL";

const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("message-contracts/", env!("CARGO_PKG_VERSION"));
const ACCEPT: &str = "application/vnd.github.v3+json";
const JWT_LIFETIME_SECS: i64 = 600;

/// Username/password pair for one git network operation
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Issues credentials for git operations against a registry URL.
///
/// `None` means credentials are unavailable; the git operation then fails on its own terms.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self, url: &str) -> Option<Credentials>;
}

#[derive(Serialize)]
struct AppClaims<'a> {
    iss: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct Installation {
    id: u64,
}

#[derive(Deserialize)]
struct AccessToken {
    token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    refresh_after: DateTime<Utc>,
}

/// GitHub App installation tokens
pub struct GitHubAppCredentials {
    app_id: String,
    key: EncodingKey,
    api_url: String,
    /// Installation ids by `owner/repo`
    installations: Mutex<HashMap<String, u64>>,
    tokens: Mutex<HashMap<u64, CachedToken>>,
}

impl fmt::Debug for GitHubAppCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubAppCredentials")
            .field("app_id", &self.app_id)
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl GitHubAppCredentials {
    /// Build from repository parameters. The private key is parsed here, once.
    pub fn from_parameters(url: &str, parameters: &HashMap<String, String>) -> Result<Self, RegistryError> {
        let required = |name: &str| {
            parameter(parameters, name).ok_or_else(|| RegistryError::InvalidConfiguration {
                url: url.to_string(),
                reason: format!("missing required parameter '{name}' for GitHub repository"),
            })
        };
        let app_id = required(GITHUB_APP_ID)?.to_string();
        let pem = required(GITHUB_PRIVATE_KEY_PEM)?;
        let key = EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| RegistryError::InvalidConfiguration {
            url: url.to_string(),
            reason: format!("invalid {GITHUB_PRIVATE_KEY_PEM}: {e}"),
        })?;
        let api_url = parameter(parameters, GITHUB_API_URL)
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string());

        Ok(Self {
            app_id,
            key,
            api_url,
            installations: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
        })
    }

    fn app_jwt(&self) -> anyhow::Result<String> {
        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iss: &self.app_id,
            iat: now,
            exp: now + JWT_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key).context("sign app jwt")
    }

    fn installation_id(&self, owner: &str, repo: &str, jwt: &str) -> anyhow::Result<u64> {
        let url = format!("{}/repos/{owner}/{repo}/installation", self.api_url);
        let resp = ureq::get(&url)
            .header("Authorization", &format!("Bearer {jwt}"))
            .header("Accept", ACCEPT)
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| anyhow!("GET {url}: {e}"))?;
        if resp.status().as_u16() != 200 {
            bail!("GET {url}: unexpected status {}", resp.status());
        }
        let mut buf = Vec::new();
        resp.into_body().into_reader().read_to_end(&mut buf).context("read installation response")?;
        let installation: Installation = serde_json::from_slice(&buf).context("parse installation response")?;
        Ok(installation.id)
    }

    fn access_token(&self, installation_id: u64, jwt: &str) -> anyhow::Result<CachedToken> {
        let url = format!("{}/app/installations/{installation_id}/access_tokens", self.api_url);
        let resp = ureq::post(&url)
            .header("Authorization", &format!("Bearer {jwt}"))
            .header("Accept", ACCEPT)
            .header("User-Agent", USER_AGENT)
            .send("{}")
            .map_err(|e| anyhow!("POST {url}: {e}"))?;
        if resp.status().as_u16() != 201 {
            bail!("POST {url}: unexpected status {}", resp.status());
        }
        let mut buf = Vec::new();
        resp.into_body().into_reader().read_to_end(&mut buf).context("read access token response")?;
        let token: AccessToken = serde_json::from_slice(&buf).context("parse access token response")?;
        let refresh_after = token
            .expires_at
            .map(|at| at - Duration::minutes(1))
            .unwrap_or_else(Utc::now);
        Ok(CachedToken {
            token: token.token,
            refresh_after,
        })
    }

    fn cached(&self, installation_id: u64) -> Option<String> {
        let tokens = self.tokens.lock().ok()?;
        tokens
            .get(&installation_id)
            .filter(|cached| cached.refresh_after > Utc::now())
            .map(|cached| cached.token.clone())
    }

    fn exchange(&self, url: &str) -> anyhow::Result<String> {
        let (owner, repo) = owner_and_repo(url).ok_or_else(|| anyhow!("cannot determine owner/repo of {url}"))?;
        let repository = format!("{owner}/{repo}");
        let known = self.installations.lock().ok().and_then(|ids| ids.get(&repository).copied());
        if let Some(token) = known.and_then(|id| self.cached(id)) {
            debug!(repository, "using cached installation token");
            return Ok(token);
        }

        let jwt = self.app_jwt()?;
        let installation_id = match known {
            Some(id) => id,
            None => {
                let id = self.installation_id(&owner, &repo, &jwt)?;
                if let Ok(mut ids) = self.installations.lock() {
                    ids.insert(repository, id);
                }
                id
            }
        };
        // another repository of the same installation may have fetched a token already
        if let Some(token) = self.cached(installation_id) {
            return Ok(token);
        }
        let token = self.access_token(installation_id, &jwt)?;
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(installation_id, token.clone());
        }
        Ok(token.token)
    }
}

impl CredentialProvider for GitHubAppCredentials {
    fn credentials(&self, url: &str) -> Option<Credentials> {
        match self.exchange(url) {
            Ok(token) => Some(Credentials {
                username: "x-access-token".to_string(),
                password: token,
            }),
            Err(e) => {
                warn!(url, error = %format!("{e:#}"), "GitHub app credentials unavailable");
                None
            }
        }
    }
}

/// Parameter lookup ignoring case, since configuration sources may lowercase keys
pub fn parameter<'p>(parameters: &'p HashMap<String, String>, name: &str) -> Option<&'p str> {
    parameters
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Owner and repository name of a GitHub clone URL, in https or scp-like form
pub fn owner_and_repo(url: &str) -> Option<(String, String)> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split_once(':')?.1.to_string(),
    };
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let repo = segments.next()?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    Some((owner.to_string(), repo.to_string()))
}
