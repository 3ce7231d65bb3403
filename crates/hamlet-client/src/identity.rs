//! Client settings and credential resolution.
//!
//! The client needs a player and a credential before it can build an
//! engine. In order of preference it uses: a token from the environment,
//! the credential stored for the configured player, or (against the
//! development server) a freshly seeded village.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use hamlet_gateway::HttpGateway;
use hamlet_sync::LocalStore;
use hamlet_types::{SessionCredential, UserId};
use tracing::info;

use crate::error::ClientError;

/// Default location of the local state file.
const DEFAULT_STATE_FILE: &str = "hamlet-state.json";

/// Settings read from `HAMLET_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// YAML sync configuration (`HAMLET_CONFIG`).
    pub config_path: Option<PathBuf>,
    /// Local state file (`HAMLET_STATE_FILE`).
    pub state_file: PathBuf,
    /// Player to sync (`HAMLET_USER_ID`).
    pub user_id: Option<UserId>,
    /// Credential supplied directly (`HAMLET_TOKEN` and
    /// `HAMLET_TOKEN_EXPIRES_AT`).
    pub credential: Option<SessionCredential>,
}

impl ClientSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`, which returns a variable's value if
    /// set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let user_id = lookup("HAMLET_USER_ID")
            .map(|raw| {
                raw.trim().parse::<UserId>().map_err(|e| ClientError::Env {
                    name: "HAMLET_USER_ID",
                    detail: e.to_string(),
                })
            })
            .transpose()?;

        let credential = match lookup("HAMLET_TOKEN") {
            Some(token) => {
                let raw = lookup("HAMLET_TOKEN_EXPIRES_AT").ok_or_else(|| ClientError::Env {
                    name: "HAMLET_TOKEN_EXPIRES_AT",
                    detail: String::from("required when HAMLET_TOKEN is set"),
                })?;
                let expires_at = DateTime::parse_from_rfc3339(raw.trim())
                    .map_err(|e| ClientError::Env {
                        name: "HAMLET_TOKEN_EXPIRES_AT",
                        detail: e.to_string(),
                    })?
                    .with_timezone(&Utc);
                Some(SessionCredential { token, expires_at })
            }
            None => None,
        };
        if credential.is_some() && user_id.is_none() {
            return Err(ClientError::Env {
                name: "HAMLET_USER_ID",
                detail: String::from("required when HAMLET_TOKEN is set"),
            });
        }

        Ok(Self {
            config_path: lookup("HAMLET_CONFIG").map(PathBuf::from),
            state_file: lookup("HAMLET_STATE_FILE")
                .map_or_else(|| PathBuf::from(DEFAULT_STATE_FILE), PathBuf::from),
            user_id,
            credential,
        })
    }
}

/// Work out who to sync as, seeding a development village if nothing is
/// configured or stored. The resolved credential is saved to `store`.
pub async fn resolve(
    settings: &ClientSettings,
    store: &dyn LocalStore,
    gateway: &HttpGateway,
) -> Result<(UserId, SessionCredential), ClientError> {
    let resolved = match (settings.user_id, settings.credential.clone()) {
        (Some(user), Some(credential)) => {
            info!(user_id = %user, "using credential from environment");
            (user, credential)
        }
        (Some(user), None) => {
            let Some(credential) = store.credential(user)? else {
                return Err(ClientError::Env {
                    name: "HAMLET_USER_ID",
                    detail: format!("no stored credential for {user}; set HAMLET_TOKEN"),
                });
            };
            info!(user_id = %user, expires_at = %credential.expires_at, "using stored credential");
            (user, credential)
        }
        (None, _) => {
            let seed = gateway.seed_dev_village().await?;
            info!(
                user_id = %seed.user_id,
                buildings = seed.buildings.len(),
                "seeded development village"
            );
            (seed.user_id, seed.credential)
        }
    };
    store.save_credential(resolved.0, &resolved.1)?;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: BTreeMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let settings = ClientSettings::from_lookup(lookup(&[]));
        assert!(settings.is_ok());
        let settings = settings.ok();
        assert_eq!(
            settings.as_ref().map(|s| s.state_file.clone()),
            Some(PathBuf::from(DEFAULT_STATE_FILE))
        );
        assert_eq!(settings.and_then(|s| s.credential), None);
    }

    #[test]
    fn token_requires_expiry_and_user() {
        let user = UserId::new().to_string();
        assert!(ClientSettings::from_lookup(lookup(&[("HAMLET_TOKEN", "abc")])).is_err());
        assert!(
            ClientSettings::from_lookup(lookup(&[
                ("HAMLET_TOKEN", "abc"),
                ("HAMLET_TOKEN_EXPIRES_AT", "2030-01-01T00:00:00Z"),
            ]))
            .is_err()
        );
        let settings = ClientSettings::from_lookup(lookup(&[
            ("HAMLET_USER_ID", &user),
            ("HAMLET_TOKEN", "abc"),
            ("HAMLET_TOKEN_EXPIRES_AT", "2030-01-01T00:00:00Z"),
        ]));
        assert_eq!(
            settings
                .ok()
                .and_then(|s| s.credential)
                .map(|c| c.token),
            Some(String::from("abc"))
        );
    }

    #[test]
    fn malformed_user_id_is_rejected() {
        let settings = ClientSettings::from_lookup(lookup(&[("HAMLET_USER_ID", "not-a-uuid")]));
        assert!(matches!(
            settings,
            Err(ClientError::Env {
                name: "HAMLET_USER_ID",
                ..
            })
        ));
    }
}
