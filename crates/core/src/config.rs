//! Actor registry parsing. The configuration is a YAML document with an
//! `authentications:` map; only entries of type `cssclientcredentials`
//! participate, everything else is ignored.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::{ActorProfile, ActorRegistry};

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    authentications: BTreeMap<String, RawAuthentication>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAuthentication {
    #[serde(rename = "type")]
    kind: String,
    web_id: Option<String>,
    email: Option<String>,
    password: Option<String>,
    oidc_issuer: Option<String>,
    index: Option<String>,
    index_query: Option<String>,
}

pub fn load_registry(path: &Path) -> Result<ActorRegistry, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_registry(&text).map_err(|e| match e {
        ConfigError::Parse { source, .. } => ConfigError::Parse {
            path: path.display().to_string(),
            source,
        },
        other => other,
    })
}

pub fn parse_registry(text: &str) -> Result<ActorRegistry, ConfigError> {
    let raw: RawConfig = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
        path: String::new(),
        source,
    })?;

    let mut registry = ActorRegistry::new();
    for (entry, auth) in raw.authentications {
        if auth.kind != "cssclientcredentials" {
            continue;
        }
        let field = |value: Option<String>, name: &'static str| {
            value.ok_or(ConfigError::MissingField {
                entry: entry.clone(),
                field: name,
            })
        };
        let profile = ActorProfile {
            web_id: field(auth.web_id, "webId")?,
            email: field(auth.email, "email")?,
            password: field(auth.password, "password")?,
            oidc_issuer: field(auth.oidc_issuer, "oidcIssuer")?,
            index: field(auth.index, "index")?,
            index_query: auth.index_query,
        };
        if registry
            .insert(profile.web_id.clone(), profile.clone())
            .is_some()
        {
            return Err(ConfigError::DuplicateActor(profile.web_id));
        }
    }

    if registry.is_empty() {
        return Err(ConfigError::NoActors);
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
authentications:
  alice:
    type: cssclientcredentials
    webId: https://alice.example/profile/card#me
    email: alice@example.org
    password: hunter2
    oidcIssuer: https://idp.example/
    index: https://alice.example/index
  bob:
    type: cssclientcredentials
    webId: https://bob.example/profile/card#me
    email: bob@example.org
    password: secret
    oidcIssuer: https://idp.example/
    index: https://bob.example/index
    indexQuery: |
      SELECT ?r WHERE { ?s <urn:custom> ?r . }
  legacy:
    type: basicauth
    webId: https://legacy.example/profile/card#me
"#;

    #[test]
    fn parses_client_credentials_entries_only() {
        let registry = parse_registry(SAMPLE).unwrap();
        assert_eq!(registry.len(), 2);
        let alice = &registry["https://alice.example/profile/card#me"];
        assert_eq!(alice.index, "https://alice.example/index");
        assert!(alice.index_query.is_none());
        let bob = &registry["https://bob.example/profile/card#me"];
        assert!(bob.index_query.as_deref().unwrap().contains("urn:custom"));
    }

    #[test]
    fn rejects_duplicate_web_ids() {
        let doubled = format!(
            "{SAMPLE}  alice2:\n    type: cssclientcredentials\n    webId: https://alice.example/profile/card#me\n    email: a\n    password: b\n    oidcIssuer: c\n    index: d\n"
        );
        let err = parse_registry(&doubled).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateActor(_)));
    }

    #[test]
    fn rejects_missing_fields() {
        let text = "authentications:\n  broken:\n    type: cssclientcredentials\n    webId: https://x.example/profile/card#me\n";
        let err = parse_registry(text).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "email", .. }));
    }

    #[test]
    fn rejects_empty_registry() {
        let err = parse_registry("authentications: {}\n").unwrap_err();
        assert!(matches!(err, ConfigError::NoActors));
    }
}
