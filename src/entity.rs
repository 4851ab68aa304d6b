//! Entities and the claims they are derived from

use crate::attribute::{AttributeError, AttributeSet, AttributeValue, State};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("claims missing '{0}'")]
    Missing(&'static str),

    #[error("claims carry an invalid attribute for {entity}: {source}")]
    InvalidAttribute {
        entity: String,
        #[source]
        source: AttributeError,
    },
}

/// One attribute entry in a token's entitlement list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAttribute {
    pub attribute: String,
    #[serde(rename = "displayName", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Attributes held by one principal of the entity chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityEntitlements {
    pub entity_identifier: String,
    #[serde(default)]
    pub entity_attributes: Vec<EntityAttribute>,
}

/// The `tdf_claims` object of an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TdfClaims {
    pub client_public_signing_key: String,
    #[serde(default)]
    pub entitlements: Vec<EntityEntitlements>,
}

/// Verified claims bundle extracted from an OIDC access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub subject: String,
    pub email: Option<String>,
    pub preferred_username: Option<String>,
    pub audience: Vec<String>,
    pub client_public_signing_key: String,
    pub entitlements: Vec<EntityEntitlements>,
}

impl Claims {
    /// Flatten the entitlements of every principal into one attribute set
    pub fn attribute_set(&self) -> Result<AttributeSet, ClaimsError> {
        let mut set = AttributeSet::new();
        for entry in &self.entitlements {
            for attr in &entry.entity_attributes {
                let mut value = AttributeValue::new(&attr.attribute).map_err(|source| {
                    ClaimsError::InvalidAttribute {
                        entity: entry.entity_identifier.clone(),
                        source,
                    }
                })?;
                if let Some(name) = &attr.display_name {
                    value = value.with_display_name(name.clone());
                }
                set.add(value);
            }
        }
        Ok(set)
    }

    /// Entity for adjudication, identified by the token subject
    pub fn entity(&self) -> Result<Entity, ClaimsError> {
        let mut entity = Entity::new(self.subject.clone(), self.attribute_set()?);
        entity.email = self.email.clone();
        entity.aliases = self.preferred_username.iter().cloned().collect();
        Ok(entity)
    }
}

/// An authenticated principal and its attributes
///
/// Equality is on (user id, email); attribute membership is by URI.
#[derive(Debug, Clone)]
pub struct Entity {
    pub user_id: String,
    pub email: Option<String>,
    /// Other names the entity is known by, checked against dissemination lists
    pub aliases: Vec<String>,
    pub non_person_entity: bool,
    pub attributes: AttributeSet,
    pub state: State,
}

impl Entity {
    pub fn new(user_id: impl Into<String>, attributes: AttributeSet) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            aliases: Vec::new(),
            non_person_entity: false,
            attributes,
            state: State::Active,
        }
    }

    /// Every identifier the entity may appear under in a dissemination list
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.user_id.as_str())
            .chain(self.email.as_deref())
            .chain(self.aliases.iter().map(String::as_str))
    }

    pub fn has_attribute(&self, uri: &str) -> bool {
        self.attributes.contains(uri)
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id && self.email == other.email
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.user_id.hash(state);
        self.email.hash(state);
    }
}
