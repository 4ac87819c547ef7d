use serde::{Serialize, Deserialize};
use serde_json::{Value as Json, Map as JsonMap};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("policy is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("policy document has an unexpected shape: {0}")]
    Shape(String),
    #[error("statement {index} is malformed: {source}")]
    Statement { index: usize, source: serde_json::Error },
}

/// A value the policy grammar allows as either a scalar or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> { Many(Vec<T>), One(T) }

impl<T> OneOrMany<T> {
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            OneOrMany::One(v) => std::slice::from_ref(v).iter(),
            OneOrMany::Many(v) => v.iter(),
        }
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self { OneOrMany::Many(Vec::new()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from="String")]
pub enum Effect { Allow, Deny, Unknown }

impl From<String> for Effect {
    fn from(s: String) -> Self {
        match s.as_str() { "Allow" => Effect::Allow, "Deny" => Effect::Deny, _ => Effect::Unknown }
    }
}

pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Principal {
    Named(String),
    Structured(BTreeMap<String, OneOrMany<String>>),
}

impl Principal {
    /// `"*"`, `{"AWS": "*"}` and `{"AWS": [.., "*", ..]}` all mean anyone.
    pub fn is_anyone(&self) -> bool {
        match self {
            Principal::Named(p) => p == WILDCARD,
            Principal::Structured(m) => m.get("AWS")
                .map(|aws| aws.iter().any(|p| p == WILDCARD))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Statement {
    #[serde(rename="Effect", default)]
    pub effect: Option<Effect>,
    #[serde(rename="Principal", default)]
    pub principal: Option<Principal>,
    #[serde(rename="Condition", default)]
    pub condition: Option<JsonMap<String, Json>>,
}

impl Statement {
    pub fn grants_unconditioned_public_access(&self) -> bool {
        self.effect == Some(Effect::Allow)
            && self.principal.as_ref().map(Principal::is_anyone).unwrap_or(false)
            && self.condition.as_ref().map(|c| c.is_empty()).unwrap_or(true)
    }
}

/// Statements stay raw until they are reached, so a malformed statement only
/// matters if no earlier statement is public.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename="Statement", default)]
    pub statement: OneOrMany<Json>,
}

impl PolicyDocument {
    pub fn from_json(doc: &Json) -> Result<Self, PolicyError> {
        if !doc.is_object() {
            return Err(PolicyError::Shape(format!("expected an object, got {}", kind(doc))));
        }
        Ok(Self::deserialize(doc)?)
    }

    pub fn parse(raw: &str) -> Result<Self, PolicyError> {
        let doc: Json = serde_json::from_str(raw)?;
        Self::from_json(&doc)
    }

    pub fn is_public(&self) -> Result<bool, PolicyError> {
        for (index, raw) in self.statement.iter().enumerate() {
            let stmt = Statement::deserialize(raw)
                .map_err(|source| PolicyError::Statement { index, source })?;
            if stmt.grants_unconditioned_public_access() { return Ok(true); }
        }
        Ok(false)
    }
}

fn kind(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}

/// True on the first statement that allows anyone without conditions. A
/// malformed document, or a malformed statement reached before any public
/// one, is reported as not public.
pub fn is_policy_public(doc: &Json) -> bool {
    match PolicyDocument::from_json(doc).and_then(|p| p.is_public()) {
        Ok(public) => public,
        Err(e) => { warn!(error = %e, "error parsing policy"); false }
    }
}

/// Same as [`is_policy_public`] for the raw text the storage service returns.
pub fn is_policy_text_public(raw: &str) -> bool {
    match PolicyDocument::parse(raw).and_then(|p| p.is_public()) {
        Ok(public) => public,
        Err(e) => { warn!(error = %e, "error parsing policy"); false }
    }
}

/// Predefined grantee groups that stand for everyone outside the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublicGroup { AllUsers, AuthenticatedUsers }

impl PublicGroup {
    pub const ALL: [PublicGroup; 2] = [PublicGroup::AllUsers, PublicGroup::AuthenticatedUsers];

    pub fn uri(self) -> &'static str {
        match self {
            PublicGroup::AllUsers => "http://acs.amazonaws.com/groups/global/AllUsers",
            PublicGroup::AuthenticatedUsers => "http://acs.amazonaws.com/groups/global/AuthenticatedUsers",
        }
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.uri() == uri)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Grantee {
    #[serde(rename="Type", default, skip_serializing_if="Option::is_none")]
    pub kind: Option<String>,
    #[serde(rename="ID", default, skip_serializing_if="Option::is_none")]
    pub id: Option<String>,
    #[serde(rename="DisplayName", default, skip_serializing_if="Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename="URI", default, skip_serializing_if="Option::is_none")]
    pub uri: Option<String>,
}

impl Grantee {
    pub fn group(uri: impl Into<String>) -> Self {
        Self { kind: Some("Group".into()), uri: Some(uri.into()), ..Default::default() }
    }
    pub fn account(id: impl Into<String>) -> Self {
        Self { kind: Some("CanonicalUser".into()), id: Some(id.into()), ..Default::default() }
    }
    pub fn public_group(&self) -> Option<PublicGroup> {
        self.uri.as_deref().and_then(PublicGroup::from_uri)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    #[serde(rename="Grantee", default)]
    pub grantee: Grantee,
    #[serde(rename="Permission", default, skip_serializing_if="Option::is_none")]
    pub permission: Option<String>,
}

/// Bucket and object ACLs share this shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Acl {
    #[serde(rename="Grants", default)]
    pub grants: Vec<Grant>,
}

impl Acl {
    pub fn public_groups(&self) -> impl Iterator<Item = PublicGroup> + '_ {
        self.grants.iter().filter_map(|g| g.grantee.public_group())
    }
}

/// Any grant to a public group makes the ACL public, whatever the permission.
pub fn is_acl_public(acl: &Acl) -> bool {
    acl.public_groups().next().is_some()
}
