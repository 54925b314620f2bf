//! Core data type definitions
//!
//! The attribute value model persisted by session backends, the authorization
//! expression tree, user principal records and session metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Attribute map, sorted by key so iteration order is canonical
pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// A session attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// Explicit null marker, distinct from an absent attribute
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Instant(DateTime<Utc>),
    Uuid(uuid::Uuid),
    Map(AttributeMap),
    List(Vec<AttributeValue>),
    Authorization(AuthorizationNode),
    Principal(PrincipalRecord),
    UserHolder(UserHolder),
}

/// Discriminant of every concrete wire type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Long,
    Float,
    Double,
    String,
    Bytes,
    Instant,
    Uuid,
    Map,
    List,
    And,
    Or,
    Not,
    Permission,
    Role,
    WildcardPermission,
    Principal,
    UserHolder,
}

impl ValueKind {
    pub fn is_authorization(self) -> bool {
        matches!(
            self,
            ValueKind::And
                | ValueKind::Or
                | ValueKind::Not
                | ValueKind::Permission
                | ValueKind::Role
                | ValueKind::WildcardPermission
        )
    }
}

impl AttributeValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            AttributeValue::Null => ValueKind::Null,
            AttributeValue::Bool(_) => ValueKind::Bool,
            AttributeValue::Int(_) => ValueKind::Int,
            AttributeValue::Long(_) => ValueKind::Long,
            AttributeValue::Float(_) => ValueKind::Float,
            AttributeValue::Double(_) => ValueKind::Double,
            AttributeValue::String(_) => ValueKind::String,
            AttributeValue::Bytes(_) => ValueKind::Bytes,
            AttributeValue::Instant(_) => ValueKind::Instant,
            AttributeValue::Uuid(_) => ValueKind::Uuid,
            AttributeValue::Map(_) => ValueKind::Map,
            AttributeValue::List(_) => ValueKind::List,
            AttributeValue::Authorization(node) => node.kind(),
            AttributeValue::Principal(_) => ValueKind::Principal,
            AttributeValue::UserHolder(_) => ValueKind::UserHolder,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Long(value)
    }
}

impl From<f32> for AttributeValue {
    fn from(value: f32) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Double(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(value: Vec<u8>) -> Self {
        AttributeValue::Bytes(value)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(value: DateTime<Utc>) -> Self {
        AttributeValue::Instant(value)
    }
}

impl From<uuid::Uuid> for AttributeValue {
    fn from(value: uuid::Uuid) -> Self {
        AttributeValue::Uuid(value)
    }
}

impl From<AttributeMap> for AttributeValue {
    fn from(value: AttributeMap) -> Self {
        AttributeValue::Map(value)
    }
}

impl From<Vec<AttributeValue>> for AttributeValue {
    fn from(value: Vec<AttributeValue>) -> Self {
        AttributeValue::List(value)
    }
}

impl From<AuthorizationNode> for AttributeValue {
    fn from(value: AuthorizationNode) -> Self {
        AttributeValue::Authorization(value)
    }
}

impl From<PrincipalRecord> for AttributeValue {
    fn from(value: PrincipalRecord) -> Self {
        AttributeValue::Principal(value)
    }
}

impl From<UserHolder> for AttributeValue {
    fn from(value: UserHolder) -> Self {
        AttributeValue::UserHolder(value)
    }
}

/// Composite authorization expression
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AuthorizationNode {
    Permission(String),
    Role(String),
    WildcardPermission(String),
    And(Vec<AuthorizationNode>),
    Or(Vec<AuthorizationNode>),
    Not(Option<Box<AuthorizationNode>>),
}

impl AuthorizationNode {
    pub fn permission(name: impl Into<String>) -> Self {
        AuthorizationNode::Permission(name.into())
    }

    pub fn role(name: impl Into<String>) -> Self {
        AuthorizationNode::Role(name.into())
    }

    pub fn wildcard_permission(pattern: impl Into<String>) -> Self {
        AuthorizationNode::WildcardPermission(pattern.into())
    }

    pub fn and(children: Vec<AuthorizationNode>) -> Self {
        AuthorizationNode::And(children)
    }

    pub fn or(children: Vec<AuthorizationNode>) -> Self {
        AuthorizationNode::Or(children)
    }

    pub fn not(child: AuthorizationNode) -> Self {
        AuthorizationNode::Not(Some(Box::new(child)))
    }

    /// `Not` with no child
    pub fn not_empty() -> Self {
        AuthorizationNode::Not(None)
    }

    /// Append a child to an `And`/`Or` node. Returns false for other kinds.
    pub fn push(&mut self, child: AuthorizationNode) -> bool {
        match self {
            AuthorizationNode::And(children) | AuthorizationNode::Or(children) => {
                children.push(child);
                true
            }
            _ => false,
        }
    }

    pub fn children(&self) -> &[AuthorizationNode] {
        match self {
            AuthorizationNode::And(children) | AuthorizationNode::Or(children) => children,
            AuthorizationNode::Not(Some(child)) => std::slice::from_ref(child.as_ref()),
            _ => &[],
        }
    }

    /// Height of the tree; a leaf has depth 1
    pub fn depth(&self) -> usize {
        1 + self
            .children()
            .iter()
            .map(AuthorizationNode::depth)
            .max()
            .unwrap_or(0)
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            AuthorizationNode::Permission(_) => ValueKind::Permission,
            AuthorizationNode::Role(_) => ValueKind::Role,
            AuthorizationNode::WildcardPermission(_) => ValueKind::WildcardPermission,
            AuthorizationNode::And(_) => ValueKind::And,
            AuthorizationNode::Or(_) => ValueKind::Or,
            AuthorizationNode::Not(_) => ValueKind::Not,
        }
    }
}

/// Authenticated user data merged from one or more identity providers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrincipalRecord {
    pub principal: AttributeMap,
    pub attributes: AttributeMap,
    pub authorizations: BTreeMap<String, BTreeSet<AuthorizationNode>>,
}

impl PrincipalRecord {
    pub fn new(principal: AttributeMap, attributes: AttributeMap) -> Self {
        Self {
            principal,
            attributes,
            authorizations: BTreeMap::new(),
        }
    }

    pub fn from_name(username: impl Into<String>) -> Self {
        let mut principal = AttributeMap::new();
        principal.insert(
            "username".to_string(),
            AttributeValue::String(username.into()),
        );
        Self::new(principal, AttributeMap::new())
    }

    pub fn from_token(access_token: impl Into<String>) -> Self {
        let mut principal = AttributeMap::new();
        principal.insert(
            "access_token".to_string(),
            AttributeValue::String(access_token.into()),
        );
        Self::new(principal, AttributeMap::new())
    }

    pub fn add_authorization(&mut self, provider: impl Into<String>, node: AuthorizationNode) {
        self.authorizations
            .entry(provider.into())
            .or_default()
            .insert(node);
    }

    pub fn authorizations_for(&self, provider: &str) -> Option<&BTreeSet<AuthorizationNode>> {
        self.authorizations.get(provider)
    }

    pub fn username(&self) -> Option<&str> {
        self.principal.get("username").and_then(AttributeValue::as_str)
    }
}

/// Holder for the user bound to a routing context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserHolder {
    user: Option<PrincipalRecord>,
}

impl UserHolder {
    pub fn new(user: Option<PrincipalRecord>) -> Self {
        Self { user }
    }

    pub fn user(&self) -> Option<&PrincipalRecord> {
        self.user.as_ref()
    }

    pub fn into_user(self) -> Option<PrincipalRecord> {
        self.user
    }
}

/// Timing metadata kept alongside session attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetaData {
    pub creation_time: DateTime<Utc>,
    /// Start and end of the most recent request that touched the session
    pub last_access: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub timeout: Duration,
}

impl SessionMetaData {
    pub fn new(creation_time: DateTime<Utc>, timeout: Duration) -> Self {
        Self {
            creation_time,
            last_access: None,
            timeout,
        }
    }

    /// A session is new until its first request completes
    pub fn is_new(&self) -> bool {
        self.last_access.is_none()
    }

    pub fn last_access_time(&self) -> DateTime<Utc> {
        self.last_access
            .map(|(_, end)| end)
            .unwrap_or(self.creation_time)
    }

    pub fn last_access_start_time(&self) -> DateTime<Utc> {
        self.last_access
            .map(|(start, _)| start)
            .unwrap_or(self.creation_time)
    }

    pub fn set_last_access(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) {
        self.last_access = Some((start, end));
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Zero timeout means the session never expires
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.timeout.is_zero() {
            return false;
        }
        match (now - self.last_access_time()).to_std() {
            Ok(elapsed) => elapsed > self.timeout,
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub active_session_count: usize,
}
