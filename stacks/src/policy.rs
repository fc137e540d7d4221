// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! IAM-shaped policy documents and their evaluation.
//!
//! Documents are declared with [`Token`]s (the secret ARN is not known
//! until the secret exists) and resolved by the provider before they are
//! evaluated.
//!
//! # Evaluation
//!
//! [`evaluate`] follows the usual order:
//!
//! 1. a matching `Deny` statement refuses the request,
//! 2. otherwise a matching `Allow` statement grants it,
//! 3. otherwise the request is implicitly denied.
//!
//! A statement matches when its action, resource and principal patterns
//! match and every condition holds. A condition whose key, or whose policy
//! variable (`${aws:PrincipalTag/appenv}`), is absent from the request does
//! not hold.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value, json};

use crate::errors::DeployError;
use crate::tags::TagSet;
use crate::tokens::{Resolver, Token};

pub const POLICY_VERSION: &str = "2012-10-17";
pub const STRING_EQUALS: &str = "StringEquals";
pub const STRING_LIKE: &str = "StringLike";
pub const ABAC_SID: &str = "AccessBasedOnResourceTags";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    #[default]
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Service(String),
    /// Root of an account; any identity of that account matches.
    Account(Token),
    Any,
}

impl Principal {
    pub fn service(name: impl Into<String>) -> Self {
        Self::Service(name.into())
    }

    fn matches(&self, caller: &Caller) -> bool {
        match (self, caller) {
            (Self::Any, _) => true,
            (Self::Service(service), Caller::Service(name)) => service == name,
            (Self::Account(account), Caller::Identity { account: caller, .. }) => {
                account.as_literal() == Some(caller.as_str())
            }
            _ => false,
        }
    }
}

/// `StringEquals` -> key -> expected value
pub type Conditions = BTreeMap<String, BTreeMap<String, Token>>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PolicyStatement {
    pub sid: Option<String>,
    pub effect: Effect,
    pub principals: Vec<Principal>,
    pub actions: Vec<String>,
    pub resources: Vec<Token>,
    pub conditions: Conditions,
}

impl PolicyStatement {
    pub fn allow() -> Self {
        Self {
            effect: Effect::Allow,
            ..Self::default()
        }
    }

    pub fn deny() -> Self {
        Self::default()
    }

    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principals.push(principal);
        self
    }

    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions.extend(actions.into_iter().map(Into::into));
        self
    }

    pub fn with_resource(mut self, resource: impl Into<Token>) -> Self {
        self.resources.push(resource.into());
        self
    }

    pub fn with_condition(
        mut self,
        operator: &str,
        key: impl Into<String>,
        value: impl Into<Token>,
    ) -> Self {
        self.conditions
            .entry(operator.to_string())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    fn resolved(&self, resolver: &dyn Resolver) -> Result<Self, DeployError> {
        let principals = self
            .principals
            .iter()
            .map(|p| match p {
                Principal::Account(account) => account.resolved(resolver).map(Principal::Account),
                other => Ok(other.clone()),
            })
            .collect::<Result<_, _>>()?;
        let resources = self
            .resources
            .iter()
            .map(|r| r.resolved(resolver))
            .collect::<Result<_, _>>()?;
        let mut conditions = Conditions::new();
        for (operator, entries) in &self.conditions {
            let mut resolved = BTreeMap::new();
            for (key, value) in entries {
                resolved.insert(key.clone(), value.resolved(resolver)?);
            }
            conditions.insert(operator.clone(), resolved);
        }
        Ok(Self {
            sid: self.sid.clone(),
            effect: self.effect,
            principals,
            actions: self.actions.clone(),
            resources,
            conditions,
        })
    }

    fn to_template(&self) -> Value {
        let mut statement = Map::new();
        if let Some(sid) = &self.sid {
            statement.insert("Sid".into(), json!(sid));
        }
        statement.insert("Effect".into(), json!(self.effect));
        if !self.principals.is_empty() {
            statement.insert("Principal".into(), principals_to_template(&self.principals));
        }
        statement.insert("Action".into(), one_or_many(self.actions.iter().map(|a| json!(a))));
        if !self.resources.is_empty() {
            statement.insert(
                "Resource".into(),
                one_or_many(self.resources.iter().map(Token::to_template)),
            );
        }
        if !self.conditions.is_empty() {
            statement.insert("Condition".into(), json!(self.conditions));
        }
        Value::Object(statement)
    }

    fn applies_to(&self, request: &RequestContext<'_>) -> bool {
        let principal_matches = self.principals.is_empty()
            || self.principals.iter().any(|p| p.matches(&request.caller));
        let action_matches = self
            .actions
            .iter()
            .any(|pattern| glob_matches(&pattern.to_ascii_lowercase(), &request.action.to_ascii_lowercase()));
        let resource_matches = self.resources.is_empty()
            || self
                .resources
                .iter()
                .filter_map(Token::as_literal)
                .any(|pattern| glob_matches(pattern, request.resource));

        principal_matches
            && action_matches
            && resource_matches
            && self
                .conditions
                .iter()
                .all(|(operator, entries)| condition_holds(operator, entries, request))
    }
}

impl Serialize for PolicyStatement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_template().serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PolicyDocument {
    pub statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statements: impl IntoIterator<Item = PolicyStatement>) -> Self {
        Self {
            statements: statements.into_iter().collect(),
        }
    }

    pub fn resolved(&self, resolver: &dyn Resolver) -> Result<Self, DeployError> {
        Ok(Self {
            statements: self
                .statements
                .iter()
                .map(|s| s.resolved(resolver))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn to_template(&self) -> Value {
        json!({
            "Version": POLICY_VERSION,
            "Statement": self.statements.iter().map(PolicyStatement::to_template).collect::<Vec<_>>(),
        })
    }

    /// Whether this trust policy lets `caller` perform `action`.
    pub fn trusts(&self, caller: &Caller, action: &str) -> bool {
        let no_tags = TagSet::new();
        let no_context = BTreeMap::new();
        let request = RequestContext {
            caller: caller.clone(),
            action,
            resource: "*",
            principal_tags: &no_tags,
            resource_tags: &no_tags,
            context: &no_context,
        };
        evaluate(&[self], &request).is_allowed()
    }
}

impl Serialize for PolicyDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_template().serialize(serializer)
    }
}

/// Statement granting `actions` on `resources` only when every attribute in
/// `attributes` has the same value as a principal tag and as a resource tag.
pub fn abac_statement<I, S>(
    service: &str,
    actions: I,
    resources: impl IntoIterator<Item = Token>,
    attributes: &TagSet,
) -> PolicyStatement
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut statement = PolicyStatement::allow()
        .with_sid(ABAC_SID)
        .with_actions(actions);
    statement.resources.extend(resources);
    for key in attributes.keys() {
        statement = statement.with_condition(
            STRING_EQUALS,
            format!("{service}:ResourceTag/{key}"),
            format!("${{aws:PrincipalTag/{key}}}"),
        );
    }
    statement
}

/// Who is calling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Service(String),
    Identity { arn: String, account: String },
}

impl Caller {
    pub fn arn(&self) -> &str {
        match self {
            Self::Service(name) => name,
            Self::Identity { arn, .. } => arn,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    pub caller: Caller,
    pub action: &'a str,
    pub resource: &'a str,
    pub principal_tags: &'a TagSet,
    pub resource_tags: &'a TagSet,
    /// Global and service condition keys (`kms:ViaService`, ...).
    pub context: &'a BTreeMap<String, String>,
}

impl RequestContext<'_> {
    fn lookup(&self, key: &str) -> Option<&str> {
        if let Some((_, tag)) = key.split_once(":ResourceTag/") {
            return self.resource_tags.get(tag);
        }
        if let Some(tag) = key.strip_prefix("aws:PrincipalTag/") {
            return self.principal_tags.get(tag);
        }
        self.context.get(key).map(String::as_str)
    }

    /// Expands `${...}` policy variables. `None` when one is missing.
    fn expand(&self, value: &str) -> Option<String> {
        let mut expanded = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(start) = rest.find("${") {
            let end = rest[start..].find('}')? + start;
            expanded.push_str(&rest[..start]);
            expanded.push_str(self.lookup(&rest[start + 2..end])?);
            rest = &rest[end + 1..];
        }
        expanded.push_str(rest);
        Some(expanded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub effect: Effect,
    pub matched_statement: Option<String>,
    pub reason: String,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        self.effect == Effect::Allow
    }
}

pub fn evaluate(documents: &[&PolicyDocument], request: &RequestContext<'_>) -> Decision {
    let matching: Vec<&PolicyStatement> = documents
        .iter()
        .flat_map(|d| d.statements.iter())
        .filter(|s| s.applies_to(request))
        .collect();

    if let Some(deny) = matching.iter().find(|s| s.effect == Effect::Deny) {
        return Decision {
            effect: Effect::Deny,
            matched_statement: deny.sid.clone(),
            reason: format!("explicit deny for {}", request.action),
        };
    }

    if let Some(allow) = matching.first() {
        return Decision {
            effect: Effect::Allow,
            matched_statement: allow.sid.clone(),
            reason: format!("allowed {} on {}", request.action, request.resource),
        };
    }

    Decision {
        effect: Effect::Deny,
        matched_statement: None,
        reason: format!(
            "no statement allows {} on {}",
            request.action, request.resource
        ),
    }
}

fn condition_holds(
    operator: &str,
    entries: &BTreeMap<String, Token>,
    request: &RequestContext<'_>,
) -> bool {
    entries.iter().all(|(key, expected)| {
        let Some(actual) = request.lookup(key) else {
            return false;
        };
        let Some(expected) = expected.as_literal().and_then(|v| request.expand(v)) else {
            return false;
        };
        match operator {
            STRING_EQUALS => actual == expected,
            STRING_LIKE => glob_matches(&expected, actual),
            _ => false,
        }
    })
}

fn principals_to_template(principals: &[Principal]) -> Value {
    let mut services = Vec::new();
    let mut accounts = Vec::new();
    for principal in principals {
        match principal {
            Principal::Service(service) => services.push(json!(service)),
            Principal::Account(account) => accounts.push(
                Token::join([
                    "arn:".into(),
                    Token::partition(),
                    ":iam::".into(),
                    account.clone(),
                    ":root".into(),
                ])
                .to_template(),
            ),
            Principal::Any => accounts.push(json!("*")),
        }
    }
    let mut map = Map::new();
    if !accounts.is_empty() {
        map.insert("AWS".into(), one_or_many(accounts));
    }
    if !services.is_empty() {
        map.insert("Service".into(), one_or_many(services));
    }
    Value::Object(map)
}

fn one_or_many(values: impl IntoIterator<Item = Value>) -> Value {
    let mut values: Vec<Value> = values.into_iter().collect();
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    }
}

/// `*` matches any run of characters, `?` exactly one.
pub fn glob_matches(pattern: &str, value: &str) -> bool {
    glob_match_recursive(pattern.as_bytes(), value.as_bytes())
}

fn glob_match_recursive(pattern: &[u8], value: &[u8]) -> bool {
    match (pattern.first(), value.first()) {
        (None, None) => true,
        (Some(b'*'), _) if pattern.len() == 1 => true,
        (Some(b'*'), _) => {
            glob_match_recursive(&pattern[1..], value)
                || (!value.is_empty() && glob_match_recursive(pattern, &value[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match_recursive(&pattern[1..], &value[1..]),
        (Some(p), Some(v)) if p == v => glob_match_recursive(&pattern[1..], &value[1..]),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET_ARN: &str = "arn:aws:secretsmanager:us-east-1:111111111111:secret:/app1/web/dev/demo-AbCdEf";

    fn attributes(appenv: &str) -> TagSet {
        TagSet::from([("appid", "app1"), ("appfunc", "web"), ("appenv", appenv)])
    }

    fn abac_policy() -> PolicyDocument {
        PolicyDocument::new([abac_statement(
            "secretsmanager",
            ["secretsmanager:GetSecretValue", "secretsmanager:DescribeSecret"],
            [Token::literal(SECRET_ARN)],
            &attributes("dev"),
        )])
    }

    fn caller() -> Caller {
        Caller::Identity {
            arn: "arn:aws:sts::111111111111:assumed-role/allowed/session".into(),
            account: "111111111111".into(),
        }
    }

    fn request<'a>(
        principal_tags: &'a TagSet,
        resource_tags: &'a TagSet,
        context: &'a BTreeMap<String, String>,
    ) -> RequestContext<'a> {
        RequestContext {
            caller: caller(),
            action: "secretsmanager:GetSecretValue",
            resource: SECRET_ARN,
            principal_tags,
            resource_tags,
            context,
        }
    }

    #[test]
    fn test_matching_tags_allow() {
        let policy = abac_policy();
        let principal = attributes("dev");
        let resource = attributes("dev").merged(&TagSet::from([("name", "demo")]));
        let context = BTreeMap::new();
        let decision = evaluate(&[&policy], &request(&principal, &resource, &context));
        assert!(decision.is_allowed());
        assert_eq!(decision.matched_statement.as_deref(), Some(ABAC_SID));
    }

    #[test]
    fn test_any_mismatched_attribute_denies() {
        let policy = abac_policy();
        let resource = attributes("dev");
        let context = BTreeMap::new();
        for (key, value) in [("appenv", "nonp"), ("appid", "app2"), ("appfunc", "batch")] {
            let mut principal = attributes("dev");
            principal.insert(key, value);
            let decision = evaluate(&[&policy], &request(&principal, &resource, &context));
            assert!(!decision.is_allowed(), "{key}={value} should be denied");
        }
    }

    #[test]
    fn test_missing_principal_tag_denies() {
        let policy = abac_policy();
        let principal = TagSet::from([("appid", "app1"), ("appfunc", "web")]);
        let resource = attributes("dev");
        let context = BTreeMap::new();
        assert!(!evaluate(&[&policy], &request(&principal, &resource, &context)).is_allowed());
    }

    #[test]
    fn test_missing_resource_tag_denies() {
        let policy = abac_policy();
        let principal = attributes("dev");
        let resource = TagSet::from([("appid", "app1"), ("appfunc", "web")]);
        let context = BTreeMap::new();
        assert!(!evaluate(&[&policy], &request(&principal, &resource, &context)).is_allowed());
    }

    #[test]
    fn test_action_not_granted() {
        let policy = abac_policy();
        let tags = attributes("dev");
        let context = BTreeMap::new();
        let mut req = request(&tags, &tags, &context);
        req.action = "secretsmanager:DeleteSecret";
        assert!(!evaluate(&[&policy], &req).is_allowed());
    }

    #[test]
    fn test_explicit_deny_wins() {
        let allow = abac_policy();
        let deny = PolicyDocument::new([PolicyStatement::deny()
            .with_actions(["secretsmanager:*"])
            .with_resource("*")]);
        let tags = attributes("dev");
        let context = BTreeMap::new();
        let decision = evaluate(&[&allow, &deny], &request(&tags, &tags, &context));
        assert_eq!(decision.effect, Effect::Deny);
        assert!(decision.reason.contains("explicit deny"));
    }

    #[test]
    fn test_context_conditions() {
        let key_policy = PolicyDocument::new([PolicyStatement::allow()
            .with_principal(Principal::Any)
            .with_actions(["kms:Decrypt", "kms:ReEncrypt*"])
            .with_resource("*")
            .with_condition(STRING_EQUALS, "kms:CallerAccount", "111111111111")
            .with_condition(
                STRING_EQUALS,
                "kms:ViaService",
                "secretsmanager.us-east-1.amazonaws.com",
            )]);
        let tags = TagSet::new();
        let mut context = BTreeMap::from([
            ("kms:CallerAccount".to_string(), "111111111111".to_string()),
            (
                "kms:ViaService".to_string(),
                "secretsmanager.us-east-1.amazonaws.com".to_string(),
            ),
        ]);
        let mut req = request(&tags, &tags, &context);
        req.action = "kms:ReEncryptFrom";
        assert!(evaluate(&[&key_policy], &req).is_allowed());

        context.remove("kms:ViaService");
        let mut req = request(&tags, &tags, &context);
        req.action = "kms:Decrypt";
        assert!(!evaluate(&[&key_policy], &req).is_allowed());
    }

    #[test]
    fn test_trust_policy() {
        let trust = PolicyDocument::new([PolicyStatement::allow()
            .with_principal(Principal::service("lambda.amazonaws.com"))
            .with_principal(Principal::Account("111111111111".into()))
            .with_actions(["sts:AssumeRole"])]);
        assert!(trust.trusts(&Caller::Service("lambda.amazonaws.com".into()), "sts:AssumeRole"));
        assert!(trust.trusts(&caller(), "sts:AssumeRole"));
        assert!(!trust.trusts(
            &Caller::Service("rolesanywhere.amazonaws.com".into()),
            "sts:AssumeRole"
        ));
        assert!(!trust.trusts(&caller(), "sts:TagSession"));
    }

    #[test]
    fn test_abac_statement_template() {
        let statement = abac_statement(
            "secretsmanager",
            ["secretsmanager:GetSecretValue"],
            [Token::attr("Secret", "Arn")],
            &attributes("dev"),
        );
        assert_eq!(
            statement.to_template(),
            json!({
                "Sid": "AccessBasedOnResourceTags",
                "Effect": "Allow",
                "Action": "secretsmanager:GetSecretValue",
                "Resource": {"Fn::GetAtt": ["Secret", "Arn"]},
                "Condition": {
                    "StringEquals": {
                        "secretsmanager:ResourceTag/appenv": "${aws:PrincipalTag/appenv}",
                        "secretsmanager:ResourceTag/appfunc": "${aws:PrincipalTag/appfunc}",
                        "secretsmanager:ResourceTag/appid": "${aws:PrincipalTag/appid}"
                    }
                }
            })
        );
    }

    #[test]
    fn test_glob_matches() {
        assert!(glob_matches("*", "anything"));
        assert!(glob_matches("kms:reencrypt*", "kms:reencryptfrom"));
        assert!(glob_matches("arn:aws:s3:::bucket/*", "arn:aws:s3:::bucket/crl/1.crl"));
        assert!(glob_matches("a?c", "abc"));
        assert!(!glob_matches("a?c", "ac"));
        assert!(!glob_matches("secret", "secret-x"));
    }
}
