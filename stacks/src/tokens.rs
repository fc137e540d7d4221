// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Late-bound values.
//!
//! A [`Token`] stands for a string that is only known once the resource it
//! points at exists: an ARN, a parameter published by another stack, the
//! target account. Tokens serialize to template intrinsics (`Ref`,
//! `Fn::GetAtt`, `Fn::Join`) and are turned into plain strings by a
//! [`Resolver`] when the provider applies a stack.

use serde::{Serialize, Serializer};
use serde_json::{Value, json};

use crate::errors::DeployError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pseudo {
    AccountId,
    Region,
    Partition,
}

impl Pseudo {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AccountId => "AWS::AccountId",
            Self::Region => "AWS::Region",
            Self::Partition => "AWS::Partition",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    /// Primary identifier of a node in the same stack.
    Ref(String),
    Attr {
        node: String,
        attribute: String,
    },
    /// Value of a published parameter, looked up at deploy time.
    Parameter(String),
    Pseudo(Pseudo),
    Join(Vec<Token>),
}

/// Supplies concrete values for tokens.
pub trait Resolver {
    fn reference(&self, node: &str) -> Result<String, DeployError>;
    fn attribute(&self, node: &str, attribute: &str) -> Result<String, DeployError>;
    fn parameter(&self, key: &str) -> Result<String, DeployError>;
    fn pseudo(&self, pseudo: Pseudo) -> String;
}

impl Token {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn reference(node: impl Into<String>) -> Self {
        Self::Ref(node.into())
    }

    pub fn attr(node: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Attr {
            node: node.into(),
            attribute: attribute.into(),
        }
    }

    pub fn join(parts: impl IntoIterator<Item = Token>) -> Self {
        Self::Join(parts.into_iter().collect())
    }

    pub fn account() -> Self {
        Self::Pseudo(Pseudo::AccountId)
    }

    pub fn region() -> Self {
        Self::Pseudo(Pseudo::Region)
    }

    pub fn partition() -> Self {
        Self::Pseudo(Pseudo::Partition)
    }

    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Self::Literal(value) => Some(value),
            _ => None,
        }
    }

    pub fn resolve(&self, resolver: &dyn Resolver) -> Result<String, DeployError> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Ref(node) => resolver.reference(node),
            Self::Attr { node, attribute } => resolver.attribute(node, attribute),
            Self::Parameter(key) => resolver.parameter(key),
            Self::Pseudo(pseudo) => Ok(resolver.pseudo(*pseudo)),
            Self::Join(parts) => parts
                .iter()
                .map(|part| part.resolve(resolver))
                .collect::<Result<Vec<_>, _>>()
                .map(|parts| parts.concat()),
        }
    }

    /// Same token with every late-bound part replaced by its value.
    pub fn resolved(&self, resolver: &dyn Resolver) -> Result<Token, DeployError> {
        self.resolve(resolver).map(Token::Literal)
    }

    pub fn to_template(&self) -> Value {
        match self {
            Self::Literal(value) => Value::String(value.clone()),
            Self::Ref(node) => json!({"Ref": node}),
            Self::Attr { node, attribute } => json!({"Fn::GetAtt": [node, attribute]}),
            Self::Parameter(key) => json!({"Ref": parameter_logical_id(key)}),
            Self::Pseudo(pseudo) => json!({"Ref": pseudo.name()}),
            Self::Join(parts) => {
                let parts: Vec<Value> = parts.iter().map(Token::to_template).collect();
                json!({"Fn::Join": ["", parts]})
            }
        }
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self::Literal(value)
    }
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_template().serialize(serializer)
    }
}

pub const PARAMETER_ID_PREFIX: &str = "SsmParameterValue";

/// Template parameter that carries the value of a published parameter.
pub fn parameter_logical_id(key: &str) -> String {
    let sanitized: String = key.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    format!("{PARAMETER_ID_PREFIX}{sanitized}")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl Resolver for Fixed {
        fn reference(&self, node: &str) -> Result<String, DeployError> {
            Ok(format!("id-{node}"))
        }

        fn attribute(&self, node: &str, attribute: &str) -> Result<String, DeployError> {
            if attribute == "Arn" {
                Ok(format!("arn:{node}"))
            } else {
                Err(DeployError::UnknownAttribute {
                    node: node.into(),
                    attribute: attribute.into(),
                })
            }
        }

        fn parameter(&self, key: &str) -> Result<String, DeployError> {
            Err(DeployError::UndeclaredParameter(key.into()))
        }

        fn pseudo(&self, pseudo: Pseudo) -> String {
            match pseudo {
                Pseudo::AccountId => "111111111111".into(),
                Pseudo::Region => "us-east-1".into(),
                Pseudo::Partition => "aws".into(),
            }
        }
    }

    #[test]
    fn test_resolve_join() {
        let token = Token::join([
            "secretsmanager.".into(),
            Token::region(),
            ".amazonaws.com".into(),
        ]);
        assert_eq!(
            token.resolve(&Fixed).unwrap(),
            "secretsmanager.us-east-1.amazonaws.com"
        );
    }

    #[test]
    fn test_resolve_propagates_errors() {
        let token = Token::join([Token::attr("Key", "KeyId"), "x".into()]);
        assert!(matches!(
            token.resolve(&Fixed),
            Err(DeployError::UnknownAttribute { .. })
        ));
        assert!(Token::Parameter("/a/b".into()).resolve(&Fixed).is_err());
    }

    #[test]
    fn test_template_intrinsics() {
        assert_eq!(
            Token::attr("Secret", "Arn").to_template(),
            json!({"Fn::GetAtt": ["Secret", "Arn"]})
        );
        assert_eq!(Token::reference("Vpc").to_template(), json!({"Ref": "Vpc"}));
        assert_eq!(
            Token::account().to_template(),
            json!({"Ref": "AWS::AccountId"})
        );
        assert_eq!(
            Token::Parameter("/app1/web/dev/demo-AsmSsmPara".into()).to_template(),
            json!({"Ref": "SsmParameterValueapp1webdevdemoAsmSsmPara"})
        );
    }

    #[test]
    fn test_as_literal() {
        assert_eq!(Token::literal("x").as_literal(), Some("x"));
        assert_eq!(Token::region().as_literal(), None);
    }
}
