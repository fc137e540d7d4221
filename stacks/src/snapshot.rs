// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Provider state kept between CLI runs.
//!
//! `deploy` loads a [`StateFile`] before applying and saves it afterwards,
//! so a run against unchanged input finds every resource in place and
//! reports it unchanged instead of creating it again.

use std::path::{Path, PathBuf};

use crate::errors::StoreError;
use crate::provider::CloudState;

#[derive(Debug)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, source: impl std::fmt::Display) -> StoreError {
        StoreError::Unavailable(format!("{}: {}", self.path.display(), source))
    }

    /// The saved state, or an empty account when nothing was saved yet.
    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn load(&self) -> Result<CloudState, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| self.unavailable(e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CloudState::default()),
            Err(e) => Err(self.unavailable(e)),
        }
    }

    #[tracing::instrument(skip(self, state), fields(path = %self.path.display()))]
    pub async fn save(&self, state: &CloudState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.unavailable(e))?;
        }
        let raw = serde_json::to_vec_pretty(state).map_err(|e| self.unavailable(e))?;
        tokio::fs::write(&self.path, raw)
            .await
            .map_err(|e| self.unavailable(e))?;
        tracing::info!("[stacks] saved {} stacks", state.stacks.len());
        Ok(())
    }
}

/// Storage form of resolved policy documents, whose tokens are all
/// literals. Used through `#[serde(with = ...)]`.
pub(crate) mod stored_policy {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer, ser};

    use crate::policy::{Effect, PolicyDocument, PolicyStatement, Principal};
    use crate::tokens::Token;

    #[derive(Serialize, Deserialize)]
    enum StoredPrincipal {
        Service(String),
        Account(String),
        Any,
    }

    #[derive(Serialize, Deserialize)]
    struct StoredStatement {
        sid: Option<String>,
        effect: Effect,
        principals: Vec<StoredPrincipal>,
        actions: Vec<String>,
        resources: Vec<String>,
        conditions: BTreeMap<String, BTreeMap<String, String>>,
    }

    fn literal(token: &Token) -> Result<String, String> {
        token
            .as_literal()
            .map(str::to_string)
            .ok_or_else(|| format!("unresolved token {}", token.to_template()))
    }

    fn store(statement: &PolicyStatement) -> Result<StoredStatement, String> {
        let principals = statement
            .principals
            .iter()
            .map(|principal| match principal {
                Principal::Service(service) => Ok(StoredPrincipal::Service(service.clone())),
                Principal::Account(account) => literal(account).map(StoredPrincipal::Account),
                Principal::Any => Ok(StoredPrincipal::Any),
            })
            .collect::<Result<_, _>>()?;
        let resources = statement
            .resources
            .iter()
            .map(literal)
            .collect::<Result<_, _>>()?;
        let mut conditions = BTreeMap::new();
        for (operator, entries) in &statement.conditions {
            let mut stored = BTreeMap::new();
            for (key, value) in entries {
                stored.insert(key.clone(), literal(value)?);
            }
            conditions.insert(operator.clone(), stored);
        }
        Ok(StoredStatement {
            sid: statement.sid.clone(),
            effect: statement.effect,
            principals,
            actions: statement.actions.clone(),
            resources,
            conditions,
        })
    }

    fn restore(stored: StoredStatement) -> PolicyStatement {
        PolicyStatement {
            sid: stored.sid,
            effect: stored.effect,
            principals: stored
                .principals
                .into_iter()
                .map(|principal| match principal {
                    StoredPrincipal::Service(service) => Principal::Service(service),
                    StoredPrincipal::Account(account) => Principal::Account(Token::literal(account)),
                    StoredPrincipal::Any => Principal::Any,
                })
                .collect(),
            actions: stored.actions,
            resources: stored.resources.into_iter().map(Token::literal).collect(),
            conditions: stored
                .conditions
                .into_iter()
                .map(|(operator, entries)| {
                    let entries = entries
                        .into_iter()
                        .map(|(key, value)| (key, Token::literal(value)))
                        .collect();
                    (operator, entries)
                })
                .collect(),
        }
    }

    pub fn serialize<S: Serializer>(
        document: &PolicyDocument,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let statements = document
            .statements
            .iter()
            .map(store)
            .collect::<Result<Vec<_>, _>>()
            .map_err(<S::Error as ser::Error>::custom)?;
        statements.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<PolicyDocument, D::Error> {
        let statements = Vec::<StoredStatement>::deserialize(deserializer)?;
        Ok(PolicyDocument::new(statements.into_iter().map(restore)))
    }
}
