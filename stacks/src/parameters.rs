// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Shared parameter store used to hand identifiers from one stack to
//! another.
//!
//! A key belongs to the stack that first wrote it. The owner may write it
//! again (an identical value is a no-op), any other writer gets
//! [`StoreError::Collision`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::errors::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub key: String,
    pub value: String,
    pub owner: String,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    Updated,
    Unchanged,
}

#[async_trait]
pub trait ParameterStore: Send + Sync {
    async fn put(&self, key: &str, value: &str, owner: &str) -> Result<PutOutcome, StoreError>;
    async fn get(&self, key: &str) -> Result<String, StoreError>;
    async fn delete(&self, key: &str, owner: &str) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<Parameter>, StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
struct Parameters(BTreeMap<String, Parameter>);

impl Parameters {
    fn put(&mut self, key: &str, value: &str, owner: &str) -> Result<PutOutcome, StoreError> {
        match self.0.get_mut(key) {
            Some(existing) if existing.owner != owner => Err(StoreError::Collision {
                key: key.to_string(),
                owner: existing.owner.clone(),
            }),
            Some(existing) if existing.value == value => Ok(PutOutcome::Unchanged),
            Some(existing) => {
                existing.value = value.to_string();
                existing.version += 1;
                Ok(PutOutcome::Updated)
            }
            None => {
                self.0.insert(
                    key.to_string(),
                    Parameter {
                        key: key.to_string(),
                        value: value.to_string(),
                        owner: owner.to_string(),
                        version: 1,
                    },
                );
                Ok(PutOutcome::Created)
            }
        }
    }

    fn get(&self, key: &str) -> Result<String, StoreError> {
        self.0
            .get(key)
            .map(|p| p.value.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn delete(&mut self, key: &str, owner: &str) -> Result<(), StoreError> {
        match self.0.get(key) {
            None => Err(StoreError::NotFound(key.to_string())),
            Some(existing) if existing.owner != owner => Err(StoreError::Collision {
                key: key.to_string(),
                owner: existing.owner.clone(),
            }),
            Some(_) => {
                self.0.remove(key);
                Ok(())
            }
        }
    }

    fn list(&self) -> Vec<Parameter> {
        self.0.values().cloned().collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryParameterStore {
    parameters: RwLock<Parameters>,
}

impl InMemoryParameterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ParameterStore for InMemoryParameterStore {
    async fn put(&self, key: &str, value: &str, owner: &str) -> Result<PutOutcome, StoreError> {
        self.parameters.write().await.put(key, value, owner)
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        self.parameters.read().await.get(key)
    }

    async fn delete(&self, key: &str, owner: &str) -> Result<(), StoreError> {
        self.parameters.write().await.delete(key, owner)
    }

    async fn list(&self) -> Result<Vec<Parameter>, StoreError> {
        Ok(self.parameters.read().await.list())
    }
}

/// Store persisted as a JSON file, so separate CLI runs see each other's
/// parameters. Every call reads the file and every write rewrites it.
#[derive(Debug)]
pub struct JsonFileParameterStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileParameterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, source: impl std::fmt::Display) -> StoreError {
        StoreError::Unavailable(format!("{}: {}", self.path.display(), source))
    }

    async fn load(&self) -> Result<Parameters, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| self.unavailable(e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Parameters::default()),
            Err(e) => Err(self.unavailable(e)),
        }
    }

    async fn save(&self, parameters: &Parameters) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.unavailable(e))?;
        }
        let raw = serde_json::to_vec_pretty(parameters).map_err(|e| self.unavailable(e))?;
        tokio::fs::write(&self.path, raw)
            .await
            .map_err(|e| self.unavailable(e))
    }
}

#[async_trait]
impl ParameterStore for JsonFileParameterStore {
    #[tracing::instrument(skip(self, value))]
    async fn put(&self, key: &str, value: &str, owner: &str) -> Result<PutOutcome, StoreError> {
        let _guard = self.lock.lock().await;
        let mut parameters = self.load().await?;
        let outcome = parameters.put(key, value, owner)?;
        if outcome != PutOutcome::Unchanged {
            self.save(&parameters).await?;
        }
        Ok(outcome)
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        let _guard = self.lock.lock().await;
        self.load().await?.get(key)
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, key: &str, owner: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut parameters = self.load().await?;
        parameters.delete(key, owner)?;
        self.save(&parameters).await
    }

    async fn list(&self) -> Result<Vec<Parameter>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "/app1/web/dev/demo-AsmSsmPara";

    #[tokio::test]
    async fn test_write_once_per_owner() {
        let store = InMemoryParameterStore::new();
        assert_eq!(
            store.put(KEY, "arn:1", "common").await.unwrap(),
            PutOutcome::Created
        );
        assert_eq!(
            store.put(KEY, "arn:1", "common").await.unwrap(),
            PutOutcome::Unchanged
        );
        assert_eq!(
            store.put(KEY, "arn:2", "other").await,
            Err(StoreError::Collision {
                key: KEY.into(),
                owner: "common".into()
            })
        );
        assert_eq!(store.get(KEY).await.unwrap(), "arn:1");
    }

    #[tokio::test]
    async fn test_owner_may_update() {
        let store = InMemoryParameterStore::new();
        store.put(KEY, "arn:1", "common").await.unwrap();
        assert_eq!(
            store.put(KEY, "arn:2", "common").await.unwrap(),
            PutOutcome::Updated
        );
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].version, 2);
        assert_eq!(listed[0].value, "arn:2");
    }

    #[tokio::test]
    async fn test_missing_key() {
        let store = InMemoryParameterStore::new();
        assert_eq!(
            store.get(KEY).await,
            Err(StoreError::NotFound(KEY.into()))
        );
    }

    #[tokio::test]
    async fn test_delete_requires_owner() {
        let store = InMemoryParameterStore::new();
        store.put(KEY, "arn:1", "common").await.unwrap();
        assert!(matches!(
            store.delete(KEY, "other").await,
            Err(StoreError::Collision { .. })
        ));
        store.delete(KEY, "common").await.unwrap();
        assert!(store.get(KEY).await.is_err());
        assert!(matches!(
            store.delete(KEY, "common").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/parameters.json");

        let store = JsonFileParameterStore::new(&path);
        store.put(KEY, "arn:1", "common").await.unwrap();

        let reopened = JsonFileParameterStore::new(&path);
        assert_eq!(reopened.get(KEY).await.unwrap(), "arn:1");
        assert!(matches!(
            reopened.put(KEY, "arn:1", "other").await,
            Err(StoreError::Collision { .. })
        ));
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parameters.json");
        std::fs::write(&path, b"not json").unwrap();
        let store = JsonFileParameterStore::new(&path);
        assert!(matches!(
            store.get(KEY).await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
