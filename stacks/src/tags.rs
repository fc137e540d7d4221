// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Application tag configuration and the names derived from it.
//!
//! Every unit receives the same [`TagConfig`] by reference. It is the single
//! source of resource tags, ABAC attributes and parameter keys, so producers
//! and consumers always agree on the names they exchange.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::constants::{
    ACCESS_ATTRIBUTES, FUNCTION_PREFIX, MAX_TAG_VALUE_LENGTH, TAG_APPENV, TAG_APPFUNC, TAG_APPID,
    TAG_DATA_CLASSIFICATION, TAG_NAME,
};
use crate::errors::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct TagConfig {
    #[validate(length(min = 1, max = MAX_TAG_VALUE_LENGTH))]
    pub name: String,
    #[validate(length(min = 1, max = MAX_TAG_VALUE_LENGTH))]
    pub appid: String,
    #[validate(length(min = 1, max = MAX_TAG_VALUE_LENGTH))]
    pub appfunc: String,
    #[validate(length(min = 1, max = MAX_TAG_VALUE_LENGTH))]
    pub appenv: String,
    #[validate(length(min = 1, max = MAX_TAG_VALUE_LENGTH))]
    pub dataclassification: String,
}

impl TagConfig {
    /// Reads and validates the tag configuration file.
    #[tracing::instrument]
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read(path)
            .map_err(|e| AppError::ConfigError(format!("{}: {}", path.display(), e)))?;
        Self::from_slice(&raw)
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, AppError> {
        let config: TagConfig = serde_json::from_slice(raw)
            .map_err(|e| AppError::ConfigError(format!("invalid tag config: {e}")))?;
        config
            .validate()
            .map_err(|e| AppError::ConfigError(e.to_string()))?;
        Ok(config)
    }

    /// `/{appid}/{appfunc}/{appenv}/{name}`
    pub fn path(&self) -> String {
        format!(
            "/{}/{}/{}/{}",
            self.appid, self.appfunc, self.appenv, self.name
        )
    }

    pub fn parameter_key(&self, suffix: ParameterSuffix) -> String {
        format!("{}-{}", self.path(), suffix)
    }

    pub fn secret_name(&self) -> String {
        self.path()
    }

    pub fn key_alias(&self) -> String {
        format!(
            "alias/{}/{}/{}/{}/kmsKey",
            self.appid, self.appfunc, self.appenv, self.name
        )
    }

    pub fn function_name(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            FUNCTION_PREFIX, self.appid, self.appfunc, self.appenv
        )
    }

    /// All five tags, applied to the protected resource.
    pub fn resource_tags(&self) -> TagSet {
        TagSet::from([
            (TAG_NAME, self.name.as_str()),
            (TAG_APPID, self.appid.as_str()),
            (TAG_APPFUNC, self.appfunc.as_str()),
            (TAG_APPENV, self.appenv.as_str()),
            (TAG_DATA_CLASSIFICATION, self.dataclassification.as_str()),
        ])
    }

    /// The attributes compared by the ABAC condition and carried by
    /// credential principals.
    pub fn access_tags(&self) -> TagSet {
        self.resource_tags().select(&ACCESS_ATTRIBUTES)
    }

    /// Same application identity in another environment.
    pub fn with_appenv(&self, appenv: impl Into<String>) -> Self {
        Self {
            appenv: appenv.into(),
            ..self.clone()
        }
    }
}

/// Suffixes of the parameters exchanged between units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParameterSuffix {
    Secret,
    Policy,
    OnPremRole,
    CertificateAuthority,
    TrustAnchor,
    Profile,
    Vpc,
}

impl ParameterSuffix {
    pub const ALL: [ParameterSuffix; 7] = [
        ParameterSuffix::Secret,
        ParameterSuffix::Policy,
        ParameterSuffix::OnPremRole,
        ParameterSuffix::CertificateAuthority,
        ParameterSuffix::TrustAnchor,
        ParameterSuffix::Profile,
        ParameterSuffix::Vpc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Secret => "AsmSsmPara",
            Self::Policy => "IAMSsmPara",
            Self::OnPremRole => "onPremAppRoleSsmParam",
            Self::CertificateAuthority => "pcaArnSsmParam",
            Self::TrustAnchor => "rolesAnywhereTrustAnchorSsmParam",
            Self::Profile => "rolesAnywhereProfileSsmParam",
            Self::Vpc => "appVpcSsmParam",
        }
    }
}

impl fmt::Display for ParameterSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sorted tag map; equality does not depend on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keeps only the listed keys.
    pub fn select(&self, keys: &[&str]) -> TagSet {
        TagSet(
            self.0
                .iter()
                .filter(|(k, _)| keys.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Tags in the `[{"Key": .., "Value": ..}]` shape used by templates.
    pub fn to_template(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.0
                .iter()
                .map(|(k, v)| serde_json::json!({"Key": k, "Value": v}))
                .collect(),
        )
    }

    /// Later tags win.
    pub fn merged(&self, other: &TagSet) -> TagSet {
        let mut merged = self.clone();
        merged.0.extend(other.0.clone());
        merged
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for TagSet {
    fn from(pairs: [(K, V); N]) -> Self {
        TagSet(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> TagConfig {
        TagConfig {
            name: "demo".into(),
            appid: "app1".into(),
            appfunc: "web".into(),
            appenv: "dev".into(),
            dataclassification: "internal".into(),
        }
    }

    #[test]
    fn test_parameter_keys() {
        let tags = demo();
        assert_eq!(
            tags.parameter_key(ParameterSuffix::Secret),
            "/app1/web/dev/demo-AsmSsmPara"
        );
        assert_eq!(
            tags.parameter_key(ParameterSuffix::Profile),
            "/app1/web/dev/demo-rolesAnywhereProfileSsmParam"
        );
        assert_eq!(
            tags.parameter_key(ParameterSuffix::Vpc),
            "/app1/web/dev/demo-appVpcSsmParam"
        );
    }

    #[test]
    fn test_parameter_keys_are_unique() {
        let tags = demo();
        let keys: std::collections::BTreeSet<String> = ParameterSuffix::ALL
            .iter()
            .map(|s| tags.parameter_key(*s))
            .collect();
        assert_eq!(keys.len(), ParameterSuffix::ALL.len());
    }

    #[test]
    fn test_derived_names() {
        let tags = demo();
        assert_eq!(tags.secret_name(), "/app1/web/dev/demo");
        assert_eq!(tags.key_alias(), "alias/app1/web/dev/demo/kmsKey");
        assert_eq!(tags.function_name(), "asmFetchLambda_app1_web_dev");
    }

    #[test]
    fn test_access_tags_subset_of_resource_tags() {
        let tags = demo();
        let resource = tags.resource_tags();
        let access = tags.access_tags();
        assert_eq!(resource.len(), 5);
        assert_eq!(access.keys().collect::<Vec<_>>(), ["appenv", "appfunc", "appid"]);
        for (k, v) in access.iter() {
            assert_eq!(resource.get(k), Some(v));
        }
    }

    #[test]
    fn test_tag_set_equality_ignores_order() {
        let a = TagSet::from([("appid", "app1"), ("appenv", "dev")]);
        let b = TagSet::from([("appenv", "dev"), ("appid", "app1")]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_with_appenv() {
        let other = demo().with_appenv("nonp");
        assert_eq!(other.access_tags().get("appenv"), Some("nonp"));
        assert_eq!(other.appid, "app1");
    }

    #[test]
    fn test_from_slice() {
        let raw = br#"{"name":"demo","appid":"app1","appfunc":"web","appenv":"dev","dataclassification":"internal"}"#;
        assert_eq!(TagConfig::from_slice(raw).unwrap(), demo());
    }

    #[test]
    fn test_from_slice_rejects_empty_field() {
        let raw = br#"{"name":"","appid":"app1","appfunc":"web","appenv":"dev","dataclassification":"internal"}"#;
        assert!(matches!(
            TagConfig::from_slice(raw),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    fn test_from_slice_rejects_missing_and_unknown_fields() {
        let missing = br#"{"name":"demo","appid":"app1","appfunc":"web","appenv":"dev"}"#;
        assert!(TagConfig::from_slice(missing).is_err());
        let unknown = br#"{"name":"demo","appid":"app1","appfunc":"web","appenv":"dev","dataclassification":"internal","owner":"x"}"#;
        assert!(TagConfig::from_slice(unknown).is_err());
    }
}
