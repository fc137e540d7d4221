// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Simulated control plane.
//!
//! [`SimulatedCloud`] applies stacks the way a declarative provider would:
//! resources are created in build order, every token is resolved against
//! what already exists, parameters are published to the shared
//! [`ParameterStore`], and a failure anywhere leaves the previous state
//! untouched. Re-applying an unchanged stack changes nothing.
//!
//! The data-plane calls (sessions, certificates, secret reads) live in
//! [`crate::access`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use zeroize::ZeroizeOnDrop;

use crate::access::{IssuedCertificate, Session};
use crate::constants::{
    DEFAULT_PARTITION, GENERATED_PASSWORD_LENGTH, LAMBDA_SERVICE, MAX_TAG_VALUE_LENGTH, MYSQL_PORT,
};
use crate::errors::{DeployError, StoreError};
use crate::parameters::ParameterStore;
use crate::policy::{Caller, PolicyDocument};
use crate::resources::{CaStatus, RemovalPolicy, Resource, ResourceKind};
use crate::stack::{App, Stack};
use crate::tags::TagSet;
use crate::tokens::{PARAMETER_ID_PREFIX, Pseudo, Resolver, Token, parameter_logical_id};

const MAX_TAGS: usize = 50;
const MAX_TAG_KEY_LENGTH: usize = 128;
const MIN_SESSION_SECONDS: u64 = 900;
const MAX_SESSION_SECONDS: u64 = 43_200;
const MAX_FUNCTION_TIMEOUT: u64 = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Change {
    Created,
    Updated,
    Unchanged,
    Deleted,
    Retained,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Deleted => "deleted",
            Self::Retained => "retained",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceChange {
    pub logical_id: String,
    pub resource_type: String,
    pub change: Change,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    pub stack: String,
    pub changes: Vec<ResourceChange>,
    pub outputs: BTreeMap<String, String>,
}

impl DeployReport {
    pub fn is_noop(&self) -> bool {
        self.changes.iter().all(|c| c.change == Change::Unchanged)
    }

    pub fn count(&self, change: Change) -> usize {
        self.changes.iter().filter(|c| c.change == change).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DestroyReport {
    pub stack: String,
    pub deleted: Vec<String>,
    pub retained: Vec<String>,
    pub snapshots: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorityStatus {
    /// Created, waiting for its own certificate.
    Unissued,
    /// Certificate issued, not imported yet.
    PendingActivation,
    Active,
    Disabled,
}

impl fmt::Display for AuthorityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unissued => "UNISSUED",
            Self::PendingActivation => "PENDING_ACTIVATION",
            Self::Active => "ACTIVE",
            Self::Disabled => "DISABLED",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct SecretState {
    #[zeroize(skip)]
    pub name: String,
    #[zeroize(skip)]
    pub kms_key_id: String,
    pub value: String,
    #[zeroize(skip)]
    pub version_id: String,
    #[zeroize(skip)]
    pub created: DateTime<Utc>,
    #[zeroize(skip)]
    pub rotation_days: Option<u32>,
}

// Custom Debug implementation to prevent accidental logging of the secret value
impl fmt::Debug for SecretState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretState")
            .field("name", &self.name)
            .field("kms_key_id", &self.kms_key_id)
            .field("value", &"[REDACTED]")
            .field("version_id", &self.version_id)
            .field("rotation_days", &self.rotation_days)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionConfiguration {
    pub function_name: String,
    pub function_arn: String,
    pub role_arn: String,
    pub environment: BTreeMap<String, String>,
    pub timeout: u64,
}

/// What the provider remembers about a resource beyond its identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResourceState {
    Plain,
    Key {
        #[serde(with = "crate::snapshot::stored_policy")]
        policy: PolicyDocument,
    },
    Secret(SecretState),
    Policy {
        #[serde(with = "crate::snapshot::stored_policy")]
        document: PolicyDocument,
    },
    Role {
        name: String,
        #[serde(with = "crate::snapshot::stored_policy")]
        trust: PolicyDocument,
        managed_policy_arns: Vec<String>,
    },
    Authority {
        status: AuthorityStatus,
    },
    TrustAnchor {
        certificate_authority_arn: String,
        enabled: bool,
    },
    Profile {
        enabled: bool,
        duration_seconds: u64,
        managed_policy_arns: Vec<String>,
        role_arns: Vec<String>,
    },
    Cluster {
        secret_arn: String,
    },
    Function(FunctionConfiguration),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployedResource {
    pub logical_id: String,
    pub type_name: String,
    pub physical_id: String,
    pub attributes: BTreeMap<String, String>,
    /// Properties with every token resolved; compared on re-apply.
    pub properties: Value,
    pub tags: TagSet,
    pub removal_policy: RemovalPolicy,
    pub deletion_protected: bool,
    pub state: ResourceState,
}

impl DeployedResource {
    /// Matches the physical id or any attribute value (ARNs, ids).
    pub fn identified_by(&self, id: &str) -> bool {
        self.physical_id == id || self.attributes.values().any(|v| v == id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployedStack {
    pub name: String,
    pub resources: BTreeMap<String, DeployedResource>,
    /// Creation order.
    pub order: Vec<String>,
    pub outputs: BTreeMap<String, String>,
    pub dependencies: BTreeSet<String>,
    pub lookups: BTreeSet<String>,
    /// parameter key -> logical id
    pub published: BTreeMap<String, String>,
}

impl DeployedStack {
    fn insert(&mut self, resource: DeployedResource) {
        self.order.push(resource.logical_id.clone());
        self.resources.insert(resource.logical_id.clone(), resource);
    }

    fn find(&self, type_name: &str, id: &str) -> Option<&DeployedResource> {
        self.resources
            .values()
            .find(|r| r.type_name == type_name && r.identified_by(id))
    }
}

/// Sessions and certificates live only as long as the process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudState {
    pub stacks: BTreeMap<String, DeployedStack>,
    pub retained: Vec<DeployedResource>,
    #[serde(skip)]
    pub sessions: BTreeMap<String, Session>,
    #[serde(skip)]
    pub certificates: BTreeMap<String, IssuedCertificate>,
}

impl CloudState {
    pub fn resources(&self) -> impl Iterator<Item = &DeployedResource> {
        self.stacks.values().flat_map(|s| s.resources.values())
    }

    pub fn find(&self, type_name: &str, id: &str) -> Option<&DeployedResource> {
        self.stacks.values().find_map(|s| s.find(type_name, id))
    }

    fn find_mut(&mut self, type_name: &str, id: &str) -> Option<&mut DeployedResource> {
        self.stacks
            .values_mut()
            .flat_map(|s| s.resources.values_mut())
            .find(|r| r.type_name == type_name && r.identified_by(id))
    }
}

pub struct SimulatedCloud {
    account: String,
    region: String,
    partition: String,
    parameters: Arc<dyn ParameterStore>,
    pub(crate) state: RwLock<CloudState>,
}

impl fmt::Debug for SimulatedCloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedCloud")
            .field("account", &self.account)
            .field("region", &self.region)
            .field("partition", &self.partition)
            .finish()
    }
}

impl SimulatedCloud {
    pub fn new(
        account: impl Into<String>,
        region: impl Into<String>,
        parameters: Arc<dyn ParameterStore>,
    ) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
            partition: DEFAULT_PARTITION.to_string(),
            parameters,
            state: RwLock::new(CloudState::default()),
        }
    }

    /// Resumes from a saved `state` instead of an empty account.
    pub fn with_state(self, state: CloudState) -> Self {
        Self {
            state: RwLock::new(state),
            ..self
        }
    }

    pub async fn snapshot(&self) -> CloudState {
        self.state.read().await.clone()
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn parameters(&self) -> &Arc<dyn ParameterStore> {
        &self.parameters
    }

    /// `{service}.{region}.amazonaws.com`, the value of `kms:ViaService`.
    pub fn service_host(&self, service: &str) -> String {
        format!("{}.{}.amazonaws.com", service, self.region)
    }

    pub(crate) fn arn(&self, service: &str, region: bool, resource: &str) -> String {
        let region = if region { self.region.as_str() } else { "" };
        format!(
            "arn:{}:{}:{}:{}:{}",
            self.partition, service, region, self.account, resource
        )
    }

    /// Applies `stack`. Either every resource is applied or nothing is.
    #[tracing::instrument(skip(self, stack), fields(stack = %stack.name))]
    pub async fn deploy(&self, stack: &Stack) -> Result<DeployReport, DeployError> {
        stack.validate()?;
        self.check_environment(stack)?;

        let mut state = self.state.write().await;
        let mut working = state.clone();

        for dependency in stack.dependencies() {
            if !working.stacks.contains_key(dependency) {
                return Err(DeployError::MissingStack {
                    stack: stack.name.clone(),
                    missing: dependency.to_string(),
                });
            }
        }

        let mut parameters = BTreeMap::new();
        for key in stack.lookups() {
            let value = self.parameters.get(key).await?;
            parameters.insert(key.to_string(), value);
        }

        let previous = working.stacks.remove(&stack.name);
        let mut deployment = Deployment {
            cloud: self,
            stack,
            parameter_ids: parameters
                .keys()
                .map(|key| (parameter_logical_id(key), key.clone()))
                .collect(),
            parameters,
            deployed: DeployedStack {
                name: stack.name.clone(),
                dependencies: stack.dependencies().map(String::from).collect(),
                lookups: stack.lookups().map(String::from).collect(),
                ..DeployedStack::default()
            },
            working,
            changes: Vec::new(),
            publish: Vec::new(),
        };

        for resource in stack.build_order()? {
            deployment.apply(resource, previous.as_ref())?;
        }

        let mut unpublish = Vec::new();
        if let Some(previous) = &previous {
            for logical_id in previous.order.iter().rev() {
                if deployment.deployed.resources.contains_key(logical_id) {
                    continue;
                }
                let Some(removed) = previous.resources.get(logical_id) else {
                    continue;
                };
                if removed.deletion_protected {
                    return Err(DeployError::DeletionProtected(logical_id.clone()));
                }
                let change = if removed.removal_policy == RemovalPolicy::Delete {
                    Change::Deleted
                } else {
                    deployment.working.retained.push(removed.clone());
                    Change::Retained
                };
                deployment.changes.push(ResourceChange {
                    logical_id: logical_id.clone(),
                    resource_type: removed.type_name.clone(),
                    change,
                });
            }
            for (key, logical_id) in &previous.published {
                if !deployment.deployed.resources.contains_key(logical_id) {
                    unpublish.push(key.clone());
                }
            }
        }

        let context = deployment.context();
        let mut outputs = BTreeMap::new();
        for (name, output) in stack.outputs() {
            outputs.insert(name.clone(), output.value.resolve(&context)?);
        }
        deployment.deployed.outputs = outputs.clone();

        // Parameters are published last and only when none collides.
        let owners: BTreeMap<String, String> = self
            .parameters
            .list()
            .await?
            .into_iter()
            .map(|p| (p.key, p.owner))
            .collect();
        for (key, _) in &deployment.publish {
            if let Some(owner) = owners.get(key) {
                if owner != &stack.name {
                    return Err(StoreError::Collision {
                        key: key.clone(),
                        owner: owner.clone(),
                    }
                    .into());
                }
            }
        }
        for (key, value) in &deployment.publish {
            self.parameters.put(key, value, &stack.name).await?;
        }
        for key in &unpublish {
            self.parameters.delete(key, &stack.name).await?;
        }

        let Deployment {
            deployed,
            mut working,
            changes,
            ..
        } = deployment;
        working.stacks.insert(stack.name.clone(), deployed);
        *state = working;

        let report = DeployReport {
            stack: stack.name.clone(),
            changes,
            outputs,
        };
        tracing::info!(
            "[stacks] deployed {}: {} created, {} updated, {} unchanged",
            report.stack,
            report.count(Change::Created),
            report.count(Change::Updated),
            report.count(Change::Unchanged)
        );
        Ok(report)
    }

    /// Deploys every stack of `app` in dependency order.
    pub async fn deploy_app(&self, app: &App) -> Result<Vec<DeployReport>, DeployError> {
        let mut reports = Vec::new();
        for stack in app.deploy_order()? {
            reports.push(self.deploy(stack).await?);
        }
        Ok(reports)
    }

    /// Removes a stack, newest resources first. Refuses when another stack
    /// still depends on it or a resource has deletion protection.
    #[tracing::instrument(skip(self))]
    pub async fn destroy(&self, name: &str) -> Result<DestroyReport, DeployError> {
        let mut state = self.state.write().await;
        let Some(deployed) = state.stacks.get(name) else {
            return Err(DeployError::StackNotDeployed(name.to_string()));
        };

        for other in state.stacks.values().filter(|s| s.name != name) {
            let reads_ours = other
                .lookups
                .iter()
                .any(|key| deployed.published.contains_key(key));
            if other.dependencies.contains(name) || reads_ours {
                return Err(DeployError::StackInUse {
                    stack: name.to_string(),
                    dependent: other.name.clone(),
                });
            }
        }

        if let Some(protected) = deployed
            .order
            .iter()
            .filter_map(|id| deployed.resources.get(id))
            .find(|r| r.deletion_protected)
        {
            return Err(DeployError::DeletionProtected(protected.logical_id.clone()));
        }

        for key in deployed.published.keys() {
            match self.parameters.delete(key, name).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let Some(deployed) = state.stacks.remove(name) else {
            return Err(DeployError::StackNotDeployed(name.to_string()));
        };
        let mut report = DestroyReport {
            stack: name.to_string(),
            ..DestroyReport::default()
        };
        for logical_id in deployed.order.iter().rev() {
            let Some(resource) = deployed.resources.get(logical_id) else {
                continue;
            };
            match resource.removal_policy {
                RemovalPolicy::Delete => report.deleted.push(logical_id.clone()),
                RemovalPolicy::Retain => {
                    report.retained.push(logical_id.clone());
                    state.retained.push(resource.clone());
                }
                RemovalPolicy::Snapshot => {
                    report.snapshots.push(format!(
                        "{}-snapshot-{}",
                        resource.physical_id,
                        Utc::now().format("%Y-%m-%d-%H-%M")
                    ));
                    report.deleted.push(logical_id.clone());
                }
            }
        }

        tracing::info!(
            "[stacks] destroyed {}: {} deleted, {} retained",
            name,
            report.deleted.len(),
            report.retained.len()
        );
        Ok(report)
    }

    pub async fn outputs(&self, stack: &str) -> Result<BTreeMap<String, String>, DeployError> {
        self.state
            .read()
            .await
            .stacks
            .get(stack)
            .map(|s| s.outputs.clone())
            .ok_or_else(|| DeployError::StackNotDeployed(stack.to_string()))
    }

    pub async fn deployed_stacks(&self) -> Vec<String> {
        self.state.read().await.stacks.keys().cloned().collect()
    }

    pub async fn resource(&self, stack: &str, logical_id: &str) -> Option<DeployedResource> {
        self.state
            .read()
            .await
            .stacks
            .get(stack)
            .and_then(|s| s.resources.get(logical_id))
            .cloned()
    }

    pub async fn function(&self, name: &str) -> Option<FunctionConfiguration> {
        let state = self.state.read().await;
        match &state.find("AWS::Lambda::Function", name)?.state {
            ResourceState::Function(config) => Some(config.clone()),
            _ => None,
        }
    }

    pub async fn role_arn(&self, role_name: &str) -> Option<String> {
        let state = self.state.read().await;
        state
            .find("AWS::IAM::Role", role_name)
            .and_then(|r| r.attributes.get("Arn").cloned())
    }

    pub async fn authority_status(&self, ca_arn: &str) -> Option<AuthorityStatus> {
        let state = self.state.read().await;
        match state.find("AWS::ACMPCA::CertificateAuthority", ca_arn)?.state {
            ResourceState::Authority { status } => Some(status),
            _ => None,
        }
    }

    fn check_environment(&self, stack: &Stack) -> Result<(), DeployError> {
        let targets = [
            (stack.environment.account.as_deref(), self.account.as_str()),
            (stack.environment.region.as_deref(), self.region.as_str()),
        ];
        for (wanted, actual) in targets {
            if let Some(wanted) = wanted {
                if wanted != actual {
                    return Err(DeployError::Validation {
                        node: stack.name.clone(),
                        reason: format!("stack targets {wanted}, provider is {actual}"),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Resolves tokens for one stack being applied.
struct Context<'a> {
    cloud: &'a SimulatedCloud,
    resources: &'a BTreeMap<String, DeployedResource>,
    parameters: &'a BTreeMap<String, String>,
    parameter_ids: &'a BTreeMap<String, String>,
}

impl Resolver for Context<'_> {
    fn reference(&self, node: &str) -> Result<String, DeployError> {
        self.resources
            .get(node)
            .map(|r| r.physical_id.clone())
            .ok_or_else(|| DeployError::UnresolvedReference(node.to_string()))
    }

    fn attribute(&self, node: &str, attribute: &str) -> Result<String, DeployError> {
        let resource = self
            .resources
            .get(node)
            .ok_or_else(|| DeployError::UnresolvedReference(node.to_string()))?;
        resource
            .attributes
            .get(attribute)
            .cloned()
            .ok_or_else(|| DeployError::UnknownAttribute {
                node: node.to_string(),
                attribute: attribute.to_string(),
            })
    }

    fn parameter(&self, key: &str) -> Result<String, DeployError> {
        self.parameters
            .get(key)
            .cloned()
            .ok_or_else(|| DeployError::UndeclaredParameter(key.to_string()))
    }

    fn pseudo(&self, pseudo: Pseudo) -> String {
        match pseudo {
            Pseudo::AccountId => self.cloud.account.clone(),
            Pseudo::Region => self.cloud.region.clone(),
            Pseudo::Partition => self.cloud.partition.clone(),
        }
    }
}

impl Context<'_> {
    fn resolve_ref(&self, id: &str) -> Result<String, DeployError> {
        if let Some(pseudo) = [Pseudo::AccountId, Pseudo::Region, Pseudo::Partition]
            .into_iter()
            .find(|p| p.name() == id)
        {
            return Ok(self.pseudo(pseudo));
        }
        if id.starts_with(PARAMETER_ID_PREFIX) {
            let key = self
                .parameter_ids
                .get(id)
                .ok_or_else(|| DeployError::UndeclaredParameter(id.to_string()))?;
            return self.parameter(key);
        }
        self.reference(id)
    }

    /// Replaces `Ref`, `Fn::GetAtt` and `Fn::Join` in a template fragment.
    fn resolve_value(&self, value: &Value) -> Result<Value, DeployError> {
        match value {
            Value::Object(map) if map.len() == 1 => {
                if let Some(Value::String(id)) = map.get("Ref") {
                    return self.resolve_ref(id).map(Value::String);
                }
                if let Some(Value::Array(parts)) = map.get("Fn::GetAtt") {
                    if let [Value::String(node), Value::String(attribute)] = parts.as_slice() {
                        return self.attribute(node, attribute).map(Value::String);
                    }
                }
                if let Some(Value::Array(args)) = map.get("Fn::Join") {
                    if let [Value::String(separator), Value::Array(parts)] = args.as_slice() {
                        let parts = parts
                            .iter()
                            .map(|part| -> Result<String, DeployError> {
                                match self.resolve_value(part)? {
                                    Value::String(s) => Ok(s),
                                    other => Ok(other.to_string()),
                                }
                            })
                            .collect::<Result<Vec<_>, DeployError>>()?;
                        return Ok(Value::String(parts.join(separator)));
                    }
                }
                self.resolve_map(map)
            }
            Value::Object(map) => self.resolve_map(map),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    fn resolve_map(&self, map: &Map<String, Value>) -> Result<Value, DeployError> {
        let mut resolved = Map::new();
        for (key, value) in map {
            resolved.insert(key.clone(), self.resolve_value(value)?);
        }
        Ok(Value::Object(resolved))
    }
}

/// One stack being applied on a copy of the provider state.
struct Deployment<'a> {
    cloud: &'a SimulatedCloud,
    stack: &'a Stack,
    parameters: BTreeMap<String, String>,
    parameter_ids: BTreeMap<String, String>,
    deployed: DeployedStack,
    /// Every other stack.
    working: CloudState,
    changes: Vec<ResourceChange>,
    publish: Vec<(String, String)>,
}

impl Deployment<'_> {
    fn context(&self) -> Context<'_> {
        Context {
            cloud: self.cloud,
            resources: &self.deployed.resources,
            parameters: &self.parameters,
            parameter_ids: &self.parameter_ids,
        }
    }

    fn apply(
        &mut self,
        resource: &Resource,
        previous: Option<&DeployedStack>,
    ) -> Result<(), DeployError> {
        let properties = self.context().resolve_value(&resource.properties())?;
        let type_name = resource.kind.type_name();
        let prior = previous
            .and_then(|p| p.resources.get(&resource.logical_id))
            .filter(|p| p.type_name == type_name);

        let change = match prior {
            Some(prior) if prior.properties == properties => Change::Unchanged,
            Some(_) => Change::Updated,
            None => Change::Created,
        };
        tracing::debug!("[stacks] {} {} {}", self.stack.name, resource.logical_id, change);

        let applied = if change == Change::Unchanged {
            prior.cloned().ok_or_else(|| {
                DeployError::UnresolvedReference(resource.logical_id.clone())
            })?
        } else {
            validate_tags(resource)?;
            let (physical_id, mut attributes) = match prior {
                Some(prior) => (prior.physical_id.clone(), prior.attributes.clone()),
                None => self.identity(resource, &properties)?,
            };
            if let Some(value) = properties.get("Value").and_then(Value::as_str) {
                attributes.insert("Value".into(), value.to_string());
            }
            let state = self.state(resource, &physical_id, &attributes, prior)?;
            let applied = DeployedResource {
                logical_id: resource.logical_id.clone(),
                type_name: type_name.to_string(),
                physical_id,
                attributes,
                properties,
                tags: resource.tags.clone(),
                removal_policy: resource.removal_policy,
                deletion_protected: resource.deletion_protected(),
                state,
            };
            self.effects(resource, &applied, change)?;
            applied
        };

        if let ResourceKind::StringParameter(parameter) = &resource.kind {
            let value = applied.properties["Value"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            self.publish.push((parameter.name.clone(), value));
            self.deployed
                .published
                .insert(parameter.name.clone(), resource.logical_id.clone());
        }

        self.changes.push(ResourceChange {
            logical_id: resource.logical_id.clone(),
            resource_type: type_name.to_string(),
            change,
        });
        self.deployed.insert(applied);
        Ok(())
    }

    fn locate(&self, type_name: &str, id: &str) -> Option<&DeployedResource> {
        self.deployed
            .find(type_name, id)
            .or_else(|| self.working.find(type_name, id))
    }

    fn locate_mut(&mut self, type_name: &str, id: &str) -> Option<&mut DeployedResource> {
        if self.deployed.find(type_name, id).is_some() {
            self.deployed
                .resources
                .values_mut()
                .find(|r| r.type_name == type_name && r.identified_by(id))
        } else {
            self.working.find_mut(type_name, id)
        }
    }

    fn name_taken(&self, type_name: &str, name: &str) -> bool {
        self.locate(type_name, name).is_some()
    }

    /// Physical id and attributes of a new resource.
    fn identity(
        &self,
        resource: &Resource,
        properties: &Value,
    ) -> Result<(String, BTreeMap<String, String>), DeployError> {
        let cloud = self.cloud;
        let stack = &self.stack.name;
        let id = &resource.logical_id;
        let property = |name: &str| properties[name].as_str().unwrap_or_default().to_string();
        let collision = |kind: &str, name: &str| DeployError::NameCollision {
            kind: kind.to_string(),
            name: name.to_string(),
        };
        let mut attributes = BTreeMap::new();

        let physical_id = match &resource.kind {
            ResourceKind::KmsKey(_) => {
                let key_id = uuid();
                attributes.insert("Arn".into(), cloud.arn("kms", true, &format!("key/{key_id}")));
                attributes.insert("KeyId".into(), key_id.clone());
                key_id
            }
            ResourceKind::KmsAlias(_) => {
                let alias = property("AliasName");
                if !alias.starts_with("alias/") || alias.starts_with("alias/aws/") {
                    return Err(validation(id, format!("invalid alias name {alias}")));
                }
                if self.name_taken(resource.kind.type_name(), &alias) {
                    return Err(collision("alias", &alias));
                }
                alias
            }
            ResourceKind::Secret(secret) => {
                if secret.name.is_empty() || secret.name.len() > 512 {
                    return Err(validation(id, "secret name must be 1 to 512 characters"));
                }
                let taken = self
                    .working
                    .resources()
                    .chain(self.deployed.resources.values())
                    .any(|r| matches!(&r.state, ResourceState::Secret(s) if s.name == secret.name));
                if taken {
                    return Err(collision("secret", &secret.name));
                }
                let arn = cloud.arn(
                    "secretsmanager",
                    true,
                    &format!("secret:{}-{}", secret.name, random(6, fastrand::alphanumeric)),
                );
                attributes.insert("Arn".into(), arn.clone());
                arn
            }
            ResourceKind::ManagedPolicy(_) => {
                let name = generated_name(stack, id, 128);
                let arn = cloud.arn("iam", false, &format!("policy/{name}"));
                attributes.insert("PolicyArn".into(), arn.clone());
                arn
            }
            ResourceKind::Role(_) => {
                let name = generated_name(stack, id, 64);
                attributes.insert("Arn".into(), cloud.arn("iam", false, &format!("role/{name}")));
                attributes.insert(
                    "RoleId".into(),
                    format!("AROA{}", random(17, fastrand::uppercase)),
                );
                name
            }
            ResourceKind::StringParameter(parameter) => {
                attributes.insert("Type".into(), property("Type"));
                attributes.insert("Value".into(), property("Value"));
                parameter.name.clone()
            }
            ResourceKind::Vpc(_) => {
                let vpc_id = format!("vpc-{}", hex_id());
                attributes.insert("VpcId".into(), vpc_id.clone());
                attributes.insert("CidrBlock".into(), property("CidrBlock"));
                vpc_id
            }
            ResourceKind::InterfaceEndpoint(_) => format!("vpce-{}", hex_id()),
            ResourceKind::LogGroup(group) => {
                let name = group
                    .log_group_name
                    .clone()
                    .unwrap_or_else(|| generated_name(stack, id, 512));
                if self.name_taken(resource.kind.type_name(), &name) {
                    return Err(collision("log group", &name));
                }
                attributes.insert(
                    "Arn".into(),
                    cloud.arn("logs", true, &format!("log-group:{name}:*")),
                );
                name
            }
            ResourceKind::FlowLog(_) => format!("fl-{}", hex_id()),
            ResourceKind::Bucket(_) => {
                let name = generated_name(stack, id, 63).to_ascii_lowercase();
                attributes.insert("Arn".into(), format!("arn:{}:s3:::{}", cloud.partition, name));
                attributes.insert("DomainName".into(), format!("{name}.s3.amazonaws.com"));
                name
            }
            ResourceKind::BucketPolicy(_) | ResourceKind::CaPermission(_) => {
                generated_name(stack, id, 128)
            }
            ResourceKind::CertificateAuthority(_) => {
                let arn = cloud.arn(
                    "acm-pca",
                    true,
                    &format!("certificate-authority/{}", uuid()),
                );
                attributes.insert("Arn".into(), arn.clone());
                attributes.insert(
                    "CertificateSigningRequest".into(),
                    pem("CERTIFICATE REQUEST", &arn),
                );
                arn
            }
            ResourceKind::ActivationCertificate(_) => {
                let ca_arn = property("CertificateAuthorityArn");
                let arn = format!("{}/certificate/{}", ca_arn, hex_id());
                attributes.insert("Arn".into(), arn.clone());
                attributes.insert("Certificate".into(), pem("CERTIFICATE", &arn));
                arn
            }
            ResourceKind::CaActivation(_) => property("CertificateAuthorityArn"),
            ResourceKind::TrustAnchor(_) => {
                let anchor_id = uuid();
                attributes.insert(
                    "TrustAnchorArn".into(),
                    cloud.arn("rolesanywhere", true, &format!("trust-anchor/{anchor_id}")),
                );
                attributes.insert("TrustAnchorId".into(), anchor_id.clone());
                anchor_id
            }
            ResourceKind::Profile(_) => {
                let profile_id = uuid();
                attributes.insert(
                    "ProfileArn".into(),
                    cloud.arn("rolesanywhere", true, &format!("profile/{profile_id}")),
                );
                attributes.insert("ProfileId".into(), profile_id.clone());
                profile_id
            }
            ResourceKind::SecurityGroup(_) => {
                let group_id = format!("sg-{}", hex_id());
                attributes.insert("GroupId".into(), group_id.clone());
                group_id
            }
            ResourceKind::ServerlessCluster(_) => {
                let identifier = generated_name(stack, id, 63).to_ascii_lowercase();
                attributes.insert(
                    "Arn".into(),
                    cloud.arn("rds", true, &format!("cluster:{identifier}")),
                );
                attributes.insert(
                    "Endpoint.Address".into(),
                    format!(
                        "{}.cluster-{}.{}.rds.amazonaws.com",
                        identifier,
                        random(12, fastrand::lowercase),
                        cloud.region
                    ),
                );
                attributes.insert("Endpoint.Port".into(), MYSQL_PORT.to_string());
                identifier
            }
            ResourceKind::Function(function) => {
                if self.name_taken(resource.kind.type_name(), &function.function_name) {
                    return Err(collision("function", &function.function_name));
                }
                attributes.insert(
                    "Arn".into(),
                    cloud.arn(
                        "lambda",
                        true,
                        &format!("function:{}", function.function_name),
                    ),
                );
                function.function_name.clone()
            }
        };
        Ok((physical_id, attributes))
    }

    /// Typed state of a new or updated resource, after validation.
    fn state(
        &self,
        resource: &Resource,
        physical_id: &str,
        attributes: &BTreeMap<String, String>,
        prior: Option<&DeployedResource>,
    ) -> Result<ResourceState, DeployError> {
        let context = self.context();
        let id = &resource.logical_id;

        let state = match &resource.kind {
            ResourceKind::KmsKey(key) => ResourceState::Key {
                policy: non_empty(id, key.key_policy.resolved(&context)?)?,
            },
            ResourceKind::Secret(secret) => {
                let kms_key_id = secret.kms_key_id.resolve(&context)?;
                if self.locate("AWS::KMS::Key", &kms_key_id).is_none() {
                    return Err(validation(id, format!("unknown KMS key {kms_key_id}")));
                }
                match prior.map(|p| &p.state) {
                    Some(ResourceState::Secret(existing)) => {
                        let mut updated = existing.clone();
                        updated.kms_key_id = kms_key_id;
                        ResourceState::Secret(updated)
                    }
                    _ => ResourceState::Secret(SecretState {
                        name: secret.name.clone(),
                        kms_key_id,
                        value: generate_secret_string(
                            id,
                            &secret.generate_secret_string.secret_string_template,
                            &secret.generate_secret_string.generate_string_key,
                            &secret.generate_secret_string.exclude_characters,
                        )?,
                        version_id: uuid(),
                        created: Utc::now(),
                        rotation_days: None,
                    }),
                }
            }
            ResourceKind::ManagedPolicy(policy) => ResourceState::Policy {
                document: non_empty(id, policy.policy_document.resolved(&context)?)?,
            },
            ResourceKind::Role(role) => {
                let managed_policy_arns = role
                    .managed_policy_arns
                    .iter()
                    .map(|arn| arn.resolve(&context))
                    .collect::<Result<Vec<_>, _>>()?;
                ResourceState::Role {
                    name: physical_id.to_string(),
                    trust: non_empty(id, role.assume_role_policy_document.resolved(&context)?)?,
                    managed_policy_arns,
                }
            }
            ResourceKind::CertificateAuthority(_) => ResourceState::Authority {
                status: match prior.map(|p| &p.state) {
                    Some(ResourceState::Authority { status }) => *status,
                    _ => AuthorityStatus::Unissued,
                },
            },
            ResourceKind::TrustAnchor(anchor) => {
                let ca_arn = anchor.certificate_authority_arn.resolve(&context)?;
                self.expect_authority(id, &ca_arn, &[AuthorityStatus::Active])?;
                ResourceState::TrustAnchor {
                    certificate_authority_arn: ca_arn,
                    enabled: anchor.enabled,
                }
            }
            ResourceKind::Profile(profile) => {
                if !(MIN_SESSION_SECONDS..=MAX_SESSION_SECONDS).contains(&profile.duration_seconds)
                {
                    return Err(validation(
                        id,
                        format!(
                            "DurationSeconds must be between {MIN_SESSION_SECONDS} and {MAX_SESSION_SECONDS}"
                        ),
                    ));
                }
                let role_arns = resolve_all(&profile.role_arns, &context)?;
                if role_arns.is_empty() {
                    return Err(validation(id, "profile needs at least one role"));
                }
                if let Some(unknown) = role_arns
                    .iter()
                    .find(|arn| self.locate("AWS::IAM::Role", arn).is_none())
                {
                    return Err(validation(id, format!("unknown role {unknown}")));
                }
                ResourceState::Profile {
                    enabled: profile.enabled,
                    duration_seconds: profile.duration_seconds,
                    managed_policy_arns: resolve_all(&profile.managed_policy_arns, &context)?,
                    role_arns,
                }
            }
            ResourceKind::ServerlessCluster(cluster) => {
                let secret_arn = cluster.master_user_secret.resolve(&context)?;
                if self.locate("AWS::SecretsManager::Secret", &secret_arn).is_none() {
                    return Err(validation(id, format!("unknown secret {secret_arn}")));
                }
                ResourceState::Cluster { secret_arn }
            }
            ResourceKind::Function(function) => {
                if function.timeout == 0 || function.timeout > MAX_FUNCTION_TIMEOUT {
                    return Err(validation(
                        id,
                        format!("timeout must be between 1 and {MAX_FUNCTION_TIMEOUT} seconds"),
                    ));
                }
                let role_arn = function.role.resolve(&context)?;
                let trusted = match self.locate("AWS::IAM::Role", &role_arn).map(|r| &r.state) {
                    Some(ResourceState::Role { trust, .. }) => trust.trusts(
                        &Caller::Service(LAMBDA_SERVICE.to_string()),
                        "sts:AssumeRole",
                    ),
                    _ => false,
                };
                if !trusted {
                    return Err(validation(
                        id,
                        format!("role {role_arn} cannot be assumed by {LAMBDA_SERVICE}"),
                    ));
                }
                let mut environment = BTreeMap::new();
                for (name, value) in &function.environment {
                    environment.insert(name.clone(), value.resolve(&context)?);
                }
                ResourceState::Function(FunctionConfiguration {
                    function_name: function.function_name.clone(),
                    function_arn: attributes.get("Arn").cloned().unwrap_or_default(),
                    role_arn,
                    environment,
                    timeout: function.timeout,
                })
            }
            ResourceKind::LogGroup(group) if group.retention_in_days == Some(0) => {
                return Err(validation(id, "retention must be at least one day"));
            }
            _ => ResourceState::Plain,
        };
        Ok(state)
    }

    fn expect_authority(
        &self,
        node: &str,
        ca_arn: &str,
        expected: &[AuthorityStatus],
    ) -> Result<AuthorityStatus, DeployError> {
        let status = match self
            .locate("AWS::ACMPCA::CertificateAuthority", ca_arn)
            .map(|r| &r.state)
        {
            Some(ResourceState::Authority { status }) => *status,
            _ => return Err(DeployError::UnresolvedReference(ca_arn.to_string())),
        };
        if expected.contains(&status) {
            Ok(status)
        } else {
            Err(DeployError::AuthorityState {
                node: node.to_string(),
                state: status.to_string(),
                expected: expected
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" or "),
            })
        }
    }

    /// Side effects on other resources: the certificate authority life cycle
    /// and the cluster writing its connection details into its secret.
    fn effects(
        &mut self,
        resource: &Resource,
        applied: &DeployedResource,
        change: Change,
    ) -> Result<(), DeployError> {
        let id = &resource.logical_id;
        match &resource.kind {
            ResourceKind::ActivationCertificate(_) if change == Change::Created => {
                let ca_arn = applied.physical_id.rsplit_once("/certificate/").map(|(ca, _)| ca);
                let ca_arn = ca_arn.unwrap_or_default().to_string();
                self.expect_authority(id, &ca_arn, &[AuthorityStatus::Unissued])?;
                self.set_authority(&ca_arn, AuthorityStatus::PendingActivation);
            }
            ResourceKind::CaActivation(activation) => {
                let ca_arn = applied.physical_id.clone();
                let allowed: &[AuthorityStatus] = if change == Change::Created {
                    &[AuthorityStatus::PendingActivation]
                } else {
                    &[AuthorityStatus::Active, AuthorityStatus::Disabled]
                };
                self.expect_authority(id, &ca_arn, allowed)?;
                let status = match activation.status {
                    CaStatus::Active => AuthorityStatus::Active,
                    CaStatus::Disabled => AuthorityStatus::Disabled,
                };
                self.set_authority(&ca_arn, status);
            }
            ResourceKind::ServerlessCluster(cluster) => {
                let ResourceState::Cluster { secret_arn } = &applied.state else {
                    return Ok(());
                };
                let host = applied
                    .attributes
                    .get("Endpoint.Address")
                    .cloned()
                    .unwrap_or_default();
                let identifier = applied.physical_id.clone();
                let rotation_days = cluster.rotation_days;
                let secret = self
                    .locate_mut("AWS::SecretsManager::Secret", secret_arn)
                    .ok_or_else(|| DeployError::UnresolvedReference(secret_arn.clone()))?;
                let ResourceState::Secret(state) = &mut secret.state else {
                    return Err(validation(id, "credentials are not a secret"));
                };
                let mut value: Map<String, Value> = serde_json::from_str(&state.value)
                    .map_err(|_| validation(id, "secret value is not a JSON object"))?;
                value.insert("engine".into(), Value::from("mysql"));
                value.insert("host".into(), Value::from(host));
                value.insert("port".into(), Value::from(MYSQL_PORT));
                value.insert("dbClusterIdentifier".into(), Value::from(identifier));
                state.value = Value::Object(value).to_string();
                state.version_id = uuid();
                state.rotation_days = Some(rotation_days);
            }
            _ => {}
        }
        Ok(())
    }

    fn set_authority(&mut self, ca_arn: &str, status: AuthorityStatus) {
        if let Some(ca) = self.locate_mut("AWS::ACMPCA::CertificateAuthority", ca_arn) {
            ca.state = ResourceState::Authority { status };
        }
    }
}

fn validation(node: &str, reason: impl Into<String>) -> DeployError {
    DeployError::Validation {
        node: node.to_string(),
        reason: reason.into(),
    }
}

fn non_empty(node: &str, document: PolicyDocument) -> Result<PolicyDocument, DeployError> {
    if document.statements.is_empty() || document.statements.iter().any(|s| s.actions.is_empty())
    {
        return Err(validation(node, "policy document needs statements with actions"));
    }
    Ok(document)
}

fn validate_tags(resource: &Resource) -> Result<(), DeployError> {
    if resource.tags.len() > MAX_TAGS {
        return Err(validation(
            &resource.logical_id,
            format!("at most {MAX_TAGS} tags"),
        ));
    }
    for (key, value) in resource.tags.iter() {
        if key.is_empty() || key.len() > MAX_TAG_KEY_LENGTH || value.len() as u64 > MAX_TAG_VALUE_LENGTH {
            return Err(validation(
                &resource.logical_id,
                format!("invalid tag {key}"),
            ));
        }
    }
    Ok(())
}

fn resolve_all(
    tokens: &[Token],
    context: &Context<'_>,
) -> Result<Vec<String>, DeployError> {
    tokens.iter().map(|t| t.resolve(context)).collect()
}

/// Fills `template` with a random password under `key`.
fn generate_secret_string(
    node: &str,
    template: &str,
    key: &str,
    exclude: &str,
) -> Result<String, DeployError> {
    let mut value: Map<String, Value> = serde_json::from_str(template)
        .map_err(|e| validation(node, format!("invalid secret template: {e}")))?;
    let password: String = std::iter::repeat_with(|| char::from(fastrand::u8(33..=126)))
        .filter(|c| !exclude.contains(*c))
        .take(GENERATED_PASSWORD_LENGTH)
        .collect();
    value.insert(key.to_string(), Value::String(password));
    Ok(Value::Object(value).to_string())
}

fn random(len: usize, next: fn() -> char) -> String {
    std::iter::repeat_with(next).take(len).collect()
}

fn hex_id() -> String {
    format!("{:017x}", fastrand::u64(..) >> 4)
}

pub(crate) fn uuid() -> String {
    format!(
        "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
        fastrand::u32(..),
        fastrand::u16(..),
        fastrand::u16(..),
        fastrand::u16(..),
        fastrand::u64(..) & 0xffff_ffff_ffff
    )
}

fn generated_name(stack: &str, logical_id: &str, max: usize) -> String {
    let mut name = format!("{stack}-{logical_id}");
    name.truncate(max.saturating_sub(13));
    format!("{}-{}", name, random(12, fastrand::uppercase))
}

pub(crate) fn pem(label: &str, subject: &str) -> String {
    let body: String = subject
        .bytes()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .concat();
    format!("-----BEGIN {label}-----\n{body}\n-----END {label}-----")
}
