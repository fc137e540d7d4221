// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Stacks, the app that groups them, and template synthesis.
//!
//! A [`Stack`] owns a [`BuildGraph`] of resources. Edges come from explicit
//! `depends_on` entries and from every `Ref` / `Fn::GetAtt` found in a
//! resource's properties. Stacks exchange values only through published
//! parameters: a consumer declares the keys it reads with
//! [`Stack::lookup`], and [`App`] orders a stack after the stacks that
//! publish those keys.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};

use crate::errors::{AppError, DeployError, GraphError};
use crate::graph::BuildGraph;
use crate::resources::{Resource, ResourceKind, StringParameter};
use crate::tokens::{PARAMETER_ID_PREFIX, Token, parameter_logical_id};

/// Target account and region. `None` synthesizes as a pseudo parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub account: Option<String>,
    pub region: Option<String>,
}

impl Environment {
    pub fn new(account: Option<String>, region: Option<String>) -> Self {
        Self { account, region }
    }

    pub fn account(&self) -> Token {
        self.account
            .as_deref()
            .map(Token::literal)
            .unwrap_or_else(Token::account)
    }

    pub fn region(&self) -> Token {
        self.region
            .as_deref()
            .map(Token::literal)
            .unwrap_or_else(Token::region)
    }
}

/// Handle to a resource added to a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle(String);

impl Handle {
    pub fn id(&self) -> &str {
        &self.0
    }

    pub fn reference(&self) -> Token {
        Token::reference(self.0.clone())
    }

    pub fn attr(&self, attribute: &str) -> Token {
        Token::attr(self.0.clone(), attribute)
    }

    pub fn arn(&self) -> Token {
        self.attr("Arn")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub value: Token,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Stack {
    pub name: String,
    pub description: Option<String>,
    pub environment: Environment,
    graph: BuildGraph<Resource>,
    lookups: BTreeSet<String>,
    outputs: BTreeMap<String, Output>,
    dependencies: BTreeSet<String>,
}

impl Stack {
    pub fn new(name: impl Into<String>, environment: Environment) -> Self {
        Self {
            name: name.into(),
            description: None,
            environment,
            graph: BuildGraph::new(),
            lookups: BTreeSet::new(),
            outputs: BTreeMap::new(),
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn add(&mut self, resource: Resource) -> Result<Handle, GraphError> {
        let id = resource.logical_id.clone();
        let mut edges = resource.depends_on.clone();
        edges.extend(resource_references(&resource.properties()));
        self.graph.add_node(id.clone(), resource)?;
        for on in edges {
            self.graph.add_dependency(id.clone(), on);
        }
        Ok(Handle(id))
    }

    /// Adds a parameter resource publishing `value` under `key`.
    pub fn publish(
        &mut self,
        logical_id: &str,
        key: String,
        description: &str,
        value: Token,
    ) -> Result<Handle, GraphError> {
        self.add(Resource::new(
            logical_id,
            StringParameter::new(key, description, value),
        ))
    }

    /// Declares that this stack reads the parameter `key` at deploy time.
    pub fn lookup(&mut self, key: impl Into<String>) -> Token {
        let key = key.into();
        self.lookups.insert(key.clone());
        Token::Parameter(key)
    }

    pub fn add_output(&mut self, name: impl Into<String>, value: Token, description: &str) {
        self.outputs.insert(
            name.into(),
            Output {
                value,
                description: Some(description.to_string()),
            },
        );
    }

    pub fn add_dependency(&mut self, stack: impl Into<String>) {
        self.dependencies.insert(stack.into());
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(String::as_str)
    }

    pub fn lookups(&self) -> impl Iterator<Item = &str> {
        self.lookups.iter().map(String::as_str)
    }

    /// `(key, resource)` for every parameter this stack publishes.
    pub fn published(&self) -> impl Iterator<Item = (&str, &Resource)> {
        self.resources().filter_map(|resource| match &resource.kind {
            ResourceKind::StringParameter(parameter) => Some((parameter.name.as_str(), resource)),
            _ => None,
        })
    }

    pub fn outputs(&self) -> &BTreeMap<String, Output> {
        &self.outputs
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.graph.node(logical_id)
    }

    /// Resources in declaration order.
    pub fn resources(&self) -> impl DoubleEndedIterator<Item = &Resource> {
        self.graph.nodes().map(|(_, resource)| resource)
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn build_order(&self) -> Result<Vec<&Resource>, GraphError> {
        Ok(self
            .graph
            .topological_order()?
            .into_iter()
            .filter_map(|id| self.graph.node(id))
            .collect())
    }

    /// Checks ordering and that every parameter read was declared.
    pub fn validate(&self) -> Result<(), DeployError> {
        self.build_order()?;
        let declared: BTreeSet<String> =
            self.lookups.iter().map(|k| parameter_logical_id(k)).collect();
        let mut used = BTreeSet::new();
        for resource in self.resources() {
            parameter_references(&resource.properties(), &mut used);
        }
        for output in self.outputs.values() {
            parameter_references(&output.value.to_template(), &mut used);
        }
        match used.into_iter().find(|id| !declared.contains(id)) {
            Some(id) => Err(DeployError::UndeclaredParameter(id)),
            None => Ok(()),
        }
    }

    pub fn synth(&self) -> Result<Value, DeployError> {
        self.validate()?;

        let mut template = Map::new();
        if let Some(description) = &self.description {
            template.insert("Description".into(), json!(description));
        }
        if !self.lookups.is_empty() {
            let parameters: Map<String, Value> = self
                .lookups
                .iter()
                .map(|key| {
                    (
                        parameter_logical_id(key),
                        json!({"Type": "AWS::SSM::Parameter::Value<String>", "Default": key}),
                    )
                })
                .collect();
            template.insert("Parameters".into(), Value::Object(parameters));
        }
        let resources: Map<String, Value> = self
            .resources()
            .map(|resource| (resource.logical_id.clone(), resource.to_template()))
            .collect();
        template.insert("Resources".into(), Value::Object(resources));
        if !self.outputs.is_empty() {
            let outputs: Map<String, Value> = self
                .outputs
                .iter()
                .map(|(name, output)| {
                    let mut entry = Map::new();
                    entry.insert("Value".into(), output.value.to_template());
                    if let Some(description) = &output.description {
                        entry.insert("Description".into(), json!(description));
                    }
                    (name.clone(), Value::Object(entry))
                })
                .collect();
            template.insert("Outputs".into(), Value::Object(outputs));
        }
        Ok(Value::Object(template))
    }
}

/// Logical ids referenced through `Ref` or `Fn::GetAtt`, pseudo parameters
/// and parameter lookups excluded.
pub fn resource_references(value: &Value) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    walk_references(value, &mut |kind, id| {
        if kind == "Fn::GetAtt" || !(id.starts_with("AWS::") || id.starts_with(PARAMETER_ID_PREFIX))
        {
            found.insert(id.to_string());
        }
    });
    found
}

fn parameter_references(value: &Value, found: &mut BTreeSet<String>) {
    walk_references(value, &mut |kind, id| {
        if kind == "Ref" && id.starts_with(PARAMETER_ID_PREFIX) {
            found.insert(id.to_string());
        }
    });
}

fn walk_references(value: &Value, visit: &mut dyn FnMut(&str, &str)) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(id)) = map.get("Ref") {
                visit("Ref", id);
            }
            if let Some(Value::String(id)) = map
                .get("Fn::GetAtt")
                .and_then(|parts| parts.as_array())
                .and_then(|parts| parts.first())
            {
                visit("Fn::GetAtt", id);
            }
            for nested in map.values() {
                walk_references(nested, visit);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_references(item, visit);
            }
        }
        _ => {}
    }
}

/// The set of stacks deployed together.
#[derive(Debug, Clone, Default)]
pub struct App {
    stacks: Vec<Stack>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stack(&mut self, stack: Stack) -> Result<(), GraphError> {
        if self.stack(&stack.name).is_some() {
            return Err(GraphError::DuplicateNode(stack.name));
        }
        self.stacks.push(stack);
        Ok(())
    }

    pub fn stack(&self, name: &str) -> Option<&Stack> {
        self.stacks.iter().find(|stack| stack.name == name)
    }

    pub fn stacks(&self) -> impl DoubleEndedIterator<Item = &Stack> {
        self.stacks.iter()
    }

    /// Stack graph: explicit dependencies plus an edge from every stack
    /// reading a parameter to the stack publishing it.
    pub fn graph(&self) -> Result<BuildGraph<&Stack>, GraphError> {
        let mut publishers: BTreeMap<&str, &str> = BTreeMap::new();
        for stack in &self.stacks {
            for (key, _) in stack.published() {
                publishers.insert(key, stack.name.as_str());
            }
        }

        let mut graph = BuildGraph::new();
        for stack in &self.stacks {
            graph.add_node(stack.name.clone(), stack)?;
            for on in stack.dependencies() {
                graph.add_dependency(stack.name.clone(), on);
            }
            for key in stack.lookups() {
                if let Some(publisher) = publishers.get(key) {
                    if *publisher != stack.name {
                        graph.add_dependency(stack.name.clone(), *publisher);
                    }
                }
            }
        }
        Ok(graph)
    }

    pub fn deploy_order(&self) -> Result<Vec<&Stack>, GraphError> {
        let graph = self.graph()?;
        let order = graph.topological_order()?;
        Ok(order
            .into_iter()
            .filter_map(|name| graph.node(name).copied())
            .collect())
    }

    pub fn synth(&self) -> Result<BTreeMap<String, Value>, DeployError> {
        let mut templates = BTreeMap::new();
        for stack in self.deploy_order()? {
            templates.insert(stack.name.clone(), stack.synth()?);
        }
        Ok(templates)
    }

    /// Writes `{stack}.template.json` for every stack into `dir`.
    #[tracing::instrument(skip(self))]
    pub fn write_templates(&self, dir: &Path) -> Result<Vec<PathBuf>, AppError> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        for (name, template) in self.synth()? {
            let path = dir.join(format!("{name}.template.json"));
            std::fs::write(&path, serde_json::to_vec_pretty(&template)?)?;
            tracing::info!("[stacks] wrote {}", path.display());
            written.push(path);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{LogGroup, RemovalPolicy};

    fn log_group(id: &str) -> Resource {
        Resource::new(
            id,
            LogGroup {
                log_group_name: None,
                retention_in_days: Some(14),
            },
        )
    }

    fn parameter(id: &str, key: &str, value: Token) -> Resource {
        Resource::new(id, StringParameter::new(key, "test", value))
    }

    #[test]
    fn test_implicit_edges_from_references() {
        let mut stack = Stack::new("s", Environment::default());
        stack
            .add(parameter("Param", "/a/b", Token::attr("Logs", "Arn")))
            .unwrap();
        stack.add(log_group("Logs")).unwrap();
        let order: Vec<&str> = stack
            .build_order()
            .unwrap()
            .iter()
            .map(|r| r.logical_id.as_str())
            .collect();
        assert_eq!(order, ["Logs", "Param"]);
    }

    #[test]
    fn test_pseudo_parameters_are_not_edges() {
        let refs = resource_references(&json!({
            "A": {"Ref": "AWS::Region"},
            "B": {"Ref": "SsmParameterValueabc"},
            "C": [{"Fn::GetAtt": ["Key", "Arn"]}, {"Ref": "Vpc"}]
        }));
        assert_eq!(refs.into_iter().collect::<Vec<_>>(), ["Key", "Vpc"]);
    }

    #[test]
    fn test_reference_to_unknown_resource() {
        let mut stack = Stack::new("s", Environment::default());
        stack
            .add(parameter("Param", "/a/b", Token::reference("Ghost")))
            .unwrap();
        assert_eq!(
            stack.synth(),
            Err(DeployError::Graph(GraphError::MissingDependency {
                node: "Param".into(),
                missing: "Ghost".into()
            }))
        );
    }

    #[test]
    fn test_undeclared_parameter() {
        let mut stack = Stack::new("s", Environment::default());
        stack
            .add(parameter("Param", "/a/b", Token::Parameter("/x/y".into())))
            .unwrap();
        assert!(matches!(
            stack.validate(),
            Err(DeployError::UndeclaredParameter(_))
        ));

        let mut stack = Stack::new("s", Environment::default());
        let value = stack.lookup("/x/y");
        stack.add(parameter("Param", "/a/b", value)).unwrap();
        assert!(stack.validate().is_ok());
    }

    #[test]
    fn test_synth_template() {
        let mut stack = Stack::new("consumer", Environment::default()).with_description("test");
        let secret = stack.lookup("/app1/web/dev/demo-AsmSsmPara");
        stack
            .add(log_group("Logs").with_removal_policy(RemovalPolicy::Retain))
            .unwrap();
        stack.add_output("SecretArn", secret, "secret");

        let template = stack.synth().unwrap();
        assert_eq!(template["Description"], "test");
        assert_eq!(
            template["Parameters"]["SsmParameterValueapp1webdevdemoAsmSsmPara"],
            json!({"Type": "AWS::SSM::Parameter::Value<String>", "Default": "/app1/web/dev/demo-AsmSsmPara"})
        );
        assert_eq!(template["Resources"]["Logs"]["Type"], "AWS::Logs::LogGroup");
        assert_eq!(template["Resources"]["Logs"]["DeletionPolicy"], "Retain");
        assert_eq!(
            template["Outputs"]["SecretArn"]["Value"],
            json!({"Ref": "SsmParameterValueapp1webdevdemoAsmSsmPara"})
        );
    }

    #[test]
    fn test_app_orders_consumers_after_publishers() {
        let mut consumer = Stack::new("consumer", Environment::default());
        let value = consumer.lookup("/a/b");
        consumer.add(parameter("Copy", "/c/d", value)).unwrap();

        let mut producer = Stack::new("producer", Environment::default());
        producer
            .publish("Param", "/a/b".into(), "test", "v".into())
            .unwrap();

        let mut app = App::new();
        app.add_stack(consumer).unwrap();
        app.add_stack(producer).unwrap();
        let order: Vec<&str> = app
            .deploy_order()
            .unwrap()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(order, ["producer", "consumer"]);
    }

    #[test]
    fn test_app_rejects_duplicate_stack() {
        let mut app = App::new();
        app.add_stack(Stack::new("s", Environment::default()))
            .unwrap();
        assert_eq!(
            app.add_stack(Stack::new("s", Environment::default())),
            Err(GraphError::DuplicateNode("s".into()))
        );
    }

    #[test]
    fn test_write_templates() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = App::new();
        let mut stack = Stack::new("only", Environment::default());
        stack.add(log_group("Logs")).unwrap();
        app.add_stack(stack).unwrap();

        let written = app.write_templates(dir.path()).unwrap();
        assert_eq!(written, [dir.path().join("only.template.json")]);
        let raw = std::fs::read(&written[0]).unwrap();
        let template: Value = serde_json::from_slice(&raw).unwrap();
        assert!(template["Resources"]["Logs"].is_object());
    }

    #[test]
    fn test_environment_tokens() {
        let env = Environment::new(Some("222222222222".into()), None);
        assert_eq!(env.account(), Token::literal("222222222222"));
        assert_eq!(env.region(), Token::region());
    }
}
