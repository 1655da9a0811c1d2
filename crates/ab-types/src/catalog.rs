//! Component catalog: components, their parameters and interfaces, and the
//! lookups the search core performs against them.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::domain::{ParamDomain, ParamValue};
use crate::errors::{CatalogError, CsResult};

/// A tunable parameter of a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub domain: ParamDomain,
}

/// A single (parameter, required sub-domain) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub parameter: String,
    pub domain: ParamValue,
}

impl Condition {
    pub fn new(parameter: impl Into<String>, domain: ParamValue) -> Self {
        Self {
            parameter: parameter.into(),
            domain,
        }
    }
}

/// Inter-parameter dependency: whenever the premise (a disjunction of
/// conjunctions) is entailed, the conclusion must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub premise: Vec<Vec<Condition>>,
    pub conclusion: Vec<Condition>,
}

impl Dependency {
    pub fn new(premise: Vec<Vec<Condition>>, conclusion: Vec<Condition>) -> Self {
        Self {
            premise,
            conclusion,
        }
    }

    fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.premise.iter().flatten().chain(self.conclusion.iter())
    }
}

/// Immutable description of a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    /// Required interface id -> interface type.
    #[serde(default)]
    pub required_interfaces: BTreeMap<String, String>,
    #[serde(default)]
    pub provided_interfaces: BTreeSet<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl Component {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            required_interfaces: BTreeMap::new(),
            provided_interfaces: BTreeSet::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn provides(mut self, interface: impl Into<String>) -> Self {
        self.provided_interfaces.insert(interface.into());
        self
    }

    pub fn requires(mut self, id: impl Into<String>, interface_type: impl Into<String>) -> Self {
        self.required_interfaces.insert(id.into(), interface_type.into());
        self
    }

    pub fn add_numeric(mut self, name: impl Into<String>, min: f64, max: f64) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            domain: ParamDomain::Numeric {
                min,
                max,
                integer: false,
            },
        });
        self
    }

    pub fn add_integer(mut self, name: impl Into<String>, min: i64, max: i64) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            domain: ParamDomain::Numeric {
                min: min as f64,
                max: max as f64,
                integer: true,
            },
        });
        self
    }

    pub fn add_categorical<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            domain: ParamDomain::Categorical {
                values: values.into_iter().map(Into::into).collect(),
            },
        });
        self
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Like [`Component::parameter`] but undeclared names are an error.
    pub fn require_parameter(&self, name: &str) -> Result<&Parameter, CatalogError> {
        self.parameter(name).ok_or_else(|| CatalogError::UnknownParameter {
            component: self.name.clone(),
            parameter: name.to_string(),
        })
    }

    /// Check domains and that every dependency names declared parameters
    /// with compatible sub-domains.
    pub fn validate(&self) -> Result<(), CatalogError> {
        for param in &self.parameters {
            param.domain.validate(&self.name, &param.name)?;
        }
        for condition in self.dependencies.iter().flat_map(|d| d.conditions()) {
            let param = self.require_parameter(&condition.parameter)?;
            if param.domain.kind() != condition.domain.kind() {
                return Err(CatalogError::InvalidDomain {
                    component: self.name.clone(),
                    parameter: condition.parameter.clone(),
                    message: format!(
                        "dependency uses a {} value for a {} parameter",
                        condition.domain.kind(),
                        param.domain.kind()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Per-parameter refinement settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RefinementConfig {
    /// Ranges narrower than this are collapsed instead of split.
    pub min_split_size: f64,
    /// Number of sub-ranges one refinement step aims for.
    pub refinements_per_step: usize,
}

impl RefinementConfig {
    /// Reject settings under which numeric splitting would not terminate
    /// sensibly.
    pub fn validate(&self, component: &str, parameter: &str) -> Result<(), CatalogError> {
        let message = if !(self.min_split_size.is_finite() && self.min_split_size > 0.0) {
            format!("min_split_size must be positive, got {}", self.min_split_size)
        } else if self.refinements_per_step < 2 {
            format!(
                "refinements_per_step must be at least 2, got {}",
                self.refinements_per_step
            )
        } else {
            return Ok(());
        };
        Err(CatalogError::InvalidDomain {
            component: component.to_string(),
            parameter: parameter.to_string(),
            message,
        })
    }
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            min_split_size: 2.0,
            refinements_per_step: 2,
        }
    }
}

/// Lookups the search core performs against the component catalog.
pub trait ComponentRegistry: Send + Sync {
    /// Every component providing `interface`, in a deterministic order.
    fn providers_of(&self, interface: &str) -> Vec<Arc<Component>>;

    /// Refinement settings for one parameter; `None` means engine defaults.
    fn refinement_config(&self, _component: &str, _parameter: &str) -> Option<RefinementConfig> {
        None
    }
}

/// In-memory catalog with a provider lookup cache.
#[derive(Debug, Default)]
pub struct Catalog {
    components: Vec<Arc<Component>>,
    refinement: HashMap<(String, String), RefinementConfig>,
    providers: DashMap<String, Arc<[Arc<Component>]>>,
}

impl Catalog {
    /// Build a catalog, validating every component.
    pub fn new(components: Vec<Component>) -> CsResult<Self> {
        let mut seen = BTreeSet::new();
        for component in &components {
            component.validate()?;
            if !seen.insert(component.name.clone()) {
                return Err(CatalogError::DuplicateComponent {
                    name: component.name.clone(),
                }
                .into());
            }
        }
        Ok(Self {
            components: components.into_iter().map(Arc::new).collect(),
            refinement: HashMap::new(),
            providers: DashMap::new(),
        })
    }

    /// Override refinement settings for `component.parameter`.
    pub fn with_refinement_config(
        mut self,
        component: &str,
        parameter: &str,
        config: RefinementConfig,
    ) -> CsResult<Self> {
        self.component(component)?.require_parameter(parameter)?;
        config.validate(component, parameter)?;
        self.refinement
            .insert((component.to_string(), parameter.to_string()), config);
        Ok(self)
    }

    pub fn component(&self, name: &str) -> CsResult<&Arc<Component>> {
        self.components
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| {
                CatalogError::ComponentNotFound {
                    name: name.to_string(),
                }
                .into()
            })
    }

    pub fn components(&self) -> &[Arc<Component>] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl ComponentRegistry for Catalog {
    fn providers_of(&self, interface: &str) -> Vec<Arc<Component>> {
        if let Some(cached) = self.providers.get(interface) {
            return cached.to_vec();
        }
        let found: Arc<[Arc<Component>]> = self
            .components
            .iter()
            .filter(|c| c.provided_interfaces.contains(interface))
            .cloned()
            .collect();
        debug!(interface, providers = found.len(), "Resolved interface providers");
        self.providers.insert(interface.to_string(), found.clone());
        found.to_vec()
    }

    fn refinement_config(&self, component: &str, parameter: &str) -> Option<RefinementConfig> {
        self.refinement
            .get(&(component.to_string(), parameter.to_string()))
            .copied()
    }
}
