//! Discovery and Introspection Schemas
//!
//! Strongly-typed response schemas for the discovery and introspection
//! RPCs answered by every session. These are mapped straight from the
//! declarative [`ServiceMetadata`](crate::remotable::ServiceMetadata) tags.

use serde::{Deserialize, Serialize};

use crate::remotable::{ServiceMetadata, SimpleType};

/// One entry returned by `getDiscoverableServices`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveredService {
    pub name: String,
    pub description: String,
}

/// Full shape returned by `getServiceIntrospection`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntrospectedService {
    pub name: String,
    pub description: String,
    pub methods: Vec<IntrospectedMethod>,
    pub events: Vec<IntrospectedEvent>,
}

/// Introspected method shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntrospectedMethod {
    pub name: String,
    pub description: String,
    pub simple_return_type: SimpleType,
    pub parameters: Vec<IntrospectedParameter>,
}

/// Introspected parameter shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntrospectedParameter {
    pub name: String,
    pub description: String,
    pub simple_type: SimpleType,
}

/// Introspected event shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntrospectedEvent {
    pub name: String,
    pub description: String,
}

impl From<&ServiceMetadata> for DiscoveredService {
    fn from(metadata: &ServiceMetadata) -> Self {
        Self {
            name: metadata.name.clone(),
            description: metadata.description.clone(),
        }
    }
}

impl From<&ServiceMetadata> for IntrospectedService {
    fn from(metadata: &ServiceMetadata) -> Self {
        Self {
            name: metadata.name.clone(),
            description: metadata.description.clone(),
            methods: metadata
                .methods
                .iter()
                .map(|method| IntrospectedMethod {
                    name: method.name.clone(),
                    description: method.description.clone(),
                    simple_return_type: method.simple_return_type,
                    parameters: method
                        .parameters
                        .iter()
                        .map(|parameter| IntrospectedParameter {
                            name: parameter.name.clone(),
                            description: parameter.description.clone(),
                            simple_type: parameter.simple_type,
                        })
                        .collect(),
                })
                .collect(),
            events: metadata
                .events
                .iter()
                .map(|event| IntrospectedEvent {
                    name: event.name.clone(),
                    description: event.description.clone(),
                })
                .collect(),
        }
    }
}
