//! Entity schema definition.
//!
//! The sync engine treats payloads as opaque except for two fields an entity
//! may declare: the natural key used to suppress duplicate creation, and the
//! parent link of a nested sub-resource.

use crate::{error::Result, EntityName, Error, NaturalKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Link from a nested entity to its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentLink {
    /// Parent entity name
    pub entity: EntityName,
    /// Payload field holding the parent's id
    pub field: String,
    /// URL segment under the parent (`/api/{parent}/{id}/{segment}`)
    pub segment: String,
}

/// Schema for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySchema {
    /// Entity name, also the URL path segment
    pub name: EntityName,
    /// Payload field holding the natural key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentLink>,
}

impl EntitySchema {
    /// Create an entity without natural key or parent.
    pub fn new(name: impl Into<EntityName>) -> Self {
        Self {
            name: name.into(),
            natural_key: None,
            parent: None,
        }
    }

    /// Builder-style method to declare the natural key field.
    pub fn with_natural_key(mut self, field: impl Into<String>) -> Self {
        self.natural_key = Some(field.into());
        self
    }

    /// Builder-style method to nest this entity under a parent.
    pub fn nested_under(
        mut self,
        parent: impl Into<EntityName>,
        field: impl Into<String>,
        segment: impl Into<String>,
    ) -> Self {
        self.parent = Some(ParentLink {
            entity: parent.into(),
            field: field.into(),
            segment: segment.into(),
        });
        self
    }

    /// Extract the natural key from a payload.
    ///
    /// Numbers are rendered in decimal so `{"receiptId": 1042}` and
    /// `{"receiptId": "1042"}` collide.
    pub fn natural_key_of(&self, payload: &serde_json::Value) -> Result<Option<NaturalKey>> {
        let Some(field) = &self.natural_key else {
            return Ok(None);
        };

        match payload.get(field) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s.trim().to_string())),
            Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
            Some(_) => Err(Error::InvalidNaturalKey {
                field: field.clone(),
            }),
        }
    }

    /// Parent id referenced by a payload, for nested entities.
    pub fn parent_id_of<'a>(&self, payload: &'a serde_json::Value) -> Option<&'a str> {
        let link = self.parent.as_ref()?;
        payload
            .get(&link.field)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Validate a payload and return its natural key.
    pub fn validate_payload(&self, payload: &serde_json::Value) -> Result<Option<NaturalKey>> {
        if !payload.is_object() {
            return Err(Error::InvalidPayload("payload must be an object".into()));
        }

        if let Some(link) = &self.parent {
            if self.parent_id_of(payload).is_none() {
                return Err(Error::MissingParentLink(link.field.clone()));
            }
        }

        self.natural_key_of(payload)
    }
}

/// The set of entity types a device synchronizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Entity schemas by name
    pub entities: BTreeMap<EntityName, EntitySchema>,
}

impl Schema {
    /// Create a new empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// The repair-shop schema: clients, repair tickets with their line items,
    /// inventory products, finance transactions, executors and counterparties.
    pub fn workshop() -> Self {
        Schema::new()
            .with_entity(EntitySchema::new("clients").with_natural_key("phone"))
            .with_entity(EntitySchema::new("repairs").with_natural_key("receiptId"))
            .with_entity(EntitySchema::new("repair_items").nested_under(
                "repairs",
                "repairId",
                "items",
            ))
            .with_entity(EntitySchema::new("products").with_natural_key("barcode"))
            .with_entity(EntitySchema::new("finance").with_natural_key("reference"))
            .with_entity(EntitySchema::new("executors").with_natural_key("name"))
            .with_entity(EntitySchema::new("counterparties").with_natural_key("name"))
    }

    /// Add an entity to the schema.
    pub fn add_entity(&mut self, entity: EntitySchema) -> &mut Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// Builder-style method to add an entity.
    pub fn with_entity(mut self, entity: EntitySchema) -> Self {
        self.add_entity(entity);
        self
    }

    /// Get an entity schema by name.
    pub fn get_entity(&self, name: &str) -> Option<&EntitySchema> {
        self.entities.get(name)
    }

    /// Get an entity schema by name, or fail.
    pub fn entity(&self, name: &str) -> Result<&EntitySchema> {
        self.get_entity(name)
            .ok_or_else(|| Error::EntityNotFound(name.to_string()))
    }

    /// The nested entity mounted at `/{parent}/{id}/{segment}`.
    pub fn child_entity(&self, parent: &str, segment: &str) -> Option<&EntitySchema> {
        self.entities.values().find(|e| {
            e.parent
                .as_ref()
                .is_some_and(|link| link.entity == parent && link.segment == segment)
        })
    }

    /// Entity names with parents ordered before their children.
    pub fn sync_order(&self) -> Vec<EntityName> {
        let mut order: Vec<EntityName> = Vec::with_capacity(self.entities.len());
        let mut remaining: Vec<&EntitySchema> = self.entities.values().collect();

        while !remaining.is_empty() {
            let before = remaining.len();
            remaining.retain(|entity| {
                let ready = match &entity.parent {
                    Some(link) => {
                        order.contains(&link.entity) || !self.entities.contains_key(&link.entity)
                    }
                    None => true,
                };
                if ready {
                    order.push(entity.name.clone());
                }
                !ready
            });

            // Parent cycle: append the rest in name order
            if remaining.len() == before {
                order.extend(remaining.drain(..).map(|e| e.name.clone()));
            }
        }

        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn natural_key_from_number_and_string() {
        let schema = Schema::workshop();
        let repairs = schema.entity("repairs").unwrap();

        assert_eq!(
            repairs.natural_key_of(&json!({"receiptId": 1042})).unwrap(),
            Some("1042".to_string())
        );
        assert_eq!(
            repairs.natural_key_of(&json!({"receiptId": " 1042 "})).unwrap(),
            Some("1042".to_string())
        );
        assert_eq!(repairs.natural_key_of(&json!({"device": "x"})).unwrap(), None);
        assert_eq!(repairs.natural_key_of(&json!({"receiptId": ""})).unwrap(), None);
    }

    #[test]
    fn natural_key_rejects_objects() {
        let schema = Schema::workshop();
        let products = schema.entity("products").unwrap();

        let result = products.natural_key_of(&json!({"barcode": {"ean": 1}}));
        assert!(matches!(result, Err(Error::InvalidNaturalKey { .. })));
    }

    #[test]
    fn validate_requires_object() {
        let schema = Schema::workshop();
        let clients = schema.entity("clients").unwrap();

        let result = clients.validate_payload(&json!(["not", "an", "object"]));
        assert!(matches!(result, Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn nested_entity_requires_parent_link() {
        let schema = Schema::workshop();
        let items = schema.entity("repair_items").unwrap();

        assert!(matches!(
            items.validate_payload(&json!({"title": "Screen"})),
            Err(Error::MissingParentLink(_))
        ));
        assert!(items
            .validate_payload(&json!({"title": "Screen", "repairId": "abc"}))
            .is_ok());
        assert_eq!(
            items.parent_id_of(&json!({"repairId": "abc"})),
            Some("abc")
        );
    }

    #[test]
    fn unknown_entity() {
        let schema = Schema::workshop();
        assert!(matches!(
            schema.entity("invoices"),
            Err(Error::EntityNotFound(_))
        ));
    }

    #[test]
    fn child_entity_lookup() {
        let schema = Schema::workshop();

        let child = schema.child_entity("repairs", "items").unwrap();
        assert_eq!(child.name, "repair_items");
        assert!(schema.child_entity("clients", "items").is_none());
    }

    #[test]
    fn sync_order_puts_parents_first() {
        let schema = Schema::workshop();
        let order = schema.sync_order();

        let repairs = order.iter().position(|e| e == "repairs").unwrap();
        let items = order.iter().position(|e| e == "repair_items").unwrap();
        assert!(repairs < items);
        assert_eq!(order.len(), schema.entities.len());
    }
}
