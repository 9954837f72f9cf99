//! Rule tree model.
//!
//! Rule JSON is a recursive, `type`-tagged structure:
//!
//! ```json
//! {
//!   "type": "group",
//!   "logicalOperator": "AND",
//!   "rules": [
//!     { "type": "condition", "attributeId": "...", "attributeName": "Age",
//!       "operator": ">", "value": 30, "valueType": "integer" },
//!     { "type": "relationship_group", "relationshipId": "...",
//!       "relatedEntityRules": { "type": "group", "logicalOperator": "OR", "rules": [] } }
//!   ]
//! }
//! ```
//!
//! It is parsed once into [`RuleGroup`] / [`RuleNode`]; nothing downstream
//! looks at raw JSON again.

use serde::de::{Deserializer, Error as DeError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::RuleError;

/// How the children of a group combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

impl LogicalOperator {
    /// Parse the wire value. A missing or blank operator means AND.
    pub fn parse(raw: Option<&str>) -> Result<Self, RuleError> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Self::And);
        };
        match raw.to_ascii_uppercase().as_str() {
            "AND" => Ok(Self::And),
            "OR" => Ok(Self::Or),
            _ => Err(RuleError::InvalidLogicalOperator(raw.to_string())),
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

impl std::fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Leaf predicate on one attribute of the row in scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionRule {
    pub attribute_id: Uuid,
    #[serde(default)]
    pub attribute_name: String,
    #[serde(default, deserialize_with = "optional_uuid", skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Uuid>,
    pub operator: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
}

/// Conjunction or disjunction of child rules over the same row.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleGroup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Uuid>,
    pub logical_operator: LogicalOperator,
    pub rules: Vec<RuleNode>,
}

/// Existence of at least one related row, via a defined relationship,
/// satisfying a nested group scoped to the related entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipRule {
    pub relationship_id: Uuid,
    pub related_entity_rules: RuleGroup,
}

/// One node of a rule tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleNode {
    Condition(ConditionRule),
    Group(RuleGroup),
    RelationshipGroup(RelationshipRule),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupWire {
    #[serde(default, deserialize_with = "optional_uuid")]
    entity_id: Option<Uuid>,
    #[serde(default)]
    logical_operator: Option<String>,
    #[serde(default)]
    rules: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelationshipWire {
    relationship_id: Uuid,
    #[serde(default)]
    related_entity_rules: Value,
}

fn optional_uuid<'de, D>(deserializer: D) -> Result<Option<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(s) if !s.trim().is_empty() => Uuid::parse_str(s.trim()).map(Some).map_err(D::Error::custom),
        _ => Ok(None),
    }
}

impl RuleNode {
    /// Parse one node, dispatching on its `type` tag.
    pub fn from_value(value: Value) -> Result<Self, RuleError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(RuleError::MissingRuleType)?
            .to_string();

        match kind.as_str() {
            "condition" => Ok(Self::Condition(serde_json::from_value(value)?)),
            "group" => Ok(Self::Group(RuleGroup::from_group_value(value)?)),
            "relationship_group" => {
                let wire: RelationshipWire = serde_json::from_value(value)?;
                Ok(Self::RelationshipGroup(RelationshipRule {
                    relationship_id: wire.relationship_id,
                    related_entity_rules: RuleGroup::from_value(wire.related_entity_rules)?,
                }))
            }
            _ => Err(RuleError::UnknownRuleType(kind)),
        }
    }
}

impl<'de> Deserialize<'de> for RuleNode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}

impl RuleGroup {
    /// Parse a group document. The `type` tag is optional here, but if it is
    /// present it must be `"group"`. A JSON `null` is an empty group.
    pub fn from_value(value: Value) -> Result<Self, RuleError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        match value.get("type").and_then(Value::as_str) {
            None | Some("group") => Self::from_group_value(value),
            Some(other) => Err(RuleError::UnknownRuleType(other.to_string())),
        }
    }

    fn from_group_value(value: Value) -> Result<Self, RuleError> {
        let wire: GroupWire = serde_json::from_value(value)?;
        let logical_operator = LogicalOperator::parse(wire.logical_operator.as_deref())?;
        let rules = wire
            .rules
            .into_iter()
            .map(RuleNode::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            entity_id: wire.entity_id,
            logical_operator,
            rules,
        })
    }

    /// Serialize as a root document (with its `type` tag).
    pub fn to_value(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert("type".to_string(), Value::String("group".to_string()));
        }
        value
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every attribute and relationship id referenced anywhere in the tree,
    /// including inside nested related-entity rules. First-seen order,
    /// without duplicates.
    pub fn referenced_definitions(&self) -> ReferencedDefinitions {
        let mut refs = ReferencedDefinitions::default();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut ReferencedDefinitions) {
        for rule in &self.rules {
            match rule {
                RuleNode::Condition(c) => push_unique(&mut refs.attribute_ids, c.attribute_id),
                RuleNode::Group(g) => g.collect_references(refs),
                RuleNode::RelationshipGroup(r) => {
                    push_unique(&mut refs.relationship_ids, r.relationship_id);
                    r.related_entity_rules.collect_references(refs);
                }
            }
        }
    }
}

impl<'de> Deserialize<'de> for RuleGroup {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}

fn push_unique(ids: &mut Vec<Uuid>, id: Uuid) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

/// Definition ids a rule tree depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferencedDefinitions {
    pub attribute_ids: Vec<Uuid>,
    pub relationship_ids: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const AGE: &str = "00000000-0000-0000-0000-00000000000a";
    const COUNTRY: &str = "00000000-0000-0000-0000-00000000000c";
    const AMOUNT: &str = "00000000-0000-0000-0000-0000000000a0";
    const ORDERS: &str = "00000000-0000-0000-0000-0000000000f0";

    fn nested_doc() -> Value {
        json!({
            "type": "group",
            "logicalOperator": "and",
            "rules": [
                { "type": "condition", "attributeId": AGE, "attributeName": "Age",
                  "entityId": "", "operator": ">", "value": 30, "valueType": "integer" },
                { "type": "group", "logicalOperator": "OR", "rules": [
                    { "type": "condition", "attributeId": COUNTRY, "attributeName": "Country",
                      "operator": "=", "value": "USA" },
                    { "type": "condition", "attributeId": COUNTRY, "attributeName": "Country",
                      "operator": "=", "value": "CAN" }
                ]},
                { "type": "relationship_group", "relationshipId": ORDERS,
                  "relatedEntityRules": { "type": "group", "rules": [
                      { "type": "condition", "attributeId": AMOUNT, "attributeName": "OrderAmount",
                        "operator": ">", "value": 100 }
                  ]}}
            ]
        })
    }

    #[test]
    fn parses_all_three_variants() {
        let group = RuleGroup::from_value(nested_doc()).unwrap();
        assert_eq!(group.logical_operator, LogicalOperator::And);
        assert_eq!(group.rules.len(), 3);

        match &group.rules[0] {
            RuleNode::Condition(c) => {
                assert_eq!(c.attribute_name, "Age");
                assert_eq!(c.entity_id, None);
                assert_eq!(c.value, json!(30));
            }
            other => panic!("expected condition, got {:?}", other),
        }
        match &group.rules[1] {
            RuleNode::Group(g) => {
                assert_eq!(g.logical_operator, LogicalOperator::Or);
                assert_eq!(g.rules.len(), 2);
            }
            other => panic!("expected group, got {:?}", other),
        }
        match &group.rules[2] {
            RuleNode::RelationshipGroup(r) => {
                assert_eq!(r.relationship_id.to_string(), ORDERS);
                assert_eq!(r.related_entity_rules.rules.len(), 1);
            }
            other => panic!("expected relationship group, got {:?}", other),
        }
    }

    #[test]
    fn unknown_rule_type_is_an_error() {
        let doc = json!({ "type": "group", "rules": [ { "type": "between", "attributeId": AGE } ] });
        let err = RuleGroup::from_value(doc).unwrap_err();
        assert!(matches!(err, RuleError::UnknownRuleType(ref t) if t == "between"));
        assert_eq!(err.to_string(), "unknown rule type: between");
    }

    #[test]
    fn unknown_type_nested_in_relationship_is_an_error() {
        let doc = json!({ "rules": [ { "type": "relationship_group", "relationshipId": ORDERS,
            "relatedEntityRules": { "rules": [ { "type": "exists" } ] } } ] });
        assert!(matches!(
            RuleGroup::from_value(doc),
            Err(RuleError::UnknownRuleType(t)) if t == "exists"
        ));
    }

    #[test]
    fn missing_type_tag_is_an_error() {
        let doc = json!({ "rules": [ { "attributeId": AGE, "operator": "=" } ] });
        assert!(matches!(RuleGroup::from_value(doc), Err(RuleError::MissingRuleType)));
    }

    #[test]
    fn blank_logical_operator_defaults_to_and() {
        let group = RuleGroup::from_value(json!({ "logicalOperator": "  ", "rules": [] })).unwrap();
        assert_eq!(group.logical_operator, LogicalOperator::And);
        assert!(group.is_empty());

        let err = RuleGroup::from_value(json!({ "logicalOperator": "XOR" })).unwrap_err();
        assert!(matches!(err, RuleError::InvalidLogicalOperator(_)));
    }

    #[test]
    fn null_document_is_an_empty_group() {
        assert!(RuleGroup::from_value(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn referenced_definitions_include_nested_relationships() {
        let group = RuleGroup::from_value(nested_doc()).unwrap();
        let refs = group.referenced_definitions();
        let ids: Vec<String> = refs.attribute_ids.iter().map(Uuid::to_string).collect();
        assert_eq!(ids, vec![AGE, COUNTRY, AMOUNT]);
        assert_eq!(refs.relationship_ids.len(), 1);
        assert_eq!(refs.relationship_ids[0].to_string(), ORDERS);
    }

    #[test]
    fn serialized_tree_parses_back() {
        let group = RuleGroup::from_value(nested_doc()).unwrap();
        let reparsed = RuleGroup::from_value(group.to_value()).unwrap();
        assert_eq!(group, reparsed);
        assert_eq!(group.to_value()["rules"][2]["type"], json!("relationship_group"));
    }

    #[test]
    fn serde_deserialize_goes_through_the_same_parser() {
        let group: RuleGroup = serde_json::from_value(nested_doc()).unwrap();
        assert_eq!(group.rules.len(), 3);
        let err = serde_json::from_value::<RuleNode>(json!({ "type": "nope" })).unwrap_err();
        assert!(err.to_string().contains("unknown rule type: nope"));
    }
}
