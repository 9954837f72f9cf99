//! Where-clause compiler.
//!
//! Turns a [`RuleGroup`] into a SQL boolean expression over
//! `processed_entities` rows plus the ordered list of parameters it binds.
//!
//! Only identifiers resolved from definitions (attribute names, aliases,
//! cast suffixes, operator keywords) are written into the SQL text, and
//! attribute names are checked against an allow-list first. Every rule value
//! and every entity id travels as a `$n` parameter.

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::attribute_type::{BoundValue, Operator};
use crate::catalog::DefinitionSet;
use crate::definitions::AttributeDefinition;
use crate::error::RuleError;
use crate::rule_tree::{ConditionRule, RelationshipRule, RuleGroup, RuleNode};

/// Table every alias refers to.
pub const INSTANCE_TABLE: &str = "processed_entities";

const MAX_IDENTIFIER_LEN: usize = 128;

/// Hands out `pe1`, `pe2`, ... for one compilation.
#[derive(Debug, Clone)]
pub struct AliasAllocator {
    prefix: &'static str,
    issued: u32,
}

impl AliasAllocator {
    pub fn new() -> Self {
        Self {
            prefix: "pe",
            issued: 0,
        }
    }

    pub fn allocate(&mut self) -> String {
        self.issued += 1;
        format!("{}{}", self.prefix, self.issued)
    }
}

impl Default for AliasAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// A compiled statement and its parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<BoundValue>,
}

/// Recursive compiler state: the shared parameter list and alias allocator.
///
/// The next placeholder number is always `params.len() + 1`, so numbering
/// stays dense and ordered across the whole tree.
pub struct WhereCompiler<'a> {
    definitions: &'a DefinitionSet,
    params: Vec<BoundValue>,
    aliases: AliasAllocator,
}

impl<'a> WhereCompiler<'a> {
    pub fn new(definitions: &'a DefinitionSet) -> Self {
        Self {
            definitions,
            params: Vec::new(),
            aliases: AliasAllocator::new(),
        }
    }

    pub fn allocate_alias(&mut self) -> String {
        self.aliases.allocate()
    }

    /// Append a parameter and return its placeholder.
    pub fn bind(&mut self, value: BoundValue) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }

    pub fn params(&self) -> &[BoundValue] {
        &self.params
    }

    pub fn into_params(self) -> Vec<BoundValue> {
        self.params
    }

    /// Compile `group` against the row named `alias`, which is an instance
    /// of `context_entity_id`.
    ///
    /// Returns the children joined by the group's operator, without outer
    /// parentheses. An empty group (or one whose children are all empty)
    /// compiles to the empty string; callers must drop it rather than join it.
    pub fn compile(
        &mut self,
        group: &RuleGroup,
        alias: &str,
        context_entity_id: Uuid,
    ) -> Result<String, RuleError> {
        let fragments = self.compile_fragments(group, alias, context_entity_id)?;
        Ok(join_fragments(group, &fragments))
    }

    fn compile_fragments(
        &mut self,
        group: &RuleGroup,
        alias: &str,
        context_entity_id: Uuid,
    ) -> Result<Vec<String>, RuleError> {
        let mut fragments = Vec::with_capacity(group.rules.len());

        for rule in &group.rules {
            match rule {
                RuleNode::Condition(condition) => {
                    fragments.push(self.compile_condition(condition, alias, context_entity_id)?);
                }
                RuleNode::Group(nested) => {
                    let children = self.compile_fragments(nested, alias, context_entity_id)?;
                    match children.len() {
                        0 => {}
                        1 => fragments.extend(children),
                        _ => fragments.push(format!("({})", join_fragments(nested, &children))),
                    }
                }
                RuleNode::RelationshipGroup(relationship) => {
                    fragments.push(self.compile_relationship(
                        relationship,
                        alias,
                        context_entity_id,
                    )?);
                }
            }
        }

        Ok(fragments)
    }

    fn compile_condition(
        &mut self,
        condition: &ConditionRule,
        alias: &str,
        context_entity_id: Uuid,
    ) -> Result<String, RuleError> {
        let attribute = self.scoped_attribute(&condition.attribute_id, context_entity_id)?;
        let data_type = attribute.data_type;
        let name = checked_identifier(&attribute.name)?.to_string();

        let operator = Operator::parse(&condition.operator)
            .filter(|op| data_type.supports(*op))
            .ok_or_else(|| RuleError::UnsupportedOperator {
                operator: condition.operator.clone(),
                attribute: name.clone(),
                data_type: data_type.to_string(),
            })?;

        let invalid = |reason: String| RuleError::InvalidValue {
            attribute: name.clone(),
            reason,
        };

        let column = format!(
            "({}.attributes->>'{}'){}",
            alias,
            name,
            data_type.sql_cast().unwrap_or("")
        );

        if operator.is_null_check() {
            return Ok(format!("{} {}", column, operator.sql()));
        }

        let sql = match operator {
            Operator::In => {
                let items = condition
                    .value
                    .as_array()
                    .ok_or_else(|| invalid(format!("operator 'in' expects a list, got {}", condition.value)))?;
                if items.is_empty() {
                    return Ok("FALSE".to_string());
                }
                let values = items
                    .iter()
                    .map(|item| data_type.coerce(item).map_err(&invalid))
                    .collect::<Result<Vec<_>, _>>()?;
                let placeholders: Vec<String> = values.into_iter().map(|v| self.bind(v)).collect();
                format!("{} IN ({})", column, placeholders.join(", "))
            }
            Operator::Contains => {
                let needle = match data_type.coerce(&condition.value).map_err(&invalid)? {
                    BoundValue::Text(s) => s,
                    other => other.to_string(),
                };
                let placeholder = self.bind(BoundValue::Text(format!("%{}%", needle)));
                format!("{} {} {}", column, operator.sql(), placeholder)
            }
            _ => {
                let value = data_type.coerce(&condition.value).map_err(&invalid)?;
                let placeholder = self.bind(value);
                format!("{} {} {}", column, operator.sql(), placeholder)
            }
        };

        Ok(sql)
    }

    fn compile_relationship(
        &mut self,
        rule: &RelationshipRule,
        alias: &str,
        context_entity_id: Uuid,
    ) -> Result<String, RuleError> {
        let definitions = self.definitions;
        let relationship = definitions
            .relationship(&rule.relationship_id)
            .ok_or(RuleError::RelationshipNotFound(rule.relationship_id))?;

        let traversal = relationship.traverse_from(context_entity_id).ok_or_else(|| {
            RuleError::RelationshipEntityMismatch {
                relationship: relationship.name.clone(),
                entity: context_entity_id,
            }
        })?;

        let local_key = self.scoped_attribute(&traversal.local_attribute_id, context_entity_id)?;
        let local_key = checked_identifier(&local_key.name)?.to_string();
        let related_key =
            self.scoped_attribute(&traversal.related_attribute_id, traversal.related_entity_id)?;
        let related_key = checked_identifier(&related_key.name)?.to_string();

        let related_alias = self.allocate_alias();
        let entity_placeholder = self.bind(BoundValue::Uuid(traversal.related_entity_id));

        let mut sql = format!(
            "EXISTS (SELECT 1 FROM {table} {ra} WHERE {ra}.entity_definition_id = {p} \
             AND ({a}.attributes->>'{lk}') = ({ra}.attributes->>'{rk}')",
            table = INSTANCE_TABLE,
            ra = related_alias,
            p = entity_placeholder,
            a = alias,
            lk = local_key,
            rk = related_key,
        );

        let nested = self.compile(
            &rule.related_entity_rules,
            &related_alias,
            traversal.related_entity_id,
        )?;
        if !nested.is_empty() {
            sql.push_str(&format!(" AND ({})", nested));
        }
        sql.push(')');

        Ok(sql)
    }

    fn scoped_attribute(
        &self,
        attribute_id: &Uuid,
        context_entity_id: Uuid,
    ) -> Result<&'a AttributeDefinition, RuleError> {
        let definitions: &'a DefinitionSet = self.definitions;
        let attribute = definitions
            .attribute(attribute_id)
            .ok_or(RuleError::AttributeNotFound(*attribute_id))?;
        if attribute.entity_id != context_entity_id {
            return Err(RuleError::AttributeEntityMismatch {
                attribute: attribute.name.clone(),
                expected: context_entity_id,
                actual: attribute.entity_id,
            });
        }
        Ok(attribute)
    }
}

fn join_fragments(group: &RuleGroup, fragments: &[String]) -> String {
    fragments.join(&format!(" {} ", group.logical_operator.as_sql()))
}

/// Attribute names are written inside a single-quoted JSON key, so only a
/// conservative character set is accepted.
fn checked_identifier(name: &str) -> Result<&str, RuleError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_IDENTIFIER_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ' '));
    if valid {
        Ok(name)
    } else {
        Err(RuleError::UnsafeIdentifier(name.to_string()))
    }
}

/// Build the membership query for a group rooted at `root_entity_id`:
///
/// `SELECT id FROM processed_entities pe1 WHERE pe1.entity_definition_id = $1 AND (...)`
///
/// The root entity id is always `$1`. An empty rule tree selects every
/// instance of the root entity.
pub fn compile_membership_query(
    root: &RuleGroup,
    definitions: &DefinitionSet,
    root_entity_id: Uuid,
) -> Result<CompiledQuery, RuleError> {
    let mut compiler = WhereCompiler::new(definitions);
    let alias = compiler.allocate_alias();
    let entity_placeholder = compiler.bind(BoundValue::Uuid(root_entity_id));
    let predicate = compiler.compile(root, &alias, root_entity_id)?;

    let mut sql = format!(
        "SELECT id FROM {} {} WHERE {}.entity_definition_id = {}",
        INSTANCE_TABLE, alias, alias, entity_placeholder
    );
    if !predicate.is_empty() {
        sql.push_str(&format!(" AND ({})", predicate));
    }

    let params = compiler.into_params();
    debug!(sql = %sql, params = params.len(), "Compiled membership query");
    Ok(CompiledQuery { sql, params })
}
