//! Group rules core — pure domain types and logic for dynamic entity groups.
//!
//! A group's membership rule is a nested tree of attribute conditions,
//! AND/OR groups and relationship sub-queries. This crate parses that tree,
//! resolves attribute types, and compiles it into a parameterized SQL
//! predicate over `processed_entities`. Zero sqlx: executing the predicate
//! and persisting membership lives in `group-engine`.

pub mod attribute_type;
pub mod calculation;
pub mod catalog;
pub mod compiler;
pub mod definitions;
pub mod error;
pub mod ports;
pub mod rule_tree;

pub use attribute_type::{cast_and_operators, BoundValue, DataType, Operator};
pub use calculation::{CalculationStatus, GroupCalculationLog, GroupResults};
pub use catalog::DefinitionSet;
pub use compiler::{compile_membership_query, AliasAllocator, CompiledQuery, WhereCompiler};
pub use definitions::{
    AttributeDefinition, EntityDefinition, EntityRelationshipDefinition, GroupDefinition,
    RelationshipType,
};
pub use error::{MetadataError, OrchestrationError, RuleError};
pub use ports::{InMemoryMetadataClient, MetadataServiceClient, OrchestrationServiceClient};
pub use rule_tree::{
    ConditionRule, LogicalOperator, ReferencedDefinitions, RelationshipRule, RuleGroup, RuleNode,
};
