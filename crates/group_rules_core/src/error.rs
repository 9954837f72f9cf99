use thiserror::Error;
use uuid::Uuid;

/// Errors raised while parsing a rule tree or compiling it to SQL.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("unknown rule type: {0}")]
    UnknownRuleType(String),

    #[error("rule node has no \"type\" field")]
    MissingRuleType,

    #[error("malformed rule JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid logical operator '{0}', expected AND or OR")]
    InvalidLogicalOperator(String),

    #[error("attribute definition not found: {0}")]
    AttributeNotFound(Uuid),

    #[error("relationship definition not found: {0}")]
    RelationshipNotFound(Uuid),

    #[error("attribute '{attribute}' belongs to entity {actual}, but the rule is scoped to entity {expected}")]
    AttributeEntityMismatch {
        attribute: String,
        expected: Uuid,
        actual: Uuid,
    },

    #[error("relationship '{relationship}' does not connect entity {entity}")]
    RelationshipEntityMismatch { relationship: String, entity: Uuid },

    #[error("unsupported operator '{operator}' for attribute '{attribute}' of type {data_type}")]
    UnsupportedOperator {
        operator: String,
        attribute: String,
        data_type: String,
    },

    #[error("invalid value for attribute '{attribute}': {reason}")]
    InvalidValue { attribute: String, reason: String },

    #[error("unsafe identifier '{0}'")]
    UnsafeIdentifier(String),
}

/// Errors reported by the metadata collaborator.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl MetadataError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors reported by the orchestration collaborator.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("workflow {workflow_id} rejected trigger: {message}")]
    Rejected { workflow_id: Uuid, message: String },

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_unknown_rule_type() {
        let e = RuleError::UnknownRuleType("between".into());
        assert_eq!(e.to_string(), "unknown rule type: between");
    }

    #[test]
    fn display_unsupported_operator_names_operator() {
        let e = RuleError::UnsupportedOperator {
            operator: "contains".into(),
            attribute: "Age".into(),
            data_type: "integer".into(),
        };
        assert_eq!(
            e.to_string(),
            "unsupported operator 'contains' for attribute 'Age' of type integer"
        );
    }

    #[test]
    fn metadata_not_found_predicate() {
        assert!(MetadataError::NotFound("group x".into()).is_not_found());
        assert!(!MetadataError::Internal(anyhow::anyhow!("boom")).is_not_found());
    }
}
