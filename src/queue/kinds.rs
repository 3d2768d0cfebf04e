//! The closed sets of entity types and operations an application accepts.

use std::collections::BTreeSet;

use crate::error::QueueError;

use super::entry::Operation;

/// Entity types and operations declared by the integrating application.
///
/// Anything outside these sets is rejected at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedKinds {
    entity_types: BTreeSet<String>,
    operations: BTreeSet<Operation>,
}

impl SupportedKinds {
    /// Accept the given entity types with every operation.
    pub fn new<I, S>(entity_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity_types: entity_types.into_iter().map(Into::into).collect(),
            operations: Operation::ALL.into_iter().collect(),
        }
    }

    /// Restrict the accepted operations.
    #[must_use]
    pub fn with_operations<I>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = Operation>,
    {
        self.operations = operations.into_iter().collect();
        self
    }

    #[must_use]
    pub fn supports_entity(&self, entity_type: &str) -> bool {
        self.entity_types.contains(entity_type)
    }

    #[must_use]
    pub fn supports_operation(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }

    /// Declared entity types, sorted.
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.entity_types.iter().map(String::as_str)
    }

    /// Check a typed pair.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Validation` if either value is not declared.
    pub fn check(&self, entity_type: &str, operation: Operation) -> Result<(), QueueError> {
        if !self.supports_entity(entity_type) {
            return Err(QueueError::Validation(format!(
                "unsupported entity type '{entity_type}'"
            )));
        }
        if !self.supports_operation(operation) {
            return Err(QueueError::Validation(format!(
                "operation '{operation}' is not enabled"
            )));
        }
        Ok(())
    }

    /// Parse and check a raw operation name.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Validation` for unknown or undeclared values.
    pub fn validate(&self, entity_type: &str, operation: &str) -> Result<Operation, QueueError> {
        let operation: Operation = operation.parse()?;
        self.check(entity_type, operation)?;
        Ok(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_declared() {
        let kinds = SupportedKinds::new(["student", "course"]);
        assert_eq!(kinds.validate("student", "create").unwrap(), Operation::Create);
        assert_eq!(kinds.validate("course", "delete").unwrap(), Operation::Delete);
    }

    #[test]
    fn test_validate_rejects_unknown_entity() {
        let kinds = SupportedKinds::new(["student"]);
        let err = kinds.validate("unknown", "create").unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
        assert!(err.to_string().contains("unknown"));
    }

    #[test]
    fn test_validate_rejects_unknown_operation() {
        let kinds = SupportedKinds::new(["student"]);
        assert!(kinds.validate("student", "merge").is_err());
    }

    #[test]
    fn test_restricted_operations() {
        let kinds = SupportedKinds::new(["student"]).with_operations([Operation::Create]);
        assert!(kinds.check("student", Operation::Create).is_ok());
        assert!(kinds.check("student", Operation::Delete).is_err());
    }

    #[test]
    fn test_entity_types_sorted() {
        let kinds = SupportedKinds::new(["lesson", "course", "student"]);
        let names: Vec<_> = kinds.entity_types().collect();
        assert_eq!(names, vec!["course", "lesson", "student"]);
    }
}
