use regrade_storage::{ClassId, IncompleteValues, IncompleteValuesPolicy, StudentId};

/// Per-student state of one evaluation.
///
/// Dependency sources read the student and tier from it and record into `incomplete_values`
/// whatever input they could not supply; `mean` reads the policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionContext {
    pub student_id: StudentId,
    pub class_id: ClassId,
    pub is_private_calculation: bool,
    pub incomplete_values: IncompleteValues,
    pub incomplete_values_policy: IncompleteValuesPolicy,
}

impl ExpressionContext {
    pub fn new(
        student_id: StudentId,
        class_id: ClassId,
        is_private_calculation: bool,
        incomplete_values_policy: IncompleteValuesPolicy,
    ) -> ExpressionContext {
        ExpressionContext {
            student_id,
            class_id,
            is_private_calculation,
            incomplete_values: IncompleteValues::default(),
            incomplete_values_policy,
        }
    }
}
