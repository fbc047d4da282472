use std::collections::HashSet;

use crate::{CompileError, RuleSet, RulesContainer};

pub(crate) fn validate(ruleset: &RuleSet) -> Result<(), CompileError> {
    let mut next_index = 0;
    check_container(&ruleset.rules, &mut next_index)
}

fn check_container(container: &RulesContainer, next_index: &mut usize) -> Result<(), CompileError> {
    match container {
        RulesContainer::List(rules) => {
            for rule in rules {
                let index = *next_index;
                *next_index += 1;
                if rule.value.owner_type().is_some_and(str::is_empty) {
                    return Err(CompileError::EmptyOwnerType { index });
                }
            }
            Ok(())
        }
        RulesContainer::Partition {
            property,
            branches,
            fallback,
        } => {
            if property.is_empty() {
                return Err(CompileError::EmptyPartitionProperty);
            }
            check_partition_keys(property, branches)?;
            for (_, branch) in branches {
                check_container(branch, next_index)?;
            }
            check_container(fallback, next_index)
        }
    }
}

/// Keys are compared lower-cased, the same way both backends dispatch.
fn check_partition_keys(
    property: &str,
    branches: &[(String, RulesContainer)],
) -> Result<(), CompileError> {
    let mut seen = HashSet::new();
    for (key, _) in branches {
        let key = key.to_lowercase();
        if !seen.insert(key.clone()) {
            return Err(CompileError::DuplicatePartitionKey {
                property: property.to_owned(),
                key,
            });
        }
    }
    Ok(())
}
