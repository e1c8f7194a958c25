use crate::core::inventory::Inventory;
use crate::errors::{VmError, VmResult};

pub const MIN_NAME_LENGTH: usize = 3;

/// Names are `[A-Za-z0-9-]{3,}`. Character set is checked before length so
/// every malformed name fails the same way.
pub fn validate_name(name: &str) -> VmResult<()> {
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
    {
        return Err(VmError::invalid_name(
            name,
            format!("VM names can only contain 0-9, a-Z and dashes (found {:?})", bad),
        ));
    }

    if name.len() < MIN_NAME_LENGTH {
        return Err(VmError::invalid_name(
            name,
            format!("VM names must be at least {} characters long", MIN_NAME_LENGTH),
        ));
    }

    Ok(())
}

/// Name -> existence, answered from the cluster VM list or a node's live
/// hypervisor.
#[derive(Clone)]
pub struct NameRegistry {
    inventory: Inventory,
}

impl NameRegistry {
    pub fn new(inventory: Inventory) -> Self {
        Self { inventory }
    }

    /// `node = None` asks the local authoritative configuration; a node name
    /// asks that node's hypervisor.
    pub async fn exists(&self, name: &str, node: Option<&str>) -> VmResult<bool> {
        Ok(self
            .inventory
            .list_names(node)
            .await?
            .iter()
            .any(|existing| existing == name))
    }

    pub async fn check_name_available(&self, name: &str) -> VmResult<()> {
        validate_name(name)?;
        if self.exists(name, None).await? {
            return Err(VmError::invalid_name(name, "VM already exists"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_alphanumerics_and_dashes() {
        for name in ["web01", "db-primary-2", "ABC", "a-b", "---", "0123456789"] {
            assert!(validate_name(name).is_ok(), "{} should be valid", name);
        }
    }

    #[test]
    fn rejects_foreign_characters() {
        for name in ["bad name!", "web_01", "db.01", "vm/1", "naïve", "caret^vm", ""] {
            // empty fails on length, the rest on characters
            assert!(
                matches!(validate_name(name), Err(VmError::InvalidName { .. })),
                "{:?} should be invalid",
                name
            );
        }
    }

    #[test]
    fn rejects_short_names() {
        let err = validate_name("ab").unwrap_err();
        assert!(err.to_string().contains("at least 3 characters"));
    }

    #[test]
    fn character_check_wins_over_length() {
        let err = validate_name("a!").unwrap_err();
        assert!(err.to_string().contains("can only contain"));
    }
}
