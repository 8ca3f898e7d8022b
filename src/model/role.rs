use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    EnumString,
    EnumIter,
    AsRefStr,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Hr,
    Cashier,
    InventoryClerk,
    Driver,
    Employee,
}

impl Role {
    /// Parses role names as stored in `roles.name`, skipping unknown ones.
    pub fn parse_all<I, S>(names: I) -> Vec<Role>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .filter_map(|n| n.as_ref().parse().ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_all_skips_unknown_names() {
        let roles = Role::parse_all(["admin", "inventory_clerk", "janitor"]);
        assert_eq!(roles, vec![Role::Admin, Role::InventoryClerk]);
    }
}
