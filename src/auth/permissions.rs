use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use strum::{AsRefStr, Display, EnumIter, IntoEnumIterator};
use utoipa::ToSchema;

use crate::model::role::Role;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, ToSchema, EnumIter, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Permission {
    ManageUsers,
    ViewAuditLog,
    ViewInventory,
    ManageInventory,
    ManageEmployees,
    SubmitAttendance,
    ManageAttendance,
    RunPayroll,
    ViewPayroll,
    ViewOwnPayslip,
    ManageSales,
    ViewCustomers,
    ManageCustomers,
    ManageDeliveries,
    UpdateDeliveryStatus,
    ViewReports,
}

/// Role → permission set. Built once, never mutated.
static ROLE_PERMISSIONS: Lazy<HashMap<Role, HashSet<Permission>>> = Lazy::new(|| {
    use Permission::*;

    let grants: [(Role, Vec<Permission>); 7] = [
        (Role::Admin, Permission::iter().collect()),
        (
            Role::Manager,
            vec![
                ViewAuditLog,
                ViewInventory,
                ManageInventory,
                ManageEmployees,
                ManageAttendance,
                ViewPayroll,
                ManageSales,
                ViewCustomers,
                ManageCustomers,
                ManageDeliveries,
                UpdateDeliveryStatus,
                ViewReports,
                SubmitAttendance,
                ViewOwnPayslip,
            ],
        ),
        (
            Role::Hr,
            vec![
                ManageEmployees,
                ManageAttendance,
                RunPayroll,
                ViewPayroll,
                ViewReports,
                SubmitAttendance,
                ViewOwnPayslip,
            ],
        ),
        (
            Role::Cashier,
            vec![
                ViewInventory,
                ManageSales,
                ViewCustomers,
                ManageCustomers,
                ManageDeliveries,
                SubmitAttendance,
                ViewOwnPayslip,
            ],
        ),
        (
            Role::InventoryClerk,
            vec![ViewInventory, ManageInventory, SubmitAttendance, ViewOwnPayslip],
        ),
        (
            Role::Driver,
            vec![UpdateDeliveryStatus, SubmitAttendance, ViewOwnPayslip],
        ),
        (Role::Employee, vec![SubmitAttendance, ViewOwnPayslip]),
    ];

    grants
        .into_iter()
        .map(|(role, perms)| (role, perms.into_iter().collect()))
        .collect()
});

pub fn role_has(role: Role, permission: Permission) -> bool {
    ROLE_PERMISSIONS
        .get(&role)
        .is_some_and(|set| set.contains(&permission))
}

/// Does any role in the set grant `permission`?
pub fn has_permission(roles: &[Role], permission: Permission) -> bool {
    roles.iter().any(|r| role_has(*r, permission))
}

/// Union of the permissions granted by `roles`, in declaration order.
pub fn effective_permissions(roles: &[Role]) -> Vec<Permission> {
    Permission::iter()
        .filter(|p| has_permission(roles, *p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_role_has_an_entry() {
        for role in Role::iter() {
            assert!(ROLE_PERMISSIONS.contains_key(&role), "{} missing", role);
        }
    }

    #[test]
    fn admin_holds_everything() {
        for p in Permission::iter() {
            assert!(role_has(Role::Admin, p));
        }
    }

    #[test]
    fn role_set_is_a_union() {
        let roles = [Role::Driver, Role::Cashier];
        assert!(has_permission(&roles, Permission::UpdateDeliveryStatus));
        assert!(has_permission(&roles, Permission::ManageSales));
        assert!(!has_permission(&roles, Permission::RunPayroll));
    }

    #[test]
    fn empty_role_set_grants_nothing() {
        assert!(effective_permissions(&[]).is_empty());
    }

    #[test]
    fn payroll_is_restricted() {
        assert!(role_has(Role::Hr, Permission::RunPayroll));
        assert!(!role_has(Role::Manager, Permission::RunPayroll));
        assert!(!role_has(Role::Employee, Permission::ViewPayroll));
        assert!(role_has(Role::Employee, Permission::ViewOwnPayslip));
    }
}
