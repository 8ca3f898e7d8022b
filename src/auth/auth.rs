use crate::auth::permissions::{Permission, has_permission};
use crate::error::AppError;
use crate::model::role::Role;
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload};
use futures::future::{Ready, ready};

/// Caller identity placed in request extensions by `auth_middleware`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub roles: Vec<Role>,

    /// Present only if this user is linked to an employee record
    pub employee_id: Option<u64>,
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthUser>()
                .cloned()
                .ok_or_else(|| AppError::Unauthorized("Missing token".to_string())),
        )
    }
}

impl AuthUser {
    pub fn can(&self, permission: Permission) -> bool {
        has_permission(&self.roles, permission)
    }

    pub fn require(&self, permission: Permission) -> Result<(), AppError> {
        if self.can(permission) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "Missing permission: {}",
                permission
            )))
        }
    }

    /// Passes with `any` or, failing that, when `own` is granted and the
    /// resource belongs to the caller's employee record.
    pub fn require_any_or_own(
        &self,
        any: Permission,
        own: Permission,
        owner_employee_id: u64,
    ) -> Result<(), AppError> {
        if self.can(any) {
            return Ok(());
        }
        if self.can(own) && self.employee_id == Some(owner_employee_id) {
            return Ok(());
        }
        Err(AppError::Forbidden(format!("Missing permission: {}", any)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn cashier() -> AuthUser {
        AuthUser {
            user_id: 4,
            username: "till1".into(),
            roles: vec![Role::Cashier],
            employee_id: Some(11),
        }
    }

    #[actix_web::test]
    async fn extractor_reads_extensions() {
        let req = TestRequest::default().to_http_request();
        req.extensions_mut().insert(cashier());

        let user = AuthUser::extract(&req).await.unwrap();
        assert_eq!(user.user_id, 4);
        assert_eq!(user.roles, vec![Role::Cashier]);
    }

    #[actix_web::test]
    async fn extractor_without_middleware_is_unauthorized() {
        let req = TestRequest::default().to_http_request();
        assert!(matches!(
            AuthUser::extract(&req).await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn require_checks_role_set() {
        let user = cashier();
        assert!(user.require(Permission::ManageSales).is_ok());
        assert!(matches!(
            user.require(Permission::RunPayroll),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn own_payslip_only() {
        let user = cashier();
        assert!(user
            .require_any_or_own(Permission::ViewPayroll, Permission::ViewOwnPayslip, 11)
            .is_ok());
        assert!(user
            .require_any_or_own(Permission::ViewPayroll, Permission::ViewOwnPayslip, 12)
            .is_err());
    }
}
