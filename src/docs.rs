use crate::api::attendance::{
    AttendanceDayResponse, AttendanceResponse, DayInput, SubmitAttendance,
};
use crate::api::dashboard::DashboardSummary;
use crate::api::delivery::{
    CreateDelivery, DeliveryResponse, StatusUpdateResponse, UpdateDeliveryStatus,
};
use crate::api::employee::{
    CreateEmployee, EmployeeListResponse, EmployeeResponse, UpdateEmployee,
};
use crate::api::pay_period::{CreatePayPeriod, PayPeriodResponse};
use crate::api::payroll::{CreatePayrollRun, PayrollRunResponse, PayslipSummary};
use crate::api::payslip::{
    DeductionInput, DeductionsInput, EarningInput, EarningsInput, LineResponse, PayslipResponse,
};
use crate::api::product::{CreateProduct, ProductResponse, StockAdjustment, StockMovementResponse};
use crate::api::sale::{
    AddSaleItem, CompleteSale, CreateSale, PaymentInput, PaymentResponse, SaleItemResponse,
    SaleResponse, VoidSale,
};
use crate::api::customer::CreateCustomer;
use crate::api::user::{CreateUser, ReplaceRoles, UpdateUserStatus, UserResponse};
use crate::auth::handlers::LoginResponse;
use crate::auth::permissions::Permission;
use crate::domain::deductions::PeriodType;
use crate::domain::delivery::DeliveryStatus;
use crate::domain::payslip::{DeductionType, EarningType};
use crate::domain::sale::{PaymentMethod, SaleStatus};
use crate::model::{audit_log::AuditLog, customer::Customer, notification::Notification, role::Role};
use crate::models::LoginReqDto;
use crate::report::{ReportFormat, ReportKind, ReportTable};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Back-office API",
        version = "1.0.0",
        description = r#"
## Construction-supply back office

Payroll and HR, attendance, point of sale, inventory, customers, deliveries
and reporting behind one role-gated REST API.

### Security
Endpoints under `/api/v1` require a **JWT Bearer** access token from
`/auth/login`. Each route checks one permission; a user's permissions are the
union of what their roles grant.

### Conventions
- Money is a fixed two-decimal string (`"1250.00"`)
- List endpoints take `page` and `perPage` and return `{data, page, perPage, total}`
- Errors are `{"error": "...", "field": "..."}`; `field` only on validation failures
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,
        crate::auth::handlers::me,

        crate::api::user::create_user,
        crate::api::user::list_users,
        crate::api::user::replace_user_roles,
        crate::api::user::update_user_status,

        crate::api::employee::create_employee,
        crate::api::employee::list_employees,
        crate::api::employee::get_employee,
        crate::api::employee::update_employee,
        crate::api::employee::delete_employee,

        crate::api::pay_period::create_pay_period,
        crate::api::pay_period::list_pay_periods,
        crate::api::pay_period::get_pay_period,

        crate::api::attendance::check_in,
        crate::api::attendance::check_out,
        crate::api::attendance::submit_attendance,
        crate::api::attendance::list_attendance,

        crate::api::payroll::create_payroll_run,
        crate::api::payroll::list_payroll_runs,
        crate::api::payroll::get_payroll_run,
        crate::api::payroll::finalize_payroll_run,

        crate::api::payslip::list_payslips,
        crate::api::payslip::get_payslip,
        crate::api::payslip::replace_payslip_earnings,
        crate::api::payslip::replace_payslip_deductions,
        crate::api::payslip::recalculate_payslip,

        crate::api::product::create_product,
        crate::api::product::list_products,
        crate::api::product::get_product,
        crate::api::product::update_product,
        crate::api::product::delete_product,
        crate::api::product::adjust_stock,
        crate::api::product::list_stock_movements,

        crate::api::customer::create_customer,
        crate::api::customer::list_customers,
        crate::api::customer::get_customer,
        crate::api::customer::update_customer,
        crate::api::customer::delete_customer,

        crate::api::sale::create_sale,
        crate::api::sale::list_sales,
        crate::api::sale::get_sale,
        crate::api::sale::add_sale_item,
        crate::api::sale::remove_sale_item,
        crate::api::sale::hold_sale,
        crate::api::sale::resume_sale,
        crate::api::sale::complete_sale,
        crate::api::sale::void_sale,

        crate::api::delivery::create_delivery,
        crate::api::delivery::list_deliveries,
        crate::api::delivery::get_delivery,
        crate::api::delivery::track_delivery,
        crate::api::delivery::delivery_history,
        crate::api::delivery::update_delivery_status,

        crate::api::notification::list_notifications,
        crate::api::notification::mark_notification_read,
        crate::api::audit::list_audit_logs,

        crate::api::report::get_report,
        crate::api::dashboard::dashboard
    ),
    components(
        schemas(
            LoginReqDto,
            LoginResponse,
            Role,
            Permission,
            CreateUser,
            ReplaceRoles,
            UpdateUserStatus,
            UserResponse,
            CreateEmployee,
            UpdateEmployee,
            EmployeeResponse,
            EmployeeListResponse,
            PeriodType,
            CreatePayPeriod,
            PayPeriodResponse,
            DayInput,
            SubmitAttendance,
            AttendanceDayResponse,
            AttendanceResponse,
            CreatePayrollRun,
            PayslipSummary,
            PayrollRunResponse,
            EarningType,
            DeductionType,
            EarningInput,
            DeductionInput,
            EarningsInput,
            DeductionsInput,
            LineResponse,
            PayslipResponse,
            CreateProduct,
            StockAdjustment,
            ProductResponse,
            StockMovementResponse,
            CreateCustomer,
            Customer,
            SaleStatus,
            PaymentMethod,
            CreateSale,
            AddSaleItem,
            PaymentInput,
            CompleteSale,
            VoidSale,
            SaleItemResponse,
            PaymentResponse,
            SaleResponse,
            DeliveryStatus,
            CreateDelivery,
            UpdateDeliveryStatus,
            DeliveryResponse,
            StatusUpdateResponse,
            Notification,
            AuditLog,
            ReportKind,
            ReportFormat,
            ReportTable,
            DashboardSummary
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login, token refresh and logout"),
        (name = "User", description = "User accounts and role assignment"),
        (name = "Employee", description = "Employee records"),
        (name = "Attendance", description = "Check-in/out and attendance submission"),
        (name = "Payroll", description = "Pay periods and payroll runs"),
        (name = "Payslip", description = "Payslips, earnings and deductions"),
        (name = "Inventory", description = "Products and stock movements"),
        (name = "Customer", description = "Customer directory"),
        (name = "Sales", description = "Point-of-sale transactions"),
        (name = "Delivery", description = "Deliveries and tracking"),
        (name = "Notification", description = "In-app notifications"),
        (name = "Audit", description = "Audit trail"),
        (name = "Report", description = "JSON, CSV and PDF reports"),
        (name = "Dashboard", description = "Summary counters"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}
