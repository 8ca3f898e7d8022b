use crate::{
    api::{
        attendance, audit, customer, dashboard, delivery, employee, notification, pay_period,
        payroll, payslip, product, report, sale, user,
    },
    auth::{handlers, middleware::auth_middleware},
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use anyhow::{Context, Result};
use std::sync::Arc;

type LimiterConfig = GovernorConfig<PeerIpKeyExtractor, NoOpMiddleware>;

/// Rate-limit budgets, built once so every worker shares the same buckets.
#[derive(Clone)]
pub struct Limiters {
    login: LimiterConfig,
    refresh: LimiterConfig,
    protected: LimiterConfig,
}

fn build_limiter(requests_per_min: u32) -> Result<LimiterConfig> {
    let per_ms = if requests_per_min == 0 {
        1
    } else {
        (60_000 / requests_per_min as u64).max(1)
    };
    GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min.max(1))
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .with_context(|| format!("invalid rate limit: {} per minute", requests_per_min))
}

impl Limiters {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            login: build_limiter(config.rate_login_per_min)?,
            refresh: build_limiter(config.rate_refresh_per_min)?,
            protected: build_limiter(config.rate_protected_per_min)?,
        })
    }
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config, limiters: &Limiters) {
    let login_limiter = Arc::new(Governor::new(&limiters.login));
    let refresh_limiter = Arc::new(Governor::new(&limiters.refresh));
    let protected_limiter = Governor::new(&limiters.protected);

    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(refresh_limiter.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(login_limiter)
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware))
            .wrap(protected_limiter)
            .service(web::resource("/me").route(web::get().to(handlers::me)))
            .service(
                web::scope("/users")
                    .service(
                        web::resource("")
                            .route(web::post().to(user::create_user))
                            .route(web::get().to(user::list_users)),
                    )
                    .service(
                        web::resource("/{id}/roles").route(web::put().to(user::replace_user_roles)),
                    )
                    .service(
                        web::resource("/{id}/status").route(web::put().to(user::update_user_status)),
                    ),
            )
            .service(
                web::scope("/employees")
                    .service(
                        web::resource("")
                            .route(web::post().to(employee::create_employee))
                            .route(web::get().to(employee::list_employees)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(employee::get_employee))
                            .route(web::put().to(employee::update_employee))
                            .route(web::delete().to(employee::delete_employee)),
                    ),
            )
            .service(
                web::scope("/pay-periods")
                    .service(
                        web::resource("")
                            .route(web::post().to(pay_period::create_pay_period))
                            .route(web::get().to(pay_period::list_pay_periods)),
                    )
                    .service(web::resource("/{id}").route(web::get().to(pay_period::get_pay_period))),
            )
            .service(
                web::scope("/attendance")
                    .service(
                        web::resource("")
                            .route(web::post().to(attendance::submit_attendance))
                            .route(web::get().to(attendance::list_attendance)),
                    )
                    .service(web::resource("/check-in").route(web::post().to(attendance::check_in)))
                    .service(web::resource("/check-out").route(web::put().to(attendance::check_out))),
            )
            .service(
                web::scope("/payroll/runs")
                    .service(
                        web::resource("")
                            .route(web::post().to(payroll::create_payroll_run))
                            .route(web::get().to(payroll::list_payroll_runs)),
                    )
                    .service(web::resource("/{id}").route(web::get().to(payroll::get_payroll_run)))
                    .service(
                        web::resource("/{id}/finalize")
                            .route(web::post().to(payroll::finalize_payroll_run)),
                    ),
            )
            .service(
                web::scope("/payslips")
                    .service(web::resource("").route(web::get().to(payslip::list_payslips)))
                    .service(web::resource("/{id}").route(web::get().to(payslip::get_payslip)))
                    .service(
                        web::resource("/{id}/earnings")
                            .route(web::put().to(payslip::replace_payslip_earnings)),
                    )
                    .service(
                        web::resource("/{id}/deductions")
                            .route(web::put().to(payslip::replace_payslip_deductions)),
                    )
                    .service(
                        web::resource("/{id}/recalculate")
                            .route(web::post().to(payslip::recalculate_payslip)),
                    ),
            )
            .service(
                web::scope("/products")
                    .service(
                        web::resource("")
                            .route(web::post().to(product::create_product))
                            .route(web::get().to(product::list_products)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(product::get_product))
                            .route(web::put().to(product::update_product))
                            .route(web::delete().to(product::delete_product)),
                    )
                    .service(
                        web::resource("/{id}/stock-adjustments")
                            .route(web::post().to(product::adjust_stock)),
                    )
                    .service(
                        web::resource("/{id}/stock-movements")
                            .route(web::get().to(product::list_stock_movements)),
                    ),
            )
            .service(
                web::scope("/customers")
                    .service(
                        web::resource("")
                            .route(web::post().to(customer::create_customer))
                            .route(web::get().to(customer::list_customers)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(customer::get_customer))
                            .route(web::put().to(customer::update_customer))
                            .route(web::delete().to(customer::delete_customer)),
                    ),
            )
            .service(
                web::scope("/sales")
                    .service(
                        web::resource("")
                            .route(web::post().to(sale::create_sale))
                            .route(web::get().to(sale::list_sales)),
                    )
                    .service(web::resource("/{id}").route(web::get().to(sale::get_sale)))
                    .service(web::resource("/{id}/items").route(web::post().to(sale::add_sale_item)))
                    .service(
                        web::resource("/{id}/items/{item_id}")
                            .route(web::delete().to(sale::remove_sale_item)),
                    )
                    .service(web::resource("/{id}/hold").route(web::post().to(sale::hold_sale)))
                    .service(web::resource("/{id}/resume").route(web::post().to(sale::resume_sale)))
                    .service(web::resource("/{id}/complete").route(web::post().to(sale::complete_sale)))
                    .service(web::resource("/{id}/void").route(web::post().to(sale::void_sale))),
            )
            .service(
                web::scope("/deliveries")
                    .service(
                        web::resource("")
                            .route(web::post().to(delivery::create_delivery))
                            .route(web::get().to(delivery::list_deliveries)),
                    )
                    .service(
                        web::resource("/track/{tracking_number}")
                            .route(web::get().to(delivery::track_delivery)),
                    )
                    .service(web::resource("/{id}").route(web::get().to(delivery::get_delivery)))
                    .service(
                        web::resource("/{id}/history").route(web::get().to(delivery::delivery_history)),
                    )
                    .service(
                        web::resource("/{id}/status")
                            .route(web::put().to(delivery::update_delivery_status)),
                    ),
            )
            .service(
                web::scope("/notifications")
                    .service(web::resource("").route(web::get().to(notification::list_notifications)))
                    .service(
                        web::resource("/{id}/read")
                            .route(web::put().to(notification::mark_notification_read)),
                    ),
            )
            .service(web::resource("/audit-logs").route(web::get().to(audit::list_audit_logs)))
            .service(web::resource("/reports/{kind}").route(web::get().to(report::get_report)))
            .service(web::resource("/dashboard").route(web::get().to(dashboard::dashboard))),
    );
}

// LOGIN
//  ├─ access_token (ACCESS_TOKEN_TTL, 15 min)
//  └─ refresh_token (REFRESH_TOKEN_TTL, 7 days, stored by jti)

// API REQUEST
//  └─ Authorization: Bearer access_token
//       └─ roles re-read through RoleCache

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ old refresh token revoked, new pair returned
