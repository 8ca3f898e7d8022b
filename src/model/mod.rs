pub mod attendance;
pub mod audit_log;
pub mod customer;
pub mod delivery;
pub mod employee;
pub mod notification;
pub mod pay_period;
pub mod payroll;
pub mod product;
pub mod role;
pub mod sale;
pub mod user;
