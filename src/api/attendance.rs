use std::collections::{BTreeMap, HashSet};

use actix_web::{HttpResponse, Responder, web};
use chrono::{DateTime, Local, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sqlx::{MySqlConnection, MySqlPool};
use strum::{AsRefStr, Display, EnumString};
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

use crate::api::pay_period::{fetch_period, period_containing};
use crate::api::{FilterValue, Filters, Page, Paginated, bind_filters};
use crate::auth::{auth::AuthUser, permissions::Permission};
use crate::domain::hours::{hours_between, total_hours};
use crate::domain::money::{parse_optional_amount, to_fixed};
use crate::error::{ApiResult, AppError};
use crate::model::attendance::{Attendance, AttendanceDay};
use crate::model::pay_period::PayPeriod;
use crate::services::employees::ensure_employee_for_user;
use crate::utils::role_cache::RoleCache;

const MAX_DAY_HOURS: Decimal = dec!(24);

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SubmissionStatus {
    OnTime,
    Late,
}

/// Attendance handed in after its period closed is late.
pub fn submission_status(submitted_on: NaiveDate, period: Option<&PayPeriod>) -> SubmissionStatus {
    match period {
        Some(p) if submitted_on > p.end_date => SubmissionStatus::Late,
        _ => SubmissionStatus::OnTime,
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DayInput {
    #[schema(example = "2026-01-05", value_type = String, format = "date")]
    pub date: NaiveDate,
    /// 1 when present, 0 when absent
    #[schema(example = 1)]
    pub present: u8,
    /// Defaults to 8.00 for a present day
    #[schema(example = "7.50")]
    pub hours_worked: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAttendance {
    /// Defaults to the caller's own employee record
    pub employee_id: Option<u64>,
    pub pay_period_id: Option<u64>,
    pub days: Vec<DayInput>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDay {
    pub date: NaiveDate,
    pub present: bool,
    pub hours_worked: Option<Decimal>,
}

/// Validates submitted days: at least one, unique dates, present 0|1,
/// hours between 0 and 24.
pub fn parse_days(days: &[DayInput]) -> Result<Vec<ParsedDay>, AppError> {
    if days.is_empty() {
        return Err(AppError::validation("days", "days must not be empty"));
    }

    let mut seen = HashSet::new();
    let mut parsed = Vec::with_capacity(days.len());

    for day in days {
        if !seen.insert(day.date) {
            return Err(AppError::validation(
                "days",
                format!("{} appears more than once", day.date),
            ));
        }
        let present = match day.present {
            0 => false,
            1 => true,
            _ => return Err(AppError::validation("present", "present must be 0 or 1")),
        };
        let hours_worked = parse_optional_amount("hoursWorked", day.hours_worked.as_deref())?;
        if hours_worked.is_some_and(|h| h > MAX_DAY_HOURS) {
            return Err(AppError::validation(
                "hoursWorked",
                "hoursWorked must not exceed 24",
            ));
        }
        parsed.push(ParsedDay {
            date: day.date,
            present,
            hours_worked,
        });
    }

    Ok(parsed)
}

fn check_within(period: &PayPeriod, days: &[ParsedDay]) -> Result<(), AppError> {
    match days.iter().find(|d| !period.contains(d.date)) {
        Some(d) => Err(AppError::validation(
            "days",
            format!(
                "{} is outside the pay period {} to {}",
                d.date, period.start_date, period.end_date
            ),
        )),
        None => Ok(()),
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceDayResponse {
    #[schema(value_type = String, format = "date")]
    pub date: NaiveDate,
    pub present: u8,
    pub hours_worked: Option<String>,
    #[schema(value_type = Option<String>, example = "08:02:11")]
    pub clock_in: Option<NaiveTime>,
    #[schema(value_type = Option<String>)]
    pub clock_out: Option<NaiveTime>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceResponse {
    pub id: u64,
    pub employee_id: u64,
    pub pay_period_id: Option<u64>,
    #[schema(value_type = String, format = "date-time")]
    pub submitted_at: DateTime<Utc>,
    #[schema(example = "on_time")]
    pub status: String,
    #[schema(example = "80.00")]
    pub total_hours: String,
    pub days: Vec<AttendanceDayResponse>,
}

impl AttendanceResponse {
    fn build(attendance: Attendance, mut days: Vec<AttendanceDay>) -> Self {
        days.sort_by_key(|d| d.date);
        Self {
            id: attendance.id,
            employee_id: attendance.employee_id,
            pay_period_id: attendance.pay_period_id,
            submitted_at: attendance.submitted_at,
            status: attendance.status,
            total_hours: to_fixed(total_hours(&days)),
            days: days
                .into_iter()
                .map(|d| AttendanceDayResponse {
                    date: d.date,
                    present: u8::from(d.present),
                    hours_worked: d.hours_worked.map(to_fixed),
                    clock_in: d.clock_in,
                    clock_out: d.clock_out,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct AttendanceQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub employee_id: Option<u64>,
    pub pay_period_id: Option<u64>,
}

const ATTENDANCE_COLUMNS: &str = "id, employee_id, pay_period_id, submitted_at, status";
const DAY_COLUMNS: &str = "id, attendance_id, date, present, hours_worked, clock_in, clock_out";

/// Attendance row for the employee in the period (or the orphan row when
/// `pay_period_id` is None), created when missing.
async fn lock_or_create_attendance(
    conn: &mut MySqlConnection,
    employee_id: u64,
    pay_period_id: Option<u64>,
    status: SubmissionStatus,
) -> Result<u64, sqlx::Error> {
    let existing = sqlx::query_scalar::<_, u64>(
        "SELECT id FROM attendance WHERE employee_id = ? AND pay_period_id <=> ? ORDER BY id LIMIT 1 FOR UPDATE",
    )
    .bind(employee_id)
    .bind(pay_period_id)
    .fetch_optional(&mut *conn)
    .await?;

    match existing {
        Some(id) => {
            sqlx::query("UPDATE attendance SET submitted_at = NOW(), status = ? WHERE id = ?")
                .bind(status.as_ref())
                .bind(id)
                .execute(&mut *conn)
                .await?;
            Ok(id)
        }
        None => Ok(sqlx::query(
            "INSERT INTO attendance (employee_id, pay_period_id, status) VALUES (?, ?, ?)",
        )
        .bind(employee_id)
        .bind(pay_period_id)
        .bind(status.as_ref())
        .execute(&mut *conn)
        .await?
        .last_insert_id()),
    }
}

async fn load_attendance(conn: &mut MySqlConnection, id: u64) -> ApiResult<AttendanceResponse> {
    let attendance = sqlx::query_as::<_, Attendance>(&format!(
        "SELECT {} FROM attendance WHERE id = ?",
        ATTENDANCE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("Attendance"))?;

    let days = sqlx::query_as::<_, AttendanceDay>(&format!(
        "SELECT {} FROM attendance_days WHERE attendance_id = ?",
        DAY_COLUMNS
    ))
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(AttendanceResponse::build(attendance, days))
}

/// Caller's employee id, creating the record on first use.
async fn own_employee_id(conn: &mut MySqlConnection, auth: &AuthUser) -> Result<u64, sqlx::Error> {
    match auth.employee_id {
        Some(id) => Ok(id),
        None => ensure_employee_for_user(conn, auth.user_id).await,
    }
}

/// Drops the cached access record once a new employee link is committed.
async fn refresh_link(auth: &AuthUser, role_cache: &RoleCache) {
    if auth.employee_id.is_none() {
        role_cache.invalidate(auth.user_id).await;
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/attendance/check-in",
    responses(
        (status = 201, description = "Checked in", body = AttendanceResponse),
        (status = 409, description = "Already checked in today")
    ),
    tag = "Attendance",
    security(("bearer_auth" = []))
)]
pub async fn check_in(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    role_cache: web::Data<RoleCache>,
) -> ApiResult<impl Responder> {
    auth.require(Permission::SubmitAttendance)?;

    let now = Local::now();
    let today = now.date_naive();
    let clock_in = now.time();

    let mut tx = pool.begin().await?;
    let employee_id = own_employee_id(&mut *tx, &auth).await?;
    let period = period_containing(&mut *tx, today).await?;

    let attendance_id = lock_or_create_attendance(
        &mut *tx,
        employee_id,
        period.as_ref().map(|p| p.id),
        submission_status(today, period.as_ref()),
    )
    .await?;

    let already = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM attendance_days WHERE attendance_id = ? AND date = ?",
    )
    .bind(attendance_id)
    .bind(today)
    .fetch_one(&mut *tx)
    .await?;
    if already > 0 {
        return Err(AppError::Conflict("Already checked in today".into()));
    }

    sqlx::query(
        "INSERT INTO attendance_days (attendance_id, date, present, clock_in) VALUES (?, ?, TRUE, ?)",
    )
    .bind(attendance_id)
    .bind(today)
    .bind(clock_in)
    .execute(&mut *tx)
    .await?;

    let body = load_attendance(&mut *tx, attendance_id).await?;
    tx.commit().await?;
    refresh_link(&auth, &role_cache).await;

    info!(employee_id, %today, "Checked in");
    Ok(HttpResponse::Created().json(body))
}

#[utoipa::path(
    put,
    path = "/api/v1/attendance/check-out",
    responses(
        (status = 200, description = "Checked out", body = AttendanceResponse),
        (status = 400, description = "No open check-in today")
    ),
    tag = "Attendance",
    security(("bearer_auth" = []))
)]
pub async fn check_out(auth: AuthUser, pool: web::Data<MySqlPool>) -> ApiResult<impl Responder> {
    auth.require(Permission::SubmitAttendance)?;

    let now = Local::now();
    let today = now.date_naive();
    let no_open = || AppError::BadRequest("No open check-in for today".into());

    let employee_id = auth.employee_id.ok_or_else(no_open)?;

    let mut tx = pool.begin().await?;
    let open = sqlx::query_as::<_, (u64, u64, NaiveTime)>(
        r#"
        SELECT d.id, d.attendance_id, d.clock_in
        FROM attendance_days d
        JOIN attendance a ON a.id = d.attendance_id
        WHERE a.employee_id = ? AND d.date = ?
          AND d.clock_in IS NOT NULL AND d.clock_out IS NULL
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(employee_id)
    .bind(today)
    .fetch_optional(&mut *tx)
    .await?;

    let (day_id, attendance_id, clock_in) = open.ok_or_else(no_open)?;
    let clock_out = now.time();
    let hours = hours_between(clock_in, clock_out);

    sqlx::query("UPDATE attendance_days SET clock_out = ?, hours_worked = ? WHERE id = ?")
        .bind(clock_out)
        .bind(hours)
        .bind(day_id)
        .execute(&mut *tx)
        .await?;

    let body = load_attendance(&mut *tx, attendance_id).await?;
    tx.commit().await?;

    info!(employee_id, %today, hours = %hours, "Checked out");
    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    post,
    path = "/api/v1/attendance",
    request_body = SubmitAttendance,
    responses(
        (status = 201, description = "Attendance stored", body = AttendanceResponse),
        (status = 400, description = "Invalid days"),
        (status = 404, description = "Employee or pay period not found")
    ),
    tag = "Attendance",
    security(("bearer_auth" = []))
)]
pub async fn submit_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    role_cache: web::Data<RoleCache>,
    payload: web::Json<SubmitAttendance>,
) -> ApiResult<impl Responder> {
    let days = parse_days(&payload.days)?;

    let mut tx = pool.begin().await?;

    let employee_id = match payload.employee_id {
        Some(id) if auth.employee_id != Some(id) => {
            auth.require(Permission::ManageAttendance)?;
            let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM employees WHERE id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
            if exists == 0 {
                return Err(AppError::not_found("Employee"));
            }
            id
        }
        _ => {
            auth.require(Permission::SubmitAttendance)?;
            own_employee_id(&mut *tx, &auth).await?
        }
    };

    let period = match payload.pay_period_id {
        Some(id) => Some(fetch_period(&mut *tx, id).await?),
        None => period_containing(&mut *tx, days[0].date).await?,
    };
    if let Some(p) = &period {
        check_within(p, &days)?;
    }

    let status = submission_status(Local::now().date_naive(), period.as_ref());
    let attendance_id =
        lock_or_create_attendance(&mut *tx, employee_id, period.as_ref().map(|p| p.id), status)
            .await?;

    for day in &days {
        sqlx::query("DELETE FROM attendance_days WHERE attendance_id = ? AND date = ?")
            .bind(attendance_id)
            .bind(day.date)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO attendance_days (attendance_id, date, present, hours_worked) VALUES (?, ?, ?, ?)",
        )
        .bind(attendance_id)
        .bind(day.date)
        .bind(day.present)
        .bind(day.hours_worked)
        .execute(&mut *tx)
        .await?;
    }

    let body = load_attendance(&mut *tx, attendance_id).await?;
    tx.commit().await?;
    refresh_link(&auth, &role_cache).await;

    info!(
        employee_id,
        attendance_id,
        pay_period_id = ?period.as_ref().map(|p| p.id),
        days = days.len(),
        status = %status,
        "Attendance submitted"
    );
    Ok(HttpResponse::Created().json(body))
}

#[utoipa::path(
    get,
    path = "/api/v1/attendance",
    params(AttendanceQuery),
    responses((status = 200, description = "Attendance with days and total hours")),
    tag = "Attendance",
    security(("bearer_auth" = []))
)]
pub async fn list_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<AttendanceQuery>,
) -> ApiResult<impl Responder> {
    let page = Page::new(query.page, query.per_page);

    // without manage_attendance callers only see their own rows
    let employee_filter = if auth.can(Permission::ManageAttendance) {
        query.employee_id
    } else {
        auth.require(Permission::SubmitAttendance)?;
        match (query.employee_id, auth.employee_id) {
            (Some(requested), own) if own != Some(requested) => {
                return Err(AppError::Forbidden(format!(
                    "Missing permission: {}",
                    Permission::ManageAttendance
                )));
            }
            (_, Some(own)) => Some(own),
            (_, None) => {
                return Ok(HttpResponse::Ok().json(Paginated::<AttendanceResponse>::new(
                    Vec::new(),
                    page,
                    0,
                )));
            }
        }
    };

    let mut filters = Filters::default();
    if let Some(id) = employee_filter {
        filters.push("employee_id = ?", FilterValue::U64(id));
    }
    if let Some(id) = query.pay_period_id {
        filters.push("pay_period_id = ?", FilterValue::U64(id));
    }
    let where_clause = filters.where_clause();

    let mut conn = pool.acquire().await?;

    let count_sql = format!("SELECT COUNT(*) FROM attendance{}", where_clause);
    let total = bind_filters!(sqlx::query_scalar::<_, i64>(&count_sql), filters)
        .fetch_one(&mut *conn)
        .await?;

    let data_sql = format!(
        "SELECT {} FROM attendance{} ORDER BY submitted_at DESC, id DESC LIMIT ? OFFSET ?",
        ATTENDANCE_COLUMNS, where_clause
    );
    let rows = bind_filters!(sqlx::query_as::<_, Attendance>(&data_sql), filters)
        .bind(page.per_page)
        .bind(page.offset)
        .fetch_all(&mut *conn)
        .await?;

    let mut days_by_attendance: BTreeMap<u64, Vec<AttendanceDay>> = BTreeMap::new();
    if !rows.is_empty() {
        let placeholders = vec!["?"; rows.len()].join(", ");
        let days_sql = format!(
            "SELECT {} FROM attendance_days WHERE attendance_id IN ({})",
            DAY_COLUMNS, placeholders
        );
        let mut days_query = sqlx::query_as::<_, AttendanceDay>(&days_sql);
        for row in &rows {
            days_query = days_query.bind(row.id);
        }
        for day in days_query.fetch_all(&mut *conn).await? {
            days_by_attendance.entry(day.attendance_id).or_default().push(day);
        }
    }

    debug!(total, rows = rows.len(), "Listed attendance");

    let data: Vec<AttendanceResponse> = rows
        .into_iter()
        .map(|a| {
            let days = days_by_attendance.remove(&a.id).unwrap_or_default();
            AttendanceResponse::build(a, days)
        })
        .collect();
    Ok(HttpResponse::Ok().json(Paginated::new(data, page, total)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(date: &str, present: u8, hours: Option<&str>) -> DayInput {
        DayInput {
            date: date.parse().unwrap(),
            present,
            hours_worked: hours.map(str::to_string),
        }
    }

    fn period() -> PayPeriod {
        PayPeriod {
            id: 3,
            start_date: "2026-01-01".parse().unwrap(),
            end_date: "2026-01-15".parse().unwrap(),
            pay_date: "2026-01-20".parse().unwrap(),
            period_type: "bi_weekly".into(),
        }
    }

    #[test]
    fn parses_present_flags_and_hours() {
        let days = parse_days(&[
            input("2026-01-05", 1, None),
            input("2026-01-06", 1, Some("6.50")),
            input("2026-01-07", 0, None),
        ])
        .unwrap();

        assert!(days[0].present);
        assert_eq!(days[0].hours_worked, None);
        assert_eq!(days[1].hours_worked, Some(dec!(6.50)));
        assert!(!days[2].present);
    }

    #[test]
    fn rejects_bad_days() {
        assert!(parse_days(&[]).is_err());
        assert!(parse_days(&[input("2026-01-05", 2, None)]).is_err());
        assert!(parse_days(&[input("2026-01-05", 1, Some("-1"))]).is_err());
        assert!(parse_days(&[input("2026-01-05", 1, Some("25.00"))]).is_err());
        assert!(parse_days(&[input("2026-01-05", 1, None), input("2026-01-05", 0, None)]).is_err());
    }

    #[test]
    fn days_must_fall_inside_the_period() {
        let inside = parse_days(&[input("2026-01-01", 1, None), input("2026-01-15", 1, None)]).unwrap();
        assert!(check_within(&period(), &inside).is_ok());

        let outside = parse_days(&[input("2026-01-16", 1, None)]).unwrap();
        assert!(matches!(
            check_within(&period(), &outside),
            Err(AppError::Validation { .. })
        ));
    }

    #[test]
    fn late_only_after_period_end() {
        let p = period();
        assert_eq!(
            submission_status("2026-01-15".parse().unwrap(), Some(&p)),
            SubmissionStatus::OnTime
        );
        assert_eq!(
            submission_status("2026-01-16".parse().unwrap(), Some(&p)),
            SubmissionStatus::Late
        );
        assert_eq!(
            submission_status("2030-01-01".parse().unwrap(), None),
            SubmissionStatus::OnTime
        );
        assert_eq!(SubmissionStatus::OnTime.as_ref(), "on_time");
    }

    #[test]
    fn response_sums_present_days() {
        let attendance = Attendance {
            id: 1,
            employee_id: 2,
            pay_period_id: Some(3),
            submitted_at: Utc::now(),
            status: "on_time".into(),
        };
        let day = |d: u32, present, hours| AttendanceDay {
            id: d as u64,
            attendance_id: 1,
            date: NaiveDate::from_ymd_opt(2026, 1, d).unwrap(),
            present,
            hours_worked: hours,
            clock_in: None,
            clock_out: None,
        };
        let body = AttendanceResponse::build(
            attendance,
            vec![day(6, true, Some(dec!(4))), day(5, true, None), day(7, false, Some(dec!(8)))],
        );

        assert_eq!(body.total_hours, "12.00");
        assert_eq!(body.days[0].date, NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
        assert_eq!(body.days[2].present, 0);
    }
}
