use chrono::{DateTime, Utc};
use diesel::{Insertable, Queryable};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::user::User;
use crate::schema::budgets;

#[derive(Clone, Debug, Serialize, Deserialize, Associations, Identifiable, Queryable)]
#[diesel(belongs_to(User, foreign_key = user_id))]
#[diesel(table_name = budgets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Budget {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub last_alert_sent: Option<DateTime<Utc>>,
    pub modified_timestamp: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = budgets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewBudget {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub last_alert_sent: Option<DateTime<Utc>>,
    pub modified_timestamp: DateTime<Utc>,
}
