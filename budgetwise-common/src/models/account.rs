use chrono::{DateTime, Utc};
use diesel::{AsExpression, FromSqlRow, Insertable, Queryable};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::text_enum_sql;
use crate::models::user::User;
use crate::schema::accounts;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = diesel::sql_types::Text)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Current,
    Savings,
}

text_enum_sql!(AccountType, "Unrecognized account type", {
    Current => "CURRENT",
    Savings => "SAVINGS",
});

#[derive(Clone, Debug, Serialize, Deserialize, Associations, Identifiable, Queryable)]
#[diesel(belongs_to(User, foreign_key = user_id))]
#[diesel(table_name = accounts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Account {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub account_type: AccountType,
    pub balance: Decimal,
    pub is_default: bool,
    pub created_timestamp: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = accounts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewAccount<'a> {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: &'a str,
    pub account_type: AccountType,
    pub balance: Decimal,
    pub is_default: bool,
    pub created_timestamp: DateTime<Utc>,
}
