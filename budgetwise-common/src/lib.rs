#![cfg(not(doctest))]

#[macro_use]
extern crate diesel;

pub mod db;
pub mod email;
pub mod insights;
pub mod models;
pub mod recurrence;
pub mod reports;
pub mod schema;
