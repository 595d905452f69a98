mod models;
pub mod routes;

pub use models::{Court, CourtFilter, CourtScope, CreateCourt, UpdateCourt};

#[cfg(test)]
pub(crate) use models::tests::court as test_court;
