mod assignment;
mod models;
pub mod routes;

pub use models::{
    CompleteMatch, CreateMatch, CreateSession, JoinQueue, QueueEntry, QueueMatch, QueueSession,
    SessionFilter, SessionStatusChange,
};
