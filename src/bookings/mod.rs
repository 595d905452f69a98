mod models;
pub mod routes;
pub mod rules;

pub use models::{
    BookingFilter, BookingRequest, BookingStatus, BookingUpdate, CourtBooking, MyBookingFilter,
    PaymentStatus, SlotQuery,
};
