//! Booking lifecycle state machine

pub mod state_machine;

pub use state_machine::BookingStateMachine;
