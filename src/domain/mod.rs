//! Pure domain types: no storage, no I/O
pub mod value_objects;
pub mod aggregates;
pub mod events;
