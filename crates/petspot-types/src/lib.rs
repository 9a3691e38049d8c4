//! Wire types shared by the PetSpot crates.

pub mod api;
pub mod models;
