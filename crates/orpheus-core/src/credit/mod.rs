pub mod failure;
pub mod synthetic_rating;
