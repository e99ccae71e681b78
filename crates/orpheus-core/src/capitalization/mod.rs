pub mod operating_leases;
pub mod research;
