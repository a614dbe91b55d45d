//! Identity injection. The identity collaborator signs a short-lived token;
//! this service only verifies it and reads the caller's id, name and role.

pub mod jwt;
pub mod middleware;
