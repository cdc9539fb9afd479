pub mod client;

pub use client::{DirectoryClient, DirectoryError, PartnerRef, UserRef};
