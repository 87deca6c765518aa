pub mod auth;
pub mod client;
pub mod paging;

pub use auth::{AccessToken, ImdsCredential, StaticCredential, TokenCredential};
pub use client::{ArmClient, ManagementCaller, RestResponse, MANAGEMENT_BASE};
pub use paging::list_all;
