pub mod http;
pub mod system;
