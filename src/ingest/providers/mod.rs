pub mod fixture;
pub mod http_feed;
