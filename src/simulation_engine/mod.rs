pub mod scenarios;
pub mod simulation;
pub mod traffic_feed;
