pub mod clock;
pub mod config;
pub mod fetch;
pub mod geocode;
pub mod metrics;
pub mod model;
pub mod motion;
pub mod output;
pub mod runtime;
pub mod stream;
