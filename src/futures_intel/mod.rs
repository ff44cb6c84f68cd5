pub mod funding_rate;

pub use funding_rate::{FundingData, FundingProvider};
