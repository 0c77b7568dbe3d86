pub mod copy_trade;
pub mod market_loader;
pub mod price_feed;
