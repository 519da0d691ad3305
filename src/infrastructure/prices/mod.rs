pub mod live;

pub use live::LivePriceProvider;
