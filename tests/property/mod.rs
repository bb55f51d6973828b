#[cfg(feature = "ssr")]
pub mod pool_proptest;
