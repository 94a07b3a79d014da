//! Integration tests driving the public API

mod backtest_test;
mod e2e_test;
mod feed_test;
mod kite_test;
mod live_test;
