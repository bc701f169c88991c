mod common;
mod spider_tests;
mod transport_tests;
