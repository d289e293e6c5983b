//! Tether core library — gateway transport and configuration shared by the
//! CLI and other thin client shells.

pub mod config;
pub mod gateway;
