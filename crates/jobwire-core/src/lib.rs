//! jobwire-core — wire format and configuration shared by the jobwire crates.
//! All other jobwire crates depend on this one.

pub mod config;
pub mod wire;

pub use wire::{Envelope, Kind, Operate, Request, Response, Status, WebOperate, WebResponse};
