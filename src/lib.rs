//! xsync - chunked media transfer, engine bootstrap and self-correcting subtitle demux
//!
//! Large buffers cross a size-limited message channel in chunks, a media engine is
//! bootstrapped through a ladder of execution strategies, and subtitle extraction is
//! retried with timestamp repair until the resulting timelines look sane.

pub mod cli;
pub mod config;
pub mod decode;
pub mod demux;
pub mod engine;
pub mod error;
pub mod packager;
pub mod protocol;
pub mod relay;
pub mod service;
pub mod timeline;
pub mod track;
pub mod transfer;
pub mod vtt;
