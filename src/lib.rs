// Settings unions mirror the wire document and keep their payloads inline.
#![allow(clippy::large_enum_variant)]

pub mod common;
pub mod config;
pub mod router;
