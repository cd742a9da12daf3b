//! Protobuf types and gRPC glue for the peer service.
//!
//! The code is generated from `proto/peerservice.proto` with `tonic-build`
//! and committed, so building the crate does not require a protobuf
//! toolchain. Regenerate after editing the proto file.

mod peerservice;

pub use peerservice::*;
