#![allow(
    unreachable_pub,
    clippy::pedantic,
    clippy::arithmetic_side_effects,
    clippy::needless_lifetimes
)]
//! Files generated using [`tonic-build`] and [`buf`] from the argus protobuf
//! definitions.
//!
//! [`tonic-build`]: https://docs.rs/tonic-build
//! [`buf`]: https://buf.build

#[path = ""]
pub mod argus {
    #[path = ""]
    pub mod abci {
        pub mod v1 {
            include!("argus.abci.v1.rs");
        }
    }

    #[path = ""]
    pub mod oracle {
        pub mod v1 {
            include!("argus.oracle.v1.rs");
        }
    }
}
