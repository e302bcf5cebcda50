//! Generated protocol buffer types and gRPC stubs.
//!
//! The module tree mirrors the protobuf package hierarchy so that cross-package references in the
//! generated code resolve. The shorter aliases at the bottom are what the rest of the crate uses.

#![allow(
    missing_docs,
    unreachable_pub,
    unused_qualifications,
    unused_results,
    clippy::all,
    clippy::nursery,
    clippy::missing_docs_in_private_items
)]

pub mod google {
    pub mod bigtable {
        pub mod admin {
            pub mod v2 {
                tonic::include_proto!("google.bigtable.admin.v2");
            }
        }

        pub mod v2 {
            tonic::include_proto!("google.bigtable.v2");
        }
    }

    pub mod iam {
        pub mod v1 {
            tonic::include_proto!("google.iam.v1");
        }
    }

    pub mod longrunning {
        tonic::include_proto!("google.longrunning");
    }

    pub mod rpc {
        tonic::include_proto!("google.rpc");
    }
}

/// Table and instance administration (`google.bigtable.admin.v2`).
pub use self::google::bigtable::admin::v2 as admin;
/// Row reads and writes (`google.bigtable.v2`).
pub use self::google::bigtable::v2 as data;
/// Access control policies (`google.iam.v1`).
pub use self::google::iam::v1 as iam;
/// Long-running operations (`google.longrunning`).
pub use self::google::longrunning;
/// The shared error model (`google.rpc`).
pub use self::google::rpc;
