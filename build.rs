fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(
            &[
                "proto/google/bigtable/admin/v2/bigtable_table_admin.proto",
                "proto/google/bigtable/admin/v2/bigtable_instance_admin.proto",
                "proto/google/bigtable/v2/bigtable.proto",
                "proto/google/longrunning/operations.proto",
            ],
            &["proto"],
        )
        .unwrap_or_else(|e| panic!("Failed to compile protos {:?}", e));
    println!("cargo:rerun-if-changed=proto");
    Ok(())
}
